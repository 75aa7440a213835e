use crate::billing::BillingError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Recurring schedules
// =============================================================================

/// How often a recurring schedule produces an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Yearly => "yearly",
        }
    }

    /// Number of calendar months covered by one period of this frequency.
    pub fn months_per_period(&self) -> u32 {
        match self {
            Frequency::Monthly => 1,
            Frequency::Quarterly => 3,
            Frequency::Yearly => 12,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            "yearly" => Ok(Frequency::Yearly),
            _ => Err(BillingError::UnsupportedFrequency(s.to_string())),
        }
    }
}

/// Customer fields copied onto every generated invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CustomerSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// One line of an invoice template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateLineItem {
    pub item_id: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub discount_rate: f64,
    pub line_total: f64,
    /// Serialized units billed on this line.
    #[serde(default)]
    pub serial_numbers: Vec<String>,
}

/// Snapshot of customer and line-item data copied into each generated invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTemplate {
    pub customer: CustomerSnapshot,
    pub items: Vec<TemplateLineItem>,
    pub subtotal: f64,
    #[serde(default)]
    pub tax_amount: f64,
    #[serde(default)]
    pub discount_amount: f64,
    pub total: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl InvoiceTemplate {
    /// Checks the template can produce a meaningful invoice.
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.customer.name.trim().is_empty() {
            return Err(BillingError::InvalidTemplate(
                "customer name is empty".to_string(),
            ));
        }
        if self.items.is_empty() {
            return Err(BillingError::InvalidTemplate(
                "template has no line items".to_string(),
            ));
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.item_id.trim().is_empty() {
                return Err(BillingError::InvalidTemplate(format!(
                    "line {} has no item id",
                    index
                )));
            }
            if !(item.quantity > 0.0) {
                return Err(BillingError::InvalidTemplate(format!(
                    "line {} has non-positive quantity {}",
                    index, item.quantity
                )));
            }
            if !(item.unit_price >= 0.0) {
                return Err(BillingError::InvalidTemplate(format!(
                    "line {} has negative unit price {}",
                    index, item.unit_price
                )));
            }
        }
        if !self.total.is_finite() || self.total < 0.0 {
            return Err(BillingError::InvalidTemplate(format!(
                "invalid total {}",
                self.total
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, BillingError> {
        serde_json::to_string(self).map_err(|e| BillingError::InvalidTemplate(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, BillingError> {
        serde_json::from_str(raw).map_err(|e| BillingError::InvalidTemplate(e.to_string()))
    }
}

/// A schedule driving periodic invoice generation for one customer.
///
/// `frequency`, `interval` and `template_json` are kept as stored so that one
/// malformed row only fails its own generation, not the listing of every
/// schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurringSchedule {
    pub id: String,
    pub customer_id: String,
    pub frequency: String,
    pub interval: i64,
    pub next_invoice_date: NaiveDate,
    pub last_invoice_date: Option<NaiveDate>,
    pub template_json: String,
    pub payment_terms: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl RecurringSchedule {
    pub fn frequency(&self) -> Result<Frequency, BillingError> {
        self.frequency.parse()
    }

    /// The stored interval, if it is a positive number that fits a `u32`.
    pub fn interval(&self) -> Result<u32, BillingError> {
        u32::try_from(self.interval)
            .ok()
            .filter(|interval| *interval > 0)
            .ok_or(BillingError::InvalidInterval(self.interval))
    }

    pub fn template(&self) -> Result<InvoiceTemplate, BillingError> {
        InvoiceTemplate::from_json(&self.template_json)
    }
}

/// Data needed to create a recurring schedule.
#[derive(Debug, Clone)]
pub struct ScheduleInit {
    pub customer_id: String,
    pub frequency: Frequency,
    pub interval: u32,
    pub next_invoice_date: NaiveDate,
    pub template: InvoiceTemplate,
    pub payment_terms: Option<String>,
}

impl ScheduleInit {
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.customer_id.trim().is_empty() {
            return Err(BillingError::InvalidTemplate(
                "schedule has no customer id".to_string(),
            ));
        }
        if self.interval == 0 {
            return Err(BillingError::InvalidInterval(i64::from(self.interval)));
        }
        self.template.validate()
    }
}

/// Fields the billing processor changes when advancing a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePatch {
    pub last_invoice_date: NaiveDate,
    pub next_invoice_date: NaiveDate,
}

// =============================================================================
// Invoices
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Overdue,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InvoiceStatus::Pending),
            "overdue" => Some(InvoiceStatus::Overdue),
            "paid" => Some(InvoiceStatus::Paid),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    pub customer_id: String,
    pub customer: CustomerSnapshot,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub discount_amount: f64,
    pub total: f64,
    pub notes: Option<String>,
    pub payment_terms: String,
    pub is_recurring: bool,
    pub recurring_schedule_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data needed to create an invoice; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceInit {
    pub invoice_number: String,
    pub customer_id: String,
    pub customer: CustomerSnapshot,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub discount_amount: f64,
    pub total: f64,
    pub notes: Option<String>,
    pub payment_terms: String,
    pub is_recurring: bool,
    pub recurring_schedule_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoicePatch {
    pub status: InvoiceStatus,
}

/// Result of an insert-or-skip invoice creation.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateInvoiceOutcome {
    Created(Invoice),
    /// An invoice for the same (recurring schedule, invoice date) already exists.
    AlreadyGenerated,
    /// The invoice number is taken by another invoice.
    DuplicateNumber,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceLine {
    pub id: i64,
    pub invoice_id: String,
    pub item_id: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub tax_rate: f64,
    pub discount_rate: f64,
    pub line_total: f64,
    pub serial_numbers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceLineInit {
    pub invoice_id: String,
    pub item_id: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub tax_rate: f64,
    pub discount_rate: f64,
    pub line_total: f64,
    pub serial_numbers: Vec<String>,
}

impl InvoiceLineInit {
    pub fn from_template(invoice_id: &str, item: &TemplateLineItem) -> Self {
        Self {
            invoice_id: invoice_id.to_string(),
            item_id: item.item_id.clone(),
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            tax_rate: item.tax_rate,
            discount_rate: item.discount_rate,
            line_total: item.line_total,
            serial_numbers: item.serial_numbers.clone(),
        }
    }
}
