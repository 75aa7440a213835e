use super::constants::*;
use chrono::NaiveDate;
use rental_billing::billing::{BillingProcessor, BillingSettings};
use rental_billing::billing_store::{
    CreateInvoiceOutcome, CustomerSnapshot, Frequency, Invoice, InvoiceInit, InvoiceStatus,
    InvoiceStore, InvoiceTemplate, RecurringSchedule, ScheduleInit, SqliteInvoiceStore,
    TemplateLineItem,
};
use rusqlite::params;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn test_settings() -> BillingSettings {
    BillingSettings {
        store_call_timeout: Duration::from_millis(TEST_STORE_TIMEOUT_MS),
        ..Default::default()
    }
}

/// Two-line template: one serialized rental unit and one service line.
pub fn template(customer_name: &str) -> InvoiceTemplate {
    InvoiceTemplate {
        customer: CustomerSnapshot {
            name: customer_name.to_string(),
            email: Some("accounts@example.test".to_string()),
            phone: None,
            address: Some("1 Yard Road".to_string()),
        },
        items: vec![
            TemplateLineItem {
                item_id: "excavator-3t".to_string(),
                description: "Mini excavator, monthly hire".to_string(),
                quantity: 1.0,
                unit_price: 900.0,
                tax_rate: 0.2,
                discount_rate: 0.0,
                line_total: 1080.0,
                serial_numbers: vec!["EX-0042".to_string()],
            },
            TemplateLineItem {
                item_id: "service".to_string(),
                description: "Scheduled maintenance".to_string(),
                quantity: 1.0,
                unit_price: 100.0,
                tax_rate: 0.2,
                discount_rate: 0.1,
                line_total: 108.0,
                serial_numbers: vec![],
            },
        ],
        subtotal: 1000.0,
        tax_amount: 198.0,
        discount_amount: 10.0,
        total: 1188.0,
        notes: Some("Thank you for your business".to_string()),
    }
}

pub fn schedule_init(
    customer_id: &str,
    frequency: Frequency,
    interval: u32,
    next_invoice_date: NaiveDate,
    payment_terms: Option<&str>,
) -> ScheduleInit {
    ScheduleInit {
        customer_id: customer_id.to_string(),
        frequency,
        interval,
        next_invoice_date,
        template: template(CUSTOMER_1_NAME),
        payment_terms: payment_terms.map(str::to_string),
    }
}

/// An on-disk billing database plus helpers to build processors over it.
pub struct TestBilling {
    pub store: Arc<SqliteInvoiceStore>,
    db_path: PathBuf,
    _temp_dir: TempDir,
}

impl TestBilling {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("billing.db");
        let store = Arc::new(SqliteInvoiceStore::new(&db_path).unwrap());
        Self {
            store,
            db_path,
            _temp_dir: temp_dir,
        }
    }

    pub fn processor(&self) -> BillingProcessor {
        BillingProcessor::new(self.store.clone(), test_settings())
    }

    pub async fn add_schedule(&self, init: ScheduleInit) -> RecurringSchedule {
        self.store.create_recurring_schedule(&init).await.unwrap()
    }

    /// Adds a one-off (non-recurring) invoice.
    pub async fn add_invoice(
        &self,
        invoice_number: &str,
        due_date: NaiveDate,
        status: InvoiceStatus,
    ) -> Invoice {
        let data = InvoiceInit {
            invoice_number: invoice_number.to_string(),
            customer_id: CUSTOMER_2_ID.to_string(),
            customer: CustomerSnapshot {
                name: CUSTOMER_2_NAME.to_string(),
                ..Default::default()
            },
            invoice_date: due_date,
            due_date,
            status,
            subtotal: 250.0,
            tax_amount: 0.0,
            discount_amount: 0.0,
            total: 250.0,
            notes: None,
            payment_terms: "Net 0".to_string(),
            is_recurring: false,
            recurring_schedule_id: None,
        };
        match self.store.create_invoice(&data).await.unwrap() {
            CreateInvoiceOutcome::Created(invoice) => invoice,
            other => panic!("invoice {} not created: {:?}", invoice_number, other),
        }
    }

    pub async fn invoice(&self, id: &str) -> Invoice {
        self.store.get_invoice(id).await.unwrap().unwrap()
    }

    pub async fn schedule(&self, id: &str) -> RecurringSchedule {
        self.store.get_recurring_schedule(id).await.unwrap().unwrap()
    }

    /// Overwrites a stored column directly, bypassing the store's validation.
    ///
    /// Used to simulate rows written by other tools.
    pub fn corrupt_schedule(&self, id: &str, column: &str, value: &str) {
        let conn = rusqlite::Connection::open(&self.db_path).unwrap();
        let updated = conn
            .execute(
                &format!("UPDATE recurring_schedules SET {} = ?1 WHERE id = ?2", column),
                params![value, id],
            )
            .unwrap();
        assert_eq!(updated, 1);
    }

    pub fn deactivate_schedule(&self, id: &str) {
        let conn = rusqlite::Connection::open(&self.db_path).unwrap();
        conn.execute(
            "UPDATE recurring_schedules SET is_active = 0 WHERE id = ?1",
            params![id],
        )
        .unwrap();
    }
}
