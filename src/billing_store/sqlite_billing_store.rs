use super::models::{
    CreateInvoiceOutcome, CustomerSnapshot, Invoice, InvoiceInit, InvoiceLine, InvoiceLineInit,
    InvoicePatch, InvoiceStatus, RecurringSchedule, ScheduleInit, SchedulePatch,
};
use super::schema::BILLING_VERSIONED_SCHEMAS;
use super::InvoiceStore;
use crate::sqlite_persistence::open_or_migrate;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, types::Type, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEDULE_COLUMNS: &str = "id, customer_id, frequency, interval_count, next_invoice_date, \
    last_invoice_date, template, payment_terms, is_active, created_at";

const INVOICE_COLUMNS: &str = "id, invoice_number, customer_id, customer_name, customer_email, \
    customer_phone, customer_address, invoice_date, due_date, status, subtotal, tax_amount, \
    discount_amount, total, notes, payment_terms, is_recurring, recurring_schedule_id, created_at";

const LINE_COLUMNS: &str = "id, invoice_id, item_id, description, quantity, unit_price, \
    tax_rate, discount_rate, line_total, serial_numbers";

/// SQLite-backed [`InvoiceStore`].
///
/// A single connection is shared behind a mutex; every call runs on the
/// blocking pool so async callers never stall the runtime on disk I/O.
pub struct SqliteInvoiceStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteInvoiceStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        info!("Opening billing database at {:?}", path);
        let conn = Connection::open(path).context("Failed to open billing database")?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        open_or_migrate(&mut conn, BILLING_VERSIONED_SCHEMAS, "billing")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("billing database lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .context("billing database task failed")?
    }

    fn format_date(date: &NaiveDate) -> String {
        date.format(DATE_FORMAT).to_string()
    }

    fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
        NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    }

    fn date_column(row: &rusqlite::Row, name: &str) -> rusqlite::Result<NaiveDate> {
        let raw: String = row.get(name)?;
        Self::parse_date(&raw)
    }

    fn optional_date_column(row: &rusqlite::Row, name: &str) -> rusqlite::Result<Option<NaiveDate>> {
        let raw: Option<String> = row.get(name)?;
        raw.as_deref().map(Self::parse_date).transpose()
    }

    fn datetime_column(row: &rusqlite::Row, name: &str) -> rusqlite::Result<DateTime<Utc>> {
        let raw: String = row.get(name)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    }

    fn row_to_schedule(row: &rusqlite::Row) -> rusqlite::Result<RecurringSchedule> {
        let is_active: i64 = row.get("is_active")?;

        Ok(RecurringSchedule {
            id: row.get("id")?,
            customer_id: row.get("customer_id")?,
            frequency: row.get("frequency")?,
            // Validated on use so a bad value fails only this schedule
            interval: row.get("interval_count")?,
            next_invoice_date: Self::date_column(row, "next_invoice_date")?,
            last_invoice_date: Self::optional_date_column(row, "last_invoice_date")?,
            template_json: row.get("template")?,
            payment_terms: row.get("payment_terms")?,
            is_active: is_active != 0,
            created_at: Self::datetime_column(row, "created_at")?,
        })
    }

    fn row_to_invoice(row: &rusqlite::Row) -> rusqlite::Result<Invoice> {
        let status_str: String = row.get("status")?;
        let status = InvoiceStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                Type::Text,
                format!("unknown invoice status {:?}", status_str).into(),
            )
        })?;
        let is_recurring: i64 = row.get("is_recurring")?;

        Ok(Invoice {
            id: row.get("id")?,
            invoice_number: row.get("invoice_number")?,
            customer_id: row.get("customer_id")?,
            customer: CustomerSnapshot {
                name: row.get("customer_name")?,
                email: row.get("customer_email")?,
                phone: row.get("customer_phone")?,
                address: row.get("customer_address")?,
            },
            invoice_date: Self::date_column(row, "invoice_date")?,
            due_date: Self::date_column(row, "due_date")?,
            status,
            subtotal: row.get("subtotal")?,
            tax_amount: row.get("tax_amount")?,
            discount_amount: row.get("discount_amount")?,
            total: row.get("total")?,
            notes: row.get("notes")?,
            payment_terms: row.get("payment_terms")?,
            is_recurring: is_recurring != 0,
            recurring_schedule_id: row.get("recurring_schedule_id")?,
            created_at: Self::datetime_column(row, "created_at")?,
        })
    }

    fn row_to_line(row: &rusqlite::Row) -> rusqlite::Result<InvoiceLine> {
        let serials_raw: String = row.get("serial_numbers")?;
        let serial_numbers: Vec<String> = serde_json::from_str(&serials_raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

        Ok(InvoiceLine {
            id: row.get("id")?,
            invoice_id: row.get("invoice_id")?,
            item_id: row.get("item_id")?,
            description: row.get("description")?,
            quantity: row.get("quantity")?,
            unit_price: row.get("unit_price")?,
            tax_rate: row.get("tax_rate")?,
            discount_rate: row.get("discount_rate")?,
            line_total: row.get("line_total")?,
            serial_numbers,
        })
    }

    fn query_invoices(
        conn: &Connection,
        where_clause: &str,
        param: &str,
    ) -> Result<Vec<Invoice>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM invoices WHERE {}",
            INVOICE_COLUMNS, where_clause
        ))?;
        let invoices = stmt
            .query_map(params![param], Self::row_to_invoice)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(invoices)
    }
}

#[async_trait]
impl InvoiceStore for SqliteInvoiceStore {
    async fn list_active_recurring_schedules(&self) -> Result<Vec<RecurringSchedule>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM recurring_schedules WHERE is_active = 1
                 ORDER BY next_invoice_date, id",
                SCHEDULE_COLUMNS
            ))?;
            let schedules = stmt
                .query_map([], Self::row_to_schedule)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(schedules)
        })
        .await
    }

    async fn list_invoices_for_customer(&self, customer_id: &str) -> Result<Vec<Invoice>> {
        let customer_id = customer_id.to_string();
        self.with_conn(move |conn| {
            Self::query_invoices(conn, "customer_id = ?1 ORDER BY invoice_date, id", &customer_id)
        })
        .await
    }

    async fn create_invoice(&self, data: &InvoiceInit) -> Result<CreateInvoiceOutcome> {
        let data = data.clone();
        self.with_conn(move |conn| {
            let id = uuid::Uuid::new_v4().to_string();
            let created_at = Utc::now();

            let result = conn.execute(
                "INSERT INTO invoices (id, invoice_number, customer_id, customer_name,
                    customer_email, customer_phone, customer_address, invoice_date, due_date,
                    status, subtotal, tax_amount, discount_amount, total, notes, payment_terms,
                    is_recurring, recurring_schedule_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19)
                 ON CONFLICT(recurring_schedule_id, invoice_date) DO NOTHING",
                params![
                    id,
                    data.invoice_number,
                    data.customer_id,
                    data.customer.name,
                    data.customer.email,
                    data.customer.phone,
                    data.customer.address,
                    Self::format_date(&data.invoice_date),
                    Self::format_date(&data.due_date),
                    data.status.as_str(),
                    data.subtotal,
                    data.tax_amount,
                    data.discount_amount,
                    data.total,
                    data.notes,
                    data.payment_terms,
                    data.is_recurring,
                    data.recurring_schedule_id,
                    created_at.to_rfc3339(),
                ],
            );

            match result {
                Ok(0) => {
                    debug!(
                        "Invoice for schedule {:?} on {} already exists",
                        data.recurring_schedule_id, data.invoice_date
                    );
                    Ok(CreateInvoiceOutcome::AlreadyGenerated)
                }
                Ok(_) => Ok(CreateInvoiceOutcome::Created(Invoice {
                    id,
                    invoice_number: data.invoice_number,
                    customer_id: data.customer_id,
                    customer: data.customer,
                    invoice_date: data.invoice_date,
                    due_date: data.due_date,
                    status: data.status,
                    subtotal: data.subtotal,
                    tax_amount: data.tax_amount,
                    discount_amount: data.discount_amount,
                    total: data.total,
                    notes: data.notes,
                    payment_terms: data.payment_terms,
                    is_recurring: data.is_recurring,
                    recurring_schedule_id: data.recurring_schedule_id,
                    created_at,
                })),
                Err(rusqlite::Error::SqliteFailure(err, Some(msg)))
                    if err.code == ErrorCode::ConstraintViolation
                        && msg.contains("invoice_number") =>
                {
                    Ok(CreateInvoiceOutcome::DuplicateNumber)
                }
                Err(e) => Err(e).context("Failed to insert invoice"),
            }
        })
        .await
    }

    async fn create_invoice_line(&self, data: &InvoiceLineInit) -> Result<InvoiceLine> {
        let data = data.clone();
        self.with_conn(move |conn| {
            let serials = serde_json::to_string(&data.serial_numbers)?;
            conn.execute(
                "INSERT INTO invoice_lines (invoice_id, item_id, description, quantity,
                    unit_price, tax_rate, discount_rate, line_total, serial_numbers)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    data.invoice_id,
                    data.item_id,
                    data.description,
                    data.quantity,
                    data.unit_price,
                    data.tax_rate,
                    data.discount_rate,
                    data.line_total,
                    serials,
                ],
            )
            .with_context(|| format!("Failed to insert line for invoice {}", data.invoice_id))?;

            Ok(InvoiceLine {
                id: conn.last_insert_rowid(),
                invoice_id: data.invoice_id,
                item_id: data.item_id,
                description: data.description,
                quantity: data.quantity,
                unit_price: data.unit_price,
                tax_rate: data.tax_rate,
                discount_rate: data.discount_rate,
                line_total: data.line_total,
                serial_numbers: data.serial_numbers,
            })
        })
        .await
    }

    async fn update_recurring_schedule(&self, id: &str, patch: &SchedulePatch) -> Result<()> {
        let id = id.to_string();
        let last = Self::format_date(&patch.last_invoice_date);
        let next = Self::format_date(&patch.next_invoice_date);
        self.with_conn(move |conn| {
            // ISO dates compare lexically in calendar order
            let changed = conn.execute(
                "UPDATE recurring_schedules SET last_invoice_date = ?1, next_invoice_date = ?2
                 WHERE id = ?3 AND next_invoice_date <= ?2",
                params![last, next, id],
            )?;
            if changed > 0 {
                return Ok(());
            }

            let current: Option<String> = conn
                .query_row(
                    "SELECT next_invoice_date FROM recurring_schedules WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            match current {
                None => bail!("Recurring schedule {} not found", id),
                Some(current) => bail!(
                    "Refusing to move next_invoice_date of schedule {} back from {} to {}",
                    id,
                    current,
                    next
                ),
            }
        })
        .await
    }

    async fn list_invoices_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
        self.with_conn(move |conn| {
            Self::query_invoices(conn, "status = ?1 ORDER BY due_date, id", status.as_str())
        })
        .await
    }

    async fn update_invoice(&self, id: &str, patch: &InvoicePatch) -> Result<()> {
        let id = id.to_string();
        let status = patch.status;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE invoices SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?;
            if changed == 0 {
                bail!("Invoice {} not found", id);
            }
            Ok(())
        })
        .await
    }

    async fn create_recurring_schedule(&self, data: &ScheduleInit) -> Result<RecurringSchedule> {
        data.validate()?;
        let template_json = data.template.to_json()?;
        let data = data.clone();

        self.with_conn(move |conn| {
            let schedule = RecurringSchedule {
                id: uuid::Uuid::new_v4().to_string(),
                customer_id: data.customer_id,
                frequency: data.frequency.as_str().to_string(),
                interval: i64::from(data.interval),
                next_invoice_date: data.next_invoice_date,
                last_invoice_date: None,
                template_json,
                payment_terms: data.payment_terms,
                is_active: true,
                created_at: Utc::now(),
            };

            conn.execute(
                "INSERT INTO recurring_schedules (id, customer_id, frequency, interval_count,
                    next_invoice_date, last_invoice_date, template, payment_terms, is_active,
                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, 1, ?8)",
                params![
                    schedule.id,
                    schedule.customer_id,
                    schedule.frequency,
                    schedule.interval,
                    Self::format_date(&schedule.next_invoice_date),
                    schedule.template_json,
                    schedule.payment_terms,
                    schedule.created_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert recurring schedule")?;

            Ok(schedule)
        })
        .await
    }

    async fn get_recurring_schedule(&self, id: &str) -> Result<Option<RecurringSchedule>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let schedule = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM recurring_schedules WHERE id = ?1",
                        SCHEDULE_COLUMNS
                    ),
                    params![id],
                    Self::row_to_schedule,
                )
                .optional()?;
            Ok(schedule)
        })
        .await
    }

    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let invoice = conn
                .query_row(
                    &format!("SELECT {} FROM invoices WHERE id = ?1", INVOICE_COLUMNS),
                    params![id],
                    Self::row_to_invoice,
                )
                .optional()?;
            Ok(invoice)
        })
        .await
    }

    async fn list_invoice_lines(&self, invoice_id: &str) -> Result<Vec<InvoiceLine>> {
        let invoice_id = invoice_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM invoice_lines WHERE invoice_id = ?1 ORDER BY id",
                LINE_COLUMNS
            ))?;
            let lines = stmt
                .query_map(params![invoice_id], Self::row_to_line)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(lines)
        })
        .await
    }
}
