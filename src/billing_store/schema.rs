//! SQLite schema definitions for the billing database.
//!
//! Dates are stored as ISO `YYYY-MM-DD` text so that lexical comparison in SQL
//! matches calendar order.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

// =============================================================================
// Version 1 - Schedules, invoices and invoice lines
// =============================================================================

const RECURRING_SCHEDULES_TABLE_V1: Table = Table {
    name: "recurring_schedules",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("customer_id", &SqlType::Text, non_null = true),
        sqlite_column!("frequency", &SqlType::Text, non_null = true),
        sqlite_column!("interval_count", &SqlType::Integer, non_null = true),
        sqlite_column!("next_invoice_date", &SqlType::Text, non_null = true),
        sqlite_column!("last_invoice_date", &SqlType::Text),
        sqlite_column!("template", &SqlType::Text, non_null = true), // JSON InvoiceTemplate
        sqlite_column!("payment_terms", &SqlType::Text),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_recurring_schedules_active_next", "is_active, next_invoice_date"),
        ("idx_recurring_schedules_customer", "customer_id"),
    ],
    unique_constraints: &[],
};

const INVOICES_TABLE_V1: Table = Table {
    name: "invoices",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("invoice_number", &SqlType::Text, non_null = true),
        sqlite_column!("customer_id", &SqlType::Text, non_null = true),
        sqlite_column!("customer_name", &SqlType::Text, non_null = true),
        sqlite_column!("customer_email", &SqlType::Text),
        sqlite_column!("customer_phone", &SqlType::Text),
        sqlite_column!("customer_address", &SqlType::Text),
        sqlite_column!("invoice_date", &SqlType::Text, non_null = true),
        sqlite_column!("due_date", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("subtotal", &SqlType::Real, non_null = true),
        sqlite_column!("tax_amount", &SqlType::Real, non_null = true),
        sqlite_column!("discount_amount", &SqlType::Real, non_null = true),
        sqlite_column!("total", &SqlType::Real, non_null = true),
        sqlite_column!("notes", &SqlType::Text),
        sqlite_column!("payment_terms", &SqlType::Text, non_null = true),
        sqlite_column!(
            "is_recurring",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("recurring_schedule_id", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_invoices_customer", "customer_id"),
        ("idx_invoices_status_due", "status, due_date"),
    ],
    // NULL schedule ids compare distinct, so one-off invoices are unaffected.
    unique_constraints: &[&["invoice_number"], &["recurring_schedule_id", "invoice_date"]],
};

const INVOICE_LINES_INVOICE_FK: ForeignKey = ForeignKey {
    foreign_table: "invoices",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const INVOICE_LINES_TABLE_V1: Table = Table {
    name: "invoice_lines",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "invoice_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&INVOICE_LINES_INVOICE_FK)
        ),
        sqlite_column!("item_id", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text, non_null = true),
        sqlite_column!("quantity", &SqlType::Real, non_null = true),
        sqlite_column!("unit_price", &SqlType::Real, non_null = true),
        sqlite_column!("tax_rate", &SqlType::Real, non_null = true),
        sqlite_column!("discount_rate", &SqlType::Real, non_null = true),
        sqlite_column!("line_total", &SqlType::Real, non_null = true),
        sqlite_column!("serial_numbers", &SqlType::Text, non_null = true), // JSON array
    ],
    indices: &[("idx_invoice_lines_invoice", "invoice_id")],
    unique_constraints: &[],
};

/// All versioned schemas for the billing database.
///
/// Version 1: recurring schedules, invoices, invoice lines
pub const BILLING_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        RECURRING_SCHEDULES_TABLE_V1,
        INVOICES_TABLE_V1,
        INVOICE_LINES_TABLE_V1,
    ],
    migration: None,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn insert_invoice(conn: &Connection, id: &str, number: &str, schedule: Option<&str>, date: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO invoices (id, invoice_number, customer_id, customer_name, invoice_date,
                due_date, status, subtotal, tax_amount, discount_amount, total, payment_terms,
                recurring_schedule_id, created_at)
             VALUES (?1, ?2, 'c1', 'Customer', ?3, ?3, 'pending', 0, 0, 0, 0, 'Net 30', ?4,
                '2025-01-01T00:00:00Z')",
            rusqlite::params![id, number, date, schedule],
        )
    }

    #[test]
    fn test_v1_schema_creates_successfully() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = BILLING_VERSIONED_SCHEMAS.last().unwrap();
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }

    #[test]
    fn test_dedup_key_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        BILLING_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        insert_invoice(&conn, "a", "INV-1", Some("s1"), "2025-02-01").unwrap();
        assert!(insert_invoice(&conn, "b", "INV-2", Some("s1"), "2025-02-01").is_err());
        // Same schedule, different date is fine
        insert_invoice(&conn, "c", "INV-3", Some("s1"), "2025-03-01").unwrap();
    }

    #[test]
    fn test_one_off_invoices_share_dates() {
        let conn = Connection::open_in_memory().unwrap();
        BILLING_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        insert_invoice(&conn, "a", "INV-1", None, "2025-02-01").unwrap();
        insert_invoice(&conn, "b", "INV-2", None, "2025-02-01").unwrap();
    }

    #[test]
    fn test_invoice_number_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        BILLING_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        insert_invoice(&conn, "a", "INV-1", None, "2025-02-01").unwrap();
        assert!(insert_invoice(&conn, "b", "INV-1", None, "2025-02-02").is_err());
    }
}
