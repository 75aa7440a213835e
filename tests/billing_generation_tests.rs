//! Recurring invoice generation against a real SQLite store.

mod common;

use common::*;
use rental_billing::billing::BillingError;
use rental_billing::billing_store::{
    CreateInvoiceOutcome, CustomerSnapshot, Frequency, InvoiceInit, InvoiceStatus, InvoiceStore,
};
use std::sync::Arc;

#[tokio::test]
async fn test_generates_invoice_with_lines_and_advances_schedule() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    let schedule = billing
        .add_schedule(schedule_init(
            CUSTOMER_1_ID,
            Frequency::Monthly,
            1,
            today,
            Some("Net 15"),
        ))
        .await;

    let report = billing.processor().process_recurring_invoices(today).await.unwrap();

    assert_eq!(report.due, 1);
    assert_eq!(report.generated, 1);
    assert_eq!(report.failed, 0);

    let invoices = billing
        .store
        .list_invoices_for_customer(CUSTOMER_1_ID)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 1);
    let invoice = &invoices[0];
    assert_eq!(invoice.invoice_date, today);
    assert_eq!(invoice.due_date, date(2025, 1, 30));
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert_eq!(invoice.payment_terms, "Net 15");
    assert!(invoice.is_recurring);
    assert_eq!(invoice.recurring_schedule_id.as_deref(), Some(schedule.id.as_str()));
    assert_eq!(invoice.customer.name, CUSTOMER_1_NAME);
    assert_eq!(invoice.total, 1188.0);
    assert_eq!(invoice.notes.as_deref(), Some("Thank you for your business"));
    let pattern = regex::Regex::new(INVOICE_NUMBER_PATTERN).unwrap();
    assert!(pattern.is_match(&invoice.invoice_number));
    assert!(invoice.invoice_number.starts_with("INV-20250115-"));

    let lines = billing.store.list_invoice_lines(&invoice.id).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].item_id, "excavator-3t");
    assert_eq!(lines[0].serial_numbers, vec!["EX-0042"]);
    assert_eq!(lines[1].discount_rate, 0.1);
    assert!(lines[1].serial_numbers.is_empty());

    let advanced = billing.schedule(&schedule.id).await;
    assert_eq!(advanced.last_invoice_date, Some(today));
    assert_eq!(advanced.next_invoice_date, date(2025, 2, 15));
}

#[tokio::test]
async fn test_second_run_same_day_generates_nothing() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;
    let processor = billing.processor();

    processor.process_recurring_invoices(today).await.unwrap();
    let second = processor.process_recurring_invoices(today).await.unwrap();

    assert_eq!(second.due, 0);
    assert_eq!(second.generated, 0);
    let invoices = billing
        .store
        .list_invoices_for_customer(CUSTOMER_1_ID)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 1);
}

#[tokio::test]
async fn test_overdue_schedule_catches_up_one_period_per_run() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    let schedule = billing
        .add_schedule(schedule_init(
            CUSTOMER_1_ID,
            Frequency::Monthly,
            1,
            date(2024, 10, 15),
            None,
        ))
        .await;
    let processor = billing.processor();

    processor.process_recurring_invoices(today).await.unwrap();
    let after_first = billing.schedule(&schedule.id).await;
    assert_eq!(after_first.next_invoice_date, date(2024, 11, 15));

    processor.process_recurring_invoices(today).await.unwrap();
    let invoices = billing
        .store
        .list_invoices_for_customer(CUSTOMER_1_ID)
        .await
        .unwrap();
    let dates: Vec<_> = invoices.iter().map(|i| i.invoice_date).collect();
    assert_eq!(dates, vec![date(2024, 10, 15), date(2024, 11, 15)]);
}

#[tokio::test]
async fn test_lookahead_window_is_inclusive() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    let inside = billing
        .add_schedule(schedule_init(
            CUSTOMER_1_ID,
            Frequency::Monthly,
            1,
            date(2025, 1, 21),
            None,
        ))
        .await;
    let outside = billing
        .add_schedule(schedule_init(
            CUSTOMER_2_ID,
            Frequency::Monthly,
            1,
            date(2025, 1, 22),
            None,
        ))
        .await;

    let report = billing.processor().process_recurring_invoices(today).await.unwrap();

    assert_eq!(report.due, 1);
    assert_eq!(report.generated, 1);
    assert_eq!(
        billing.schedule(&inside.id).await.next_invoice_date,
        date(2025, 2, 21)
    );
    assert_eq!(
        billing.schedule(&outside.id).await.next_invoice_date,
        date(2025, 1, 22)
    );
    assert!(billing
        .store
        .list_invoices_for_customer(CUSTOMER_2_ID)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_inactive_schedule_is_skipped() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    let schedule = billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;
    billing.deactivate_schedule(&schedule.id);

    let report = billing.processor().process_recurring_invoices(today).await.unwrap();

    assert_eq!(report.due, 0);
    assert!(billing
        .store
        .list_invoices_for_customer(CUSTOMER_1_ID)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_month_end_dates_clamp() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 31);
    let monthly = billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;
    let quarterly = billing
        .add_schedule(schedule_init(CUSTOMER_2_ID, Frequency::Quarterly, 2, today, None))
        .await;
    let yearly = billing
        .add_schedule(schedule_init(
            "cust-leap",
            Frequency::Yearly,
            1,
            date(2024, 2, 29),
            None,
        ))
        .await;

    let report = billing.processor().process_recurring_invoices(today).await.unwrap();

    assert_eq!(report.generated, 3);
    assert_eq!(
        billing.schedule(&monthly.id).await.next_invoice_date,
        date(2025, 2, 28)
    );
    assert_eq!(
        billing.schedule(&quarterly.id).await.next_invoice_date,
        date(2025, 7, 31)
    );
    assert_eq!(
        billing.schedule(&yearly.id).await.next_invoice_date,
        date(2025, 2, 28)
    );
}

#[tokio::test]
async fn test_payment_terms_drive_due_date() {
    let billing = TestBilling::new();
    let today = date(2025, 3, 1);
    billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;
    billing
        .add_schedule(schedule_init(
            CUSTOMER_2_ID,
            Frequency::Monthly,
            1,
            today,
            Some("Due on receipt"),
        ))
        .await;
    billing
        .add_schedule(schedule_init(
            "cust-net7",
            Frequency::Monthly,
            1,
            today,
            Some("net 7"),
        ))
        .await;

    billing.processor().process_recurring_invoices(today).await.unwrap();

    let defaulted = &billing
        .store
        .list_invoices_for_customer(CUSTOMER_1_ID)
        .await
        .unwrap()[0];
    assert_eq!(defaulted.payment_terms, "Net 30");
    assert_eq!(defaulted.due_date, date(2025, 3, 31));

    let unreadable = &billing
        .store
        .list_invoices_for_customer(CUSTOMER_2_ID)
        .await
        .unwrap()[0];
    assert_eq!(unreadable.payment_terms, "Due on receipt");
    assert_eq!(unreadable.due_date, date(2025, 3, 31));

    let net7 = &billing
        .store
        .list_invoices_for_customer("cust-net7")
        .await
        .unwrap()[0];
    assert_eq!(net7.due_date, date(2025, 3, 8));
}

#[tokio::test]
async fn test_existing_invoice_advances_schedule_without_duplicate() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    let schedule = billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;

    // Invoice written by an earlier run that crashed before advancing
    let outcome = billing
        .store
        .create_invoice(&InvoiceInit {
            invoice_number: "INV-20250115-001".to_string(),
            customer_id: CUSTOMER_1_ID.to_string(),
            customer: CustomerSnapshot {
                name: CUSTOMER_1_NAME.to_string(),
                ..Default::default()
            },
            invoice_date: today,
            due_date: date(2025, 2, 14),
            status: InvoiceStatus::Pending,
            subtotal: 1000.0,
            tax_amount: 198.0,
            discount_amount: 10.0,
            total: 1188.0,
            notes: None,
            payment_terms: "Net 30".to_string(),
            is_recurring: true,
            recurring_schedule_id: Some(schedule.id.clone()),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, CreateInvoiceOutcome::Created(_)));

    let report = billing.processor().process_recurring_invoices(today).await.unwrap();

    assert_eq!(report.generated, 0);
    assert_eq!(report.already_generated, 1);
    let invoices = billing
        .store
        .list_invoices_for_customer(CUSTOMER_1_ID)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].invoice_number, "INV-20250115-001");
    let advanced = billing.schedule(&schedule.id).await;
    assert_eq!(advanced.next_invoice_date, date(2025, 2, 15));
    assert_eq!(advanced.last_invoice_date, Some(today));
}

#[tokio::test]
async fn test_bad_schedule_does_not_block_others() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    let weekly = billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;
    let broken_template = billing
        .add_schedule(schedule_init(CUSTOMER_2_ID, Frequency::Monthly, 1, today, None))
        .await;
    let healthy = billing
        .add_schedule(schedule_init("cust-ok", Frequency::Monthly, 1, today, None))
        .await;
    billing.corrupt_schedule(&weekly.id, "frequency", "weekly");
    billing.corrupt_schedule(&broken_template.id, "template", "{\"items\": 3}");

    let report = billing.processor().process_recurring_invoices(today).await.unwrap();

    assert_eq!(report.due, 3);
    assert_eq!(report.generated, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(billing.schedule(&weekly.id).await.next_invoice_date, today);
    assert_eq!(
        billing.schedule(&broken_template.id).await.next_invoice_date,
        today
    );
    assert_eq!(
        billing.schedule(&healthy.id).await.next_invoice_date,
        date(2025, 2, 15)
    );
    assert!(billing
        .store
        .list_invoices_for_customer(CUSTOMER_1_ID)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_invalid_stored_interval_fails_with_stored_value() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    let broken = billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;
    billing.corrupt_schedule(&broken.id, "interval_count", "-3");

    let report = billing.processor().process_recurring_invoices(today).await.unwrap();

    assert_eq!(report.failed, 1);
    let stored = billing.schedule(&broken.id).await;
    assert_eq!(stored.next_invoice_date, today);
    assert!(matches!(stored.interval(), Err(BillingError::InvalidInterval(-3))));
}

#[tokio::test]
async fn test_number_collision_draws_new_number() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;
    billing
        .add_schedule(schedule_init(CUSTOMER_2_ID, Frequency::Monthly, 1, today, None))
        .await;
    let numbering = FixedNumbering::new(&["INV-20250115-001", "INV-20250115-001", "INV-20250115-002"]);
    let processor = billing.processor().with_numbering(numbering);

    let report = processor.process_recurring_invoices(today).await.unwrap();

    assert_eq!(report.generated, 2);
    let mut numbers = Vec::new();
    for customer in [CUSTOMER_1_ID, CUSTOMER_2_ID] {
        for invoice in billing.store.list_invoices_for_customer(customer).await.unwrap() {
            numbers.push(invoice.invoice_number);
        }
    }
    numbers.sort();
    assert_eq!(numbers, vec!["INV-20250115-001", "INV-20250115-002"]);
}

#[tokio::test]
async fn test_exhausted_number_attempts_fail_only_that_schedule() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    let schedule = billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;
    billing
        .store
        .create_invoice(&InvoiceInit {
            invoice_number: "INV-20250115-777".to_string(),
            customer_id: CUSTOMER_2_ID.to_string(),
            customer: CustomerSnapshot {
                name: CUSTOMER_2_NAME.to_string(),
                ..Default::default()
            },
            invoice_date: today,
            due_date: today,
            status: InvoiceStatus::Pending,
            subtotal: 10.0,
            tax_amount: 0.0,
            discount_amount: 0.0,
            total: 10.0,
            notes: None,
            payment_terms: "Net 0".to_string(),
            is_recurring: false,
            recurring_schedule_id: None,
        })
        .await
        .unwrap();

    let stuck = billing
        .processor()
        .with_numbering(FixedNumbering::new(&["INV-20250115-777"]));
    let report = stuck.process_recurring_invoices(today).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(billing.schedule(&schedule.id).await.next_invoice_date, today);

    // The schedule is still due and succeeds once numbers are free
    let report = billing.processor().process_recurring_invoices(today).await.unwrap();
    assert_eq!(report.generated, 1);
}

#[tokio::test]
async fn test_duplicate_number_error_names_last_candidate() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;
    billing
        .add_schedule(schedule_init(CUSTOMER_2_ID, Frequency::Monthly, 1, today, None))
        .await;

    let processor = billing
        .processor()
        .with_numbering(FixedNumbering::new(&["INV-20250115-500"]));
    let report = processor.process_recurring_invoices(today).await.unwrap();

    // First schedule takes the only number, the second cannot get one
    assert_eq!(report.generated, 1);
    assert_eq!(report.failed, 1);

    let error = BillingError::DuplicateInvoiceNumber("INV-20250115-500".to_string());
    assert_eq!(error.kind(), "duplicate_invoice_number");
    assert!(error.to_string().contains("INV-20250115-500"));
}

#[tokio::test]
async fn test_cancelled_processor_leaves_schedules_due() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    let schedule = billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Monthly, 1, today, None))
        .await;
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let processor = billing.processor().with_cancellation(token);

    let report = processor.process_recurring_invoices(today).await.unwrap();

    assert_eq!(report.generated, 0);
    assert_eq!(billing.schedule(&schedule.id).await.next_invoice_date, today);
}

#[tokio::test]
async fn test_processor_works_through_trait_object() {
    let billing = TestBilling::new();
    let today = date(2025, 1, 15);
    billing
        .add_schedule(schedule_init(CUSTOMER_1_ID, Frequency::Yearly, 1, today, None))
        .await;
    let store: Arc<dyn InvoiceStore> = billing.store.clone();
    let processor = rental_billing::BillingProcessor::new(store, test_settings());

    let report = processor.process_recurring_invoices(today).await.unwrap();
    assert_eq!(report.generated, 1);
}
