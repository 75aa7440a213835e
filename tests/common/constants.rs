pub const CUSTOMER_1_ID: &str = "cust-acme";
pub const CUSTOMER_1_NAME: &str = "Acme Construction";

pub const CUSTOMER_2_ID: &str = "cust-bolt";
pub const CUSTOMER_2_NAME: &str = "Bolt Events";

/// Matches numbers produced by the default numbering.
pub const INVOICE_NUMBER_PATTERN: &str = r"^INV-\d{8}-\d{3}$";

/// Store call limit used by tests; slow store calls sleep well past it.
pub const TEST_STORE_TIMEOUT_MS: u64 = 500;
