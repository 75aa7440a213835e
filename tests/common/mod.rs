//! Common test infrastructure
//!
//! Billing tests build a [`TestBilling`] around a fresh on-disk store and
//! drive the processor with fixed dates. Store faults are injected with
//! [`FaultyStore`], invoice numbers are pinned with [`FixedNumbering`].

#![allow(dead_code)]

mod constants;
mod fixtures;
mod stores;

#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{date, schedule_init, template, test_settings, TestBilling};
#[allow(unused_imports)]
pub use stores::{FaultyStore, FixedNumbering};
