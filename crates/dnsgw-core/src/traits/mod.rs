//! Core traits for the DNS gateway
//!
//! This module defines the abstract interfaces the server front depends on.
//!
//! - [`RecordUpdater`]: Apply a DNS record change via a provider API

pub mod record_updater;

pub use record_updater::{RecordUpdate, RecordUpdater, UpdateReceipt};
