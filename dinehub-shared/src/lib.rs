//! # DineHub Shared Library
//!
//! Subscription and billing engine shared by the DineHub API server and the
//! sweep worker.
//!
//! ## Module Organization
//!
//! - `billing`: plan catalog, subscription state machine, payment and
//!   exchange-rate ledgers, business-owner orchestration
//! - `credentials`: owner credential preparation and password hashing
//! - `db`: connection pool and migrations
//! - `error`: engine error taxonomy
//! - `models`: database models and queries
//! - `notify`: owner notifications
//! - `quota`: plan usage-cap enforcement

pub mod billing;
pub mod credentials;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod quota;

/// Current version of the DineHub shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
