//! # DineHub Worker Library
//!
//! Periodic maintenance for the billing engine.
//!
//! ## Modules
//!
//! - `config`: environment configuration
//! - `scheduler`: expiry and reminder sweep loop

pub mod config;
pub mod scheduler;
