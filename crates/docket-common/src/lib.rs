//! Common types for docket
//!
//! This crate provides the structured error model shared by every docket crate.

pub mod error;

pub use error::{DocketError, DriverError, ErrorKind, ErrorMessage, Result};
