//! # recordkit testkit
//!
//! Test utilities for recordkit.
//!
//! This crate provides:
//! - An in-memory, programmable CRUD service (`MockService`)
//! - Fixture models (`Person`)
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use recordkit_testkit::prelude::*;
//! use recordkit_core::Recordset;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let service = Arc::new(MockService::new().seeded(sample_people()));
//! let recordset = Recordset::new(service.configuration().build().unwrap());
//!
//! recordset.refresh_data().await;
//! assert_eq!(recordset.len(), 3);
//! assert_eq!(service.calls(Verb::GetAll), 1);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mock;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::mock::*;
}

pub use fixtures::*;
pub use generators::*;
pub use mock::*;
