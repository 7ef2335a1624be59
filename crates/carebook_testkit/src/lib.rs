//! # Carebook Testkit
//!
//! Test utilities for the Carebook sync engine.
//!
//! This crate provides:
//! - An in-memory remote catalog that records every request
//! - A sample clinic catalog fixture and seeding helpers
//! - Property-based edit generators using proptest
//! - Log output setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use carebook_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn saves_a_new_service_item() {
//!     init_tracing();
//!     let catalog = Arc::new(sample_catalog());
//!     let mut session = catalog.full_session();
//!     // ... stage edits, then run a Synchronizer pass
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::init_tracing;
    pub use crate::remote::{InMemoryCatalog, RemoteCall};
}

pub use fixtures::{sample_catalog, CatalogFixture};
pub use logging::init_tracing;
pub use remote::{InMemoryCatalog, RemoteCall};
