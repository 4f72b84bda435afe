//! # Tradewind Storage
//!
//! The in-memory entity store the engines run against.
//!
//! Collections hold JSON records keyed by a stable string `id` in insertion
//! order. Engines consume two contracts:
//!
//! - [`Repository`]: typed CRUD plus structural filters and grouped
//!   aggregation over one collection
//! - [`Storage`]: the collection registry with idempotent lazy registration
//!
//! Schema documents are accepted and stored opaquely; validation and index
//! maintenance belong to a future backing store, not to this crate.

pub mod aggregate;
pub mod error;
pub mod filter;
pub mod repository;
pub mod storage;

pub use aggregate::{aggregate_rows, AggregateFunction, AggregateOptions, Aggregation};
pub use error::StoreError;
pub use filter::Filter;
pub use repository::{MemoryRepository, Repository};
pub use storage::{MemoryStorage, Storage};
