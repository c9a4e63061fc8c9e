//! MarrowDB common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all MarrowDB components.

pub mod config;
pub mod error;
pub mod page;
pub mod schema;

pub use config::StorageConfig;
pub use error::{MarrowError, Result};
pub use page::{PageId, HEAP_MAGIC, INDEX_MAGIC, NODE_SIZE, PAGE_SIZE};
pub use schema::{Column, DataType, IndexDescriptor, TableSchema, Value};
