//! Ordered byte-keyed KV store contract used by the merge tree.
//!
//! This crate defines the `Database` trait and its supporting types
//! (`Column`, `Slice`, `Batch`, cursors) plus an in-memory implementation.
//! Persistent backends live in sibling crates (`perspectivedb-store-rocksdb`)
//! so that the merge tree never depends on a concrete storage engine.

mod config;
mod db;
mod error;
mod memory;
mod slice;

pub use config::StoreConfig;
pub use db::{Batch, Column, DbIter, Direction, Operation, RangeItem};
pub use error::OpenError;
pub use memory::MemoryDB;
pub use slice::Slice;

pub use db::Database;
