//! Shared store
//!
//! Every management-server node talks to the same store. Single-entity
//! mutation is protected by conditional updates executed inside one redb write
//! transaction; the open write transaction acts as the row lock.

mod records;
mod store;
pub mod tables;
mod txn;

pub use store::{Record, Store};
pub use txn::StoreTxn;
