//! Lexflow Storage - persistence for rules, messages and approval batches
//!
//! Every repository is a trait with a PostgreSQL implementation (`Db*`) and
//! an in-memory implementation (`Memory*`) sharing the same conditional
//! update semantics.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::{Database, DatabasePool};
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
