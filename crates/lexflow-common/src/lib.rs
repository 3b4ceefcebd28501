//! Lexflow Common - Shared types and utilities
//!
//! This crate provides the identifiers, enumerations, configuration and
//! error type shared by every Lexflow component.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
