//! # fdash Common Library
//!
//! Shared code for the fdash dashboard client including:
//! - Remote service request/response types
//! - Event types (DashEvent enum) and the EventBus
//! - Configuration loading
//! - SQLite-backed settings store

pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
