//! # Folio Common Library
//!
//! Shared code for the Folio personal library services including:
//! - Database schema, models and queries
//! - Versioned schema migrations and the migration safety net
//! - Durable key-value flag storage
//! - Event types (FolioEvent enum) and the EventBus
//! - Configuration loading

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
