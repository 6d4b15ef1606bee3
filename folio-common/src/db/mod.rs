//! Database schema, models and queries

pub mod flags;
pub mod init;
pub mod migrations;
pub mod models;
pub mod safety;

pub use flags::FlagStore;
pub use init::*;
pub use migrations::*;
pub use models::*;
pub use safety::{MigrationGuard, MigrationSnapshot, MigrationVerdict};
