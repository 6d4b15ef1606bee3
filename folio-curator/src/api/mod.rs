//! HTTP API handlers for folio-curator

pub mod enrichment;
pub mod health;
pub mod migration;
pub mod sse;

pub use enrichment::enrichment_routes;
pub use health::health_routes;
pub use migration::migration_routes;
pub use sse::event_stream;
