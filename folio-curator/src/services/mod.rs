//! Curator background services

pub mod assistant_client;
pub mod enrichment_orchestrator;
pub mod enrichment_worker;
pub mod response_parser;

pub use assistant_client::{AnswerSource, AssistantClient, AssistantError};
pub use enrichment_orchestrator::EnrichmentOrchestrator;
pub use enrichment_worker::EnrichmentWorker;
pub use response_parser::{parse_enrichment, EnrichmentResult};
