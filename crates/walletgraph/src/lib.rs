pub mod api;
pub mod cache;
pub mod deadline;
pub mod entity;
pub mod error;
pub mod graph_builder;
pub mod helius;
pub mod ingestion;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod token_metadata;
pub mod types;
pub mod validation;
