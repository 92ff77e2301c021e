// Fusion pipeline: ingestion, processing, and run summary

pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod summary;

pub use orchestrator::{FusionOutput, FusionPipeline};
