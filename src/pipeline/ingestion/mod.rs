// Pipeline ingestion: declared source schemas and the CSV snapshot loader

pub mod loader;
pub mod schema;

// Re-export key types for external use
pub use loader::{DatasetLoader, LoadedSource};
pub use schema::{ColumnRole, ColumnSpec, ColumnType, SourceSchema};
