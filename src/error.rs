use thiserror::Error;

use crate::domain::{AdminKey, Metric, SourceId};

/// Pipeline stage a fatal error was raised in. Used in diagnostics so the
/// caller can tell which part of the run to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Load,
    Reduce,
    Join,
    Impute,
    Normalize,
    Score,
    Aggregate,
    Publish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Configuration => "configuration",
            Stage::Load => "load",
            Stage::Reduce => "reduce",
            Stage::Join => "join",
            Stage::Impute => "impute",
            Stage::Normalize => "normalize",
            Stage::Score => "score",
            Stage::Aggregate => "aggregate",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Schema error in source '{source_id}', column '{column}': {message}")]
    Schema {
        source_id: SourceId,
        column: String,
        message: String,
    },

    #[error("Parse error in source '{source_id}', column '{column}' at line {line}: cannot read {value:?} as {expected}")]
    Parse {
        source_id: SourceId,
        column: String,
        line: u64,
        value: String,
        expected: &'static str,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Duplicate key {key} in source '{source_id}' after reduction; configure a reduction policy or filter for it")]
    DuplicateKey { source_id: SourceId, key: AdminKey },

    #[error("Imputation error: field '{field}' has no non-null values to compute a median from")]
    Imputation { field: Metric },

    #[error("Degenerate range: metric '{metric}' has min == max == {value}")]
    DegenerateRange { metric: Metric, value: f64 },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Output error: {0}")]
    Output(String),
}

impl FusionError {
    /// Stage the error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            FusionError::Schema { .. } | FusionError::Parse { .. } | FusionError::Io { .. } => Stage::Load,
            FusionError::Csv { .. } => Stage::Load,
            FusionError::Configuration(_) | FusionError::Toml(_) => Stage::Configuration,
            FusionError::DuplicateKey { .. } => Stage::Reduce,
            FusionError::Imputation { .. } => Stage::Impute,
            FusionError::DegenerateRange { .. } => Stage::Normalize,
            FusionError::Task(_) => Stage::Load,
            FusionError::Json(_) | FusionError::Output(_) => Stage::Publish,
        }
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        FusionError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<String>, source: csv::Error) -> Self {
        FusionError::Csv {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FusionError>;
