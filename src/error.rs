// Error taxonomy for the batch pipeline
use std::path::PathBuf;
use thiserror::Error;

/// Pre-flight failures. The only errors allowed to stop the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Concurrency value must be between 1 and 50 (got {0})")]
    ConcurrencyOutOfRange(i64),
    #[error("{kind} file '{}' not found", .path.display())]
    MissingFile { kind: &'static str, path: PathBuf },
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid function descriptions file: {0}")]
    Catalog(#[from] CatalogError),
}

/// Descriptor catalog could not be loaded.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("required column '{0}' is missing")]
    MissingColumn(&'static str),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Failures raised by the external analysis engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to launch '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot open {}: {reason}", .artifact.display())]
    Open { artifact: PathBuf, reason: String },
    #[error("{0}")]
    Command(String),
    #[error("engine session already closed")]
    Closed,
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Missing-descriptor summary could not be written.
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}
