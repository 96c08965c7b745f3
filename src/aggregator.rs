// Cross-session collector of imported symbols with no catalog description
use crate::error::AggregationError;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

pub const SUMMARY_FILE_NAME: &str = "missing_descriptions.csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDescriptor {
    #[serde(rename = "Library")]
    pub library: String,
    #[serde(rename = "Function")]
    pub symbol: String,
}

impl MissingDescriptor {
    pub fn new(library: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            symbol: symbol.into(),
        }
    }
}

/// Append-only, lock-protected sequence shared by all workers.
///
/// One entry per occurrence: the same symbol seen in two artifacts is recorded twice.
#[derive(Debug, Default)]
pub struct MissingDescriptors {
    records: Mutex<Vec<MissingDescriptor>>,
}

impl MissingDescriptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, library: &str, symbol: &str) {
        self.lock().push(MissingDescriptor::new(library, symbol));
    }

    /// Take everything recorded so far, in append order.
    pub fn drain(&self) -> Vec<MissingDescriptor> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MissingDescriptor>> {
        // A panicking worker cannot leave a half-pushed tuple behind
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write the `Library,Function` summary table.
pub fn write_summary(path: &Path, records: &[MissingDescriptor]) -> Result<(), AggregationError> {
    let to_error = |source: csv::Error| AggregationError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(to_error)?;
    for record in records {
        writer.serialize(record).map_err(to_error)?;
    }
    writer.flush().map_err(|e| to_error(e.into()))?;

    Ok(())
}
