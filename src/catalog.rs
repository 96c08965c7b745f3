// Symbol name -> human readable description, loaded once per run
use crate::error::CatalogError;
use fxhash::FxHashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const FUNCTION_COLUMN: &str = "Function";
const DESCRIPTION_COLUMN: &str = "Description";

/// Read-only lookup table shared by every analysis session.
///
/// A missing key is the normal "undescribed symbol" case, not an error.
#[derive(Debug, Default, Clone)]
pub struct DescriptorCatalog {
    entries: FxHashMap<String, String>,
}

impl DescriptorCatalog {
    /// Load a catalog from a CSV file with at least `Function` and `Description` columns.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let file = File::open(path).map_err(csv::Error::from)?;
        let catalog = Self::from_reader(file)?;
        debug!(
            "Loaded {} function descriptions from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Parse catalog rows from any CSV source. Later duplicates overwrite earlier ones.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let function_idx = column_index(&headers, FUNCTION_COLUMN)?;
        let description_idx = column_index(&headers, DESCRIPTION_COLUMN)?;

        let mut entries = FxHashMap::default();
        for record in reader.records() {
            let record = record?;
            let Some(function) = record.get(function_idx) else {
                continue;
            };
            let description = record.get(description_idx).unwrap_or_default();
            entries.insert(function.to_string(), description.to_string());
        }

        Ok(Self { entries })
    }

    pub fn lookup(&self, symbol: &str) -> Option<&str> {
        self.entries.get(symbol).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DescriptorCatalog {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn column_index(headers: &csv::StringRecord, name: &'static str) -> Result<usize, CatalogError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or(CatalogError::MissingColumn(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_basic_catalog() {
        let data = "Function,Description\n\
                    CreateFileW,Creates a file\n\
                    ReadFile,\"Reads data, from a file\"\n";
        let catalog = DescriptorCatalog::from_reader(data.as_bytes()).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("CreateFileW"), Some("Creates a file"));
        assert_eq!(catalog.lookup("ReadFile"), Some("Reads data, from a file"));
        assert_eq!(catalog.lookup("WriteFile"), None);
    }

    #[test]
    fn test_extra_columns_and_order() {
        let data = "Category,Description,Function\n\
                    io,Closes a handle,CloseHandle\n";
        let catalog = DescriptorCatalog::from_reader(data.as_bytes()).unwrap();
        assert_eq!(catalog.lookup("CloseHandle"), Some("Closes a handle"));
    }

    #[test]
    fn test_later_duplicates_overwrite() {
        let data = "Function,Description\n\
                    Sleep,old text\n\
                    Sleep,new text\n";
        let catalog = DescriptorCatalog::from_reader(data.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup("Sleep"), Some("new text"));
    }

    #[test]
    fn test_missing_column_is_malformed() {
        let data = "Function,Text\nSleep,Suspends\n";
        let err = DescriptorCatalog::from_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, CatalogError::MissingColumn("Description")));

        let data = "Name,Description\nSleep,Suspends\n";
        let err = DescriptorCatalog::from_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, CatalogError::MissingColumn("Function")));
    }

    #[test]
    fn test_short_rows_are_tolerated() {
        let data = "Function,Description\nExitProcess\n";
        let catalog = DescriptorCatalog::from_reader(data.as_bytes()).unwrap();
        assert_eq!(catalog.lookup("ExitProcess"), Some(""));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("func.csv");
        std::fs::write(&path, "Function,Description\nGetProcAddress,Resolves an export\n")
            .unwrap();

        let catalog = DescriptorCatalog::load(&path).unwrap();
        assert_eq!(catalog.lookup("GetProcAddress"), Some("Resolves an export"));
        assert!(DescriptorCatalog::load(&dir.path().join("nope.csv")).is_err());
    }
}
