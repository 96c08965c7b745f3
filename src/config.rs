// Batch configuration, validated before any analysis starts
use crate::error::ConfigError;
use crate::render::TableCommands;
use std::fs;
use std::path::{Path, PathBuf};

pub const MIN_CONCURRENCY: i64 = 1;
pub const MAX_CONCURRENCY: i64 = 50;

/// Extensions of the artifacts picked up from the scan directory.
pub const ARTIFACT_EXTENSIONS: [&str; 2] = ["exe", "dll"];

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub concurrency: i64,
    pub commands_file: PathBuf,
    pub catalog_file: PathBuf,
    pub output_dir: PathBuf,
    pub scan_dir: PathBuf,
    pub engine: String,
    pub table_commands: TableCommands,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            commands_file: PathBuf::from("kom.txt"),
            catalog_file: PathBuf::from("func.csv"),
            output_dir: PathBuf::from("log_dis"),
            scan_dir: PathBuf::from("."),
            engine: "radare2".to_string(),
            table_commands: TableCommands::default(),
        }
    }
}

impl BatchConfig {
    /// Pre-flight checks. Touches nothing on disk besides existence probes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::ConcurrencyOutOfRange(self.concurrency));
        }
        require_file("Command", &self.commands_file)?;
        require_file("Function descriptions", &self.catalog_file)?;
        Ok(())
    }

    /// Worker count; only meaningful after [`BatchConfig::validate`].
    pub fn workers(&self) -> usize {
        self.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY) as usize
    }
}

fn require_file(kind: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingFile {
            kind,
            path: path.to_path_buf(),
        })
    }
}

/// One command per line, surrounding whitespace trimmed, blank lines ignored.
pub fn load_commands(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(parse_commands(&content))
}

fn parse_commands(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
