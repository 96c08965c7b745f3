use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Finds candidate artifacts directly inside one directory.
pub struct ArtifactDiscovery {
    base_dir: PathBuf,
    extensions: Vec<String>,
}

impl ArtifactDiscovery {
    pub fn new(base_dir: PathBuf, extensions: &[&str]) -> Self {
        Self {
            base_dir,
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    /// Regular files whose extension matches, sorted by path. Not recursive.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        info!("Scanning for artifacts in: {}", self.base_dir.display());

        let mut artifacts = Vec::new();
        for entry in WalkDir::new(&self.base_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
        {
            let entry = match entry {
                Ok(entry) => entry,
                // Only the scan root itself is fatal
                Err(e) if e.depth() == 0 => {
                    return Err(e)
                        .with_context(|| format!("Failed to read {}", self.base_dir.display()));
                }
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if self.matches(entry.path()) {
                debug!("Found: {}", entry.path().display());
                artifacts.push(entry.into_path());
            }
        }

        artifacts.sort();
        Ok(artifacts)
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
    }
}
