//! Bounded-concurrency batch scheduler.
//!
//! A dedicated rayon pool with exactly `concurrency` threads runs one
//! [`AnalysisSession`] per artifact, so at most `concurrency` engine sessions
//! are open at any time. Results flow back over a channel to the calling
//! thread, which owns progress reporting. A panic inside a session is caught
//! and turned into a failed result; nothing one artifact does can stop the
//! rest of the batch.

use crate::aggregator::{write_summary, MissingDescriptors, SUMMARY_FILE_NAME};
use crate::catalog::DescriptorCatalog;
use crate::cli_output::BatchConsole;
use crate::engine::Engine;
use crate::render::Renderer;
use crate::report::report_path;
use crate::session::{AnalysisSession, AnalysisTask, SessionContext, SessionResult};
use anyhow::{Context, Result};
use fxhash::FxHashMap;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    /// Set only when at least one unresolved symbol was written out.
    pub summary_path: Option<PathBuf>,
    pub missing_descriptors: usize,
    /// In completion order.
    pub results: Vec<SessionResult>,
}

pub struct Orchestrator<E, R> {
    engine: E,
    renderer: R,
    catalog: DescriptorCatalog,
    output_dir: PathBuf,
    missing: MissingDescriptors,
    console: BatchConsole,
}

impl<E: Engine, R: Renderer> Orchestrator<E, R> {
    pub fn new(engine: E, renderer: R, catalog: DescriptorCatalog, output_dir: PathBuf) -> Self {
        Self {
            engine,
            renderer,
            catalog,
            output_dir,
            missing: MissingDescriptors::new(),
            console: BatchConsole::quiet(),
        }
    }

    pub fn with_console(mut self, console: BatchConsole) -> Self {
        self.console = console;
        self
    }

    pub fn console(&self) -> &BatchConsole {
        &self.console
    }

    fn context(&self) -> SessionContext<'_, E, R> {
        SessionContext {
            engine: &self.engine,
            renderer: &self.renderer,
            catalog: &self.catalog,
            missing: &self.missing,
            output_dir: &self.output_dir,
        }
    }

    /// Run every task with at most `concurrency` sessions in flight.
    ///
    /// `concurrency` must already be validated to lie in `[1, 50]`.
    pub fn run_batch(&self, tasks: &[AnalysisTask], concurrency: usize) -> Result<BatchSummary> {
        let start = Instant::now();
        let total = tasks.len();
        info!(
            "Analyzing {} files with {} concurrent sessions",
            total, concurrency
        );
        warn_on_report_collisions(tasks, &self.output_dir);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("r2report-worker-{}", i))
            .build()
            .context("Failed to build worker pool")?;

        self.console.start(total);

        let mut results = Vec::with_capacity(total);
        let (tx, rx) = mpsc::channel();

        // The collecting loop runs on this thread, never on a pool worker
        pool.in_place_scope(|scope| {
            for task in tasks {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let _ = tx.send(self.run_isolated(task));
                });
            }
            drop(tx);

            for result in rx.iter() {
                results.push(result);
                let last = &results[results.len() - 1];
                self.console.artifact_done(results.len(), total, last);
            }
        });

        let processed = results.len();
        let succeeded = results.iter().filter(|r| r.is_success()).count();

        let missing = self.missing.drain();
        let summary_path = if missing.is_empty() {
            None
        } else {
            let path = self.output_dir.join(SUMMARY_FILE_NAME);
            match write_summary(&path, &missing) {
                Ok(()) => {
                    info!("Missing descriptions saved to {}", path.display());
                    Some(path)
                }
                Err(e) => {
                    error!("{}", e);
                    self.console
                        .error(&format!("Could not save missing descriptions: {}", e));
                    None
                }
            }
        };

        let elapsed = start.elapsed();
        info!(
            "Processing completed. Total files processed: {}/{} in {:.2}s",
            processed,
            total,
            elapsed.as_secs_f64()
        );

        Ok(BatchSummary {
            total,
            processed,
            succeeded,
            failed: processed - succeeded,
            elapsed,
            summary_path,
            missing_descriptors: missing.len(),
            results,
        })
    }

    fn run_isolated(&self, task: &AnalysisTask) -> SessionResult {
        let session = AnalysisSession::new(task, self.context());
        match catch_unwind(AssertUnwindSafe(|| session.run())) {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    artifact = %task.artifact.display(),
                    "Error processing file: {}",
                    reason
                );
                SessionResult::failed(
                    &task.artifact,
                    report_path(&self.output_dir, &task.artifact),
                    format!("analysis panicked: {}", reason),
                )
            }
        }
    }
}

/// Artifacts sharing a file stem would overwrite each other's report.
fn warn_on_report_collisions(tasks: &[AnalysisTask], output_dir: &Path) {
    let mut seen: FxHashMap<PathBuf, &PathBuf> = FxHashMap::default();
    for task in tasks {
        let report = report_path(output_dir, &task.artifact);
        if let Some(first) = seen.get(&report) {
            warn!(
                "{} and {} both write {}",
                first.display(),
                task.artifact.display(),
                report.display()
            );
        } else {
            seen.insert(report, &task.artifact);
        }
    }
}
