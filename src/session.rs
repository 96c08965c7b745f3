//! One artifact's unit of work: open an engine session, run every command in
//! order, render each result into the artifact's report, and forward
//! unresolved imports to the shared aggregator.

use crate::aggregator::MissingDescriptors;
use crate::catalog::DescriptorCatalog;
use crate::engine::{Engine, SessionGuard};
use crate::render::Renderer;
use crate::report::{report_path, ReportWriter};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One artifact plus the shared, ordered command list.
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    pub artifact: PathBuf,
    pub commands: Arc<[String]>,
}

impl AnalysisTask {
    pub fn new(artifact: PathBuf, commands: Arc<[String]>) -> Self {
        Self { artifact, commands }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub artifact: PathBuf,
    pub report_path: PathBuf,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sections written as error blocks.
    pub failed_commands: usize,
    /// Unresolved-symbol records forwarded to the aggregator.
    pub unresolved: usize,
}

impl SessionResult {
    pub fn failed(artifact: &Path, report_path: PathBuf, error: impl Into<String>) -> Self {
        Self {
            artifact: artifact.to_path_buf(),
            report_path,
            status: SessionStatus::Failed,
            error: Some(error.into()),
            failed_commands: 0,
            unresolved: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SessionStatus::Success
    }
}

/// Everything a session borrows from the batch. Shared read-only across workers,
/// except the aggregator which synchronizes internally.
pub struct SessionContext<'a, E, R> {
    pub engine: &'a E,
    pub renderer: &'a R,
    pub catalog: &'a DescriptorCatalog,
    pub missing: &'a MissingDescriptors,
    pub output_dir: &'a Path,
}

impl<E, R> Clone for SessionContext<'_, E, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, R> Copy for SessionContext<'_, E, R> {}

pub struct AnalysisSession<'a, E, R> {
    task: &'a AnalysisTask,
    ctx: SessionContext<'a, E, R>,
}

impl<'a, E: Engine, R: Renderer> AnalysisSession<'a, E, R> {
    pub fn new(task: &'a AnalysisTask, ctx: SessionContext<'a, E, R>) -> Self {
        Self { task, ctx }
    }

    pub fn run(&self) -> SessionResult {
        let artifact = self.task.artifact.as_path();
        let report_path = report_path(self.ctx.output_dir, artifact);

        // Step 1: no session, no report file
        let mut session = match SessionGuard::open(self.ctx.engine, artifact) {
            Ok(session) => session,
            Err(e) => {
                error!(artifact = %artifact.display(), "Error analyzing file: {}", e);
                return SessionResult::failed(artifact, report_path, e.to_string());
            }
        };

        // Step 2: header and full table of contents before any command runs
        let mut report = match ReportWriter::create(&report_path, artifact, &self.task.commands) {
            Ok(report) => report,
            Err(e) => {
                error!(
                    artifact = %artifact.display(),
                    "Cannot create report {}: {}",
                    report_path.display(),
                    e
                );
                return SessionResult::failed(
                    artifact,
                    report_path,
                    format!("cannot create report: {}", e),
                );
            }
        };

        let mut failed_commands = 0;
        let mut unresolved = 0;

        // Step 3: strictly in list order, one failed command never ends the run
        for (index, command) in self.task.commands.iter().enumerate() {
            let written = match session.execute(command) {
                Ok(output) => {
                    let rendered = self.ctx.renderer.render(command, &output, self.ctx.catalog);
                    if rendered.skipped_rows > 0 {
                        debug!(
                            artifact = %artifact.display(),
                            command = %command,
                            "Dropped {} malformed rows",
                            rendered.skipped_rows
                        );
                    }
                    if let Some(rows) = rendered.fragment.row_count() {
                        debug!(
                            artifact = %artifact.display(),
                            command = %command,
                            "Rendered {} table rows",
                            rows
                        );
                    }
                    unresolved += rendered.unresolved.len();
                    for missing in &rendered.unresolved {
                        self.ctx.missing.record(&missing.library, &missing.symbol);
                    }
                    report.write_fragment(index, command, &rendered.fragment)
                }
                Err(e) => {
                    warn!(
                        artifact = %artifact.display(),
                        command = %command,
                        "Command failed: {}",
                        e
                    );
                    failed_commands += 1;
                    report.write_command_error(index, command, &e)
                }
            };

            if let Err(e) = written {
                error!(
                    artifact = %artifact.display(),
                    "Failed writing report {}: {}",
                    report.path().display(),
                    e
                );
                return SessionResult {
                    failed_commands,
                    unresolved,
                    ..SessionResult::failed(
                        artifact,
                        report_path,
                        format!("report write failed: {}", e),
                    )
                };
            }
        }

        if let Err(e) = report.finish() {
            return SessionResult {
                failed_commands,
                unresolved,
                ..SessionResult::failed(artifact, report_path, format!("report write failed: {}", e))
            };
        }

        // Step 5 happens when `session` drops here
        drop(session);
        info!(
            "Results for {} saved to {}",
            artifact.display(),
            report_path.display()
        );

        SessionResult {
            artifact: artifact.to_path_buf(),
            report_path,
            status: SessionStatus::Success,
            error: None,
            failed_commands,
            unresolved,
        }
    }
}
