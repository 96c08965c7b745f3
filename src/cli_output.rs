// Batch console output: per-artifact progress and the final summary
use crate::orchestrator::BatchSummary;
use crate::session::SessionResult;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, IsTerminal};
use std::sync::OnceLock;
use std::time::Duration;

/// Env var forcing machine-readable output.
pub const JSON_ENV_VAR: &str = "R2REPORT_JSON";

/// Output mode for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Colors, progress bar, summary table
    Human,
    /// One JSON object per line
    Json,
    /// Plain text without colors (for pipes/logs)
    Plain,
}

impl OutputMode {
    /// Auto-detect output mode based on environment
    pub fn auto() -> Self {
        if std::env::var(JSON_ENV_VAR).is_ok() {
            Self::Json
        } else if !io::stdout().is_terminal() {
            Self::Plain
        } else {
            Self::Human
        }
    }
}

/// Structured progress event (JSON mode)
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate<'a> {
    pub stage: &'static str,
    pub current: usize,
    pub total: usize,
    pub percentage: f64,
    pub result: &'a SessionResult,
}

/// Progress sink for one batch. Only the orchestrator's collecting thread calls it.
pub struct BatchConsole {
    mode: OutputMode,
    quiet: bool,
    bar: OnceLock<ProgressBar>,
}

impl BatchConsole {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            quiet: false,
            bar: OnceLock::new(),
        }
    }

    pub fn auto() -> Self {
        Self::new(OutputMode::auto())
    }

    /// Console that prints nothing.
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::new(OutputMode::Plain)
        }
    }

    /// Called once the artifact list is known.
    pub fn start(&self, total: usize) {
        if self.quiet || self.mode != OutputMode::Human || total == 0 {
            return;
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed}] {bar:40.cyan/blue} {pos}/{len} files {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(200));
        let _ = self.bar.set(pb);
    }

    /// One line per completed artifact.
    pub fn artifact_done(&self, current: usize, total: usize, result: &SessionResult) {
        if self.quiet {
            return;
        }
        let line = format!(
            "Processed {}/{} files: {}",
            current,
            total,
            result.artifact.display()
        );

        match self.mode {
            OutputMode::Human => {
                let marker = if result.is_success() {
                    "✓".green()
                } else {
                    "✗".red()
                };
                let mut text = format!("  {} {}", marker, line);
                if let Some(error) = &result.error {
                    text.push_str(&format!(" ({})", error.as_str().red()));
                }
                self.emit_line(&text);
                if let Some(pb) = self.bar.get() {
                    pb.inc(1);
                }
            }
            OutputMode::Plain => {
                let status = if result.is_success() { "OK" } else { "FAILED" };
                self.emit_line(&format!("  [{}] {}", status, line));
            }
            OutputMode::Json => {
                let update = ProgressUpdate {
                    stage: "analyze",
                    current,
                    total,
                    percentage: (current as f64 / total.max(1) as f64 * 100.0).min(100.0),
                    result,
                };
                if let Ok(json) = serde_json::to_string(&update) {
                    println!("{}", json);
                }
            }
        }
    }

    /// Print through the progress bar when one is active so lines don't tear it.
    fn emit_line(&self, text: &str) {
        match self.bar.get() {
            Some(pb) => pb.println(text),
            None => println!("{}", text),
        }
    }

    pub fn error(&self, message: &str) {
        if self.quiet {
            return;
        }
        match self.mode {
            OutputMode::Human => eprintln!("  {} {}", "✗".red(), message),
            OutputMode::Plain => eprintln!("  [ERROR] {}", message),
            OutputMode::Json => eprintln!("{}", serde_json::json!({ "error": message })),
        }
    }

    /// Final counts, elapsed time, summary file, failures.
    pub fn finish(&self, summary: &BatchSummary) {
        if let Some(pb) = self.bar.get() {
            pb.finish_and_clear();
        }
        if self.quiet {
            return;
        }

        match self.mode {
            OutputMode::Json => {
                if let Ok(json) = serde_json::to_string_pretty(summary) {
                    println!("{}", json);
                }
            }
            OutputMode::Plain => {
                if let Some(path) = &summary.summary_path {
                    println!("Missing descriptions saved to {}", path.display());
                }
                println!(
                    "Processing completed. Total files processed: {}/{}",
                    summary.processed, summary.total
                );
                println!("Time elapsed: {:.2} seconds", summary.elapsed.as_secs_f64());
            }
            OutputMode::Human => {
                println!();
                println!("{}", "Batch Summary".cyan().bold());
                println!("{}", "═".repeat(13).cyan());
                if let Some(path) = &summary.summary_path {
                    println!(
                        "  Missing descriptions saved to {}",
                        path.display().to_string().yellow()
                    );
                }
                println!(
                    "  Processing completed. Total files processed: {}/{}",
                    summary.processed.to_string().green(),
                    summary.total
                );
                println!(
                    "  Time elapsed: {:.2} seconds ({})",
                    summary.elapsed.as_secs_f64(),
                    format_duration(summary.elapsed.as_secs())
                );
                if summary.failed > 0 {
                    println!("{}", failure_table(summary));
                }
            }
        }
    }
}

fn failure_table(summary: &BatchSummary) -> comfy_table::Table {
    use comfy_table::presets::UTF8_FULL;
    use comfy_table::Table;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Failed artifact", "Error"]);

    for result in summary.results.iter().filter(|r| !r.is_success()) {
        table.add_row(vec![
            result.artifact.display().to_string(),
            result.error.clone().unwrap_or_default(),
        ]);
    }
    table
}

/// Format duration in human-readable form
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use std::path::PathBuf;

    fn failed_result() -> SessionResult {
        SessionResult::failed(
            &PathBuf::from("bad.dll"),
            PathBuf::from("log_dis/bad.html"),
            "cannot open bad.dll",
        )
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3661), "1h 1m");
    }

    #[test]
    fn test_progress_update_json() {
        let result = failed_result();
        let update = ProgressUpdate {
            stage: "analyze",
            current: 1,
            total: 4,
            percentage: 25.0,
            result: &result,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["current"], 1);
        assert_eq!(json["result"]["status"], "failed");
        assert_eq!(json["result"]["error"], "cannot open bad.dll");
    }

    #[test]
    fn test_failure_table_lists_only_failures() {
        let mut ok = failed_result();
        ok.artifact = PathBuf::from("good.exe");
        ok.status = SessionStatus::Success;
        ok.error = None;

        let summary = BatchSummary {
            total: 2,
            processed: 2,
            succeeded: 1,
            failed: 1,
            elapsed: Duration::from_millis(1500),
            summary_path: None,
            missing_descriptors: 0,
            results: vec![ok, failed_result()],
        };

        let rendered = failure_table(&summary).to_string();
        assert!(rendered.contains("bad.dll"));
        assert!(!rendered.contains("good.exe"));
    }

    #[test]
    fn test_quiet_console_never_starts_a_bar() {
        let console = BatchConsole::quiet();
        console.start(3);
        console.artifact_done(1, 3, &failed_result());
        assert!(console.bar.get().is_none());
        assert_eq!(console.mode, OutputMode::Plain);
    }
}
