//! External analysis engine collaborator.
//!
//! The engine is driven through the r2pipe protocol: the engine is started as
//! `radare2 -q0 <file>`, writes a NUL byte once the file is loaded, and then
//! answers every `command\n` written to its stdin with the command's output
//! terminated by another NUL byte.
//!
//! Sessions are always held through a [`SessionGuard`], which closes them
//! exactly once on every exit path, unwinding included.

use crate::error::EngineError;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a session gets to exit after `q!` before it is killed.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

const CLOSE_POLL: Duration = Duration::from_millis(20);

/// Opens one analysis session per artifact.
pub trait Engine: Sync {
    type Session: EngineSession;

    fn open(&self, artifact: &Path) -> Result<Self::Session, EngineError>;
}

/// An engine context bound to exactly one artifact.
pub trait EngineSession {
    fn execute(&mut self, command: &str) -> Result<String, EngineError>;

    /// Release the engine. Calling it again after success is a no-op.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Scoped ownership of an open session.
pub struct SessionGuard<S: EngineSession> {
    session: S,
    artifact: PathBuf,
}

impl<S: EngineSession> SessionGuard<S> {
    pub fn open<E>(engine: &E, artifact: &Path) -> Result<Self, EngineError>
    where
        E: Engine<Session = S>,
    {
        let session = engine.open(artifact)?;
        debug!(artifact = %artifact.display(), "Engine session opened");
        Ok(Self {
            session,
            artifact: artifact.to_path_buf(),
        })
    }

    pub fn execute(&mut self, command: &str) -> Result<String, EngineError> {
        self.session.execute(command)
    }
}

impl<S: EngineSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        match self.session.close() {
            Ok(()) => debug!(artifact = %self.artifact.display(), "Engine session closed"),
            Err(e) => warn!(
                artifact = %self.artifact.display(),
                "Failed to close engine session: {}",
                e
            ),
        }
    }
}

/// radare2 (or any r2pipe-compatible binary) driven over stdin/stdout.
#[derive(Debug, Clone)]
pub struct R2PipeEngine {
    binary: String,
    close_grace: Duration,
}

impl R2PipeEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            close_grace: CLOSE_GRACE,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Check that the engine binary can be launched at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-v")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }
}

impl Engine for R2PipeEngine {
    type Session = R2PipeSession;

    fn open(&self, artifact: &Path) -> Result<R2PipeSession, EngineError> {
        let mut child = Command::new(&self.binary)
            .arg("-q0")
            .arg("-e")
            .arg("scr.color=0") // Plain text, no ANSI escapes
            .arg(artifact)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Open {
                artifact: artifact.to_path_buf(),
                reason: "engine pipes unavailable".to_string(),
            });
        };

        let mut session = R2PipeSession {
            child: Some(child),
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            close_grace: self.close_grace,
        };

        // Banner NUL marks a successfully loaded file
        match session.read_reply() {
            Ok(Some(_)) => Ok(session),
            Ok(None) => {
                session.kill();
                Err(EngineError::Open {
                    artifact: artifact.to_path_buf(),
                    reason: "engine exited before loading the file".to_string(),
                })
            }
            Err(e) => {
                session.kill();
                Err(EngineError::Open {
                    artifact: artifact.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

pub struct R2PipeSession {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    close_grace: Duration,
}

impl R2PipeSession {
    /// Read up to the next NUL. `None` means the engine closed its output.
    fn read_reply(&mut self) -> std::io::Result<Option<String>> {
        let mut buf = Vec::new();
        self.stdout.read_until(0, &mut buf)?;
        if buf.pop() != Some(0) {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn kill(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl EngineSession for R2PipeSession {
    fn execute(&mut self, command: &str) -> Result<String, EngineError> {
        let stdin = self.stdin.as_mut().ok_or(EngineError::Closed)?;
        // One command per line; a raw newline would desync the protocol
        let line = command.replace(['\n', '\r'], " ");
        writeln!(stdin, "{}", line)?;
        stdin.flush()?;

        self.read_reply()?
            .ok_or_else(|| EngineError::Command("engine exited while running the command".to_string()))
    }

    fn close(&mut self) -> Result<(), EngineError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(mut stdin) = self.stdin.take() {
            // The engine may already be gone; waiting below tells us how it ended
            let _ = stdin.write_all(b"q!\n").and_then(|_| stdin.flush());
        }

        let deadline = Instant::now() + self.close_grace;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!("Engine ignored quit, killing it");
                let _ = child.kill();
                break child.wait()?;
            }
            std::thread::sleep(CLOSE_POLL);
        };
        if !status.success() {
            debug!("Engine exited with {}", status);
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory engine for session and orchestrator tests.

    use super::*;
    use fxhash::{FxHashMap, FxHashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Command that makes a scripted session panic mid-run.
    pub const PANIC_COMMAND: &str = "!panic";

    #[derive(Debug, Default)]
    pub struct EngineStats {
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub open_now: AtomicUsize,
        pub peak_open: AtomicUsize,
    }

    #[derive(Debug, Default)]
    struct Script {
        outputs: FxHashMap<String, Result<String, String>>,
        unopenable: FxHashSet<String>,
        failing_close: bool,
        delay: Duration,
    }

    /// Answers commands from a fixed table, identical for every artifact.
    #[derive(Debug, Default, Clone)]
    pub struct ScriptedEngine {
        script: Arc<Script>,
        pub stats: Arc<EngineStats>,
    }

    impl ScriptedEngine {
        pub fn new() -> Self {
            Self::default()
        }

        fn script_mut(&mut self) -> &mut Script {
            Arc::get_mut(&mut self.script).expect("script is configured before use")
        }

        pub fn with_output(mut self, command: &str, output: &str) -> Self {
            self.script_mut()
                .outputs
                .insert(command.to_string(), Ok(output.to_string()));
            self
        }

        pub fn with_failure(mut self, command: &str, reason: &str) -> Self {
            self.script_mut()
                .outputs
                .insert(command.to_string(), Err(reason.to_string()));
            self
        }

        /// Artifacts (by file name) that fail to open.
        pub fn with_unopenable(mut self, file_name: &str) -> Self {
            self.script_mut().unopenable.insert(file_name.to_string());
            self
        }

        pub fn with_failing_close(mut self) -> Self {
            self.script_mut().failing_close = true;
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.script_mut().delay = delay;
            self
        }
    }

    impl Engine for ScriptedEngine {
        type Session = ScriptedSession;

        fn open(&self, artifact: &Path) -> Result<ScriptedSession, EngineError> {
            let name = artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.script.unopenable.contains(&name) {
                return Err(EngineError::Open {
                    artifact: artifact.to_path_buf(),
                    reason: "not a supported binary".to_string(),
                });
            }

            self.stats.opened.fetch_add(1, Ordering::SeqCst);
            let now = self.stats.open_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.stats.peak_open.fetch_max(now, Ordering::SeqCst);

            Ok(ScriptedSession {
                script: Arc::clone(&self.script),
                stats: Arc::clone(&self.stats),
                open: true,
            })
        }
    }

    pub struct ScriptedSession {
        script: Arc<Script>,
        stats: Arc<EngineStats>,
        open: bool,
    }

    impl EngineSession for ScriptedSession {
        fn execute(&mut self, command: &str) -> Result<String, EngineError> {
            if !self.open {
                return Err(EngineError::Closed);
            }
            if command == PANIC_COMMAND {
                panic!("scripted engine crash");
            }
            if !self.script.delay.is_zero() {
                std::thread::sleep(self.script.delay);
            }
            match self.script.outputs.get(command) {
                Some(Ok(output)) => Ok(output.clone()),
                Some(Err(reason)) => Err(EngineError::Command(reason.clone())),
                None => Ok(String::new()),
            }
        }

        fn close(&mut self) -> Result<(), EngineError> {
            if !self.open {
                return Ok(());
            }
            self.open = false;
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
            self.stats.open_now.fetch_sub(1, Ordering::SeqCst);
            if self.script.failing_close {
                return Err(EngineError::Command("close refused".to_string()));
            }
            Ok(())
        }
    }
}
