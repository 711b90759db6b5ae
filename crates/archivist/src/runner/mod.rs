//! Running extractor tools as child processes.
//!
//! Each tool runs in its own process group so a timeout can take down the
//! whole tree (browsers fork helpers that outlive their parent otherwise).
//! Output is drained concurrently into bounded tail buffers so a chatty tool
//! can neither fill its pipe and stall nor exhaust memory.

mod classify;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ExtractorError;

pub use classify::classify;

/// Bytes of stdout/stderr kept per stream.
pub const OUTPUT_TAIL_BYTES: usize = 64 * 1024;

/// Lines of output carried into error reports.
pub const ERROR_TAIL_LINES: usize = 10;

/// How long to wait for output pipes to close after the tool exits.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// A command to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Stream stdout to this file instead of capturing it.
    pub stdout_path: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            stdout_path: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(path.into());
        self
    }

    /// The argv as recorded in job history.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

/// What a finished (or killed) command left behind.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub tool: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl RunOutput {
    /// Last `n` non-empty lines across stderr then stdout.
    pub fn tail_lines(&self, n: usize) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .chain(self.stdout.lines())
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }

    /// Human-readable exit status.
    pub fn status_text(&self) -> String {
        if self.timed_out {
            "killed after timeout".to_string()
        } else {
            match self.exit_code {
                Some(code) => format!("exit code {}", code),
                None => "killed by signal".to_string(),
            }
        }
    }
}

/// Kills the child's process group when dropped while armed.
///
/// Covers both the timeout path and cancellation of the surrounding future.
struct ProcessGroupGuard {
    pid: Option<u32>,
    armed: bool,
}

impl ProcessGroupGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if self.armed {
            kill_process_group(self.pid);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // The child leads its own group (process_group(0)); a negative pid
    // addresses every member of it.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            "kill(-{}) failed: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

async fn read_tail<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut kept: Vec<u8> = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&chunk[..n]);
                if kept.len() > cap {
                    let excess = kept.len() - cap;
                    kept.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

/// Run a command to completion or until `timeout`, whichever comes first.
///
/// Only spawn failures are errors here; exit status is reported in the
/// [`RunOutput`] and interpreted by [`classify`].
pub async fn run_command(spec: &CommandSpec, timeout: Duration) -> Result<RunOutput, ExtractorError> {
    let tool = spec.tool_name();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match spec.stdout_path {
        Some(ref path) => {
            let file = std::fs::File::create(path).map_err(|e| {
                ExtractorError::Io(format!("cannot create {}: {}", path.display(), e))
            })?;
            cmd.stdout(Stdio::from(file));
        }
        None => {
            cmd.stdout(Stdio::piped());
        }
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExtractorError::BinaryMissing { tool: tool.clone() },
        _ => ExtractorError::Io(format!("failed to spawn {}: {}", tool, e)),
    })?;

    let mut guard = ProcessGroupGuard {
        pid: child.id(),
        armed: true,
    };
    debug!("Spawned {} (pid {:?}) in {}", tool, guard.pid, spec.cwd.display());

    let stdout_task = tokio::spawn(read_tail(child.stdout.take(), OUTPUT_TAIL_BYTES));
    let stderr_task = tokio::spawn(read_tail(child.stderr.take(), OUTPUT_TAIL_BYTES));

    let (exit_code, success, timed_out) =
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code(), status.success(), false),
            Ok(Err(e)) => {
                warn!("Failed waiting on {}: {}", tool, e);
                (None, false, false)
            }
            Err(_) => {
                warn!("{} exceeded {}s, killing process group", tool, timeout.as_secs());
                kill_process_group(guard.pid);
                let _ = child.kill().await;
                let _ = child.wait().await;
                (None, false, true)
            }
        };

    // Stragglers still holding the pipes get the group kill too.
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        (stdout, stderr)
    })
    .await;
    let (stdout, stderr) = match drained {
        Ok(pair) => {
            guard.disarm();
            pair
        }
        Err(_) => {
            debug!("{} left descendants holding its output open", tool);
            (String::new(), String::new())
        }
    };
    drop(guard);

    Ok(RunOutput {
        tool,
        exit_code,
        success,
        timed_out,
        stdout,
        stderr,
        duration: started.elapsed(),
    })
}

/// Whether a tool produced a usable artifact at `path`.
///
/// Files must be non-empty; directories must contain at least one entry.
pub fn artifact_present(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len() > 0,
        Ok(meta) if meta.is_dir() => std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
        _ => false,
    }
}
