//! Local interpreter sandbox

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use kiln_core::config::SandboxSettings;
use kiln_core::{ExitStatus, KilnError, Result, SandboxResult};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// How long pipes may stay open once the program itself has exited
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Runs generated code with a local interpreter inside a scratch directory
///
/// The child gets an empty environment apart from `PATH` and a `HOME`
/// pointing at the scratch directory, which is removed afterwards. It runs
/// as the leader of a fresh process group; anything it leaves running when
/// it exits, times out or is cancelled is killed with the group.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    interpreter: String,
    extension: String,
    max_output_bytes: usize,
    memory_limit_mb: Option<u64>,
}

impl ProcessSandbox {
    pub fn new(interpreter: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            extension: extension.into(),
            max_output_bytes: 64 * 1024,
            memory_limit_mb: None,
        }
    }

    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            interpreter: settings.interpreter.clone(),
            extension: settings.extension.trim_start_matches('.').to_string(),
            max_output_bytes: settings.max_output_bytes,
            memory_limit_mb: settings.memory_limit_mb,
        }
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn with_memory_limit_mb(mut self, memory_limit_mb: u64) -> Self {
        self.memory_limit_mb = Some(memory_limit_mb);
        self
    }

    fn command(&self, source_file: &str) -> Command {
        let mut cmd = match self.memory_limit_mb {
            Some(limit_mb) => {
                // ulimit only exists as a shell builtin
                let mut cmd = Command::new("sh");
                cmd.arg("-c")
                    .arg(r#"ulimit -v "$1" && exec "$2" "$3""#)
                    .arg("sh")
                    .arg((limit_mb * 1024).to_string())
                    .arg(&self.interpreter)
                    .arg(source_file);
                cmd
            }
            None => {
                let mut cmd = Command::new(&self.interpreter);
                cmd.arg(source_file);
                cmd
            }
        };

        cmd.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// Output kept from one of the child's pipes
struct Captured {
    kept: Vec<u8>,
    cap: usize,
    truncated: bool,
    error: Option<std::io::Error>,
}

impl Captured {
    fn new(cap: usize) -> Self {
        Self {
            kept: Vec::new(),
            cap,
            truncated: false,
            error: None,
        }
    }

    fn into_text(self, stream: &str) -> String {
        if let Some(e) = self.error {
            if self.kept.is_empty() {
                return format!("<{} unreadable: {}>", stream, e);
            }
        }
        let mut text = String::from_utf8_lossy(&self.kept).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Drain `reader` into `sink`, keeping at most the sink's cap
///
/// The pipe keeps being read past the cap so a chatty child never blocks
/// on a full pipe. Whatever was read survives if this future is dropped.
async fn read_capped<R: AsyncRead + Unpin>(reader: &mut R, sink: &mut Captured) {
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                sink.error = Some(e);
                return;
            }
        };
        let room = sink.cap.saturating_sub(sink.kept.len());
        if n > room {
            sink.truncated = true;
        }
        sink.kept.extend_from_slice(&buf[..n.min(room)]);
    }
}

/// The process group a sandboxed child leads
///
/// Every process the program starts stays in the group unless it moves
/// itself out. The whole group is killed when this is dropped, so nothing
/// outlives the execution, cancelled or not.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    /// Kill the group once; later calls do nothing
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                // ESRCH: every member is already gone
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
            }
        }
        #[cfg(not(unix))]
        debug!("Process groups unsupported, leaving {} to kill_on_drop", pgid);
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn map_exit(status: std::process::ExitStatus) -> ExitStatus {
    match status.code() {
        Some(0) => ExitStatus::Success,
        Some(_) => ExitStatus::Error,
        // No exit code means the child was terminated by a signal
        None => ExitStatus::Crash,
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    #[instrument(skip(self, code), fields(interpreter = %self.interpreter, bytes = code.len()))]
    async fn execute(&self, code: &str, timeout: Duration) -> Result<SandboxResult> {
        let workdir = tempfile::Builder::new()
            .prefix("kiln-sandbox-")
            .tempdir()
            .map_err(|e| KilnError::SandboxUnavailable(format!("No scratch directory: {}", e)))?;

        let source_file = format!("main.{}", self.extension);
        tokio::fs::write(workdir.path().join(&source_file), code)
            .await
            .map_err(|e| KilnError::SandboxUnavailable(format!("Cannot write source: {}", e)))?;

        let started = Instant::now();
        let mut child = self
            .command(&source_file)
            .current_dir(workdir.path())
            .env("HOME", workdir.path())
            .spawn()
            .map_err(|e| {
                KilnError::SandboxUnavailable(format!(
                    "Failed to start {}: {}",
                    self.interpreter, e
                ))
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| KilnError::SandboxUnavailable("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| KilnError::SandboxUnavailable("stderr not captured".to_string()))?;

        // Leader of its own group, so the group id is the child's pid
        let mut group = ProcessGroup { pgid: child.id() };

        let mut out = Captured::new(self.max_output_bytes);
        let mut err = Captured::new(self.max_output_bytes);
        let (waited, elapsed_ms) = {
            let drain = async {
                tokio::join!(
                    read_capped(&mut stdout, &mut out),
                    read_capped(&mut stderr, &mut err)
                )
            };
            tokio::pin!(drain);
            let mut drained = false;

            let waited = tokio::time::timeout(timeout, async {
                loop {
                    tokio::select! {
                        status = child.wait() => break status,
                        _ = &mut drain, if !drained => drained = true,
                    }
                }
            })
            .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            // The program is done or out of time; nothing it started may stay
            group.kill();

            if waited.is_ok()
                && !drained
                && tokio::time::timeout(DRAIN_GRACE, &mut drain).await.is_err()
            {
                warn!(
                    "Output pipes still open {:?} after exit, keeping partial output",
                    DRAIN_GRACE
                );
            }
            (waited, elapsed_ms)
        };

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Ok(SandboxResult::crash(format!("Lost track of child: {}", e))
                    .with_elapsed(elapsed_ms))
            }
            Err(_) => {
                warn!("Execution exceeded {:?}, killed process group", timeout);
                if let Err(e) = child.kill().await {
                    debug!("Timed out child already gone: {}", e);
                }
                return Ok(SandboxResult::timeout(elapsed_ms));
            }
        };

        let exit_status = map_exit(status);
        debug!("Child finished with {} in {}ms", exit_status, elapsed_ms);

        let mut stderr_text = err.into_text("stderr");
        if exit_status == ExitStatus::Crash && stderr_text.trim().is_empty() {
            stderr_text = format!("Process terminated by signal ({})", status);
        }

        Ok(SandboxResult {
            exit_status,
            stdout: out.into_text("stdout"),
            stderr: stderr_text,
            elapsed_ms,
        })
    }

    fn name(&self) -> &str {
        "process"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> ProcessSandbox {
        ProcessSandbox::new("sh", "sh")
    }

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let result = shell().execute("echo hello", TIMEOUT).await.unwrap();
        assert_eq!(result.exit_status, ExitStatus::Success);
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let result = shell()
            .execute("echo 'No module named numpy' >&2\nexit 3", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result.exit_status, ExitStatus::Error);
        assert!(result.stderr.contains("numpy"));
    }

    #[tokio::test]
    async fn test_deadline_is_timeout() {
        let started = Instant::now();
        let result = shell()
            .execute("sleep 30", Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(result.exit_status, ExitStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_signal_is_crash() {
        let result = shell().execute("kill -9 $$", TIMEOUT).await.unwrap();
        assert_eq!(result.exit_status, ExitStatus::Crash);
        assert!(!result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let sandbox = shell().with_max_output_bytes(100);
        let result = sandbox
            .execute("i=0\nwhile [ $i -lt 500 ]; do echo 0123456789; i=$((i+1)); done", TIMEOUT)
            .await
            .unwrap();
        assert!(result.succeeded());
        assert!(result.stdout.ends_with(TRUNCATION_MARKER));
        assert_eq!(result.stdout.len(), 100 + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        std::env::set_var("KILN_SANDBOX_TEST_SECRET", "leaked");
        let result = shell()
            .execute("echo \"${KILN_SANDBOX_TEST_SECRET:-unset}\"", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "unset");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_unavailable() {
        let sandbox = ProcessSandbox::new("kiln-no-such-interpreter", "py");
        let err = sandbox.execute("print(1)", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, KilnError::SandboxUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_memory_limit_still_runs() {
        let sandbox = shell().with_memory_limit_mb(512);
        let result = sandbox.execute("echo limited", TIMEOUT).await.unwrap();
        assert!(result.succeeded());
        assert_eq!(result.stdout.trim(), "limited");
    }

    /// Whether `pid` has exited, waiting up to two seconds for it to go
    #[cfg(target_os = "linux")]
    async fn exited(pid: &str) -> bool {
        for _ in 0..40 {
            match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Err(_) => return true,
                // Zombies are dead, just not yet reaped
                Ok(stat) if stat.rsplit(") ").next().is_some_and(|s| s.starts_with('Z')) => {
                    return true
                }
                Ok(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
        false
    }

    #[tokio::test]
    async fn test_background_child_does_not_hold_run_open() {
        let started = Instant::now();
        let result = shell()
            .execute("sleep 4 &\necho done", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.exit_status, ExitStatus::Success);
        assert_eq!(result.stdout.trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_background_child_is_killed_after_exit() {
        let result = shell()
            .execute("sleep 30 &\necho $!", TIMEOUT)
            .await
            .unwrap();
        assert!(result.succeeded());
        let pid = result.stdout.trim().to_string();
        assert!(!pid.is_empty());
        assert!(exited(&pid).await, "background sleep {} survived", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_whole_group() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("sleep 30 &\necho $! > '{}'\nwait", pid_file.display());

        let result = shell()
            .execute(&script, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(result.exit_status, ExitStatus::Timeout);

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(exited(pid.trim()).await, "sleep {} outlived the timeout", pid.trim());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropped_execution_kills_whole_group() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("sleep 30 &\necho $! > '{}'\nwait", pid_file.display());

        let sandbox = shell();
        let dropped =
            tokio::time::timeout(Duration::from_millis(500), sandbox.execute(&script, TIMEOUT))
                .await;
        assert!(dropped.is_err());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(exited(pid.trim()).await, "sleep {} outlived its run", pid.trim());
    }

    #[test]
    fn test_from_settings_strips_dot() {
        let settings = SandboxSettings {
            extension: ".py".to_string(),
            ..SandboxSettings::default()
        };
        let sandbox = ProcessSandbox::from_settings(&settings);
        assert_eq!(sandbox.extension, "py");
        assert_eq!(sandbox.interpreter, "python3");
    }
}
