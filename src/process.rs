//! Process execution with output capture, truncation and redaction.
//!
//! The runner never fails on a non-zero exit; that is recorded in the
//! [`ProcessOutcome`] and classified separately. Its own errors are
//! limited to spawn and stream plumbing.

use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ProcessError;
use crate::redactor::OutputRedactor;

/// Hard cap per output stream. Oversized output is truncated with an
/// explicit marker rather than silently cut.
pub const MAX_STREAM_BYTES: usize = 1024 * 1024;

/// Marker appended to truncated streams.
pub const TRIM_MARKER: &str = "[trimmed]";

/// Host-environment warning emitted by engines on kernels without swap
/// accounting; benign noise, stripped from component output.
const SWAP_LIMIT_WARNING: &str = "WARNING: Your kernel does not support swap limit capabilities";

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Exited on its own (any exit code).
    Completed,
    /// Killed by the wall-clock timeout.
    TimedOut,
    /// Killed by a signal other than our timeout.
    Killed,
}

/// Result of one sandboxed process run, sanitized and redacted.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub termination: TerminationReason,
}

/// Executes a full command line under a wall-clock timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    /// Slack on top of the in-command kill wrapper so the wrapper gets to
    /// fire first and report its own exit code.
    grace: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            grace: Duration::from_secs(30),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `command` through the shell, capturing both streams up to the
    /// byte cap. The redactor is applied before anything is returned.
    pub async fn run(
        &self,
        command: &str,
        redactor: &OutputRedactor,
    ) -> Result<ProcessOutcome, ProcessError> {
        let started_at = Utc::now();
        let start = Instant::now();
        debug!(timeout_s = self.timeout.as_secs(), "Spawning sandboxed process");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::Spawn(e.to_string()))?;

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Spawn("stdout pipe missing".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::Spawn("stderr pipe missing".to_string()))?;

        // Readers run as tasks so partial output survives a kill.
        let stdout_task = tokio::spawn(read_capped(stdout_pipe));
        let stderr_task = tokio::spawn(read_capped(stderr_pipe));

        let wait = tokio::time::timeout(self.timeout + self.grace, child.wait()).await;
        let duration = start.elapsed();

        let (exit_code, mut termination) = match wait {
            Ok(Ok(status)) => match status.code() {
                Some(code) => (code, TerminationReason::Completed),
                None => (-1, TerminationReason::Killed),
            },
            Ok(Err(e)) => return Err(ProcessError::Io(e)),
            Err(_) => {
                warn!(timeout_s = self.timeout.as_secs(), "Hard-killing timed out process");
                child.kill().await.ok();
                child.wait().await.ok();
                (137, TerminationReason::TimedOut)
            }
        };

        // The in-command `timeout --signal=SIGKILL` wrapper reports 137
        // when it fires; attribute that to the timeout, not the component.
        if exit_code == 137
            && termination == TerminationReason::Completed
            && duration >= self.timeout
        {
            termination = TerminationReason::TimedOut;
        }

        let (stdout_raw, stdout_trimmed) = stdout_task.await.unwrap_or_default();
        let (stderr_raw, stderr_trimmed) = stderr_task.await.unwrap_or_default();

        Ok(ProcessOutcome {
            exit_code,
            stdout: sanitize_stream(&stdout_raw, stdout_trimmed, redactor),
            stderr: sanitize_stream(&stderr_raw, stderr_trimmed, redactor),
            duration,
            started_at,
            termination,
        })
    }
}

/// Reads a stream to EOF, keeping at most [`MAX_STREAM_BYTES`]. The pipe
/// is drained past the cap so the child never blocks on a full buffer.
async fn read_capped<R>(mut reader: R) -> (Vec<u8>, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut trimmed = false;

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if buffer.len() < MAX_STREAM_BYTES {
            let take = n.min(MAX_STREAM_BYTES - buffer.len());
            buffer.extend_from_slice(&chunk[..take]);
            if take < n {
                trimmed = true;
            }
        } else {
            trimmed = true;
        }
    }
    (buffer, trimmed)
}

/// Decode, strip noise, redact, mark truncation. Order matters: the trim
/// marker goes on last so it is never itself redacted away.
fn sanitize_stream(bytes: &[u8], trimmed: bool, redactor: &OutputRedactor) -> String {
    let decoded = decode_lossy_trimmed(bytes);
    let filtered = filter_engine_noise(&decoded);
    let mut text = redactor.redact(&filtered);
    if trimmed {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(TRIM_MARKER);
    }
    text
}

/// Decodes bytes as UTF-8. A trailing incomplete multi-byte sequence
/// (the usual result of a byte-cap truncation) is dropped; interior
/// garbage is replaced, so the result is always valid UTF-8.
fn decode_lossy_trimmed(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(e) => {
            let end = if e.error_len().is_none() {
                e.valid_up_to()
            } else {
                bytes.len()
            };
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
    }
}

/// Strips the known swap-limit kernel warning. If nothing but whitespace
/// remains the result is the empty string.
fn filter_engine_noise(text: &str) -> String {
    if !text.contains(SWAP_LIMIT_WARNING) {
        return text.to_string();
    }
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !line.contains(SWAP_LIMIT_WARNING))
        .collect();
    let joined = kept.join("\n");
    if joined.trim().is_empty() {
        String::new()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_secrets() -> OutputRedactor {
        OutputRedactor::new()
    }

    #[tokio::test]
    async fn test_successful_run_captures_stdout() {
        let runner = ProcessRunner::new(Duration::from_secs(10));
        let outcome = runner.run("echo hello", &no_secrets()).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.termination, TerminationReason::Completed);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let runner = ProcessRunner::new(Duration::from_secs(10));
        let outcome = runner
            .run("echo oops >&2; exit 3", &no_secrets())
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let runner = ProcessRunner {
            timeout: Duration::from_millis(200),
            grace: Duration::from_millis(50),
        };
        let outcome = runner.run("sleep 30", &no_secrets()).await.unwrap();
        assert_eq!(outcome.termination, TerminationReason::TimedOut);
        assert_eq!(outcome.exit_code, 137);
    }

    #[tokio::test]
    async fn test_wrapper_kill_attributed_to_timeout() {
        // The in-command wrapper fires before our outer timer does.
        let runner = ProcessRunner {
            timeout: Duration::from_millis(900),
            grace: Duration::from_secs(10),
        };
        let outcome = runner
            .run("timeout --signal=SIGKILL 1 sleep 30", &no_secrets())
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 137);
        assert_eq!(outcome.termination, TerminationReason::TimedOut);
    }

    #[tokio::test]
    async fn test_output_redacted() {
        let mut redactor = OutputRedactor::new();
        redactor.register("hunter2");
        let runner = ProcessRunner::new(Duration::from_secs(10));
        let outcome = runner.run("echo password is hunter2", &redactor).await.unwrap();
        assert!(!outcome.stdout.contains("hunter2"));
        assert!(outcome.stdout.contains("[hidden]"));
    }

    #[tokio::test]
    async fn test_oversized_output_trimmed_marker() {
        let runner = ProcessRunner::new(Duration::from_secs(30));
        // Emit ~2 MiB, twice the cap.
        let outcome = runner
            .run("head -c 2097152 /dev/zero | tr '\\0' 'x'", &no_secrets())
            .await
            .unwrap();
        assert!(outcome.stdout.ends_with(TRIM_MARKER));
        assert!(outcome.stdout.len() <= MAX_STREAM_BYTES + TRIM_MARKER.len() + 1);
    }

    #[test]
    fn test_decode_drops_trailing_incomplete_sequence() {
        // "žluť" cut mid-character.
        let bytes = "žluť".as_bytes();
        let cut = &bytes[..bytes.len() - 1];
        let decoded = decode_lossy_trimmed(cut);
        assert_eq!(decoded, "žlu");
        assert!(std::str::from_utf8(decoded.as_bytes()).is_ok());
    }

    #[test]
    fn test_decode_replaces_interior_garbage() {
        let bytes = b"ok\xffok";
        let decoded = decode_lossy_trimmed(bytes);
        assert!(decoded.starts_with("ok"));
        assert!(decoded.ends_with("ok"));
    }

    #[test]
    fn test_swap_warning_stripped() {
        let text = format!("{SWAP_LIMIT_WARNING}\nreal output\n");
        assert_eq!(filter_engine_noise(&text), "real output");
    }

    #[test]
    fn test_swap_warning_only_yields_empty_string() {
        let text = format!("  \n{SWAP_LIMIT_WARNING}\n   \n");
        assert_eq!(filter_engine_noise(&text), "");
    }

    #[test]
    fn test_trim_marker_survives_redaction() {
        let mut redactor = OutputRedactor::new();
        redactor.register("[trimmed]"); // hostile registration
        let out = sanitize_stream(b"data", true, &redactor);
        assert!(out.ends_with(TRIM_MARKER));
    }
}
