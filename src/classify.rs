//! Classification of a finished container run into a stage outcome.
//!
//! The exit code, termination reason and captured output are mapped to
//! one of four outcomes. Classification order is significant: a clean
//! exit wins over everything, a timeout wins over the exit code, and a
//! plain exit 1 is a component-reported failure even if memory pressure
//! markers appear in the output.

use crate::error::ExecutionError;
use crate::process::{ProcessOutcome, TerminationReason};

/// Message reported for memory-killed containers.
pub const OOM_MESSAGE: &str = "Component out of memory";

/// Fallback message for an exit 1 with no output on either stream.
pub const NO_ERROR_MESSAGE: &str = "No error message";

/// Final outcome of one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Exit code 0; output is kept for the job report.
    Success { stdout: String, stderr: String },
    /// Component-reported failure or timeout. The user can fix this.
    UserError { message: String },
    /// Killed by the memory limit.
    OutOfMemory,
    /// Unexpected exit code; an operator problem until proven otherwise.
    ApplicationError { exit_code: i32, message: String },
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success { .. })
    }

    /// Converts a non-success outcome into the error surfaced to the
    /// caller. Success converts to an application error so a misuse is
    /// loud rather than silent.
    pub fn into_execution_error(self) -> ExecutionError {
        match self {
            StageOutcome::Success { .. } => {
                ExecutionError::Application("successful stage treated as failed".to_string())
            }
            StageOutcome::UserError { message } => ExecutionError::User(message),
            StageOutcome::OutOfMemory => ExecutionError::OutOfMemory,
            StageOutcome::ApplicationError { exit_code, message } => {
                ExecutionError::Application(format!("container exited with code {exit_code}: {message}"))
            }
        }
    }
}

/// Detects memory kills from output signatures. Used as a fallback when
/// the engine's own OOM flag cannot be read.
#[derive(Debug, Clone)]
pub struct OomDetector {
    signatures: Vec<String>,
}

impl Default for OomDetector {
    fn default() -> Self {
        Self {
            signatures: vec![
                "Out of memory: Killed process".to_string(),
                "oom-kill".to_string(),
                "Cannot allocate memory".to_string(),
                "OOMKilled".to_string(),
            ],
        }
    }
}

impl OomDetector {
    pub fn new(signatures: Vec<String>) -> Self {
        Self { signatures }
    }

    pub fn matches(&self, outcome: &ProcessOutcome) -> bool {
        self.signatures
            .iter()
            .any(|s| outcome.stdout.contains(s) || outcome.stderr.contains(s))
    }
}

/// Maps a process outcome to a stage outcome.
///
/// `engine_oom` carries the engine's own verdict (`OOMKilled` from a
/// container inspect), queried by the orchestrator after the run.
pub fn classify(
    outcome: &ProcessOutcome,
    timeout_seconds: u64,
    detector: &OomDetector,
    engine_oom: bool,
) -> StageOutcome {
    if outcome.exit_code == 0 {
        return StageOutcome::Success {
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
        };
    }

    if outcome.termination == TerminationReason::TimedOut {
        return StageOutcome::UserError {
            message: format!("Process timeout after {timeout_seconds} seconds"),
        };
    }

    if outcome.exit_code == 1 {
        let message = if !outcome.stderr.trim().is_empty() {
            outcome.stderr.trim().to_string()
        } else if !outcome.stdout.trim().is_empty() {
            outcome.stdout.trim().to_string()
        } else {
            NO_ERROR_MESSAGE.to_string()
        };
        return StageOutcome::UserError { message };
    }

    if engine_oom || detector.matches(outcome) {
        return StageOutcome::OutOfMemory;
    }

    StageOutcome::ApplicationError {
        exit_code: outcome.exit_code,
        message: combined_output(outcome),
    }
}

fn combined_output(outcome: &ProcessOutcome) -> String {
    let stdout = outcome.stdout.trim();
    let stderr = outcome.stderr.trim();
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => NO_ERROR_MESSAGE.to_string(),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{stderr}\n{stdout}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn outcome(exit_code: i32, stdout: &str, stderr: &str) -> ProcessOutcome {
        ProcessOutcome {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration: Duration::from_secs(1),
            started_at: Utc::now(),
            termination: TerminationReason::Completed,
        }
    }

    fn detector() -> OomDetector {
        OomDetector::default()
    }

    #[test]
    fn test_exit_zero_is_success() {
        let result = classify(&outcome(0, "done", ""), 60, &detector(), false);
        assert!(result.is_success());
    }

    #[test]
    fn test_exit_zero_wins_over_oom_signal() {
        // A clean exit is a clean exit even if the engine flag is set.
        let result = classify(&outcome(0, "done", ""), 60, &detector(), true);
        assert!(result.is_success());
    }

    #[test]
    fn test_timeout_is_user_error_with_seconds() {
        let mut o = outcome(137, "", "");
        o.termination = TerminationReason::TimedOut;
        let result = classify(&o, 3600, &detector(), false);
        assert_eq!(
            result,
            StageOutcome::UserError {
                message: "Process timeout after 3600 seconds".to_string()
            }
        );
    }

    #[test]
    fn test_exit_one_prefers_stderr() {
        let result = classify(
            &outcome(1, "progress line", "bad input file"),
            60,
            &detector(),
            false,
        );
        assert_eq!(
            result,
            StageOutcome::UserError {
                message: "bad input file".to_string()
            }
        );
    }

    #[test]
    fn test_exit_one_falls_back_to_stdout() {
        let result = classify(&outcome(1, "only stdout", ""), 60, &detector(), false);
        assert_eq!(
            result,
            StageOutcome::UserError {
                message: "only stdout".to_string()
            }
        );
    }

    #[test]
    fn test_exit_one_silent_uses_fixed_message() {
        let result = classify(&outcome(1, "  \n", ""), 60, &detector(), false);
        assert_eq!(
            result,
            StageOutcome::UserError {
                message: NO_ERROR_MESSAGE.to_string()
            }
        );
    }

    #[test]
    fn test_exit_one_wins_over_oom_signature() {
        let result = classify(
            &outcome(1, "", "Cannot allocate memory"),
            60,
            &detector(),
            false,
        );
        assert!(matches!(result, StageOutcome::UserError { .. }));
    }

    #[test]
    fn test_engine_oom_flag() {
        let result = classify(&outcome(137, "", ""), 60, &detector(), true);
        assert_eq!(result, StageOutcome::OutOfMemory);
    }

    #[test]
    fn test_oom_signature_fallback() {
        let result = classify(
            &outcome(137, "", "Out of memory: Killed process 42"),
            60,
            &detector(),
            false,
        );
        assert_eq!(result, StageOutcome::OutOfMemory);
    }

    #[test]
    fn test_other_exit_is_application_error() {
        let result = classify(&outcome(2, "out", "err"), 60, &detector(), false);
        assert_eq!(
            result,
            StageOutcome::ApplicationError {
                exit_code: 2,
                message: "err\nout".to_string()
            }
        );
    }

    #[test]
    fn test_application_error_without_output() {
        let result = classify(&outcome(139, "", ""), 60, &detector(), false);
        assert_eq!(
            result,
            StageOutcome::ApplicationError {
                exit_code: 139,
                message: NO_ERROR_MESSAGE.to_string()
            }
        );
    }

    #[test]
    fn test_into_execution_error_mapping() {
        assert!(matches!(
            StageOutcome::OutOfMemory.into_execution_error(),
            ExecutionError::OutOfMemory
        ));
        let user = StageOutcome::UserError {
            message: "m".to_string(),
        }
        .into_execution_error();
        assert!(user.is_user_error());

        let app = StageOutcome::ApplicationError {
            exit_code: 139,
            message: "segfault".to_string(),
        }
        .into_execution_error();
        assert!(app.to_string().contains("139"));
        assert!(app.to_string().contains("segfault"));
    }
}
