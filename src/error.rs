//! Error types for runforge operations.
//!
//! Defines error types for the major subsystems:
//! - Image resolution (registry login and pulls)
//! - On-the-fly image builds
//! - Resource limit computation
//! - Process execution
//!
//! plus the top-level [`ExecutionError`] taxonomy that callers alert on:
//! login failures, caller-fixable user errors, infrastructure errors and
//! out-of-memory kills.

use thiserror::Error;

/// Errors that can occur while resolving a component definition to a
/// locally available image.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Registry authentication failed for any reason: missing credentials,
    /// wrong password, expired token. Never retried.
    #[error("Login to registry '{registry}' failed: {reason}")]
    LoginFailed { registry: String, reason: String },

    /// The repository is unreachable or does not exist. Caller-fixable.
    #[error("Cannot pull image '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    /// Builder component without a build recipe, or a kind the resolver
    /// cannot handle.
    #[error("Invalid image definition for component '{component}': {reason}")]
    InvalidDefinition { component: String, reason: String },

    /// Unexpected container engine failure. Transient engine errors are
    /// retried by the pull backoff policy.
    #[error("Container engine failure: {0}")]
    Engine(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during on-the-fly image construction.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A declared required parameter ended up without a value.
    #[error("Missing value for required build parameter '{0}'")]
    MissingParameter(String),

    /// A parameter value failed its type validation.
    #[error("Invalid value for build parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The generated Dockerfile still contains `{{...}}` tokens.
    #[error("Unresolved placeholders in build recipe: {}", .0.join(", "))]
    UnresolvedPlaceholders(Vec<String>),

    /// The build process reported a user-facing error via the embedded
    /// marker pattern.
    #[error("Build failed: {0}")]
    UserFacing(String),

    /// The engine build command failed without a user-error marker.
    #[error("Image build failed with exit code {code}: {output}")]
    Engine { code: i32, output: String },

    #[error("Image build timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while computing effective resource limits.
///
/// Every variant carries the offending limit name and raw value so an
/// operator can trace it back to the policy source.
#[derive(Debug, Error)]
pub enum LimitsError {
    #[error("Invalid memory specification '{0}': expected digits with a k/m/g suffix")]
    InvalidMemoryString(String),

    #[error("Memory override for component '{component}' out of range [1, 64000] MB: {value_mb}")]
    MemoryOutOfRange { component: String, value_mb: u64 },

    #[error("Instance CPU limit out of range [1, 96]: {0}")]
    CpuOutOfRange(u64),

    #[error("Instance CPU limit is not configured")]
    MissingInstanceCpu,

    #[error("Network mode '{0}' not supported")]
    UnsupportedNetworkMode(String),
}

/// Errors raised by the process runner itself (spawn and stream plumbing,
/// never a non-zero container exit -- that is encoded in the outcome).
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error taxonomy surfaced to the job queue.
///
/// `User` messages are safe to show verbatim (output has already passed
/// through the redactor); `Application` messages are logged in full
/// internally and may be camouflaged at the external boundary.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Registry login failed: {0}")]
    LoginFailed(String),

    #[error("{0}")]
    User(String),

    #[error("Component out of memory")]
    OutOfMemory,

    #[error("Application error: {0}")]
    Application(String),
}

impl ExecutionError {
    /// Whether the error is fixable by the caller.
    pub fn is_user_error(&self) -> bool {
        matches!(self, ExecutionError::User(_))
    }
}

impl From<ResolveError> for ExecutionError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::LoginFailed { .. } => ExecutionError::LoginFailed(err.to_string()),
            ResolveError::PullFailed { .. } => ExecutionError::User(err.to_string()),
            ResolveError::Build(build) => build.into(),
            ResolveError::InvalidDefinition { .. }
            | ResolveError::Engine(_)
            | ResolveError::Io(_) => ExecutionError::Application(err.to_string()),
        }
    }
}

impl From<BuildError> for ExecutionError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::MissingParameter(_)
            | BuildError::InvalidParameter { .. }
            | BuildError::UnresolvedPlaceholders(_)
            | BuildError::UserFacing(_) => ExecutionError::User(err.to_string()),
            BuildError::Engine { .. } | BuildError::Timeout { .. } | BuildError::Io(_) => {
                ExecutionError::Application(err.to_string())
            }
        }
    }
}

impl From<LimitsError> for ExecutionError {
    fn from(err: LimitsError) -> Self {
        ExecutionError::Application(err.to_string())
    }
}

impl From<ProcessError> for ExecutionError {
    fn from(err: ProcessError) -> Self {
        ExecutionError::Application(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_failure_maps_to_login_failed() {
        let err = ResolveError::LoginFailed {
            registry: "quay.io".to_string(),
            reason: "bad password".to_string(),
        };
        let exec: ExecutionError = err.into();
        assert!(matches!(exec, ExecutionError::LoginFailed(_)));
        assert!(!exec.is_user_error());
    }

    #[test]
    fn test_pull_failure_is_user_error() {
        let err = ResolveError::PullFailed {
            image: "acme/missing:latest".to_string(),
            reason: "repository does not exist".to_string(),
        };
        let exec: ExecutionError = err.into();
        assert!(exec.is_user_error());
        assert!(exec.to_string().contains("acme/missing"));
    }

    #[test]
    fn test_build_parameter_errors_are_user_errors() {
        for err in [
            BuildError::MissingParameter("version".to_string()),
            BuildError::UnresolvedPlaceholders(vec!["{{branch}}".to_string()]),
            BuildError::UserFacing("bad requirements.txt".to_string()),
        ] {
            let exec: ExecutionError = err.into();
            assert!(exec.is_user_error(), "expected user error, got {exec:?}");
        }
    }

    #[test]
    fn test_engine_build_error_is_application_error() {
        let err = BuildError::Engine {
            code: 2,
            output: "compiler exploded".to_string(),
        };
        let exec: ExecutionError = err.into();
        assert!(matches!(exec, ExecutionError::Application(_)));
    }

    #[test]
    fn test_limits_errors_are_application_errors() {
        let err = LimitsError::MemoryOutOfRange {
            component: "acme.runner".to_string(),
            value_mb: 128_000,
        };
        let exec: ExecutionError = err.into();
        assert!(matches!(exec, ExecutionError::Application(_)));
        assert!(exec.to_string().contains("128000"));
    }
}
