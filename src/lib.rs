//! runforge: sandboxed execution runtime for data-pipeline components.
//!
//! A component is described declaratively (image source or build recipe,
//! resource quotas, feature flags), resolved to a local container image,
//! run inside a resource-limited sandbox with its data directory
//! mounted, and its outcome classified into a small error taxonomy the
//! job queue can act on.
//!
//! The main entry point is [`orchestrator::ExecutionOrchestrator`],
//! which drives a whole job: resolve each stage's image, compute its
//! effective limits, run the container under a hard timeout, redact and
//! truncate its output, and classify the exit.

pub mod builder;
pub mod classify;
pub mod component;
pub mod environment;
pub mod error;
pub mod invocation;
pub mod limits;
pub mod orchestrator;
pub mod process;
pub mod redactor;
pub mod resolver;
pub mod retry;

mod engine;

pub use error::{BuildError, ExecutionError, LimitsError, ProcessError, ResolveError};
