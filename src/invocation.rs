//! Construction of the sandboxed `docker run` invocation.
//!
//! The command line is assembled in a fixed flag order so that identical
//! inputs always produce an identical string, which keeps the golden
//! command fixtures stable. Every dynamic value is shell-quoted at the
//! point of insertion, never concatenated raw.

use std::collections::BTreeMap;

use crate::engine::ENGINE_BINARY;
use crate::limits::{Limits, DEVICE_IO_LIMIT};
use crate::resolver::ResolvedImage;

/// Default numeric user the container runs as unless the component opts
/// into keeping the image's root user.
pub const SANDBOX_USER: &str = "1000";

/// Per-invocation options supplied by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RunCommandOptions {
    /// Container name; unique per stage.
    pub name: String,
    /// Environment variables; a `BTreeMap` keeps flag order deterministic.
    pub env: BTreeMap<String, String>,
    /// `key=value` labels.
    pub labels: Vec<String>,
    /// `Some(uid)` for the non-root mapping, `None` to keep the image user.
    pub user: Option<String>,
}

/// Single-quotes a value for POSIX shells. Embedded single quotes are
/// closed, escaped and reopened, so arbitrary bytes survive verbatim.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Builds the run, inspect and remove command lines for one container.
#[derive(Debug)]
pub struct RunInvocationBuilder<'a> {
    image: &'a ResolvedImage,
    limits: &'a Limits,
    options: &'a RunCommandOptions,
    /// Wall-clock seconds for the hard-kill wrapper.
    process_timeout: u64,
}

impl<'a> RunInvocationBuilder<'a> {
    pub fn new(
        image: &'a ResolvedImage,
        limits: &'a Limits,
        options: &'a RunCommandOptions,
        process_timeout: u64,
    ) -> Self {
        Self {
            image,
            limits,
            options,
            process_timeout,
        }
    }

    /// Assembles the full run invocation. Flag order is fixed: kill
    /// wrapper, volumes, memory, swap, network, cpu, device IO,
    /// environment, labels, name, user, image reference last.
    pub fn build_run_command(&self, data_dir: &str, tmp_dir: &str) -> String {
        let mut parts: Vec<String> = vec![
            "timeout".to_string(),
            "--signal=SIGKILL".to_string(),
            quote(&self.process_timeout.to_string()),
            ENGINE_BINARY.to_string(),
            "run".to_string(),
        ];

        parts.push(format!("--volume {}", quote(&format!("{data_dir}:/data"))));
        parts.push(format!("--volume {}", quote(&format!("{tmp_dir}:/tmp"))));
        parts.push(format!("--memory {}", quote(&self.limits.memory_flag())));
        if let Some(swap) = self.limits.memory_swap_flag() {
            parts.push(format!("--memory-swap {}", quote(&swap)));
        }
        parts.push(format!("--net {}", quote(self.limits.network.as_str())));
        parts.push(format!("--cpus {}", quote(&self.limits.cpu.to_string())));

        for device in &self.limits.devices {
            let cap = quote(&format!("{device}:{DEVICE_IO_LIMIT}"));
            parts.push(format!("--device-read-bps {cap}"));
            parts.push(format!("--device-write-bps {cap}"));
        }

        // Key and value quoted independently; values may contain quotes,
        // non-ASCII text and embedded '='.
        for (key, value) in &self.options.env {
            parts.push(format!("--env {}={}", quote(key), quote(value)));
        }

        for label in &self.options.labels {
            parts.push(format!("--label {}", quote(label)));
        }

        if !self.options.name.is_empty() {
            parts.push(format!("--name {}", quote(&self.options.name)));
        }

        if let Some(user) = &self.options.user {
            parts.push(format!("--user {}", quote(user)));
        }

        parts.push(quote(&self.image.reference));
        parts.join(" ")
    }
}

/// Command line to inspect a named container.
pub fn inspect_command(name: &str) -> String {
    format!("{ENGINE_BINARY} inspect {}", quote(name))
}

/// Command line to force-remove a named container.
pub fn remove_command(name: &str) -> String {
    format!("{ENGINE_BINARY} rm -f {}", quote(name))
}
