//! Effective resource limit computation.
//!
//! Combines the component's declared quotas with instance policy, project
//! policy and project features into one concrete [`Limits`] snapshot.
//! Out-of-range policy values are hard errors, never silently clamped.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::component::{ComponentDefinition, NetworkMode};
use crate::error::LimitsError;

/// Per-device IO cap applied to every visible block device.
pub const DEVICE_IO_LIMIT: &str = "50m";

/// Inclusive memory override range in MB.
pub const MEMORY_OVERRIDE_RANGE_MB: (u64, u64) = (1, 64_000);

/// Inclusive instance CPU limit range.
pub const CPU_LIMIT_RANGE: (u64, u64) = (1, 96);

/// Legacy transform components whose dynamic-backend base memory stays
/// pinned at 8 GB; their declared defaults have since grown and would
/// otherwise change historical sizing.
const PINNED_MEMORY_COMPONENTS: [&str; 2] =
    ["platform.python-transform-v2", "platform.r-transform-v2"];

const PINNED_MEMORY_MB: u64 = 8192;

/// Discrete container size tier used by the dynamic backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerTier {
    Small,
    Medium,
    Large,
    XLarge,
}

impl ContainerTier {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "small" => Some(ContainerTier::Small),
            "medium" => Some(ContainerTier::Medium),
            "large" => Some(ContainerTier::Large),
            "xlarge" => Some(ContainerTier::XLarge),
            _ => None,
        }
    }

    pub fn multiplier(&self) -> u64 {
        match self {
            ContainerTier::Small => 1,
            ContainerTier::Medium => 2,
            ContainerTier::Large => 4,
            ContainerTier::XLarge => 16,
        }
    }
}

/// Limits configured on the whole worker instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstancePolicy {
    pub cpu_limit: Option<u64>,
}

/// Per-project limit overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectPolicy {
    /// Memory override in MB, keyed by component id.
    #[serde(default)]
    pub memory_overrides_mb: HashMap<String, u64>,
    pub cpu_limit: Option<u64>,
}

/// Feature switches granted to the project.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProjectFeatures {
    /// Size CPU and memory by tier instead of fixed policy numbers.
    #[serde(default)]
    pub dynamic_backend: bool,
    /// Disable swap: the swap limit equals the memory limit.
    #[serde(default)]
    pub no_swap: bool,
}

/// Concrete limit snapshot for one container run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub memory_mb: u64,
    /// Present only when swap is disabled; always equal to `memory_mb`.
    pub memory_swap_mb: Option<u64>,
    pub cpu: u64,
    pub network: NetworkMode,
    /// Block devices the IO cap applies to.
    pub devices: Vec<String>,
}

impl Limits {
    /// Memory limit as an engine size flag value.
    pub fn memory_flag(&self) -> String {
        format!("{}m", self.memory_mb)
    }

    pub fn memory_swap_flag(&self) -> Option<String> {
        self.memory_swap_mb.map(|mb| format!("{mb}m"))
    }
}

/// Computes the effective limits for one component run.
///
/// `tier` is the project's container size tier, only consulted under the
/// dynamic-backend feature. `runtime_network` is the explicit per-run
/// network override; invalid values are rejected, not ignored.
pub fn compute_limits(
    component: &ComponentDefinition,
    instance: &InstancePolicy,
    project: &ProjectPolicy,
    features: &ProjectFeatures,
    tier: Option<&str>,
    runtime_network: Option<&str>,
    devices: Vec<String>,
) -> Result<Limits, LimitsError> {
    let memory_mb = effective_memory_mb(component, project, features, tier)?;
    let cpu = effective_cpu(instance, project, features, tier)?;

    let network = match runtime_network {
        Some(raw) => NetworkMode::parse(raw)
            .ok_or_else(|| LimitsError::UnsupportedNetworkMode(raw.to_string()))?,
        None => component.network,
    };

    let memory_swap_mb = features.no_swap.then_some(memory_mb);

    Ok(Limits {
        memory_mb,
        memory_swap_mb,
        cpu,
        network,
        devices,
    })
}

fn effective_memory_mb(
    component: &ComponentDefinition,
    project: &ProjectPolicy,
    features: &ProjectFeatures,
    tier: Option<&str>,
) -> Result<u64, LimitsError> {
    if features.dynamic_backend {
        let base_mb = if PINNED_MEMORY_COMPONENTS.contains(&component.id.as_str()) {
            PINNED_MEMORY_MB
        } else {
            parse_memory_mb(&component.memory)?
        };
        return Ok(base_mb * tier_multiplier(tier));
    }

    if let Some(&override_mb) = project.memory_overrides_mb.get(&component.id) {
        let (min, max) = MEMORY_OVERRIDE_RANGE_MB;
        if !(min..=max).contains(&override_mb) {
            return Err(LimitsError::MemoryOutOfRange {
                component: component.id.clone(),
                value_mb: override_mb,
            });
        }
        return Ok(override_mb);
    }

    parse_memory_mb(&component.memory)
}

fn effective_cpu(
    instance: &InstancePolicy,
    project: &ProjectPolicy,
    features: &ProjectFeatures,
    tier: Option<&str>,
) -> Result<u64, LimitsError> {
    if features.dynamic_backend {
        return Ok(tier_multiplier(tier));
    }

    let instance_cpu = instance.cpu_limit.ok_or(LimitsError::MissingInstanceCpu)?;
    let (min, max) = CPU_LIMIT_RANGE;
    if !(min..=max).contains(&instance_cpu) {
        return Err(LimitsError::CpuOutOfRange(instance_cpu));
    }
    let project_cpu = project.cpu_limit.unwrap_or(2);
    Ok(instance_cpu.min(project_cpu))
}

fn tier_multiplier(tier: Option<&str>) -> u64 {
    let raw = tier.unwrap_or("small");
    match ContainerTier::parse(raw) {
        Some(tier) => tier.multiplier(),
        None => {
            warn!(tier = raw, "Unknown container size tier, falling back to small");
            1
        }
    }
}

/// Parses an engine-style memory size string (`"256m"`, `"2g"`, `"512k"`)
/// into whole megabytes.
pub fn parse_memory_mb(value: &str) -> Result<u64, LimitsError> {
    let invalid = || LimitsError::InvalidMemoryString(value.to_string());

    // Split on chars, not bytes; the suffix may be any garbage including
    // a multi-byte character and must come back as an error.
    let mut chars = value.trim().chars();
    let suffix = chars.next_back().ok_or_else(invalid)?;
    let amount: u64 = chars.as_str().parse().map_err(|_| invalid())?;

    match suffix.to_ascii_lowercase() {
        'k' => Ok((amount / 1024).max(1)),
        'm' => Ok(amount),
        'g' => Ok(amount * 1024),
        _ => Err(invalid()),
    }
}

/// Enumerates host block devices from `/sys/block`, skipping loopback and
/// ramdisk entries. Failures yield an empty list; the IO cap is then
/// simply not applied.
pub fn detect_block_devices() -> Vec<String> {
    let entries = match std::fs::read_dir("/sys/block") {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut devices: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| {
            !name.starts_with("loop") && !name.starts_with("ram") && !name.starts_with("zram")
        })
        .map(|name| format!("/dev/{name}"))
        .collect();
    devices.sort();
    devices
}
