//! Launch heuristics for the softmax planner.
//!
//! The concurrency-width step table and the pipeline-depth threshold are tuned
//! for one hardware family, so they live in an overridable [`LaunchPolicy`]
//! rather than in the planner. A policy loads from TOML (`smax.toml`) and
//! accepts environment overrides via `SMAX_*` variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::DeviceCapabilities;

/// One row of the block-size → warp-count step table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarpStep {
    /// Smallest block size this step applies to.
    pub min_block_size: u32,
    pub num_warps: u32,
}

/// Static launch heuristics consulted before kernel introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchPolicy {
    /// Warps per program for block sizes below the first step.
    /// Override: `SMAX_DEFAULT_NUM_WARPS`
    pub default_num_warps: u32,

    /// Shared memory per unit (bytes) above which the deep pipeline is used.
    /// Override: `SMAX_STAGE_MEMORY_THRESHOLD`
    pub stage_memory_threshold: u32,

    /// Override: `SMAX_DEEP_STAGES`
    pub deep_stages: u32,

    /// Override: `SMAX_SHALLOW_STAGES`
    pub shallow_stages: u32,

    /// Ascending step table; the last step with `min_block_size <= block_size`
    /// wins. Kept last so it serializes as trailing `[[warp_steps]]` tables.
    /// Override: `SMAX_WARP_STEPS` (`"2048:8,4096:16"`)
    pub warp_steps: Vec<WarpStep>,
}

impl Default for LaunchPolicy {
    fn default() -> Self {
        Self {
            default_num_warps: 4,
            stage_memory_threshold: 200_000,
            deep_stages: 4,
            shallow_stages: 2,
            warp_steps: vec![
                WarpStep { min_block_size: 2048, num_warps: 8 },
                WarpStep { min_block_size: 4096, num_warps: 16 },
            ],
        }
    }
}

/// Errors that can occur when loading or validating a [`LaunchPolicy`].
#[derive(Debug, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

const MAX_WARPS_PER_PROGRAM: u32 = 32;

impl LaunchPolicy {
    /// Warps per program for a given block size.
    pub fn num_warps_for(&self, block_size: u32) -> u32 {
        self.warp_steps
            .iter()
            .rev()
            .find(|step| block_size >= step.min_block_size)
            .map_or(self.default_num_warps, |step| step.num_warps)
    }

    /// Pipeline depth for a device. Static; independent of the kernel
    /// footprint.
    pub fn num_stages_for(&self, caps: &DeviceCapabilities) -> u32 {
        if caps.max_shared_memory_per_unit > self.stage_memory_threshold {
            self.deep_stages
        } else {
            self.shallow_stages
        }
    }

    /// Render the policy as TOML.
    pub fn to_toml(&self) -> Result<String, PolicyConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// TOML for the built-in policy.
    pub fn default_toml() -> Result<String, PolicyConfigError> {
        Self::default().to_toml()
    }

    /// Load a policy file, falling back to defaults for missing fields, then
    /// apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, PolicyConfigError> {
        let contents = std::fs::read_to_string(path)?;
        log::debug!("loading launch policy from {}", path.display());
        Self::from_toml(&contents)
    }

    /// Load from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PolicyConfigError> {
        let mut policy: LaunchPolicy = toml::from_str(toml_str)?;
        policy.apply_env_overrides()?;
        policy.validate()?;
        Ok(policy)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, PolicyConfigError> {
        let mut policy = Self::default();
        policy.apply_env_overrides()?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        validate_warps("default_num_warps", self.default_num_warps)?;
        let mut prev: Option<u32> = None;
        for step in &self.warp_steps {
            if !step.min_block_size.is_power_of_two() {
                return Err(PolicyConfigError::Validation(format!(
                    "warp step threshold must be a power of two, got {}",
                    step.min_block_size
                )));
            }
            if prev.is_some_and(|p| step.min_block_size <= p) {
                return Err(PolicyConfigError::Validation(format!(
                    "warp step thresholds must be strictly increasing, {} follows {}",
                    step.min_block_size,
                    prev.unwrap_or_default()
                )));
            }
            validate_warps("warp step num_warps", step.num_warps)?;
            prev = Some(step.min_block_size);
        }
        if self.deep_stages == 0 || self.shallow_stages == 0 {
            return Err(PolicyConfigError::Validation("stage counts must be >= 1".into()));
        }
        Ok(())
    }

    /// Apply `SMAX_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), PolicyConfigError> {
        if let Some(v) = env_u32("SMAX_DEFAULT_NUM_WARPS")? {
            self.default_num_warps = v;
        }
        if let Some(v) = env_u32("SMAX_STAGE_MEMORY_THRESHOLD")? {
            self.stage_memory_threshold = v;
        }
        if let Some(v) = env_u32("SMAX_DEEP_STAGES")? {
            self.deep_stages = v;
        }
        if let Some(v) = env_u32("SMAX_SHALLOW_STAGES")? {
            self.shallow_stages = v;
        }
        if let Ok(val) = std::env::var("SMAX_WARP_STEPS") {
            self.warp_steps =
                parse_warp_steps(&val).map_err(|reason| PolicyConfigError::EnvOverride {
                    key: "SMAX_WARP_STEPS".into(),
                    value: val.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}

fn validate_warps(what: &str, num_warps: u32) -> Result<(), PolicyConfigError> {
    if num_warps == 0 || num_warps > MAX_WARPS_PER_PROGRAM || !num_warps.is_power_of_two() {
        return Err(PolicyConfigError::Validation(format!(
            "{what} must be a power of two in 1..={MAX_WARPS_PER_PROGRAM}, got {num_warps}"
        )));
    }
    Ok(())
}

fn env_u32(key: &str) -> Result<Option<u32>, PolicyConfigError> {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().map(Some).map_err(|e| {
            PolicyConfigError::EnvOverride { key: key.into(), value: val.clone(), reason: e.to_string() }
        }),
        Err(_) => Ok(None),
    }
}

/// Parse `"2048:8,4096:16"` into a step table. An empty string clears it.
pub fn parse_warp_steps(s: &str) -> Result<Vec<WarpStep>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (block, warps) =
                part.split_once(':').ok_or_else(|| format!("expected BLOCK:WARPS, got '{part}'"))?;
            let min_block_size =
                block.trim().parse::<u32>().map_err(|e| format!("bad block size '{block}': {e}"))?;
            let num_warps =
                warps.trim().parse::<u32>().map_err(|e| format!("bad warp count '{warps}': {e}"))?;
            Ok(WarpStep { min_block_size, num_warps })
        })
        .collect()
}
