//! Accelerator resource limits used by the occupancy planner.
//!
//! [`DeviceCapabilities`] is read once per device handle and passed to the
//! planner explicitly; nothing here consults process-wide device state.

use serde::{Deserialize, Serialize};

use crate::policy::PolicyConfigError;

/// Per-device limits that bound how many kernel instances fit on one
/// compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Number of compute units (SMs / CUs).
    pub compute_units: u32,
    /// 32-bit registers available per compute unit.
    pub max_registers_per_unit: u32,
    /// Fast on-chip (shared) memory per compute unit in bytes.
    pub max_shared_memory_per_unit: u32,
    /// Lanes per warp / wavefront.
    pub warp_size: u32,
}

impl DeviceCapabilities {
    /// Mid-range mock device for tests: 32 units, 64Ki registers and 64 KiB
    /// shared memory per unit.
    pub const fn mock() -> Self {
        Self {
            compute_units: 32,
            max_registers_per_unit: 65_536,
            max_shared_memory_per_unit: 64 * 1024,
            warp_size: 32,
        }
    }

    /// Ampere data-center part (SM 8.0, 108 SMs).
    pub const fn sm80() -> Self {
        Self {
            compute_units: 108,
            max_registers_per_unit: 65_536,
            max_shared_memory_per_unit: 167_936,
            warp_size: 32,
        }
    }

    /// Hopper data-center part (SM 9.0, 132 SMs).
    pub const fn sm90() -> Self {
        Self {
            compute_units: 132,
            max_registers_per_unit: 65_536,
            max_shared_memory_per_unit: 233_472,
            warp_size: 32,
        }
    }

    pub fn with_compute_units(mut self, compute_units: u32) -> Self {
        self.compute_units = compute_units;
        self
    }

    pub fn with_registers(mut self, max_registers_per_unit: u32) -> Self {
        self.max_registers_per_unit = max_registers_per_unit;
        self
    }

    pub fn with_shared_memory(mut self, max_shared_memory_per_unit: u32) -> Self {
        self.max_shared_memory_per_unit = max_shared_memory_per_unit;
        self
    }

    pub fn with_warp_size(mut self, warp_size: u32) -> Self {
        self.warp_size = warp_size;
        self
    }

    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        if self.compute_units == 0 {
            return Err(PolicyConfigError::Validation("compute_units must be > 0".into()));
        }
        if self.warp_size == 0 || !self.warp_size.is_power_of_two() {
            return Err(PolicyConfigError::Validation(format!(
                "warp_size must be a non-zero power of two, got {}",
                self.warp_size
            )));
        }
        Ok(())
    }

    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "units={} regs/unit={} shared/unit={} warp={}",
            self.compute_units,
            self.max_registers_per_unit,
            format_bytes(self.max_shared_memory_per_unit),
            self.warp_size
        )
    }
}

fn format_bytes(bytes: u32) -> String {
    const KB: u32 = 1024;
    if bytes >= KB && bytes % KB == 0 { format!("{} KiB", bytes / KB) } else { format!("{bytes} B") }
}
