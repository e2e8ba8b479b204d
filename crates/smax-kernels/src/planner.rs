//! Occupancy-aware launch planning.
//!
//! Planning is a two-phase protocol. The kernel is first specialized for the
//! row width and introspected for its footprint, because register and shared
//! memory use are only known after code generation. The footprint is then
//! combined with the device limits to decide how many programs fit per
//! compute unit and how many to launch in total.

use std::fmt;

use smax_common::{
    DType, DeviceCapabilities, KernelError, LaunchPolicy, MatrixShape, Result,
};

use crate::device::SoftmaxDevice;
use crate::footprint::KernelFootprint;
use crate::kernel::{KernelSpec, block_size_for};

/// How many programs one compute unit can host, per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    /// Programs whose register demand fits one unit's register file.
    pub register_limited: u32,
    /// Programs whose shared memory fits one unit.
    pub memory_limited: u32,
}

impl Occupancy {
    /// Both pools are partitioned independently, so the tighter one binds.
    pub fn programs_per_unit(&self) -> u32 {
        self.register_limited.min(self.memory_limited)
    }
}

/// Resident programs per compute unit for a footprint.
///
/// A zero footprint component leaves that resource unbounded.
pub fn occupancy(
    caps: &DeviceCapabilities,
    footprint: &KernelFootprint,
    num_warps: u32,
) -> Occupancy {
    let registers_per_program = u64::from(footprint.registers_per_thread)
        * u64::from(caps.warp_size)
        * u64::from(num_warps);
    let register_limited = if registers_per_program == 0 {
        u32::MAX
    } else {
        (u64::from(caps.max_registers_per_unit) / registers_per_program) as u32
    };
    let memory_limited = if footprint.shared_memory_bytes == 0 {
        u32::MAX
    } else {
        caps.max_shared_memory_per_unit / footprint.shared_memory_bytes
    };
    Occupancy { register_limited, memory_limited }
}

/// A complete launch decision for one softmax call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchPlan {
    /// One-dimensional grid size; never exceeds the row count.
    pub num_programs: u32,
    pub spec: KernelSpec,
    pub threads_per_program: u32,
    pub footprint: KernelFootprint,
    pub occupancy: Occupancy,
}

impl LaunchPlan {
    pub fn block_size(&self) -> u32 {
        self.spec.block_size
    }

    pub fn num_warps(&self) -> u32 {
        self.spec.num_warps
    }

    pub fn num_stages(&self) -> u32 {
        self.spec.num_stages
    }

    pub fn grid_dim(&self) -> (u32, u32, u32) {
        (self.num_programs, 1, 1)
    }

    pub fn block_dim(&self) -> (u32, u32, u32) {
        (self.threads_per_program, 1, 1)
    }
}

impl fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "programs={} block={} warps={} stages={} dtype={} footprint=[{}] per-unit=min(regs {}, smem {})",
            self.num_programs,
            self.spec.block_size,
            self.spec.num_warps,
            self.spec.num_stages,
            self.spec.dtype,
            self.footprint,
            self.occupancy.register_limited,
            self.occupancy.memory_limited,
        )
    }
}

/// Turns a matrix shape and a device into a [`LaunchPlan`].
#[derive(Debug, Clone, Default)]
pub struct LaunchPlanner {
    policy: LaunchPolicy,
}

impl LaunchPlanner {
    /// Planner for `policy`. Rejects policies that fail
    /// [`LaunchPolicy::validate`], such as a zero warp count.
    pub fn new(policy: LaunchPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &LaunchPolicy {
        &self.policy
    }

    /// Specialize the kernel: block size from the row width, warps from the
    /// policy step table, stages from the device's shared memory.
    pub fn kernel_spec(
        &self,
        shape: &MatrixShape,
        dtype: DType,
        caps: &DeviceCapabilities,
    ) -> Result<KernelSpec> {
        let block_size = block_size_for(shape.n_cols)?;
        Ok(KernelSpec {
            block_size,
            num_warps: self.policy.num_warps_for(block_size),
            num_stages: self.policy.num_stages_for(caps),
            dtype,
        })
    }

    /// Size the grid for an already introspected kernel. Needs no device.
    pub fn plan_with_footprint(
        &self,
        shape: &MatrixShape,
        caps: &DeviceCapabilities,
        spec: KernelSpec,
        footprint: KernelFootprint,
    ) -> Result<LaunchPlan> {
        let occupancy = occupancy(caps, &footprint, spec.num_warps);
        let threads_per_program = spec.threads_per_program(caps.warp_size);
        let per_unit = occupancy.programs_per_unit();
        if per_unit == 0 {
            return Err(KernelError::ResourceExhausted {
                registers_per_thread: footprint.registers_per_thread,
                threads_per_program,
                shared_memory_bytes: footprint.shared_memory_bytes,
                register_limited: occupancy.register_limited,
                memory_limited: occupancy.memory_limited,
            }
            .into());
        }

        let resident = u64::from(caps.compute_units) * u64::from(per_unit);
        let num_programs = resident.min(shape.n_rows as u64);
        let num_programs = u32::try_from(num_programs).unwrap_or(u32::MAX);

        Ok(LaunchPlan { num_programs, spec, threads_per_program, footprint, occupancy })
    }

    /// Full planning sequence against a device: capabilities, specialization,
    /// introspection, grid sizing.
    pub fn plan<D: SoftmaxDevice>(
        &self,
        shape: &MatrixShape,
        dtype: DType,
        device: &D,
    ) -> Result<LaunchPlan> {
        let caps = device.capabilities()?;
        check_capabilities(device.name(), &caps)?;
        self.plan_for(shape, dtype, &caps, device)
    }

    /// Planning with capabilities the caller already holds.
    pub fn plan_for<D: SoftmaxDevice>(
        &self,
        shape: &MatrixShape,
        dtype: DType,
        caps: &DeviceCapabilities,
        device: &D,
    ) -> Result<LaunchPlan> {
        shape.validate()?;
        let spec = self.kernel_spec(shape, dtype, caps)?;
        let footprint = device.introspect(&spec)?;
        log::debug!("{}: {:?} footprint {}", device.name(), spec, footprint);
        let plan = self.plan_with_footprint(shape, caps, spec, footprint)?;
        log::debug!("{}: softmax {}x{} plan {}", device.name(), shape.n_rows, shape.n_cols, plan);
        Ok(plan)
    }
}

/// Capabilities a device reports about itself must be usable; a device that
/// reports zero compute units or a malformed warp size has failed.
pub fn check_capabilities(
    device: &str,
    caps: &DeviceCapabilities,
) -> std::result::Result<(), KernelError> {
    caps.validate()
        .map_err(|e| KernelError::device(format!("{device} reported unusable capabilities: {e}")))
}
