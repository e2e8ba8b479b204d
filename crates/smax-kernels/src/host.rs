//! Host-simulated device.
//!
//! Runs the same per-program kernel body the accelerator runs, with one rayon
//! task per program. Capabilities are supplied by the caller, which makes the
//! planner fully testable without hardware.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use smax_common::{DeviceCapabilities, Element, KernelError, Matrix, Result};

use crate::device::{SoftmaxDevice, check_launch_args};
use crate::footprint::KernelFootprint;
use crate::kernel::{KernelSpec, ProgramScratch, RowSoftmaxArgs, row_softmax_program};
use crate::planner::LaunchPlan;

/// Call counters for a [`HostDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub capability_queries: usize,
    pub introspections: usize,
    pub launches: usize,
}

/// A device simulated on the host CPU.
#[derive(Debug)]
pub struct HostDevice {
    name: String,
    caps: DeviceCapabilities,
    footprint: Option<KernelFootprint>,
    capability_queries: AtomicUsize,
    introspections: AtomicUsize,
    launches: AtomicUsize,
}

impl HostDevice {
    pub fn new(caps: DeviceCapabilities) -> Self {
        Self {
            name: format!("host[{}]", caps.summary()),
            caps,
            footprint: None,
            capability_queries: AtomicUsize::new(0),
            introspections: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
        }
    }

    /// Host device with [`DeviceCapabilities::mock`] limits.
    pub fn mock() -> Self {
        Self::new(DeviceCapabilities::mock())
    }

    /// Report `footprint` from every introspection instead of the analytic
    /// estimate.
    pub fn with_footprint(mut self, footprint: KernelFootprint) -> Self {
        self.footprint = Some(footprint);
        self
    }

    pub fn stats(&self) -> HostStats {
        HostStats {
            capability_queries: self.capability_queries.load(Ordering::Relaxed),
            introspections: self.introspections.load(Ordering::Relaxed),
            launches: self.launches.load(Ordering::Relaxed),
        }
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::mock()
    }
}

impl SoftmaxDevice for HostDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Result<DeviceCapabilities> {
        self.capability_queries.fetch_add(1, Ordering::Relaxed);
        Ok(self.caps)
    }

    fn introspect(&self, spec: &KernelSpec) -> Result<KernelFootprint> {
        self.introspections.fetch_add(1, Ordering::Relaxed);
        Ok(self.footprint.unwrap_or_else(|| KernelFootprint::estimate(spec, self.caps.warp_size)))
    }

    fn launch<T: Element>(
        &self,
        plan: &LaunchPlan,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
    ) -> Result<()> {
        check_launch_args(plan, input, output)?;
        self.launches.fetch_add(1, Ordering::Relaxed);
        if input.is_empty() {
            return Ok(());
        }
        let num_programs = plan.num_programs as usize;
        if num_programs == 0 {
            return Err(KernelError::invalid_shape("launch plan has no programs").into());
        }

        let args = RowSoftmaxArgs {
            n_rows: input.n_rows(),
            n_cols: input.n_cols(),
            in_stride: input.row_stride(),
            out_stride: output.row_stride(),
            block_size: plan.spec.block_size as usize,
            threads: plan.threads_per_program as usize,
            num_stages: plan.spec.num_stages as usize,
        };

        let mut programs: Vec<Vec<(usize, &mut [T])>> =
            (0..num_programs).map(|_| Vec::new()).collect();
        for (row, out) in
            output.as_mut_slice().chunks_mut(args.out_stride).take(args.n_rows).enumerate()
        {
            programs[row % num_programs].push((row, out));
        }

        let input = input.as_slice();
        programs.into_par_iter().enumerate().for_each(|(pid, rows)| {
            let mut scratch = ProgramScratch::new(&args);
            row_softmax_program(pid, input, rows, &args, &mut scratch);
        });
        log::trace!("{}: launched {} programs over {} rows", self.name, num_programs, args.n_rows);
        Ok(())
    }
}
