//! The boundary between the planner and an execution device.

use smax_common::{DeviceCapabilities, Element, KernelError, Matrix, Result};

use crate::footprint::KernelFootprint;
use crate::kernel::KernelSpec;
use crate::planner::LaunchPlan;

/// A device able to compile, introspect and run the row-softmax kernel.
///
/// Planning only needs [`capabilities`](Self::capabilities) and
/// [`introspect`](Self::introspect); [`launch`](Self::launch) is the execution
/// phase and returns only once the device has finished writing the output.
pub trait SoftmaxDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Resource limits of this device. Implementations read them once per
    /// handle.
    fn capabilities(&self) -> Result<DeviceCapabilities>;

    /// Compile (or look up) the kernel variant for `spec` without running it
    /// and report its footprint.
    fn introspect(&self, spec: &KernelSpec) -> Result<KernelFootprint>;

    /// Run `plan.num_programs` programs over `input`, writing `output`.
    fn launch<T: Element>(
        &self,
        plan: &LaunchPlan,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
    ) -> Result<()>;
}

impl<D: SoftmaxDevice> SoftmaxDevice for &D {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn capabilities(&self) -> Result<DeviceCapabilities> {
        (**self).capabilities()
    }

    fn introspect(&self, spec: &KernelSpec) -> Result<KernelFootprint> {
        (**self).introspect(spec)
    }

    fn launch<T: Element>(
        &self,
        plan: &LaunchPlan,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
    ) -> Result<()> {
        (**self).launch(plan, input, output)
    }
}

/// Checks shared by every device before a launch touches memory.
pub fn check_launch_args<T: Element>(
    plan: &LaunchPlan,
    input: &Matrix<T>,
    output: &Matrix<T>,
) -> std::result::Result<(), KernelError> {
    if input.n_rows() != output.n_rows() || input.n_cols() != output.n_cols() {
        return Err(KernelError::invalid_shape(format!(
            "output is {}x{} but input is {}x{}",
            output.n_rows(),
            output.n_cols(),
            input.n_rows(),
            input.n_cols()
        )));
    }
    if plan.spec.dtype != T::DTYPE {
        return Err(KernelError::invalid_shape(format!(
            "plan specialized for {} launched with {}",
            plan.spec.dtype,
            T::DTYPE
        )));
    }
    if (plan.spec.block_size as usize) < input.n_cols() {
        return Err(KernelError::invalid_shape(format!(
            "block size {} cannot cover {} columns",
            plan.spec.block_size,
            input.n_cols()
        )));
    }
    if plan.num_programs as usize > input.n_rows() {
        return Err(KernelError::invalid_shape(format!(
            "{} programs for {} rows",
            plan.num_programs,
            input.n_rows()
        )));
    }
    Ok(())
}
