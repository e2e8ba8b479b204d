//! Public softmax entry points.

use std::sync::OnceLock;

use smax_common::{DeviceCapabilities, Element, LaunchPolicy, Matrix, Result};

use crate::device::SoftmaxDevice;
use crate::planner::{LaunchPlan, LaunchPlanner, check_capabilities};

/// Row-wise softmax of `input` on `device` with the default launch policy.
///
/// The output has the input's shape and row stride; padding elements are
/// zero. Inputs with no rows or no columns return immediately without
/// touching the device.
pub fn softmax<T: Element, D: SoftmaxDevice>(input: &Matrix<T>, device: &D) -> Result<Matrix<T>> {
    if input.is_empty() {
        return Ok(Matrix::zeros_like(input));
    }
    let plan = LaunchPlanner::default().plan(&input.shape(), T::DTYPE, device)?;
    execute(&plan, device, input)
}

/// Run an existing plan. The device has finished writing the returned
/// matrix when this returns.
pub fn execute<T: Element, D: SoftmaxDevice>(
    plan: &LaunchPlan,
    device: &D,
    input: &Matrix<T>,
) -> Result<Matrix<T>> {
    let mut output = Matrix::zeros_like(input);
    if input.is_empty() {
        return Ok(output);
    }
    log::debug!(
        "{}: launching softmax {}x{} (stride {}) with {}",
        device.name(),
        input.n_rows(),
        input.n_cols(),
        input.row_stride(),
        plan
    );
    device.launch(plan, input, &mut output)?;
    Ok(output)
}

/// Reusable softmax runner bound to one device.
///
/// Capabilities are queried from the device on first use and reused for the
/// lifetime of the runner.
#[derive(Debug)]
pub struct Softmax<D> {
    device: D,
    planner: LaunchPlanner,
    caps: OnceLock<DeviceCapabilities>,
}

impl<D: SoftmaxDevice> Softmax<D> {
    pub fn new(device: D) -> Self {
        Self { device, planner: LaunchPlanner::default(), caps: OnceLock::new() }
    }

    /// Runner with a custom policy; the policy is validated first.
    pub fn with_policy(device: D, policy: LaunchPolicy) -> Result<Self> {
        Ok(Self { device, planner: LaunchPlanner::new(policy)?, caps: OnceLock::new() })
    }

    /// Runner whose policy comes from the `SMAX_*` environment variables.
    pub fn from_env(device: D) -> Result<Self> {
        Self::with_policy(device, LaunchPolicy::from_env()?)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn policy(&self) -> &LaunchPolicy {
        self.planner.policy()
    }

    /// Device capabilities, queried once.
    pub fn capabilities(&self) -> Result<DeviceCapabilities> {
        if let Some(caps) = self.caps.get() {
            return Ok(*caps);
        }
        let caps = self.device.capabilities()?;
        check_capabilities(self.device.name(), &caps)?;
        log::info!("{}: {}", self.device.name(), caps.summary());
        Ok(*self.caps.get_or_init(|| caps))
    }

    /// Plan a launch for `input` without running it.
    pub fn plan<T: Element>(&self, input: &Matrix<T>) -> Result<LaunchPlan> {
        let caps = self.capabilities()?;
        self.planner.plan_for(&input.shape(), T::DTYPE, &caps, &self.device)
    }

    pub fn run<T: Element>(&self, input: &Matrix<T>) -> Result<Matrix<T>> {
        if input.is_empty() {
            return Ok(Matrix::zeros_like(input));
        }
        let plan = self.plan(input)?;
        execute(&plan, &self.device, input)
    }
}
