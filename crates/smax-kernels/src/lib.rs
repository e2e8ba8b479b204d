//! Row-wise softmax with occupancy-aware launch planning.
//!
//! Each call specializes the row kernel for the matrix width, introspects the
//! compiled variant for its register and shared-memory footprint, and sizes
//! the grid so that every compute unit is filled but no program is launched
//! without a row to process.
//!
//! ```
//! use smax_common::Matrix;
//! use smax_kernels::{HostDevice, softmax};
//!
//! let input = Matrix::from_vec(2, 3, vec![1.0f32, 2.0, 3.0, 0.0, 0.0, 0.0])?;
//! let output = softmax(&input, &HostDevice::mock())?;
//! assert!((output.row(1)[0] - 1.0 / 3.0).abs() < 1e-6);
//! # Ok::<(), smax_common::SmaxError>(())
//! ```

pub mod device;
pub mod footprint;
pub mod host;
pub mod kernel;
pub mod planner;
pub mod reference;
pub mod softmax;

#[cfg(feature = "cuda")]
pub mod gpu;

pub use device::SoftmaxDevice;
pub use footprint::KernelFootprint;
pub use host::{HostDevice, HostStats};
pub use kernel::KernelSpec;
pub use planner::{LaunchPlan, LaunchPlanner, Occupancy, occupancy};
pub use reference::{Comparison, Tolerance, softmax_rows, validate_against_reference};
pub use softmax::{Softmax, execute, softmax};

#[cfg(feature = "cuda")]
pub use gpu::CudaDevice;
