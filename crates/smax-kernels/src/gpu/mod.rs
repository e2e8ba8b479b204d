//! Accelerator devices.

pub mod cuda;

pub use cuda::CudaDevice;
