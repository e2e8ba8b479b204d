//! Common types for the smax row-softmax kernels.
//!
//! This crate provides the matrix layout, element types, device capability
//! description, launch policy and error taxonomy shared by the kernel and
//! planner crates.

pub mod device;
pub mod element;
pub mod error;
pub mod matrix;
pub mod policy;

pub use device::DeviceCapabilities;
pub use element::{DType, Element};
pub use error::{ErrorKind, KernelError, Result, SmaxError};
pub use matrix::{Matrix, MatrixShape};
pub use policy::{LaunchPolicy, PolicyConfigError, WarpStep};
