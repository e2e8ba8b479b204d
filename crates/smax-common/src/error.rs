//! Error types shared across the smax workspace.
//!
//! Every failure reaches the caller of the public entry point synchronously.
//! There is no retry anywhere: shape and resource failures are structural and
//! device failures are not generally transient.

use thiserror::Error;

use crate::policy::PolicyConfigError;

/// Top-level error for smax operations.
#[derive(Debug, Error)]
pub enum SmaxError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("launch policy error: {0}")]
    Config(#[from] PolicyConfigError),
}

/// Coarse classification of [`KernelError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input layout cannot be processed.
    InvalidShape,
    /// The kernel footprint does not fit a single compute unit.
    ResourceExhausted,
    /// The device or its runtime failed during compile, transfer or execution.
    DeviceFailure,
}

/// Errors raised by planning and executing the softmax kernel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("invalid shape: {reason}")]
    InvalidShape { reason: String },

    #[error(
        "kernel footprint exceeds one compute unit: {registers_per_thread} regs/thread x \
         {threads_per_program} threads fits {register_limited} per unit, \
         {shared_memory_bytes} B shared fits {memory_limited} per unit"
    )]
    ResourceExhausted {
        registers_per_thread: u32,
        threads_per_program: u32,
        shared_memory_bytes: u32,
        register_limited: u32,
        memory_limited: u32,
    },

    #[error("device failure: {reason}")]
    DeviceFailure { reason: String },

    #[error("no compute device available")]
    NoDevice,
}

impl KernelError {
    /// Shorthand for an [`KernelError::InvalidShape`] with a formatted reason.
    pub fn invalid_shape(reason: impl Into<String>) -> Self {
        Self::InvalidShape { reason: reason.into() }
    }

    /// Shorthand for a [`KernelError::DeviceFailure`] with a formatted reason.
    pub fn device(reason: impl Into<String>) -> Self {
        Self::DeviceFailure { reason: reason.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidShape { .. } => ErrorKind::InvalidShape,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::DeviceFailure { .. } | Self::NoDevice => ErrorKind::DeviceFailure,
        }
    }
}

impl SmaxError {
    /// The kernel error classification, if this is a kernel error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Kernel(e) => Some(e.kind()),
            Self::Config(_) => None,
        }
    }
}

/// Result alias used throughout smax.
pub type Result<T> = std::result::Result<T, SmaxError>;
