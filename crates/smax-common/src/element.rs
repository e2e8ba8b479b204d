//! Numeric element types accepted by the softmax kernel.

use std::fmt;

use bytemuck::Pod;
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Runtime tag for an [`Element`] type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
}

impl DType {
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }

    /// C type name used when specializing device source.
    pub const fn cuda_type(self) -> &'static str {
        match self {
            Self::F32 => "float",
            Self::F64 => "double",
        }
    }

    /// Number of 32-bit registers one value occupies.
    pub const fn register_words(self) -> u32 {
        match self {
            Self::F32 => 1,
            Self::F64 => 2,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A floating-point type the kernel can be specialized for.
///
/// Exactly one element type is used per call; there is no mixed precision.
pub trait Element: Float + Pod + Send + Sync + fmt::Debug + fmt::Display + 'static {
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_sizes_match_rust_types() {
        assert_eq!(f32::DTYPE.size_bytes(), std::mem::size_of::<f32>());
        assert_eq!(f64::DTYPE.size_bytes(), std::mem::size_of::<f64>());
    }

    #[test]
    fn test_dtype_names() {
        assert_eq!(DType::F32.to_string(), "f32");
        assert_eq!(DType::F64.cuda_type(), "double");
        assert_eq!(DType::F64.register_words(), 2);
    }
}
