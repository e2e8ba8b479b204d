//! Per-program resource footprint of a specialized kernel.

use std::fmt;

use crate::kernel::KernelSpec;

/// Registers and on-chip memory consumed by one program of a compiled
/// kernel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelFootprint {
    /// 32-bit registers allocated per thread.
    pub registers_per_thread: u32,
    /// Static shared memory per program in bytes.
    pub shared_memory_bytes: u32,
}

/// Registers the host code-generation model charges before any row data:
/// indices, pointers, loop state and the two reduction accumulators.
const BASE_REGISTERS: u32 = 24;

/// Hardware cap on registers per thread.
pub const MAX_REGISTERS_PER_THREAD: u32 = 255;

impl KernelFootprint {
    pub const fn new(registers_per_thread: u32, shared_memory_bytes: u32) -> Self {
        Self { registers_per_thread, shared_memory_bytes }
    }

    /// Analytic footprint of the row-softmax kernel for a host-simulated
    /// device.
    ///
    /// Every thread holds `ceil(block_size / threads)` lanes in registers; the
    /// program stages the row block plus one reduction slot per warp in
    /// shared memory. The pipeline depth does not enter the estimate.
    pub fn estimate(spec: &KernelSpec, warp_size: u32) -> Self {
        let threads = spec.threads_per_program(warp_size).max(1);
        let lanes_per_thread = spec.block_size.div_ceil(threads);
        let registers = lanes_per_thread
            .saturating_mul(spec.dtype.register_words())
            .saturating_add(BASE_REGISTERS)
            .min(MAX_REGISTERS_PER_THREAD);

        let slots = u64::from(spec.block_size) + u64::from(spec.num_warps);
        let shared = slots.saturating_mul(spec.dtype.size_bytes() as u64);

        Self {
            registers_per_thread: registers,
            shared_memory_bytes: u32::try_from(shared).unwrap_or(u32::MAX),
        }
    }
}

impl fmt::Display for KernelFootprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} regs/thread, {} B shared", self.registers_per_thread, self.shared_memory_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smax_common::DType;

    fn spec(block_size: u32, num_warps: u32, dtype: DType) -> KernelSpec {
        KernelSpec { block_size, num_warps, num_stages: 2, dtype }
    }

    #[test]
    fn test_estimate_canonical_block() {
        // 1024 lanes over 4 warps x 32 = 128 threads -> 8 lanes per thread.
        let fp = KernelFootprint::estimate(&spec(1024, 4, DType::F32), 32);
        assert_eq!(fp.registers_per_thread, 32);
        assert_eq!(fp.shared_memory_bytes, (1024 + 4) * 4);
    }

    #[test]
    fn test_f64_doubles_register_words_and_bytes() {
        let f32_fp = KernelFootprint::estimate(&spec(1024, 4, DType::F32), 32);
        let f64_fp = KernelFootprint::estimate(&spec(1024, 4, DType::F64), 32);
        assert_eq!(f64_fp.registers_per_thread, 24 + 16);
        assert_eq!(f64_fp.shared_memory_bytes, 2 * f32_fp.shared_memory_bytes);
    }

    #[test]
    fn test_registers_clamped() {
        let fp = KernelFootprint::estimate(&spec(1 << 17, 16, DType::F32), 32);
        assert_eq!(fp.registers_per_thread, MAX_REGISTERS_PER_THREAD);
    }

    #[test]
    fn test_stages_do_not_change_estimate() {
        let shallow = spec(4096, 16, DType::F32);
        let deep = KernelSpec { num_stages: 4, ..shallow };
        assert_eq!(KernelFootprint::estimate(&shallow, 32), KernelFootprint::estimate(&deep, 32));
    }

    #[test]
    fn test_tiny_block_still_charges_base_registers() {
        let fp = KernelFootprint::estimate(&spec(1, 4, DType::F32), 32);
        assert_eq!(fp.registers_per_thread, BASE_REGISTERS + 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(KernelFootprint::new(32, 4112).to_string(), "32 regs/thread, 4112 B shared");
    }
}
