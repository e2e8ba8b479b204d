//! Row-softmax kernel body.
//!
//! # Kernel strategy
//!
//! Program `pid` of `num_programs` owns rows `pid, pid + num_programs, …`, so
//! every row is covered exactly once and programs never synchronize. For each
//! owned row the program:
//!
//! 1. Loads `block_size` lanes into its on-chip buffer. Lanes at or past
//!    `n_cols` are loaded as `-inf`, which is the identity for max and
//!    exponentiates to zero.
//! 2. Reduces the lanes to the row max. Subtracting it keeps `exp` from
//!    overflowing for large-magnitude rows.
//! 3. Exponentiates the shifted lanes and reduces them to the denominator.
//! 4. Divides and stores, with the same mask suppressing writes past `n_cols`.
//!
//! Each row is read from the input once and written to the output once.
//! Reductions follow the device shape: every thread folds a strided subset of
//! lanes, then the per-thread partials are combined pairwise.

use std::collections::VecDeque;

use smax_common::{DType, Element, KernelError};

/// Specialization key for one compiled kernel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelSpec {
    /// Lanes per row block; the smallest power of two `>= n_cols`.
    pub block_size: u32,
    /// Warps cooperating on one row.
    pub num_warps: u32,
    /// Rows prefetched ahead of use. Performance only.
    pub num_stages: u32,
    pub dtype: DType,
}

impl KernelSpec {
    pub fn threads_per_program(&self, warp_size: u32) -> u32 {
        self.num_warps.saturating_mul(warp_size)
    }
}

/// Smallest power of two `>= n_cols`, as a kernel block size.
pub fn block_size_for(n_cols: usize) -> Result<u32, KernelError> {
    n_cols
        .max(1)
        .checked_next_power_of_two()
        .and_then(|b| u32::try_from(b).ok())
        .ok_or_else(|| {
            KernelError::invalid_shape(format!("n_cols {n_cols} exceeds the largest block size"))
        })
}

/// Launch-wide arguments, identical for every program.
#[derive(Debug, Clone, Copy)]
pub struct RowSoftmaxArgs {
    pub n_rows: usize,
    pub n_cols: usize,
    pub in_stride: usize,
    pub out_stride: usize,
    pub block_size: usize,
    pub threads: usize,
    pub num_stages: usize,
}

/// On-chip state of one program: the row block and the per-thread partials.
pub struct ProgramScratch<T> {
    block: Vec<T>,
    partials: Vec<T>,
}

impl<T: Element> ProgramScratch<T> {
    pub fn new(args: &RowSoftmaxArgs) -> Self {
        Self {
            block: vec![T::neg_infinity(); args.block_size],
            partials: vec![T::zero(); args.threads.max(1)],
        }
    }
}

/// Execute program `pid` over the output rows it owns.
///
/// `rows` holds `(row_index, output_row)` pairs in increasing row order; each
/// output row slice starts at `row_index * out_stride`. Only the first
/// `n_cols` lanes of a row slice are ever written.
pub fn row_softmax_program<T: Element>(
    pid: usize,
    input: &[T],
    rows: Vec<(usize, &mut [T])>,
    args: &RowSoftmaxArgs,
    scratch: &mut ProgramScratch<T>,
) {
    let depth = args.num_stages.max(1);
    let mut pending = rows.into_iter();
    let mut staged: VecDeque<(usize, &mut [T], &[T])> = VecDeque::with_capacity(depth);

    log::trace!("program {pid}: start, {} stage(s)", depth);
    loop {
        while staged.len() < depth {
            let Some((row_idx, out)) = pending.next() else { break };
            let base = row_idx * args.in_stride;
            staged.push_back((row_idx, out, &input[base..base + args.n_cols]));
        }
        let Some((row_idx, out, row_in)) = staged.pop_front() else { break };
        debug_assert!(row_idx < args.n_rows);
        softmax_row(row_in, out, args, scratch);
    }
}

fn softmax_row<T: Element>(
    row_in: &[T],
    out: &mut [T],
    args: &RowSoftmaxArgs,
    scratch: &mut ProgramScratch<T>,
) {
    let ProgramScratch { block, partials } = scratch;

    for (col, lane) in block.iter_mut().enumerate() {
        *lane = if col < args.n_cols { row_in[col] } else { T::neg_infinity() };
    }

    let row_max = block_reduce(block, partials, T::neg_infinity(), T::max);

    for lane in block.iter_mut() {
        *lane = (*lane - row_max).exp();
    }
    let denominator = block_reduce(block, partials, T::zero(), |a, b| a + b);

    for (col, lane) in block.iter().enumerate() {
        if col < args.n_cols {
            out[col] = *lane / denominator;
        }
    }
}

/// Two-level reduction: strided per-thread fold, then a pairwise tree over
/// the partials.
fn block_reduce<T: Element>(
    block: &[T],
    partials: &mut [T],
    identity: T,
    op: impl Fn(T, T) -> T,
) -> T {
    let threads = partials.len();
    for (t, partial) in partials.iter_mut().enumerate() {
        *partial = block.iter().skip(t).step_by(threads).fold(identity, |acc, &v| op(acc, v));
    }
    let mut width = threads;
    while width > 1 {
        let half = width / 2;
        for t in 0..half {
            partials[t] = op(partials[t], partials[t + half]);
        }
        if width % 2 == 1 {
            partials[0] = op(partials[0], partials[width - 1]);
        }
        width = half;
    }
    partials[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(n_rows: usize, n_cols: usize, threads: usize) -> RowSoftmaxArgs {
        RowSoftmaxArgs {
            n_rows,
            n_cols,
            in_stride: n_cols,
            out_stride: n_cols,
            block_size: block_size_for(n_cols).unwrap() as usize,
            threads,
            num_stages: 2,
        }
    }

    #[test]
    fn test_block_size_is_next_power_of_two() {
        assert_eq!(block_size_for(1).unwrap(), 1);
        assert_eq!(block_size_for(781).unwrap(), 1024);
        assert_eq!(block_size_for(1024).unwrap(), 1024);
        assert_eq!(block_size_for(1025).unwrap(), 2048);
        assert_eq!(block_size_for(0).unwrap(), 1);
    }

    #[test]
    fn test_block_size_overflow_is_invalid_shape() {
        let err = block_size_for(usize::MAX).unwrap_err();
        assert_eq!(err.kind(), smax_common::ErrorKind::InvalidShape);
    }

    #[test]
    fn test_block_reduce_matches_sequential() {
        let block: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin()).collect();
        for threads in [1usize, 2, 3, 8, 64, 128] {
            let mut partials = vec![0.0f32; threads];
            let sum = block_reduce(&block, &mut partials, 0.0, |a, b| a + b);
            let max = block_reduce(&block, &mut partials, f32::NEG_INFINITY, f32::max);
            let expected_sum: f32 = block.iter().sum();
            let expected_max = block.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            assert!((sum - expected_sum).abs() < 1e-4, "threads={threads}");
            assert_eq!(max, expected_max, "threads={threads}");
        }
    }

    #[test]
    fn test_program_masks_padding_lanes() {
        // 5 live columns in a block of 8; output rows carry 3 sentinel lanes.
        let a = RowSoftmaxArgs { out_stride: 8, ..args(1, 5, 4) };
        let input = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        let mut out = [f32::NAN; 8];
        let mut scratch = ProgramScratch::new(&a);
        row_softmax_program(0, &input, vec![(0, &mut out[..])], &a, &mut scratch);

        let sum: f32 = out[..5].iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum={sum}");
        assert!(out[5..].iter().all(|v| v.is_nan()), "padding lanes were written");
    }

    #[test]
    fn test_program_handles_strided_rows() {
        let a = RowSoftmaxArgs { in_stride: 4, out_stride: 4, ..args(3, 2, 2) };
        let input = [0.0f64, 0.0, 99.0, 99.0, 1.0, 1.0, 99.0, 99.0, 0.0, 10.0];
        let mut output = vec![-1.0f64; 10];
        let (row0, rest) = output.split_at_mut(4);
        let (_row1, row2) = rest.split_at_mut(4);
        let mut scratch = ProgramScratch::new(&a);
        // program 0 of 2 owns rows 0 and 2
        row_softmax_program(0, &input, vec![(0, row0), (2, row2)], &a, &mut scratch);

        assert_eq!(&output[0..2], &[0.5, 0.5]);
        assert_eq!(&output[2..4], &[-1.0, -1.0]);
        assert_eq!(&output[4..6], &[-1.0, -1.0], "row 1 belongs to program 1");
        assert!(output[9] > 0.9999 && output[8] < 1e-4);
    }

    #[test]
    fn test_large_magnitude_row_is_stable() {
        let a = args(1, 4, 4);
        let input = [1e8f32, -1e8, 1e8, 0.0];
        let mut out = [0.0f32; 4];
        let mut scratch = ProgramScratch::new(&a);
        row_softmax_program(0, &input, vec![(0, &mut out[..])], &a, &mut scratch);
        assert!(out.iter().all(|v| v.is_finite()));
        assert!((out[0] - 0.5).abs() < 1e-6 && (out[2] - 0.5).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_stage_depth_does_not_change_results() {
        let n_cols = 33;
        let input: Vec<f32> = (0..n_cols * 5).map(|i| ((i * 7) % 13) as f32 - 6.0).collect();
        let mut baseline = vec![0.0f32; input.len()];
        for stages in [1usize, 2, 4, 8] {
            let a = RowSoftmaxArgs { num_stages: stages, ..args(5, n_cols, 32) };
            let mut output = vec![0.0f32; input.len()];
            let rows: Vec<(usize, &mut [f32])> = output.chunks_mut(n_cols).enumerate().collect();
            let mut scratch = ProgramScratch::new(&a);
            row_softmax_program(0, &input, rows, &a, &mut scratch);
            if stages == 1 {
                baseline = output;
            } else {
                assert_eq!(output, baseline, "stages={stages}");
            }
        }
    }
}
