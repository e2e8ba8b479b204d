//! Support helpers for smax kernel tests
#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use smax_common::{Element, Matrix};

/// Seed of the canonical regression input.
pub const REGRESSION_SEED: u64 = 0x5eed_0781;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Standard-normal samples via Box–Muller.
pub fn randn<T: Element>(len: usize, seed: u64) -> Vec<T> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        // (0, 1] keeps ln away from zero
        let u1 = 1.0 - rng.random::<f64>();
        let u2 = rng.random::<f64>();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        out.push(T::from(r * theta.cos()).unwrap());
        if out.len() < len {
            out.push(T::from(r * theta.sin()).unwrap());
        }
    }
    out
}

/// Contiguous standard-normal matrix.
pub fn randn_matrix<T: Element>(n_rows: usize, n_cols: usize, seed: u64) -> Matrix<T> {
    Matrix::from_vec(n_rows, n_cols, randn(n_rows * n_cols, seed)).unwrap()
}

/// Standard-normal matrix with a padded stride; padding holds `pad`.
pub fn randn_strided<T: Element>(
    n_rows: usize,
    n_cols: usize,
    row_stride: usize,
    pad: T,
    seed: u64,
) -> Matrix<T> {
    let values = randn::<T>(n_rows * n_cols, seed);
    let mut data = vec![pad; n_rows * row_stride];
    for (r, row) in values.chunks(n_cols.max(1)).enumerate().take(n_rows) {
        data[r * row_stride..r * row_stride + n_cols].copy_from_slice(row);
    }
    Matrix::with_stride(n_rows, n_cols, row_stride, data).unwrap()
}

/// Every live row sums to one within `tol`.
pub fn assert_rows_sum_to_one<T: Element>(m: &Matrix<T>, tol: f64) {
    for (r, row) in m.rows().enumerate() {
        let sum: f64 = row.iter().map(|v| v.to_f64().unwrap()).sum();
        assert!((sum - 1.0).abs() <= tol, "row {} sums to {}", r, sum);
    }
}
