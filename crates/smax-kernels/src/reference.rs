//! Sequential reference softmax and tolerance-based comparison.

use smax_common::{Element, Matrix};

/// Row-wise softmax computed directly on the host, one row at a time.
///
/// Returns a contiguous matrix regardless of the input stride.
pub fn softmax_rows<T: Element>(input: &Matrix<T>) -> Matrix<T> {
    let mut output = Matrix::zeros(input.n_rows(), input.n_cols());
    let n_cols = input.n_cols();
    if n_cols == 0 {
        return output;
    }
    for (row_in, row_out) in input.rows().zip(output.as_mut_slice().chunks_mut(n_cols)) {
        // Pass 1: row max
        let row_max = row_in.iter().copied().fold(T::neg_infinity(), T::max);

        // Pass 2: shifted exp + sum
        let mut sum = T::zero();
        for (out, &x) in row_out.iter_mut().zip(row_in) {
            let e = (x - row_max).exp();
            *out = e;
            sum = sum + e;
        }

        // Pass 3: normalise
        if sum > T::zero() {
            let inv_sum = T::one() / sum;
            for val in row_out.iter_mut() {
                *val = *val * inv_sum;
            }
        }
    }
    output
}

/// Element-wise closeness bound: `|actual - expected| <= atol + rtol * |expected|`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub atol: f64,
    pub rtol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { atol: 1e-3, rtol: 1e-3 }
    }
}

/// Summary of an element-wise comparison.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Comparison {
    pub max_abs_diff: f64,
    pub max_rel_diff: f64,
    pub mismatches: usize,
    pub compared: usize,
}

impl Comparison {
    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

/// Compare the live elements of two equally shaped matrices.
///
/// Shapes that differ in rows or columns count every element of the larger
/// one as a mismatch.
pub fn compare<T: Element>(actual: &Matrix<T>, expected: &Matrix<T>, tol: Tolerance) -> Comparison {
    if actual.n_rows() != expected.n_rows() || actual.n_cols() != expected.n_cols() {
        let larger = (actual.n_rows() * actual.n_cols()).max(expected.n_rows() * expected.n_cols());
        return Comparison { mismatches: larger.max(1), ..Comparison::default() };
    }

    let mut cmp = Comparison::default();
    for (a_row, e_row) in actual.rows().zip(expected.rows()) {
        for (&a, &e) in a_row.iter().zip(e_row) {
            let (a, e) = (a.to_f64().unwrap_or(f64::NAN), e.to_f64().unwrap_or(f64::NAN));
            let abs = (a - e).abs();
            let rel = if e != 0.0 { abs / e.abs() } else { abs };
            cmp.compared += 1;
            // NaN never satisfies the bound
            if !(abs <= tol.atol + tol.rtol * e.abs()) {
                cmp.mismatches += 1;
            }
            if abs.is_nan() {
                cmp.max_abs_diff = f64::NAN;
                cmp.max_rel_diff = f64::NAN;
            } else {
                cmp.max_abs_diff = cmp.max_abs_diff.max(abs);
                cmp.max_rel_diff = cmp.max_rel_diff.max(rel);
            }
        }
    }
    cmp
}

/// Compare a device result against [`softmax_rows`] of its input.
pub fn validate_against_reference<T: Element>(
    input: &Matrix<T>,
    actual: &Matrix<T>,
    tol: Tolerance,
) -> Comparison {
    let cmp = compare(actual, &softmax_rows(input), tol);
    log::debug!(
        "reference check {}x{}: max abs {:.3e}, max rel {:.3e}, {} of {} mismatched",
        input.n_rows(),
        input.n_cols(),
        cmp.max_abs_diff,
        cmp.max_rel_diff,
        cmp.mismatches,
        cmp.compared
    );
    cmp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_uniform_row() {
        let m = Matrix::from_vec(1, 4, vec![3.0f32; 4]).unwrap();
        assert_eq!(softmax_rows(&m).as_slice(), &[0.25; 4]);
    }

    #[test]
    fn test_reference_drops_padding() {
        let m = Matrix::with_stride(2, 2, 3, vec![0.0f64, 0.0, 7.0, 1.0, 1.0]).unwrap();
        let out = softmax_rows(&m);
        assert_eq!(out.row_stride(), 2);
        assert_eq!(out.as_slice(), &[0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_compare_tolerance_bound() {
        let e = Matrix::from_vec(1, 2, vec![1.0f32, 0.0]).unwrap();
        let close = Matrix::from_vec(1, 2, vec![1.0015f32, 0.0005]).unwrap();
        let far = Matrix::from_vec(1, 2, vec![1.0f32, 0.01]).unwrap();
        assert!(compare(&close, &e, Tolerance::default()).passed());
        let cmp = compare(&far, &e, Tolerance::default());
        assert_eq!(cmp.mismatches, 1);
        assert!((cmp.max_abs_diff - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_validate_against_reference_accepts_reference() {
        let input = Matrix::from_vec(2, 3, vec![0.1f64, 0.2, 0.3, -5.0, 0.0, 5.0]).unwrap();
        let cmp = validate_against_reference(&input, &softmax_rows(&input), Tolerance::default());
        assert!(cmp.passed());
        assert_eq!(cmp.compared, 6);
        assert_eq!(cmp.max_abs_diff, 0.0);
    }

    #[test]
    fn test_compare_nan_fails() {
        let e = Matrix::from_vec(1, 1, vec![0.5f32]).unwrap();
        let a = Matrix::from_vec(1, 1, vec![f32::NAN]).unwrap();
        assert!(!compare(&a, &e, Tolerance::default()).passed());
    }

    #[test]
    fn test_compare_shape_mismatch_fails() {
        let a = Matrix::<f32>::zeros(2, 2);
        let e = Matrix::<f32>::zeros(2, 3);
        assert!(!compare(&a, &e, Tolerance::default()).passed());
    }
}
