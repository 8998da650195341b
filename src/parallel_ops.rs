//! The local sparse matrix-vector product. This is the hot loop of every
//! solve, so rows are spread over the rayon pool. Each row is accumulated
//! sequentially in stored order, which keeps the result bit-identical between
//! the serial and parallel paths and across runs.

use rayon::prelude::*;

use crate::config::KernelMode;
use crate::error::{Result, SpmvError};
use crate::matrix::SparseMatrix;

#[inline]
fn row_dot(a: &SparseMatrix, row: usize, x: &[f64]) -> f64 {
    let (cols, vals) = a.row(row);
    let mut sum = 0.0;
    for (&j, &v) in cols.iter().zip(vals) {
        sum += v * x[j];
    }
    sum
}

/// `y = A x` over the local rows of `a`. External slots of `x` must already
/// hold current values (see `HaloPlan::exchange_externals`).
pub fn sparsemv(a: &SparseMatrix, x: &[f64], y: &mut [f64], mode: KernelMode) -> Result<()> {
    if !a.is_local() {
        return Err(SpmvError::invalid_argument(
            "a",
            "column indices are still global, build the communication plan first",
        ));
    }
    if x.len() < a.local_ncol() {
        return Err(SpmvError::invalid_argument(
            "x",
            format!("length {} is shorter than the {} local columns", x.len(), a.local_ncol()),
        ));
    }
    if y.len() != a.local_nrow() {
        return Err(SpmvError::invalid_argument(
            "y",
            format!("length {} does not match the {} local rows", y.len(), a.local_nrow()),
        ));
    }

    match mode {
        KernelMode::Serial => y
            .iter_mut()
            .enumerate()
            .for_each(|(i, yi)| *yi = row_dot(a, i, x)),
        KernelMode::Parallel => y
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, yi)| *yi = row_dot(a, i, x)),
    }
    Ok(())
}
