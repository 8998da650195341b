//! Entry points used by solver drivers: build a participant's matrix from the
//! input stream, multiply with it, and throw it away.

use std::io::BufRead;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::comm::Communicator;
use crate::config::{ExchangeLimits, KernelMode};
use crate::error::{Result, SpmvError};
use crate::halo::make_local_matrix;
use crate::io::{read_system, LocalSystem};
use crate::matrix::SparseMatrix;
use crate::parallel_ops::sparsemv;
use crate::Vector;

/// Reads this participant's rows and builds their communication plan.
/// Collective: every participant of `comm` has to call it on the same stream.
pub fn build<R: BufRead, C: Communicator>(
    source: R,
    comm: &C,
    limits: &ExchangeLimits,
) -> Result<LocalSystem> {
    let LocalSystem {
        matrix,
        x,
        b,
        x_exact,
    } = read_system(source, comm.rank(), comm.size())?;
    let matrix = make_local_matrix(matrix, comm, limits)?;
    Ok(LocalSystem {
        matrix,
        x,
        b,
        x_exact,
    })
}

/// `y = A x`. `x` holds `local_ncol` entries; its external slots are
/// overwritten by the halo exchange. Collective when `matrix` has neighbors.
pub fn multiply<C: Communicator>(matrix: &SparseMatrix, comm: &C, x: &mut Vector) -> Result<Vector> {
    multiply_with(matrix, comm, x, KernelMode::default())
}

pub fn multiply_with<C: Communicator>(
    matrix: &SparseMatrix,
    comm: &C,
    x: &mut Vector,
    mode: KernelMode,
) -> Result<Vector> {
    let x = contiguous(x)?;
    exchange(matrix, comm, x)?;
    kernel(matrix, x, mode)
}

fn contiguous(x: &mut Vector) -> Result<&mut [f64]> {
    x.as_slice_mut()
        .ok_or_else(|| SpmvError::invalid_argument("x", "must be contiguous"))
}

fn exchange<C: Communicator>(matrix: &SparseMatrix, comm: &C, x: &mut [f64]) -> Result<()> {
    if matrix.halo().has_neighbors() {
        matrix.halo().exchange_externals(comm, x)?;
    }
    Ok(())
}

fn kernel(matrix: &SparseMatrix, x: &[f64], mode: KernelMode) -> Result<Vector> {
    let mut y = vec![0.0; matrix.local_nrow()];
    sparsemv(matrix, x, &mut y, mode)?;
    Ok(Vector::from(y))
}

/// Releases the matrix and every buffer it owns.
pub fn destroy(matrix: SparseMatrix) {
    drop(matrix);
}

/// Work done by a `DistributedOperator` so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorCounters {
    pub multiplies: u64,
    pub exchange_time: Duration,
    pub kernel_time: Duration,
    /// Two flops per stored nonzero per multiply.
    pub flops: u64,
}

impl OperatorCounters {
    pub fn total_time(&self) -> Duration {
        self.exchange_time + self.kernel_time
    }

    pub fn mflops(&self) -> f64 {
        let secs = self.total_time().as_secs_f64();
        if secs > 0.0 {
            self.flops as f64 / secs / 1.0e6
        } else {
            0.0
        }
    }
}

/// A matrix bound to its communicator, counting the time spent exchanging and
/// multiplying.
pub struct DistributedOperator<C> {
    matrix: SparseMatrix,
    comm: C,
    mode: KernelMode,
    counters: OperatorCounters,
}

impl<C: Communicator> DistributedOperator<C> {
    pub fn new(matrix: SparseMatrix, comm: C, mode: KernelMode) -> Result<Self> {
        if !matrix.is_local() {
            return Err(SpmvError::invalid_argument(
                "matrix",
                "column indices are still global, build the communication plan first",
            ));
        }
        Ok(Self {
            matrix,
            comm,
            mode,
            counters: OperatorCounters::default(),
        })
    }

    pub fn matrix(&self) -> &SparseMatrix {
        &self.matrix
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn counters(&self) -> &OperatorCounters {
        &self.counters
    }

    pub fn apply(&mut self, x: &mut Vector) -> Result<Vector> {
        let x = contiguous(x)?;

        let timer = Instant::now();
        exchange(&self.matrix, &self.comm, x)?;
        self.counters.exchange_time += timer.elapsed();

        let timer = Instant::now();
        let y = kernel(&self.matrix, x, self.mode)?;
        self.counters.kernel_time += timer.elapsed();

        self.counters.multiplies += 1;
        self.counters.flops += 2 * self.matrix.local_nnz() as u64;
        Ok(y)
    }

    pub fn into_parts(self) -> (SparseMatrix, C, OperatorCounters) {
        (self.matrix, self.comm, self.counters)
    }
}
