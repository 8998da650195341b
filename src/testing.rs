//! Matrix fixtures shared by the unit tests.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sprs::TriMat;

use crate::matrix::SparseMatrix;
use crate::partitioner::RowPartition;
use crate::CsrMatrix;

pub type Rows = Vec<Vec<(usize, f64)>>;

/// Diagonal 2, off-diagonals -1.
pub fn tridiagonal(n: usize) -> Rows {
    (0..n)
        .map(|i| {
            let mut row = Vec::with_capacity(3);
            if i > 0 {
                row.push((i - 1, -1.0));
            }
            row.push((i, 2.0));
            if i + 1 < n {
                row.push((i + 1, -1.0));
            }
            row
        })
        .collect()
}

/// Square matrix with a diagonal and up to `max_off_diagonal` other entries
/// per row, columns shuffled within each row. Not symmetric.
pub fn random_rows(n: usize, max_off_diagonal: usize, seed: u64) -> Rows {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let count = rng.gen_range(0..=max_off_diagonal);
            let mut cols: BTreeSet<usize> = (0..count).map(|_| rng.gen_range(0..n)).collect();
            cols.insert(i);
            let mut row: Vec<(usize, f64)> = cols
                .into_iter()
                .map(|j| (j, rng.gen_range(-4.0..4.0)))
                .collect();
            row.shuffle(&mut rng);
            row
        })
        .collect()
}

/// Rows owned by `rank` out of `size`, with global column indices.
pub fn slice_for(rows: &Rows, rank: usize, size: usize) -> SparseMatrix {
    let partition = RowPartition::new(rows.len(), size).unwrap();
    let range = partition.row_range(rank);
    let mut offsets = vec![0];
    let mut indices = Vec::new();
    let mut values = Vec::new();
    for row in &rows[range.clone()] {
        for &(j, v) in row {
            indices.push(j);
            values.push(v);
        }
        offsets.push(indices.len());
    }
    let total_nnz = rows.iter().map(|r| r.len() as u64).sum();
    SparseMatrix::from_global_rows(rows.len(), total_nnz, range.start, offsets, indices, values)
        .unwrap()
}

pub fn global_csr(rows: &Rows) -> CsrMatrix {
    let n = rows.len();
    let mut triplets = TriMat::new((n, n));
    for (i, row) in rows.iter().enumerate() {
        for &(j, v) in row {
            triplets.add_triplet(i, j, v);
        }
    }
    triplets.to_csr::<usize>()
}

/// `A x` row by row through the sprs CSR form of `rows`.
pub fn reference_product(rows: &Rows, x: &[f64]) -> Vec<f64> {
    global_csr(rows)
        .outer_iterator()
        .map(|row| row.iter().map(|(j, &v)| v * x[j]).sum())
        .collect()
}
