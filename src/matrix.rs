//! Row-local slice of a distributed sparse matrix.
//!
//! Rows are ragged: each has its own number of nonzeros. They are stored in
//! one flat `values` buffer and one flat `indices` buffer with a row offset
//! table of length `local_nrow + 1`, so a row is always a pair of bounds
//! checked slices and the whole structure is owned (and freed) as one unit.

use std::ops::Range;

use sprs::TriMat;

use crate::error::{Result, SpmvError};
use crate::halo::HaloPlan;
use crate::{CsrMatrix, Vector};

/// Which numbering the stored column indices are in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnNumbering {
    /// Straight from the input stream, `0..total_nrow`.
    Global,
    /// Local rows first, then external slots. Set by `halo::make_local_matrix`.
    Local,
}

#[derive(Debug, Clone)]
pub struct SparseMatrix {
    total_nrow: usize,
    total_nnz: u64,
    start_row: usize,
    local_nrow: usize,
    local_ncol: usize,
    row_offsets: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
    numbering: ColumnNumbering,
    halo: HaloPlan,
}

impl SparseMatrix {
    /// Assembles a row slice whose column indices are still global.
    ///
    /// `row_offsets[i]..row_offsets[i + 1]` delimits row `i` in `indices` and
    /// `values`. The slice covers global rows `start_row..start_row + row_offsets.len() - 1`.
    pub fn from_global_rows(
        total_nrow: usize,
        total_nnz: u64,
        start_row: usize,
        row_offsets: Vec<usize>,
        indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self> {
        if row_offsets.first() != Some(&0) {
            return Err(SpmvError::invalid_argument(
                "row_offsets",
                "must start with 0",
            ));
        }
        if row_offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(SpmvError::invalid_argument(
                "row_offsets",
                "must be non-decreasing",
            ));
        }
        if indices.len() != values.len() {
            return Err(SpmvError::invalid_argument(
                "indices",
                format!(
                    "{} indices but {} values",
                    indices.len(),
                    values.len()
                ),
            ));
        }
        let local_nnz = *row_offsets.last().unwrap_or(&0);
        if local_nnz != indices.len() {
            return Err(SpmvError::invalid_argument(
                "row_offsets",
                format!(
                    "last offset {} does not match {} stored entries",
                    local_nnz,
                    indices.len()
                ),
            ));
        }
        let local_nrow = row_offsets.len() - 1;
        if start_row + local_nrow > total_nrow {
            return Err(SpmvError::invalid_argument(
                "start_row",
                format!(
                    "rows {}..{} exceed the global row count {}",
                    start_row,
                    start_row + local_nrow,
                    total_nrow
                ),
            ));
        }
        if let Some(&col) = indices.iter().find(|&&col| col >= total_nrow) {
            return Err(SpmvError::invalid_argument(
                "indices",
                format!("column {} out of range for {} columns", col, total_nrow),
            ));
        }

        Ok(Self {
            total_nrow,
            total_nnz,
            start_row,
            local_nrow,
            local_ncol: local_nrow,
            row_offsets,
            indices,
            values,
            numbering: ColumnNumbering::Global,
            halo: HaloPlan::empty(local_nrow),
        })
    }

    pub fn total_nrow(&self) -> usize {
        self.total_nrow
    }

    pub fn total_nnz(&self) -> u64 {
        self.total_nnz
    }

    pub fn start_row(&self) -> usize {
        self.start_row
    }

    /// Last owned global row, `None` for an empty slice.
    pub fn stop_row(&self) -> Option<usize> {
        if self.local_nrow == 0 {
            None
        } else {
            Some(self.start_row + self.local_nrow - 1)
        }
    }

    pub fn row_range(&self) -> Range<usize> {
        self.start_row..self.start_row + self.local_nrow
    }

    pub fn local_nrow(&self) -> usize {
        self.local_nrow
    }

    /// Length the vector handed to the kernel must have: local rows plus
    /// external slots.
    pub fn local_ncol(&self) -> usize {
        self.local_ncol
    }

    pub fn local_nnz(&self) -> usize {
        self.values.len()
    }

    pub fn nnz_in_row(&self, row: usize) -> usize {
        self.row_offsets[row + 1] - self.row_offsets[row]
    }

    /// Column indices and values of local row `row`, in stored order.
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let span = self.row_offsets[row]..self.row_offsets[row + 1];
        (&self.indices[span.clone()], &self.values[span])
    }

    pub fn rows(&self) -> impl Iterator<Item = (&[usize], &[f64])> + '_ {
        (0..self.local_nrow).map(move |i| self.row(i))
    }

    pub fn numbering(&self) -> ColumnNumbering {
        self.numbering
    }

    pub fn is_local(&self) -> bool {
        self.numbering == ColumnNumbering::Local
    }

    pub fn halo(&self) -> &HaloPlan {
        &self.halo
    }

    pub fn num_external(&self) -> usize {
        self.halo.num_external()
    }

    /// Pads a vector of owned entries with zeroed external slots.
    pub fn extend_vector(&self, local: &Vector) -> Result<Vector> {
        if local.len() != self.local_nrow {
            return Err(SpmvError::invalid_argument(
                "local",
                format!(
                    "expected {} owned entries, got {}",
                    self.local_nrow,
                    local.len()
                ),
            ));
        }
        let mut extended = Vector::zeros(self.local_ncol);
        extended
            .slice_mut(ndarray::s![..self.local_nrow])
            .assign(local);
        Ok(extended)
    }

    /// Local slice as a CSR matrix, `local_nrow x local_ncol` once translated
    /// or `local_nrow x total_nrow` while indices are still global.
    pub fn to_csr(&self) -> CsrMatrix {
        let ncols = match self.numbering {
            ColumnNumbering::Global => self.total_nrow,
            ColumnNumbering::Local => self.local_ncol,
        };
        let mut triplets = TriMat::with_capacity((self.local_nrow, ncols), self.local_nnz());
        for (i, (cols, vals)) in self.rows().enumerate() {
            for (&j, &v) in cols.iter().zip(vals) {
                triplets.add_triplet(i, j, v);
            }
        }
        triplets.to_csr::<usize>()
    }

    pub(crate) fn indices_mut(&mut self) -> &mut [usize] {
        &mut self.indices
    }

    pub(crate) fn set_local(&mut self, halo: HaloPlan) {
        self.local_ncol = self.local_nrow + halo.num_external();
        self.halo = halo;
        self.numbering = ColumnNumbering::Local;
    }
}
