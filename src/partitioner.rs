//! Contiguous row partitioning. Rows are split as evenly as possible and the
//! remainder goes one row each to the lowest ranks, so every participant can
//! compute every other participant's range (and the owner of any row) without
//! communicating.

use std::ops::Range;

use crate::error::{Result, SpmvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPartition {
    total_nrow: usize,
    size: usize,
    chunk: usize,
    remainder: usize,
}

impl RowPartition {
    pub fn new(total_nrow: usize, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SpmvError::invalid_argument(
                "size",
                "a partition needs at least one participant",
            ));
        }
        Ok(Self {
            total_nrow,
            size,
            chunk: total_nrow / size,
            remainder: total_nrow % size,
        })
    }

    pub fn total_nrow(&self) -> usize {
        self.total_nrow
    }

    /// Number of participants.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn local_nrow(&self, rank: usize) -> usize {
        assert!(rank < self.size, "rank {rank} out of range for {} participants", self.size);
        if rank < self.remainder {
            self.chunk + 1
        } else {
            self.chunk
        }
    }

    pub fn start_row(&self, rank: usize) -> usize {
        assert!(rank < self.size, "rank {rank} out of range for {} participants", self.size);
        if rank < self.remainder {
            rank * (self.chunk + 1)
        } else {
            rank * self.chunk + self.remainder
        }
    }

    /// Half-open global row range owned by `rank`.
    pub fn row_range(&self, rank: usize) -> Range<usize> {
        let start = self.start_row(rank);
        start..start + self.local_nrow(rank)
    }

    /// Rank owning `global_row`. Inverse of `row_range`.
    pub fn owner(&self, global_row: usize) -> usize {
        assert!(
            global_row < self.total_nrow,
            "row {global_row} out of range for {} rows",
            self.total_nrow
        );
        // rows below the boundary live in the (chunk + 1)-sized blocks
        let boundary = self.remainder * (self.chunk + 1);
        if global_row < boundary {
            global_row / (self.chunk + 1)
        } else {
            self.remainder + (global_row - boundary) / self.chunk
        }
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.size).map(move |rank| self.row_range(rank))
    }
}
