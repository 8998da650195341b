//! Reading and writing the line-oriented matrix stream.
//!
//! ```text
//! total_nrow total_nnz
//! [row] nnz                       one line per global row (sizes)
//! nnz value col value col ...     one line per global row (entries)
//! x b x_exact                     one line per global row
//! ```
//!
//! Every participant reads the whole stream from the top and keeps only its
//! own rows; everything else is read and thrown away so all participants see
//! the same stream.

use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, SpmvError};
use crate::matrix::SparseMatrix;
use crate::partitioner::RowPartition;
use crate::Vector;

/// A participant's share of the linear system.
#[derive(Debug, Clone)]
pub struct LocalSystem {
    pub matrix: SparseMatrix,
    /// Initial guess.
    pub x: Vector,
    pub b: Vector,
    pub x_exact: Vector,
}

struct LineReader<R> {
    source: R,
    buf: String,
    line_no: usize,
    rank: usize,
}

struct Line<'a> {
    rank: usize,
    no: usize,
    tokens: Vec<&'a str>,
}

impl<R: BufRead> LineReader<R> {
    fn new(source: R, rank: usize) -> Self {
        Self {
            source,
            buf: String::new(),
            line_no: 0,
            rank,
        }
    }

    /// Next non-blank line.
    fn next_line(&mut self, what: &str) -> Result<Line<'_>> {
        loop {
            self.buf.clear();
            if self.source.read_line(&mut self.buf)? == 0 {
                return Err(SpmvError::malformed(
                    self.rank,
                    format!(
                        "unexpected end of input after line {} while reading {}",
                        self.line_no, what
                    ),
                ));
            }
            self.line_no += 1;
            if !self.buf.trim().is_empty() {
                break;
            }
        }
        Ok(Line {
            rank: self.rank,
            no: self.line_no,
            tokens: self.buf.split_whitespace().collect(),
        })
    }
}

impl Line<'_> {
    fn error(&self, reason: impl Display) -> SpmvError {
        SpmvError::malformed(self.rank, format!("line {}: {}", self.no, reason))
    }

    fn expect_len(&self, len: usize, what: &str) -> Result<()> {
        if self.tokens.len() != len {
            return Err(self.error(format!(
                "expected {} tokens for {}, found {}",
                len,
                what,
                self.tokens.len()
            )));
        }
        Ok(())
    }

    fn parse<T: FromStr>(&self, pos: usize, what: &str) -> Result<T> {
        let token = self.tokens[pos];
        token
            .parse()
            .map_err(|_| self.error(format!("cannot parse {} from '{}'", what, token)))
    }
}

/// Reads the rows owned by `rank` out of `size` participants. Column indices
/// of the returned matrix are still global.
pub fn read_system<R: BufRead>(source: R, rank: usize, size: usize) -> Result<LocalSystem> {
    let mut lines = LineReader::new(source, rank);

    let header = lines.next_line("the header")?;
    header.expect_len(2, "the header")?;
    let total_nrow: usize = header.parse(0, "the row count")?;
    let total_nnz: u64 = header.parse(1, "the nonzero count")?;

    let partition = RowPartition::new(total_nrow, size)?;
    if rank >= size {
        return Err(SpmvError::invalid_argument(
            "rank",
            format!("{} is not below the participant count {}", rank, size),
        ));
    }
    let owned = partition.row_range(rank);
    if owned.is_empty() {
        warn!(
            "participant {} of {} owns no rows of a {} row matrix",
            rank, size, total_nrow
        );
    }

    // counts come from the input, so nothing is preallocated from them
    let mut declared = Vec::new();
    for i in 0..total_nrow {
        let line = lines.next_line("the row sizes")?;
        let nnz: usize = match line.tokens.len() {
            1 => line.parse(0, "a row size")?,
            2 => {
                let row: usize = line.parse(0, "a row index")?;
                if row != i {
                    return Err(line.error(format!("expected the size of row {}, found row {}", i, row)));
                }
                line.parse(1, "a row size")?
            }
            n => return Err(line.error(format!("expected 1 or 2 tokens for a row size, found {}", n))),
        };
        declared.push(nnz);
    }
    let declared_nnz = declared
        .iter()
        .try_fold(0u64, |sum, &n| sum.checked_add(n as u64))
        .ok_or_else(|| SpmvError::malformed(rank, "row sizes overflow the nonzero count"))?;
    if declared_nnz != total_nnz {
        return Err(SpmvError::malformed(
            rank,
            format!(
                "row sizes add up to {} nonzeros but the header declares {}",
                declared_nnz, total_nnz
            ),
        ));
    }

    // every row is parsed and range checked, owned or not, so a bad row fails
    // every participant at the same point
    let mut row_offsets = vec![0];
    let mut indices = Vec::new();
    let mut values = Vec::new();
    for (i, &expected) in declared.iter().enumerate() {
        let line = lines.next_line("the matrix entries")?;
        let nnz: usize = line.parse(0, "a row length")?;
        if nnz != expected {
            return Err(line.error(format!(
                "row {} declares {} entries but the size section declared {}",
                i, nnz, expected
            )));
        }
        let ntokens = nnz
            .checked_mul(2)
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| line.error(format!("row {} declares an impossible {} entries", i, nnz)))?;
        line.expect_len(ntokens, &format!("the {} entries of row {}", nnz, i))?;

        let keep = owned.contains(&i);
        if keep {
            trace!("participant {} of {} getting row {}", rank, size, i);
        }
        for pair in 0..nnz {
            let value: f64 = line.parse(1 + 2 * pair, "a value")?;
            let col: usize = line.parse(2 + 2 * pair, "a column index")?;
            if col >= total_nrow {
                return Err(line.error(format!(
                    "column {} of row {} is outside the {} columns",
                    col, i, total_nrow
                )));
            }
            if keep {
                values.push(value);
                indices.push(col);
            }
        }
        if keep {
            row_offsets.push(indices.len());
        }
    }
    let kept = row_offsets.len() - 1;
    if kept != owned.len() {
        return Err(SpmvError::malformed(
            rank,
            format!("kept {} rows, expected {}", kept, owned.len()),
        ));
    }
    let local_nnz = indices.len();

    let mut x: Vec<f64> = Vec::new();
    let mut b: Vec<f64> = Vec::new();
    let mut x_exact: Vec<f64> = Vec::new();
    for i in 0..total_nrow {
        let line = lines.next_line("the vectors")?;
        line.expect_len(3, "x, b and x_exact")?;
        let entries: (f64, f64, f64) = (
            line.parse(0, "x")?,
            line.parse(1, "b")?,
            line.parse(2, "x_exact")?,
        );
        if owned.contains(&i) {
            x.push(entries.0);
            b.push(entries.1);
            x_exact.push(entries.2);
        }
    }

    debug!(
        "participant {} has rows {:?} and {} nonzeros",
        rank, owned, local_nnz
    );

    let matrix = SparseMatrix::from_global_rows(
        total_nrow,
        total_nnz,
        owned.start,
        row_offsets,
        indices,
        values,
    )?;
    Ok(LocalSystem {
        matrix,
        x: Vector::from(x),
        b: Vector::from(b),
        x_exact: Vector::from(x_exact),
    })
}

pub fn read_system_file<P: AsRef<Path>>(path: P, rank: usize, size: usize) -> Result<LocalSystem> {
    let path = path.as_ref();
    if rank == 0 {
        info!("Reading matrix info from {}", path.display());
    }
    let file = File::open(path)?;
    read_system(BufReader::new(file), rank, size)
}

/// Writes a whole system in the format `read_system` expects. `rows[i]` holds
/// the `(column, value)` entries of global row `i`.
pub fn write_system<W: Write>(
    mut out: W,
    rows: &[Vec<(usize, f64)>],
    x: &[f64],
    b: &[f64],
    x_exact: &[f64],
) -> Result<()> {
    let n = rows.len();
    if x.len() != n || b.len() != n || x_exact.len() != n {
        return Err(SpmvError::invalid_argument(
            "x",
            format!("vectors must have {} entries", n),
        ));
    }
    let total_nnz: usize = rows.iter().map(|r| r.len()).sum();
    writeln!(out, "{} {}", n, total_nnz)?;
    for row in rows {
        writeln!(out, "{}", row.len())?;
    }
    for row in rows {
        write!(out, "{}", row.len())?;
        for &(col, value) in row {
            write!(out, " {} {}", value, col)?;
        }
        writeln!(out)?;
    }
    for i in 0..n {
        writeln!(out, "{} {} {}", x[i], b[i], x_exact[i])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{random_rows, tridiagonal, Rows};
    use ndarray::array;

    fn to_text(rows: &Rows) -> String {
        let n = rows.len();
        let x = vec![0.0; n];
        let x_exact: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let b: Vec<f64> = rows
            .iter()
            .map(|row| row.iter().map(|&(j, v)| v * x_exact[j]).sum())
            .collect();
        let mut out = Vec::new();
        write_system(&mut out, rows, &x, &b, &x_exact).unwrap();
        String::from_utf8(out).unwrap()
    }

    const TRIDIAG4: &str = "4 10
2
3
3
2
2 2 0 -1 1
3 -1 0 2 1 -1 2
3 -1 1 2 2 -1 3
2 -1 2 2 3
0 1 1
0 0 2
0 0 3
0 1 4
";

    #[test]
    fn keeps_only_owned_rows() {
        let system = read_system(TRIDIAG4.as_bytes(), 1, 2).unwrap();
        let mat = &system.matrix;
        assert_eq!(mat.total_nrow(), 4);
        assert_eq!(mat.total_nnz(), 10);
        assert_eq!(mat.row_range(), 2..4);
        assert_eq!(mat.row(0), (&[1usize, 2, 3][..], &[-1.0, 2.0, -1.0][..]));
        assert_eq!(mat.row(1).0, &[2, 3]);
        assert_eq!(system.x, array![0.0, 0.0]);
        assert_eq!(system.b, array![0.0, 1.0]);
        assert_eq!(system.x_exact, array![3.0, 4.0]);
    }

    #[test]
    fn row_indexed_sizes_are_accepted() {
        let text = TRIDIAG4.replacen("2\n3\n3\n2\n", "0 2\n1 3\n2 3\n3 2\n", 1);
        let system = read_system(text.as_bytes(), 0, 1).unwrap();
        assert_eq!(system.matrix.local_nnz(), 10);

        let text = TRIDIAG4.replacen("2\n3\n3\n2\n", "0 2\n2 3\n1 3\n3 2\n", 1);
        assert!(matches!(
            read_system(text.as_bytes(), 0, 1),
            Err(SpmvError::MalformedInput { .. })
        ));
    }

    #[test]
    fn entry_count_mismatch_is_malformed() {
        // row 1 declares 3 entries but only supplies 2
        let text = TRIDIAG4.replacen("3 -1 0 2 1 -1 2", "3 -1 0 2 1", 1);
        for rank in 0..2 {
            match read_system(text.as_bytes(), rank, 2) {
                Err(SpmvError::MalformedInput { participant, reason }) => {
                    assert_eq!(participant, rank);
                    assert!(reason.contains("row 1"), "{}", reason);
                }
                other => panic!("expected malformed input, got {:?}", other),
            }
        }
    }

    #[test]
    fn row_section_must_agree_with_sizes() {
        let text = TRIDIAG4.replacen("2 -1 2 2 3", "1 2 3", 1);
        let err = read_system(text.as_bytes(), 0, 1).unwrap_err();
        assert!(err.to_string().contains("size section"));
    }

    #[test]
    fn header_nonzero_count_is_checked() {
        let text = TRIDIAG4.replacen("4 10", "4 11", 1);
        assert!(matches!(
            read_system(text.as_bytes(), 0, 1),
            Err(SpmvError::MalformedInput { .. })
        ));
    }

    #[test]
    fn truncated_and_garbled_input_is_malformed() {
        let truncated = &TRIDIAG4[..TRIDIAG4.len() - 6];
        assert!(matches!(
            read_system(truncated.as_bytes(), 0, 1),
            Err(SpmvError::MalformedInput { .. })
        ));

        let garbled = TRIDIAG4.replacen("2 2 0 -1 1", "2 2 0 -1 x", 1);
        assert!(matches!(
            read_system(garbled.as_bytes(), 0, 1),
            Err(SpmvError::MalformedInput { .. })
        ));

        let out_of_range = TRIDIAG4.replacen("2 2 0 -1 1", "2 2 0 -1 4", 1);
        assert!(matches!(
            read_system(out_of_range.as_bytes(), 0, 1),
            Err(SpmvError::MalformedInput { .. })
        ));
    }

    #[test]
    fn discarded_rows_are_still_checked() {
        // row 3 belongs to participant 1 but is short; participant 0 must notice too
        let text = TRIDIAG4.replacen("2 -1 2 2 3", "2 -1 2", 1);
        assert!(read_system(text.as_bytes(), 0, 2).is_err());
    }

    #[test]
    fn bad_entries_in_the_last_partition_fail_everyone() {
        let text = to_text(&tridiagonal(6));
        let out_of_range = text.replacen("2 -1 4 2 5", "2 -1 4 2 9", 1);
        let garbled = text.replacen("2 -1 4 2 5", "2 -1 4 two 5", 1);
        let bad_vector = text.replacen("0 6 5\n", "0 6 five\n", 1);
        for text in [out_of_range, garbled, bad_vector] {
            for rank in 0..3 {
                match read_system(text.as_bytes(), rank, 3) {
                    Err(SpmvError::MalformedInput { participant, .. }) => assert_eq!(participant, rank),
                    other => panic!("participant {} should reject the input, got {:?}", rank, other),
                }
            }
        }
    }

    #[test]
    fn huge_counts_are_malformed_not_fatal() {
        let huge_rows = format!("{} 0\n", usize::MAX);
        assert!(matches!(
            read_system(huge_rows.as_bytes(), 0, 1),
            Err(SpmvError::MalformedInput { .. })
        ));

        let big = 1usize << 63;
        let huge_row = format!("2 {big}\n{big}\n0\n{big} 1 0\n0\n0 0 0\n0 0 0\n");
        assert!(matches!(
            read_system(huge_row.as_bytes(), 0, 1),
            Err(SpmvError::MalformedInput { .. })
        ));

        let overflowing_sizes = format!("2 1\n{}\n1\n", u64::MAX);
        assert!(matches!(
            read_system(overflowing_sizes.as_bytes(), 0, 2),
            Err(SpmvError::MalformedInput { .. })
        ));
    }

    #[test]
    fn participants_beyond_the_row_count_own_nothing() {
        let system = read_system(TRIDIAG4.as_bytes(), 5, 6).unwrap();
        assert_eq!(system.matrix.local_nrow(), 0);
        assert_eq!(system.x.len(), 0);
    }

    #[test]
    fn bad_participant_arguments() {
        assert!(matches!(
            read_system(TRIDIAG4.as_bytes(), 2, 2),
            Err(SpmvError::InvalidArgument { arg: "rank", .. })
        ));
        assert!(matches!(
            read_system(TRIDIAG4.as_bytes(), 0, 0),
            Err(SpmvError::InvalidArgument { arg: "size", .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_system_file("test_matrices/does_not_exist.txt", 0, 1).unwrap_err();
        assert!(matches!(err, SpmvError::Io(_)));
    }

    #[test]
    fn written_systems_read_back() {
        let rows = random_rows(25, 4, 5);
        let text = to_text(&rows);
        let mut seen = 0;
        for rank in 0..3 {
            let system = read_system(text.as_bytes(), rank, 3).unwrap();
            for (local, global) in system.matrix.row_range().enumerate() {
                let (cols, vals) = system.matrix.row(local);
                let expected: Vec<usize> = rows[global].iter().map(|e| e.0).collect();
                let expected_vals: Vec<f64> = rows[global].iter().map(|e| e.1).collect();
                assert_eq!(cols, &expected[..]);
                assert_eq!(vals, &expected_vals[..]);
                assert_eq!(system.x_exact[local], global as f64);
                seen += 1;
            }
        }
        assert_eq!(seen, 25);
        assert_eq!(to_text(&tridiagonal(1)), "1 1\n1\n1 2 0\n0 0 0\n");
    }
}
