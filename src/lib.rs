//! Distributed sparse matrix-vector product in the style of the HPCCG
//! mini-application.
//!
//! <br>
//!
//! A square sparse matrix is split by contiguous blocks of rows over a set of
//! participants. Each participant reads only its own rows from a shared text
//! stream, then works out which entries of `x` it needs from other
//! participants (the "externals") and who needs which of its own entries.
//! After that setup every product `y = A x` is one halo exchange followed by a
//! purely local CSR kernel.
//!
//! The pieces:
//! - [`partitioner`]: the contiguous row partition and row ownership.
//! - [`io`]: the lockstep read-and-discard reader for the matrix stream.
//! - [`halo`]: column renumbering, neighbor discovery and the halo exchange.
//! - [`parallel_ops`]: the local kernel, serial or over the rayon pool.
//! - [`operator`]: `build`, `multiply` and `destroy` for solver drivers.
//! - [`comm`]: the message-passing layer, with a thread-backed cluster so a
//!   whole run fits in one process.

use ndarray::Array1;
use sprs::CsMatBase;

#[macro_use]
extern crate log;
#[cfg(test)]
extern crate approx;
#[cfg(test)]
extern crate test_generator;

pub mod comm;
pub mod config;
pub mod error;
pub mod halo;
pub mod io;
pub mod matrix;
pub mod operator;
pub mod parallel_ops;
pub mod partitioner;
#[cfg(test)]
mod testing;

pub use comm::{spawn_cluster, ChannelComm, Communicator, SerialComm};
pub use config::{ExchangeLimits, KernelMode, RunConfig};
pub use error::{Result, SpmvError};
pub use halo::{make_local_matrix, HaloPlan};
pub use io::{read_system, read_system_file, write_system, LocalSystem};
pub use matrix::{ColumnNumbering, SparseMatrix};
pub use operator::{build, destroy, multiply, multiply_with, DistributedOperator, OperatorCounters};
pub use partitioner::RowPartition;

pub type CsrMatrix = CsMatBase<f64, usize, Vec<usize>, Vec<usize>, Vec<f64>, usize>;
pub type Vector = Array1<f64>;

use lazy_static::lazy_static;

lazy_static! {
    pub static ref N_CPUS: usize = num_cpus::get();
}
