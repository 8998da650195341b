//! External column discovery and the halo exchange.
//!
//! `make_local_matrix` turns a row slice with global column indices into one
//! with local indices: owned columns map to `0..local_nrow`, every other
//! column gets an external slot `local_nrow + k` in first-seen order. The
//! externals are grouped by owning participant, the owners are told which
//! rows to send, and the resulting `HaloPlan` is stored with the matrix.
//!
//! `HaloPlan::exchange_externals` is then run before every multiply to fill
//! the external slots of the vector with the owners' current values.

use std::collections::BTreeMap;

use indexmap::IndexSet;

use crate::comm::{Communicator, Tag, Wire};
use crate::config::ExchangeLimits;
use crate::error::{Result, SpmvError};
use crate::matrix::SparseMatrix;
use crate::partitioner::RowPartition;

#[derive(Debug, Clone, Default)]
pub struct HaloPlan {
    local_nrow: usize,
    /// Global id of every external, in slot order.
    external_index: IndexSet<usize>,
    /// Participants this one sends to or receives from, ascending.
    neighbors: Vec<usize>,
    recv_length: Vec<usize>,
    send_length: Vec<usize>,
    /// Local rows to send, grouped by neighbor in `neighbors` order.
    elements_to_send: Vec<usize>,
    /// Position in `external_index` of each received value, grouped by
    /// neighbor in `neighbors` order.
    recv_order: Vec<usize>,
}

impl HaloPlan {
    pub(crate) fn empty(local_nrow: usize) -> Self {
        Self {
            local_nrow,
            ..Self::default()
        }
    }

    pub fn num_external(&self) -> usize {
        self.external_index.len()
    }

    /// Global ids of the externals; the `k`th lives in slot `local_nrow + k`.
    pub fn external_index(&self) -> impl Iterator<Item = usize> + '_ {
        self.external_index.iter().copied()
    }

    /// Global id held in local column `slot`, if `slot` is an external slot.
    pub fn external_global_index(&self, slot: usize) -> Option<usize> {
        let k = slot.checked_sub(self.local_nrow)?;
        self.external_index.get_index(k).copied()
    }

    /// Local column assigned to global column `global`, if it is an external.
    pub fn external_local_index(&self, global: usize) -> Option<usize> {
        self.external_index
            .get_index_of(&global)
            .map(|k| self.local_nrow + k)
    }

    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }

    pub fn has_neighbors(&self) -> bool {
        !self.neighbors.is_empty()
    }

    pub fn recv_length(&self) -> &[usize] {
        &self.recv_length
    }

    pub fn send_length(&self) -> &[usize] {
        &self.send_length
    }

    pub fn elements_to_send(&self) -> &[usize] {
        &self.elements_to_send
    }

    pub fn total_to_be_sent(&self) -> usize {
        self.elements_to_send.len()
    }

    /// Local rows sent to the neighbor at position `pos` of `neighbors()`.
    pub fn elements_to_send_for(&self, pos: usize) -> &[usize] {
        let start: usize = self.send_length[..pos].iter().sum();
        &self.elements_to_send[start..start + self.send_length[pos]]
    }

    /// Sends owned entries of `x` to every neighbor that needs them and fills
    /// the external slots of `x` from every neighbor we need. Returns once all
    /// expected messages have arrived.
    pub fn exchange_externals<C: Communicator>(&self, comm: &C, x: &mut [f64]) -> Result<()> {
        let rank = comm.rank();
        let local_ncol = self.local_nrow + self.num_external();
        if x.len() < local_ncol {
            return Err(SpmvError::invalid_argument(
                "x",
                format!("length {} is shorter than the {} local columns", x.len(), local_ncol),
            ));
        }

        let mut offset = 0;
        for (&neighbor, &len) in self.neighbors.iter().zip(&self.send_length) {
            if len > 0 {
                let send_buffer: Vec<f64> = self.elements_to_send[offset..offset + len]
                    .iter()
                    .map(|&i| x[i])
                    .collect();
                comm.send_slice(neighbor, Tag::Halo, send_buffer)?;
            }
            offset += len;
        }

        let mut offset = 0;
        for (&neighbor, &len) in self.neighbors.iter().zip(&self.recv_length) {
            if len > 0 {
                let received: Vec<f64> = comm.recv_slice(neighbor, Tag::Halo)?;
                if received.len() != len {
                    return Err(SpmvError::communication(
                        rank,
                        neighbor,
                        format!("expected {} halo values, received {}", len, received.len()),
                    ));
                }
                for (value, &k) in received.into_iter().zip(&self.recv_order[offset..offset + len]) {
                    x[self.local_nrow + k] = value;
                }
            }
            offset += len;
        }
        Ok(())
    }
}

fn check_limit(participant: usize, resource: &'static str, count: usize, limit: usize) -> Result<()> {
    if count > limit {
        return Err(SpmvError::ResourceExhaustion {
            participant,
            resource,
            count,
            limit,
        });
    }
    Ok(())
}

/// Rewrites the column indices of `matrix` into local numbering and builds
/// its communication plan. Every participant has to call this collectively.
pub fn make_local_matrix<C: Communicator>(
    mut matrix: SparseMatrix,
    comm: &C,
    limits: &ExchangeLimits,
) -> Result<SparseMatrix> {
    let rank = comm.rank();
    if matrix.is_local() {
        return Err(SpmvError::invalid_argument(
            "matrix",
            "column indices are already local",
        ));
    }
    let partition = RowPartition::new(matrix.total_nrow(), comm.size())?;
    if partition.row_range(rank) != matrix.row_range() {
        return Err(SpmvError::invalid_argument(
            "matrix",
            format!(
                "participant {} holds rows {:?} but the partition assigns {:?}",
                rank,
                matrix.row_range(),
                partition.row_range(rank)
            ),
        ));
    }

    let local_nrow = matrix.local_nrow();
    let owned = matrix.row_range();
    let mut external_index: IndexSet<usize> = IndexSet::new();
    for col in matrix.indices_mut() {
        if owned.contains(&*col) {
            *col -= owned.start;
        } else {
            let (k, inserted) = external_index.insert_full(*col);
            if inserted {
                check_limit(rank, "external", external_index.len(), limits.max_external)?;
            }
            *col = local_nrow + k;
        }
    }

    let mut plan = HaloPlan {
        local_nrow,
        external_index,
        ..HaloPlan::default()
    };

    if comm.size() == 1 {
        matrix.set_local(plan);
        return Ok(matrix);
    }

    // externals grouped by owner, first-seen order inside each group
    let mut wanted: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (k, &global) in plan.external_index.iter().enumerate() {
        wanted.entry(partition.owner(global)).or_default().push(k);
    }

    let mut tell_owner = vec![0usize; comm.size()];
    for &owner in wanted.keys() {
        tell_owner[owner] = 1;
    }
    let num_requests = comm.all_reduce_sum(&tell_owner)?[rank];
    check_limit(rank, "message", num_requests, limits.max_num_messages)?;

    for (&owner, ks) in wanted.iter() {
        let request: Vec<usize> = ks
            .iter()
            .filter_map(|&k| plan.external_index.get_index(k).copied())
            .collect();
        trace!("participant {}: requesting {} values from {}", rank, request.len(), owner);
        comm.send_slice(owner, Tag::Request, request)?;
    }

    let mut to_send: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for _ in 0..num_requests {
        let (source, payload) = comm.recv_any(Tag::Request)?;
        let requested = <usize as Wire>::from_payload(payload).ok_or_else(|| {
            SpmvError::communication(rank, source, "request carried values instead of indices")
        })?;
        let mut rows: IndexSet<usize> = IndexSet::with_capacity(requested.len());
        for global in requested {
            if !owned.contains(&global) {
                return Err(SpmvError::communication(
                    rank,
                    source,
                    format!("requested row {} is not owned here ({:?})", global, owned),
                ));
            }
            rows.insert(global - owned.start);
        }
        if to_send.insert(source, rows.into_iter().collect()).is_some() {
            return Err(SpmvError::communication(
                rank,
                source,
                "received a second request list",
            ));
        }
    }

    let mut neighbors: Vec<usize> = wanted.keys().chain(to_send.keys()).copied().collect();
    neighbors.sort_unstable();
    neighbors.dedup();
    check_limit(rank, "neighbor", neighbors.len(), limits.max_num_neighbors)?;

    for &neighbor in &neighbors {
        let ks = wanted.remove(&neighbor).unwrap_or_default();
        plan.recv_length.push(ks.len());
        plan.recv_order.extend(ks);

        let rows = to_send.remove(&neighbor).unwrap_or_default();
        plan.send_length.push(rows.len());
        plan.elements_to_send.extend(rows);
    }
    plan.neighbors = neighbors;

    info!(
        "participant {}: {} externals from {} neighbors, {} values to send",
        rank,
        plan.num_external(),
        plan.recv_length.iter().filter(|&&l| l > 0).count(),
        plan.total_to_be_sent()
    );

    matrix.set_local(plan);
    Ok(matrix)
}
