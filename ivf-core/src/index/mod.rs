//! IVF index: a fixed set of lists addressed by cluster label
//!
//! Each label owns a slot holding the current `Arc<List>`. Readers take a
//! snapshot with `Index::list` and never block; an extend of one label is
//! serialized by the slot's writer lock, while different labels are
//! packed in parallel on the execution context's pool. A list that has to
//! grow is replaced atomically, so snapshots taken before the swap keep
//! reading the old buffers.
//!
//! Locks are only ever taken on the calling thread, slot locks in ascending
//! label order. Jobs running on the pool never wait on a lock, so callers
//! blocked on a slot cannot starve the workers that would release it.

mod assigner;
mod helpers;
mod params;
mod serialize;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

pub use assigner::{ClusterAssigner, PerVector, PrecomputedLabels};
pub use helpers::reset_index;
pub use params::{DistanceType, IndexParams};
pub use serialize::{FORMAT_VERSION, MAGIC};

use crate::error::{Error, Result};
use crate::resources::Resources;
use crate::structures::ivf::{FlatListSpec, List, ListSpec, calculate_veclen, resize_list};
use crate::structures::{Element, RecordId};

struct ListSlot<S: ListSpec> {
    list: ArcSwap<List<S>>,
    writer: Mutex<()>,
}

impl<S: ListSpec> ListSlot<S> {
    fn new(list: List<S>) -> Self {
        Self {
            list: ArcSwap::from_pointee(list),
            writer: Mutex::new(()),
        }
    }
}

/// A list sized for its pending rows, held under its slot's writer lock
struct StagedList<'a, S: ListSpec> {
    slot: &'a ListSlot<S>,
    _slot_guard: MutexGuard<'a, ()>,
    list: Arc<List<S>>,
    codes: Vec<S::Value>,
    ids: Vec<S::Index>,
}

/// IVF index over uncompressed vectors of `T` with source ids `IdxT`.
pub struct Index<T: Element, IdxT: RecordId> {
    params: IndexParams,
    spec: FlatListSpec<T, IdxT>,
    lists: Vec<ListSlot<FlatListSpec<T, IdxT>>>,
}

impl<T: Element, IdxT: RecordId> std::fmt::Debug for Index<T, IdxT> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("params", &self.params)
            .field("dim", &self.dim())
            .field("veclen", &self.veclen())
            .field("size", &self.size())
            .finish()
    }
}

impl<T: Element, IdxT: RecordId> Index<T, IdxT> {
    /// Create an index with `params.n_lists` empty lists of `dim`-dim vectors.
    pub fn new(params: IndexParams, dim: u32) -> Result<Self> {
        if params.n_lists == 0 {
            return Err(Error::InvalidParameter("n_lists must be positive".to_string()));
        }
        let veclen = params.veclen.unwrap_or_else(|| calculate_veclen::<T>(dim));
        let spec = FlatListSpec::new(dim, veclen, params.conservative_memory_allocation)?;
        let lists = (0..params.n_lists).map(|_| List::empty(spec)).collect();
        Ok(Self::from_lists(params, spec, lists))
    }

    fn from_lists(
        params: IndexParams,
        spec: FlatListSpec<T, IdxT>,
        lists: Vec<List<FlatListSpec<T, IdxT>>>,
    ) -> Self {
        Self {
            params,
            spec,
            lists: lists.into_iter().map(ListSlot::new).collect(),
        }
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    pub fn spec(&self) -> &FlatListSpec<T, IdxT> {
        &self.spec
    }

    pub fn dim(&self) -> u32 {
        self.spec.dim()
    }

    pub fn veclen(&self) -> u32 {
        self.spec.veclen()
    }

    pub fn metric(&self) -> DistanceType {
        self.params.metric
    }

    pub fn n_lists(&self) -> u32 {
        self.params.n_lists
    }

    /// Snapshot of the list for `label`
    pub fn list(&self, label: u32) -> Result<Arc<List<FlatListSpec<T, IdxT>>>> {
        Ok(self.slot(label)?.list.load_full())
    }

    /// Published size of every list
    pub fn list_sizes(&self) -> Vec<u32> {
        self.lists.iter().map(|slot| slot.list.load().size()).collect()
    }

    /// Total number of published records
    pub fn size(&self) -> u64 {
        self.lists
            .iter()
            .map(|slot| u64::from(slot.list.load().size()))
            .sum()
    }

    /// Unpack `out.len() / dim` records of list `label` starting at `offset`
    pub fn unpack_list_data(
        &self,
        res: &Resources,
        label: u32,
        offset: u32,
        out: &mut [T],
    ) -> Result<()> {
        let list = self.list(label)?;
        list.view().unpack(res, offset, out)
    }

    /// Add a `[n, dim]` batch of vectors.
    ///
    /// Labels come from `assigner`; ids default to `size() + row`. Every
    /// argument is validated before any list is touched, and every affected
    /// list is sized before any of them is written. Each list is then packed
    /// and published on its own, so a failure part-way leaves every list
    /// either fully extended or unchanged.
    ///
    /// Slot locks are taken on the calling thread, which therefore must not
    /// be a worker of `res`'s pool.
    pub fn extend<A>(
        &self,
        res: &Resources,
        vectors: &[T],
        ids: Option<&[IdxT]>,
        assigner: &A,
    ) -> Result<()>
    where
        A: ClusterAssigner<T> + ?Sized,
    {
        let dim = self.dim() as usize;
        if vectors.len() % dim != 0 {
            return Err(Error::InvalidParameter(format!(
                "batch of {} elements is not a whole number of {dim}-dim vectors",
                vectors.len()
            )));
        }
        let n_rows = vectors.len() / dim;
        if n_rows == 0 {
            return Ok(());
        }
        let ids = match ids {
            Some(ids) if ids.len() != n_rows => {
                return Err(Error::InvalidParameter(format!(
                    "{} ids for {n_rows} vectors",
                    ids.len()
                )));
            }
            Some(ids) => ids.to_vec(),
            None => self.default_ids(n_rows)?,
        };

        let labels = res.install(|| assigner.assign(vectors, self.dim()))?;
        if labels.len() != n_rows {
            return Err(Error::InvalidParameter(format!(
                "assigner returned {} labels for {n_rows} vectors",
                labels.len()
            )));
        }
        let mut rows_per_list: Vec<Vec<usize>> = vec![Vec::new(); self.lists.len()];
        for (row, &label) in labels.iter().enumerate() {
            let rows = rows_per_list.get_mut(label as usize).ok_or_else(|| {
                Error::out_of_bounds("cluster label", label as usize + 1, self.lists.len())
            })?;
            rows.push(row);
        }
        for (label, rows) in rows_per_list.iter().enumerate() {
            let size = self.lists[label].list.load().size() as usize;
            if size + rows.len() > u32::MAX as usize {
                return Err(Error::out_of_bounds(
                    "list size",
                    size + rows.len(),
                    u32::MAX as usize,
                ));
            }
        }

        log::debug!("Extending {} lists with {n_rows} vectors", self.lists.len());
        let batches: Vec<(u32, Vec<T>, Vec<IdxT>)> = res.install(|| {
            rows_per_list
                .par_iter()
                .enumerate()
                .filter(|(_, rows)| !rows.is_empty())
                .map(|(label, rows)| {
                    let codes: Vec<T> = rows
                        .iter()
                        .flat_map(|&row| &vectors[row * dim..(row + 1) * dim])
                        .copied()
                        .collect();
                    let list_ids: Vec<IdxT> = rows.iter().map(|&row| ids[row]).collect();
                    (label as u32, codes, list_ids)
                })
                .collect()
        });
        self.extend_lists(res, batches)
    }

    /// resize → pack → ids → publish for each of `batches`, in ascending label order.
    ///
    /// Slot and list locks are acquired here; only the packing runs on the pool.
    fn extend_lists(&self, res: &Resources, batches: Vec<(u32, Vec<T>, Vec<IdxT>)>) -> Result<()> {
        let mut staged = Vec::with_capacity(batches.len());
        for (label, codes, ids) in batches {
            let slot = self.slot(label)?;
            let slot_guard = slot.writer.lock();
            let mut list = slot.list.load_full();
            let old_size = list.size();
            let new_size = u32::try_from(ids.len())
                .ok()
                .and_then(|n| old_size.checked_add(n))
                .ok_or_else(|| {
                    let requested = old_size as usize + ids.len();
                    Error::out_of_bounds("list size", requested, u32::MAX as usize)
                })?;
            resize_list(res, &mut list, &self.spec, new_size, old_size)?;
            staged.push(StagedList {
                slot,
                _slot_guard: slot_guard,
                list,
                codes,
                ids,
            });
        }

        let mut writers: Vec<_> = staged.iter().map(|s| s.list.writer()).collect();
        res.install(|| {
            writers
                .par_iter_mut()
                .zip(staged.par_iter())
                .try_for_each(|(writer, s)| {
                    writer.append(res, &s.codes, &s.ids)?;
                    s.slot.list.store(Arc::clone(&s.list));
                    Ok(())
                })
        })
    }

    fn default_ids(&self, n_rows: usize) -> Result<Vec<IdxT>> {
        let base = self.size() as usize;
        (base..base + n_rows)
            .map(|id| {
                IdxT::from_usize(id).ok_or_else(|| {
                    Error::InvalidParameter(format!("record id {id} does not fit the id type"))
                })
            })
            .collect()
    }

    fn slot(&self, label: u32) -> Result<&ListSlot<FlatListSpec<T, IdxT>>> {
        self.lists.get(label as usize).ok_or_else(|| {
            Error::out_of_bounds("cluster label", label as usize + 1, self.lists.len())
        })
    }
}
