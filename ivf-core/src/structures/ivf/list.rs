//! Storage for one IVF cluster
//!
//! A `List` owns an interleaved data buffer (shape per its `ListSpec`), a
//! parallel buffer of source ids, and an atomically published `size`.
//!
//! # Publication model
//!
//! ```text
//! writer (one at a time, via ListWriter)    readers (any number, lock-free)
//!   pack codes into [size, size + n)          s = size.load(Acquire)
//!   write ids into  [size, size + n)          read records [0, s)
//!   size.store(size + n, Release)
//! ```
//!
//! Writers only ever touch slots at or above the published size, and readers
//! only ever touch slots below the size they observed, so the two never
//! overlap. Lowering the size requires `&mut List`, which no reader can hold
//! at the same time. Lists are shared through `Arc`; a resize swaps in a new
//! `Arc` and leaves the old buffers valid for every remaining holder.

use std::cell::UnsafeCell;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

use super::codepacker::{self, record_chunks};
use super::spec::{ListExtents, ListSpec};
use crate::error::{Error, Result};
use crate::resources::{Reservation, Resources};
use crate::structures::element::RecordId;

/// Buffer whose disjoint ranges may be read and written from different threads.
struct SharedBuffer<T> {
    cells: Box<[UnsafeCell<T>]>,
}

// SAFETY: all shared access goes through `read`/`write`, whose callers
// guarantee that a range being written is not read or written concurrently.
unsafe impl<T: Send + Sync> Sync for SharedBuffer<T> {}

impl<T: Copy> SharedBuffer<T> {
    fn new(cells: Vec<UnsafeCell<T>>) -> Self {
        Self {
            cells: cells.into_boxed_slice(),
        }
    }

    fn empty() -> Self {
        Self {
            cells: Box::new([]),
        }
    }

    fn len(&self) -> usize {
        self.cells.len()
    }

    /// # Safety
    ///
    /// No thread may write any part of `range` while the slice is alive.
    unsafe fn read(&self, range: Range<usize>) -> &[T] {
        let cells = &self.cells[range];
        // SAFETY: UnsafeCell<T> has the same layout as T; aliasing per caller contract.
        unsafe { std::slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()), cells.len()) }
    }

    /// # Safety
    ///
    /// No other thread may read or write any part of `range` while the slice is alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn write(&self, range: Range<usize>) -> &mut [T] {
        let cells = &self.cells[range];
        // SAFETY: writes go through UnsafeCell; exclusivity per caller contract.
        unsafe { std::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), cells.len()) }
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.cells.len();
        // SAFETY: `&mut self` rules out any other access.
        unsafe { std::slice::from_raw_parts_mut(UnsafeCell::raw_get(self.cells.as_ptr()), len) }
    }
}

/// The data of a single IVF list.
pub struct List<S: ListSpec> {
    spec: S,
    capacity: u32,
    data: SharedBuffer<S::Value>,
    indices: SharedBuffer<S::Index>,
    size: AtomicU32,
    writer: Mutex<()>,
    _data_mem: Option<Reservation>,
    _indices_mem: Option<Reservation>,
}

impl<S: ListSpec> std::fmt::Debug for List<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("List")
            .field("spec", &self.spec)
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish()
    }
}

impl<S: ListSpec> List<S> {
    /// Allocate a list able to hold at least `n_rows` records.
    ///
    /// The capacity follows `spec.list_capacity`; data is zeroed, every id
    /// slot holds the invalid-record sentinel, and the size starts at 0.
    pub fn new(res: &Resources, spec: S, n_rows: u32) -> Result<Self> {
        let capacity = spec.list_capacity(n_rows).ok_or_else(|| Error::Allocation {
            bytes: usize::MAX,
            reason: format!("capacity for {n_rows} records overflows"),
        })?;
        let extents = spec.make_list_extents(capacity);
        let (data, data_mem) =
            res.alloc_with(extents.len(), || UnsafeCell::new(Default::default()))?;
        let (indices, indices_mem) =
            res.alloc_with(capacity as usize, || UnsafeCell::new(S::Index::INVALID))?;
        Ok(Self {
            spec,
            capacity,
            data: SharedBuffer::new(data),
            indices: SharedBuffer::new(indices),
            size: AtomicU32::new(0),
            writer: Mutex::new(()),
            _data_mem: Some(data_mem),
            _indices_mem: Some(indices_mem),
        })
    }

    /// A list with no storage at all
    pub fn empty(spec: S) -> Self {
        Self {
            spec,
            capacity: 0,
            data: SharedBuffer::empty(),
            indices: SharedBuffer::empty(),
            size: AtomicU32::new(0),
            writer: Mutex::new(()),
            _data_mem: None,
            _indices_mem: None,
        }
    }

    pub fn spec(&self) -> &S {
        &self.spec
    }

    /// Number of record slots allocated
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Published number of valid records (acquire load)
    pub fn size(&self) -> u32 {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Physical extents of the data buffer
    pub fn extents(&self) -> ListExtents {
        self.spec.make_list_extents(self.capacity)
    }

    /// Bytes held by the two buffers
    pub fn memory_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<S::Value>()
            + self.indices.len() * std::mem::size_of::<S::Index>()
    }

    /// Lock-free read view of the records published so far
    pub fn view(&self) -> ListView<'_, S> {
        ListView {
            list: self,
            size: self.size(),
        }
    }

    /// Acquire the single-writer handle, blocking other writers (never readers)
    pub fn writer(&self) -> ListWriter<'_, S> {
        ListWriter {
            list: self,
            _guard: self.writer.lock(),
        }
    }

    pub fn try_writer(&self) -> Option<ListWriter<'_, S>> {
        self.writer.try_lock().map(|guard| ListWriter {
            list: self,
            _guard: guard,
        })
    }

    /// Whole interleaved data buffer (exclusive access)
    pub fn data_mut(&mut self) -> &mut [S::Value] {
        self.data.as_mut_slice()
    }

    /// Whole id buffer (exclusive access)
    pub fn indices_mut(&mut self) -> &mut [S::Index] {
        self.indices.as_mut_slice()
    }

    /// Set the size directly, in either direction (exclusive access)
    pub fn set_size(&mut self, size: u32) -> Result<()> {
        if size > self.capacity {
            return Err(Error::out_of_bounds(
                "list size",
                size as usize,
                self.capacity as usize,
            ));
        }
        self.size.store(size, Ordering::Release);
        Ok(())
    }

    /// Hold off writers while the caller reads unpublished slots.
    pub(crate) fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    /// Data elements `[0, len)` while writers are held off.
    pub(crate) fn data_locked<'a>(
        &'a self,
        _guard: &'a MutexGuard<'_, ()>,
        len: usize,
    ) -> &'a [S::Value] {
        // SAFETY: the writer lock is held for `'a`, so nothing writes the buffer.
        unsafe { self.data.read(0..len) }
    }

    /// Ids `[0, len)` while writers are held off.
    pub(crate) fn indices_locked<'a>(
        &'a self,
        _guard: &'a MutexGuard<'_, ()>,
        len: usize,
    ) -> &'a [S::Index] {
        // SAFETY: the writer lock is held for `'a`, so nothing writes the buffer.
        unsafe { self.indices.read(0..len) }
    }
}

/// Read access to the records published when the view was taken.
pub struct ListView<'a, S: ListSpec> {
    list: &'a List<S>,
    size: u32,
}

impl<'a, S: ListSpec> ListView<'a, S> {
    /// Size snapshot this view is bounded by
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn list(&self) -> &'a List<S> {
        self.list
    }

    /// Source ids of the published records
    pub fn indices(&self) -> &'a [S::Index] {
        // SAFETY: writers only touch slots at or above the published size,
        // which is never below this snapshot.
        unsafe { self.list.indices.read(0..self.size as usize) }
    }

    /// Interleaved data of the super-blocks that are entirely published
    pub fn complete_groups(&self) -> &'a [S::Value] {
        let ext = self.list.spec.make_list_extents(self.size);
        let full = ext.group_len() * (self.size as usize / ext.group_size() as usize);
        // SAFETY: every slot of a complete group is below the snapshot size.
        unsafe { self.list.data.read(0..full) }
    }

    /// The `veclen` elements of chunk `chunk` of record `p`
    pub fn chunk(&self, p: u32, chunk: u32) -> Result<&'a [S::Value]> {
        self.check_range(p, 1)?;
        let spec = &self.list.spec;
        if chunk >= spec.dim() / spec.veclen() {
            return Err(Error::out_of_bounds(
                "chunk",
                chunk as usize + 1,
                (spec.dim() / spec.veclen()) as usize,
            ));
        }
        let start =
            codepacker::physical_offset(p, chunk * spec.veclen(), spec.dim(), spec.veclen());
        // SAFETY: record `p` is below the snapshot size.
        Ok(unsafe { self.list.data.read(start..start + spec.veclen() as usize) })
    }

    /// Unpack `codes.len() / dim` published records starting at `offset`
    pub fn unpack(&self, res: &Resources, offset: u32, codes: &mut [S::Value]) -> Result<()> {
        let dim = self.list.spec.dim();
        let veclen = self.list.spec.veclen() as usize;
        if codes.len() % dim as usize != 0 {
            return Err(Error::InvalidParameter(format!(
                "output of {} elements is not a whole number of {dim}-dim records",
                codes.len()
            )));
        }
        let n_take = codes.len() / dim as usize;
        self.check_range(offset, n_take)?;

        let data = &self.list.data;
        res.install(|| {
            codes
                .par_chunks_mut(dim as usize)
                .enumerate()
                .for_each(|(i, flat)| {
                    for (col, phys) in record_chunks(offset + i as u32, dim, veclen as u32) {
                        // SAFETY: the record is below the snapshot size.
                        let src = unsafe { data.read(phys..phys + veclen) };
                        flat[col..col + veclen].copy_from_slice(src);
                    }
                });
        });
        Ok(())
    }

    /// Flat copy of published record `p`
    pub fn record(&self, p: u32) -> Result<Vec<S::Value>> {
        self.check_range(p, 1)?;
        let spec = &self.list.spec;
        let veclen = spec.veclen() as usize;
        let mut flat = vec![S::Value::default(); spec.dim() as usize];
        for (col, phys) in record_chunks(p, spec.dim(), spec.veclen()) {
            // SAFETY: record `p` is below the snapshot size.
            let src = unsafe { self.list.data.read(phys..phys + veclen) };
            flat[col..col + veclen].copy_from_slice(src);
        }
        Ok(flat)
    }

    fn check_range(&self, offset: u32, n: usize) -> Result<()> {
        let end = offset as usize + n;
        if end > self.size as usize {
            return Err(Error::out_of_bounds("published records", end, self.size as usize));
        }
        Ok(())
    }
}

/// Exclusive writer of a shared list.
///
/// Writes are only accepted in the unpublished tail `[size, capacity)`;
/// `publish` makes them visible to readers.
pub struct ListWriter<'a, S: ListSpec> {
    list: &'a List<S>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a, S: ListSpec> ListWriter<'a, S> {
    pub fn list(&self) -> &'a List<S> {
        self.list
    }

    fn check_tail(&self, offset: u32, n: usize) -> Result<()> {
        let capacity = self.list.capacity as usize;
        let end = offset as usize + n;
        if end > capacity {
            return Err(Error::out_of_bounds("list capacity", end, capacity));
        }
        let size = self.list.size();
        if n > 0 && offset < size {
            return Err(Error::InvalidParameter(format!(
                "write at offset {offset} overlaps {size} published records"
            )));
        }
        Ok(())
    }

    /// Pack a `[n, dim]` row-major batch at logical `offset`
    pub fn pack(&mut self, res: &Resources, codes: &[S::Value], offset: u32) -> Result<()> {
        let dim = self.list.spec.dim();
        let veclen = self.list.spec.veclen() as usize;
        if codes.len() % dim as usize != 0 {
            return Err(Error::InvalidParameter(format!(
                "batch of {} elements is not a whole number of {dim}-dim records",
                codes.len()
            )));
        }
        let n = codes.len() / dim as usize;
        self.check_tail(offset, n)?;

        let data = &self.list.data;
        res.install(|| {
            codes.par_chunks(dim as usize).enumerate().for_each(|(i, flat)| {
                for (col, phys) in record_chunks(offset + i as u32, dim, veclen as u32) {
                    // SAFETY: the slot is in the unpublished tail, which readers never
                    // touch, and each record's chunks are written by one task only.
                    let dst = unsafe { data.write(phys..phys + veclen) };
                    dst.copy_from_slice(&flat[col..col + veclen]);
                }
            });
        });
        Ok(())
    }

    /// Write source ids at logical `offset`
    pub fn write_indices(&mut self, ids: &[S::Index], offset: u32) -> Result<()> {
        self.check_tail(offset, ids.len())?;
        let start = offset as usize;
        // SAFETY: unpublished tail, single writer.
        let dst = unsafe { self.list.indices.write(start..start + ids.len()) };
        dst.copy_from_slice(ids);
        Ok(())
    }

    /// Publish `new_size` records (release store). Sizes never decrease here.
    pub fn publish(&mut self, new_size: u32) -> Result<()> {
        if new_size > self.list.capacity {
            return Err(Error::out_of_bounds(
                "list size",
                new_size as usize,
                self.list.capacity as usize,
            ));
        }
        let size = self.list.size();
        if new_size < size {
            return Err(Error::InvalidParameter(format!(
                "cannot publish {new_size} records over {size} already published"
            )));
        }
        self.list.size.store(new_size, Ordering::Release);
        Ok(())
    }

    /// Pack codes and ids after the published records, then publish them.
    ///
    /// Returns the new size. Nothing is published if any step fails.
    pub fn append(&mut self, res: &Resources, codes: &[S::Value], ids: &[S::Index]) -> Result<u32> {
        let dim = self.list.spec.dim() as usize;
        if codes.len() != ids.len() * dim {
            return Err(Error::InvalidParameter(format!(
                "{} ids for {} elements of dim {dim}",
                ids.len(),
                codes.len()
            )));
        }
        let offset = self.list.size();
        self.pack(res, codes, offset)?;
        self.write_indices(ids, offset)?;
        let new_size = offset + ids.len() as u32;
        self.publish(new_size)?;
        Ok(new_size)
    }
}
