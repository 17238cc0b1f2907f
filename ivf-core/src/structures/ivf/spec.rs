//! Layout specs for interleaved IVF lists
//!
//! A spec turns a logical record count into the physical extents of a list's
//! data buffer. Records are grouped in super-blocks of `INDEX_GROUP_SIZE`;
//! inside a group every `veclen`-wide chunk of the `dim` columns is stored
//! for all records of the group before the next chunk starts:
//!
//! ```text
//! extents = [n_groups, dim / veclen, INDEX_GROUP_SIZE, veclen]
//! ```
//!
//! Specs are pure values: the lifecycle manager and the codepacker derive
//! identical addressing from the same spec.

use std::fmt::Debug;
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::structures::element::{Element, RecordId};

/// Number of records interleaved together in one super-block
pub const INDEX_GROUP_SIZE: u32 = 32;

/// Capacity above which lists grow linearly instead of by powers of two
pub const DEFAULT_ALIGN_MAX: u32 = 1024;

/// Physical shape of a list data buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListExtents {
    n_groups: u32,
    n_chunks: u32,
    veclen: u32,
}

impl ListExtents {
    /// Extents for `n_rows` records, rounded up to whole groups
    pub(crate) fn new(n_rows: u32, dim: u32, veclen: u32) -> Self {
        Self {
            n_groups: n_rows.div_ceil(INDEX_GROUP_SIZE),
            n_chunks: dim / veclen,
            veclen,
        }
    }

    pub fn n_groups(&self) -> u32 {
        self.n_groups
    }

    pub fn n_chunks(&self) -> u32 {
        self.n_chunks
    }

    pub fn group_size(&self) -> u32 {
        INDEX_GROUP_SIZE
    }

    pub fn veclen(&self) -> u32 {
        self.veclen
    }

    pub fn dim(&self) -> u32 {
        self.n_chunks * self.veclen
    }

    /// Record slots covered by these extents
    pub fn rows(&self) -> usize {
        self.n_groups as usize * INDEX_GROUP_SIZE as usize
    }

    /// Elements in one super-block
    pub fn group_len(&self) -> usize {
        INDEX_GROUP_SIZE as usize * self.dim() as usize
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.n_groups as usize * self.group_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_array(&self) -> [u32; 4] {
        [self.n_groups, self.n_chunks, INDEX_GROUP_SIZE, self.veclen]
    }
}

/// Capacity → layout contract shared by lists, the codepacker and the lifecycle manager.
pub trait ListSpec: Clone + Debug + Send + Sync + 'static {
    type Value: Element;
    type Index: RecordId;

    fn dim(&self) -> u32;

    fn veclen(&self) -> u32;

    /// Smallest allocation granule (records)
    fn align_min(&self) -> u32;

    /// Capacity from which growth switches from powers of two to `align_min` steps
    fn align_max(&self) -> u32;

    fn make_list_extents(&self, n_rows: u32) -> ListExtents {
        ListExtents::new(n_rows, self.dim(), self.veclen())
    }

    /// Record capacity allocated for a list that must hold `n_rows` records.
    ///
    /// Small lists round up to a power of two bounded by `align_max`, larger
    /// ones to a multiple of `align_max`. Returns None on overflow.
    fn list_capacity(&self, n_rows: u32) -> Option<u32> {
        let align_min = self.align_min();
        let align_max = self.align_max();
        if n_rows < align_max {
            let bounded = n_rows.max(align_min).checked_next_power_of_two()?;
            Some(bounded.min(align_max))
        } else {
            n_rows.checked_next_multiple_of(align_max)
        }
    }

    /// Whether two specs address records identically
    fn same_layout(&self, other: &Self) -> bool {
        self.dim() == other.dim() && self.veclen() == other.veclen()
    }
}

/// Spec for lists of uncompressed vectors of `T` with source ids `IdxT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatListSpec<T, IdxT> {
    dim: u32,
    veclen: u32,
    align_min: u32,
    align_max: u32,
    _marker: PhantomData<fn() -> (T, IdxT)>,
}

impl<T: Element, IdxT: RecordId> FlatListSpec<T, IdxT> {
    /// Create a spec; `conservative_memory_allocation` grows lists one group at a time.
    pub fn new(dim: u32, veclen: u32, conservative_memory_allocation: bool) -> Result<Self> {
        validate_layout(dim, veclen)?;
        Ok(Self {
            dim,
            veclen,
            align_min: INDEX_GROUP_SIZE,
            align_max: if conservative_memory_allocation {
                INDEX_GROUP_SIZE
            } else {
                DEFAULT_ALIGN_MAX
            },
            _marker: PhantomData,
        })
    }

    /// Same spec with a different interleave width
    pub fn with_veclen(&self, veclen: u32) -> Result<Self> {
        validate_layout(self.dim, veclen)?;
        Ok(Self { veclen, ..*self })
    }
}

impl<T: Element, IdxT: RecordId> ListSpec for FlatListSpec<T, IdxT> {
    type Value = T;
    type Index = IdxT;

    fn dim(&self) -> u32 {
        self.dim
    }

    fn veclen(&self) -> u32 {
        self.veclen
    }

    fn align_min(&self) -> u32 {
        self.align_min
    }

    fn align_max(&self) -> u32 {
        self.align_max
    }
}

pub(crate) fn validate_layout(dim: u32, veclen: u32) -> Result<()> {
    if dim == 0 {
        return Err(Error::InvalidParameter("dim must be positive".to_string()));
    }
    if !veclen.is_power_of_two() {
        return Err(Error::InvalidParameter(format!(
            "veclen must be a power of two, got {veclen}"
        )));
    }
    if dim % veclen != 0 {
        return Err(Error::InvalidParameter(format!(
            "dim {dim} is not a multiple of veclen {veclen}"
        )));
    }
    Ok(())
}

/// Widest interleave chunk (at most 16 bytes) that evenly divides `dim`.
pub fn calculate_veclen<T>(dim: u32) -> u32 {
    let mut veclen = (16 / std::mem::size_of::<T>()).max(1) as u32;
    while veclen > 1 && dim % veclen != 0 {
        veclen >>= 1;
    }
    veclen
}

#[cfg(test)]
mod tests {
    use super::*;

    type Spec = FlatListSpec<f32, i64>;

    #[test]
    fn test_extents_round_to_groups() {
        let spec = Spec::new(8, 4, false).unwrap();
        let ext = spec.make_list_extents(33);
        assert_eq!(ext.as_array(), [2, 2, 32, 4]);
        assert_eq!(ext.rows(), 64);
        assert_eq!(ext.len(), 64 * 8);
        assert!(spec.make_list_extents(0).is_empty());
    }

    #[test]
    fn test_extents_monotonic() {
        let spec = Spec::new(12, 4, false).unwrap();
        let mut prev = 0;
        for n in 0..300 {
            let len = spec.make_list_extents(n).len();
            assert!(len >= prev);
            assert!(len >= n as usize * 12);
            prev = len;
        }
    }

    #[test]
    fn test_capacity_policy() {
        let spec = Spec::new(8, 4, false).unwrap();
        assert_eq!(spec.list_capacity(0), Some(32));
        assert_eq!(spec.list_capacity(33), Some(64));
        assert_eq!(spec.list_capacity(1000), Some(1024));
        assert_eq!(spec.list_capacity(1024), Some(1024));
        assert_eq!(spec.list_capacity(1025), Some(2048));
        assert_eq!(spec.list_capacity(1500), Some(2048));
        assert_eq!(spec.list_capacity(3000), Some(3072));
        assert_eq!(spec.list_capacity(u32::MAX), None);

        let conservative = Spec::new(8, 4, true).unwrap();
        assert_eq!(conservative.list_capacity(1), Some(32));
        assert_eq!(conservative.list_capacity(33), Some(64));
        assert_eq!(conservative.list_capacity(70), Some(96));
        assert_eq!(conservative.list_capacity(1025), Some(1056));
        assert_eq!(conservative.list_capacity(1500), Some(1504));
    }

    #[test]
    fn test_large_lists_grow_in_align_max_steps() {
        let spec = Spec::new(8, 4, false).unwrap();
        let mut capacity = 0;
        let mut reallocations = 0;
        for n in (64..=20_000).step_by(64) {
            if n > capacity {
                capacity = spec.list_capacity(n).unwrap();
                reallocations += 1;
            }
        }
        assert_eq!(capacity, 20_480);
        // 64..=1024 by doubling, then one step per 1024 records
        assert_eq!(reallocations, 5 + 19);
    }

    #[test]
    fn test_invalid_layouts() {
        assert!(Spec::new(0, 1, false).is_err());
        assert!(Spec::new(8, 3, false).is_err());
        assert!(Spec::new(6, 4, false).is_err());
        let spec = Spec::new(8, 4, false).unwrap();
        assert!(spec.with_veclen(16).is_err());
        assert_eq!(spec.with_veclen(2).unwrap().veclen(), 2);
        assert!(!spec.same_layout(&spec.with_veclen(2).unwrap()));
    }

    #[test]
    fn test_calculate_veclen() {
        assert_eq!(calculate_veclen::<f32>(128), 4);
        assert_eq!(calculate_veclen::<f32>(6), 2);
        assert_eq!(calculate_veclen::<f32>(7), 1);
        assert_eq!(calculate_veclen::<u8>(64), 16);
        assert_eq!(calculate_veclen::<i8>(24), 8);
    }
}
