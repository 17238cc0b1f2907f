//! Index maintenance helpers

use std::sync::Arc;

use super::Index;
use crate::structures::ivf::List;
use crate::structures::{Element, RecordId};

/// Empty every list of `index` so it can be rebuilt.
///
/// Each list is replaced by one of size 0 and capacity 0; the label
/// mapping, dim, veclen and params stay as they are. Snapshots taken
/// earlier keep their data. Idempotent.
pub fn reset_index<T: Element, IdxT: RecordId>(index: &Index<T, IdxT>) {
    for slot in &index.lists {
        let _writer = slot.writer.lock();
        slot.list.store(Arc::new(List::empty(index.spec)));
    }
    log::debug!("Reset {} lists", index.lists.len());
}

impl<T: Element, IdxT: RecordId> Index<T, IdxT> {
    /// See [`reset_index`].
    pub fn reset(&self) {
        reset_index(self)
    }
}
