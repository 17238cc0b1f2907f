//! Build parameters of an IVF index

use serde::{Deserialize, Serialize};

/// Distance the index was built for. Stored with the index, never evaluated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceType {
    #[default]
    L2Expanded,
    L2SqrtExpanded,
    InnerProduct,
    CosineExpanded,
}

/// Configuration for an IVF index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    /// Number of inverted lists (clusters)
    pub n_lists: u32,
    #[serde(default)]
    pub metric: DistanceType,
    /// Grow lists one group at a time instead of by powers of two
    #[serde(default)]
    pub conservative_memory_allocation: bool,
    /// Interleave width; derived from the element type and dim when unset
    #[serde(default)]
    pub veclen: Option<u32>,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl IndexParams {
    pub fn new(n_lists: u32) -> Self {
        Self {
            n_lists,
            metric: DistanceType::default(),
            conservative_memory_allocation: false,
            veclen: None,
        }
    }

    pub fn with_metric(mut self, metric: DistanceType) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_conservative_memory_allocation(mut self, conservative: bool) -> Self {
        self.conservative_memory_allocation = conservative;
        self
    }

    pub fn with_veclen(mut self, veclen: u32) -> Self {
        self.veclen = Some(veclen);
        self
    }
}
