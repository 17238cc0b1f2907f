//! ivf-core - list storage for IVF vector indexes
//!
//! This library provides the per-cluster storage layer of an inverted-file
//! index:
//! - Interleaved list layout, with `veclen`-wide chunks of 32 records stored together
//! - Codepacker between row-major batches and the interleaved layout
//! - Lists with an atomically published size, read without locks
//! - Grow-on-demand resize that copies live records and swaps atomically
//! - Per-list and whole-index persistence with type and shape checks
//! - Index reset for rebuilding
//!
//! Clustering, distance computation and search are left to the caller.

pub mod error;
pub mod index;
pub mod resources;
pub mod structures;

pub use error::{Error, Result};
pub use index::{
    ClusterAssigner, DistanceType, Index, IndexParams, PerVector, PrecomputedLabels, reset_index,
};
pub use resources::{MemoryBudget, Resources, ResourcesConfig};
pub use structures::{
    Element, FlatListSpec, INDEX_GROUP_SIZE, List, ListSpec, ListView, ListWriter, RecordId,
    calculate_veclen, codepacker, deserialize_list, invalid_record, resize_list, serialize_list,
};
