//! Interleaved IVF list storage
//!
//! - `spec` - capacity → physical extents of a list buffer
//! - `list` - one cluster's data, ids and published size
//! - `codepacker` - flat ⇄ interleaved transforms
//! - `lifecycle` - resize, serialize and deserialize of single lists

pub mod codepacker;
mod lifecycle;
mod list;
mod spec;

pub use lifecycle::{deserialize_list, resize_list, serialize_list};
pub use list::{List, ListView, ListWriter};
pub use spec::{
    DEFAULT_ALIGN_MAX, FlatListSpec, INDEX_GROUP_SIZE, ListExtents, ListSpec, calculate_veclen,
};
