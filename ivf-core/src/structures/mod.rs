mod element;
pub mod ivf;

pub use element::{Element, ElementType, RecordId, invalid_record};
pub use ivf::{
    DEFAULT_ALIGN_MAX, FlatListSpec, INDEX_GROUP_SIZE, List, ListExtents, ListSpec, ListView,
    ListWriter, calculate_veclen, codepacker, deserialize_list, resize_list, serialize_list,
};
