use super::*;
use crate::error::Error;
use crate::index::{DistanceType, FORMAT_VERSION, MAGIC};

#[test]
fn test_save_and_load() {
    let res = Resources::new().unwrap();
    let params = IndexParams::new(6)
        .with_metric(DistanceType::CosineExpanded)
        .with_conservative_memory_allocation(true);
    let (index, _, _) = build_index(&res, params.clone(), 12, 300);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lists.ivf");
    index.save(&res, &path).unwrap();

    let loaded = Index::<f32, i64>::load(&res, &path).unwrap();
    assert_eq!(loaded.params(), &params);
    assert_eq!(loaded.dim(), 12);
    assert_eq!(loaded.veclen(), index.veclen());
    assert_eq!(loaded.list_sizes(), index.list_sizes());
    assert_eq!(dump(&res, &loaded), dump(&res, &index));
}

#[test]
fn test_loaded_index_can_be_extended() {
    let res = Resources::new().unwrap();
    let (index, _, _) = build_index(&res, IndexParams::new(3), 8, 50);
    let mut buf = Vec::new();
    index.serialize(&res, &mut buf).unwrap();

    let loaded = Index::<f32, i64>::deserialize(&res, &mut buf.as_slice()).unwrap();
    let (vectors, labels) = random_batch(9, 20, 8, 3);
    loaded
        .extend(&res, &vectors, None, &PrecomputedLabels(&labels))
        .unwrap();
    assert_eq!(loaded.size(), 70);
    let dumped = dump(&res, &loaded);
    assert_eq!(dumped[50].1, vectors[..8].to_vec());
    assert_eq!(dumped[69].0, 69);
}

#[test]
fn test_empty_lists_round_trip() {
    let res = Resources::new().unwrap();
    let index: Index<u8, u32> = Index::new(IndexParams::new(4), 32).unwrap();
    let mut buf = Vec::new();
    index.serialize(&res, &mut buf).unwrap();

    let loaded = Index::<u8, u32>::deserialize(&res, &mut buf.as_slice()).unwrap();
    assert_eq!(loaded.list_sizes(), vec![0; 4]);
    assert_eq!(loaded.veclen(), 16);
}

#[test]
fn test_header_checks() {
    let res = Resources::new().unwrap();
    let (index, _, _) = build_index(&res, IndexParams::new(2), 4, 10);
    let mut buf = Vec::new();
    index.serialize(&res, &mut buf).unwrap();
    assert_eq!(&buf[..4], &MAGIC.to_le_bytes());
    assert_eq!(&buf[4..8], &FORMAT_VERSION.to_le_bytes());

    let mut bad_magic = buf.clone();
    bad_magic[0] ^= 0xff;
    assert!(matches!(
        Index::<f32, i64>::deserialize(&res, &mut bad_magic.as_slice()),
        Err(Error::Version { .. })
    ));

    let mut bad_version = buf.clone();
    bad_version[4..8].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
    assert!(matches!(
        Index::<f32, i64>::deserialize(&res, &mut bad_version.as_slice()),
        Err(Error::Version { .. })
    ));

    assert!(matches!(
        Index::<u8, i64>::deserialize(&res, &mut buf.as_slice()),
        Err(Error::Version { .. })
    ));
    assert!(matches!(
        Index::<f32, u64>::deserialize(&res, &mut buf.as_slice()),
        Err(Error::Version { .. })
    ));

    let truncated = &buf[..buf.len() - 3];
    assert!(matches!(
        Index::<f32, i64>::deserialize(&res, &mut &truncated[..]),
        Err(Error::Format(_))
    ));
}

#[test]
fn test_load_missing_file_is_io_error() {
    let res = Resources::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Index::<f32, i64>::load(&res, dir.path().join("missing.ivf")),
        Err(Error::Io(_))
    ));
}
