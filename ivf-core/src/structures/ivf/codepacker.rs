//! Interleaved codepacker
//!
//! Moves vectors between the flat row-major layout (`flat[r * dim + d]`) and
//! the interleaved layout of list data buffers. Within a super-block of
//! `INDEX_GROUP_SIZE` records, chunk `c` of every record is stored before
//! chunk `c + 1` of any of them, so one wide load reads the same chunk of
//! many records:
//!
//! ```text
//! offset(p, d) = (p / G) * G * dim        // super-block
//!              + (d / veclen) * G * veclen // chunk
//!              + (p % G) * veclen          // record within block
//!              + d % veclen
//! ```
//!
//! The transform is pure data movement, so pack followed by unpack is exact
//! for every element type.

use rayon::prelude::*;

use super::spec::{INDEX_GROUP_SIZE, ListExtents};
use crate::error::{Error, Result};
use crate::resources::Resources;

const G: usize = INDEX_GROUP_SIZE as usize;

/// Physical offset of dimension `d` of logical record `p`
#[inline]
pub fn physical_offset(p: u32, d: u32, dim: u32, veclen: u32) -> usize {
    let (p, d, dim, veclen) = (p as usize, d as usize, dim as usize, veclen as usize);
    (p / G) * G * dim + (d / veclen) * G * veclen + (p % G) * veclen + d % veclen
}

/// `(flat column, physical offset)` of each `veclen`-wide chunk of record `p`.
#[inline]
pub(crate) fn record_chunks(
    p: u32,
    dim: u32,
    veclen: u32,
) -> impl Iterator<Item = (usize, usize)> {
    let (dim, veclen) = (dim as usize, veclen as usize);
    let p = p as usize;
    let base = (p / G) * G * dim + (p % G) * veclen;
    (0..dim)
        .step_by(veclen)
        .map(move |col| (col, base + col * G))
}

/// Write one flat record into the interleaved buffer at logical position `offset`.
///
/// `block` is the start of the list data; it must cover the super-block of
/// `offset`, and `dim` must be a multiple of `veclen`.
///
/// # Panics
///
/// If `flat_code` is shorter than `dim` or `block` does not cover `offset`.
pub fn pack_1<T: Copy>(flat_code: &[T], block: &mut [T], dim: u32, veclen: u32, offset: u32) {
    debug_assert!(veclen > 0 && dim % veclen == 0);
    let v = veclen as usize;
    for (col, phys) in record_chunks(offset, dim, veclen) {
        block[phys..phys + v].copy_from_slice(&flat_code[col..col + v]);
    }
}

/// Read logical record `offset` out of the interleaved buffer into `flat_code`.
///
/// # Panics
///
/// If `flat_code` is shorter than `dim` or `block` does not cover `offset`.
pub fn unpack_1<T: Copy>(block: &[T], flat_code: &mut [T], dim: u32, veclen: u32, offset: u32) {
    debug_assert!(veclen > 0 && dim % veclen == 0);
    let v = veclen as usize;
    for (col, phys) in record_chunks(offset, dim, veclen) {
        flat_code[col..col + v].copy_from_slice(&block[phys..phys + v]);
    }
}

fn check_buffer(extents: &ListExtents, len: usize) -> Result<()> {
    if len != extents.len() {
        return Err(Error::InvalidParameter(format!(
            "list buffer holds {len} elements, extents {:?} require {}",
            extents.as_array(),
            extents.len()
        )));
    }
    Ok(())
}

fn batch_rows(codes_len: usize, dim: usize) -> Result<usize> {
    if dim == 0 || codes_len % dim != 0 {
        return Err(Error::InvalidParameter(format!(
            "batch of {codes_len} elements is not a whole number of {dim}-dim records"
        )));
    }
    Ok(codes_len / dim)
}

fn check_range(what: &'static str, offset: u32, n: usize, limit: usize) -> Result<()> {
    let end = offset as usize + n;
    if end > limit {
        return Err(Error::out_of_bounds(what, end, limit));
    }
    Ok(())
}

/// Pack a `[n_vec, dim]` row-major batch into `list_data` starting at logical `offset`.
///
/// Equivalent to `pack_1` for each record, fused per super-block. Fails with
/// `OutOfBounds` (leaving `list_data` untouched) if the batch does not fit
/// the capacity described by `extents`. Never allocates.
pub fn pack<T: Copy + Send + Sync>(
    res: &Resources,
    codes: &[T],
    extents: &ListExtents,
    offset: u32,
    list_data: &mut [T],
) -> Result<()> {
    check_buffer(extents, list_data.len())?;
    let dim = extents.dim() as usize;
    let n_vec = batch_rows(codes.len(), dim)?;
    check_range("pack", offset, n_vec, extents.rows())?;
    if n_vec == 0 {
        return Ok(());
    }

    let veclen = extents.veclen() as usize;
    let start = offset as usize;
    let end = start + n_vec;
    let first_group = start / G;
    let last_group = (end - 1) / G;

    res.install(|| {
        list_data
            .par_chunks_mut(extents.group_len())
            .enumerate()
            .skip(first_group)
            .take(last_group - first_group + 1)
            .for_each(|(group, block)| {
                let lo = start.max(group * G);
                let hi = end.min((group + 1) * G);
                for p in lo..hi {
                    let flat = &codes[(p - start) * dim..(p - start + 1) * dim];
                    let in_group = (p % G) * veclen;
                    for col in (0..dim).step_by(veclen) {
                        let dst = col * G + in_group;
                        block[dst..dst + veclen].copy_from_slice(&flat[col..col + veclen]);
                    }
                }
            });
    });
    Ok(())
}

/// Unpack `codes.len() / dim` consecutive records starting at logical `offset`.
///
/// The range only has to be physically covered by `list_data`; whether it
/// holds published records is the caller's concern.
pub fn unpack<T: Copy + Send + Sync>(
    res: &Resources,
    list_data: &[T],
    extents: &ListExtents,
    offset: u32,
    codes: &mut [T],
) -> Result<()> {
    check_buffer(extents, list_data.len())?;
    let dim = extents.dim();
    let n_take = batch_rows(codes.len(), dim as usize)?;
    check_range("unpack", offset, n_take, extents.rows())?;
    if n_take == 0 {
        return Ok(());
    }

    let veclen = extents.veclen();
    res.install(|| {
        codes
            .par_chunks_mut(dim as usize)
            .enumerate()
            .for_each(|(i, flat)| unpack_1(list_data, flat, dim, veclen, offset + i as u32));
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::prelude::*;

    use super::*;

    fn extents(n_rows: u32, dim: u32, veclen: u32) -> ListExtents {
        ListExtents::new(n_rows, dim, veclen)
    }

    #[test]
    fn test_single_record_scenario() {
        let res = Resources::new().unwrap();
        let ext = extents(32, 8, 4);
        let mut data = vec![0f32; ext.len()];
        let record = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];

        pack(&res, &record, &ext, 0, &mut data).unwrap();

        assert_eq!(&data[0..4], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&data[128..132], &[5.0, 6.0, 7.0, 8.0]);

        let mut out = [0f32; 8];
        unpack(&res, &data, &ext, 0, &mut out).unwrap();
        assert_eq!(out, record);
    }

    #[test]
    fn test_pack_1_unpack_1_every_position() {
        let (dim, veclen) = (12u32, 4u32);
        let mut block = vec![0i32; (G * dim as usize) * 2];
        for p in 0..(2 * G as u32) {
            let flat: Vec<i32> = (0..dim as i32).map(|d| p as i32 * 100 + d).collect();
            pack_1(&flat, &mut block, dim, veclen, p);
            let mut back = vec![0i32; dim as usize];
            unpack_1(&block, &mut back, dim, veclen, p);
            assert_eq!(back, flat);
        }
    }

    #[test]
    fn test_address_is_bijective_within_group() {
        for &(dim, veclen) in &[(8u32, 4u32), (16, 16), (6, 2), (5, 1)] {
            let mut seen = HashSet::new();
            for p in 0..G as u32 {
                for d in 0..dim {
                    let off = physical_offset(p, d, dim, veclen);
                    assert!(off < G * dim as usize);
                    assert!(seen.insert(off), "collision at p={p} d={d}");
                }
            }
            assert_eq!(seen.len(), G * dim as usize);
        }
    }

    #[test]
    fn test_address_matches_record_chunks() {
        let (dim, veclen) = (16u32, 4u32);
        for p in [0u32, 5, 31, 32, 70] {
            for (col, phys) in record_chunks(p, dim, veclen) {
                assert_eq!(phys, physical_offset(p, col as u32, dim, veclen));
            }
        }
    }

    #[test]
    fn test_batch_round_trip_at_offsets() {
        let res = Resources::new().unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for &(dim, veclen) in &[(8u32, 4u32), (24, 8), (3, 1), (64, 16)] {
            let ext = extents(200, dim, veclen);
            let cases = [(0u32, 0usize), (0, 1), (5, 40), (31, 2), (64, 100), (190, 34)];
            for &(offset, n_vec) in &cases {
                let mut data = vec![0u8; ext.len()];
                let codes: Vec<u8> = (0..n_vec * dim as usize).map(|_| rng.random()).collect();
                pack(&res, &codes, &ext, offset, &mut data).unwrap();

                let mut out = vec![0u8; codes.len()];
                unpack(&res, &data, &ext, offset, &mut out).unwrap();
                assert_eq!(out, codes, "dim={dim} veclen={veclen} offset={offset}");
            }
        }
    }

    #[test]
    fn test_batch_matches_single_record_packing() {
        let res = Resources::new().unwrap();
        let (dim, veclen) = (8u32, 2u32);
        let ext = extents(96, dim, veclen);
        let codes: Vec<f32> = (0..50 * dim).map(|i| i as f32 * 0.5).collect();

        let mut fused = vec![0f32; ext.len()];
        pack(&res, &codes, &ext, 17, &mut fused).unwrap();

        let mut single = vec![0f32; ext.len()];
        for (i, flat) in codes.chunks(dim as usize).enumerate() {
            pack_1(flat, &mut single, dim, veclen, 17 + i as u32);
        }
        assert_eq!(fused, single);
    }

    #[test]
    fn test_pack_out_of_bounds_leaves_buffer() {
        let res = Resources::new().unwrap();
        let ext = extents(32, 4, 4);
        let mut data = vec![9i8; ext.len()];
        let codes = vec![1i8; 4 * 3];

        let err = pack(&res, &codes, &ext, 30, &mut data).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { requested: 33, limit: 32, .. }));
        assert!(data.iter().all(|&x| x == 9));

        let mut out = vec![0i8; 4 * 2];
        assert!(matches!(
            unpack(&res, &data, &ext, 31, &mut out),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_rejects_mismatched_buffers() {
        let res = Resources::new().unwrap();
        let ext = extents(32, 8, 4);
        let mut short = vec![0f32; ext.len() - 1];
        assert!(matches!(
            pack(&res, &[0.0; 8], &ext, 0, &mut short),
            Err(Error::InvalidParameter(_))
        ));
        let mut data = vec![0f32; ext.len()];
        assert!(matches!(
            pack(&res, &[0.0; 7], &ext, 0, &mut data),
            Err(Error::InvalidParameter(_))
        ));
    }
}
