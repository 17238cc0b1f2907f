//! List lifecycle: resize, serialize, deserialize
//!
//! Persisted list record (all integers little-endian):
//!
//! ```text
//! effective_length: u32
//! -- present only when effective_length > 0 --
//! indices descriptor: tag u8, rank u8 (= 1), [effective_length] u32
//! indices:            effective_length ids, padded with the invalid sentinel
//! data descriptor:    tag u8, rank u8 (= 4), [n_groups, dim/veclen, G, veclen] u32
//! data:               interleaved codes per the store spec, zero past the length
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::codepacker;
use super::list::List;
use super::spec::ListSpec;
use crate::error::{Error, Result};
use crate::resources::Resources;
use crate::structures::element::{Element, ElementType, RecordId};

/// Elements decoded per read call while loading arrays
const READ_CHUNK: usize = 1 << 16;

/// Highest rank accepted in an array descriptor
const MAX_RANK: u8 = 8;

/// Make `list` able to hold `new_used` records, keeping its first `old_used`.
///
/// Afterwards the list's size is `min(old_used, new_used)` on every path.
///
/// - capacity and layout already fit: nothing is copied while that size
///   equals the published one. A smaller size is set in place when the list
///   is not shared, and otherwise a trimmed copy is swapped in so held
///   snapshots stay intact.
/// - otherwise a new list is allocated per `spec`, the kept records and ids
///   are copied (repacked if the layouts differ) and the new list replaces
///   the old one.
///
/// On error `list` is left unchanged.
pub fn resize_list<S: ListSpec>(
    res: &Resources,
    list: &mut Arc<List<S>>,
    spec: &S,
    new_used: u32,
    old_used: u32,
) -> Result<()> {
    if spec.dim() != list.spec().dim() {
        return Err(Error::InvalidParameter(format!(
            "cannot resize a {}-dim list with a {}-dim spec",
            list.spec().dim(),
            spec.dim()
        )));
    }
    let size = list.size();
    if old_used > size {
        return Err(Error::out_of_bounds("used records", old_used as usize, size as usize));
    }

    let keep = old_used.min(new_used);
    if new_used <= list.capacity() && spec.same_layout(list.spec()) {
        if keep == size {
            return Ok(());
        }
        if let Some(unique) = Arc::get_mut(list) {
            return unique.set_size(keep);
        }
        log::warn!(
            "Truncating a shared list from {} to {} records, copying",
            size,
            keep
        );
        let mut trimmed = List::new(res, spec.clone(), new_used)?;
        copy_records(res, list, &mut trimmed, keep)?;
        *list = Arc::new(trimmed);
        return Ok(());
    }

    let mut grown = List::new(res, spec.clone(), new_used)?;
    copy_records(res, list, &mut grown, keep)?;
    log::debug!(
        "Resized list: capacity {} -> {}, kept {} records",
        list.capacity(),
        grown.capacity(),
        keep
    );
    *list = Arc::new(grown);
    Ok(())
}

/// Copy records and ids `[0, n)` from `src` into the fresh list `dst`, then set its size to `n`.
fn copy_records<S: ListSpec>(
    res: &Resources,
    src: &List<S>,
    dst: &mut List<S>,
    n: u32,
) -> Result<()> {
    if n > dst.capacity() {
        return Err(Error::out_of_bounds("copy", n as usize, dst.capacity() as usize));
    }
    let guard = src.lock_writes();
    let src_ext = src.extents();
    if n > 0 {
        if src.spec().same_layout(dst.spec()) {
            let len = src_ext.group_len() * n.div_ceil(src_ext.group_size()) as usize;
            dst.data_mut()[..len].copy_from_slice(src.data_locked(&guard, len));
        } else {
            let src_data = src.data_locked(&guard, src_ext.len());
            let (mut staging, _mem) =
                res.alloc_with(n as usize * src_ext.dim() as usize, S::Value::default)?;
            codepacker::unpack(res, src_data, &src_ext, 0, &mut staging)?;
            let dst_ext = dst.extents();
            codepacker::pack(res, &staging, &dst_ext, 0, dst.data_mut())?;
        }
        dst.indices_mut()[..n as usize].copy_from_slice(src.indices_locked(&guard, n as usize));
    }
    drop(guard);
    dst.set_size(n)
}

/// Write `list` as one record laid out per `store_spec`.
///
/// The effective length is `size_override` if given, else the current size.
/// Records beyond the published size are written as zero codes with
/// invalid ids. Every buffer is charged to the memory budget and allocated
/// before the first byte goes out, so an allocation failure writes nothing.
/// Writers of `list` are held off while it is read.
pub fn serialize_list<S, W>(
    res: &Resources,
    writer: &mut W,
    list: &List<S>,
    store_spec: &S,
    size_override: Option<u32>,
) -> Result<()>
where
    S: ListSpec,
    W: Write + ?Sized,
{
    if store_spec.dim() != list.spec().dim() {
        return Err(Error::InvalidParameter(format!(
            "cannot store a {}-dim list with a {}-dim spec",
            list.spec().dim(),
            store_spec.dim()
        )));
    }
    let guard = list.lock_writes();
    let size = list.size();
    let len = size_override.unwrap_or(size);
    if len == 0 {
        drop(guard);
        writer.write_u32::<LittleEndian>(0)?;
        return Ok(());
    }

    let live = len.min(size) as usize;
    let src_ext = list.extents();
    let store_ext = store_spec.make_list_extents(len);
    let (mut ids, _ids_mem) = res.alloc_with(len as usize, || S::Index::INVALID)?;
    ids[..live].copy_from_slice(list.indices_locked(&guard, live));
    let (mut staging, _staging_mem) =
        res.alloc_with(live * src_ext.dim() as usize, S::Value::default)?;
    let src_data = list.data_locked(&guard, src_ext.len());
    codepacker::unpack(res, src_data, &src_ext, 0, &mut staging)?;
    drop(guard);

    let (mut stored, _stored_mem) = res.alloc_with(store_ext.len(), S::Value::default)?;
    codepacker::pack(res, &staging, &store_ext, 0, &mut stored)?;

    writer.write_u32::<LittleEndian>(len)?;
    write_descriptor(writer, S::Index::TYPE, &[len])?;
    S::Index::write_slice(&ids, writer)?;
    write_descriptor(writer, S::Value::TYPE, &store_ext.as_array())?;
    S::Value::write_slice(&stored, writer)?;
    Ok(())
}

/// Read one record laid out per `store_spec` into a new list laid out per `device_spec`.
///
/// The returned list's size is the stored length. Nothing outside the
/// returned list is touched, so a failure leaves no partial state.
pub fn deserialize_list<S, R>(
    res: &Resources,
    reader: &mut R,
    store_spec: &S,
    device_spec: &S,
) -> Result<List<S>>
where
    S: ListSpec,
    R: Read + ?Sized,
{
    if store_spec.dim() != device_spec.dim() {
        return Err(Error::InvalidParameter(format!(
            "stored dim {} does not match device dim {}",
            store_spec.dim(),
            device_spec.dim()
        )));
    }
    let len = reader.read_u32::<LittleEndian>().map_err(Error::from_read)?;
    if len == 0 {
        return Ok(List::empty(device_spec.clone()));
    }

    expect_descriptor(reader, "indices", S::Index::TYPE, &[len])?;
    let ids: Vec<S::Index> = read_array(reader, len as usize)?;

    let store_ext = store_spec.make_list_extents(len);
    expect_descriptor(reader, "data", S::Value::TYPE, &store_ext.as_array())?;
    let stored: Vec<S::Value> = read_array(reader, store_ext.len())?;

    let mut list = List::new(res, device_spec.clone(), len)?;
    if store_spec.same_layout(device_spec) {
        list.data_mut()[..stored.len()].copy_from_slice(&stored);
    } else {
        let (mut staging, _mem) =
            res.alloc_with(len as usize * store_ext.dim() as usize, S::Value::default)?;
        codepacker::unpack(res, &stored, &store_ext, 0, &mut staging)?;
        let device_ext = list.extents();
        codepacker::pack(res, &staging, &device_ext, 0, list.data_mut())?;
    }
    list.indices_mut()[..ids.len()].copy_from_slice(&ids);
    list.set_size(len)?;
    Ok(list)
}

fn write_descriptor<W: Write + ?Sized>(
    writer: &mut W,
    tag: ElementType,
    extents: &[u32],
) -> Result<()> {
    writer.write_u8(tag as u8)?;
    writer.write_u8(extents.len() as u8)?;
    for &e in extents {
        writer.write_u32::<LittleEndian>(e)?;
    }
    Ok(())
}

fn expect_descriptor<R: Read + ?Sized>(
    reader: &mut R,
    what: &str,
    tag: ElementType,
    extents: &[u32],
) -> Result<()> {
    let raw_tag = reader.read_u8().map_err(Error::from_read)?;
    let found_tag = ElementType::from_u8(raw_tag)
        .ok_or_else(|| Error::Format(format!("unknown element type tag {raw_tag} for {what}")))?;
    let rank = reader.read_u8().map_err(Error::from_read)?;
    if rank > MAX_RANK {
        return Err(Error::Format(format!("{what} array has rank {rank}")));
    }
    let mut found = vec![0u32; rank as usize];
    reader
        .read_u32_into::<LittleEndian>(&mut found)
        .map_err(Error::from_read)?;

    if found_tag != tag {
        return Err(Error::Version {
            expected: format!("{what} of {}", tag.name()),
            found: format!("{what} of {}", found_tag.name()),
        });
    }
    if found != extents {
        return Err(Error::Version {
            expected: format!("{what} extents {extents:?}"),
            found: format!("{what} extents {found:?}"),
        });
    }
    Ok(())
}

/// Read `len` values in bounded chunks, so a corrupt length fails on EOF instead of allocating.
fn read_array<T: Element, R: Read + ?Sized>(reader: &mut R, len: usize) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(len.min(READ_CHUNK));
    let mut chunk = vec![T::default(); len.min(READ_CHUNK)];
    while out.len() < len {
        let n = (len - out.len()).min(READ_CHUNK);
        T::read_slice(reader, &mut chunk[..n]).map_err(Error::from_read)?;
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}
