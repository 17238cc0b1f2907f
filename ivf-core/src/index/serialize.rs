//! Index persistence
//!
//! ```text
//! magic: u32 ("IVFL"), version: u32
//! value type tag: u8, id type tag: u8
//! dim: u32, veclen: u32
//! params_len: u32, params: JSON
//! n_lists: u32, then one list record per label
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{Index, IndexParams};
use crate::error::{Error, Result};
use crate::resources::Resources;
use crate::structures::ivf::{FlatListSpec, deserialize_list, serialize_list};
use crate::structures::{Element, ElementType, RecordId};

/// Leading bytes of a persisted index ("IVFL" little-endian)
pub const MAGIC: u32 = 0x4C46_5649;

pub const FORMAT_VERSION: u32 = 1;

/// Upper bound for the params blob
const MAX_PARAMS_LEN: u32 = 1 << 20;

impl<T: Element, IdxT: RecordId> Index<T, IdxT> {
    /// Write the index to `writer`.
    ///
    /// Each list is written from a snapshot while its writers are held off.
    pub fn serialize<W: Write + ?Sized>(&self, res: &Resources, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(MAGIC)?;
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        writer.write_u8(T::TYPE as u8)?;
        writer.write_u8(IdxT::TYPE as u8)?;
        writer.write_u32::<LittleEndian>(self.dim())?;
        writer.write_u32::<LittleEndian>(self.veclen())?;

        let params = serde_json::to_vec(&self.params)
            .map_err(|e| Error::Internal(format!("failed to encode params: {e}")))?;
        writer.write_u32::<LittleEndian>(params.len() as u32)?;
        writer.write_all(&params)?;

        writer.write_u32::<LittleEndian>(self.n_lists())?;
        for label in 0..self.n_lists() {
            let list = self.list(label)?;
            serialize_list(res, writer, &list, &self.spec, None)?;
        }
        log::debug!(
            "Serialized index: {} lists, {} records, dim {}",
            self.n_lists(),
            self.size(),
            self.dim()
        );
        Ok(())
    }

    /// Read an index written by [`Index::serialize`].
    pub fn deserialize<R: Read + ?Sized>(res: &Resources, reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>().map_err(Error::from_read)?;
        if magic != MAGIC {
            return Err(Error::Version {
                expected: format!("magic {MAGIC:#010x}"),
                found: format!("magic {magic:#010x}"),
            });
        }
        let version = reader.read_u32::<LittleEndian>().map_err(Error::from_read)?;
        if version != FORMAT_VERSION {
            return Err(Error::Version {
                expected: format!("format version {FORMAT_VERSION}"),
                found: format!("format version {version}"),
            });
        }
        check_type_tag("value", T::TYPE, reader.read_u8().map_err(Error::from_read)?)?;
        check_type_tag("id", IdxT::TYPE, reader.read_u8().map_err(Error::from_read)?)?;
        let dim = reader.read_u32::<LittleEndian>().map_err(Error::from_read)?;
        let veclen = reader.read_u32::<LittleEndian>().map_err(Error::from_read)?;

        let params_len = reader.read_u32::<LittleEndian>().map_err(Error::from_read)?;
        if params_len > MAX_PARAMS_LEN {
            return Err(Error::Format(format!("params blob of {params_len} bytes")));
        }
        let mut params = vec![0u8; params_len as usize];
        reader.read_exact(&mut params).map_err(Error::from_read)?;
        let params: IndexParams = serde_json::from_slice(&params)
            .map_err(|e| Error::Format(format!("invalid params: {e}")))?;

        let n_lists = reader.read_u32::<LittleEndian>().map_err(Error::from_read)?;
        if n_lists != params.n_lists {
            return Err(Error::Format(format!(
                "{n_lists} lists stored, params declare {}",
                params.n_lists
            )));
        }
        let spec = FlatListSpec::new(dim, veclen, params.conservative_memory_allocation)
            .map_err(|e| Error::Format(format!("invalid list layout: {e}")))?;

        let lists = (0..n_lists)
            .map(|_| deserialize_list(res, reader, &spec, &spec))
            .collect::<Result<Vec<_>>>()?;
        let index = Self::from_lists(params, spec, lists);
        log::debug!(
            "Deserialized index: {} lists, {} records, dim {}",
            index.n_lists(),
            index.size(),
            dim
        );
        Ok(index)
    }

    /// Write the index to a file at `path`
    pub fn save(&self, res: &Resources, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.serialize(res, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Read an index from a file at `path`
    pub fn load(res: &Resources, path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::deserialize(res, &mut reader)
    }
}

fn check_type_tag(what: &str, expected: ElementType, found: u8) -> Result<()> {
    if found != expected as u8 {
        let found = ElementType::from_u8(found)
            .map_or_else(|| format!("tag {found}"), |t| t.name().to_string());
        return Err(Error::Version {
            expected: format!("{what} type {}", expected.name()),
            found: format!("{what} type {found}"),
        });
    }
    Ok(())
}
