//! Element and record-id types storable in IVF lists
//!
//! Every type carries a one-byte tag so persisted arrays can be checked
//! against the reader's instantiation before any data is decoded.

use std::fmt::Debug;
use std::hash::Hash;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Type tag stored in array descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    F32 = 0,
    I8 = 1,
    U8 = 2,
    I32 = 3,
    U32 = 4,
    I64 = 5,
    U64 = 6,
}

impl ElementType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::F32),
            1 => Some(Self::I8),
            2 => Some(Self::U8),
            3 => Some(Self::I32),
            4 => Some(Self::U32),
            5 => Some(Self::I64),
            6 => Some(Self::U64),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
        }
    }
}

/// A value that can be stored and persisted in a list buffer.
pub trait Element: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    const TYPE: ElementType;

    /// Write `values` little-endian
    fn write_slice<W: Write + ?Sized>(values: &[Self], writer: &mut W) -> io::Result<()>;

    /// Fill `out` from little-endian input
    fn read_slice<R: Read + ?Sized>(reader: &mut R, out: &mut [Self]) -> io::Result<()>;
}

/// A source-record id type.
///
/// `INVALID` is the sentinel marking an allocated-but-unused slot: the
/// maximum value for unsigned types, `-1` for signed ones.
pub trait RecordId: Element + Eq + Hash {
    const INVALID: Self;

    fn from_usize(v: usize) -> Option<Self>;
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;

    fn write_slice<W: Write + ?Sized>(values: &[Self], writer: &mut W) -> io::Result<()> {
        for &v in values {
            writer.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    }

    fn read_slice<R: Read + ?Sized>(reader: &mut R, out: &mut [Self]) -> io::Result<()> {
        reader.read_f32_into::<LittleEndian>(out)
    }
}

impl Element for i8 {
    const TYPE: ElementType = ElementType::I8;

    fn write_slice<W: Write + ?Sized>(values: &[Self], writer: &mut W) -> io::Result<()> {
        for &v in values {
            writer.write_i8(v)?;
        }
        Ok(())
    }

    fn read_slice<R: Read + ?Sized>(reader: &mut R, out: &mut [Self]) -> io::Result<()> {
        reader.read_i8_into(out)
    }
}

impl Element for u8 {
    const TYPE: ElementType = ElementType::U8;

    fn write_slice<W: Write + ?Sized>(values: &[Self], writer: &mut W) -> io::Result<()> {
        writer.write_all(values)
    }

    fn read_slice<R: Read + ?Sized>(reader: &mut R, out: &mut [Self]) -> io::Result<()> {
        reader.read_exact(out)
    }
}

macro_rules! impl_record_id {
    ($ty:ty, $tag:expr, $invalid:expr, $write:ident, $read_into:ident) => {
        impl Element for $ty {
            const TYPE: ElementType = $tag;

            fn write_slice<W: Write + ?Sized>(values: &[Self], writer: &mut W) -> io::Result<()> {
                for &v in values {
                    writer.$write::<LittleEndian>(v)?;
                }
                Ok(())
            }

            fn read_slice<R: Read + ?Sized>(reader: &mut R, out: &mut [Self]) -> io::Result<()> {
                reader.$read_into::<LittleEndian>(out)
            }
        }

        impl RecordId for $ty {
            const INVALID: Self = $invalid;

            fn from_usize(v: usize) -> Option<Self> {
                <$ty>::try_from(v).ok().filter(|&id| id != $invalid)
            }
        }
    };
}

impl_record_id!(i32, ElementType::I32, -1, write_i32, read_i32_into);
impl_record_id!(u32, ElementType::U32, u32::MAX, write_u32, read_u32_into);
impl_record_id!(i64, ElementType::I64, -1, write_i64, read_i64_into);
impl_record_id!(u64, ElementType::U64, u64::MAX, write_u64, read_u64_into);

/// Sentinel id for unused slots of lists indexed by `IdxT`
#[inline]
pub fn invalid_record<IdxT: RecordId>() -> IdxT {
    IdxT::INVALID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_record_values() {
        assert_eq!(invalid_record::<i64>(), -1);
        assert_eq!(invalid_record::<i32>(), -1);
        assert_eq!(invalid_record::<u32>(), u32::MAX);
        assert_eq!(invalid_record::<u64>(), u64::MAX);
    }

    #[test]
    fn test_from_usize_rejects_sentinel_and_overflow() {
        assert_eq!(u32::from_usize(5), Some(5));
        assert_eq!(u32::from_usize(u32::MAX as usize), None);
        assert_eq!(i32::from_usize(i32::MAX as usize + 1), None);
        assert_eq!(i64::from_usize(0), Some(0));
    }

    #[test]
    fn test_slices_persist_little_endian() {
        let mut buf = Vec::new();
        f32::write_slice(&[1.5, -2.0], &mut buf).unwrap();
        assert_eq!(&buf[..4], &1.5f32.to_le_bytes());

        let mut out = [0f32; 2];
        f32::read_slice(&mut buf.as_slice(), &mut out).unwrap();
        assert_eq!(out, [1.5, -2.0]);

        let mut buf = Vec::new();
        i64::write_slice(&[-1, 42], &mut buf).unwrap();
        let mut ids = [0i64; 2];
        i64::read_slice(&mut buf.as_slice(), &mut ids).unwrap();
        assert_eq!(ids, [-1, 42]);
    }

    #[test]
    fn test_short_read_is_eof() {
        let bytes = [0u8; 3];
        let mut out = [0u32; 1];
        let err = u32::read_slice(&mut bytes.as_slice(), &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(ElementType::from_u8(9), None);
        assert_eq!(ElementType::from_u8(5), Some(ElementType::I64));
    }
}
