//! Bounds-checked reader for the small TIFF structures embedded in MPF
//! segments and Exif blocks.

use hdrconv_core::{Error, Result};

pub(crate) const TYPE_LONG: u16 = 4;
pub(crate) const TYPE_RATIONAL: u16 = 5;
pub(crate) const TYPE_UNDEFINED: u16 = 7;
pub(crate) const TYPE_SRATIONAL: u16 = 10;

const ENTRY_LEN: usize = 12;

/// One 12-byte IFD field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IfdEntry {
    pub tag: u16,
    pub kind: u16,
    pub count: u32,
    /// Position of the 4-byte value/offset field.
    pub value_at: usize,
}

pub(crate) struct TiffReader<'a> {
    data: &'a [u8],
    big_endian: bool,
    error: fn(String) -> Error,
}

impl<'a> TiffReader<'a> {
    /// Reader over a block starting with a TIFF header (`II`/`MM`, 42).
    pub fn with_header(data: &'a [u8], error: fn(String) -> Error) -> Result<Self> {
        let big_endian = match data.get(0..2) {
            Some(b"MM") => true,
            Some(b"II") => false,
            _ => return Err(error("invalid byte order mark".into())),
        };
        let reader = Self::with_order(data, big_endian, error);
        if reader.u16(2)? != 0x2A {
            return Err(error("invalid TIFF magic".into()));
        }
        Ok(reader)
    }

    /// Reader over headerless IFD data with a known byte order.
    pub fn with_order(data: &'a [u8], big_endian: bool, error: fn(String) -> Error) -> Self {
        Self {
            data,
            big_endian,
            error,
        }
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| (self.error)(format!("read past end at offset {}", offset)))
    }

    pub fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N)?);
        Ok(out)
    }

    pub fn u16(&self, offset: usize) -> Result<u16> {
        let b = self.bytes::<2>(offset)?;
        Ok(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    pub fn u32(&self, offset: usize) -> Result<u32> {
        let b = self.bytes::<4>(offset)?;
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    /// Offset of IFD0, read from the TIFF header.
    pub fn first_ifd(&self) -> Result<usize> {
        Ok(self.u32(4)? as usize)
    }

    /// Fields of the IFD at `offset`.
    pub fn entries(&self, offset: usize) -> Result<Vec<IfdEntry>> {
        let count = self.u16(offset)? as usize;
        // Whole table must be present before anything is allocated.
        self.slice(offset + 2, count * ENTRY_LEN)?;
        (0..count)
            .map(|i| {
                let at = offset + 2 + i * ENTRY_LEN;
                Ok(IfdEntry {
                    tag: self.u16(at)?,
                    kind: self.u16(at + 2)?,
                    count: self.u32(at + 4)?,
                    value_at: at + 8,
                })
            })
            .collect()
    }

    /// First value of a RATIONAL or SRATIONAL field.
    pub fn rational(&self, entry: &IfdEntry) -> Result<f32> {
        if entry.count == 0 {
            return Err((self.error)(format!("tag {} has no value", entry.tag)));
        }
        let at = self.u32(entry.value_at)? as usize;
        let (num, den) = (self.u32(at)?, self.u32(at + 4)?);
        let value = match entry.kind {
            TYPE_RATIONAL => num as f64 / den as f64,
            TYPE_SRATIONAL => num as i32 as f64 / den as i32 as f64,
            other => {
                return Err((self.error)(format!(
                    "tag {} has type {}, expected a rational",
                    entry.tag, other
                )))
            }
        };
        if den == 0 {
            return Err((self.error)(format!("tag {} has a zero denominator", entry.tag)));
        }
        Ok(value as f32)
    }
}
