//! Multi-Picture Format (CIPA DC-007) directory.
//!
//! The directory is a little TIFF structure inside an APP2 segment. Image
//! offsets in it are relative to the TIFF header, which sits 8 bytes after
//! the segment's 0xFF (marker, length, `MPF\0`). The primary image always
//! has offset 0.

use std::ops::Range;

use hdrconv_core::{Error, Result};
use tracing::{debug, warn};

use crate::tiff::{TiffReader, TYPE_LONG, TYPE_UNDEFINED};

/// APP2 identifier of an MPF segment.
pub const MPF_IDENTIFIER: &[u8] = b"MPF\0";

/// Distance from the segment's 0xFF to the TIFF header.
pub const HEADER_OFFSET: usize = 2 + 2 + MPF_IDENTIFIER.len();

const TAG_VERSION: u16 = 0xB000;
const TAG_NUMBER_OF_IMAGES: u16 = 0xB001;
const TAG_MP_ENTRY: u16 = 0xB002;
const ENTRY_LEN: usize = 16;
const MAX_ENTRIES: usize = 64;

/// Baseline MP primary image.
pub const ATTRIBUTE_PRIMARY: u32 = 0x03_0000;
/// Dependent child image, used for gain maps.
pub const ATTRIBUTE_DEPENDENT: u32 = 0x00_0000;
const ATTRIBUTE_RESERVED: u32 = 0x3800_0000;

/// One image of the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpEntry {
    /// Individual image attribute.
    pub attribute: u32,
    /// Image size in bytes.
    pub size: u32,
    /// Offset from the TIFF header, 0 for the primary image.
    pub offset: u32,
}

/// Parsed MP index IFD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpDirectory {
    /// Entries in directory order; the first one is the primary image.
    pub entries: Vec<MpEntry>,
}

impl MpDirectory {
    /// Directory for a primary image followed by secondary images.
    pub fn new(entries: Vec<MpEntry>) -> Self {
        Self { entries }
    }

    /// Parse the segment payload following [`MPF_IDENTIFIER`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        let reader = TiffReader::with_header(data, Error::MpfParse)?;

        let mut image_count = None;
        let mut entry_table = None;
        for field in reader.entries(reader.first_ifd()?)? {
            match field.tag {
                TAG_VERSION => {
                    let version = reader.bytes::<4>(field.value_at)?;
                    if &version != b"0100" {
                        warn!(?version, "unexpected MPF version");
                    }
                }
                TAG_NUMBER_OF_IMAGES => image_count = Some(reader.u32(field.value_at)? as usize),
                TAG_MP_ENTRY => {
                    entry_table = Some((reader.u32(field.value_at)? as usize, field.count as usize))
                }
                _ => {}
            }
        }

        let image_count =
            image_count.ok_or_else(|| Error::MpfParse("missing NumberOfImages".into()))?;
        let (table, table_len) =
            entry_table.ok_or_else(|| Error::MpfParse("missing MP entry table".into()))?;
        if image_count == 0 || image_count > MAX_ENTRIES {
            return Err(Error::MpfParse(format!(
                "unsupported image count {}",
                image_count
            )));
        }
        if table_len != image_count * ENTRY_LEN {
            return Err(Error::MpfParse(format!(
                "MP entry table is {} bytes for {} images",
                table_len, image_count
            )));
        }

        let mut entries = Vec::with_capacity(image_count);
        for i in 0..image_count {
            let at = table + i * ENTRY_LEN;
            let entry = MpEntry {
                attribute: reader.u32(at)?,
                size: reader.u32(at + 4)?,
                offset: reader.u32(at + 8)?,
            };
            if entry.attribute & ATTRIBUTE_RESERVED != 0 {
                warn!(
                    index = i,
                    attribute = entry.attribute,
                    "MP entry has reserved attribute bits set"
                );
            }
            entries.push(entry);
        }
        if entries[0].offset != 0 {
            return Err(Error::MpfParse("primary image offset must be 0".into()));
        }
        debug!(count = entries.len(), "parsed MPF directory");

        Ok(Self { entries })
    }

    /// Serialized segment payload, identifier included. Always big-endian.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut mpf = Vec::with_capacity(Self::payload_len(self.entries.len()));
        mpf.extend_from_slice(MPF_IDENTIFIER);
        mpf.extend_from_slice(b"MM");
        mpf.extend_from_slice(&0x2Au16.to_be_bytes());
        mpf.extend_from_slice(&8u32.to_be_bytes());

        mpf.extend_from_slice(&3u16.to_be_bytes());
        let mut field = |tag: u16, kind: u16, count: u32, value: [u8; 4]| {
            mpf.extend_from_slice(&tag.to_be_bytes());
            mpf.extend_from_slice(&kind.to_be_bytes());
            mpf.extend_from_slice(&count.to_be_bytes());
            mpf.extend_from_slice(&value);
        };
        let table_len = (self.entries.len() * ENTRY_LEN) as u32;
        // TIFF header + entry count + 3 fields + next IFD pointer
        let table_offset: u32 = 8 + 2 + 3 * 12 + 4;
        field(TAG_VERSION, TYPE_UNDEFINED, 4, *b"0100");
        field(
            TAG_NUMBER_OF_IMAGES,
            TYPE_LONG,
            1,
            (self.entries.len() as u32).to_be_bytes(),
        );
        field(
            TAG_MP_ENTRY,
            TYPE_UNDEFINED,
            table_len,
            table_offset.to_be_bytes(),
        );
        mpf.extend_from_slice(&0u32.to_be_bytes());

        for entry in &self.entries {
            mpf.extend_from_slice(&entry.attribute.to_be_bytes());
            mpf.extend_from_slice(&entry.size.to_be_bytes());
            mpf.extend_from_slice(&entry.offset.to_be_bytes());
            mpf.extend_from_slice(&0u32.to_be_bytes());
        }
        mpf
    }

    /// Length of [`to_payload`](Self::to_payload) for `images` entries.
    pub const fn payload_len(images: usize) -> usize {
        MPF_IDENTIFIER.len() + 8 + 2 + 3 * 12 + 4 + images * ENTRY_LEN
    }

    /// Byte range of entry `index` within `file`, given the offset of the
    /// MPF segment's 0xFF byte.
    pub fn locate(&self, file: &[u8], segment_offset: usize, index: usize) -> Result<Range<usize>> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| Error::MpfParse(format!("no MP entry {}", index)))?;
        let start = if index == 0 {
            0
        } else {
            segment_offset + HEADER_OFFSET + entry.offset as usize
        };
        let end = start + entry.size as usize;
        if entry.size == 0 || end > file.len() {
            return Err(Error::MpfParse(format!(
                "MP entry {} ({} bytes at {}) exceeds the {} byte file",
                index,
                entry.size,
                start,
                file.len()
            )));
        }
        Ok(start..end)
    }
}
