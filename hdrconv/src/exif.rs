//! Apple maker-note tags from a HEIF `Exif` item.
//!
//! The item is a 4-byte big-endian offset to the TIFF header (usually
//! skipping `Exif\0\0`) followed by the Exif TIFF block. The maker note
//! hangs off the Exif IFD. Apple's note is `Apple iOS\0`, a version, `MM`,
//! and then a big-endian IFD whose value offsets count from the start of
//! the note.

use hdrconv_core::{Error, Result};
use tracing::debug;

use crate::tiff::{TiffReader, TYPE_UNDEFINED};

const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_MAKER_NOTE: u16 = 0x927C;

/// Signature at the start of an Apple maker note.
pub const APPLE_MAKER_NOTE_SIGNATURE: &[u8] = b"Apple iOS\0";
const APPLE_IFD_OFFSET: usize = 14;

/// Maker-note tag 33, `HDRHeadroom`.
pub const TAG_HDR_HEADROOM: u16 = 33;
/// Maker-note tag 48, `HDRGain`.
pub const TAG_HDR_GAIN: u16 = 48;

/// Maker-note values 33 and 48 from the payload of an `Exif` item.
pub fn apple_hdr_tags(item: &[u8]) -> Result<(f32, f32)> {
    let header = item
        .get(0..4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .ok_or_else(|| Error::Metadata("Exif item is too short".into()))?;
    let tiff = header
        .checked_add(4)
        .and_then(|start| item.get(start..))
        .ok_or_else(|| Error::Metadata("Exif TIFF header offset out of range".into()))?;

    let reader = TiffReader::with_header(tiff, Error::Metadata)?;
    let exif_ifd = reader
        .entries(reader.first_ifd()?)?
        .into_iter()
        .find(|e| e.tag == TAG_EXIF_IFD)
        .ok_or_else(|| Error::Metadata("Exif has no Exif IFD".into()))?;
    let note = reader
        .entries(reader.u32(exif_ifd.value_at)? as usize)?
        .into_iter()
        .find(|e| e.tag == TAG_MAKER_NOTE && e.kind == TYPE_UNDEFINED)
        .ok_or_else(|| Error::Metadata("Exif has no maker note".into()))?;
    let note = reader.slice(reader.u32(note.value_at)? as usize, note.count as usize)?;

    if !note.starts_with(APPLE_MAKER_NOTE_SIGNATURE) {
        return Err(Error::Metadata("maker note is not Apple's".into()));
    }
    let apple = TiffReader::with_order(note, true, Error::Metadata);
    let entries = apple.entries(APPLE_IFD_OFFSET)?;
    let value = |tag: u16| -> Result<f32> {
        let entry = entries
            .iter()
            .find(|e| e.tag == tag)
            .ok_or_else(|| Error::Metadata(format!("Apple maker note has no tag {}", tag)))?;
        apple.rational(entry)
    };
    let headroom = value(TAG_HDR_HEADROOM)?;
    let gain = value(TAG_HDR_GAIN)?;
    debug!(headroom, gain, "read Apple maker note");
    Ok((headroom, gain))
}
