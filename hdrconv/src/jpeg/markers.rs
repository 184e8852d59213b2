//! JPEG marker segment walking and writing.

use hdrconv_core::{Error, Result};

/// Start of image.
pub const SOI: u8 = 0xD8;
/// End of image.
pub const EOI: u8 = 0xD9;
/// Start of scan.
pub const SOS: u8 = 0xDA;
/// APP0 (JFIF).
pub const APP0: u8 = 0xE0;
/// APP1 (EXIF/XMP).
pub const APP1: u8 = 0xE1;
/// APP2 (ICC/MPF/ISO gain map).
pub const APP2: u8 = 0xE2;
/// Comment.
pub const COM: u8 = 0xFE;

/// Largest payload a length-prefixed segment can carry.
pub const MAX_SEGMENT_PAYLOAD: usize = 0xFFFF - 2;

/// A marker segment of a JPEG header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Marker byte (the one following 0xFF).
    pub marker: u8,
    /// Segment payload, excluding marker and length bytes.
    pub payload: &'a [u8],
    /// Offset of the 0xFF byte in the walked buffer.
    pub offset: usize,
}

impl<'a> Segment<'a> {
    /// Payload following `identifier`, if this segment is `marker` and
    /// starts with it.
    pub fn tagged(&self, marker: u8, identifier: &[u8]) -> Option<&'a [u8]> {
        if self.marker == marker {
            self.payload.strip_prefix(identifier)
        } else {
            None
        }
    }
}

/// Whether the buffer starts with SOI.
pub fn starts_with_soi(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == SOI
}

/// Markers that stand alone without a length field.
fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD7 | SOI | EOI)
}

/// Walk the header segments of one JPEG, stopping at SOS or EOI.
///
/// Entropy-coded data is never scanned, so byte patterns inside it cannot
/// be mistaken for markers.
pub fn header_segments(data: &[u8]) -> Result<Vec<Segment<'_>>> {
    if !starts_with_soi(data) {
        return Err(Error::Format("not a JPEG (missing SOI)".into()));
    }

    let mut segments = Vec::new();
    let mut pos = 2;
    loop {
        if pos >= data.len() {
            return Err(Error::Format("JPEG header truncated".into()));
        }
        if data[pos] != 0xFF {
            return Err(Error::Format(format!(
                "expected marker at offset {}, found 0x{:02X}",
                pos, data[pos]
            )));
        }
        // Fill bytes
        while pos + 1 < data.len() && data[pos + 1] == 0xFF {
            pos += 1;
        }
        if pos + 1 >= data.len() {
            return Err(Error::Format("JPEG header truncated".into()));
        }

        let marker = data[pos + 1];
        let offset = pos;
        if marker == EOI {
            break;
        }
        if is_standalone(marker) {
            pos += 2;
            continue;
        }
        if pos + 4 > data.len() {
            return Err(Error::Format("JPEG segment length truncated".into()));
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if length < 2 || pos + 2 + length > data.len() {
            return Err(Error::Format(format!(
                "invalid segment length {} at offset {}",
                length, offset
            )));
        }
        segments.push(Segment {
            marker,
            payload: &data[pos + 4..pos + 2 + length],
            offset,
        });
        pos += 2 + length;

        if marker == SOS {
            break;
        }
    }

    Ok(segments)
}

/// Append one length-prefixed segment.
pub fn write_segment(out: &mut Vec<u8>, marker: u8, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_SEGMENT_PAYLOAD {
        return Err(Error::LimitExceeded(format!(
            "segment payload of {} bytes exceeds {}",
            payload.len(),
            MAX_SEGMENT_PAYLOAD
        )));
    }
    out.extend_from_slice(&[0xFF, marker]);
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Position after SOI and any leading APP0/APP1 segments, where
/// application segments of our own are inserted.
pub fn insert_position(jpeg: &[u8]) -> Result<usize> {
    let segments = header_segments(jpeg)?;
    let mut pos = 2;
    for segment in segments {
        if segment.offset != pos || !matches!(segment.marker, APP0 | APP1) {
            break;
        }
        pos += 4 + segment.payload.len();
    }
    Ok(pos)
}

/// Splice already serialized segments into a coded JPEG.
pub fn insert_segments(jpeg: &[u8], segments: &[u8]) -> Result<Vec<u8>> {
    let pos = insert_position(jpeg)?;
    let mut out = Vec::with_capacity(jpeg.len() + segments.len());
    out.extend_from_slice(&jpeg[..pos]);
    out.extend_from_slice(segments);
    out.extend_from_slice(&jpeg[pos..]);
    Ok(out)
}
