//! JPEG plumbing for the UltraHDR layout: marker segments, the MPF
//! directory, ICC APP2 chunks, and the ISO gain map APP2 segment.

pub mod icc;
pub mod markers;
pub mod mpf;

use hdrconv_core::Result;

/// APP2 identifier of an ISO 21496-1 gain map segment.
pub const ISO_IDENTIFIER: &[u8] = b"urn:iso:std:iso:ts:21496:-1\0";

/// Serialized APP2 segment carrying an ISO gain map block (or its 4-byte
/// version-only form).
pub fn iso_segment(block: &[u8]) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(ISO_IDENTIFIER.len() + block.len());
    payload.extend_from_slice(ISO_IDENTIFIER);
    payload.extend_from_slice(block);
    let mut out = Vec::with_capacity(payload.len() + 4);
    markers::write_segment(&mut out, markers::APP2, &payload)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_segment_layout() {
        let seg = iso_segment(&[0, 0, 0, 0]).unwrap();
        assert_eq!(&seg[..2], &[0xFF, markers::APP2]);
        let len = u16::from_be_bytes([seg[2], seg[3]]) as usize;
        assert_eq!(len, 2 + ISO_IDENTIFIER.len() + 4);
        assert_eq!(&seg[4..4 + ISO_IDENTIFIER.len()], ISO_IDENTIFIER);
    }
}
