//! ICC profiles carried in JPEG APP2 segments.
//!
//! Profiles written here are small matrix/TRC display profiles with a
//! `cicp` tag, which is what readers use to recover the colour space.
//! Profiles from elsewhere fall back to their description.

use hdrconv_core::color::{chromatic_adaptation_matrix, Chromaticity, BT709_ALPHA, BT709_BETA};
use hdrconv_core::{ColorSpace, Error, Result, TransferFunction};
use tracing::{debug, warn};

use super::markers::{write_segment, Segment, APP2, MAX_SEGMENT_PAYLOAD};

/// ICC profile APP2 identifier.
pub const ICC_IDENTIFIER: &[u8] = b"ICC_PROFILE\0";

/// Profile connection space illuminant.
const D50: Chromaticity = Chromaticity::new(0.3457, 0.3585);

const HEADER_LEN: usize = 128;

/// Descriptions of the spaces this crate writes.
const NAMED_SPACES: [(&str, ColorSpace); 6] = [
    ("sRGB", ColorSpace::SRGB),
    ("Display P3", ColorSpace::DISPLAY_P3),
    ("Linear BT.709", ColorSpace::BT709_LINEAR),
    ("Linear BT.2020", ColorSpace::BT2020_LINEAR),
    ("BT.2100 PQ", ColorSpace::BT2020_PQ),
    ("BT.2100 HLG", ColorSpace::BT2020_HLG),
];

/// Serialize a profile as one or more APP2 segments.
pub fn app2_segments(profile: &[u8]) -> Result<Vec<u8>> {
    let max_chunk = MAX_SEGMENT_PAYLOAD - ICC_IDENTIFIER.len() - 2;
    let chunks: Vec<&[u8]> = profile.chunks(max_chunk).collect();
    if chunks.len() > 255 {
        return Err(Error::LimitExceeded(format!(
            "ICC profile of {} bytes needs more than 255 segments",
            profile.len()
        )));
    }

    let mut out = Vec::with_capacity(profile.len() + chunks.len() * 18);
    for (i, chunk) in chunks.iter().enumerate() {
        let mut payload = Vec::with_capacity(ICC_IDENTIFIER.len() + 2 + chunk.len());
        payload.extend_from_slice(ICC_IDENTIFIER);
        // 1-based sequence number, then chunk count
        payload.push((i + 1) as u8);
        payload.push(chunks.len() as u8);
        payload.extend_from_slice(chunk);
        write_segment(&mut out, APP2, &payload)?;
    }
    Ok(out)
}

/// Reassemble a profile from the header segments of one JPEG.
pub fn collect_profile(segments: &[Segment<'_>]) -> Result<Option<Vec<u8>>> {
    let mut chunks: Vec<(u8, u8, &[u8])> = segments
        .iter()
        .filter_map(|s| s.tagged(APP2, ICC_IDENTIFIER))
        .map(|p| {
            if p.len() < 2 {
                return Err(Error::Format("ICC segment without sequence header".into()));
            }
            Ok((p[0], p[1], &p[2..]))
        })
        .collect::<Result<_>>()?;
    if chunks.is_empty() {
        return Ok(None);
    }

    chunks.sort_by_key(|(seq, _, _)| *seq);
    let total = chunks[0].1 as usize;
    let in_order = chunks
        .iter()
        .enumerate()
        .all(|(i, (seq, count, _))| *seq as usize == i + 1 && *count as usize == total);
    if chunks.len() != total || !in_order {
        return Err(Error::Format(format!(
            "ICC profile split into {} segments, header announces {}",
            chunks.len(),
            total
        )));
    }

    Ok(Some(chunks.iter().flat_map(|(_, _, c)| c.iter().copied()).collect()))
}

/// Build a display profile describing `space`.
pub fn profile_for(space: &ColorSpace) -> Vec<u8> {
    let description = NAMED_SPACES
        .iter()
        .find(|(_, s)| s == space)
        .map_or("hdrconv RGB", |(name, _)| *name);

    // Colorants are the columns of the D50-adapted RGB → XYZ matrix.
    let m = chromatic_adaptation_matrix(space.white, D50)
        .multiply(&space.to_xyz_matrix())
        .0;
    let colorant = |c: usize| xyz_tag([m[0][c], m[1][c], m[2][c]]);
    let trc = trc_tag(space.transfer);

    let mut tags: Vec<([u8; 4], Vec<u8>)> = vec![
        (*b"desc", mluc_tag(description)),
        (*b"cprt", mluc_tag("No copyright")),
        (*b"wtpt", xyz_tag(xyz(D50))),
        (*b"rXYZ", colorant(0)),
        (*b"gXYZ", colorant(1)),
        (*b"bXYZ", colorant(2)),
        (*b"rTRC", trc.clone()),
        (*b"gTRC", trc.clone()),
        (*b"bTRC", trc),
    ];
    if let Ok((primaries, transfer)) = space.cicp() {
        tags.push((*b"cicp", cicp_tag(primaries as u8, transfer as u8)));
    }

    let mut profile = Vec::with_capacity(1024);
    profile.extend_from_slice(&[0u8; 4]); // size, patched below
    profile.extend_from_slice(&[0u8; 4]); // preferred CMM
    profile.extend_from_slice(&[0x04, 0x40, 0x00, 0x00]); // version 4.4
    profile.extend_from_slice(b"mntr");
    profile.extend_from_slice(b"RGB ");
    profile.extend_from_slice(b"XYZ ");
    profile.extend_from_slice(&[0u8; 12]); // date
    profile.extend_from_slice(b"acsp");
    profile.extend_from_slice(&[0u8; 4]); // platform
    profile.extend_from_slice(&[0u8; 4]); // flags
    profile.extend_from_slice(&[0u8; 8]); // manufacturer, model
    profile.extend_from_slice(&[0u8; 8]); // attributes
    profile.extend_from_slice(&[0u8; 4]); // perceptual intent
    profile.extend_from_slice(&s15_fixed16(xyz(D50)));
    profile.extend_from_slice(&[0u8; 4]); // creator
    profile.extend_from_slice(&[0u8; 16]); // profile ID
    profile.resize(HEADER_LEN, 0);

    profile.extend_from_slice(&(tags.len() as u32).to_be_bytes());
    let mut offset = HEADER_LEN + 4 + tags.len() * 12;
    for (sig, data) in &tags {
        profile.extend_from_slice(sig);
        profile.extend_from_slice(&(offset as u32).to_be_bytes());
        profile.extend_from_slice(&(data.len() as u32).to_be_bytes());
        offset += align4(data.len());
    }
    for (_, data) in &tags {
        profile.extend_from_slice(data);
        profile.resize(align4(profile.len()), 0);
    }

    let size = profile.len() as u32;
    profile[0..4].copy_from_slice(&size.to_be_bytes());
    profile
}

/// Colour space described by a profile. Unknown profiles map to sRGB.
pub fn color_space_from_profile(profile: &[u8]) -> ColorSpace {
    if let Some(cicp) = find_tag(profile, b"cicp") {
        if cicp.len() >= 12 && &cicp[0..4] == b"cicp" {
            match ColorSpace::from_cicp(cicp[8] as u16, cicp[9] as u16) {
                Ok(space) => {
                    debug!(primaries = cicp[8], transfer = cicp[9], "ICC cicp tag");
                    return space;
                }
                Err(e) => debug!(error = %e, "ignoring ICC cicp tag"),
            }
        }
    }

    let description = find_tag(profile, b"desc").and_then(read_description);
    if let Some(found) = description.as_deref().and_then(|d| {
        NAMED_SPACES
            .iter()
            .find(|(name, _)| d.eq_ignore_ascii_case(name))
    }) {
        return found.1;
    }
    warn!(?description, "unrecognized ICC profile, assuming sRGB");
    ColorSpace::SRGB
}

fn find_tag<'a>(profile: &'a [u8], sig: &[u8; 4]) -> Option<&'a [u8]> {
    let be32 = |at: usize| {
        profile
            .get(at..at + 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
    };
    let count = be32(HEADER_LEN)?;
    (0..count.min(256)).find_map(|i| {
        let entry = HEADER_LEN + 4 + i * 12;
        if profile.get(entry..entry + 4)? != sig {
            return None;
        }
        let offset = be32(entry + 4)?;
        let size = be32(entry + 8)?;
        profile.get(offset..offset.checked_add(size)?)
    })
}

fn read_description(tag: &[u8]) -> Option<String> {
    match tag.get(0..4)? {
        // ICC v2 textDescriptionType: ASCII count + NUL-terminated text
        b"desc" => {
            let len = u32::from_be_bytes(tag.get(8..12)?.try_into().ok()?) as usize;
            let text = tag.get(12..12 + len)?;
            let text = text.split(|&b| b == 0).next()?;
            Some(String::from_utf8_lossy(text).into_owned())
        }
        // ICC v4 multiLocalizedUnicodeType: first record, UTF-16BE
        b"mluc" => {
            let len = u32::from_be_bytes(tag.get(20..24)?.try_into().ok()?) as usize;
            let offset = u32::from_be_bytes(tag.get(24..28)?.try_into().ok()?) as usize;
            let units: Vec<u16> = tag
                .get(offset..offset + len)?
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            Some(String::from_utf16_lossy(&units))
        }
        _ => None,
    }
}

fn mluc_tag(text: &str) -> Vec<u8> {
    let utf16: Vec<u8> = text.encode_utf16().flat_map(u16::to_be_bytes).collect();
    let mut data = Vec::with_capacity(28 + utf16.len());
    data.extend_from_slice(b"mluc");
    data.extend_from_slice(&[0u8; 4]);
    data.extend_from_slice(&1u32.to_be_bytes()); // records
    data.extend_from_slice(&12u32.to_be_bytes()); // record size
    data.extend_from_slice(b"enUS");
    data.extend_from_slice(&(utf16.len() as u32).to_be_bytes());
    data.extend_from_slice(&28u32.to_be_bytes());
    data.extend_from_slice(&utf16);
    data
}

fn xyz_tag(xyz: [f32; 3]) -> Vec<u8> {
    let mut data = Vec::with_capacity(20);
    data.extend_from_slice(b"XYZ ");
    data.extend_from_slice(&[0u8; 4]);
    data.extend_from_slice(&s15_fixed16(xyz));
    data
}

fn trc_tag(transfer: TransferFunction) -> Vec<u8> {
    // parametricCurveType 3: Y = (aX + b)^g for X >= d, Y = cX below
    let para = |params: [f32; 5]| {
        let mut data = Vec::with_capacity(32);
        data.extend_from_slice(b"para");
        data.extend_from_slice(&[0u8; 4]);
        data.extend_from_slice(&3u16.to_be_bytes());
        data.extend_from_slice(&[0u8; 2]);
        for p in params {
            data.extend_from_slice(&fixed(p).to_be_bytes());
        }
        data
    };
    match transfer {
        TransferFunction::Srgb => para([2.4, 1.0 / 1.055, 0.055 / 1.055, 1.0 / 12.92, 0.04045]),
        TransferFunction::Bt709 => para([
            1.0 / 0.45,
            (1.0 / BT709_ALPHA) as f32,
            ((BT709_ALPHA - 1.0) / BT709_ALPHA) as f32,
            1.0 / 4.5,
            (4.5 * BT709_BETA) as f32,
        ]),
        // Identity curve; PQ and HLG are only identified through `cicp`.
        TransferFunction::Linear | TransferFunction::Pq | TransferFunction::Hlg => {
            let mut data = Vec::with_capacity(12);
            data.extend_from_slice(b"curv");
            data.extend_from_slice(&[0u8; 4]);
            data.extend_from_slice(&0u32.to_be_bytes());
            data
        }
    }
}

fn cicp_tag(primaries: u8, transfer: u8) -> Vec<u8> {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(b"cicp");
    data.extend_from_slice(&[0u8; 4]);
    // RGB matrix coefficients, full range
    data.extend_from_slice(&[primaries, transfer, 0, 1]);
    data
}

fn xyz(c: Chromaticity) -> [f32; 3] {
    if c.y == 0.0 {
        return [0.0; 3];
    }
    [c.x / c.y, 1.0, (1.0 - c.x - c.y) / c.y]
}

fn fixed(v: f32) -> i32 {
    (v as f64 * 65536.0).round() as i32
}

fn s15_fixed16(v: [f32; 3]) -> [u8; 12] {
    let mut bytes = [0u8; 12];
    for (dst, v) in bytes.chunks_exact_mut(4).zip(v) {
        dst.copy_from_slice(&fixed(v).to_be_bytes());
    }
    bytes
}

fn align4(size: usize) -> usize {
    (size + 3) & !3
}
