//! Common test utilities: a lossless sample coder and synthetic images.
//!
//! [`StoredSampleCoder`] keeps raw samples instead of compressing them, so
//! container structure can be exercised exactly without a media codec.
//! JPEG "bitstreams" are SOI, a COM header, COM chunks of samples and EOI.
//! HEVC/AV1 payloads are the samples; the header goes in the decoder
//! configuration record.

#![allow(dead_code)]

use std::sync::Arc;

use hdrconv::jpeg::markers::{self, COM, MAX_SEGMENT_PAYLOAD};
use hdrconv::{
    Bitstream, CanonicalRendering, ColorSpace, ContainerMetadata, DecodedSamples,
    EncodedSamples, Error, GainmapMetadata, Image, ImageContainer, ImageRole, PixelData,
    Registry, Result, SampleCoder,
};

const HEADER_LEN: usize = 10;
const FLOAT_DEPTH: u8 = 32;

/// Lossless stand-in for a JPEG/HEVC/AV1 coder.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredSampleCoder;

fn header(width: u32, height: u32, channels: u8, depth: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.push(channels);
    out.push(depth);
    out
}

fn samples(pixels: &PixelData) -> (u8, Vec<u8>) {
    match pixels {
        PixelData::U8(v) => (8, v.clone()),
        PixelData::U16 { samples, bit_depth } => (
            *bit_depth,
            samples.iter().flat_map(|s| s.to_be_bytes()).collect(),
        ),
        PixelData::F32(v) => (FLOAT_DEPTH, v.iter().flat_map(|s| s.to_be_bytes()).collect()),
    }
}

fn unpack(header: &[u8], data: &[u8]) -> Result<DecodedSamples> {
    if header.len() != HEADER_LEN {
        return Err(Error::Coding("bad stored header".into()));
    }
    let width = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let height = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let channels = header[8];
    let depth = header[9];
    let count = width as usize * height as usize * channels as usize;
    let pixels = match depth {
        8 => PixelData::U8(data.to_vec()),
        9..=16 => PixelData::U16 {
            samples: data
                .chunks_exact(2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .collect(),
            bit_depth: depth,
        },
        FLOAT_DEPTH => PixelData::F32(
            data.chunks_exact(4)
                .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
        other => return Err(Error::Coding(format!("bad stored depth {}", other))),
    };
    if pixels.len() != count {
        return Err(Error::Coding("stored sample count mismatch".into()));
    }
    Ok(DecodedSamples {
        width,
        height,
        channels,
        pixels,
    })
}

impl SampleCoder for StoredSampleCoder {
    fn decode(
        &self,
        bitstream: Bitstream,
        config: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<DecodedSamples> {
        match bitstream {
            Bitstream::Jpeg => {
                let segments = markers::header_segments(payload)?;
                let mut comments = segments.iter().filter(|s| s.marker == COM);
                let head = comments
                    .next()
                    .ok_or_else(|| Error::Coding("no stored header".into()))?;
                let data: Vec<u8> = comments.flat_map(|s| s.payload.iter().copied()).collect();
                unpack(head.payload, &data)
            }
            Bitstream::Hevc | Bitstream::Av1 => {
                let config = config.ok_or_else(|| Error::Coding("missing config".into()))?;
                unpack(config, payload)
            }
        }
    }

    fn encode(&self, bitstream: Bitstream, image: &Image) -> Result<EncodedSamples> {
        let (depth, data) = samples(&image.pixels);
        let head = header(image.width, image.height, image.channels, depth);
        match bitstream {
            Bitstream::Jpeg => {
                let mut out = vec![0xFF, markers::SOI];
                markers::write_segment(&mut out, COM, &head)?;
                for chunk in data.chunks(MAX_SEGMENT_PAYLOAD) {
                    markers::write_segment(&mut out, COM, chunk)?;
                }
                out.extend_from_slice(&[0xFF, markers::EOI]);
                Ok(EncodedSamples {
                    payload: out,
                    decoder_config: None,
                })
            }
            Bitstream::Hevc | Bitstream::Av1 => Ok(EncodedSamples {
                payload: data,
                decoder_config: Some(head),
            }),
        }
    }
}

/// Shared coder handle.
pub fn coder() -> Arc<dyn SampleCoder> {
    Arc::new(StoredSampleCoder)
}

/// Registry with every format and the stored coder.
pub fn registry() -> Registry {
    Registry::new(coder())
}

/// HDR rendering: a horizontal ramp from black to `peak` with a tint that
/// changes per row.
pub fn hdr_gradient(width: u32, height: u32, peak: f32) -> CanonicalRendering {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        let tint = y as f32 / height.max(1) as f32;
        for x in 0..width {
            let t = x as f32 / (width - 1).max(1) as f32;
            let v = t * peak;
            data.extend_from_slice(&[v, v * (0.6 + 0.4 * tint), v * (1.0 - 0.5 * tint)]);
        }
    }
    CanonicalRendering::new(width, height, data).unwrap()
}

/// Uniform rendering.
pub fn flat(width: u32, height: u32, rgb: [f32; 3]) -> CanonicalRendering {
    let data = (0..width * height).flat_map(|_| rgb).collect();
    CanonicalRendering::new(width, height, data).unwrap()
}

/// Largest per-sample difference.
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

/// The 2x2 ISO container: linear 0.5 baseline, gain code 128, gains in
/// [0, 1], headroom 4.
pub fn half_gray_iso_container() -> ImageContainer {
    let baseline = Image::new(
        2,
        2,
        3,
        PixelData::F32(vec![0.5; 12]),
        ColorSpace::BT709_LINEAR,
        ImageRole::Source,
    )
    .unwrap();
    let gainmap = Image::new(
        2,
        2,
        1,
        PixelData::U8(vec![128; 4]),
        ColorSpace::BT709_LINEAR,
        ImageRole::Gainmap,
    )
    .unwrap();
    let metadata = GainmapMetadata {
        baseline_hdr_headroom: 1.0,
        alternate_hdr_headroom: 4.0,
        gainmap_min: [0.0; 3],
        gainmap_max: [1.0; 3],
        gainmap_gamma: [1.0; 3],
        ..Default::default()
    };
    ImageContainer::new(vec![baseline, gainmap], ContainerMetadata::Gainmap(metadata))
}
