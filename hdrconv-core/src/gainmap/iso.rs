//! ISO 21496-1 style reconstruction and generation.
//!
//! Per channel `c`, with `g` the decoded gain:
//!
//! ```text
//! hdr = max(b, b * (baseline_offset[c] + g^gamma[c])) - alternate_offset[c]
//! ```
//!
//! clamped to `[0, alternate_hdr_headroom]`. A gain factor below one never
//! darkens the baseline.

use rayon::prelude::*;
use tracing::debug;

use super::sample::GainSampler;
use super::{check_dimensions, convert_buffer, encode_baseline, gainmap_size};
use crate::color::{ColorSpace, GamutClip, TransferFunction};
use crate::image::{
    CanonicalRendering, ContainerMetadata, Image, ImageContainer, ImageRole, PixelData,
};
use crate::metadata::GainmapMetadata;
use crate::pipeline::GenerateOptions;
use crate::types::Result;

/// Reconstruct one channel.
#[inline]
pub fn reconstruct(baseline: f32, factor: f32, alternate_offset: f32, headroom: f32) -> f32 {
    (baseline.max(baseline * factor) - alternate_offset).clamp(0.0, headroom)
}

/// Compose a baseline and gain map into the canonical rendering.
pub fn compose(
    baseline: &Image,
    gainmap: &Image,
    meta: &GainmapMetadata,
) -> Result<CanonicalRendering> {
    meta.validate()?;
    check_dimensions(baseline, gainmap)?;

    let width = baseline.width;
    let headroom = meta.alternate_hdr_headroom;
    let base_space = baseline.color_space;
    // Gains apply in the baseline's primaries, or in the canonical ones
    // when the metadata says otherwise.
    let gain_space = if meta.use_base_colour_space {
        base_space
    } else {
        ColorSpace::CANONICAL
    };

    let mut data = baseline.to_linear_rgb();
    convert_buffer(&mut data, &base_space, &gain_space, GamutClip::Preserve);

    let sampler = GainSampler::new(gainmap, width, baseline.height, |c, stored| {
        meta.baseline_offset[c] + meta.decode_gain(c, stored).powf(meta.gainmap_gamma[c])
    });

    data.par_chunks_mut(width as usize * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let factor = sampler.sample(x as u32, y as u32);
                for c in 0..3 {
                    px[c] = reconstruct(px[c], factor[c], meta.alternate_offset[c], headroom);
                }
            }
        });

    convert_buffer(&mut data, &gain_space, &ColorSpace::CANONICAL, GamutClip::Clip);
    CanonicalRendering::new(width, baseline.height, data)
}

/// Gain that makes `reconstruct(b, ...)` return `h`, before quantization.
///
/// `None` when the baseline is black and any gain reconstructs the same
/// value.
#[inline]
fn solve(h: f32, b: f32, gamma: f32, baseline_offset: f32, alternate_offset: f32) -> Option<f32> {
    if b <= 0.0 {
        return None;
    }
    let term = ((h + alternate_offset) / b - baseline_offset).max(0.0);
    Some(term.powf(1.0 / gamma))
}

/// Generate baseline, gain map and metadata from the canonical rendering.
pub fn generate(
    rendering: &CanonicalRendering,
    options: &GenerateOptions,
) -> Result<ImageContainer> {
    let space = options.baseline_color_space.unwrap_or(ColorSpace::SRGB);
    let baseline = encode_baseline(rendering, options, space)?;

    let (width, height) = (rendering.width(), rendering.height());
    let scale = options.gainmap_scale;
    let (gm_width, gm_height) = gainmap_size(width, height, scale);
    let channels = if options.multichannel { 3 } else { 1 };

    // Single-channel metadata must be uniform, so channel 0 options rule.
    let pick = |values: [f32; 3]| {
        if options.multichannel {
            values
        } else {
            [values[0]; 3]
        }
    };
    let gamma = pick(options.gamma);
    let baseline_offset = pick(options.baseline_offset);
    let alternate_offset = pick(options.alternate_offset);

    let weights = space.luminance_coefficients();
    let luminance = |v: &[f32]| weights[0] * v[0] + weights[1] * v[1] + weights[2] * v[2];

    let mut gains = vec![f32::NAN; gm_width as usize * gm_height as usize * channels];
    gains
        .par_chunks_mut(gm_width as usize * channels)
        .enumerate()
        .for_each(|(gy, row)| {
            for gx in 0..gm_width {
                let (h, b) = baseline.at_gain_pixel(gx, gy as u32, gm_width, gm_height);
                let out = &mut row[gx as usize * channels..(gx as usize + 1) * channels];
                if channels == 1 {
                    out[0] = solve(
                        luminance(&h),
                        luminance(&b),
                        gamma[0],
                        baseline_offset[0],
                        alternate_offset[0],
                    )
                    .unwrap_or(f32::NAN);
                } else {
                    for c in 0..3 {
                        out[c] =
                            solve(h[c], b[c], gamma[c], baseline_offset[c], alternate_offset[c])
                                .unwrap_or(f32::NAN);
                    }
                }
            }
        });

    let mut gainmap_min = [f32::INFINITY; 3];
    let mut gainmap_max = [f32::NEG_INFINITY; 3];
    for px in gains.chunks_exact(channels) {
        for (c, &g) in px.iter().enumerate() {
            if g.is_finite() {
                gainmap_min[c] = gainmap_min[c].min(g);
                gainmap_max[c] = gainmap_max[c].max(g);
            }
        }
    }
    for c in 0..3 {
        if gainmap_min[c] > gainmap_max[c] {
            // Nothing constrained this channel (all-black baseline).
            gainmap_min[c] = 1.0;
            gainmap_max[c] = 1.0;
        }
    }

    let meta = GainmapMetadata {
        alternate_hdr_headroom: options.target_headroom,
        is_multichannel: options.multichannel,
        use_base_colour_space: true,
        gainmap_min: pick(gainmap_min),
        gainmap_max: pick(gainmap_max),
        gainmap_gamma: gamma,
        baseline_offset,
        alternate_offset,
        ..Default::default()
    };
    meta.validate()?;
    debug!(
        gm_width,
        gm_height,
        channels,
        min = ?meta.gainmap_min,
        max = ?meta.gainmap_max,
        "solved ISO gain map"
    );

    let storage_max = options.storage_max();
    let codes: Vec<u32> = gains
        .par_iter()
        .enumerate()
        .map(|(i, &g)| {
            let c = i % channels;
            // Unconstrained gains can take any code; use the minimum.
            let g = if g.is_finite() { g } else { meta.gainmap_min[c] };
            meta.encode_gain(c, g, storage_max)
        })
        .collect();
    let pixels = if options.bit_depth == 8 {
        PixelData::U8(codes.into_iter().map(|v| v as u8).collect())
    } else {
        PixelData::U16 {
            samples: codes.into_iter().map(|v| v as u16).collect(),
            bit_depth: options.bit_depth,
        }
    };
    let gainmap = Image::new(
        gm_width,
        gm_height,
        channels as u8,
        pixels,
        space.with_transfer(TransferFunction::Linear),
        ImageRole::Gainmap,
    )?;

    Ok(ImageContainer::new(
        vec![baseline.image, gainmap],
        ContainerMetadata::Gainmap(meta),
    ))
}
