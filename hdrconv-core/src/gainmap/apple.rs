//! Apple HDR gain map reconstruction and generation.
//!
//! ```text
//! hdr = b * (1 + (headroom - 1) * g)
//! ```
//!
//! `g` is a single channel stored with the Rec.709 OETF and broadcast over
//! RGB. The baseline is Display P3 with the sRGB curve unless the encoder
//! is told otherwise.

use rayon::prelude::*;
use tracing::debug;

use super::sample::GainSampler;
use super::{check_dimensions, convert_buffer, encode_baseline, gainmap_size};
use crate::color::{bt709_oetf, bt709_oetf_inv, ColorSpace, GamutClip, TransferFunction};
use crate::image::{
    CanonicalRendering, ContainerMetadata, Image, ImageContainer, ImageRole, PixelData,
};
use crate::metadata::AppleHeadroomMetadata;
use crate::pipeline::GenerateOptions;
use crate::types::Result;

/// Reconstruct one channel from a linear gain in [0, 1].
#[inline]
pub fn reconstruct(baseline: f32, gain: f32, headroom: f32) -> f32 {
    baseline * (1.0 + (headroom - 1.0) * gain)
}

/// Compose an Apple baseline and gain map into the canonical rendering.
pub fn compose(
    baseline: &Image,
    gainmap: &Image,
    meta: &AppleHeadroomMetadata,
) -> Result<CanonicalRendering> {
    meta.validate()?;
    check_dimensions(baseline, gainmap)?;

    let width = baseline.width;
    let headroom = meta.headroom;
    let mut data = baseline.to_linear_rgb();

    // Only the first gain channel is meaningful.
    let sampler = GainSampler::new(gainmap, width, baseline.height, |_, stored| {
        bt709_oetf_inv(stored)
    });

    data.par_chunks_mut(width as usize * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let gain = sampler.sample(x as u32, y as u32)[0];
                for v in px.iter_mut() {
                    *v = reconstruct(*v, gain, headroom);
                }
            }
        });

    convert_buffer(
        &mut data,
        &baseline.color_space,
        &ColorSpace::CANONICAL,
        GamutClip::Clip,
    );
    CanonicalRendering::new(width, baseline.height, data)
}

/// Generate an Apple baseline, gain map and headroom.
pub fn generate(
    rendering: &CanonicalRendering,
    options: &GenerateOptions,
) -> Result<ImageContainer> {
    let space = options
        .baseline_color_space
        .unwrap_or(ColorSpace::DISPLAY_P3);
    let baseline = encode_baseline(rendering, options, space)?;
    let headroom = options.target_headroom;
    let meta = AppleHeadroomMetadata::new(headroom)?;

    let (width, height) = (rendering.width(), rendering.height());
    let scale = options.gainmap_scale;
    let (gm_width, gm_height) = gainmap_size(width, height, scale);

    let weights = space.luminance_coefficients();
    let luminance = |v: &[f32]| weights[0] * v[0] + weights[1] * v[1] + weights[2] * v[2];

    let mut codes = vec![0u8; gm_width as usize * gm_height as usize];
    codes
        .par_chunks_mut(gm_width as usize)
        .enumerate()
        .for_each(|(gy, row)| {
            for (gx, code) in row.iter_mut().enumerate() {
                let (h, b) = baseline.at_gain_pixel(gx as u32, gy as u32, gm_width, gm_height);
                let y_hdr = luminance(&h);
                let y_sdr = luminance(&b);
                let gain = if y_sdr > 0.0 {
                    ((y_hdr / y_sdr - 1.0) / (headroom - 1.0)).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                *code = (bt709_oetf(gain) * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        });
    debug!(gm_width, gm_height, headroom, "solved Apple gain map");

    let gainmap = Image::new(
        gm_width,
        gm_height,
        1,
        PixelData::U8(codes),
        space.with_transfer(TransferFunction::Bt709),
        ImageRole::Gainmap,
    )?;

    Ok(ImageContainer::new(
        vec![baseline.image, gainmap],
        ContainerMetadata::AppleHeadroom(meta),
    ))
}
