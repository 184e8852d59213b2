//! Gain map family: compose a baseline plus gain map into the canonical
//! rendering, and generate both layers from it.
//!
//! Two reconstruction strategies, one module each:
//!
//! - [`iso`]: `hdr = max(b, b * (baseline_offset + gain^gamma)) - alternate_offset`
//! - [`apple`]: `hdr = b * (1 + (headroom - 1) * gain)`
//!
//! [`GainmapComposer`] picks the strategy from the container's metadata tag.
//! [`GainmapGenerator`] is built for exactly one of them.

pub mod apple;
pub mod iso;
mod sample;

use sample::{bilinear, centre_position};

use rayon::prelude::*;
use tracing::debug;

use crate::color::{
    apply_transfer_forward, primaries_conversion_matrix, ColorSpace, GamutClip,
    InverseTransferLut,
};
use crate::image::{
    CanonicalRendering, ContainerMetadata, Image, ImageContainer, ImageRole, PixelData,
};
use crate::pipeline::{Composer, GenerateOptions, Generator};
use crate::types::{Error, Result};

/// Which gain map formula a generator targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainmapVariant {
    /// ISO 21496-1 style, offsets and per-channel gains.
    Iso,
    /// Apple HDR gain map, single headroom and one gain channel.
    Apple,
}

/// Composer for every gain map container.
#[derive(Debug, Clone, Copy, Default)]
pub struct GainmapComposer;

impl Composer for GainmapComposer {
    fn compose(&self, container: ImageContainer) -> Result<CanonicalRendering> {
        let baseline = container.primary()?;
        let gainmap = container.gainmap()?;
        match &container.metadata {
            ContainerMetadata::Gainmap(meta) => {
                debug!("composing with ISO gain map strategy");
                iso::compose(baseline, gainmap, meta)
            }
            ContainerMetadata::AppleHeadroom(meta) => {
                debug!(headroom = meta.headroom, "composing with Apple gain map strategy");
                apple::compose(baseline, gainmap, meta)
            }
            ContainerMetadata::SingleLayer(_) => Err(Error::Metadata(
                "gain map composer needs gain map metadata".into(),
            )),
        }
    }
}

/// Generator producing baseline + gain map containers.
#[derive(Debug, Clone, Copy)]
pub struct GainmapGenerator {
    variant: GainmapVariant,
}

impl GainmapGenerator {
    /// Generator for one strategy.
    pub fn new(variant: GainmapVariant) -> Self {
        Self { variant }
    }

    /// The strategy this generator emits.
    pub fn variant(&self) -> GainmapVariant {
        self.variant
    }
}

impl Generator for GainmapGenerator {
    fn generate(
        &self,
        rendering: &CanonicalRendering,
        options: &GenerateOptions,
    ) -> Result<ImageContainer> {
        options.validate()?;
        match self.variant {
            GainmapVariant::Iso => iso::generate(rendering, options),
            GainmapVariant::Apple => apple::generate(rendering, options),
        }
    }
}

/// Check that a gain map can be laid over a baseline.
///
/// The gain map may be smaller (it is resampled) but never larger, and must
/// keep the baseline's aspect ratio to within one row.
pub fn check_dimensions(baseline: &Image, gainmap: &Image) -> Result<()> {
    let mismatch = || Error::DimensionMismatch {
        base_w: baseline.width,
        base_h: baseline.height,
        gain_w: gainmap.width,
        gain_h: gainmap.height,
    };
    if gainmap.width > baseline.width || gainmap.height > baseline.height {
        return Err(mismatch());
    }
    let expected_h = (baseline.height as f64 * gainmap.width as f64 / baseline.width as f64)
        .round() as i64;
    if (expected_h - gainmap.height as i64).abs() > 1 {
        return Err(mismatch());
    }
    Ok(())
}

/// Apply a 3x3 conversion to an interleaved RGB buffer in place.
fn convert_buffer(data: &mut [f32], from: &ColorSpace, to: &ColorSpace, clip: GamutClip) {
    if from.same_gamut(to) {
        if clip == GamutClip::Clip {
            data.par_chunks_mut(3).for_each(|px| {
                let out = clip.apply([px[0], px[1], px[2]]);
                px.copy_from_slice(&out);
            });
        }
        return;
    }
    let m = primaries_conversion_matrix(from, to);
    data.par_chunks_mut(3).for_each(|px| {
        let out = clip.apply(m.transform([px[0], px[1], px[2]]));
        px.copy_from_slice(&out);
    });
}

/// An SDR baseline derived from a rendering, kept alongside the values the
/// gain solver needs.
struct Baseline {
    /// 8-bit encoded baseline.
    image: Image,
    /// Decoded (quantized) baseline, linear, baseline primaries.
    linear: Vec<f32>,
    /// Target HDR values, linear, baseline primaries, clamped to the headroom.
    hdr: Vec<f32>,
}

/// Tone-map and quantize the baseline in `space`.
///
/// The decoded baseline is returned as well so gains are solved against
/// what a reader will actually see.
fn encode_baseline(
    rendering: &CanonicalRendering,
    options: &GenerateOptions,
    space: ColorSpace,
) -> Result<Baseline> {
    if space.transfer.is_hdr() {
        return Err(Error::Configuration(format!(
            "baseline needs an SDR transfer function, got {:?}",
            space.transfer
        )));
    }
    let headroom = options.target_headroom;
    let mut hdr = rendering.data().to_vec();
    convert_buffer(&mut hdr, &ColorSpace::CANONICAL, &space, options.gamut_clip);
    hdr.par_iter_mut().for_each(|v| *v = v.clamp(0.0, headroom));

    let lut = InverseTransferLut::new(space.transfer, 8);
    let mut codes = vec![0u8; hdr.len()];
    let mut linear = vec![0.0f32; hdr.len()];
    codes
        .par_chunks_mut(3)
        .zip(linear.par_chunks_mut(3))
        .zip(hdr.par_chunks(3))
        .for_each(|((code, lin), h)| {
            let sdr = options.tone_curve.apply([h[0], h[1], h[2]], headroom);
            for c in 0..3 {
                let encoded = apply_transfer_forward(sdr[c], space.transfer);
                code[c] = (encoded * 255.0).round().clamp(0.0, 255.0) as u8;
                lin[c] = lut.lookup(code[c] as u16);
            }
        });

    let image = Image::new(
        rendering.width(),
        rendering.height(),
        3,
        PixelData::U8(codes),
        space,
        ImageRole::Source,
    )?;
    Ok(Baseline { image, linear, hdr })
}

/// Gain map size for a downscale factor.
fn gainmap_size(width: u32, height: u32, scale: u32) -> (u32, u32) {
    (width.div_ceil(scale), height.div_ceil(scale))
}

impl Baseline {
    /// HDR and decoded baseline values at the centre of gain map pixel
    /// `(gx, gy)` of a `gm_width` x `gm_height` map.
    fn at_gain_pixel(
        &self,
        gx: u32,
        gy: u32,
        gm_width: u32,
        gm_height: u32,
    ) -> ([f32; 3], [f32; 3]) {
        let (width, height) = (self.image.width, self.image.height);
        let x = centre_position(gx, gm_width, width);
        let y = centre_position(gy, gm_height, height);
        let (x0, y0) = (x.floor() as u32, y.floor() as u32);
        let (x1, y1) = ((x0 + 1).min(width - 1), (y0 + 1).min(height - 1));
        let (fx, fy) = ((x - x.floor()) as f32, (y - y.floor()) as f32);

        let interpolate = |buf: &[f32]| {
            let at = |px: u32, py: u32, c: usize| {
                buf[(py as usize * width as usize + px as usize) * 3 + c]
            };
            [0, 1, 2].map(|c| {
                bilinear(at(x0, y0, c), at(x1, y0, c), at(x0, y1, c), at(x1, y1, c), fx, fy)
            })
        };
        (interpolate(&self.hdr[..]), interpolate(&self.linear[..]))
    }
}
