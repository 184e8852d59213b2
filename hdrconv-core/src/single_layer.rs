//! Single-layer family: one coded image with an absolute (PQ, HLG) or
//! SDR-relative (linear, sRGB, Rec.709) transfer tag.
//!
//! Canonical 1.0 is SDR reference white ([`SDR_WHITE_NITS`]). PQ code
//! values address [`PQ_PEAK_NITS`]; HLG goes through the BT.2100 OOTF of a
//! [`HLG_PEAK_NITS`] reference display.

use rayon::prelude::*;
use tracing::debug;

use crate::color::{
    apply_transfer_forward, hlg_oetf, hlg_ootf, hlg_ootf_inv, primaries_conversion_matrix,
    ColorSpace, GamutClip, TransferFunction,
};
use crate::image::{
    CanonicalRendering, ContainerMetadata, ContentLightLevel, Image, ImageContainer, ImageRole,
    PixelData, SingleLayerMetadata,
};
use crate::pipeline::{Composer, GenerateOptions, Generator};
use crate::types::luminance::{HLG_PEAK_NITS, PQ_PEAK_NITS, SDR_WHITE_NITS};
use crate::types::{Error, Result};

/// Display-linear RGB (canonical scale, source primaries) from
/// transfer-decoded samples. HLG samples are scene-linear at this point.
#[inline]
fn to_display_linear(decoded: [f32; 3], transfer: TransferFunction) -> [f32; 3] {
    match transfer {
        TransferFunction::Pq => decoded.map(|v| v * (PQ_PEAK_NITS / SDR_WHITE_NITS)),
        TransferFunction::Hlg => hlg_ootf(decoded, HLG_PEAK_NITS).map(|v| v / SDR_WHITE_NITS),
        _ => decoded,
    }
}

/// Encoded signal from display-linear RGB (canonical scale, target primaries).
#[inline]
fn from_display_linear(rgb: [f32; 3], transfer: TransferFunction) -> [f32; 3] {
    match transfer {
        TransferFunction::Pq => {
            rgb.map(|v| apply_transfer_forward(v * (SDR_WHITE_NITS / PQ_PEAK_NITS), transfer))
        }
        TransferFunction::Hlg => {
            let display = rgb.map(|v| v.max(0.0) * SDR_WHITE_NITS);
            hlg_ootf_inv(display, HLG_PEAK_NITS).map(|v| hlg_oetf(v.clamp(0.0, 1.0)))
        }
        _ => rgb.map(|v| apply_transfer_forward(v, transfer)),
    }
}

/// Composer for single-layer containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleLayerComposer;

impl Composer for SingleLayerComposer {
    fn compose(&self, container: ImageContainer) -> Result<CanonicalRendering> {
        if !matches!(container.metadata, ContainerMetadata::SingleLayer(_)) {
            return Err(Error::Metadata(
                "single-layer composer needs single-layer metadata".into(),
            ));
        }
        let image = container.primary()?;
        let space = image.color_space;
        let transfer = space.transfer;
        debug!(?transfer, "composing single-layer image");

        let width = image.width as usize;
        let mut data = image.to_linear_rgb();
        let m = primaries_conversion_matrix(&space, &ColorSpace::CANONICAL);
        data.par_chunks_mut(width * 3).for_each(|row| {
            for px in row.chunks_exact_mut(3) {
                let display = to_display_linear([px[0], px[1], px[2]], transfer);
                px.copy_from_slice(&GamutClip::Clip.apply(m.transform(display)));
            }
        });
        CanonicalRendering::new(image.width, image.height, data)
    }
}

/// Generator for single-layer containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleLayerGenerator;

impl Generator for SingleLayerGenerator {
    fn generate(
        &self,
        rendering: &CanonicalRendering,
        options: &GenerateOptions,
    ) -> Result<ImageContainer> {
        options.validate()?;
        let target = options.target_color_space.unwrap_or(ColorSpace::BT2020_PQ);
        let transfer = target.transfer;
        let m = primaries_conversion_matrix(&ColorSpace::CANONICAL, &target);
        let max_code = options.storage_max() as f32;

        let codes: Vec<u16> = rendering
            .data()
            .par_chunks(3)
            .flat_map_iter(|px| {
                let rgb = options.gamut_clip.apply(m.transform([px[0], px[1], px[2]]));
                from_display_linear(rgb, transfer)
                    .map(|e| (e * max_code).round().clamp(0.0, max_code) as u16)
            })
            .collect();

        let pixels = if options.bit_depth == 8 {
            PixelData::U8(codes.into_iter().map(|v| v as u8).collect())
        } else {
            PixelData::U16 {
                samples: codes,
                bit_depth: options.bit_depth,
            }
        };
        let image = Image::new(
            rendering.width(),
            rendering.height(),
            3,
            pixels,
            target,
            ImageRole::Source,
        )?;

        let content_light = transfer.is_hdr().then(|| content_light_level(rendering));
        debug!(
            ?transfer,
            bit_depth = options.bit_depth,
            ?content_light,
            "generated single-layer image"
        );
        Ok(ImageContainer::new(
            vec![image],
            ContainerMetadata::SingleLayer(SingleLayerMetadata { content_light }),
        ))
    }
}

/// MaxCLL / MaxFALL of a rendering, in cd/m².
pub fn content_light_level(rendering: &CanonicalRendering) -> ContentLightLevel {
    let (max, sum) = rendering
        .data()
        .par_chunks(3)
        .map(|px| {
            let peak = px[0].max(px[1]).max(px[2]).max(0.0) as f64;
            (peak, peak)
        })
        .reduce(|| (0.0, 0.0), |a, b| (a.0.max(b.0), a.1 + b.1));
    let pixels = (rendering.data().len() / 3).max(1) as f64;
    let nits = |v: f64| (v * SDR_WHITE_NITS as f64).round().clamp(0.0, u16::MAX as f64) as u16;
    ContentLightLevel {
        max_cll: nits(max),
        max_fall: nits(sum / pixels),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    fn ramp(peak: f32) -> CanonicalRendering {
        let mut data = Vec::new();
        for i in 0..24 {
            let t = i as f32 / 23.0;
            data.extend([t * peak, t * peak * 0.5, (1.0 - t) * peak * 0.25]);
        }
        CanonicalRendering::new(6, 4, data).unwrap()
    }

    fn roundtrip(target: ColorSpace, bit_depth: u8, peak: f32) {
        let rendering = ramp(peak);
        let options = GenerateOptions {
            target_color_space: Some(target),
            bit_depth,
            ..Default::default()
        };
        let container = SingleLayerGenerator.generate(&rendering, &options).unwrap();
        let out = SingleLayerComposer.compose(container).unwrap();
        for (a, b) in rendering.data().iter().zip(out.data()) {
            assert!(
                (a - b).abs() <= 0.01 * a.abs().max(0.1),
                "{:?}: {} vs {}",
                target.transfer,
                a,
                b
            );
        }
    }

    #[test]
    fn test_pq_roundtrip() {
        roundtrip(ColorSpace::BT2020_PQ, 12, 8.0);
    }

    #[test]
    fn test_hlg_roundtrip() {
        roundtrip(ColorSpace::BT2020_HLG, 12, 4.0);
    }

    #[test]
    fn test_linear_sdr_roundtrip() {
        roundtrip(ColorSpace::BT2020_LINEAR, 16, 1.0);
    }

    #[test]
    fn test_pq_reference_white() {
        // 203 nits in the 10000 nit PQ range is code ~0.58
        let encoded = from_display_linear([1.0; 3], TransferFunction::Pq);
        assert!((encoded[0] - 0.5806).abs() < 1e-3, "{}", encoded[0]);
        let decoded = crate::color::apply_transfer_inverse(encoded[0], TransferFunction::Pq);
        let display = to_display_linear([decoded; 3], TransferFunction::Pq);
        assert!((display[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hlg_reference_white() {
        // HLG reference white (203 nits on a 1000 nit display) is signal 0.75
        let encoded = from_display_linear([1.0; 3], TransferFunction::Hlg);
        assert!((encoded[0] - 0.75).abs() < 5e-3, "{}", encoded[0]);
    }

    #[test]
    fn test_content_light_level() {
        let rendering = CanonicalRendering::new(2, 1, vec![2.0, 1.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let cll = content_light_level(&rendering);
        assert_eq!(cll.max_cll, 406);
        assert_eq!(cll.max_fall, 203);
    }

    #[test]
    fn test_generator_defaults_to_pq_with_cll() {
        let container = SingleLayerGenerator
            .generate(
                &ramp(2.0),
                &GenerateOptions {
                    bit_depth: 10,
                    ..Default::default()
                },
            )
            .unwrap();
        let image = container.primary().unwrap();
        assert_eq!(image.color_space, ColorSpace::BT2020_PQ);
        assert_eq!(image.pixels.bit_depth(), Some(10));
        let ContainerMetadata::SingleLayer(meta) = container.metadata else {
            panic!("expected single-layer metadata");
        };
        assert_eq!(meta.content_light.unwrap().max_cll, 406);
    }

    #[test]
    fn test_sdr_target_has_no_cll() {
        let options = GenerateOptions {
            target_color_space: Some(ColorSpace::SRGB),
            ..Default::default()
        };
        let container = SingleLayerGenerator.generate(&ramp(1.0), &options).unwrap();
        let ContainerMetadata::SingleLayer(meta) = container.metadata else {
            panic!("expected single-layer metadata");
        };
        assert!(meta.content_light.is_none());
    }

    #[test]
    fn test_composer_rejects_gainmap_metadata() {
        let image = Image::new(
            1,
            1,
            3,
            PixelData::U8(vec![0; 3]),
            ColorSpace::SRGB,
            ImageRole::Source,
        )
        .unwrap();
        let container = ImageContainer::new(
            vec![image],
            ContainerMetadata::Gainmap(Default::default()),
        );
        let err = SingleLayerComposer.compose(container).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Metadata);
    }
}
