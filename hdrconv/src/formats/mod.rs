//! The registered container formats.
//!
//! | Format | Container | Family |
//! |--------|-----------|--------|
//! | [`UltraHdrJpeg`] | JPEG + MPF | ISO gain map |
//! | [`AppleHeic`] | HEIF | Apple gain map |
//! | [`Iso22028Avif`] | AVIF | single layer |

mod apple_heic;
mod avif;
mod ultrahdr;

pub use apple_heic::{AppleHeic, APPLE_GAINMAP_URN};
pub use avif::Iso22028Avif;
pub use ultrahdr::UltraHdrJpeg;

use hdrconv_core::{ColorSpace, Image, ImageRole, Result};

use crate::coder::DecodedSamples;
use crate::isobmff::{ColourInformation, HeifFile, Property};
use crate::jpeg::icc;

/// Wrap decoded samples in an [`Image`].
fn image_from_samples(
    samples: DecodedSamples,
    color_space: ColorSpace,
    role: ImageRole,
) -> Result<Image> {
    Image::new(
        samples.width,
        samples.height,
        samples.channels,
        samples.pixels,
        color_space,
        role,
    )
}

/// `colr` for an image: CICP codes when the space has them, an ICC
/// profile otherwise.
fn colour_property(space: &ColorSpace) -> Property {
    match space.cicp() {
        Ok((primaries, transfer)) => Property::Colour(ColourInformation::Nclx {
            primaries,
            transfer,
            matrix: 0,
            full_range: true,
        }),
        Err(_) => Property::Colour(ColourInformation::Icc(icc::profile_for(space))),
    }
}

/// `pixi` for an integer image, `None` for float samples.
fn pixel_information(image: &Image) -> Option<Property> {
    let depth = image.pixels.bit_depth()?;
    Some(Property::PixelInformation(vec![
        depth;
        image.channels as usize
    ]))
}

/// Colour space declared by an item's `colr` property, if any.
fn declared_color_space(file: &HeifFile<'_>, item: u32) -> Result<Option<ColorSpace>> {
    for property in file.properties(item) {
        if let Property::Colour(colour) = property {
            return match colour {
                ColourInformation::Nclx {
                    primaries,
                    transfer,
                    ..
                } => ColorSpace::from_cicp(*primaries, *transfer).map(Some),
                ColourInformation::Icc(profile) => {
                    Ok(Some(icc::color_space_from_profile(profile)))
                }
            };
        }
    }
    Ok(None)
}

/// `ispe` of an item.
fn image_extents(file: &HeifFile<'_>, item: u32) -> Option<(u32, u32)> {
    file.properties(item).find_map(|p| match p {
        Property::ImageExtents { width, height } => Some((*width, *height)),
        _ => None,
    })
}

/// Decoder configuration record of an item.
fn decoder_config<'f>(file: &'f HeifFile<'_>, item: u32, kind: &[u8; 4]) -> Option<&'f [u8]> {
    file.properties(item).find_map(|p| match p {
        Property::DecoderConfig { kind: k, data } if k == kind => Some(data.as_slice()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdrconv_core::{PixelData, TransferFunction};

    #[test]
    fn test_colour_property_prefers_cicp() {
        assert_eq!(
            colour_property(&ColorSpace::BT2020_PQ),
            Property::Colour(ColourInformation::Nclx {
                primaries: 9,
                transfer: 16,
                matrix: 0,
                full_range: true,
            })
        );
    }

    #[test]
    fn test_pixel_information() {
        let image = Image::new(
            1,
            1,
            3,
            PixelData::U16 {
                samples: vec![0, 0, 0],
                bit_depth: 10,
            },
            ColorSpace::BT2020_PQ.with_transfer(TransferFunction::Hlg),
            ImageRole::Source,
        )
        .unwrap();
        assert_eq!(
            pixel_information(&image),
            Some(Property::PixelInformation(vec![10, 10, 10]))
        );
    }
}
