//! Image entities: pixel buffers, containers, and the canonical rendering.

use rayon::prelude::*;

use crate::color::{apply_transfer_inverse, ColorSpace, InverseTransferLut};
use crate::limits;
use crate::metadata::{AppleHeadroomMetadata, GainmapMetadata};
use crate::types::{Error, Result};

/// Interleaved, row-major sample storage.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    /// 8-bit code values.
    U8(Vec<u8>),
    /// 9 to 16-bit code values in the low bits of each `u16`.
    U16 {
        /// Code values.
        samples: Vec<u16>,
        /// Significant bits per sample.
        bit_depth: u8,
    },
    /// Floating-point samples (already normalized or linear).
    F32(Vec<f32>),
}

impl PixelData {
    /// Number of samples (not pixels).
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16 { samples, .. } => samples.len(),
            PixelData::F32(v) => v.len(),
        }
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer bit depth, `None` for float data.
    pub fn bit_depth(&self) -> Option<u8> {
        match self {
            PixelData::U8(_) => Some(8),
            PixelData::U16 { bit_depth, .. } => Some(*bit_depth),
            PixelData::F32(_) => None,
        }
    }

    /// Sample `i` mapped to [0, 1] for integer data, unchanged for float.
    #[inline]
    pub fn normalized(&self, i: usize) -> f32 {
        match self {
            PixelData::U8(v) => v[i] as f32 / 255.0,
            PixelData::U16 { samples, bit_depth } => {
                let max = ((1u32 << *bit_depth) - 1) as f32;
                (samples[i] as f32 / max).min(1.0)
            }
            PixelData::F32(v) => v[i],
        }
    }
}

/// What an image represents inside its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    /// The primary (baseline or single-layer) picture.
    Source,
    /// A gain map applied to the source.
    Gainmap,
    /// Any other auxiliary picture.
    Auxiliary,
}

/// A 2-D pixel buffer tagged with its color space and role.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Samples per pixel: 1 (gray) or 3 (RGB).
    pub channels: u8,
    /// Sample data.
    pub pixels: PixelData,
    /// Color space the samples are encoded in.
    pub color_space: ColorSpace,
    /// Role inside the owning container.
    pub role: ImageRole,
}

impl Image {
    /// Create an image, validating dimensions and buffer length.
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        pixels: PixelData,
        color_space: ColorSpace,
        role: ImageRole,
    ) -> Result<Self> {
        validate_dimensions(width, height)?;
        if channels != 1 && channels != 3 {
            return Err(Error::InvalidPixelData(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        if let PixelData::U16 { bit_depth, .. } = pixels {
            if !(9..=16).contains(&bit_depth) {
                return Err(Error::InvalidPixelData(format!(
                    "16-bit storage with bit depth {}",
                    bit_depth
                )));
            }
        }
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(Error::InvalidPixelData(format!(
                "expected {} samples for {}x{}x{}, got {}",
                expected,
                width,
                height,
                channels,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
            color_space,
            role,
        })
    }

    /// Sample `i` in [0, 1] for integer data, raw for float data.
    #[inline]
    pub fn normalized(&self, i: usize) -> f32 {
        self.pixels.normalized(i)
    }

    /// Decode every pixel to linear RGB in this image's own primaries.
    ///
    /// Integer samples go through an [`InverseTransferLut`]; gray images are
    /// broadcast to three channels.
    pub fn to_linear_rgb(&self) -> Vec<f32> {
        let transfer = self.color_space.transfer;
        let lut = self
            .pixels
            .bit_depth()
            .map(|depth| InverseTransferLut::new(transfer, depth));
        let linear = |i: usize| match (&self.pixels, &lut) {
            (PixelData::U8(v), Some(lut)) => lut.lookup(v[i] as u16),
            (PixelData::U16 { samples, .. }, Some(lut)) => lut.lookup(samples[i]),
            _ => apply_transfer_inverse(self.normalized(i), transfer),
        };

        let width = self.width as usize;
        let channels = self.channels as usize;
        let mut out = vec![0.0f32; width * self.height as usize * 3];
        out.par_chunks_mut(width * 3)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..width {
                    let src = (y * width + x) * channels;
                    for c in 0..3 {
                        row[x * 3 + c] = linear(src + if channels == 1 { 0 } else { c });
                    }
                }
            });
        out
    }

    /// Normalized pixel at `(x, y)`; single-channel images are broadcast.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 3] {
        let base = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        if self.channels == 1 {
            let v = self.normalized(base);
            [v, v, v]
        } else {
            [
                self.normalized(base),
                self.normalized(base + 1),
                self.normalized(base + 2),
            ]
        }
    }
}

/// Check dimensions against [`limits`].
pub fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions(width, height));
    }
    if width > limits::MAX_IMAGE_DIMENSION || height > limits::MAX_IMAGE_DIMENSION {
        return Err(Error::LimitExceeded(format!(
            "dimension {} exceeds maximum {}",
            width.max(height),
            limits::MAX_IMAGE_DIMENSION
        )));
    }
    let total_pixels = width as u64 * height as u64;
    if total_pixels > limits::MAX_TOTAL_PIXELS {
        return Err(Error::LimitExceeded(format!(
            "total pixels {} exceeds maximum {}",
            total_pixels,
            limits::MAX_TOTAL_PIXELS
        )));
    }
    Ok(())
}

/// Content light level (CTA-861.3), in cd/m².
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevel {
    /// Maximum content light level.
    pub max_cll: u16,
    /// Maximum frame-average light level.
    pub max_fall: u16,
}

/// Metadata carried by a single-layer container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SingleLayerMetadata {
    /// Optional content light level box.
    pub content_light: Option<ContentLightLevel>,
}

/// Format-specific metadata record of a container.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerMetadata {
    /// ISO 21496-1 gain map parameters.
    Gainmap(GainmapMetadata),
    /// Apple HDR gain map headroom.
    AppleHeadroom(AppleHeadroomMetadata),
    /// Single-layer absolute encoding.
    SingleLayer(SingleLayerMetadata),
}

/// An ordered set of images plus their metadata record.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageContainer {
    /// Images in container order.
    pub images: Vec<Image>,
    /// Metadata shared by the images.
    pub metadata: ContainerMetadata,
}

impl ImageContainer {
    /// Create a container.
    pub fn new(images: Vec<Image>, metadata: ContainerMetadata) -> Self {
        Self { images, metadata }
    }

    /// The first [`ImageRole::Source`] image.
    pub fn primary(&self) -> Result<&Image> {
        self.find(ImageRole::Source)
            .ok_or_else(|| Error::Metadata("container has no primary image".into()))
    }

    /// The first [`ImageRole::Gainmap`] image.
    pub fn gainmap(&self) -> Result<&Image> {
        self.find(ImageRole::Gainmap)
            .ok_or_else(|| Error::Metadata("container has no gain map image".into()))
    }

    fn find(&self, role: ImageRole) -> Option<&Image> {
        self.images.iter().find(|img| img.role == role)
    }
}

/// Linear RGB in [`ColorSpace::CANONICAL`], 1.0 = SDR reference white.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRendering {
    image: Image,
}

impl CanonicalRendering {
    /// Wrap interleaved RGB float samples.
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let image = Image::new(
            width,
            height,
            3,
            PixelData::F32(data),
            ColorSpace::CANONICAL,
            ImageRole::Source,
        )?;
        Ok(Self { image })
    }

    /// Adopt an image that is already in the canonical space.
    pub fn from_image(image: Image) -> Result<Self> {
        if image.color_space != ColorSpace::CANONICAL {
            return Err(Error::ColorSpace(
                "canonical rendering must be linear BT.2020".into(),
            ));
        }
        match image.pixels {
            PixelData::F32(data) if image.channels == 3 => {
                Self::new(image.width, image.height, data)
            }
            _ => Err(Error::InvalidPixelData(
                "canonical rendering needs 3-channel float samples".into(),
            )),
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height
    }

    /// Interleaved RGB samples.
    pub fn data(&self) -> &[f32] {
        match &self.image.pixels {
            PixelData::F32(v) => v,
            _ => &[],
        }
    }

    /// Pixel at `(x, y)`.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 3] {
        self.image.pixel(x, y)
    }

    /// The underlying image.
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Give up the wrapper.
    pub fn into_image(self) -> Image {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    #[test]
    fn test_image_rejects_wrong_length() {
        let err = Image::new(
            2,
            2,
            3,
            PixelData::U8(vec![0; 11]),
            ColorSpace::SRGB,
            ImageRole::Source,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPixelData(_)));
    }

    #[test]
    fn test_image_rejects_zero_and_huge_dimensions() {
        let err = Image::new(0, 4, 1, PixelData::U8(vec![]), ColorSpace::SRGB, ImageRole::Gainmap)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dimension);

        assert!(matches!(
            validate_dimensions(70000, 1),
            Err(Error::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_dimensions(30000, 30000),
            Err(Error::LimitExceeded(_))
        ));
    }

    #[test]
    fn test_normalized_samples() {
        let data = PixelData::U16 {
            samples: vec![0, 512, 1023],
            bit_depth: 10,
        };
        assert_eq!(data.normalized(0), 0.0);
        assert!((data.normalized(1) - 512.0 / 1023.0).abs() < 1e-6);
        assert_eq!(data.normalized(2), 1.0);
        assert_eq!(PixelData::U8(vec![255]).normalized(0), 1.0);
        assert_eq!(PixelData::F32(vec![3.5]).normalized(0), 3.5);
    }

    #[test]
    fn test_gray_pixel_broadcasts() {
        let img = Image::new(
            2,
            1,
            1,
            PixelData::U8(vec![0, 255]),
            ColorSpace::SRGB,
            ImageRole::Gainmap,
        )
        .unwrap();
        assert_eq!(img.pixel(1, 0), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_to_linear_rgb() {
        let img = Image::new(
            2,
            1,
            1,
            PixelData::U8(vec![0, 255]),
            ColorSpace::SRGB,
            ImageRole::Source,
        )
        .unwrap();
        let linear = img.to_linear_rgb();
        assert_eq!(linear.len(), 6);
        assert_eq!(&linear[..3], &[0.0; 3]);
        assert!(linear[3..].iter().all(|&v| (v - 1.0).abs() < 1e-6));

        let float = Image::new(
            1,
            1,
            3,
            PixelData::F32(vec![0.5, 0.25, 2.0]),
            ColorSpace::BT709_LINEAR,
            ImageRole::Source,
        )
        .unwrap();
        assert_eq!(float.to_linear_rgb(), vec![0.5, 0.25, 2.0]);
    }

    #[test]
    fn test_container_accessors() {
        let base = Image::new(
            1,
            1,
            3,
            PixelData::U8(vec![1, 2, 3]),
            ColorSpace::SRGB,
            ImageRole::Source,
        )
        .unwrap();
        let container = ImageContainer::new(
            vec![base],
            ContainerMetadata::SingleLayer(SingleLayerMetadata::default()),
        );
        assert!(container.primary().is_ok());
        assert_eq!(container.gainmap().unwrap_err().kind(), ErrorKind::Metadata);
    }

    #[test]
    fn test_canonical_rendering_pins_color_space() {
        let srgb = Image::new(
            1,
            1,
            3,
            PixelData::F32(vec![0.5; 3]),
            ColorSpace::SRGB,
            ImageRole::Source,
        )
        .unwrap();
        let err = CanonicalRendering::from_image(srgb).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ColorSpace);

        let r = CanonicalRendering::new(1, 2, vec![0.1, 0.2, 0.3, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(r.pixel(0, 1), [1.0, 2.0, 3.0]);
        let back = CanonicalRendering::from_image(r.clone().into_image()).unwrap();
        assert_eq!(back, r);
    }
}
