//! Colorimetry and composition core for hdrconv.
//!
//! Every conversion is routed through one [`CanonicalRendering`]: linear
//! light in BT.2020 primaries, D65 white, with 1.0 at SDR reference white.
//! A [`Composer`] brings a decoded container into that space and a
//! [`Generator`] takes it out again, so N formats need N pairs instead of
//! N² converters.
//!
//! This crate has **no container or codec knowledge**. Reading and writing
//! files lives in the `hdrconv` crate.
//!
//! # Example
//!
//! ```ignore
//! use hdrconv_core::{
//!     gainmap::{GainmapComposer, GainmapGenerator, GainmapVariant},
//!     CanonicalRendering, Composer, GenerateOptions, Generator,
//! };
//!
//! let rendering = CanonicalRendering::new(width, height, linear_rgb)?;
//! let generator = GainmapGenerator::new(GainmapVariant::Iso);
//! let container = generator.generate(&rendering, &GenerateOptions::default())?;
//! let restored = GainmapComposer.compose(container)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod color;
pub mod gainmap;
pub mod image;
pub mod metadata;
pub mod pipeline;
pub mod single_layer;
mod types;

pub use types::{luminance, Error, ErrorKind, Result};

pub use color::{ColorSpace, GamutClip, ToneCurve, TransferFunction};
pub use gainmap::{GainmapComposer, GainmapGenerator, GainmapVariant};
pub use image::{
    CanonicalRendering, ContainerMetadata, ContentLightLevel, Image, ImageContainer, ImageRole,
    PixelData, SingleLayerMetadata,
};
pub use metadata::{AppleHeadroomMetadata, GainmapMetadata};
pub use pipeline::{Composer, GenerateOptions, Generator};
pub use single_layer::{SingleLayerComposer, SingleLayerGenerator};

/// Safety limits for parsing and allocation.
pub mod limits {
    /// Maximum XMP string length to parse (16 MB).
    pub const MAX_XMP_LENGTH: usize = 16 * 1024 * 1024;

    /// Maximum image dimension (width or height).
    pub const MAX_IMAGE_DIMENSION: u32 = 65535;

    /// Maximum total pixels (width * height).
    pub const MAX_TOTAL_PIXELS: u64 = 500_000_000; // 500 megapixels

    /// Maximum number of items in one ISOBMFF `meta` box.
    pub const MAX_ITEM_COUNT: usize = 4096;

    /// Maximum number of extents of one ISOBMFF item.
    pub const MAX_EXTENT_COUNT: usize = 1024;
}
