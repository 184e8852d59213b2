//! HDR still-image conversion between gain map and single-layer containers.
//!
//! Every conversion runs the same four steps:
//!
//! ```text
//! bytes --Codec::read--> ImageContainer --Composer::compose--> CanonicalRendering
//!       --Generator::generate--> ImageContainer --Codec::write--> bytes
//! ```
//!
//! # Crate Structure
//!
//! - [`hdrconv_core`] - colorimetry, gain map math, metadata records
//! - `hdrconv` (this crate) - container codecs and the format [`Registry`]
//!
//! Compressed pixels (JPEG, HEVC, AV1) are never coded here. Callers supply
//! a [`SampleCoder`] and the codecs hand it the exact byte ranges they
//! locate.
//!
//! # Formats
//!
//! - `ultrahdr`: JPEG baseline + ISO 21496-1 gain map JPEG, linked by MPF
//! - `apple-heic`: HEIC with an Apple HDR gain map auxiliary item
//! - `iso22028-avif`: single-layer PQ/HLG AVIF
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hdrconv::{FormatId, GenerateOptions, Registry};
//!
//! let registry = Registry::new(Arc::new(my_coder));
//! let mut out = Vec::new();
//! let source = registry.convert(&input, FormatId::Iso22028Avif, &GenerateOptions::default(), &mut out)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use hdrconv_core::color;
pub use hdrconv_core::gainmap;
pub use hdrconv_core::metadata;

pub use hdrconv_core::{
    limits, luminance, AppleHeadroomMetadata, CanonicalRendering, ColorSpace, Composer,
    ContainerMetadata, ContentLightLevel, Error, ErrorKind, GainmapMetadata, GamutClip,
    GenerateOptions, Generator, Image, ImageContainer, ImageRole, PixelData, Result,
    SingleLayerMetadata, ToneCurve, TransferFunction,
};

pub mod codec;
pub mod coder;
pub mod exif;
pub mod formats;
pub mod isobmff;
pub mod jpeg;
pub mod registry;
mod tiff;

pub use codec::Codec;
pub use coder::{Bitstream, DecodedSamples, EncodedSamples, SampleCoder};
pub use registry::{FormatHandlers, FormatId, Registry, DETECTION_ORDER};
