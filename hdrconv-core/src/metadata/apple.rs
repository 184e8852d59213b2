//! Apple HDR gain map headroom.
//!
//! Apple's gain map carries a single headroom value. It is published as XMP
//! on the gain map item, and can also be estimated from the two maker-note
//! tags (33 `HDRHeadroom`, 48 `HDRGain`) when the XMP is absent.

use tracing::debug;

use crate::metadata::xmp;
use crate::types::{Error, Result};

/// XMP namespace of the Apple HDR gain map properties.
pub const APPLE_HDRGM_NAMESPACE: &str = "http://ns.apple.com/HDRGainMap/1.0/";

/// Version written to `HDRGainMap:HDRGainMapVersion`.
pub const APPLE_HDRGM_VERSION: u32 = 131072;

/// Single-float headroom of an Apple gain map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppleHeadroomMetadata {
    /// Peak HDR luminance as a ratio to SDR white.
    pub headroom: f32,
}

impl AppleHeadroomMetadata {
    /// Create validated metadata.
    pub fn new(headroom: f32) -> Result<Self> {
        let meta = Self { headroom };
        meta.validate()?;
        Ok(meta)
    }

    /// Headroom must be finite and greater than 1.
    pub fn validate(&self) -> Result<()> {
        if !self.headroom.is_finite() || self.headroom <= 1.0 {
            return Err(Error::Metadata(format!(
                "Apple headroom must be > 1.0, got {}",
                self.headroom
            )));
        }
        Ok(())
    }

    /// Estimate headroom from maker-note tags 33 (`HDRHeadroom`) and
    /// 48 (`HDRGain`).
    pub fn from_maker_notes(maker33: f32, maker48: f32) -> Result<Self> {
        if !maker33.is_finite() || !maker48.is_finite() {
            return Err(Error::Metadata("maker note values must be finite".into()));
        }
        let stops = if maker33 < 1.0 {
            if maker48 <= 0.01 {
                -20.0 * maker48 + 1.8
            } else {
                -0.101 * maker48 + 1.601
            }
        } else if maker48 <= 0.01 {
            -70.0 * maker48 + 3.0
        } else {
            -0.303 * maker48 + 2.303
        };
        let headroom = 2.0f32.powf(stops.max(0.0));
        debug!(maker33, maker48, stops, headroom, "headroom from maker notes");
        Self::new(headroom)
    }

    /// Serialize as an XMP packet.
    pub fn to_xmp(&self) -> Result<String> {
        self.validate()?;
        Ok(xmp::generate_packet(
            &[("HDRGainMap", APPLE_HDRGM_NAMESPACE)],
            &[
                (
                    "HDRGainMap:HDRGainMapVersion",
                    APPLE_HDRGM_VERSION.to_string(),
                ),
                ("HDRGainMap:HDRGainMapHeadroom", format!("{:.6}", self.headroom)),
            ],
        ))
    }

    /// Parse from an XMP packet.
    pub fn from_xmp(packet: &str) -> Result<Self> {
        if xmp::extract_attribute(packet, "HDRGainMap:HDRGainMapVersion").is_none() {
            return Err(Error::Metadata("XMP has no HDRGainMapVersion".into()));
        }
        let value = xmp::extract_attribute(packet, "HDRGainMap:HDRGainMapHeadroom")
            .ok_or_else(|| Error::Metadata("XMP has no HDRGainMapHeadroom".into()))?;
        let headroom = value
            .trim()
            .parse::<f32>()
            .map_err(|_| Error::Metadata(format!("invalid HDRGainMapHeadroom {:?}", value)))?;
        Self::new(headroom)
    }
}
