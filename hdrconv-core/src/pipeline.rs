//! Composer/Generator capabilities and generator options.

use serde::{Deserialize, Serialize};

use crate::color::{ColorSpace, GamutClip, ToneCurve};
use crate::image::{CanonicalRendering, ImageContainer};
use crate::types::{Error, Result};

/// Turns a decoded container into the canonical rendering.
pub trait Composer: Send + Sync {
    /// Reconstruct canonical linear light from `container`.
    fn compose(&self, container: ImageContainer) -> Result<CanonicalRendering>;
}

/// Turns the canonical rendering into a container for one format family.
pub trait Generator: Send + Sync {
    /// Encode `rendering` according to `options`.
    fn generate(
        &self,
        rendering: &CanonicalRendering,
        options: &GenerateOptions,
    ) -> Result<ImageContainer>;
}

/// Options recognized by every [`Generator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    /// Peak of the alternate rendition relative to SDR white.
    pub target_headroom: f32,
    /// Gain exponent per channel.
    pub gamma: [f32; 3],
    /// Offset added to the gain term per channel.
    pub baseline_offset: [f32; 3],
    /// Offset subtracted from the reconstruction per channel.
    pub alternate_offset: [f32; 3],
    /// Storage depth of gain codes, or of samples for single-layer output.
    pub bit_depth: u8,
    /// Curve deriving the SDR baseline.
    pub tone_curve: ToneCurve,
    /// Per-channel gains (ISO only).
    pub multichannel: bool,
    /// Gain map downscale factor.
    pub gainmap_scale: u32,
    /// Baseline colour space; each family has its own default.
    pub baseline_color_space: Option<ColorSpace>,
    /// Single-layer output tag. Defaults to BT.2020 PQ.
    pub target_color_space: Option<ColorSpace>,
    /// Out-of-gamut policy after primaries conversion.
    pub gamut_clip: GamutClip,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            target_headroom: 4.0,
            gamma: [1.0; 3],
            baseline_offset: [0.0; 3],
            alternate_offset: [0.0; 3],
            bit_depth: 8,
            tone_curve: ToneCurve::default(),
            multichannel: true,
            gainmap_scale: 1,
            baseline_color_space: None,
            target_color_space: None,
            gamut_clip: GamutClip::default(),
        }
    }
}

impl GenerateOptions {
    /// Reject options no generator can honour.
    pub fn validate(&self) -> Result<()> {
        if !self.target_headroom.is_finite() || self.target_headroom <= 1.0 {
            return Err(Error::Configuration(format!(
                "target headroom must be > 1.0, got {}",
                self.target_headroom
            )));
        }
        for c in 0..3 {
            if !self.gamma[c].is_finite() || self.gamma[c] <= 0.0 {
                return Err(Error::Configuration(format!(
                    "gamma[{}] must be positive, got {}",
                    c, self.gamma[c]
                )));
            }
            if !self.baseline_offset[c].is_finite() || !self.alternate_offset[c].is_finite() {
                return Err(Error::Configuration(format!(
                    "offsets of channel {} must be finite",
                    c
                )));
            }
        }
        if !(8..=16).contains(&self.bit_depth) {
            return Err(Error::Configuration(format!(
                "bit depth must be in 8..=16, got {}",
                self.bit_depth
            )));
        }
        if self.gainmap_scale == 0 {
            return Err(Error::Configuration("gain map scale must be >= 1".into()));
        }
        Ok(())
    }

    /// Largest storable code for [`Self::bit_depth`].
    pub fn storage_max(&self) -> u32 {
        (1u32 << self.bit_depth) - 1
    }
}
