//! HDR to SDR tone mapping for baseline generation.

use serde::{Deserialize, Serialize};

/// Curve used to derive an SDR baseline from canonical HDR samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneCurve {
    /// Clip each channel to [0, 1].
    #[default]
    Clip,
    /// Extended Reinhard on the largest component, reaching 1.0 at the
    /// target headroom.
    Reinhard,
}

impl ToneCurve {
    /// Map one linear RGB triple to the SDR range [0, 1].
    ///
    /// `headroom` is the peak the HDR content is expected to reach; the
    /// Reinhard curve uses it as its white point.
    #[inline]
    pub fn apply(self, rgb: [f32; 3], headroom: f32) -> [f32; 3] {
        let rgb = rgb.map(|v| if v.is_nan() { 0.0 } else { v.max(0.0) });
        match self {
            ToneCurve::Clip => rgb.map(|v| v.min(1.0)),
            ToneCurve::Reinhard => {
                let peak = rgb[0].max(rgb[1]).max(rgb[2]);
                if peak <= 0.0 {
                    return [0.0; 3];
                }
                let scale = reinhard_tonemap(peak, headroom.max(1.0)) / peak;
                rgb.map(|v| (v * scale).min(1.0))
            }
        }
    }
}

/// Extended Reinhard tone mapping operator.
///
/// `L_out = L_in * (1 + L_in/L_max²) / (1 + L_in)`, which maps `L_max` to 1.0.
#[inline]
pub fn reinhard_tonemap(l_in: f32, l_max: f32) -> f32 {
    let l_max_sq = l_max * l_max;
    l_in * (1.0 + l_in / l_max_sq) / (1.0 + l_in)
}
