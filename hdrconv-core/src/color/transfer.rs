//! Transfer functions between linear light and stored code values.
//!
//! - forward: linear → encoded (OETF, or inverse EOTF for PQ)
//! - inverse: encoded → linear
//!
//! Linear domains:
//! - sRGB / BT.709 / Linear: relative, 1.0 = reference white
//! - PQ: absolute, 1.0 = 10000 cd/m²
//! - HLG: scene-referred `[0,1]`; [`hlg_ootf`] maps it to display light
//!
//! Reference standards:
//! - sRGB: IEC 61966-2-1
//! - BT.709: ITU-R BT.709-6
//! - PQ: SMPTE ST 2084, ITU-R BT.2100
//! - HLG: ITU-R BT.2100, ARIB STD-B67

#![allow(clippy::excessive_precision)]

use serde::{Deserialize, Serialize};

/// Transfer function identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferFunction {
    /// Identity.
    Linear,
    /// sRGB piecewise curve.
    #[default]
    Srgb,
    /// ITU-R BT.709 OETF.
    Bt709,
    /// Perceptual Quantizer (SMPTE ST 2084).
    Pq,
    /// Hybrid Log-Gamma (ITU-R BT.2100).
    Hlg,
}

impl TransferFunction {
    /// Whether this curve encodes absolute or scene-referred HDR signals.
    pub fn is_hdr(self) -> bool {
        matches!(self, Self::Pq | Self::Hlg)
    }
}

// ============================================================================
// sRGB Transfer Function (IEC 61966-2-1)
// ============================================================================

/// sRGB OETF: Linear `[0,1]` → sRGB encoded `[0,1]`
#[inline]
pub fn srgb_oetf(linear: f32) -> f32 {
    let l = linear as f64;
    let e = if l <= 0.0031308 {
        l * 12.92
    } else {
        1.055 * l.powf(1.0 / 2.4) - 0.055
    };
    e as f32
}

/// sRGB EOTF: sRGB encoded `[0,1]` → Linear `[0,1]`
#[inline]
pub fn srgb_eotf(encoded: f32) -> f32 {
    let e = encoded as f64;
    let l = if e <= 0.04045 {
        e / 12.92
    } else {
        ((e + 0.055) / 1.055).powf(2.4)
    };
    l as f32
}

// ============================================================================
// BT.709 Transfer Function (ITU-R BT.709)
// ============================================================================

/// Rec.709 α, chosen so the two OETF segments meet with equal slope.
pub const BT709_ALPHA: f64 = 1.099_296_826_809_44;
/// Rec.709 β, the linear-segment breakpoint.
pub const BT709_BETA: f64 = 0.018_053_968_510_807;

/// BT.709 OETF: Linear `[0,1]` → encoded `[0,1]`
#[inline]
pub fn bt709_oetf(linear: f32) -> f32 {
    let l = linear as f64;
    let e = if l < BT709_BETA {
        4.5 * l
    } else {
        BT709_ALPHA * l.powf(0.45) - (BT709_ALPHA - 1.0)
    };
    e as f32
}

/// BT.709 inverse OETF: encoded `[0,1]` → Linear `[0,1]`
#[inline]
pub fn bt709_oetf_inv(encoded: f32) -> f32 {
    let e = encoded as f64;
    let l = if e < 4.5 * BT709_BETA {
        e / 4.5
    } else {
        ((e + (BT709_ALPHA - 1.0)) / BT709_ALPHA).powf(1.0 / 0.45)
    };
    l as f32
}

// ============================================================================
// PQ Transfer Function (SMPTE ST 2084 / ITU-R BT.2100)
// ============================================================================

const PQ_M1: f64 = 2610.0 / 16384.0; // 0.1593017578125
const PQ_M2: f64 = 2523.0 / 4096.0 * 128.0; // 78.84375
const PQ_C1: f64 = 3424.0 / 4096.0; // 0.8359375
const PQ_C2: f64 = 2413.0 / 4096.0 * 32.0; // 18.8515625
const PQ_C3: f64 = 2392.0 / 4096.0 * 32.0; // 18.6875

/// PQ inverse EOTF: Linear `[0,1]` (1.0 = 10000 nits) → PQ encoded `[0,1]`
#[inline]
pub fn pq_oetf(linear: f32) -> f32 {
    if linear <= 0.0 {
        return 0.0;
    }

    let y_m1 = (linear as f64).powf(PQ_M1);
    let numerator = PQ_C1 + PQ_C2 * y_m1;
    let denominator = 1.0 + PQ_C3 * y_m1;
    (numerator / denominator).powf(PQ_M2) as f32
}

/// PQ EOTF: PQ encoded `[0,1]` → Linear `[0,1]` (1.0 = 10000 nits)
#[inline]
pub fn pq_eotf(encoded: f32) -> f32 {
    if encoded <= 0.0 {
        return 0.0;
    }

    let e_inv_m2 = (encoded as f64).powf(1.0 / PQ_M2);
    let numerator = (e_inv_m2 - PQ_C1).max(0.0);
    let denominator = PQ_C2 - PQ_C3 * e_inv_m2;

    if denominator <= 0.0 {
        return 0.0;
    }

    (numerator / denominator).powf(1.0 / PQ_M1) as f32
}

// ============================================================================
// HLG Transfer Function (ITU-R BT.2100 / ARIB STD-B67)
// ============================================================================

const HLG_A: f64 = 0.17883277;
const HLG_B: f64 = 0.28466892; // 1 - 4*a
const HLG_C: f64 = 0.55991073; // 0.5 - a*ln(4*a)

/// BT.2100 luminance weights used by the HLG OOTF.
const BT2100_LUMA: [f64; 3] = [0.2627, 0.6780, 0.0593];

/// HLG OETF: Scene linear `[0,1]` → HLG encoded `[0,1]`
#[inline]
pub fn hlg_oetf(linear: f32) -> f32 {
    if linear <= 0.0 {
        return 0.0;
    }

    let e = linear as f64;
    let v = if e <= 1.0 / 12.0 {
        (3.0 * e).sqrt()
    } else {
        HLG_A * (12.0 * e - HLG_B).ln() + HLG_C
    };
    v as f32
}

/// HLG inverse OETF: HLG encoded `[0,1]` → Scene linear `[0,1]`
#[inline]
pub fn hlg_oetf_inv(encoded: f32) -> f32 {
    if encoded <= 0.0 {
        return 0.0;
    }

    let e = encoded as f64;
    let v = if e <= 0.5 {
        e * e / 3.0
    } else {
        (((e - HLG_C) / HLG_A).exp() + HLG_B) / 12.0
    };
    v as f32
}

/// HLG system gamma for a display of the given nominal peak.
#[inline]
pub fn hlg_system_gamma(display_peak_nits: f32) -> f32 {
    1.2 + 0.42 * (display_peak_nits / 1000.0).log10()
}

/// HLG OOTF: scene linear RGB `[0,1]` → display linear RGB in nits.
///
/// `F_d = L_w · Y_s^(γ-1) · E`, with `Y_s` the BT.2100 luminance of the
/// scene signal.
pub fn hlg_ootf(scene: [f32; 3], display_peak_nits: f32) -> [f32; 3] {
    let gamma = hlg_system_gamma(display_peak_nits) as f64;
    let ys = luma(scene);
    if ys <= 0.0 {
        return [0.0; 3];
    }
    let scale = display_peak_nits as f64 * ys.powf(gamma - 1.0);
    scene.map(|e| (e as f64 * scale) as f32)
}

/// HLG inverse OOTF: display linear RGB in nits → scene linear RGB `[0,1]`
pub fn hlg_ootf_inv(display: [f32; 3], display_peak_nits: f32) -> [f32; 3] {
    let gamma = hlg_system_gamma(display_peak_nits) as f64;
    let peak = display_peak_nits as f64;
    let yd = luma(display);
    if yd <= 0.0 || peak <= 0.0 {
        return [0.0; 3];
    }
    let ys = (yd / peak).powf(1.0 / gamma);
    let scale = 1.0 / (peak * ys.powf(gamma - 1.0));
    display.map(|f| (f as f64 * scale) as f32)
}

#[inline]
fn luma(rgb: [f32; 3]) -> f64 {
    BT2100_LUMA[0] * rgb[0].max(0.0) as f64
        + BT2100_LUMA[1] * rgb[1].max(0.0) as f64
        + BT2100_LUMA[2] * rgb[2].max(0.0) as f64
}

// ============================================================================
// Generic Transfer Function Interface
// ============================================================================

/// Clamp to the curve's valid domain. NaN maps to 0.
#[inline]
fn clamp_domain(value: f32, transfer: TransferFunction) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    match transfer {
        TransferFunction::Linear => value.max(0.0),
        _ => value.clamp(0.0, 1.0),
    }
}

/// Linear → encoded for the given transfer function.
///
/// Out-of-domain inputs are clamped, never rejected.
#[inline]
pub fn apply_transfer_forward(linear: f32, transfer: TransferFunction) -> f32 {
    let v = clamp_domain(linear, transfer);
    match transfer {
        TransferFunction::Linear => v,
        TransferFunction::Srgb => srgb_oetf(v),
        TransferFunction::Bt709 => bt709_oetf(v),
        TransferFunction::Pq => pq_oetf(v),
        TransferFunction::Hlg => hlg_oetf(v),
    }
}

/// Encoded → linear for the given transfer function.
///
/// Out-of-domain inputs are clamped, never rejected.
#[inline]
pub fn apply_transfer_inverse(encoded: f32, transfer: TransferFunction) -> f32 {
    let v = clamp_domain(encoded, transfer);
    match transfer {
        TransferFunction::Linear => v,
        TransferFunction::Srgb => srgb_eotf(v),
        TransferFunction::Bt709 => bt709_oetf_inv(v),
        TransferFunction::Pq => pq_eotf(v),
        TransferFunction::Hlg => hlg_oetf_inv(v),
    }
}

// ============================================================================
// Lookup Tables
// ============================================================================

/// Precomputed inverse transfer for integer code values.
///
/// Replaces a `powf()` per sample with a table index when decoding
/// 8-16 bit images.
pub struct InverseTransferLut {
    table: Vec<f32>,
}

impl InverseTransferLut {
    /// Build a table covering every code of `bit_depth` bits.
    pub fn new(transfer: TransferFunction, bit_depth: u8) -> Self {
        let max_code = (1u32 << bit_depth.clamp(1, 16)) - 1;
        let table = (0..=max_code)
            .map(|code| apply_transfer_inverse(code as f32 / max_code as f32, transfer))
            .collect();
        Self { table }
    }

    /// Linear value for a code. Codes beyond the table saturate.
    #[inline(always)]
    pub fn lookup(&self, code: u16) -> f32 {
        let idx = (code as usize).min(self.table.len() - 1);
        self.table[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn samples() -> impl Iterator<Item = f32> {
        (0..=1000).map(|i| i as f32 / 1000.0)
    }

    #[test]
    fn test_srgb_known_values() {
        assert!(approx_eq(srgb_oetf(0.0), 0.0));
        assert!(approx_eq(srgb_oetf(1.0), 1.0));
        assert!(approx_eq(srgb_eotf(0.5), 0.21404114));
        // Linear segment below the knee
        assert!(approx_eq(srgb_eotf(0.04), 0.04 / 12.92));
    }

    #[test]
    fn test_pq_known_values() {
        assert!(approx_eq(pq_oetf(0.0), 0.0));
        assert!(approx_eq(pq_oetf(1.0), 1.0));
        // 100 nits sits at ~0.508 signal
        assert!((pq_oetf(0.01) - 0.5081).abs() < 1e-3);
        // 203 nits reference white sits at ~0.58 signal
        assert!((pq_oetf(0.0203) - 0.5807).abs() < 1e-3);
    }

    #[test]
    fn test_hlg_known_values() {
        assert!(approx_eq(hlg_oetf(1.0 / 12.0), 0.5));
        assert!(approx_eq(hlg_oetf(1.0), 1.0));
        assert!(approx_eq(hlg_oetf_inv(0.5), 1.0 / 12.0));
    }

    #[test]
    fn test_bt709_known_values() {
        assert!(approx_eq(bt709_oetf(0.0), 0.0));
        assert!(approx_eq(bt709_oetf(1.0), 1.0));
        assert!(approx_eq(bt709_oetf(0.01), 0.045));
        assert!(approx_eq(bt709_oetf_inv(0.045), 0.01));
    }

    /// inverse(forward(x)) == x over the whole domain, for every curve.
    #[test]
    fn test_transfer_inverse_identity() {
        for tf in [
            TransferFunction::Linear,
            TransferFunction::Srgb,
            TransferFunction::Bt709,
            TransferFunction::Pq,
            TransferFunction::Hlg,
        ] {
            for x in samples() {
                let back = apply_transfer_inverse(apply_transfer_forward(x, tf), tf);
                assert!(
                    approx_eq(back, x),
                    "{:?} inverse identity failed at {}: got {}",
                    tf,
                    x,
                    back
                );
            }
        }
    }

    #[test]
    fn test_bt709_continuous_at_breakpoint() {
        let below = bt709_oetf((BT709_BETA - 1e-9) as f32);
        let above = bt709_oetf((BT709_BETA + 1e-9) as f32);
        assert!((above - below).abs() < 1e-6, "{} vs {}", below, above);

        // Codes just above 4.5 * 0.018 used to decode on the wrong segment.
        for code in [0.0810f32, 0.0811, 0.0812, 0.0813, 0.0815] {
            let back = bt709_oetf(bt709_oetf_inv(code));
            assert!((back - code).abs() < 1e-6, "{} -> {}", code, back);
        }
    }

    #[test]
    fn test_forward_is_monotonic() {
        for tf in [TransferFunction::Pq, TransferFunction::Hlg, TransferFunction::Srgb] {
            let mut prev = -1.0f32;
            for x in samples() {
                let y = apply_transfer_forward(x, tf);
                assert!(y >= prev, "{:?} not monotonic at {}", tf, x);
                prev = y;
            }
        }
    }

    #[test]
    fn test_out_of_domain_inputs_clamp() {
        assert_eq!(apply_transfer_forward(-0.5, TransferFunction::Pq), 0.0);
        assert!(approx_eq(apply_transfer_forward(2.0, TransferFunction::Pq), 1.0));
        assert_eq!(apply_transfer_inverse(f32::NAN, TransferFunction::Hlg), 0.0);
        assert!(approx_eq(apply_transfer_inverse(1.5, TransferFunction::Srgb), 1.0));
        // Linear keeps HDR range but drops negatives
        assert_eq!(apply_transfer_forward(3.0, TransferFunction::Linear), 3.0);
        assert_eq!(apply_transfer_forward(-3.0, TransferFunction::Linear), 0.0);
    }

    #[test]
    fn test_hlg_ootf_roundtrip() {
        let scene = [0.2, 0.5, 0.1];
        let display = hlg_ootf(scene, 1000.0);
        let back = hlg_ootf_inv(display, 1000.0);
        for c in 0..3 {
            assert!(approx_eq(back[c], scene[c]), "channel {}: {:?}", c, back);
        }
    }

    #[test]
    fn test_hlg_ootf_peak_white() {
        // Full-scale scene white reaches the display peak.
        let display = hlg_ootf([1.0; 3], 1000.0);
        for v in display {
            assert!((v - 1000.0).abs() < 1e-2);
        }
        assert!((hlg_system_gamma(1000.0) - 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_lut_matches_direct() {
        let lut = InverseTransferLut::new(TransferFunction::Srgb, 8);
        for i in 0..=255u16 {
            let direct = srgb_eotf(i as f32 / 255.0);
            assert!(approx_eq(direct, lut.lookup(i)), "sRGB LUT mismatch at {}", i);
        }

        let pq_lut = InverseTransferLut::new(TransferFunction::Pq, 10);
        for i in (0..=1023u16).step_by(10) {
            let direct = pq_eotf(i as f32 / 1023.0);
            assert!(approx_eq(direct, pq_lut.lookup(i)), "PQ LUT mismatch at {}", i);
        }
        // Saturates rather than panicking
        assert!(approx_eq(pq_lut.lookup(4000), 1.0));
    }
}
