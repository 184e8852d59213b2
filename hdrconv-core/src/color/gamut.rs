//! Color space definitions and primaries conversion.
//!
//! Matrices are derived from chromaticities rather than tabulated, so any
//! (primaries, white point) pair converts through CIE XYZ. The reference
//! space for [`to_reference`] / [`from_reference`] is XYZ relative to D65;
//! spaces with another white point are Bradford-adapted on the way.

// Allow full precision for color matrices - these values come from standards
#![allow(clippy::excessive_precision)]

use serde::{Deserialize, Serialize};

use crate::color::transfer::TransferFunction;
use crate::types::{Error, Result};

/// 3x3 matrix for color transformations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3x3(pub [[f32; 3]; 3]);

impl Matrix3x3 {
    /// Identity matrix.
    pub const IDENTITY: Self = Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    /// Multiply matrix by RGB vector: [R', G', B'] = M * [R, G, B]
    #[inline]
    pub fn transform(&self, rgb: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        [
            m[0][0] * rgb[0] + m[0][1] * rgb[1] + m[0][2] * rgb[2],
            m[1][0] * rgb[0] + m[1][1] * rgb[1] + m[1][2] * rgb[2],
            m[2][0] * rgb[0] + m[2][1] * rgb[1] + m[2][2] * rgb[2],
        ]
    }

    /// Matrix multiplication: self * other
    pub fn multiply(&self, other: &Self) -> Self {
        Self::from_f64(mul(&self.to_f64(), &other.to_f64()))
    }

    /// Matrix inverse. Singular matrices yield `None`.
    pub fn inverse(&self) -> Option<Self> {
        invert(&self.to_f64()).map(|m| Self::from_f64(m))
    }

    fn to_f64(self) -> [[f64; 3]; 3] {
        self.0.map(|row| row.map(|v| v as f64))
    }

    fn from_f64(m: [[f64; 3]; 3]) -> Self {
        Self(m.map(|row| row.map(|v| v as f32)))
    }
}

type M64 = [[f64; 3]; 3];

fn mul(a: &M64, b: &M64) -> M64 {
    let mut result = [[0.0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            result[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    result
}

fn mul_vec(m: &M64, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

fn invert(m: &M64) -> Option<M64> {
    let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| {
        m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
    };
    let c00 = cofactor(1, 2, 1, 2);
    let c01 = -cofactor(1, 2, 0, 2);
    let c02 = cofactor(1, 2, 0, 1);
    let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
    if det.abs() < 1e-12 || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [
            c00 * inv_det,
            -cofactor(0, 2, 1, 2) * inv_det,
            cofactor(0, 1, 1, 2) * inv_det,
        ],
        [
            c01 * inv_det,
            cofactor(0, 2, 0, 2) * inv_det,
            -cofactor(0, 1, 0, 2) * inv_det,
        ],
        [
            c02 * inv_det,
            -cofactor(0, 2, 0, 1) * inv_det,
            cofactor(0, 1, 0, 1) * inv_det,
        ],
    ])
}

// ============================================================================
// Chromaticities
// ============================================================================

/// CIE 1931 xy chromaticity coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Chromaticity {
    /// x coordinate
    pub x: f32,
    /// y coordinate
    pub y: f32,
}

impl Chromaticity {
    /// Create a chromaticity coordinate.
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// XYZ of this chromaticity at luminance Y = 1.
    fn xyz(self) -> [f64; 3] {
        let (x, y) = (self.x as f64, self.y as f64);
        if y == 0.0 {
            return [0.0; 3];
        }
        [x / y, 1.0, (1.0 - x - y) / y]
    }
}

/// The three reference stimuli of an RGB space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Primaries {
    /// Red primary
    pub red: Chromaticity,
    /// Green primary
    pub green: Chromaticity,
    /// Blue primary
    pub blue: Chromaticity,
}

impl Primaries {
    /// ITU-R BT.709 / sRGB
    pub const BT709: Self = Self {
        red: Chromaticity::new(0.640, 0.330),
        green: Chromaticity::new(0.300, 0.600),
        blue: Chromaticity::new(0.150, 0.060),
    };

    /// DCI-P3 / Display P3
    pub const P3: Self = Self {
        red: Chromaticity::new(0.680, 0.320),
        green: Chromaticity::new(0.265, 0.690),
        blue: Chromaticity::new(0.150, 0.060),
    };

    /// ITU-R BT.2020 / BT.2100
    pub const BT2020: Self = Self {
        red: Chromaticity::new(0.708, 0.292),
        green: Chromaticity::new(0.170, 0.797),
        blue: Chromaticity::new(0.131, 0.046),
    };
}

/// Standard white points.
pub mod white {
    use super::Chromaticity;

    /// CIE standard illuminant D65
    pub const D65: Chromaticity = Chromaticity::new(0.3127, 0.3290);

    /// DCI theatrical white
    pub const DCI: Chromaticity = Chromaticity::new(0.314, 0.351);
}

// ============================================================================
// Color spaces
// ============================================================================

/// A (primaries, white point, transfer function) triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorSpace {
    /// RGB primaries
    pub primaries: Primaries,
    /// White point
    pub white: Chromaticity,
    /// Transfer function
    pub transfer: TransferFunction,
}

impl ColorSpace {
    /// sRGB (IEC 61966-2-1)
    pub const SRGB: Self = Self::new(Primaries::BT709, white::D65, TransferFunction::Srgb);

    /// Linear BT.709
    pub const BT709_LINEAR: Self =
        Self::new(Primaries::BT709, white::D65, TransferFunction::Linear);

    /// Display P3 (P3 primaries, D65, sRGB curve)
    pub const DISPLAY_P3: Self = Self::new(Primaries::P3, white::D65, TransferFunction::Srgb);

    /// BT.2100 PQ
    pub const BT2020_PQ: Self = Self::new(Primaries::BT2020, white::D65, TransferFunction::Pq);

    /// BT.2100 HLG
    pub const BT2020_HLG: Self = Self::new(Primaries::BT2020, white::D65, TransferFunction::Hlg);

    /// Linear BT.2020
    pub const BT2020_LINEAR: Self =
        Self::new(Primaries::BT2020, white::D65, TransferFunction::Linear);

    /// The canonical rendering space every conversion is routed through.
    pub const CANONICAL: Self = Self::BT2020_LINEAR;

    /// Create a color space.
    pub const fn new(primaries: Primaries, white: Chromaticity, transfer: TransferFunction) -> Self {
        Self {
            primaries,
            white,
            transfer,
        }
    }

    /// Same primaries and white point with a different transfer function.
    pub const fn with_transfer(self, transfer: TransferFunction) -> Self {
        Self { transfer, ..self }
    }

    /// Whether two spaces share primaries and white point.
    pub fn same_gamut(&self, other: &Self) -> bool {
        self.primaries == other.primaries && self.white == other.white
    }

    /// RGB → XYZ relative to this space's own white point.
    pub fn to_xyz_matrix(&self) -> Matrix3x3 {
        Matrix3x3::from_f64(self.rgb_to_xyz())
    }

    /// XYZ (own white point) → RGB.
    pub fn from_xyz_matrix(&self) -> Matrix3x3 {
        let m = invert(&self.rgb_to_xyz()).unwrap_or([[0.0; 3]; 3]);
        Matrix3x3::from_f64(m)
    }

    /// Relative luminance weights (the Y row of the RGB → XYZ matrix).
    pub fn luminance_coefficients(&self) -> [f32; 3] {
        self.rgb_to_xyz()[1].map(|v| v as f32)
    }

    fn rgb_to_xyz(&self) -> M64 {
        let r = self.primaries.red.xyz();
        let g = self.primaries.green.xyz();
        let b = self.primaries.blue.xyz();
        let p = [[r[0], g[0], b[0]], [r[1], g[1], b[1]], [r[2], g[2], b[2]]];
        let Some(p_inv) = invert(&p) else {
            return [[0.0; 3]; 3];
        };
        let s = mul_vec(&p_inv, self.white.xyz());
        [
            [p[0][0] * s[0], p[0][1] * s[1], p[0][2] * s[2]],
            [p[1][0] * s[0], p[1][1] * s[1], p[1][2] * s[2]],
            [p[2][0] * s[0], p[2][1] * s[1], p[2][2] * s[2]],
        ]
    }

    /// RGB → reference XYZ (D65), including white-point adaptation.
    fn to_reference_f64(&self) -> M64 {
        mul(&bradford(self.white, white::D65), &self.rgb_to_xyz())
    }

    // ------------------------------------------------------------------------
    // CICP (ITU-T H.273)
    // ------------------------------------------------------------------------

    /// Build a color space from CICP colour_primaries and
    /// transfer_characteristics codes.
    pub fn from_cicp(primaries: u16, transfer: u16) -> Result<Self> {
        let (prim, white) = match primaries {
            1 => (Primaries::BT709, white::D65),
            9 => (Primaries::BT2020, white::D65),
            11 => (Primaries::P3, white::DCI),
            12 => (Primaries::P3, white::D65),
            other => {
                return Err(Error::ColorSpace(format!(
                    "unknown colour primaries code {}",
                    other
                )))
            }
        };
        let tf = match transfer {
            1 | 6 | 14 | 15 => TransferFunction::Bt709,
            8 => TransferFunction::Linear,
            13 => TransferFunction::Srgb,
            16 => TransferFunction::Pq,
            18 => TransferFunction::Hlg,
            other => {
                return Err(Error::ColorSpace(format!(
                    "unknown transfer characteristics code {}",
                    other
                )))
            }
        };
        Ok(Self::new(prim, white, tf))
    }

    /// CICP (colour_primaries, transfer_characteristics) codes for this space.
    pub fn cicp(&self) -> Result<(u16, u16)> {
        let primaries = match (self.primaries, self.white) {
            (p, w) if p == Primaries::BT709 && w == white::D65 => 1,
            (p, w) if p == Primaries::BT2020 && w == white::D65 => 9,
            (p, w) if p == Primaries::P3 && w == white::DCI => 11,
            (p, w) if p == Primaries::P3 && w == white::D65 => 12,
            _ => {
                return Err(Error::ColorSpace(
                    "primaries have no CICP code".into(),
                ))
            }
        };
        let transfer = match self.transfer {
            TransferFunction::Bt709 => 1,
            TransferFunction::Linear => 8,
            TransferFunction::Srgb => 13,
            TransferFunction::Pq => 16,
            TransferFunction::Hlg => 18,
        };
        Ok((primaries, transfer))
    }
}

// ============================================================================
// Chromatic adaptation
// ============================================================================

const BRADFORD: M64 = [
    [0.8951, 0.2664, -0.1614],
    [-0.7502, 1.7135, 0.0367],
    [0.0389, -0.0685, 1.0296],
];

/// Bradford adaptation from one white point to another (XYZ → XYZ).
fn bradford(src: Chromaticity, dst: Chromaticity) -> M64 {
    if src == dst {
        return Matrix3x3::IDENTITY.to_f64();
    }
    let Some(bradford_inv) = invert(&BRADFORD) else {
        return Matrix3x3::IDENTITY.to_f64();
    };
    let src_cone = mul_vec(&BRADFORD, src.xyz());
    let dst_cone = mul_vec(&BRADFORD, dst.xyz());
    let mut scale = [[0.0f64; 3]; 3];
    for i in 0..3 {
        scale[i][i] = dst_cone[i] / src_cone[i];
    }
    mul(&bradford_inv, &mul(&scale, &BRADFORD))
}

/// Bradford adaptation matrix between two white points.
pub fn chromatic_adaptation_matrix(src: Chromaticity, dst: Chromaticity) -> Matrix3x3 {
    Matrix3x3::from_f64(bradford(src, dst))
}

// ============================================================================
// Conversions
// ============================================================================

/// Linear RGB in `space` → XYZ relative to D65.
#[inline]
pub fn to_reference(rgb: [f32; 3], space: &ColorSpace) -> [f32; 3] {
    Matrix3x3::from_f64(space.to_reference_f64()).transform(rgb)
}

/// XYZ relative to D65 → linear RGB in `space`.
#[inline]
pub fn from_reference(xyz: [f32; 3], space: &ColorSpace) -> [f32; 3] {
    let m = invert(&space.to_reference_f64()).unwrap_or([[0.0; 3]; 3]);
    Matrix3x3::from_f64(m).transform(xyz)
}

/// Matrix taking linear RGB in `from` to linear RGB in `to`.
pub fn primaries_conversion_matrix(from: &ColorSpace, to: &ColorSpace) -> Matrix3x3 {
    if from.same_gamut(to) {
        return Matrix3x3::IDENTITY;
    }
    let to_inv = invert(&to.to_reference_f64()).unwrap_or([[0.0; 3]; 3]);
    Matrix3x3::from_f64(mul(&to_inv, &from.to_reference_f64()))
}

/// Convert linear RGB between two spaces' primaries.
#[inline]
pub fn convert_primaries(rgb: [f32; 3], from: &ColorSpace, to: &ColorSpace) -> [f32; 3] {
    if from.same_gamut(to) {
        return rgb;
    }
    primaries_conversion_matrix(from, to).transform(rgb)
}

/// What to do with components that land outside the target gamut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GamutClip {
    /// Clamp negative components to zero.
    #[default]
    Clip,
    /// Keep out-of-gamut components as computed.
    Preserve,
}

impl GamutClip {
    /// Apply the policy to a linear RGB triple.
    #[inline]
    pub fn apply(self, rgb: [f32; 3]) -> [f32; 3] {
        match self {
            GamutClip::Clip => rgb.map(|v| if v.is_nan() { 0.0 } else { v.max(0.0) }),
            GamutClip::Preserve => rgb,
        }
    }
}
