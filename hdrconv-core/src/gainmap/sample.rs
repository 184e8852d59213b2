//! Gain map sampling with precomputed per-code factors.

use crate::image::{Image, PixelData};

/// Precomputed mapping from stored gain codes to reconstruction factors.
///
/// Evaluating `powf()` once per code instead of once per pixel keeps
/// composition cheap even for 16-bit gain maps.
pub(crate) struct GainLut {
    /// `entries` values per channel: [R0..Rn, G0..Gn, B0..Bn]
    table: Vec<f32>,
    entries: usize,
}

impl GainLut {
    /// Tabulate `factor(channel, normalized_code)` for every code of
    /// `bit_depth` bits.
    pub(crate) fn new(bit_depth: u8, factor: impl Fn(usize, f32) -> f32) -> Self {
        let max_code = (1usize << bit_depth) - 1;
        let entries = max_code + 1;
        let mut table = vec![0.0f32; entries * 3];
        for channel in 0..3 {
            for code in 0..entries {
                table[channel * entries + code] = factor(channel, code as f32 / max_code as f32);
            }
        }
        Self { table, entries }
    }

    #[inline(always)]
    fn lookup(&self, code: usize, channel: usize) -> f32 {
        self.table[channel * self.entries + code.min(self.entries - 1)]
    }
}

/// Bilinear interpolation.
#[inline(always)]
pub(crate) fn bilinear(v00: f32, v10: f32, v01: f32, v11: f32, fx: f32, fy: f32) -> f32 {
    let top = v00 * (1.0 - fx) + v10 * fx;
    let bottom = v01 * (1.0 - fx) + v11 * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Where the centre of pixel `i` of a `from`-pixel axis falls on a
/// `to`-pixel axis spanning the same extent, clamped to the outer centres.
///
/// Generation and composition both map through this, so a scaled gain map
/// pixel is solved at the same point it is reconstructed from.
#[inline]
pub(crate) fn centre_position(i: u32, from: u32, to: u32) -> f64 {
    ((i as f64 + 0.5) * to as f64 / from as f64 - 0.5).clamp(0.0, (to - 1) as f64)
}

/// Samples a gain map over a baseline of a (possibly) larger size.
pub(crate) struct GainSampler<'a, F: Fn(usize, f32) -> f32> {
    gainmap: &'a Image,
    lut: Option<GainLut>,
    factor: F,
    base_width: u32,
    base_height: u32,
}

impl<'a, F: Fn(usize, f32) -> f32 + Sync> GainSampler<'a, F> {
    /// `factor(channel, normalized_code)` turns a stored value into the
    /// per-channel quantity being interpolated.
    pub(crate) fn new(gainmap: &'a Image, base_width: u32, base_height: u32, factor: F) -> Self {
        let lut = gainmap
            .pixels
            .bit_depth()
            .map(|depth| GainLut::new(depth, &factor));
        Self {
            gainmap,
            lut,
            factor,
            base_width,
            base_height,
        }
    }

    #[inline]
    fn value(&self, index: usize, channel: usize) -> f32 {
        match (&self.gainmap.pixels, &self.lut) {
            (PixelData::U8(v), Some(lut)) => lut.lookup(v[index] as usize, channel),
            (PixelData::U16 { samples, .. }, Some(lut)) => {
                lut.lookup(samples[index] as usize, channel)
            }
            (pixels, _) => (self.factor)(channel, pixels.normalized(index).clamp(0.0, 1.0)),
        }
    }

    /// Factors for baseline pixel `(x, y)`. Single-channel maps use
    /// channel 0 and are broadcast.
    #[inline]
    #[allow(clippy::needless_range_loop)]
    pub(crate) fn sample(&self, x: u32, y: u32) -> [f32; 3] {
        let gm = self.gainmap;
        let gm_x = centre_position(x, self.base_width, gm.width);
        let gm_y = centre_position(y, self.base_height, gm.height);

        let x0 = (gm_x.floor() as u32).min(gm.width - 1);
        let y0 = (gm_y.floor() as u32).min(gm.height - 1);
        let x1 = (x0 + 1).min(gm.width - 1);
        let y1 = (y0 + 1).min(gm.height - 1);
        let fx = (gm_x - gm_x.floor()) as f32;
        let fy = (gm_y - gm_y.floor()) as f32;

        let channels = gm.channels as usize;
        let at = |px: u32, py: u32, c: usize| {
            let index = (py as usize * gm.width as usize + px as usize) * channels + c;
            self.value(index, if channels == 1 { 0 } else { c })
        };

        if channels == 1 {
            let g = bilinear(at(x0, y0, 0), at(x1, y0, 0), at(x0, y1, 0), at(x1, y1, 0), fx, fy);
            [g, g, g]
        } else {
            let mut gains = [0.0f32; 3];
            for c in 0..3 {
                gains[c] = bilinear(at(x0, y0, c), at(x1, y0, c), at(x0, y1, c), at(x1, y1, c), fx, fy);
            }
            gains
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorSpace;
    use crate::image::ImageRole;

    fn gainmap(width: u32, height: u32, data: Vec<u8>) -> Image {
        Image::new(width, height, 1, PixelData::U8(data), ColorSpace::BT709_LINEAR, ImageRole::Gainmap)
            .unwrap()
    }

    #[test]
    fn test_lut_matches_direct_evaluation() {
        let lut = GainLut::new(8, |c, t| t * (c + 1) as f32);
        assert_eq!(lut.lookup(0, 0), 0.0);
        assert_eq!(lut.lookup(255, 0), 1.0);
        assert_eq!(lut.lookup(255, 2), 3.0);
        assert_eq!(lut.lookup(1000, 1), 2.0);
    }

    #[test]
    fn test_full_resolution_sampling_is_exact() {
        let gm = gainmap(3, 1, vec![0, 128, 255]);
        let sampler = GainSampler::new(&gm, 3, 1, |_, t| t);
        assert_eq!(sampler.sample(0, 0), [0.0; 3]);
        assert_eq!(sampler.sample(1, 0), [128.0 / 255.0; 3]);
        assert_eq!(sampler.sample(2, 0), [1.0; 3]);
    }

    #[test]
    fn test_downscaled_sampling_interpolates() {
        let gm = gainmap(2, 1, vec![0, 255]);
        let sampler = GainSampler::new(&gm, 4, 1, |_, t| t);
        assert_eq!(sampler.sample(0, 0)[0], 0.0);
        // Pixel centres: x = 1 lands at gain-map x = 0.25, x = 2 at 0.75.
        assert!((sampler.sample(1, 0)[0] - 0.25).abs() < 1e-6);
        assert!((sampler.sample(2, 0)[0] - 0.75).abs() < 1e-6);
        assert_eq!(sampler.sample(3, 0)[0], 1.0);
    }

    #[test]
    fn test_centre_position_inverts() {
        assert_eq!(centre_position(3, 7, 7), 3.0);
        // Gain pixel 1 of a 2x map is centred between baseline pixels 2 and 3,
        // and those two baseline pixels sample it symmetrically.
        assert_eq!(centre_position(1, 4, 8), 2.5);
        assert_eq!(centre_position(2, 8, 4), 0.75);
        assert_eq!(centre_position(3, 8, 4), 1.25);
        assert_eq!(centre_position(0, 8, 4), 0.0);
    }

    #[test]
    fn test_float_gainmap_uses_factor_directly() {
        let gm = Image::new(
            1,
            1,
            3,
            PixelData::F32(vec![0.25, 0.5, 2.0]),
            ColorSpace::BT709_LINEAR,
            ImageRole::Gainmap,
        )
        .unwrap();
        let sampler = GainSampler::new(&gm, 1, 1, |c, t| t + c as f32);
        assert_eq!(sampler.sample(0, 0), [0.25, 1.5, 3.0]);
    }
}
