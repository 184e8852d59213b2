//! ISO 21496-1 style gain map parameters and their binary block.
//!
//! Block layout (big-endian):
//!
//! ```text
//! u16  minimum_version
//! u16  writer_version
//! u8   flags            0x80 multichannel, 0x40 use base colour space
//! f32  baseline_hdr_headroom
//! f32  alternate_hdr_headroom
//! per channel (1 or 3):
//!   f32 gainmap_min, gainmap_max, gainmap_gamma, baseline_offset, alternate_offset
//! ```
//!
//! A version-only block (the first 4 bytes) is attached to the primary
//! image to announce the scheme.

use crate::types::{Error, Result};

/// Highest `minimum_version` this reader understands.
pub const SUPPORTED_VERSION: u16 = 0;

const FLAG_MULTICHANNEL: u8 = 0x80;
const FLAG_USE_BASE_COLOUR_SPACE: u8 = 0x40;
const FLAG_RESERVED: u8 = !(FLAG_MULTICHANNEL | FLAG_USE_BASE_COLOUR_SPACE);

const HEADER_LEN: usize = 2 + 2 + 1 + 4 + 4;
const CHANNEL_LEN: usize = 5 * 4;

/// Gain map transform parameters.
///
/// Headrooms are linear ratios to SDR white. Gains are linear multipliers:
/// a stored code `s` of `max_s` decodes to
/// `gain = s / max_s * (gainmap_max - gainmap_min) + gainmap_min`.
#[derive(Debug, Clone, PartialEq)]
pub struct GainmapMetadata {
    /// Oldest reader version able to interpret the block.
    pub minimum_version: u16,
    /// Version of the writer.
    pub writer_version: u16,
    /// Headroom of the baseline rendition.
    pub baseline_hdr_headroom: f32,
    /// Headroom of the fully applied alternate rendition.
    pub alternate_hdr_headroom: f32,
    /// One gain per channel instead of a shared one.
    pub is_multichannel: bool,
    /// Gains apply in the baseline's colour space.
    pub use_base_colour_space: bool,
    /// Gain for stored code 0.
    pub gainmap_min: [f32; 3],
    /// Gain for the largest stored code.
    pub gainmap_max: [f32; 3],
    /// Exponent applied to the decoded gain.
    pub gainmap_gamma: [f32; 3],
    /// Added to the gain term.
    pub baseline_offset: [f32; 3],
    /// Subtracted from the reconstruction.
    pub alternate_offset: [f32; 3],
}

impl Default for GainmapMetadata {
    fn default() -> Self {
        Self {
            minimum_version: 0,
            writer_version: 0,
            baseline_hdr_headroom: 1.0,
            alternate_hdr_headroom: 4.0,
            is_multichannel: false,
            use_base_colour_space: true,
            gainmap_min: [0.0; 3],
            gainmap_max: [1.0; 3],
            gainmap_gamma: [1.0; 3],
            baseline_offset: [0.0; 3],
            alternate_offset: [0.0; 3],
        }
    }
}

impl GainmapMetadata {
    /// Number of channels stored in the block.
    pub fn channel_count(&self) -> usize {
        if self.is_multichannel {
            3
        } else {
            1
        }
    }

    /// Check every field invariant.
    pub fn validate(&self) -> Result<()> {
        if self.minimum_version > SUPPORTED_VERSION {
            return Err(Error::Metadata(format!(
                "unsupported gain map version {}",
                self.minimum_version
            )));
        }
        if !self.alternate_hdr_headroom.is_finite() || self.alternate_hdr_headroom <= 1.0 {
            return Err(Error::Metadata(format!(
                "alternate headroom must be > 1.0, got {}",
                self.alternate_hdr_headroom
            )));
        }
        if !self.baseline_hdr_headroom.is_finite()
            || self.baseline_hdr_headroom < 1.0
            || self.baseline_hdr_headroom >= self.alternate_hdr_headroom
        {
            return Err(Error::Metadata(format!(
                "baseline headroom {} must be in [1.0, {})",
                self.baseline_hdr_headroom, self.alternate_hdr_headroom
            )));
        }

        for c in 0..3 {
            let fields = [
                ("gainmap_min", self.gainmap_min[c]),
                ("gainmap_max", self.gainmap_max[c]),
                ("gainmap_gamma", self.gainmap_gamma[c]),
                ("baseline_offset", self.baseline_offset[c]),
                ("alternate_offset", self.alternate_offset[c]),
            ];
            for (name, value) in fields {
                if !value.is_finite() {
                    return Err(Error::Metadata(format!("{}[{}] must be finite", name, c)));
                }
            }
            if self.gainmap_min[c] > self.gainmap_max[c] {
                return Err(Error::Metadata(format!(
                    "gainmap_min[{}] ({}) > gainmap_max[{}] ({})",
                    c, self.gainmap_min[c], c, self.gainmap_max[c]
                )));
            }
            if self.gainmap_gamma[c] <= 0.0 {
                return Err(Error::Metadata(format!(
                    "gainmap_gamma[{}] must be positive",
                    c
                )));
            }
        }

        if !self.is_multichannel {
            let same = |a: &[f32; 3]| a[0] == a[1] && a[1] == a[2];
            if !(same(&self.gainmap_min)
                && same(&self.gainmap_max)
                && same(&self.gainmap_gamma)
                && same(&self.baseline_offset)
                && same(&self.alternate_offset))
            {
                return Err(Error::Metadata(
                    "single-channel metadata has differing channel values".into(),
                ));
            }
        }
        Ok(())
    }

    /// Decode a normalized stored value (`code / max_code`) of channel `c`.
    #[inline]
    pub fn decode_gain(&self, c: usize, stored: f32) -> f32 {
        stored.clamp(0.0, 1.0) * (self.gainmap_max[c] - self.gainmap_min[c]) + self.gainmap_min[c]
    }

    /// Quantize a gain of channel `c` to a code in `0..=storage_max`.
    ///
    /// A degenerate range (`min == max`) always stores 0.
    #[inline]
    pub fn encode_gain(&self, c: usize, gain: f32, storage_max: u32) -> u32 {
        let range = self.gainmap_max[c] - self.gainmap_min[c];
        if range <= 0.0 {
            return 0;
        }
        let t = ((gain - self.gainmap_min[c]) / range).clamp(0.0, 1.0);
        (t * storage_max as f32).round() as u32
    }

    /// Serialize the full block. Invalid metadata is rejected before any
    /// byte is produced.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let channels = self.channel_count();
        let mut data = Vec::with_capacity(HEADER_LEN + channels * CHANNEL_LEN);

        data.extend_from_slice(&self.minimum_version.to_be_bytes());
        data.extend_from_slice(&self.writer_version.to_be_bytes());

        let mut flags = 0u8;
        if self.is_multichannel {
            flags |= FLAG_MULTICHANNEL;
        }
        if self.use_base_colour_space {
            flags |= FLAG_USE_BASE_COLOUR_SPACE;
        }
        data.push(flags);

        data.extend_from_slice(&self.baseline_hdr_headroom.to_be_bytes());
        data.extend_from_slice(&self.alternate_hdr_headroom.to_be_bytes());

        for c in 0..channels {
            for value in [
                self.gainmap_min[c],
                self.gainmap_max[c],
                self.gainmap_gamma[c],
                self.baseline_offset[c],
                self.alternate_offset[c],
            ] {
                data.extend_from_slice(&value.to_be_bytes());
            }
        }
        Ok(data)
    }

    /// Parse and validate a full block.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = BlockReader { data, pos: 0 };

        let minimum_version = reader.u16()?;
        let writer_version = reader.u16()?;
        let flags = reader.u8()?;
        if flags & FLAG_RESERVED != 0 {
            return Err(Error::Metadata(format!(
                "reserved gain map flag bits set: {:#04x}",
                flags
            )));
        }

        let mut metadata = GainmapMetadata {
            minimum_version,
            writer_version,
            is_multichannel: flags & FLAG_MULTICHANNEL != 0,
            use_base_colour_space: flags & FLAG_USE_BASE_COLOUR_SPACE != 0,
            baseline_hdr_headroom: reader.f32()?,
            alternate_hdr_headroom: reader.f32()?,
            ..Default::default()
        };

        let channels = metadata.channel_count();
        for c in 0..channels {
            let values = [
                reader.f32()?,
                reader.f32()?,
                reader.f32()?,
                reader.f32()?,
                reader.f32()?,
            ];
            let targets = if channels == 1 { 0..3 } else { c..c + 1 };
            for t in targets {
                metadata.gainmap_min[t] = values[0];
                metadata.gainmap_max[t] = values[1];
                metadata.gainmap_gamma[t] = values[2];
                metadata.baseline_offset[t] = values[3];
                metadata.alternate_offset[t] = values[4];
            }
        }

        if reader.pos != data.len() {
            return Err(Error::Metadata(format!(
                "{} trailing bytes after gain map block",
                data.len() - reader.pos
            )));
        }

        metadata.validate()?;
        Ok(metadata)
    }

    /// The 4-byte version-only block for the primary image.
    pub fn version_block(&self) -> [u8; 4] {
        let min = self.minimum_version.to_be_bytes();
        let writer = self.writer_version.to_be_bytes();
        [min[0], min[1], writer[0], writer[1]]
    }
}

/// Parse a version-only block, returning `(minimum_version, writer_version)`.
pub fn parse_version_block(data: &[u8]) -> Result<(u16, u16)> {
    if data.len() != 4 {
        return Err(Error::Metadata(format!(
            "version block must be 4 bytes, got {}",
            data.len()
        )));
    }
    let mut reader = BlockReader { data, pos: 0 };
    Ok((reader.u16()?, reader.u16()?))
}

struct BlockReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl BlockReader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or_else(|| Error::Metadata("gain map block truncated".into()))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    fn multichannel() -> GainmapMetadata {
        GainmapMetadata {
            writer_version: 3,
            is_multichannel: true,
            alternate_hdr_headroom: 6.5,
            gainmap_min: [0.5, 0.75, 1.0],
            gainmap_max: [4.0, 5.0, 6.0],
            gainmap_gamma: [1.0, 0.8, 1.2],
            baseline_offset: [0.0, 0.015625, 0.0],
            alternate_offset: [0.0, 0.0, 0.015625],
            ..Default::default()
        }
    }

    #[test]
    fn test_block_layout_single_channel() {
        let bytes = GainmapMetadata::default().to_bytes().unwrap();
        assert_eq!(bytes.len(), 13 + 20);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
        assert_eq!(bytes[4], 0x40);
        assert_eq!(&bytes[5..9], &1.0f32.to_be_bytes());
        assert_eq!(&bytes[9..13], &4.0f32.to_be_bytes());
    }

    #[test]
    fn test_block_roundtrip_is_byte_exact() {
        let bytes = multichannel().to_bytes().unwrap();
        assert_eq!(bytes.len(), 13 + 60);
        assert_eq!(bytes[4], 0xC0);
        let parsed = GainmapMetadata::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, multichannel());
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_single_channel_broadcasts() {
        let meta = GainmapMetadata {
            gainmap_max: [3.0; 3],
            ..Default::default()
        };
        let parsed = GainmapMetadata::from_bytes(&meta.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.gainmap_max, [3.0; 3]);
    }

    #[test]
    fn test_min_greater_than_max_rejected() {
        let meta = GainmapMetadata {
            is_multichannel: true,
            gainmap_min: [0.0, 2.0, 0.0],
            gainmap_max: [1.0, 1.0, 1.0],
            ..Default::default()
        };
        assert_eq!(meta.to_bytes().unwrap_err().kind(), ErrorKind::Metadata);
    }

    #[test]
    fn test_headroom_invariants() {
        for (base, alt) in [(1.0, 1.0), (1.0, 0.5), (0.5, 4.0), (4.0, 4.0), (1.0, f32::NAN)] {
            let meta = GainmapMetadata {
                baseline_hdr_headroom: base,
                alternate_hdr_headroom: alt,
                ..Default::default()
            };
            assert!(meta.validate().is_err(), "{} {}", base, alt);
        }
    }

    #[test]
    fn test_malformed_blocks() {
        let bytes = GainmapMetadata::default().to_bytes().unwrap();
        // Truncated
        let err = GainmapMetadata::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Metadata);
        // Trailing
        let mut long = bytes.clone();
        long.push(0);
        assert!(GainmapMetadata::from_bytes(&long).is_err());
        // Reserved flag
        let mut flagged = bytes.clone();
        flagged[4] |= 0x01;
        assert!(GainmapMetadata::from_bytes(&flagged).is_err());
        // Future version
        let mut future = bytes;
        future[1] = 1;
        assert!(GainmapMetadata::from_bytes(&future).is_err());
    }

    #[test]
    fn test_version_block() {
        let block = multichannel().version_block();
        assert_eq!(block, [0, 0, 0, 3]);
        assert_eq!(parse_version_block(&block).unwrap(), (0, 3));
        assert!(parse_version_block(&block[..3]).is_err());
    }

    #[test]
    fn test_gain_quantization() {
        let meta = GainmapMetadata {
            gainmap_min: [0.5; 3],
            gainmap_max: [4.5; 3],
            ..Default::default()
        };
        assert_eq!(meta.encode_gain(0, 0.5, 255), 0);
        assert_eq!(meta.encode_gain(0, 4.5, 255), 255);
        assert_eq!(meta.encode_gain(0, 2.5, 255), 128);
        assert_eq!(meta.decode_gain(0, 0.0), 0.5);
        assert_eq!(meta.decode_gain(0, 1.0), 4.5);

        let flat = GainmapMetadata {
            gainmap_min: [2.0; 3],
            gainmap_max: [2.0; 3],
            ..Default::default()
        };
        assert_eq!(flat.encode_gain(0, 2.0, 255), 0);
        assert_eq!(flat.decode_gain(0, 0.0), 2.0);
    }
}
