//! Boundary to the external compressed-sample coder.
//!
//! Containers only know where coded pictures live; turning a JPEG, HEVC or
//! AV1 payload into samples (and back) is delegated to a [`SampleCoder`].

use hdrconv_core::{Error, Image, PixelData, Result};

/// Compressed bitstream kinds a container can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitstream {
    /// A complete baseline JPEG, SOI through EOI.
    Jpeg,
    /// An HEVC picture as stored in a HEIF item.
    Hevc,
    /// An AV1 picture as stored in an AVIF item.
    Av1,
}

/// Samples produced by a decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSamples {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Samples per pixel, 1 or 3.
    pub channels: u8,
    /// Interleaved samples.
    pub pixels: PixelData,
}

impl DecodedSamples {
    /// Check the decoded shape against what the container declared.
    pub fn expect_size(&self, width: u32, height: u32) -> Result<()> {
        if self.width != width || self.height != height {
            return Err(Error::Coding(format!(
                "decoder produced {}x{}, container declares {}x{}",
                self.width, self.height, width, height
            )));
        }
        Ok(())
    }
}

/// Output of an encoder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedSamples {
    /// Coded picture bytes.
    pub payload: Vec<u8>,
    /// Decoder configuration record (`hvcC` / `av1C` body) when the
    /// bitstream needs one.
    pub decoder_config: Option<Vec<u8>>,
}

/// Compressed-pixel coder used by the format codecs.
pub trait SampleCoder: Send + Sync {
    /// Decode one coded picture. `config` is the decoder configuration
    /// record stored next to HEVC and AV1 items.
    fn decode(
        &self,
        bitstream: Bitstream,
        config: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<DecodedSamples>;

    /// Encode one image.
    fn encode(&self, bitstream: Bitstream, image: &Image) -> Result<EncodedSamples>;
}
