//! Format table: identifier → (codec, composer, generator), plus detection.
//!
//! The table is built once and never mutated, so one [`Registry`] can be
//! shared by any number of concurrent conversions.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use hdrconv_core::{
    Composer, Error, GainmapComposer, GainmapGenerator, GainmapVariant, GenerateOptions,
    Generator, Result, SingleLayerComposer, SingleLayerGenerator,
};
use tracing::{debug, info};

use crate::codec::Codec;
use crate::coder::SampleCoder;
use crate::formats::{AppleHeic, Iso22028Avif, UltraHdrJpeg};

/// Registered container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatId {
    /// JPEG baseline + ISO 21496-1 gain map, linked by MPF.
    UltraHdrJpeg,
    /// HEIC with an Apple HDR gain map.
    AppleHeic,
    /// Single-layer PQ/HLG AVIF.
    Iso22028Avif,
}

/// Order in which [`Registry::detect`] tries formats.
///
/// Box-based formats go first; their `ftyp` brands are disjoint, and neither
/// can start with a JPEG SOI.
pub const DETECTION_ORDER: [FormatId; 3] = [
    FormatId::AppleHeic,
    FormatId::Iso22028Avif,
    FormatId::UltraHdrJpeg,
];

impl FormatId {
    /// Stable textual name.
    pub fn as_str(self) -> &'static str {
        match self {
            FormatId::UltraHdrJpeg => "ultrahdr",
            FormatId::AppleHeic => "apple-heic",
            FormatId::Iso22028Avif => "iso22028-avif",
        }
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DETECTION_ORDER
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| Error::Configuration(format!("unknown format '{}'", s)))
    }
}

/// The three capabilities registered for a format.
#[derive(Clone)]
pub struct FormatHandlers {
    /// Container reader/writer.
    pub codec: Arc<dyn Codec>,
    /// Container → canonical rendering.
    pub composer: Arc<dyn Composer>,
    /// Canonical rendering → container.
    pub generator: Arc<dyn Generator>,
}

impl fmt::Debug for FormatHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatHandlers")
            .field("format", &self.codec.format())
            .finish_non_exhaustive()
    }
}

fn handlers(id: FormatId, coder: &Arc<dyn SampleCoder>) -> FormatHandlers {
    let coder = Arc::clone(coder);
    match id {
        FormatId::UltraHdrJpeg => FormatHandlers {
            codec: Arc::new(UltraHdrJpeg::new(coder)),
            composer: Arc::new(GainmapComposer),
            generator: Arc::new(GainmapGenerator::new(GainmapVariant::Iso)),
        },
        FormatId::AppleHeic => FormatHandlers {
            codec: Arc::new(AppleHeic::new(coder)),
            composer: Arc::new(GainmapComposer),
            generator: Arc::new(GainmapGenerator::new(GainmapVariant::Apple)),
        },
        FormatId::Iso22028Avif => FormatHandlers {
            codec: Arc::new(Iso22028Avif::new(coder)),
            composer: Arc::new(SingleLayerComposer),
            generator: Arc::new(SingleLayerGenerator),
        },
    }
}

/// Immutable table of registered formats.
#[derive(Debug, Clone)]
pub struct Registry {
    formats: HashMap<FormatId, FormatHandlers>,
}

impl Registry {
    /// Register every format, all sharing one sample coder.
    pub fn new(coder: Arc<dyn SampleCoder>) -> Self {
        Self::with_formats(coder, &DETECTION_ORDER)
    }

    /// Register only `formats`.
    pub fn with_formats(coder: Arc<dyn SampleCoder>, formats: &[FormatId]) -> Self {
        let formats = formats
            .iter()
            .map(|&id| (id, handlers(id, &coder)))
            .collect();
        Self { formats }
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: FormatId) -> bool {
        self.formats.contains_key(&id)
    }

    /// Handlers for a format.
    pub fn lookup(&self, id: FormatId) -> Result<&FormatHandlers> {
        self.formats
            .get(&id)
            .ok_or_else(|| Error::Configuration(format!("format '{}' is not registered", id)))
    }

    /// First registered format, in [`DETECTION_ORDER`], that recognizes `data`.
    pub fn detect(&self, data: &[u8]) -> Result<FormatId> {
        DETECTION_ORDER
            .into_iter()
            .filter_map(|id| self.formats.get(&id).map(|h| (id, h)))
            .find(|(_, h)| h.codec.identify(data))
            .map(|(id, _)| id)
            .ok_or_else(|| Error::Format("no registered format recognizes the input".into()))
    }

    /// Detect, read, compose, generate and write in one pass.
    ///
    /// `out` receives nothing if any step fails.
    pub fn convert(
        &self,
        input: &[u8],
        target: FormatId,
        options: &GenerateOptions,
        out: &mut dyn Write,
    ) -> Result<FormatId> {
        let source = self.detect(input)?;
        let from = self.lookup(source)?;
        let to = self.lookup(target)?;
        options.validate()?;

        let container = from.codec.read(input)?;
        debug!(%source, images = container.images.len(), "read container");
        let rendering = from.composer.compose(container)?;
        let generated = to.generator.generate(&rendering, options)?;
        to.codec.write(out, &generated)?;
        info!(
            %source,
            %target,
            width = rendering.width(),
            height = rendering.height(),
            "converted"
        );
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdrconv_core::{ErrorKind, Image};

    use crate::coder::{Bitstream, DecodedSamples, EncodedSamples};

    struct NoCoder;

    impl SampleCoder for NoCoder {
        fn decode(&self, _: Bitstream, _: Option<&[u8]>, _: &[u8]) -> Result<DecodedSamples> {
            Err(Error::Coding("unavailable".into()))
        }

        fn encode(&self, _: Bitstream, _: &Image) -> Result<EncodedSamples> {
            Err(Error::Coding("unavailable".into()))
        }
    }

    #[test]
    fn test_format_names_roundtrip() {
        for id in DETECTION_ORDER {
            assert_eq!(id.to_string().parse::<FormatId>().unwrap(), id);
        }
        let err = "png".parse::<FormatId>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_lookup_unregistered() {
        let registry = Registry::with_formats(Arc::new(NoCoder), &[FormatId::UltraHdrJpeg]);
        assert!(registry.contains(FormatId::UltraHdrJpeg));
        let err = registry.lookup(FormatId::AppleHeic).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_detect_nothing() {
        let registry = Registry::new(Arc::new(NoCoder));
        let err = registry.detect(b"GIF89a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(registry.detect(&[]).is_err());
    }

    #[test]
    fn test_registry_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Registry>();
    }
}
