//! Structural read/write of one container format.

use std::io::Write;

use hdrconv_core::{ImageContainer, Result};
use tracing::debug;

use crate::registry::FormatId;

/// Parses and assembles one container format.
///
/// Codecs only handle container structure and metadata; coded pictures go
/// through a [`SampleCoder`](crate::coder::SampleCoder).
pub trait Codec: Send + Sync {
    /// The format this codec handles.
    fn format(&self) -> FormatId;

    /// Cheap structural check that never fails and never decodes pixels.
    fn identify(&self, data: &[u8]) -> bool;

    /// Parse a complete file.
    fn read(&self, data: &[u8]) -> Result<ImageContainer>;

    /// Assemble a complete file in memory.
    ///
    /// Metadata is validated before anything is encoded.
    fn encode(&self, container: &ImageContainer) -> Result<Vec<u8>>;

    /// Assemble and write a file. Nothing reaches `out` unless assembly
    /// succeeded.
    fn write(&self, out: &mut dyn Write, container: &ImageContainer) -> Result<()> {
        let bytes = self.encode(container)?;
        out.write_all(&bytes)?;
        debug!(format = %self.format(), bytes = bytes.len(), "wrote container");
        Ok(())
    }
}
