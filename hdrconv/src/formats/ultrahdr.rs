//! UltraHDR JPEG: an SDR baseline JPEG followed by a gain map JPEG, tied
//! together by an MPF directory.
//!
//! Primary image layout:
//!
//! ```text
//! SOI
//! [APP0/APP1 written by the JPEG coder]
//! APP2 ICC_PROFILE        baseline colour space (one or more chunks)
//! APP2 ISO 21496-1        4-byte version block
//! APP2 MPF                directory of both images
//! ...coded baseline...
//! EOI
//! ```
//!
//! The gain map JPEG follows immediately and carries the full ISO block in
//! its own APP2 segment.

use std::sync::Arc;

use hdrconv_core::gainmap::check_dimensions;
use hdrconv_core::metadata::gainmap::{parse_version_block, SUPPORTED_VERSION};
use hdrconv_core::{
    ColorSpace, ContainerMetadata, Error, GainmapMetadata, ImageContainer, ImageRole, Result,
    TransferFunction,
};
use tracing::{debug, warn};

use super::image_from_samples;
use crate::codec::Codec;
use crate::coder::{Bitstream, SampleCoder};
use crate::jpeg::markers::{self, Segment, APP2};
use crate::jpeg::mpf::{self, MpDirectory, MpEntry, MPF_IDENTIFIER};
use crate::jpeg::{icc, iso_segment, ISO_IDENTIFIER};
use crate::registry::FormatId;

/// Codec for UltraHDR JPEG files.
#[derive(Clone)]
pub struct UltraHdrJpeg {
    coder: Arc<dyn SampleCoder>,
}

impl UltraHdrJpeg {
    /// Codec using `coder` for the baseline and gain map JPEGs.
    pub fn new(coder: Arc<dyn SampleCoder>) -> Self {
        Self { coder }
    }
}

impl std::fmt::Debug for UltraHdrJpeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UltraHdrJpeg").finish_non_exhaustive()
    }
}

/// The MPF segment among the primary image's header segments.
fn find_mpf<'a>(segments: &[Segment<'a>]) -> Option<(usize, &'a [u8])> {
    segments
        .iter()
        .find_map(|s| s.tagged(APP2, MPF_IDENTIFIER).map(|p| (s.offset, p)))
}

fn find_iso<'a>(segments: &[Segment<'a>]) -> Option<&'a [u8]> {
    segments.iter().find_map(|s| s.tagged(APP2, ISO_IDENTIFIER))
}

impl Codec for UltraHdrJpeg {
    fn format(&self) -> FormatId {
        FormatId::UltraHdrJpeg
    }

    fn identify(&self, data: &[u8]) -> bool {
        match markers::header_segments(data) {
            Ok(segments) => find_iso(&segments).is_some() && find_mpf(&segments).is_some(),
            Err(_) => false,
        }
    }

    fn read(&self, data: &[u8]) -> Result<ImageContainer> {
        let segments = markers::header_segments(data)?;

        let version = find_iso(&segments)
            .ok_or_else(|| Error::Format("primary image has no ISO gain map segment".into()))?;
        let (minimum_version, writer_version) = parse_version_block(version)?;
        if minimum_version > SUPPORTED_VERSION {
            return Err(Error::Metadata(format!(
                "unsupported gain map version {}",
                minimum_version
            )));
        }

        let (mpf_offset, mpf_payload) = find_mpf(&segments)
            .ok_or_else(|| Error::Format("primary image has no MPF segment".into()))?;
        let directory = MpDirectory::parse(mpf_payload)?;
        if directory.entries.len() < 2 {
            return Err(Error::Format("MPF directory lists no gain map image".into()));
        }
        let primary = &data[directory.locate(data, mpf_offset, 0)?];
        let gain = &data[directory.locate(data, mpf_offset, 1)?];

        let gain_segments = markers::header_segments(gain)?;
        let block = find_iso(&gain_segments)
            .ok_or_else(|| Error::Metadata("gain map image has no ISO metadata".into()))?;
        let metadata = GainmapMetadata::from_bytes(block)?;
        if metadata.writer_version != writer_version {
            warn!(
                primary = writer_version,
                gainmap = metadata.writer_version,
                "writer versions of primary and gain map differ"
            );
        }

        let color_space = match icc::collect_profile(&segments)? {
            Some(profile) => icc::color_space_from_profile(&profile),
            None => ColorSpace::SRGB,
        };
        debug!(
            primary_len = primary.len(),
            gain_len = gain.len(),
            ?color_space,
            "located UltraHDR images"
        );

        let baseline = image_from_samples(
            self.coder.decode(Bitstream::Jpeg, None, primary)?,
            color_space,
            ImageRole::Source,
        )?;
        let gainmap = image_from_samples(
            self.coder.decode(Bitstream::Jpeg, None, gain)?,
            color_space.with_transfer(TransferFunction::Linear),
            ImageRole::Gainmap,
        )?;
        check_dimensions(&baseline, &gainmap)?;

        Ok(ImageContainer::new(
            vec![baseline, gainmap],
            ContainerMetadata::Gainmap(metadata),
        ))
    }

    fn encode(&self, container: &ImageContainer) -> Result<Vec<u8>> {
        let ContainerMetadata::Gainmap(metadata) = &container.metadata else {
            return Err(Error::Metadata(
                "UltraHDR output needs ISO gain map metadata".into(),
            ));
        };
        let block = metadata.to_bytes()?;
        let baseline = container.primary()?;
        let gainmap = container.gainmap()?;
        check_dimensions(baseline, gainmap)?;

        let gain_jpeg = self.coder.encode(Bitstream::Jpeg, gainmap)?.payload;
        let gain_file = markers::insert_segments(&gain_jpeg, &iso_segment(&block)?)?;

        let base_jpeg = self.coder.encode(Bitstream::Jpeg, baseline)?.payload;
        let mut ours = icc::app2_segments(&icc::profile_for(&baseline.color_space))?;
        ours.extend_from_slice(&iso_segment(&metadata.version_block())?);

        // The MPF segment has a fixed length, so every offset is known
        // before it is serialized.
        let mpf_offset = markers::insert_position(&base_jpeg)? + ours.len();
        let mpf_segment_len = 4 + MpDirectory::payload_len(2);
        let primary_len = base_jpeg.len() + ours.len() + mpf_segment_len;
        let gain_offset = primary_len - (mpf_offset + mpf::HEADER_OFFSET);
        let size = |len: usize| {
            u32::try_from(len)
                .map_err(|_| Error::LimitExceeded("MPF image larger than 4 GiB".into()))
        };
        let directory = MpDirectory::new(vec![
            MpEntry {
                attribute: mpf::ATTRIBUTE_PRIMARY,
                size: size(primary_len)?,
                offset: 0,
            },
            MpEntry {
                attribute: mpf::ATTRIBUTE_DEPENDENT,
                size: size(gain_file.len())?,
                offset: size(gain_offset)?,
            },
        ]);
        markers::write_segment(&mut ours, APP2, &directory.to_payload())?;

        let mut out = markers::insert_segments(&base_jpeg, &ours)?;
        debug_assert_eq!(out.len(), primary_len);
        out.extend_from_slice(&gain_file);
        debug!(
            primary_len,
            gain_len = gain_file.len(),
            "assembled UltraHDR JPEG"
        );
        Ok(out)
    }
}
