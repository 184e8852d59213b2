//! ISO 22028-5 single-layer AVIF: one `av01` item whose `colr` tags an
//! absolute (PQ, HLG) or SDR-relative transfer.

use std::sync::Arc;

use hdrconv_core::{
    ColorSpace, ContainerMetadata, Error, ImageContainer, ImageRole, Result, SingleLayerMetadata,
};
use tracing::debug;

use super::{
    colour_property, declared_color_space, decoder_config, image_extents, image_from_samples,
    pixel_information,
};
use crate::codec::Codec;
use crate::coder::{Bitstream, SampleCoder};
use crate::isobmff::{peek_file_type, HeifBuilder, HeifFile, ItemSpec, Property};
use crate::registry::FormatId;

/// Codec for single-layer HDR AVIF files.
#[derive(Clone)]
pub struct Iso22028Avif {
    coder: Arc<dyn SampleCoder>,
}

impl Iso22028Avif {
    /// Codec using `coder` for the AV1 item.
    pub fn new(coder: Arc<dyn SampleCoder>) -> Self {
        Self { coder }
    }
}

impl std::fmt::Debug for Iso22028Avif {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iso22028Avif").finish_non_exhaustive()
    }
}

impl Codec for Iso22028Avif {
    fn format(&self) -> FormatId {
        FormatId::Iso22028Avif
    }

    fn identify(&self, data: &[u8]) -> bool {
        peek_file_type(data).is_some_and(|ftyp| ftyp.has_brand(b"avif"))
    }

    fn read(&self, data: &[u8]) -> Result<ImageContainer> {
        let file = HeifFile::parse(data)?;
        let item = file.primary_item()?;
        if &item.item_type != b"av01" {
            return Err(Error::Format(format!(
                "primary item is '{}', expected av01",
                String::from_utf8_lossy(&item.item_type)
            )));
        }
        let id = item.id;
        let config = decoder_config(&file, id, b"av1C")
            .ok_or_else(|| Error::Format("primary item has no av1C".into()))?;

        // Untagged single-layer HDR is taken to be BT.2100 PQ.
        let color_space = declared_color_space(&file, id)?.unwrap_or(ColorSpace::BT2020_PQ);
        let content_light = file.properties(id).find_map(|p| match p {
            Property::ContentLight(cll) => Some(*cll),
            _ => None,
        });
        debug!(?color_space, ?content_light, "reading AVIF primary item");

        let samples = self
            .coder
            .decode(Bitstream::Av1, Some(config), &file.item_data(id)?)?;
        if let Some((width, height)) = image_extents(&file, id) {
            samples.expect_size(width, height)?;
        }
        let image = image_from_samples(samples, color_space, ImageRole::Source)?;

        Ok(ImageContainer::new(
            vec![image],
            ContainerMetadata::SingleLayer(SingleLayerMetadata { content_light }),
        ))
    }

    fn encode(&self, container: &ImageContainer) -> Result<Vec<u8>> {
        let ContainerMetadata::SingleLayer(metadata) = &container.metadata else {
            return Err(Error::Metadata(
                "AVIF output needs single-layer metadata".into(),
            ));
        };
        let image = container.primary()?;
        let encoded = self.coder.encode(Bitstream::Av1, image)?;
        let config = encoded
            .decoder_config
            .ok_or_else(|| Error::Coding("AV1 encoder returned no av1C".into()))?;

        let mut properties = vec![
            (
                Property::DecoderConfig {
                    kind: *b"av1C",
                    data: config,
                },
                true,
            ),
            (
                Property::ImageExtents {
                    width: image.width,
                    height: image.height,
                },
                false,
            ),
        ];
        properties.extend(pixel_information(image).map(|p| (p, false)));
        properties.push((colour_property(&image.color_space), false));
        if let Some(cll) = metadata.content_light {
            properties.push((Property::ContentLight(cll), false));
        }

        let mut builder = HeifBuilder::new(*b"avif", &[*b"avif", *b"mif1", *b"miaf"]);
        let id = builder.add_item(ItemSpec {
            item_type: *b"av01",
            name: String::new(),
            content_type: None,
            data: encoded.payload,
            properties,
        });
        builder.set_primary(id);
        builder.build()
    }
}
