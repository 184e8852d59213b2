//! Apple HDR HEIC: an HEVC primary item, an auxiliary HEVC gain map item,
//! and the gain map headroom as an XMP `mime` item.

use std::sync::Arc;

use hdrconv_core::gainmap::check_dimensions;
use hdrconv_core::image::validate_dimensions;
use hdrconv_core::metadata::xmp;
use hdrconv_core::{
    AppleHeadroomMetadata, ColorSpace, ContainerMetadata, Error, Image, ImageContainer,
    ImageRole, PixelData, Result, TransferFunction,
};
use tracing::{debug, trace};

use super::{
    colour_property, declared_color_space, decoder_config, image_extents, image_from_samples,
    pixel_information,
};
use crate::codec::Codec;
use crate::coder::{Bitstream, DecodedSamples, SampleCoder};
use crate::exif;
use crate::isobmff::{
    peek_file_type, BoxStream, HeifBuilder, HeifFile, ItemSpec, Property,
};
use crate::registry::FormatId;

/// `auxC` type of the Apple gain map item.
pub const APPLE_GAINMAP_URN: &str = "urn:com:apple:photo:2020:aux:hdrgainmap";

const XMP_CONTENT_TYPE: &str = "application/rdf+xml";

/// Codec for Apple HDR gain map HEIC files.
#[derive(Clone)]
pub struct AppleHeic {
    coder: Arc<dyn SampleCoder>,
}

impl AppleHeic {
    /// Codec using `coder` for the HEVC items.
    pub fn new(coder: Arc<dyn SampleCoder>) -> Self {
        Self { coder }
    }

    fn decode_coded(&self, file: &HeifFile<'_>, id: u32) -> Result<DecodedSamples> {
        let item = file.item(id)?;
        if &item.item_type != b"hvc1" {
            return Err(Error::Format(format!(
                "item {} is '{}', expected hvc1",
                id,
                String::from_utf8_lossy(&item.item_type)
            )));
        }
        let config = decoder_config(file, id, b"hvcC")
            .ok_or_else(|| Error::Format(format!("item {} has no hvcC", id)))?;
        let samples = self
            .coder
            .decode(Bitstream::Hevc, Some(config), &file.item_data(id)?)?;
        if let Some((width, height)) = image_extents(file, id) {
            samples.expect_size(width, height)?;
        }
        Ok(samples)
    }

    /// Decode an `hvc1` item, or assemble a `grid` item from its tiles.
    fn decode_item(&self, file: &HeifFile<'_>, id: u32) -> Result<DecodedSamples> {
        if &file.item(id)?.item_type != b"grid" {
            return self.decode_coded(file, id);
        }
        let grid = ImageGrid::parse(&file.item_data(id)?)?;
        let tile_ids = file.references_from(b"dimg", id);
        if tile_ids.len() != grid.rows as usize * grid.columns as usize {
            return Err(Error::Format(format!(
                "grid {} is {}x{} but references {} tiles",
                id,
                grid.rows,
                grid.columns,
                tile_ids.len()
            )));
        }
        let tiles = tile_ids
            .iter()
            .map(|&tile| self.decode_coded(file, tile))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            rows = grid.rows,
            columns = grid.columns,
            width = grid.output_width,
            height = grid.output_height,
            "assembling grid"
        );
        grid.assemble(&tiles)
    }

    /// Headroom from the XMP item, falling back to the maker-note tags of
    /// the `Exif` item.
    fn read_headroom(&self, file: &HeifFile<'_>, targets: &[u32]) -> Result<AppleHeadroomMetadata> {
        let describes = |id: u32| {
            file.references_from(b"cdsc", id)
                .iter()
                .any(|target| targets.contains(target))
        };
        for item in &file.meta.items {
            if &item.item_type != b"mime"
                || item.content_type.as_deref() != Some(XMP_CONTENT_TYPE)
                || !describes(item.id)
            {
                continue;
            }
            let data = file.item_data(item.id)?;
            match AppleHeadroomMetadata::from_xmp(xmp::packet_str(&data)?) {
                Ok(meta) => return Ok(meta),
                Err(err) => trace!(item = item.id, %err, "XMP item carries no headroom"),
            }
        }
        for item in &file.meta.items {
            if &item.item_type != b"Exif" || !describes(item.id) {
                continue;
            }
            match exif::apple_hdr_tags(&file.item_data(item.id)?) {
                Ok((maker33, maker48)) => {
                    debug!(item = item.id, "headroom from Exif maker note");
                    return AppleHeadroomMetadata::from_maker_notes(maker33, maker48);
                }
                Err(err) => trace!(item = item.id, %err, "Exif item carries no Apple tags"),
            }
        }
        Err(Error::Metadata(
            "no XMP HDRGainMapHeadroom or Apple maker note".into(),
        ))
    }
}

impl std::fmt::Debug for AppleHeic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppleHeic").finish_non_exhaustive()
    }
}

impl Codec for AppleHeic {
    fn format(&self) -> FormatId {
        FormatId::AppleHeic
    }

    fn identify(&self, data: &[u8]) -> bool {
        peek_file_type(data).is_some_and(|ftyp| {
            matches!(&ftyp.major_brand, b"heic" | b"heix")
                || ftyp.compatible_brands.contains(b"heic")
        })
    }

    fn read(&self, data: &[u8]) -> Result<ImageContainer> {
        let file = HeifFile::parse(data)?;
        let primary = file.primary_item()?.id;
        let gain = file
            .referencing(b"auxl", primary)
            .into_iter()
            .find(|&id| {
                file.properties(id).any(
                    |p| matches!(p, Property::AuxiliaryType(urn) if urn == APPLE_GAINMAP_URN),
                )
            })
            .ok_or_else(|| Error::Format("no Apple gain map auxiliary item".into()))?;
        let metadata = self.read_headroom(&file, &[primary, gain])?;

        let color_space = declared_color_space(&file, primary)?.unwrap_or(ColorSpace::DISPLAY_P3);
        debug!(
            primary,
            gain,
            headroom = metadata.headroom,
            ?color_space,
            "located Apple HEIC items"
        );

        let baseline = image_from_samples(
            self.decode_item(&file, primary)?,
            color_space,
            ImageRole::Source,
        )?;
        let gainmap = image_from_samples(
            self.decode_item(&file, gain)?,
            color_space.with_transfer(TransferFunction::Bt709),
            ImageRole::Gainmap,
        )?;
        check_dimensions(&baseline, &gainmap)?;

        Ok(ImageContainer::new(
            vec![baseline, gainmap],
            ContainerMetadata::AppleHeadroom(metadata),
        ))
    }

    fn encode(&self, container: &ImageContainer) -> Result<Vec<u8>> {
        let ContainerMetadata::AppleHeadroom(metadata) = &container.metadata else {
            return Err(Error::Metadata(
                "Apple HEIC output needs Apple headroom metadata".into(),
            ));
        };
        let packet = metadata.to_xmp()?;
        let baseline = container.primary()?;
        let gainmap = container.gainmap()?;
        check_dimensions(baseline, gainmap)?;

        let mut builder = HeifBuilder::new(*b"heic", &[*b"mif1", *b"heic"]);
        let item = |image: &Image, extra: Vec<(Property, bool)>| -> Result<ItemSpec> {
            let encoded = self.coder.encode(Bitstream::Hevc, image)?;
            let config = encoded
                .decoder_config
                .ok_or_else(|| Error::Coding("HEVC encoder returned no hvcC".into()))?;
            let mut properties = vec![
                (
                    Property::DecoderConfig {
                        kind: *b"hvcC",
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
            properties.extend(extra);
            Ok(ItemSpec {
                item_type: *b"hvc1",
                name: String::new(),
                content_type: None,
                data: encoded.payload,
                properties,
            })
        };
        let primary_spec = item(baseline, vec![(colour_property(&baseline.color_space), false)])?;
        let gain_spec = item(
            gainmap,
            vec![(Property::AuxiliaryType(APPLE_GAINMAP_URN.into()), true)],
        )?;

        let primary = builder.add_item(primary_spec);
        let gain = builder.add_item(gain_spec);
        let xmp_item = builder.add_item(ItemSpec {
            item_type: *b"mime",
            name: "XMP".into(),
            content_type: Some(XMP_CONTENT_TYPE.into()),
            data: packet.into_bytes(),
            properties: Vec::new(),
        });
        builder.add_reference(*b"auxl", gain, vec![primary]);
        builder.add_reference(*b"cdsc", xmp_item, vec![primary]);
        builder.set_primary(primary);
        builder.build()
    }
}

/// ImageGrid descriptor of a `grid` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ImageGrid {
    pub rows: u16,
    pub columns: u16,
    pub output_width: u32,
    pub output_height: u32,
}

impl ImageGrid {
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut s = BoxStream::new(data);
        let version = s.u8()?;
        if version != 0 {
            return Err(Error::Format(format!(
                "ImageGrid version {} is not supported",
                version
            )));
        }
        let wide = s.u8()? & 1 != 0;
        let rows = s.u8()? as u16 + 1;
        let columns = s.u8()? as u16 + 1;
        let (output_width, output_height) = if wide {
            (s.u32()?, s.u32()?)
        } else {
            (s.u16()? as u32, s.u16()? as u32)
        };
        Ok(Self {
            rows,
            columns,
            output_width,
            output_height,
        })
    }

    /// Stitch row-major tiles and crop to the output size.
    fn assemble(&self, tiles: &[DecodedSamples]) -> Result<DecodedSamples> {
        validate_dimensions(self.output_width, self.output_height)?;
        let first = tiles
            .first()
            .ok_or_else(|| Error::Format("grid has no tiles".into()))?;
        let layout = TileLayout {
            grid: *self,
            tile_width: first.width as usize,
            tile_height: first.height as usize,
            channels: first.channels as usize,
        };
        let depth = first.pixels.bit_depth();
        if tiles.iter().any(|t| {
            t.width != first.width
                || t.height != first.height
                || t.channels != first.channels
                || t.pixels.bit_depth() != depth
        }) {
            return Err(Error::Format("grid tiles differ in shape".into()));
        }
        let covered_width = first
            .width
            .checked_mul(u32::from(self.columns))
            .ok_or_else(|| Error::LimitExceeded("grid width overflows u32".into()))?;
        let covered_height = first
            .height
            .checked_mul(u32::from(self.rows))
            .ok_or_else(|| Error::LimitExceeded("grid height overflows u32".into()))?;
        if covered_width < self.output_width || covered_height < self.output_height {
            return Err(Error::Format(format!(
                "{}x{} tiles of {}x{} cannot cover {}x{}",
                self.columns,
                self.rows,
                first.width,
                first.height,
                self.output_width,
                self.output_height
            )));
        }

        if let Some(tile) = tiles.iter().find(|t| {
            t.pixels.len() != t.width as usize * t.height as usize * t.channels as usize
        }) {
            return Err(Error::Coding(format!(
                "grid tile holds {} samples, expected {}x{}x{}",
                tile.pixels.len(),
                tile.width,
                tile.height,
                tile.channels
            )));
        }

        let pixels = match (&first.pixels, depth) {
            (PixelData::U8(_), _) => PixelData::U8(layout.stitch(tiles, u8_view)?),
            (PixelData::U16 { .. }, Some(bit_depth)) => PixelData::U16 {
                samples: layout.stitch(tiles, u16_view)?,
                bit_depth,
            },
            _ => PixelData::F32(layout.stitch(tiles, f32_view)?),
        };
        Ok(DecodedSamples {
            width: self.output_width,
            height: self.output_height,
            channels: first.channels,
            pixels,
        })
    }
}

struct TileLayout {
    grid: ImageGrid,
    tile_width: usize,
    tile_height: usize,
    channels: usize,
}

impl TileLayout {
    fn stitch<T: Copy + Default>(
        &self,
        tiles: &[DecodedSamples],
        view: fn(&PixelData) -> Option<&[T]>,
    ) -> Result<Vec<T>> {
        let width = self.grid.output_width as usize;
        let height = self.grid.output_height as usize;
        let ch = self.channels;
        let mut out = vec![T::default(); width * height * ch];
        for (index, tile) in tiles.iter().enumerate() {
            let samples = view(&tile.pixels)
                .ok_or_else(|| Error::Format("grid tiles differ in sample type".into()))?;
            let x0 = (index % self.grid.columns as usize) * self.tile_width;
            let y0 = (index / self.grid.columns as usize) * self.tile_height;
            if x0 >= width || y0 >= height {
                continue;
            }
            let copy_width = self.tile_width.min(width - x0) * ch;
            for y in 0..self.tile_height.min(height - y0) {
                let src = y * self.tile_width * ch;
                let dst = ((y0 + y) * width + x0) * ch;
                out[dst..dst + copy_width].copy_from_slice(&samples[src..src + copy_width]);
            }
        }
        Ok(out)
    }
}

fn u8_view(pixels: &PixelData) -> Option<&[u8]> {
    match pixels {
        PixelData::U8(v) => Some(v),
        _ => None,
    }
}

fn u16_view(pixels: &PixelData) -> Option<&[u16]> {
    match pixels {
        PixelData::U16 { samples, .. } => Some(samples),
        _ => None,
    }
}

fn f32_view(pixels: &PixelData) -> Option<&[f32]> {
    match pixels {
        PixelData::F32(v) => Some(v),
        _ => None,
    }
}
