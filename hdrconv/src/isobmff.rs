//! ISOBMFF (ISO/IEC 14496-12) box reading and writing for HEIF-style still
//! images: `ftyp`, `meta` with its item boxes, and `mdat`.

use hdrconv_core::{limits, ContentLightLevel, Error, Result};
use tracing::{debug, trace};

/// Four-character box or brand code.
pub type FourCc = [u8; 4];

fn printable(code: &FourCc) -> String {
    String::from_utf8_lossy(code).into_owned()
}

// ============================================================================
// Byte stream
// ============================================================================

/// Big-endian cursor over a box payload.
#[derive(Debug)]
pub struct BoxStream<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BoxStream<'a> {
    /// Cursor at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Take the next `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::BoxParse(format!(
                "need {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// Read a `u8`.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    /// Read a big-endian `u16`.
    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    /// Read a big-endian `u32`.
    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    /// Read a big-endian `u64`.
    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    /// Read an unsigned integer of 0, 4 or 8 bytes.
    pub fn uint(&mut self, size: u8) -> Result<u64> {
        match size {
            0 => Ok(0),
            4 => Ok(self.u32()? as u64),
            8 => self.u64(),
            other => Err(Error::BoxParse(format!("invalid field size {}", other))),
        }
    }

    /// Read a four-character code.
    pub fn fourcc(&mut self) -> Result<FourCc> {
        self.array()
    }

    /// Read the version and flags of a full box.
    pub fn version_and_flags(&mut self) -> Result<(u8, u32)> {
        let v = self.u32()?;
        Ok(((v >> 24) as u8, v & 0x00FF_FFFF))
    }

    /// Read a NUL-terminated UTF-8 string. A missing terminator ends the
    /// string at the end of the payload.
    pub fn cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|_| Error::BoxParse("string is not UTF-8".into()))?
            .to_owned();
        self.pos += (len + 1).min(rest.len());
        Ok(text)
    }
}

// ============================================================================
// Box headers
// ============================================================================

/// One box: its type and payload.
#[derive(Debug, Clone, Copy)]
pub struct RawBox<'a> {
    /// Box type.
    pub kind: FourCc,
    /// Payload after the header.
    pub payload: &'a [u8],
    /// Offset of the payload within the walked buffer.
    pub offset: usize,
}

/// Read one box header and slice out its payload.
pub fn read_box<'a>(stream: &mut BoxStream<'a>, top_level: bool) -> Result<RawBox<'a>> {
    let start = stream.position();
    let mut size = stream.u32()? as u64;
    let kind = stream.fourcc()?;
    if size == 1 {
        size = stream.u64()?;
    }
    if &kind == b"uuid" {
        stream.bytes(16)?;
    }
    let header = (stream.position() - start) as u64;
    let payload_len = if size == 0 {
        // Extends to the end of the file.
        if !top_level {
            return Err(Error::BoxParse(format!(
                "non-top-level box '{}' with size 0",
                printable(&kind)
            )));
        }
        stream.remaining()
    } else {
        if size < header {
            return Err(Error::BoxParse(format!(
                "box '{}' size {} smaller than its header",
                printable(&kind),
                size
            )));
        }
        usize::try_from(size - header)
            .map_err(|_| Error::BoxParse("box size overflows".into()))?
    };
    let offset = stream.position();
    let payload = stream.bytes(payload_len).map_err(|_| {
        Error::BoxParse(format!("box '{}' is truncated", printable(&kind)))
    })?;
    trace!(kind = %printable(&kind), len = payload_len, offset, "box");
    Ok(RawBox {
        kind,
        payload,
        offset,
    })
}

/// Every box in `data`, in order.
pub fn child_boxes(data: &[u8]) -> Result<Vec<RawBox<'_>>> {
    let mut stream = BoxStream::new(data);
    let mut boxes = Vec::new();
    while stream.remaining() > 0 {
        boxes.push(read_box(&mut stream, false)?);
    }
    Ok(boxes)
}

// ============================================================================
// Parsed structures
// ============================================================================

/// `ftyp` contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    /// Major brand.
    pub major_brand: FourCc,
    /// Minor version.
    pub minor_version: u32,
    /// Compatible brands.
    pub compatible_brands: Vec<FourCc>,
}

impl FileType {
    /// Whether `brand` is the major brand or a compatible one.
    pub fn has_brand(&self, brand: &FourCc) -> bool {
        &self.major_brand == brand || self.compatible_brands.contains(brand)
    }

    fn parse(payload: &[u8]) -> Result<Self> {
        let mut stream = BoxStream::new(payload);
        let major_brand = stream.fourcc()?;
        let minor_version = stream.u32()?;
        if stream.remaining() % 4 != 0 {
            return Err(Error::BoxParse("ftyp brand list is misaligned".into()));
        }
        let mut compatible_brands = Vec::with_capacity(stream.remaining() / 4);
        while stream.remaining() > 0 {
            compatible_brands.push(stream.fourcc()?);
        }
        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }
}

/// Read the leading `ftyp` box without touching the rest of the file.
pub fn peek_file_type(data: &[u8]) -> Option<FileType> {
    let mut stream = BoxStream::new(data);
    let first = read_box(&mut stream, true).ok()?;
    if &first.kind != b"ftyp" {
        return None;
    }
    FileType::parse(first.payload).ok()
}

/// `infe` contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    /// Item ID.
    pub id: u32,
    /// Item type, e.g. `hvc1`, `av01`, `grid`, `mime`.
    pub item_type: FourCc,
    /// Item name.
    pub name: String,
    /// MIME type of `mime` items.
    pub content_type: Option<String>,
}

/// One contiguous range of item data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// Offset from the item's base offset.
    pub offset: u64,
    /// Length in bytes; 0 means "to the end of the source".
    pub length: u64,
}

/// `iloc` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLocation {
    /// Item ID.
    pub id: u32,
    /// 0 = file offset, 1 = `idat` offset.
    pub construction_method: u8,
    /// Added to every extent offset.
    pub base_offset: u64,
    /// Data ranges, concatenated in order.
    pub extents: Vec<Extent>,
}

/// `iref` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReference {
    /// Reference type, e.g. `auxl`, `cdsc`, `dimg`.
    pub kind: FourCc,
    /// Referencing item.
    pub from: u32,
    /// Referenced items, in order.
    pub to: Vec<u32>,
}

/// `colr` contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColourInformation {
    /// CICP codes.
    Nclx {
        /// colour_primaries
        primaries: u16,
        /// transfer_characteristics
        transfer: u16,
        /// matrix_coefficients
        matrix: u16,
        /// full_range_flag
        full_range: bool,
    },
    /// Embedded ICC profile (`prof` or `rICC`).
    Icc(Vec<u8>),
}

/// Item property from `ipco`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Decoder configuration record (`hvcC`, `av1C`).
    DecoderConfig {
        /// Box type.
        kind: FourCc,
        /// Record body.
        data: Vec<u8>,
    },
    /// `ispe`
    ImageExtents {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// `pixi`: bits per channel.
    PixelInformation(Vec<u8>),
    /// `colr`
    Colour(ColourInformation),
    /// `auxC` type URN.
    AuxiliaryType(String),
    /// `clli`
    ContentLight(ContentLightLevel),
    /// A property this reader does not interpret.
    Unknown(FourCc),
}

impl Property {
    fn parse(raw: &RawBox<'_>) -> Result<Self> {
        let mut s = BoxStream::new(raw.payload);
        let property = match &raw.kind {
            b"hvcC" | b"av1C" => Property::DecoderConfig {
                kind: raw.kind,
                data: raw.payload.to_vec(),
            },
            b"ispe" => {
                s.version_and_flags()?;
                Property::ImageExtents {
                    width: s.u32()?,
                    height: s.u32()?,
                }
            }
            b"pixi" => {
                s.version_and_flags()?;
                let channels = s.u8()? as usize;
                Property::PixelInformation(s.bytes(channels)?.to_vec())
            }
            b"colr" => {
                let colour_type = s.fourcc()?;
                match &colour_type {
                    b"nclx" => Property::Colour(ColourInformation::Nclx {
                        primaries: s.u16()?,
                        transfer: s.u16()?,
                        matrix: s.u16()?,
                        full_range: s.u8()? & 0x80 != 0,
                    }),
                    b"prof" | b"rICC" => {
                        Property::Colour(ColourInformation::Icc(s.rest().to_vec()))
                    }
                    _ => Property::Unknown(raw.kind),
                }
            }
            b"auxC" => {
                s.version_and_flags()?;
                Property::AuxiliaryType(s.cstring()?)
            }
            b"clli" => Property::ContentLight(ContentLightLevel {
                max_cll: s.u16()?,
                max_fall: s.u16()?,
            }),
            _ => Property::Unknown(raw.kind),
        };
        Ok(property)
    }
}

/// `ipma` entry: 1-based property indices and their essential flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyAssociation {
    /// Item ID.
    pub item_id: u32,
    /// `(index, essential)` pairs; index 0 means "no property".
    pub properties: Vec<(u16, bool)>,
}

/// Parsed `meta` box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaBox {
    /// `hdlr` handler type.
    pub handler: Option<FourCc>,
    /// `pitm` item ID.
    pub primary_item: Option<u32>,
    /// `iinf` entries.
    pub items: Vec<ItemInfo>,
    /// `iloc` entries.
    pub locations: Vec<ItemLocation>,
    /// `iref` entries.
    pub references: Vec<ItemReference>,
    /// `ipco` properties, in declaration order.
    pub properties: Vec<Property>,
    /// `ipma` entries.
    pub associations: Vec<PropertyAssociation>,
    /// `idat` payload.
    pub idat: Vec<u8>,
}

fn check_count(count: usize, what: &str) -> Result<()> {
    check_limit(count, limits::MAX_ITEM_COUNT, what)
}

fn check_limit(count: usize, max: usize, what: &str) -> Result<()> {
    if count > max {
        return Err(Error::LimitExceeded(format!(
            "{} {} entries exceed maximum {}",
            count, what, max
        )));
    }
    Ok(())
}

fn parse_hdlr(payload: &[u8]) -> Result<FourCc> {
    let mut s = BoxStream::new(payload);
    s.version_and_flags()?;
    s.u32()?; // pre_defined
    s.fourcc()
}

fn parse_pitm(payload: &[u8]) -> Result<u32> {
    let mut s = BoxStream::new(payload);
    let (version, _) = s.version_and_flags()?;
    read_item_id(&mut s, version)
}

fn parse_infe(payload: &[u8]) -> Result<ItemInfo> {
    let mut s = BoxStream::new(payload);
    let (version, _) = s.version_and_flags()?;
    let id = match version {
        2 => s.u16()? as u32,
        3 => s.u32()?,
        other => {
            return Err(Error::BoxParse(format!(
                "infe version {} is not supported",
                other
            )))
        }
    };
    s.u16()?; // protection index
    let item_type = s.fourcc()?;
    let name = s.cstring()?;
    let content_type = if &item_type == b"mime" {
        Some(s.cstring()?)
    } else {
        None
    };
    Ok(ItemInfo {
        id,
        item_type,
        name,
        content_type,
    })
}

fn parse_iinf(payload: &[u8]) -> Result<Vec<ItemInfo>> {
    let mut s = BoxStream::new(payload);
    let (version, _) = s.version_and_flags()?;
    let count = if version == 0 {
        s.u16()? as usize
    } else {
        s.u32()? as usize
    };
    check_count(count, "iinf")?;
    let entries = child_boxes(s.rest())?;
    if entries.len() != count {
        return Err(Error::BoxParse(format!(
            "iinf announces {} entries, contains {}",
            count,
            entries.len()
        )));
    }
    entries
        .iter()
        .map(|b| {
            if &b.kind != b"infe" {
                return Err(Error::BoxParse(format!(
                    "unexpected '{}' in iinf",
                    printable(&b.kind)
                )));
            }
            parse_infe(b.payload)
        })
        .collect()
}

fn parse_iloc(payload: &[u8]) -> Result<Vec<ItemLocation>> {
    let mut s = BoxStream::new(payload);
    let (version, _) = s.version_and_flags()?;
    if version > 2 {
        return Err(Error::BoxParse(format!(
            "iloc version {} is not supported",
            version
        )));
    }
    let sizes = s.u16()?;
    let offset_size = (sizes >> 12) as u8;
    let length_size = ((sizes >> 8) & 0xF) as u8;
    let base_offset_size = ((sizes >> 4) & 0xF) as u8;
    let index_size = if version >= 1 { (sizes & 0xF) as u8 } else { 0 };

    let count = if version < 2 {
        s.u16()? as usize
    } else {
        s.u32()? as usize
    };
    check_count(count, "iloc")?;

    let mut locations = Vec::with_capacity(count);
    for _ in 0..count {
        let id = if version < 2 {
            s.u16()? as u32
        } else {
            s.u32()?
        };
        let construction_method = if version >= 1 {
            (s.u16()? & 0xF) as u8
        } else {
            0
        };
        if construction_method > 1 {
            return Err(Error::BoxParse(format!(
                "item {} uses unsupported construction method {}",
                id, construction_method
            )));
        }
        s.u16()?; // data_reference_index
        let base_offset = s.uint(base_offset_size)?;
        let extent_count = s.u16()? as usize;
        check_limit(extent_count, limits::MAX_EXTENT_COUNT, "iloc extent")?;
        if extent_count > 1 && (offset_size == 0 || length_size == 0) {
            return Err(Error::BoxParse(format!(
                "item {} has {} extents without offset or length fields",
                id, extent_count
            )));
        }
        let mut extents = Vec::with_capacity(extent_count);
        for _ in 0..extent_count {
            s.uint(index_size)?;
            extents.push(Extent {
                offset: s.uint(offset_size)?,
                length: s.uint(length_size)?,
            });
        }
        locations.push(ItemLocation {
            id,
            construction_method,
            base_offset,
            extents,
        });
    }
    Ok(locations)
}

/// 16-bit item ID in version 0 boxes, 32-bit otherwise.
fn read_item_id(s: &mut BoxStream<'_>, version: u8) -> Result<u32> {
    if version == 0 {
        Ok(s.u16()? as u32)
    } else {
        s.u32()
    }
}

fn parse_iref(payload: &[u8]) -> Result<Vec<ItemReference>> {
    let mut s = BoxStream::new(payload);
    let (version, _) = s.version_and_flags()?;
    let mut references = Vec::new();
    for raw in child_boxes(s.rest())? {
        let mut r = BoxStream::new(raw.payload);
        let from = read_item_id(&mut r, version)?;
        let count = r.u16()? as usize;
        let mut to = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            to.push(read_item_id(&mut r, version)?);
        }
        references.push(ItemReference {
            kind: raw.kind,
            from,
            to,
        });
    }
    check_count(references.len(), "iref")?;
    Ok(references)
}

fn parse_ipma(payload: &[u8]) -> Result<Vec<PropertyAssociation>> {
    let mut s = BoxStream::new(payload);
    let (version, flags) = s.version_and_flags()?;
    let count = s.u32()? as usize;
    check_count(count, "ipma")?;
    let mut associations = Vec::with_capacity(count);
    for _ in 0..count {
        let item_id = if version < 1 {
            s.u16()? as u32
        } else {
            s.u32()?
        };
        let n = s.u8()? as usize;
        let mut properties = Vec::with_capacity(n);
        for _ in 0..n {
            properties.push(if flags & 1 != 0 {
                let v = s.u16()?;
                (v & 0x7FFF, v & 0x8000 != 0)
            } else {
                let v = s.u8()?;
                ((v & 0x7F) as u16, v & 0x80 != 0)
            });
        }
        associations.push(PropertyAssociation {
            item_id,
            properties,
        });
    }
    Ok(associations)
}

fn parse_meta(payload: &[u8]) -> Result<MetaBox> {
    let mut s = BoxStream::new(payload);
    s.version_and_flags()?;
    let mut meta = MetaBox::default();
    for raw in child_boxes(s.rest())? {
        match &raw.kind {
            b"hdlr" => meta.handler = Some(parse_hdlr(raw.payload)?),
            b"pitm" => meta.primary_item = Some(parse_pitm(raw.payload)?),
            b"iinf" => meta.items = parse_iinf(raw.payload)?,
            b"iloc" => meta.locations = parse_iloc(raw.payload)?,
            b"iref" => meta.references = parse_iref(raw.payload)?,
            b"idat" => meta.idat = raw.payload.to_vec(),
            b"iprp" => {
                for child in child_boxes(raw.payload)? {
                    match &child.kind {
                        b"ipco" => {
                            meta.properties = child_boxes(child.payload)?
                                .iter()
                                .map(Property::parse)
                                .collect::<Result<_>>()?;
                            check_count(meta.properties.len(), "ipco")?;
                        }
                        b"ipma" => meta.associations.extend(parse_ipma(child.payload)?),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    Ok(meta)
}

/// A parsed HEIF-style file borrowing the original bytes.
#[derive(Debug)]
pub struct HeifFile<'a> {
    /// `ftyp`
    pub file_type: FileType,
    /// `meta`
    pub meta: MetaBox,
    data: &'a [u8],
}

impl<'a> HeifFile<'a> {
    /// Walk the top-level boxes and parse `ftyp` and `meta`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut stream = BoxStream::new(data);
        let mut file_type = None;
        let mut meta = None;
        let mut first = true;
        while stream.remaining() > 0 {
            let raw = read_box(&mut stream, true)?;
            match &raw.kind {
                b"ftyp" => file_type = Some(FileType::parse(raw.payload)?),
                _ if first => {
                    return Err(Error::Format("file does not start with ftyp".into()));
                }
                b"meta" => {
                    if meta.is_some() {
                        return Err(Error::BoxParse("more than one meta box".into()));
                    }
                    meta = Some(parse_meta(raw.payload)?);
                }
                _ => {}
            }
            first = false;
        }
        let file_type = file_type.ok_or_else(|| Error::Format("missing ftyp".into()))?;
        let meta = meta.ok_or_else(|| Error::Format("missing meta box".into()))?;
        if meta.handler != Some(*b"pict") {
            return Err(Error::Format("meta handler is not 'pict'".into()));
        }
        debug!(
            brand = %printable(&file_type.major_brand),
            items = meta.items.len(),
            properties = meta.properties.len(),
            "parsed ISOBMFF structure"
        );
        Ok(Self {
            file_type,
            meta,
            data,
        })
    }

    /// The `pitm` item.
    pub fn primary_item(&self) -> Result<&ItemInfo> {
        let id = self
            .meta
            .primary_item
            .ok_or_else(|| Error::Format("missing pitm".into()))?;
        self.item(id)
    }

    /// Item info by ID.
    pub fn item(&self, id: u32) -> Result<&ItemInfo> {
        self.meta
            .items
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| Error::Format(format!("item {} is not declared", id)))
    }

    /// Concatenated extents of an item.
    pub fn item_data(&self, id: u32) -> Result<Vec<u8>> {
        let location = self
            .meta
            .locations
            .iter()
            .find(|l| l.id == id)
            .ok_or_else(|| Error::Format(format!("item {} has no location", id)))?;
        let source: &[u8] = if location.construction_method == 1 {
            &self.meta.idat
        } else {
            self.data
        };
        let mut out = Vec::new();
        for extent in &location.extents {
            let start = location
                .base_offset
                .checked_add(extent.offset)
                .and_then(|v| usize::try_from(v).ok())
                .filter(|&v| v <= source.len())
                .ok_or_else(|| Error::BoxParse(format!("item {} extent out of range", id)))?;
            let end = if extent.length == 0 {
                source.len()
            } else {
                usize::try_from(extent.length)
                    .ok()
                    .and_then(|len| start.checked_add(len))
                    .filter(|&end| end <= source.len())
                    .ok_or_else(|| {
                        Error::BoxParse(format!("item {} extent out of range", id))
                    })?
            };
            if out.len() + (end - start) > source.len() {
                return Err(Error::LimitExceeded(format!(
                    "item {} extents exceed the {} byte source",
                    id,
                    source.len()
                )));
            }
            out.extend_from_slice(&source[start..end]);
        }
        Ok(out)
    }

    /// Properties associated with an item.
    pub fn properties(&self, id: u32) -> impl Iterator<Item = &Property> + '_ {
        self.meta
            .associations
            .iter()
            .filter(move |a| a.item_id == id)
            .flat_map(|a| a.properties.iter())
            .filter_map(|&(index, _)| {
                index
                    .checked_sub(1)
                    .and_then(|i| self.meta.properties.get(i as usize))
            })
    }

    /// Items referenced from `from` with reference type `kind`.
    pub fn references_from(&self, kind: &FourCc, from: u32) -> Vec<u32> {
        self.meta
            .references
            .iter()
            .filter(|r| &r.kind == kind && r.from == from)
            .flat_map(|r| r.to.iter().copied())
            .collect()
    }

    /// Items holding a `kind` reference to `to`.
    pub fn referencing(&self, kind: &FourCc, to: u32) -> Vec<u32> {
        self.meta
            .references
            .iter()
            .filter(|r| &r.kind == kind && r.to.contains(&to))
            .map(|r| r.from)
            .collect()
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Builds nested boxes, patching each size when the box is closed.
#[derive(Debug, Default)]
pub struct BoxWriter {
    buf: Vec<u8>,
    open: Vec<usize>,
}

impl BoxWriter {
    /// Empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a box.
    pub fn start(&mut self, kind: &FourCc) {
        self.open.push(self.buf.len());
        self.buf.extend_from_slice(&[0u8; 4]);
        self.buf.extend_from_slice(kind);
    }

    /// Open a full box.
    pub fn start_full(&mut self, kind: &FourCc, version: u8, flags: u32) {
        self.start(kind);
        self.u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
    }

    /// Close the innermost open box.
    pub fn finish(&mut self) -> Result<()> {
        let start = self
            .open
            .pop()
            .ok_or_else(|| Error::Format("no open box to finish".into()))?;
        let size = u32::try_from(self.buf.len() - start)
            .map_err(|_| Error::LimitExceeded("box larger than 4 GiB".into()))?;
        self.buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
        Ok(())
    }

    /// Write a `u8`.
    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a big-endian `u16`.
    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a big-endian `u32`.
    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write raw bytes.
    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Write a NUL-terminated string.
    pub fn cstring(&mut self, v: &str) {
        self.buf.extend_from_slice(v.as_bytes());
        self.buf.push(0);
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The finished buffer. Fails if a box is still open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(Error::Format(format!(
                "{} boxes left open",
                self.open.len()
            )));
        }
        Ok(self.buf)
    }

    fn property(&mut self, property: &Property) -> Result<()> {
        match property {
            Property::DecoderConfig { kind, data } => {
                self.start(kind);
                self.bytes(data);
            }
            Property::ImageExtents { width, height } => {
                self.start_full(b"ispe", 0, 0);
                self.u32(*width);
                self.u32(*height);
            }
            Property::PixelInformation(bits) => {
                self.start_full(b"pixi", 0, 0);
                self.u8(bits.len() as u8);
                self.bytes(bits);
            }
            Property::Colour(ColourInformation::Nclx {
                primaries,
                transfer,
                matrix,
                full_range,
            }) => {
                self.start(b"colr");
                self.bytes(b"nclx");
                self.u16(*primaries);
                self.u16(*transfer);
                self.u16(*matrix);
                self.u8(if *full_range { 0x80 } else { 0 });
            }
            Property::Colour(ColourInformation::Icc(profile)) => {
                self.start(b"colr");
                self.bytes(b"prof");
                self.bytes(profile);
            }
            Property::AuxiliaryType(urn) => {
                self.start_full(b"auxC", 0, 0);
                self.cstring(urn);
            }
            Property::ContentLight(cll) => {
                self.start(b"clli");
                self.u16(cll.max_cll);
                self.u16(cll.max_fall);
            }
            Property::Unknown(kind) => {
                return Err(Error::Format(format!(
                    "cannot write unknown property '{}'",
                    printable(kind)
                )))
            }
        }
        self.finish()
    }
}

/// An item to store in a HEIF-style file.
#[derive(Debug, Clone)]
pub struct ItemSpec {
    /// Item type.
    pub item_type: FourCc,
    /// Item name.
    pub name: String,
    /// MIME type, for `mime` items.
    pub content_type: Option<String>,
    /// Item payload, stored in `mdat`.
    pub data: Vec<u8>,
    /// Properties with their essential flag.
    pub properties: Vec<(Property, bool)>,
}

/// Assembles `ftyp`, `meta` and `mdat` for a set of items.
#[derive(Debug, Clone)]
pub struct HeifBuilder {
    file_type: FileType,
    items: Vec<ItemSpec>,
    references: Vec<ItemReference>,
    primary: u32,
}

impl HeifBuilder {
    /// Builder for a file with the given brands.
    pub fn new(major_brand: FourCc, compatible_brands: &[FourCc]) -> Self {
        Self {
            file_type: FileType {
                major_brand,
                minor_version: 0,
                compatible_brands: compatible_brands.to_vec(),
            },
            items: Vec::new(),
            references: Vec::new(),
            primary: 1,
        }
    }

    /// Add an item and return its ID.
    pub fn add_item(&mut self, item: ItemSpec) -> u32 {
        self.items.push(item);
        self.items.len() as u32
    }

    /// Add a `kind` reference from one item to others.
    pub fn add_reference(&mut self, kind: FourCc, from: u32, to: Vec<u32>) {
        self.references.push(ItemReference { kind, from, to });
    }

    /// Set the `pitm` item.
    pub fn set_primary(&mut self, id: u32) {
        self.primary = id;
    }

    /// Serialize. `iloc` offsets point into the trailing `mdat`.
    pub fn build(&self) -> Result<Vec<u8>> {
        if self.items.is_empty() || self.items.len() > u16::MAX as usize {
            return Err(Error::Format(format!(
                "cannot write {} items",
                self.items.len()
            )));
        }
        let mut ftyp = BoxWriter::new();
        ftyp.start(b"ftyp");
        ftyp.bytes(&self.file_type.major_brand);
        ftyp.u32(self.file_type.minor_version);
        for brand in &self.file_type.compatible_brands {
            ftyp.bytes(brand);
        }
        ftyp.finish()?;
        let ftyp = ftyp.into_bytes()?;

        // Offsets are fixed width, so the meta length does not depend on
        // their values.
        let sizing = self.meta(0)?;
        let data_start = ftyp.len() + sizing.len() + 8;
        let meta = self.meta(data_start)?;

        let mdat_len: usize = self.items.iter().map(|i| i.data.len()).sum();
        let mdat_size = u32::try_from(mdat_len + 8)
            .ok()
            .filter(|_| data_start + mdat_len <= u32::MAX as usize)
            .ok_or_else(|| Error::LimitExceeded("item data larger than 4 GiB".into()))?;

        let mut out = Vec::with_capacity(data_start + mdat_len);
        out.extend_from_slice(&ftyp);
        out.extend_from_slice(&meta);
        out.extend_from_slice(&mdat_size.to_be_bytes());
        out.extend_from_slice(b"mdat");
        for item in &self.items {
            out.extend_from_slice(&item.data);
        }
        debug!(
            items = self.items.len(),
            bytes = out.len(),
            "assembled ISOBMFF file"
        );
        Ok(out)
    }

    fn meta(&self, data_start: usize) -> Result<Vec<u8>> {
        let mut w = BoxWriter::new();
        w.start_full(b"meta", 0, 0);

        w.start_full(b"hdlr", 0, 0);
        w.u32(0);
        w.bytes(b"pict");
        w.bytes(&[0u8; 12]);
        w.cstring("");
        w.finish()?;

        w.start_full(b"pitm", 0, 0);
        w.u16(self.primary as u16);
        w.finish()?;

        w.start_full(b"iinf", 0, 0);
        w.u16(self.items.len() as u16);
        for (i, item) in self.items.iter().enumerate() {
            w.start_full(b"infe", 2, 0);
            w.u16(i as u16 + 1);
            w.u16(0);
            w.bytes(&item.item_type);
            w.cstring(&item.name);
            if let Some(content_type) = &item.content_type {
                w.cstring(content_type);
            }
            w.finish()?;
        }
        w.finish()?;

        if !self.references.is_empty() {
            w.start_full(b"iref", 0, 0);
            for r in &self.references {
                w.start(&r.kind);
                w.u16(r.from as u16);
                w.u16(r.to.len() as u16);
                for &to in &r.to {
                    w.u16(to as u16);
                }
                w.finish()?;
            }
            w.finish()?;
        }

        w.start(b"iprp");
        w.start(b"ipco");
        let mut associations = Vec::with_capacity(self.items.len());
        let mut index = 0u16;
        for item in &self.items {
            let mut assoc = Vec::with_capacity(item.properties.len());
            for (property, essential) in &item.properties {
                w.property(property)?;
                index += 1;
                assoc.push((index, *essential));
            }
            associations.push(assoc);
        }
        w.finish()?;
        if index > 0x7F {
            return Err(Error::LimitExceeded(format!(
                "{} properties exceed the compact ipma form",
                index
            )));
        }
        w.start_full(b"ipma", 0, 0);
        let listed: Vec<_> = associations
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.is_empty())
            .collect();
        w.u32(listed.len() as u32);
        for (i, assoc) in listed {
            w.u16(i as u16 + 1);
            w.u8(assoc.len() as u8);
            for &(index, essential) in assoc {
                w.u8(index as u8 | if essential { 0x80 } else { 0 });
            }
        }
        w.finish()?;
        w.finish()?;

        w.start_full(b"iloc", 0, 0);
        // offset_size 4, length_size 4, base_offset_size 0
        w.u16(0x4400);
        w.u16(self.items.len() as u16);
        let mut offset = data_start;
        for (i, item) in self.items.iter().enumerate() {
            w.u16(i as u16 + 1);
            w.u16(0);
            w.u16(1);
            w.u32(offset as u32);
            w.u32(item.data.len() as u32);
            offset += item.data.len();
        }
        w.finish()?;

        w.finish()?;
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> Vec<u8> {
        let mut builder = HeifBuilder::new(*b"heic", &[*b"mif1", *b"heic"]);
        let primary = builder.add_item(ItemSpec {
            item_type: *b"hvc1",
            name: String::new(),
            content_type: None,
            data: vec![1, 2, 3, 4],
            properties: vec![
                (
                    Property::DecoderConfig {
                        kind: *b"hvcC",
                        data: vec![9, 9],
                    },
                    true,
                ),
                (
                    Property::ImageExtents {
                        width: 8,
                        height: 6,
                    },
                    false,
                ),
                (
                    Property::Colour(ColourInformation::Nclx {
                        primaries: 12,
                        transfer: 13,
                        matrix: 0,
                        full_range: true,
                    }),
                    false,
                ),
            ],
        });
        let aux = builder.add_item(ItemSpec {
            item_type: *b"hvc1",
            name: String::new(),
            content_type: None,
            data: vec![5, 6],
            properties: vec![(
                Property::AuxiliaryType("urn:test:aux".into()),
                true,
            )],
        });
        let xmp = builder.add_item(ItemSpec {
            item_type: *b"mime",
            name: "XMP".into(),
            content_type: Some("application/rdf+xml".into()),
            data: b"<x/>".to_vec(),
            properties: Vec::new(),
        });
        builder.add_reference(*b"auxl", aux, vec![primary]);
        builder.add_reference(*b"cdsc", xmp, vec![primary]);
        builder.set_primary(primary);
        builder.build().unwrap()
    }

    #[test]
    fn test_build_and_parse() {
        let bytes = sample_file();
        let file = HeifFile::parse(&bytes).unwrap();
        assert!(file.file_type.has_brand(b"heic"));
        assert_eq!(file.primary_item().unwrap().id, 1);
        assert_eq!(file.item_data(1).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(file.item_data(2).unwrap(), vec![5, 6]);
        assert_eq!(file.item_data(3).unwrap(), b"<x/>");
        assert_eq!(
            file.item(3).unwrap().content_type.as_deref(),
            Some("application/rdf+xml")
        );

        let props: Vec<_> = file.properties(1).collect();
        assert_eq!(props.len(), 3);
        assert!(props.contains(&&Property::ImageExtents {
            width: 8,
            height: 6
        }));
        assert_eq!(
            file.properties(2).next(),
            Some(&Property::AuxiliaryType("urn:test:aux".into()))
        );
        assert_eq!(file.referencing(b"auxl", 1), vec![2]);
        assert_eq!(file.references_from(b"cdsc", 3), vec![1]);
    }

    #[test]
    fn test_peek_file_type() {
        let bytes = sample_file();
        let ftyp = peek_file_type(&bytes).unwrap();
        assert_eq!(&ftyp.major_brand, b"heic");
        assert!(peek_file_type(b"\xFF\xD8\xFF\xE0").is_none());
    }

    #[test]
    fn test_truncated_file() {
        let bytes = sample_file();
        let err = HeifFile::parse(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, Error::BoxParse(_)));
    }

    #[test]
    fn test_child_box_cannot_have_size_zero() {
        let data = [0, 0, 0, 0, b'f', b'r', b'e', b'e'];
        let err = child_boxes(&data).unwrap_err();
        assert!(matches!(err, Error::BoxParse(_)));
    }

    #[test]
    fn test_iloc_version1_idat() {
        let mut w = BoxWriter::new();
        w.start_full(b"iloc", 1, 0);
        w.u16(0x4440); // offset 4, length 4, base 4, index 0
        w.u16(1);
        w.u16(7); // item id
        w.u16(1); // construction method: idat
        w.u16(0);
        w.u32(2); // base offset
        w.u16(1);
        w.u32(1);
        w.u32(3);
        w.finish().unwrap();
        let bytes = w.into_bytes().unwrap();
        let raw = child_boxes(&bytes).unwrap();
        let locations = parse_iloc(raw[0].payload).unwrap();
        assert_eq!(
            locations,
            vec![ItemLocation {
                id: 7,
                construction_method: 1,
                base_offset: 2,
                extents: vec![Extent {
                    offset: 1,
                    length: 3
                }],
            }]
        );
    }

    fn zero_width_iloc(extent_count: u16) -> Vec<u8> {
        let mut w = BoxWriter::new();
        w.start_full(b"iloc", 0, 0);
        w.u16(0x0000); // every field size 0
        w.u16(1);
        w.u16(1);
        w.u16(0);
        w.u16(extent_count);
        w.finish().unwrap();
        w.into_bytes().unwrap()
    }

    #[test]
    fn test_iloc_extent_count_is_bounded() {
        let bytes = zero_width_iloc(u16::MAX);
        let raw = child_boxes(&bytes).unwrap();
        let err = parse_iloc(raw[0].payload).unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)), "{:?}", err);

        let bytes = zero_width_iloc(2);
        let raw = child_boxes(&bytes).unwrap();
        let err = parse_iloc(raw[0].payload).unwrap_err();
        assert!(matches!(err, Error::BoxParse(_)), "{:?}", err);

        // A single extent may still mean "the whole source".
        let bytes = zero_width_iloc(1);
        let raw = child_boxes(&bytes).unwrap();
        assert_eq!(parse_iloc(raw[0].payload).unwrap()[0].extents.len(), 1);
    }

    #[test]
    fn test_item_data_is_capped_by_source() {
        let bytes = sample_file();
        let mut file = HeifFile::parse(&bytes).unwrap();
        let location = file
            .meta
            .locations
            .iter_mut()
            .find(|l| l.id == 1)
            .unwrap();
        location.base_offset = 0;
        location.extents = vec![
            Extent {
                offset: 0,
                length: 0,
            };
            3
        ];
        let err = file.item_data(1).unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)), "{:?}", err);
    }

    #[test]
    fn test_unbalanced_writer() {
        let mut w = BoxWriter::new();
        w.start(b"free");
        assert!(w.into_bytes().is_err());
        assert!(BoxWriter::new().finish().is_err());
    }
}
