//! Apple HEIC structure: item layout, grid primaries, and missing parts.

mod common;

use common::{coder, flat, registry};
use hdrconv::exif::{APPLE_MAKER_NOTE_SIGNATURE, TAG_HDR_GAIN, TAG_HDR_HEADROOM};
use hdrconv::formats::APPLE_GAINMAP_URN;
use hdrconv::isobmff::{ColourInformation, HeifBuilder, HeifFile, ItemSpec, Property};
use hdrconv::jpeg::icc;
use hdrconv::{
    AppleHeadroomMetadata, Bitstream, ColorSpace, ContainerMetadata, ErrorKind, FormatId,
    GenerateOptions, Image, ImageRole, PixelData, SampleCoder,
};

fn hevc_item(image: &Image, extra: Vec<(Property, bool)>) -> ItemSpec {
    let encoded = coder().encode(Bitstream::Hevc, image).unwrap();
    let mut properties = vec![
        (
            Property::DecoderConfig {
                kind: *b"hvcC",
                data: encoded.decoder_config.unwrap(),
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
    properties.extend(extra);
    ItemSpec {
        item_type: *b"hvc1",
        name: String::new(),
        content_type: None,
        data: encoded.payload,
        properties,
    }
}

fn rgb(width: u32, height: u32, value: u8) -> Image {
    Image::new(
        width,
        height,
        3,
        PixelData::U8(vec![value; (width * height * 3) as usize]),
        ColorSpace::DISPLAY_P3,
        ImageRole::Source,
    )
    .unwrap()
}

fn gray(width: u32, height: u32, value: u8) -> Image {
    Image::new(
        width,
        height,
        1,
        PixelData::U8(vec![value; (width * height) as usize]),
        ColorSpace::DISPLAY_P3,
        ImageRole::Gainmap,
    )
    .unwrap()
}

fn xmp_item(headroom: f32) -> ItemSpec {
    ItemSpec {
        item_type: *b"mime",
        name: "XMP".into(),
        content_type: Some("application/rdf+xml".into()),
        data: AppleHeadroomMetadata::new(headroom)
            .unwrap()
            .to_xmp()
            .unwrap()
            .into_bytes(),
        properties: Vec::new(),
    }
}

/// Big-endian Exif item whose Apple maker note carries tags 33 and 48 as
/// rationals.
fn exif_item(headroom: (u32, u32), gain: (u32, u32)) -> ItemSpec {
    let field = |out: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: u32| {
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&kind.to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    };

    let mut note = APPLE_MAKER_NOTE_SIGNATURE.to_vec();
    note.extend_from_slice(&[0, 1, b'M', b'M']);
    note.extend_from_slice(&2u16.to_be_bytes());
    field(&mut note, TAG_HDR_HEADROOM, 5, 1, 44);
    field(&mut note, TAG_HDR_GAIN, 5, 1, 52);
    note.extend_from_slice(&0u32.to_be_bytes());
    for v in [headroom.0, headroom.1, gain.0, gain.1] {
        note.extend_from_slice(&v.to_be_bytes());
    }

    // Header, IFD0 at 8 pointing at the Exif IFD at 26, maker note at 44.
    let mut tiff = b"MM\0\x2A".to_vec();
    tiff.extend_from_slice(&8u32.to_be_bytes());
    tiff.extend_from_slice(&1u16.to_be_bytes());
    field(&mut tiff, 0x8769, 4, 1, 26);
    tiff.extend_from_slice(&0u32.to_be_bytes());
    tiff.extend_from_slice(&1u16.to_be_bytes());
    field(&mut tiff, 0x927C, 7, note.len() as u32, 44);
    tiff.extend_from_slice(&0u32.to_be_bytes());
    tiff.extend_from_slice(&note);

    let mut data = 6u32.to_be_bytes().to_vec();
    data.extend_from_slice(b"Exif\0\0");
    data.extend_from_slice(&tiff);
    ItemSpec {
        item_type: *b"Exif",
        name: String::new(),
        content_type: None,
        data,
        properties: Vec::new(),
    }
}

/// 2x2 grid of 2x2 tiles cropped to 4x3, with the colour given as an ICC
/// profile and the XMP attached to the gain map item.
fn grid_file() -> Vec<u8> {
    let mut builder = HeifBuilder::new(*b"heic", &[*b"mif1", *b"heic"]);
    let tiles: Vec<u32> = [10u8, 20, 30, 40]
        .iter()
        .map(|&v| builder.add_item(hevc_item(&rgb(2, 2, v), Vec::new())))
        .collect();
    let grid = builder.add_item(ItemSpec {
        item_type: *b"grid",
        name: String::new(),
        content_type: None,
        data: vec![0, 0, 1, 1, 0, 4, 0, 3],
        properties: vec![
            (
                Property::ImageExtents {
                    width: 4,
                    height: 3,
                },
                false,
            ),
            (
                Property::Colour(ColourInformation::Icc(icc::profile_for(
                    &ColorSpace::DISPLAY_P3,
                ))),
                false,
            ),
        ],
    });
    let gain = builder.add_item(hevc_item(
        &gray(4, 3, 255),
        vec![(Property::AuxiliaryType(APPLE_GAINMAP_URN.into()), true)],
    ));
    let xmp = builder.add_item(xmp_item(2.0));
    builder.add_reference(*b"dimg", grid, tiles);
    builder.add_reference(*b"auxl", gain, vec![grid]);
    builder.add_reference(*b"cdsc", xmp, vec![gain]);
    builder.set_primary(grid);
    builder.build().unwrap()
}

#[test]
fn test_written_item_layout() {
    let registry = registry();
    let handlers = registry.lookup(FormatId::AppleHeic).unwrap();
    let container = handlers
        .generator
        .generate(&flat(4, 4, [2.0; 3]), &GenerateOptions::default())
        .unwrap();
    let bytes = handlers.codec.encode(&container).unwrap();

    let file = HeifFile::parse(&bytes).unwrap();
    assert_eq!(&file.file_type.major_brand, b"heic");
    assert_eq!(file.file_type.compatible_brands, vec![*b"mif1", *b"heic"]);
    let primary = file.primary_item().unwrap().id;
    let gain = file.referencing(b"auxl", primary);
    assert_eq!(gain.len(), 1);
    assert!(file
        .properties(gain[0])
        .any(|p| *p == Property::AuxiliaryType(APPLE_GAINMAP_URN.into())));
    assert!(file.properties(primary).any(|p| matches!(
        p,
        Property::Colour(ColourInformation::Nclx {
            primaries: 12,
            transfer: 13,
            ..
        })
    )));

    let xmp = file
        .meta
        .items
        .iter()
        .find(|i| &i.item_type == b"mime")
        .unwrap();
    assert_eq!(file.references_from(b"cdsc", xmp.id), vec![primary]);
}

#[test]
fn test_grid_primary_is_assembled() {
    let registry = registry();
    let handlers = registry.lookup(FormatId::AppleHeic).unwrap();
    let bytes = grid_file();
    assert_eq!(registry.detect(&bytes).unwrap(), FormatId::AppleHeic);

    let container = handlers.codec.read(&bytes).unwrap();
    let baseline = container.primary().unwrap();
    assert_eq!((baseline.width, baseline.height), (4, 3));
    assert_eq!(baseline.color_space, ColorSpace::DISPLAY_P3);

    let row = |a: u8, b: u8| [[a; 6], [b; 6]].concat();
    let expected = [row(10, 20), row(10, 20), row(30, 40)].concat();
    assert_eq!(baseline.pixels, PixelData::U8(expected));
    assert_eq!(
        container.metadata,
        ContainerMetadata::AppleHeadroom(AppleHeadroomMetadata { headroom: 2.0 })
    );

    // Full gain doubles the baseline.
    let rendering = handlers.composer.compose(container).unwrap();
    assert_eq!((rendering.width(), rendering.height()), (4, 3));
}

#[test]
fn test_missing_headroom_is_metadata_error() {
    let mut builder = HeifBuilder::new(*b"heic", &[*b"mif1", *b"heic"]);
    let primary = builder.add_item(hevc_item(&rgb(2, 2, 100), Vec::new()));
    let gain = builder.add_item(hevc_item(
        &gray(2, 2, 0),
        vec![(Property::AuxiliaryType(APPLE_GAINMAP_URN.into()), true)],
    ));
    builder.add_reference(*b"auxl", gain, vec![primary]);
    let bytes = builder.build().unwrap();

    let registry = registry();
    let err = registry
        .lookup(FormatId::AppleHeic)
        .unwrap()
        .codec
        .read(&bytes)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Metadata);
}

#[test]
fn test_headroom_from_maker_note_without_xmp() {
    let mut builder = HeifBuilder::new(*b"heic", &[*b"mif1", *b"heic"]);
    let primary = builder.add_item(hevc_item(&rgb(2, 2, 100), Vec::new()));
    let gain = builder.add_item(hevc_item(
        &gray(2, 2, 255),
        vec![(Property::AuxiliaryType(APPLE_GAINMAP_URN.into()), true)],
    ));
    let exif = builder.add_item(exif_item((3, 2), (1, 2)));
    builder.add_reference(*b"auxl", gain, vec![primary]);
    builder.add_reference(*b"cdsc", exif, vec![primary]);
    builder.set_primary(primary);
    let bytes = builder.build().unwrap();

    let registry = registry();
    let container = registry
        .lookup(FormatId::AppleHeic)
        .unwrap()
        .codec
        .read(&bytes)
        .unwrap();
    let expected = AppleHeadroomMetadata::from_maker_notes(1.5, 0.5).unwrap();
    assert!((expected.headroom - 2f32.powf(2.1515)).abs() < 1e-4);
    assert_eq!(container.metadata, ContainerMetadata::AppleHeadroom(expected));
}

#[test]
fn test_missing_gainmap_is_format_error() {
    let mut builder = HeifBuilder::new(*b"heic", &[*b"mif1", *b"heic"]);
    let primary = builder.add_item(hevc_item(&rgb(2, 2, 100), Vec::new()));
    let xmp = builder.add_item(xmp_item(3.0));
    builder.add_reference(*b"cdsc", xmp, vec![primary]);
    let bytes = builder.build().unwrap();

    let registry = registry();
    let err = registry
        .lookup(FormatId::AppleHeic)
        .unwrap()
        .codec
        .read(&bytes)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_truncated_heic_is_box_error() {
    let bytes = grid_file();
    let registry = registry();
    let codec = &registry.lookup(FormatId::AppleHeic).unwrap().codec;
    let err = codec.read(&bytes[..bytes.len() - 5]).unwrap_err();
    assert!(matches!(err, hdrconv::Error::BoxParse(_)), "{:?}", err);
    // Still recognized: identify only looks at ftyp.
    assert!(codec.identify(&bytes[..40]));
}

#[test]
fn test_single_layer_metadata_rejected() {
    let registry = registry();
    let avif = registry.lookup(FormatId::Iso22028Avif).unwrap();
    let container = avif
        .generator
        .generate(&flat(2, 2, [1.0; 3]), &GenerateOptions::default())
        .unwrap();
    let codec = &registry.lookup(FormatId::AppleHeic).unwrap().codec;
    let mut out = Vec::new();
    let err = codec.write(&mut out, &container).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Metadata);
    assert!(out.is_empty());
}
