use jp2::{
    decode_jp2, decode_jp2_with_options, Channel, ChannelTypes, CodestreamError,
    ColourSpecificationMethods, DecodeOptions, EnumeratedColourSpaces, ErrorKind, JBox as _,
    JP2Error, COLOUR_SPACE_NOT_ENUMERATED,
};

use shared::*;

#[test]
fn test_rgb_without_channel_definition() {
    let data = rgb_file(&[]);
    let length = data.len() as u64;
    let jp2 = decode_jp2(&mut reader(data)).unwrap();
    assert_eq!(jp2.length(), length);

    let file_type = jp2.file_type_box();
    assert_eq!(file_type.brand(), "jp2 ");
    assert_eq!(file_type.min_version(), 0);
    assert_eq!(file_type.compatibility_list(), vec!["jp2 ".to_string()]);
    assert_eq!(file_type.offset(), 20);
    assert_eq!(file_type.length(), 16);

    let xml_boxes = jp2.xml_boxes();
    assert_eq!(xml_boxes.len(), 2);
    assert_eq!(xml_boxes[0].text(), XML_CREATION);
    assert_eq!(xml_boxes[1].text(), XML_DESCRIPTION);
    assert_eq!(xml_boxes[1].length(), XML_DESCRIPTION.len() as u64);

    let image_header = jp2.image_header_box();
    assert_eq!(image_header.width(), 768);
    assert_eq!(image_header.height(), 512);
    assert_eq!(image_header.components_num(), 3);
    assert_eq!(image_header.components_bits(), 7);
    assert_eq!(image_header.bit_depth(), Some(8));
    assert!(!image_header.values_are_signed());
    assert_eq!(image_header.compression_type(), 7);
    assert!(!image_header.colourspace_unknown());
    assert!(!image_header.intellectual_property());

    let colour = jp2.colour_specification_box().unwrap();
    assert_eq!(
        colour.method(),
        ColourSpecificationMethods::EnumeratedColourSpace
    );
    assert_eq!(colour.colour_space(), 16);
    assert_eq!(
        colour.enumerated_colour_space(),
        Some(EnumeratedColourSpaces::sRGB)
    );
    assert_eq!(jp2.colour_specification_boxes().len(), 1);

    assert!(jp2.channel_definition_box().is_none());

    let codestream = jp2.codestream().unwrap();
    assert_eq!(jp2.contiguous_codestreams_boxes().len(), 1);
    assert_eq!(codestream.length(), 94);
    let siz = codestream.image_and_tile_size_marker_segment();
    assert_eq!(siz.reference_grid_width(), 768);
    assert_eq!(siz.reference_grid_height(), 512);
    assert_eq!(siz.no_components(), 3);
    assert_eq!(codestream.tiles().len(), 1);
    assert_eq!(codestream.tiles()[0].data(), &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn test_rgb_with_channel_definition() {
    let data = rgb_file(&[channel_definition(&[(0, 0, 3), (1, 0, 2), (2, 0, 1)])]);
    let jp2 = decode_jp2(&mut reader(data)).unwrap();

    let channel_definition = jp2.channel_definition_box().unwrap();
    assert_eq!(channel_definition.length(), 2 + 3 * 6);
    assert_eq!(
        channel_definition.channels(),
        &[
            Channel::new(0, 0, 3),
            Channel::new(1, 0, 2),
            Channel::new(2, 0, 1)
        ]
    );
    for channel in channel_definition.channels() {
        assert_eq!(channel.channel_type(), ChannelTypes::ColourImageData);
    }
}

#[test]
fn test_duplicate_channel_definition() {
    let data = rgb_file(&[
        channel_definition(&[(0, 0, 1)]),
        channel_definition(&[(0, 0, 1)]),
    ]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Structural);
    assert!(matches!(
        error,
        JP2Error::BoxDuplicate {
            box_type: [b'c', b'd', b'e', b'f'],
            ..
        }
    ));
}

#[test]
fn test_channel_count_mismatch() {
    let mut cdef = channel_definition(&[(0, 0, 1), (1, 0, 2)]);
    // N claims three descriptions
    cdef[9] = 3;
    let error = decode_jp2(&mut reader(rgb_file(&[cdef]))).unwrap_err();
    assert!(matches!(
        error,
        JP2Error::ChannelCountMismatch {
            count: 3,
            length: 12,
            ..
        }
    ));
}

#[test]
fn test_image_header_length() {
    let mut contents = image_header_contents(512, 768, 3, 7, 7);
    contents.push(0);
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        header(&[jp2_box(b"ihdr", &contents)]),
    ]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert!(matches!(
        error,
        JP2Error::BoxLengthMismatch {
            expected: 14,
            actual: 15,
            ..
        }
    ));
}

#[test]
fn test_compression_type() {
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        header(&[jp2_box(
            b"ihdr",
            &image_header_contents(512, 768, 3, 7, 6),
        )]),
    ]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Unsupported);
    assert!(matches!(error, JP2Error::CompressionType { value: 6, .. }));
}

#[test]
fn test_compatibility_list_mismatch() {
    let mut ftyp = file_type(b"jp2 ", 0, &[b"jp2 ", b"jpx "]);
    // Count claims one entry, eight bytes follow
    ftyp[19] = 1;
    let data = concat(&[SIGNATURE.to_vec(), ftyp]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert!(matches!(
        error,
        JP2Error::CompatibilityListMismatch {
            count: 1,
            length: 8,
            ..
        }
    ));
}

#[test]
fn test_compatibility_list_empty() {
    let data = concat(&[SIGNATURE.to_vec(), file_type(b"jp2 ", 0, &[])]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert!(matches!(
        error,
        JP2Error::BoxLengthTooShort {
            length: 12,
            minimum: 16,
            ..
        }
    ));
}

#[test]
fn test_compatibility_list_order() {
    let data = concat(&[
        SIGNATURE.to_vec(),
        file_type(b"jpx ", 1, &[b"jpx ", b"jp2 ", b"jpxb"]),
        header(&[image_header(1, 1, 1, 7)]),
    ]);
    let jp2 = decode_jp2(&mut reader(data)).unwrap();
    let file_type = jp2.file_type_box();
    assert_eq!(file_type.brand(), "jpx ");
    assert_eq!(file_type.min_version(), 1);
    assert_eq!(
        file_type.compatibility_list(),
        vec!["jpx ".to_string(), "jp2 ".to_string(), "jpxb".to_string()]
    );
    assert!(jp2.codestream().is_none());
}

#[test]
fn test_colour_specification_not_enumerated() {
    let profile = vec![0x5A; 40];
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        header(&[
            image_header(512, 768, 3, 7),
            colour_profile(2, &profile),
            colour_profile(3, &[1, 2, 3]),
            colour_enumerated(17),
        ]),
    ]);
    let jp2 = decode_jp2(&mut reader(data)).unwrap();
    let boxes = jp2.colour_specification_boxes();
    assert_eq!(boxes.len(), 3);

    assert_eq!(
        boxes[0].method(),
        ColourSpecificationMethods::RestrictedICCProfile
    );
    assert_eq!(boxes[0].colour_space(), COLOUR_SPACE_NOT_ENUMERATED);
    assert_eq!(boxes[0].colour_space(), -1);
    assert_eq!(boxes[0].profile_length(), 40);
    assert_eq!(boxes[0].enumerated_colour_space(), None);

    assert_eq!(
        boxes[1].method(),
        ColourSpecificationMethods::Reserved { value: 3 }
    );
    assert_eq!(boxes[1].colour_space(), -1);
    assert_eq!(boxes[1].profile_length(), 3);

    assert_eq!(boxes[2].colour_space(), 17);
    assert_eq!(
        boxes[2].enumerated_colour_space(),
        Some(EnumeratedColourSpaces::Greyscale)
    );

    // The first box is the one that applies
    assert_eq!(jp2.colour_specification_box(), Some(&boxes[0]));
}

#[test]
fn test_colour_specification_enumerated_length() {
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        header(&[
            image_header(512, 768, 3, 7),
            colour_profile(1, &[0, 0, 0, 16, 0]),
        ]),
    ]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert!(matches!(
        error,
        JP2Error::BoxLengthMismatch {
            expected: 7,
            actual: 8,
            ..
        }
    ));
}

#[test]
fn test_corrupted_signature() {
    let mut data = rgb_file(&[]);
    data[10] = 0x0D;
    let error = decode_jp2(&mut reader(data.clone())).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Structural);
    assert!(matches!(error, JP2Error::InvalidSignature { offset: 0, .. }));

    // Tolerated when verification is off
    let options = DecodeOptions {
        verify_signature: false,
    };
    let jp2 = decode_jp2_with_options(&mut reader(data), &options).unwrap();
    assert_eq!(jp2.image_header_box().width(), 768);
}

#[test]
fn test_file_type_must_be_first() {
    let data = concat(&[
        SIGNATURE.to_vec(),
        header(&[image_header(512, 768, 3, 7)]),
        jp2_file_type(),
    ]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert!(matches!(
        error,
        JP2Error::BoxUnexpected {
            box_type: [b'j', b'p', b'2', b'h'],
            offset: 12,
        }
    ));
}

#[test]
fn test_codestream_before_header() {
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        jp2_box(b"jp2c", &codestream()),
        header(&[image_header(512, 768, 3, 7)]),
    ]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert!(matches!(
        error,
        JP2Error::BoxUnexpected {
            box_type: [b'j', b'p', b'2', b'c'],
            ..
        }
    ));
}

#[test]
fn test_header_required() {
    let data = concat(&[SIGNATURE.to_vec(), jp2_file_type(), xml("<a/>")]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert!(matches!(
        error,
        JP2Error::BoxMissing {
            box_type: [b'j', b'p', b'2', b'h']
        }
    ));
}

#[test]
fn test_image_header_required() {
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        header(&[colour_enumerated(16)]),
    ]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert!(matches!(
        error,
        JP2Error::BoxMissing {
            box_type: [b'i', b'h', b'd', b'r']
        }
    ));
}

#[test]
fn test_second_image_header_ignored() {
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        header(&[image_header(512, 768, 3, 7), image_header(1, 1, 1, 0)]),
    ]);
    let jp2 = decode_jp2(&mut reader(data)).unwrap();
    assert_eq!(jp2.image_header_box().width(), 768);
}

#[test]
fn test_unknown_boxes_skipped() {
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        jp2_box(b"uuid", &[0x11; 24]),
        header(&[
            image_header(512, 768, 3, 7),
            jp2_box(b"res ", &[0; 18]),
            colour_enumerated(16),
        ]),
        jp2_box(b"jp2i", b"rights"),
        jp2_box(b"jp2c", &codestream()),
    ]);
    let jp2 = decode_jp2(&mut reader(data)).unwrap();
    assert_eq!(jp2.colour_specification_box().unwrap().colour_space(), 16);
    assert!(jp2.codestream().is_some());
    assert!(jp2.xml_boxes().is_empty());
}

#[test]
fn test_child_overruns_header() {
    let mut jp2h = header(&[image_header(512, 768, 3, 7), colour_enumerated(16)]);
    // Shrink the jp2h LBox so the colr box no longer fits
    jp2h[3] -= 4;
    let mut data = concat(&[SIGNATURE.to_vec(), jp2_file_type(), jp2h]);
    data.truncate(data.len() - 4);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert!(matches!(
        error,
        JP2Error::BoxOverrun {
            box_type: [b'c', b'o', b'l', b'r'],
            length: 15,
            available: 11,
            ..
        }
    ));
}

#[test]
fn test_box_overruns_file() {
    let mut data = rgb_file(&[]);
    data.truncate(data.len() - 10);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Structural);
    assert!(matches!(
        error,
        JP2Error::BoxOverrun {
            box_type: [b'j', b'p', b'2', b'c'],
            length: 94,
            available: 84,
            ..
        }
    ));
}

#[test]
fn test_corrupted_end_of_codestream() {
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        header(&[image_header(512, 768, 3, 7)]),
        jp2_box(b"jp2c", &codestream_with_eoc([0xFF, 0xD8])),
    ]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Structural);
    assert!(matches!(
        error,
        JP2Error::Codestream(CodestreamError::MarkerUnexpected {
            expected: 0xFFD9,
            actual: 0xFFD8,
            ..
        })
    ));
}

#[test]
fn test_codestream_errors_keep_their_kind() {
    let mut stream = codestream();
    // Scod with explicit precinct sizes
    stream[55] = 0x01;
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        header(&[image_header(512, 768, 3, 7)]),
        jp2_box(b"jp2c", &stream),
    ]);
    let error = decode_jp2(&mut reader(data)).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Unsupported);
}

#[test]
fn test_extended_and_open_ended_boxes() {
    let mut open_ended = 0u32.to_be_bytes().to_vec();
    open_ended.extend_from_slice(b"jp2c");
    open_ended.extend(codestream());

    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        jp2_box_extended(b"jp2h", &image_header(512, 768, 3, 7)),
        open_ended,
    ]);
    let jp2 = decode_jp2(&mut reader(data)).unwrap();
    assert_eq!(jp2.header_box().length(), 22);
    assert_eq!(jp2.contiguous_codestreams_boxes()[0].length(), 94);
    assert_eq!(jp2.codestream().unwrap().tiles().len(), 1);
}

#[test]
fn test_multiple_codestreams_kept() {
    let data = concat(&[
        SIGNATURE.to_vec(),
        jp2_file_type(),
        header(&[image_header(512, 768, 3, 7)]),
        jp2_box(b"jp2c", &codestream()),
        jp2_box(b"jp2c", &codestream()),
    ]);
    let jp2 = decode_jp2(&mut reader(data)).unwrap();
    let boxes = jp2.contiguous_codestreams_boxes();
    assert_eq!(boxes.len(), 2);
    assert!(boxes[0].offset() < boxes[1].offset());
    assert_eq!(jp2.codestream(), Some(boxes[0].codestream()));
}

#[test]
fn test_truncated_signature_is_io() {
    let error = decode_jp2(&mut reader(SIGNATURE[..6].to_vec())).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Io);
}

#[test]
fn test_idempotent() {
    let data = rgb_file(&[channel_definition(&[(0, 0, 3), (1, 0, 2), (2, 0, 1)])]);
    let first = decode_jp2(&mut reader(data.clone())).unwrap();
    let second = decode_jp2(&mut reader(data)).unwrap();
    assert_eq!(first, second);
}
