use jpc::{decode_jpc, Budget, Shortfall};
use log::{debug, info, warn};
use std::io;

mod colour_specification;

pub use colour_specification::{
    ColourSpecificationBox, ColourSpecificationMethods, EnumeratedColourSpaces,
    COLOUR_SPACE_NOT_ENUMERATED,
};
pub use jpc::{
    ByteSource, CodestreamError, ContiguousCodestream, ErrorKind, Reader, Tile,
};

use colour_specification::decode_colour_specification;

#[derive(Debug, thiserror::Error)]
pub enum JP2Error {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codestream(#[from] CodestreamError),

    #[error("invalid signature box {signature:02X?} at offset {offset}")]
    InvalidSignature { signature: Vec<u8>, offset: u64 },

    #[error("unexpected box type {} at offset {offset}", box_name(.box_type))]
    BoxUnexpected { box_type: BoxType, offset: u64 },

    #[error("unexpected duplicate box type {} at offset {offset}", box_name(.box_type))]
    BoxDuplicate { box_type: BoxType, offset: u64 },

    #[error("box type {} missing", box_name(.box_type))]
    BoxMissing { box_type: BoxType },

    #[error("reserved box length {length} for box type {} at offset {offset}", box_name(.box_type))]
    BoxLengthReserved {
        box_type: BoxType,
        length: u32,
        offset: u64,
    },

    #[error("box type {} at offset {offset} has length {length}, minimum is {minimum}", box_name(.box_type))]
    BoxLengthTooShort {
        box_type: BoxType,
        length: u64,
        minimum: u64,
        offset: u64,
    },

    #[error("box type {} at offset {offset} has length {actual}, expected {expected}", box_name(.box_type))]
    BoxLengthMismatch {
        box_type: BoxType,
        expected: u64,
        actual: u64,
        offset: u64,
    },

    #[error("box type {} at offset {offset} needs {length} bytes but only {available} remain", box_name(.box_type))]
    BoxOverrun {
        box_type: BoxType,
        length: u64,
        available: u64,
        offset: u64,
    },

    #[error("box type {} at offset {offset} runs to the end of its parent", box_name(.box_type))]
    BoxLengthUnbounded { box_type: BoxType, offset: u64 },

    #[error("compatibility list count {count} does not fit {length} bytes at offset {offset}")]
    CompatibilityListMismatch { count: u32, length: u64, offset: u64 },

    #[error("channel description count {count} does not fit {length} bytes at offset {offset}")]
    ChannelCountMismatch { count: u16, length: u64, offset: u64 },

    #[error("unsupported compression type {value} at offset {offset}")]
    CompressionType { value: u8, offset: u64 },

    #[error("box type {} at offset {offset} extends to the end of a source of unknown length", box_name(.box_type))]
    UnknownLength { box_type: BoxType, offset: u64 },
}

impl JP2Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Codestream(error) => error.kind(),
            Self::CompressionType { .. } | Self::UnknownLength { .. } => ErrorKind::Unsupported,
            _ => ErrorKind::Structural,
        }
    }
}

fn box_name(box_type: &BoxType) -> String {
    format!("{:?}", String::from_utf8_lossy(box_type))
}

pub type BoxType = [u8; 4];

// jP\040\040 (0x6A50 2020)
const BOX_TYPE_SIGNATURE: BoxType = *b"jP  ";
const BOX_TYPE_FILE_TYPE: BoxType = *b"ftyp";
const BOX_TYPE_HEADER: BoxType = *b"jp2h";
const BOX_TYPE_IMAGE_HEADER: BoxType = *b"ihdr";
const BOX_TYPE_COLOUR_SPECIFICATION: BoxType = *b"colr";
const BOX_TYPE_CHANNEL_DEFINITION: BoxType = *b"cdef";
const BOX_TYPE_CONTIGUOUS_CODESTREAM: BoxType = *b"jp2c";
const BOX_TYPE_XML: BoxType = *b"xml ";

// jp2\040
const BRAND_JP2: [u8; 4] = *b"jp2 ";

// Signature box: length 12, type 'jP\040\040', contents <CR><LF><0x87><LF>
const SIGNATURE_BOX: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

#[derive(Debug)]
enum BoxTypes {
    Signature,
    FileType,
    Header,
    ImageHeader,
    ColourSpecification,
    ChannelDefinition,
    ContiguousCodestream,
    Xml,
    Unknown,
}

impl BoxTypes {
    fn new(value: BoxType) -> BoxTypes {
        match value {
            BOX_TYPE_SIGNATURE => BoxTypes::Signature,
            BOX_TYPE_FILE_TYPE => BoxTypes::FileType,
            BOX_TYPE_HEADER => BoxTypes::Header,
            BOX_TYPE_IMAGE_HEADER => BoxTypes::ImageHeader,
            BOX_TYPE_COLOUR_SPECIFICATION => BoxTypes::ColourSpecification,
            BOX_TYPE_CHANNEL_DEFINITION => BoxTypes::ChannelDefinition,
            BOX_TYPE_CONTIGUOUS_CODESTREAM => BoxTypes::ContiguousCodestream,
            BOX_TYPE_XML => BoxTypes::Xml,
            _ => BoxTypes::Unknown,
        }
    }
}

/// JPEG 2000 box trait.
///
/// The building-block of the JP2 file format is called a box. All
/// information contained within the JP2 file is encapsulated in boxes, some
/// of which contain other boxes.
///
/// For more information, see ISO/IEC 15444-1 / ITU T-800 Appendix I.4.
pub trait JBox {
    fn identifier(&self) -> BoxType;

    /// Length of the box contents, excluding the box header.
    fn length(&self) -> u64;

    /// Byte offset of the box contents.
    fn offset(&self) -> u64;
}

/// Parser settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Compare the 12 byte signature box against the fixed JP2 signature.
    /// When disabled the bytes are skipped unchecked.
    pub verify_signature: bool,
}

impl Default for DecodeOptions {
    fn default() -> DecodeOptions {
        DecodeOptions {
            verify_signature: true,
        }
    }
}

// I.5.2
//
// File Type box
//
// The File Type box completely defines all of the contents of this file, as
// well as a separate list of readers with which this file is compatible.
//
// This box shall immediately follow the Signature box.
//
// The compatibility list is preceded by an explicit entry count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTypeBox {
    length: u64,
    offset: u64,
    brand: [u8; 4],
    min_version: u32,
    compatibility_list: Vec<[u8; 4]>,
}

impl FileTypeBox {
    /// Brand.
    ///
    /// This field specifies the Recommendation | International Standard which
    /// completely defines this file, as four ISO 646 characters.
    pub fn brand(&self) -> String {
        String::from_utf8_lossy(&self.brand).into_owned()
    }

    pub fn brand_bytes(&self) -> [u8; 4] {
        self.brand
    }

    /// Minor version.
    ///
    /// The value of this field shall be zero. However, readers shall continue
    /// to parse and interpret this file even if it is not.
    pub fn min_version(&self) -> u32 {
        self.min_version
    }

    /// Compatibility list, in file order.
    pub fn compatibility_list(&self) -> Vec<String> {
        self.compatibility_list
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }
}

impl JBox for FileTypeBox {
    // The type of the File Type Box shall be ‘ftyp’ (0x6674 7970).
    fn identifier(&self) -> BoxType {
        BOX_TYPE_FILE_TYPE
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

const COMPRESSION_TYPE_WAVELET: u8 = 7;

// HEIGHT + WIDTH + NC + BPC + C + UnkC + IPR
const IMAGE_HEADER_LENGTH: u64 = 14;

// I.5.3.1
//
// Image Header box
//
// This box contains fixed length generic information about the image, such as
// the image size and number of components.
//
// Much of the information within the Image Header box is redundant with
// information stored in the codestream itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageHeaderBox {
    length: u64,
    offset: u64,
    height: u32,
    width: u32,
    components_num: u16,
    components_bits: u8,
    compression_type: u8,
    colourspace_unknown: bool,
    intellectual_property: bool,
}

impl ImageHeaderBox {
    // Image area height, Ysiz – YOsiz of the codestream SIZ marker.
    pub fn height(&self) -> u32 {
        self.height
    }

    // Image area width, Xsiz – XOsiz of the codestream SIZ marker.
    pub fn width(&self) -> u32 {
        self.width
    }

    // Number of components, equal to Csiz of the codestream SIZ marker.
    pub fn components_num(&self) -> u16 {
        self.components_num
    }

    /// Bits per component, as stored: the bit depth minus one in the low 7
    /// bits, signedness in the high bit, or 255 when components vary.
    pub fn components_bits(&self) -> u8 {
        self.components_bits
    }

    /// Bit depth shared by all components, `None` when components vary.
    pub fn bit_depth(&self) -> Option<u8> {
        match self.components_bits {
            255 => None,
            value => Some((value & 0b0111_1111) + 1),
        }
    }

    pub fn values_are_signed(&self) -> bool {
        self.components_bits != 255 && self.components_bits & 0b1000_0000 != 0
    }

    // Compression type, always 7 once decoded.
    pub fn compression_type(&self) -> u8 {
        self.compression_type
    }

    // Colourspace Unknown.
    //
    // True if the colourspace of the image data in the codestream is not
    // known, e.g. when transcoding legacy images.
    pub fn colourspace_unknown(&self) -> bool {
        self.colourspace_unknown
    }

    // Intellectual Property.
    //
    // True if the file contains rights information.
    pub fn intellectual_property(&self) -> bool {
        self.intellectual_property
    }
}

impl JBox for ImageHeaderBox {
    // The type of the Image Header box shall be ‘ihdr’ (0x6968 6472)
    fn identifier(&self) -> BoxType {
        BOX_TYPE_IMAGE_HEADER
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

// I.5.3.6
//
// Channel Definition Box
//
// The Channel Definition box specifies the meaning of the samples in each
// channel in the image.
//
// If the JP2 Header box does not contain a Component Mapping box, then a
// reader shall map component i to channel i, for all components in the
// codestream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelDefinitionBox {
    length: u64,
    offset: u64,
    channels: Vec<Channel>,
}

impl ChannelDefinitionBox {
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }
}

impl JBox for ChannelDefinitionBox {
    // The type of a Channel Definition box shall be ‘cdef’ (0x6364 6566).
    fn identifier(&self) -> BoxType {
        BOX_TYPE_CHANNEL_DEFINITION
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Channel {
    // Cn^i
    channel_index: u16,

    // Typ^i
    channel_type: u16,

    // Asoc^i, the colour this channel is associated with, 0 for the whole
    // image and 2^16 - 1 for no association.
    channel_association: u16,
}

impl Channel {
    pub fn new(channel_index: u16, channel_type: u16, channel_association: u16) -> Channel {
        Channel {
            channel_index,
            channel_type,
            channel_association,
        }
    }

    pub fn channel_index(&self) -> u16 {
        self.channel_index
    }

    pub fn channel_type(&self) -> ChannelTypes {
        ChannelTypes::new(self.channel_type)
    }

    pub fn channel_type_u16(&self) -> u16 {
        self.channel_type
    }

    pub fn channel_association(&self) -> u16 {
        self.channel_association
    }
}

const CHANNEL_TYPE_COLOUR_IMAGE_DATA: u16 = 0;
const CHANNEL_TYPE_OPACITY_DATA: u16 = 1;
const CHANNEL_TYPE_PREMULTIPLIED_OPACITY: u16 = 2;
const CHANNEL_TYPE_UNSPECIFIED: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTypes {
    ColourImageData,
    Opacity,
    PremultipliedOpacity,
    Reserved { value: u16 },
    Unspecified,
}

impl ChannelTypes {
    fn new(value: u16) -> ChannelTypes {
        match value {
            CHANNEL_TYPE_COLOUR_IMAGE_DATA => ChannelTypes::ColourImageData,
            CHANNEL_TYPE_OPACITY_DATA => ChannelTypes::Opacity,
            CHANNEL_TYPE_PREMULTIPLIED_OPACITY => ChannelTypes::PremultipliedOpacity,
            CHANNEL_TYPE_UNSPECIFIED => ChannelTypes::Unspecified,
            value => ChannelTypes::Reserved { value },
        }
    }
}

// N
const CHANNEL_DEFINITION_COUNT_LENGTH: u64 = 2;

// Cn^i + Typ^i + Asoc^i
const CHANNEL_DEFINITION_ENTRY_LENGTH: u64 = 6;

// I.5.3
//
// JP2 Header box
//
// The JP2 Header box contains generic information about the file, such as
// number of components, colourspace, and grid resolution.
//
// This box is a superbox. Within a JP2 file, there shall be one and only one
// JP2 Header box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSuperBox {
    length: u64,
    offset: u64,
    image_header_box: ImageHeaderBox,
    colour_specification_boxes: Vec<ColourSpecificationBox>,
    channel_definition_box: Option<ChannelDefinitionBox>,
}

impl HeaderSuperBox {
    pub fn image_header_box(&self) -> &ImageHeaderBox {
        &self.image_header_box
    }

    pub fn colour_specification_boxes(&self) -> &[ColourSpecificationBox] {
        &self.colour_specification_boxes
    }

    pub fn channel_definition_box(&self) -> Option<&ChannelDefinitionBox> {
        self.channel_definition_box.as_ref()
    }
}

impl JBox for HeaderSuperBox {
    // The type of the JP2 Header box shall be ‘jp2h’ (0x6A70 3268)
    fn identifier(&self) -> BoxType {
        BOX_TYPE_HEADER
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

/// I.7.1 XML box
///
/// An XML box contains vendor specific information (in XML format) other than
/// the information contained within boxes defined.
///
/// There may be multiple XML boxes within the file. The contents are kept as
/// text and are not checked for well-formedness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XMLBox {
    length: u64,
    offset: u64,
    xml: String,
}

impl XMLBox {
    pub fn text(&self) -> &str {
        &self.xml
    }
}

impl JBox for XMLBox {
    // The type of an XML box is ‘xml\040’ (0x786D 6C20).
    fn identifier(&self) -> BoxType {
        BOX_TYPE_XML
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

// I.5.4
//
// Contiguous Codestream box
//
// The Contiguous Codestream box contains a valid and complete JPEG 2000
// codestream. When displaying the image, a conforming reader shall ignore all
// codestreams after the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContiguousCodestreamBox {
    length: u64,
    offset: u64,
    codestream: ContiguousCodestream,
}

impl ContiguousCodestreamBox {
    pub fn codestream(&self) -> &ContiguousCodestream {
        &self.codestream
    }
}

impl JBox for ContiguousCodestreamBox {
    // The type of a Contiguous Codestream box shall be ‘jp2c’ (0x6A70 3263)
    fn identifier(&self) -> BoxType {
        BOX_TYPE_CONTIGUOUS_CODESTREAM
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

/// Everything decoded from a JP2 file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JP2File {
    length: u64,
    file_type: FileTypeBox,
    header: HeaderSuperBox,
    contiguous_codestreams: Vec<ContiguousCodestreamBox>,
    xml: Vec<XMLBox>,
}

impl JP2File {
    /// Number of bytes decoded, signature box included.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn file_type_box(&self) -> &FileTypeBox {
        &self.file_type
    }

    pub fn header_box(&self) -> &HeaderSuperBox {
        &self.header
    }

    pub fn image_header_box(&self) -> &ImageHeaderBox {
        self.header.image_header_box()
    }

    /// The first Colour Specification box, the one a JP2 reader applies.
    pub fn colour_specification_box(&self) -> Option<&ColourSpecificationBox> {
        self.header.colour_specification_boxes.first()
    }

    pub fn colour_specification_boxes(&self) -> &[ColourSpecificationBox] {
        self.header.colour_specification_boxes()
    }

    pub fn channel_definition_box(&self) -> Option<&ChannelDefinitionBox> {
        self.header.channel_definition_box()
    }

    pub fn contiguous_codestreams_boxes(&self) -> &[ContiguousCodestreamBox] {
        &self.contiguous_codestreams
    }

    /// The codestream of the first Contiguous Codestream box.
    pub fn codestream(&self) -> Option<&ContiguousCodestream> {
        self.contiguous_codestreams
            .first()
            .map(ContiguousCodestreamBox::codestream)
    }

    pub fn xml_boxes(&self) -> &[XMLBox] {
        &self.xml
    }
}

#[derive(Debug)]
pub(crate) struct BoxHeader {
    // Length of the box contents, derived from LBox (or XLBox) minus the
    // header itself.
    pub(crate) box_length: u64,

    // Box Type
    //
    // Four bytes, generally referred to by their ISO 646 character string
    // translation. A space character is shown as “\040”.
    pub(crate) box_type: BoxType,

    // 8, or 16 when XLBox is present.
    pub(crate) header_length: u64,

    // Byte offset of LBox.
    pub(crate) offset: u64,
}

const BOX_HEADER_LENGTH: u64 = 8;
const BOX_HEADER_EXTENDED_LENGTH: u64 = 16;

// I.4 Box definition
//
// LBox 0: the box extends to the end of the file, only meaningful for the
// last top level box. LBox 1: XLBox holds the actual length. LBox 2–7 are
// reserved for ISO use.
fn decode_box_header<S: ByteSource>(
    source: &mut S,
    nested: bool,
) -> Result<BoxHeader, JP2Error> {
    let offset = source.position();
    let length = source.read_u32()?;
    let box_type = source.read_four_cc()?;

    let (box_length, header_length) = match length {
        0 => {
            if nested {
                return Err(JP2Error::BoxLengthUnbounded { box_type, offset });
            }
            match source.bytes_remaining()? {
                Some(remaining) => (remaining, BOX_HEADER_LENGTH),
                None => return Err(JP2Error::UnknownLength { box_type, offset }),
            }
        }
        1 => {
            let extended_length = source.read_u64()?;
            if extended_length < BOX_HEADER_EXTENDED_LENGTH {
                return Err(JP2Error::BoxLengthTooShort {
                    box_type,
                    length: extended_length,
                    minimum: BOX_HEADER_EXTENDED_LENGTH,
                    offset,
                });
            }
            (
                extended_length - BOX_HEADER_EXTENDED_LENGTH,
                BOX_HEADER_EXTENDED_LENGTH,
            )
        }
        2..=7 => {
            return Err(JP2Error::BoxLengthReserved {
                box_type,
                length,
                offset,
            })
        }
        length => (length as u64 - BOX_HEADER_LENGTH, BOX_HEADER_LENGTH),
    };

    debug!(
        "Box {} at {:?} with {} content bytes",
        box_name(&box_type),
        offset,
        box_length
    );

    Ok(BoxHeader {
        box_length,
        box_type,
        header_length,
        offset,
    })
}

// A parser must consume exactly the declared contents of its box.
fn check_consumed(header: &BoxHeader, consumed: u64) -> Result<(), JP2Error> {
    if consumed != header.box_length {
        return Err(JP2Error::BoxLengthMismatch {
            box_type: header.box_type,
            expected: header.box_length,
            actual: consumed,
            offset: header.offset,
        });
    }
    Ok(())
}

// Top level boxes are only bounded by the source itself.
fn check_available<S: ByteSource>(source: &mut S, header: &BoxHeader) -> Result<(), JP2Error> {
    if let Some(available) = source.bytes_remaining()? {
        if header.box_length > available {
            return Err(JP2Error::BoxOverrun {
                box_type: header.box_type,
                length: header.box_length,
                available,
                offset: header.offset,
            });
        }
    }
    Ok(())
}

fn decode_signature<S: ByteSource>(
    source: &mut S,
    options: &DecodeOptions,
) -> Result<(), JP2Error> {
    let offset = source.position();
    if !options.verify_signature {
        warn!("Signature box not verified");
        source.skip(SIGNATURE_BOX.len() as u64)?;
        return Ok(());
    }

    info!("SignatureBox start at {:?}", offset);
    let signature = source.read_bytes(SIGNATURE_BOX.len())?;
    if signature != SIGNATURE_BOX {
        return Err(JP2Error::InvalidSignature { signature, offset });
    }
    info!("SignatureBox finish at {:?}", source.position());
    Ok(())
}

// BR + MinV + count
const FILE_TYPE_FIXED_LENGTH: u64 = 12;
const COMPATIBILITY_ENTRY_LENGTH: u64 = 4;

fn decode_file_type<S: ByteSource>(
    source: &mut S,
    header: &BoxHeader,
) -> Result<(FileTypeBox, u64), JP2Error> {
    let length = header.box_length;
    let offset = source.position();

    // At least one CL entry
    let minimum = FILE_TYPE_FIXED_LENGTH + COMPATIBILITY_ENTRY_LENGTH;
    if length < minimum {
        return Err(JP2Error::BoxLengthTooShort {
            box_type: header.box_type,
            length,
            minimum,
            offset: header.offset,
        });
    }
    info!("FileTypeBox start at {:?}", offset);

    let brand = source.read_four_cc()?;
    let min_version = source.read_u32()?;
    let count = source.read_u32()?;

    let list_length = length - FILE_TYPE_FIXED_LENGTH;
    if u64::from(count) * COMPATIBILITY_ENTRY_LENGTH != list_length {
        return Err(JP2Error::CompatibilityListMismatch {
            count,
            length: list_length,
            offset,
        });
    }

    let mut compatibility_list = Vec::with_capacity(count as usize);
    for _ in 0..count {
        compatibility_list.push(source.read_four_cc()?);
    }

    // Conforming readers interpret every file with ‘jp2\040’ in the
    // compatibility list.
    if !compatibility_list.contains(&BRAND_JP2) {
        warn!(
            "'jp2 ' not found in compatibility list {:?}",
            compatibility_list
                .iter()
                .map(box_name)
                .collect::<Vec<String>>()
        );
    }
    if min_version != 0 {
        warn!("Minor version {} unexpected", min_version);
    }

    let file_type_box = FileTypeBox {
        length,
        offset,
        brand,
        min_version,
        compatibility_list,
    };
    debug!("Brand {:?}", file_type_box.brand());
    info!("FileTypeBox finish at {:?}", source.position());

    Ok((file_type_box, length))
}

fn decode_image_header<S: ByteSource>(
    source: &mut S,
    header: &BoxHeader,
) -> Result<(ImageHeaderBox, u64), JP2Error> {
    if header.box_length != IMAGE_HEADER_LENGTH {
        return Err(JP2Error::BoxLengthMismatch {
            box_type: header.box_type,
            expected: IMAGE_HEADER_LENGTH,
            actual: header.box_length,
            offset: header.offset,
        });
    }

    let offset = source.position();
    info!("ImageHeaderBox start at {:?}", offset);

    let height = source.read_u32()?;
    let width = source.read_u32()?;
    let components_num = source.read_u16()?;
    let components_bits = source.read_u8()?;

    let compression_type = source.read_u8()?;
    if compression_type != COMPRESSION_TYPE_WAVELET {
        return Err(JP2Error::CompressionType {
            value: compression_type,
            offset: source.position() - 1,
        });
    }

    let image_header_box = ImageHeaderBox {
        length: header.box_length,
        offset,
        height,
        width,
        components_num,
        components_bits,
        compression_type,
        colourspace_unknown: source.read_u8()? == 1,
        intellectual_property: source.read_u8()? == 1,
    };

    debug!(
        "Image {}x{} with {} components",
        width, height, components_num
    );
    info!("ImageHeaderBox finish at {:?}", source.position());

    Ok((image_header_box, IMAGE_HEADER_LENGTH))
}

fn decode_channel_definition<S: ByteSource>(
    source: &mut S,
    header: &BoxHeader,
) -> Result<(ChannelDefinitionBox, u64), JP2Error> {
    let length = header.box_length;
    if length < CHANNEL_DEFINITION_COUNT_LENGTH {
        return Err(JP2Error::BoxLengthTooShort {
            box_type: header.box_type,
            length,
            minimum: CHANNEL_DEFINITION_COUNT_LENGTH,
            offset: header.offset,
        });
    }

    let offset = source.position();
    info!("ChannelDefinitionBox start at {:?}", offset);

    // Number of channel descriptions
    let count = source.read_u16()?;
    let entries_length = length - CHANNEL_DEFINITION_COUNT_LENGTH;
    if u64::from(count) * CHANNEL_DEFINITION_ENTRY_LENGTH != entries_length {
        return Err(JP2Error::ChannelCountMismatch {
            count,
            length: entries_length,
            offset,
        });
    }

    let mut channels = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let channel = Channel {
            channel_index: source.read_u16()?,
            channel_type: source.read_u16()?,
            channel_association: source.read_u16()?,
        };

        debug!(
            "Found channel at index {:?} of type {:?} and association {:?}",
            channel.channel_index(),
            channel.channel_type(),
            channel.channel_association(),
        );

        channels.push(channel);
    }

    info!("ChannelDefinitionBox finish at {:?}", source.position());

    Ok((
        ChannelDefinitionBox {
            length,
            offset,
            channels,
        },
        length,
    ))
}

fn decode_xml<S: ByteSource>(
    source: &mut S,
    header: &BoxHeader,
) -> Result<(XMLBox, u64), JP2Error> {
    let offset = source.position();
    info!("XMLBox start at {:?}", offset);
    let xml = source.read_string(header.box_length as usize)?;
    info!("XMLBox finish at {:?}", source.position());

    Ok((
        XMLBox {
            length: header.box_length,
            offset,
            xml,
        },
        header.box_length,
    ))
}

fn decode_contiguous_codestream<S: ByteSource>(
    source: &mut S,
    header: &BoxHeader,
) -> Result<(ContiguousCodestreamBox, u64), JP2Error> {
    let offset = source.position();
    info!("ContiguousCodestreamBox start at {:?}", offset);
    let codestream = decode_jpc(source, header.box_length)?;
    info!("ContiguousCodestreamBox finish at {:?}", source.position());

    let consumed = codestream.length();
    Ok((
        ContiguousCodestreamBox {
            length: header.box_length,
            offset,
            codestream,
        },
        consumed,
    ))
}

fn decode_header<S: ByteSource>(
    source: &mut S,
    header: &BoxHeader,
) -> Result<(HeaderSuperBox, u64), JP2Error> {
    let offset = source.position();
    info!("HeaderSuperBox start at {:?}", offset);

    let mut budget = Budget::new(header.box_length);
    let mut image_header_box: Option<ImageHeaderBox> = None;
    let mut colour_specification_boxes = vec![];
    let mut channel_definition_box: Option<ChannelDefinitionBox> = None;

    while !budget.is_exhausted() {
        if budget.remaining() < BOX_HEADER_LENGTH {
            return Err(JP2Error::BoxOverrun {
                box_type: header.box_type,
                length: BOX_HEADER_LENGTH,
                available: budget.remaining(),
                offset: source.position(),
            });
        }

        let child = decode_box_header(source, true)?;
        budget
            .consume(child.header_length + child.box_length)
            .map_err(|Shortfall { needed, available }| JP2Error::BoxOverrun {
                box_type: child.box_type,
                length: needed,
                available,
                offset: child.offset,
            })?;

        match BoxTypes::new(child.box_type) {
            BoxTypes::ImageHeader => {
                // Instances of Image Header box in other places shall be ignored
                if image_header_box.is_some() {
                    warn!("ImageHeaderBox found in other place, ignoring");
                    source.skip(child.box_length)?;
                    continue;
                }
                let (image_header, consumed) = decode_image_header(source, &child)?;
                check_consumed(&child, consumed)?;
                image_header_box = Some(image_header);
            }
            BoxTypes::ColourSpecification => {
                let (colour_specification, consumed) =
                    decode_colour_specification(source, &child)?;
                check_consumed(&child, consumed)?;
                colour_specification_boxes.push(colour_specification);
            }
            BoxTypes::ChannelDefinition => {
                // There shall be at most one Channel Definition box inside a JP2 Header box.
                if channel_definition_box.is_some() {
                    return Err(JP2Error::BoxDuplicate {
                        box_type: child.box_type,
                        offset: child.offset,
                    });
                }
                let (channel_definition, consumed) = decode_channel_definition(source, &child)?;
                check_consumed(&child, consumed)?;
                channel_definition_box = Some(channel_definition);
            }
            _ => {
                info!(
                    "Skipping box {} at {:?} in header",
                    box_name(&child.box_type),
                    child.offset
                );
                source.skip(child.box_length)?;
            }
        }
    }

    let image_header_box = image_header_box.ok_or(JP2Error::BoxMissing {
        box_type: BOX_TYPE_IMAGE_HEADER,
    })?;

    info!("HeaderSuperBox finish at {:?}", source.position());

    Ok((
        HeaderSuperBox {
            length: header.box_length,
            offset,
            image_header_box,
            colour_specification_boxes,
            channel_definition_box,
        },
        budget.consumed(),
    ))
}

/// Decode a JP2 file from the start of `source` with default options.
pub fn decode_jp2<S: ByteSource>(source: &mut S) -> Result<JP2File, JP2Error> {
    decode_jp2_with_options(source, &DecodeOptions::default())
}

/// Decode a JP2 file from the start of `source`.
///
/// Either the whole file decodes or an error is returned; nothing partial is
/// kept.
pub fn decode_jp2_with_options<S: ByteSource>(
    source: &mut S,
    options: &DecodeOptions,
) -> Result<JP2File, JP2Error> {
    let start = source.position();

    // The Signature box shall be the first box
    decode_signature(source, options)?;

    // The File Type box shall immediately follow the Signature box
    let header = decode_box_header(source, false)?;
    if header.box_type != BOX_TYPE_FILE_TYPE {
        return Err(JP2Error::BoxUnexpected {
            box_type: header.box_type,
            offset: header.offset,
        });
    }
    check_available(source, &header)?;
    let (file_type, consumed) = decode_file_type(source, &header)?;
    check_consumed(&header, consumed)?;

    let mut header_box: Option<HeaderSuperBox> = None;
    let mut contiguous_codestreams = vec![];
    let mut xml = vec![];

    while source.has_data_remaining()? {
        let header = decode_box_header(source, false)?;
        check_available(source, &header)?;

        match BoxTypes::new(header.box_type) {
            BoxTypes::FileType => {
                return Err(JP2Error::BoxDuplicate {
                    box_type: header.box_type,
                    offset: header.offset,
                });
            }
            BoxTypes::Header => {
                // There shall be one and only one JP2 Header box.
                if header_box.is_some() {
                    return Err(JP2Error::BoxDuplicate {
                        box_type: header.box_type,
                        offset: header.offset,
                    });
                }
                let (decoded, consumed) = decode_header(source, &header)?;
                check_consumed(&header, consumed)?;
                header_box = Some(decoded);
            }
            BoxTypes::ContiguousCodestream => {
                // The Header box shall fall before the Contiguous Codestream box
                if header_box.is_none() {
                    return Err(JP2Error::BoxUnexpected {
                        box_type: header.box_type,
                        offset: header.offset,
                    });
                }
                let (decoded, consumed) = decode_contiguous_codestream(source, &header)?;
                check_consumed(&header, consumed)?;
                contiguous_codestreams.push(decoded);
            }
            BoxTypes::Xml => {
                let (decoded, consumed) = decode_xml(source, &header)?;
                check_consumed(&header, consumed)?;
                xml.push(decoded);
            }
            BoxTypes::Signature
            | BoxTypes::ImageHeader
            | BoxTypes::ColourSpecification
            | BoxTypes::ChannelDefinition
            | BoxTypes::Unknown => {
                info!(
                    "Skipping box {} at {:?}",
                    box_name(&header.box_type),
                    header.offset
                );
                source.skip(header.box_length)?;
            }
        }
    }

    let header = header_box.ok_or(JP2Error::BoxMissing {
        box_type: BOX_TYPE_HEADER,
    })?;

    Ok(JP2File {
        length: source.position() - start,
        file_type,
        header,
        contiguous_codestreams,
        xml,
    })
}
