use log::{debug, info, warn};
use std::io;

mod reader;

pub use reader::{Budget, ByteSource, Reader, Shortfall};

/// Broad classification of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lengths, counts or signatures that contradict each other.
    Structural,

    /// The underlying byte source was exhausted or unreadable.
    Io,

    /// Valid JPEG 2000 using an extension this parser does not implement.
    Unsupported,
}

#[derive(Debug, thiserror::Error)]
pub enum CodestreamError {
    #[error("codestream read failed: {0}")]
    Io(#[from] io::Error),

    #[error("expected marker 0x{expected:04X} but found 0x{actual:04X} at byte offset {offset}")]
    MarkerUnexpected {
        expected: MarkerSymbol,
        actual: MarkerSymbol,
        offset: u64,
    },

    #[error("marker 0x{marker:04X} not allowed here at byte offset {offset}")]
    MarkerOutOfPlace { marker: MarkerSymbol, offset: u64 },

    #[error("0x{value:04X} at byte offset {offset} is not a marker")]
    MarkerInvalid { value: u16, offset: u64 },

    #[error("duplicate marker 0x{marker:04X} at byte offset {offset}")]
    MarkerDuplicate { marker: MarkerSymbol, offset: u64 },

    #[error("missing marker 0x{marker:04X}")]
    MarkerMissing { marker: MarkerSymbol },

    #[error(
        "marker 0x{marker:04X} segment length {length} at byte offset {offset}, expected {expected}"
    )]
    SegmentLengthMismatch {
        marker: MarkerSymbol,
        length: u16,
        expected: u64,
        offset: u64,
    },

    #[error("marker 0x{marker:04X} segment length {length} at byte offset {offset} is below the minimum {minimum}")]
    SegmentLengthTooShort {
        marker: MarkerSymbol,
        length: u16,
        minimum: u16,
        offset: u64,
    },

    #[error("tile-part length {psot} at byte offset {offset} is smaller than its {header_length} byte header")]
    TileLengthUnderflow {
        psot: u32,
        header_length: u32,
        offset: u64,
    },

    #[error("codestream overrun at byte offset {offset}: {needed} bytes needed but {available} remain")]
    Overrun {
        needed: u64,
        available: u64,
        offset: u64,
    },

    #[error("codestream has {remaining} bytes left where the 2 byte EOC marker was expected")]
    EndOfCodestreamMisaligned { remaining: u64 },

    #[error("unsupported: explicit precinct sizes (Scod 0x{coding_style:02X}) at byte offset {offset}")]
    UnsupportedPrecinctSizes { coding_style: u8, offset: u64 },
}

impl CodestreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::UnsupportedPrecinctSizes { .. } => ErrorKind::Unsupported,
            _ => ErrorKind::Structural,
        }
    }
}

pub type MarkerSymbol = u16;

// Delimiting markers and marker segments
pub const MARKER_SYMBOL_SOC: MarkerSymbol = 0xFF4F; // Start of code stream
pub const MARKER_SYMBOL_SOT: MarkerSymbol = 0xFF90; // Start of tile-part
pub const MARKER_SYMBOL_SOD: MarkerSymbol = 0xFF93; // Start of data
pub const MARKER_SYMBOL_EOC: MarkerSymbol = 0xFFD9; // End of codestream

// Fixed information marker segments
pub const MARKER_SYMBOL_SIZ: MarkerSymbol = 0xFF51; // Image and tile size

// Functional marker segments
pub const MARKER_SYMBOL_COD: MarkerSymbol = 0xFF52; // Coding style default
pub const MARKER_SYMBOL_QCD: MarkerSymbol = 0xFF5C; // Quantization default

// In bit stream markers
const MARKER_SYMBOL_EPH: MarkerSymbol = 0xFF92; // End of packet header

// Informational marker segments
pub const MARKER_SYMBOL_COM: MarkerSymbol = 0xFF64; // Comment

#[derive(Debug)]
enum MarkerSymbols {
    StartOfCodestream,
    StartOfTile,
    StartOfData,
    EndOfCodestream,
    ImageAndTileSize,
    CodingStyleDefault,
    QuantizationDefault,
    Comment,
    EndOfPacketHeader,
    Other { value: MarkerSymbol },
}

impl MarkerSymbols {
    fn new(value: MarkerSymbol) -> MarkerSymbols {
        match value {
            MARKER_SYMBOL_SOC => MarkerSymbols::StartOfCodestream,
            MARKER_SYMBOL_SOT => MarkerSymbols::StartOfTile,
            MARKER_SYMBOL_SOD => MarkerSymbols::StartOfData,
            MARKER_SYMBOL_EOC => MarkerSymbols::EndOfCodestream,
            MARKER_SYMBOL_SIZ => MarkerSymbols::ImageAndTileSize,
            MARKER_SYMBOL_COD => MarkerSymbols::CodingStyleDefault,
            MARKER_SYMBOL_QCD => MarkerSymbols::QuantizationDefault,
            MARKER_SYMBOL_COM => MarkerSymbols::Comment,
            MARKER_SYMBOL_EPH => MarkerSymbols::EndOfPacketHeader,
            value => MarkerSymbols::Other { value },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionOrder {
    // 0000 0000 Layer-resolution level-component-position progression
    LRLCPP,

    // 0000 0001 Resolution level-layer-component-position progression
    RLLCPP,

    // 0000 0010 Resolution level-position-component-layer progression
    RLPCLP,

    // 0000 0011 Position-component-resolution level-layer progression
    PCRLLP,

    // 0000 0100 Component-position-resolution level-layer progression
    CPRLLP,

    // All other values reserved
    Reserved { value: u8 },
}

impl ProgressionOrder {
    fn new(value: u8) -> ProgressionOrder {
        match value {
            0b0000_0000 => ProgressionOrder::LRLCPP,
            0b0000_0001 => ProgressionOrder::RLLCPP,
            0b0000_0010 => ProgressionOrder::RLPCLP,
            0b0000_0011 => ProgressionOrder::PCRLLP,
            0b0000_0100 => ProgressionOrder::CPRLLP,
            _ => ProgressionOrder::Reserved { value },
        }
    }
}

const MULTIPLE_COMPONENT_TRANSFORMATION_NONE: u8 = 0b_0000_0000;
const MULTIPLE_COMPONENT_TRANSFORMATION_MULTIPLE: u8 = 0b_0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipleComponentTransformation {
    // No multiple component transformation specified.
    None,

    // Component transformation used on components 0, 1, 2 for coding efficiency.
    Multiple,

    // All other values reserved
    Reserved { value: u8 },
}

impl MultipleComponentTransformation {
    fn new(value: u8) -> MultipleComponentTransformation {
        match value {
            MULTIPLE_COMPONENT_TRANSFORMATION_NONE => MultipleComponentTransformation::None,
            MULTIPLE_COMPONENT_TRANSFORMATION_MULTIPLE => MultipleComponentTransformation::Multiple,
            _ => MultipleComponentTransformation::Reserved { value },
        }
    }
}

const TRANSFORMATION_FILTER_IRREVERSIBLE: u8 = 0;
const TRANSFORMATION_FILTER_REVERSIBLE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationFilter {
    // 9-7 irreversible filter
    Irreversible,
    // 5-3 reversible filter
    Reversible,

    // All other values reserved
    Reserved { value: u8 },
}

impl TransformationFilter {
    fn new(value: u8) -> TransformationFilter {
        match value {
            TRANSFORMATION_FILTER_IRREVERSIBLE => TransformationFilter::Irreversible,
            TRANSFORMATION_FILTER_REVERSIBLE => TransformationFilter::Reversible,
            _ => TransformationFilter::Reserved { value },
        }
    }
}

/// Precision and sub-sampling of one image component (Ssiz, XRsiz, YRsiz).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSize {
    precision: u8,
    horizontal_separation: u8,
    vertical_separation: u8,
}

impl ComponentSize {
    /// Raw Ssiz value.
    pub fn precision_u8(&self) -> u8 {
        self.precision
    }

    /// Component bit depth; the low 7 bits of Ssiz hold the depth minus one.
    pub fn precision(&self) -> u8 {
        (self.precision & 0b0111_1111) + 1
    }

    pub fn values_are_signed(&self) -> bool {
        self.precision & 0b1000_0000 != 0
    }

    pub fn horizontal_separation(&self) -> u8 {
        self.horizontal_separation
    }

    pub fn vertical_separation(&self) -> u8 {
        self.vertical_separation
    }
}

// A.5.1
//
// Image and tile size (SIZ)
//
// Function: Provides information about the uncompressed image such as the
// width and height of the reference grid, the width and height of the tiles,
// the number of components, component bit depth, and the separation of
// component samples with respect to the reference grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageAndTileSizeMarkerSegment {
    offset: u64,
    length: u16,

    // Rsiz
    decoder_capabilities: u16,

    // Xsiz, Ysiz
    reference_grid_width: u32,
    reference_grid_height: u32,

    // XOsiz, YOsiz
    image_horizontal_offset: u32,
    image_vertical_offset: u32,

    // XTsiz, YTsiz
    reference_tile_width: u32,
    reference_tile_height: u32,

    // XTOsiz, YTOsiz
    tile_horizontal_offset: u32,
    tile_vertical_offset: u32,

    // Csiz
    no_components: u16,

    components: Vec<ComponentSize>,
}

impl ImageAndTileSizeMarkerSegment {
    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Rsiz: capabilities that a decoder needs to properly decode the
    /// codestream.
    pub fn decoder_capabilities(&self) -> u16 {
        self.decoder_capabilities
    }

    /// Xsiz: width of the reference grid.
    pub fn reference_grid_width(&self) -> u32 {
        self.reference_grid_width
    }

    /// Ysiz: height of the reference grid.
    pub fn reference_grid_height(&self) -> u32 {
        self.reference_grid_height
    }

    /// XOsiz: horizontal offset from the origin of the reference grid to the
    /// left side of the image area.
    pub fn image_horizontal_offset(&self) -> u32 {
        self.image_horizontal_offset
    }

    /// YOsiz: vertical offset from the origin of the reference grid to the
    /// top side of the image area.
    pub fn image_vertical_offset(&self) -> u32 {
        self.image_vertical_offset
    }

    /// XTsiz: width of one reference tile with respect to the reference grid.
    pub fn reference_tile_width(&self) -> u32 {
        self.reference_tile_width
    }

    /// YTsiz: height of one reference tile with respect to the reference grid.
    pub fn reference_tile_height(&self) -> u32 {
        self.reference_tile_height
    }

    /// XTOsiz: horizontal offset from the origin of the reference grid to the
    /// left side of the first tile.
    pub fn tile_horizontal_offset(&self) -> u32 {
        self.tile_horizontal_offset
    }

    /// YTOsiz: vertical offset from the origin of the reference grid to the
    /// top side of the first tile.
    pub fn tile_vertical_offset(&self) -> u32 {
        self.tile_vertical_offset
    }

    /// Csiz: number of components in the image.
    pub fn no_components(&self) -> u16 {
        self.no_components
    }

    pub fn components(&self) -> &[ComponentSize] {
        &self.components
    }
}

// A.6.1
//
// Coding style default (COD)
//
// Function: Describes the coding style, number of decomposition levels,
// and layering that is the default used for compressing all components of
// an image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodingStyleMarkerSegment {
    offset: u64,
    length: u16,

    // Scod
    coding_style: u8,

    // SGcod
    progression_order: u8,
    no_layers: u16,
    multiple_component_transformation: u8,

    // SPcod
    no_decomposition_levels: u8,
    code_block_width: u8,
    code_block_height: u8,
    code_block_style: u8,
    transformation: u8,
}

impl CodingStyleMarkerSegment {
    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn coding_style(&self) -> u8 {
        self.coding_style
    }

    pub fn progression_order_u8(&self) -> u8 {
        self.progression_order
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        ProgressionOrder::new(self.progression_order)
    }

    pub fn no_layers(&self) -> u16 {
        self.no_layers
    }

    pub fn multiple_component_transformation_u8(&self) -> u8 {
        self.multiple_component_transformation
    }

    pub fn multiple_component_transformation(&self) -> MultipleComponentTransformation {
        MultipleComponentTransformation::new(self.multiple_component_transformation)
    }

    /// Number of decomposition levels, zero implies no transformation.
    pub fn no_decomposition_levels(&self) -> u8 {
        self.no_decomposition_levels
    }

    /// Code-block width exponent offset value as stored (xcb - 2).
    pub fn code_block_width(&self) -> u8 {
        self.code_block_width
    }

    /// Code-block height exponent offset value as stored (ycb - 2).
    pub fn code_block_height(&self) -> u8 {
        self.code_block_height
    }

    /// Code-block width and height in samples, 2^(value + 2).
    pub fn code_block_size(&self) -> (u32, u32) {
        (
            1u32 << ((self.code_block_width & 0b0000_1111) + 2),
            1u32 << ((self.code_block_height & 0b0000_1111) + 2),
        )
    }

    pub fn code_block_style(&self) -> u8 {
        self.code_block_style
    }

    pub fn transformation_u8(&self) -> u8 {
        self.transformation
    }

    pub fn transformation(&self) -> TransformationFilter {
        TransformationFilter::new(self.transformation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationStyle {
    No { guard: u8 },
    ScalarDerived { guard: u8 },
    ScalarExpounded { guard: u8 },
    Reserved { value: u8 },
}

impl QuantizationStyle {
    fn new(byte: u8) -> QuantizationStyle {
        // 000x xxxx to 111x xxxx, Number of guard bits: 0 to 7
        let guard = byte >> 5;

        match byte & 0b0001_1111 {
            // No quantization
            0b0000_0000 => QuantizationStyle::No { guard },

            // Scalar derived (values signalled for NLLL subband only).
            0b0000_0001 => QuantizationStyle::ScalarDerived { guard },

            // Scalar expounded (values signalled for each subband).
            0b0000_0010 => QuantizationStyle::ScalarExpounded { guard },

            _ => QuantizationStyle::Reserved { value: byte },
        }
    }
}

// A.6.4
//
// Quantization default (QCD)
//
// Function: Describes the quantization default used for compressing all
// components.
//
// Only the reversible "no quantization" form is interpreted; step sizes of
// the scalar styles are kept out of the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuantizationDefaultMarkerSegment {
    offset: u64,
    length: u16,

    // Sqcd
    quantization_style: u8,

    // SPqcd exponents, one per subband
    exponents: Vec<u8>,
}

impl QuantizationDefaultMarkerSegment {
    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn quantization_style_u8(&self) -> u8 {
        self.quantization_style
    }

    pub fn quantization_style(&self) -> QuantizationStyle {
        QuantizationStyle::new(self.quantization_style)
    }

    pub fn guard_bits(&self) -> u8 {
        self.quantization_style >> 5
    }

    /// Per-subband exponents; empty unless the style is "no quantization".
    pub fn quantization_exponents(&self) -> &[u8] {
        &self.exponents
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentRegistrationValue {
    // General use (binary values)
    Binary,

    // General use (ISO 8859-15:1999 (Latin) values)
    Latin,

    // All other values reserved
    Reserved { value: u16 },
}

impl CommentRegistrationValue {
    fn new(value: u16) -> CommentRegistrationValue {
        match value {
            0 => CommentRegistrationValue::Binary,
            1 => CommentRegistrationValue::Latin,
            _ => CommentRegistrationValue::Reserved { value },
        }
    }
}

// A.9.2
//
// Comment (COM)
//
// Allows unstructured data in the main and tile-part header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentMarkerSegment {
    // Rcom
    registration_value: u16,

    // Ccom
    comment: Vec<u8>,
}

impl CommentMarkerSegment {
    pub fn registration_value(&self) -> CommentRegistrationValue {
        CommentRegistrationValue::new(self.registration_value)
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn comment_utf8(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.comment)
    }
}

/// One SOT/SOD framed tile-part and its compressed bit stream.
///
/// The payload is opaque: packet headers and code-block data are left to a
/// downstream decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tile {
    offset: u64,

    // Isot
    tile_index: u16,

    // Psot: length from the first byte of the SOT marker to the end of the
    // tile-part data.
    tile_part_length: u32,

    // TPsot
    tile_part_index: u8,

    // TNsot, zero when not specified in this tile-part.
    no_tile_parts: u8,

    data: Vec<u8>,
}

impl Tile {
    /// Byte offset of the SOT marker.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn tile_index(&self) -> u16 {
        self.tile_index
    }

    pub fn tile_part_length(&self) -> u32 {
        self.tile_part_length
    }

    pub fn tile_part_index(&self) -> u8 {
        self.tile_part_index
    }

    pub fn no_tile_parts(&self) -> u8 {
        self.no_tile_parts
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

// Contiguous Codestream
//
// The main header (SIZ, COD, QCD and any other marker segments) followed by
// the tile-parts, bracketed by the SOC and EOC markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContiguousCodestream {
    offset: u64,
    length: u64,
    image_and_tile_size: ImageAndTileSizeMarkerSegment,
    coding_style: CodingStyleMarkerSegment,
    quantization_default: QuantizationDefaultMarkerSegment,
    comments: Vec<CommentMarkerSegment>,
    tiles: Vec<Tile>,
}

impl ContiguousCodestream {
    /// Byte offset of the SOC marker.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes consumed, SOC through EOC.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn image_and_tile_size_marker_segment(&self) -> &ImageAndTileSizeMarkerSegment {
        &self.image_and_tile_size
    }

    pub fn coding_style_marker_segment(&self) -> &CodingStyleMarkerSegment {
        &self.coding_style
    }

    pub fn quantization_default_marker_segment(&self) -> &QuantizationDefaultMarkerSegment {
        &self.quantization_default
    }

    pub fn comment_marker_segments(&self) -> &[CommentMarkerSegment] {
        &self.comments
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }
}

// Lsot + Isot + Psot + TPsot + TNsot
const SOT_SEGMENT_LENGTH: u16 = 2 + 2 + 4 + 1 + 1;

// Lcod + Scod + SGcod + SPcod without precinct sizes
const COD_SEGMENT_MIN_LENGTH: u16 = 12;

// Lqcd + Sqcd
const QCD_SEGMENT_MIN_LENGTH: u16 = 3;

// Lsiz .. Csiz, followed by 3 bytes per component
const SIZ_SEGMENT_FIXED_LENGTH: u16 = 38;

// Lcom + Rcom
const COM_SEGMENT_MIN_LENGTH: u16 = 4;

const MARKER_LENGTH: u64 = 2;

/// Walks one codestream of a known byte length.
///
/// Every read is taken out of a [Budget] first; the main header and tile loop
/// runs until only the EOC marker is left.
struct CodestreamDecoder<'a, S> {
    source: &'a mut S,
    budget: Budget,
}

impl<'a, S: ByteSource> CodestreamDecoder<'a, S> {
    fn take(&mut self, count: u64) -> Result<(), CodestreamError> {
        let offset = self.source.position();
        self.budget
            .consume(count)
            .map_err(|Shortfall { needed, available }| CodestreamError::Overrun {
                needed,
                available,
                offset,
            })
    }

    fn decode_marker(&mut self) -> Result<MarkerSymbol, CodestreamError> {
        self.take(MARKER_LENGTH)?;
        let offset = self.source.position();
        let value = self.source.read_u16()?;
        if value & 0xFF00 != 0xFF00 {
            return Err(CodestreamError::MarkerInvalid { value, offset });
        }
        Ok(value)
    }

    fn expect_marker(&mut self, expected: MarkerSymbol) -> Result<(), CodestreamError> {
        let offset = self.source.position();
        self.take(MARKER_LENGTH)?;
        let actual = self.source.read_u16()?;
        if actual != expected {
            return Err(CodestreamError::MarkerUnexpected {
                expected,
                actual,
                offset,
            });
        }
        Ok(())
    }

    // Length of marker segment in bytes (not including the marker). The
    // whole segment is taken from the budget before any of its body is read.
    fn decode_length(
        &mut self,
        marker: MarkerSymbol,
        minimum: u16,
    ) -> Result<u16, CodestreamError> {
        let offset = self.source.position();
        self.take(2)?;
        let length = self.source.read_u16()?;
        if length < minimum {
            return Err(CodestreamError::SegmentLengthTooShort {
                marker,
                length,
                minimum,
                offset,
            });
        }
        self.take(length as u64 - 2)?;
        Ok(length)
    }

    fn decode_siz(&mut self) -> Result<ImageAndTileSizeMarkerSegment, CodestreamError> {
        let offset = self.source.position();
        info!("SIZ start at byte offset {}", offset - 2);
        let length = self.decode_length(MARKER_SYMBOL_SIZ, SIZ_SEGMENT_FIXED_LENGTH)?;

        let mut segment = ImageAndTileSizeMarkerSegment {
            offset,
            length,
            decoder_capabilities: self.source.read_u16()?,
            reference_grid_width: self.source.read_u32()?,
            reference_grid_height: self.source.read_u32()?,
            image_horizontal_offset: self.source.read_u32()?,
            image_vertical_offset: self.source.read_u32()?,
            reference_tile_width: self.source.read_u32()?,
            reference_tile_height: self.source.read_u32()?,
            tile_horizontal_offset: self.source.read_u32()?,
            tile_vertical_offset: self.source.read_u32()?,
            no_components: self.source.read_u16()?,
            components: vec![],
        };

        let expected = SIZ_SEGMENT_FIXED_LENGTH as u64 + 3 * segment.no_components as u64;
        if length as u64 != expected {
            return Err(CodestreamError::SegmentLengthMismatch {
                marker: MARKER_SYMBOL_SIZ,
                length,
                expected,
                offset,
            });
        }

        segment.components = Vec::with_capacity(segment.no_components as usize);
        for _ in 0..segment.no_components {
            segment.components.push(ComponentSize {
                precision: self.source.read_u8()?,
                horizontal_separation: self.source.read_u8()?,
                vertical_separation: self.source.read_u8()?,
            });
        }

        debug!(
            "SIZ grid {}x{} tile {}x{} components {}",
            segment.reference_grid_width,
            segment.reference_grid_height,
            segment.reference_tile_width,
            segment.reference_tile_height,
            segment.no_components
        );
        info!("SIZ end at byte offset {}", self.source.position());

        Ok(segment)
    }

    fn decode_cod(&mut self) -> Result<CodingStyleMarkerSegment, CodestreamError> {
        let offset = self.source.position();
        info!("COD start at byte offset {}", offset - 2);
        let length = self.decode_length(MARKER_SYMBOL_COD, COD_SEGMENT_MIN_LENGTH)?;

        let segment = CodingStyleMarkerSegment {
            offset,
            length,
            coding_style: self.source.read_u8()?,
            progression_order: self.source.read_u8()?,
            no_layers: self.source.read_u16()?,
            multiple_component_transformation: self.source.read_u8()?,
            no_decomposition_levels: self.source.read_u8()?,
            code_block_width: self.source.read_u8()?,
            code_block_height: self.source.read_u8()?,
            code_block_style: self.source.read_u8()?,
            transformation: self.source.read_u8()?,
        };

        // Scod xxxx xxx1: precinct sizes follow for every resolution level
        if segment.coding_style & 0b0000_0001 != 0 {
            return Err(CodestreamError::UnsupportedPrecinctSizes {
                coding_style: segment.coding_style,
                offset,
            });
        }

        let trailing = (length - COD_SEGMENT_MIN_LENGTH) as u64;
        if trailing > 0 {
            warn!("COD has {} unexpected trailing bytes, skipping", trailing);
            self.source.skip(trailing)?;
        }

        debug!(
            "COD style {} progression {:?} layers {} levels {}",
            segment.coding_style,
            segment.progression_order(),
            segment.no_layers,
            segment.no_decomposition_levels
        );
        info!("COD end at byte offset {}", self.source.position());

        Ok(segment)
    }

    fn decode_qcd(&mut self) -> Result<QuantizationDefaultMarkerSegment, CodestreamError> {
        let offset = self.source.position();
        info!("QCD start at byte offset {}", offset - 2);
        let length = self.decode_length(MARKER_SYMBOL_QCD, QCD_SEGMENT_MIN_LENGTH)?;

        let quantization_style = self.source.read_u8()?;
        let values_length = (length - QCD_SEGMENT_MIN_LENGTH) as usize;

        let mut exponents = vec![];
        match QuantizationStyle::new(quantization_style) {
            QuantizationStyle::No { .. } => {
                // One byte per subband, the exponent in the 5 most
                // significant bits.
                exponents = self
                    .source
                    .read_bytes(values_length)?
                    .into_iter()
                    .map(|value| value >> 3)
                    .collect();
            }
            style => {
                debug!("QCD style {:?} step sizes skipped", style);
                self.source.skip(values_length as u64)?;
            }
        }

        info!("QCD end at byte offset {}", self.source.position());

        Ok(QuantizationDefaultMarkerSegment {
            offset,
            length,
            quantization_style,
            exponents,
        })
    }

    fn decode_com(&mut self) -> Result<CommentMarkerSegment, CodestreamError> {
        let offset = self.source.position();
        info!("COM start at byte offset {}", offset - 2);
        let length = self.decode_length(MARKER_SYMBOL_COM, COM_SEGMENT_MIN_LENGTH)?;

        let registration_value = self.source.read_u16()?;
        let comment = self
            .source
            .read_bytes((length - COM_SEGMENT_MIN_LENGTH) as usize)?;

        Ok(CommentMarkerSegment {
            registration_value,
            comment,
        })
    }

    // A.4.2 Start of tile-part (SOT), immediately followed by SOD and the
    // tile-part bit stream.
    fn decode_tile(&mut self) -> Result<Tile, CodestreamError> {
        let offset = self.source.position() - MARKER_LENGTH;
        info!("SOT start at byte offset {}", offset);
        let length = self.decode_length(MARKER_SYMBOL_SOT, SOT_SEGMENT_LENGTH)?;
        if length != SOT_SEGMENT_LENGTH {
            return Err(CodestreamError::SegmentLengthMismatch {
                marker: MARKER_SYMBOL_SOT,
                length,
                expected: SOT_SEGMENT_LENGTH as u64,
                offset: offset + MARKER_LENGTH,
            });
        }

        let tile_index = self.source.read_u16()?;
        let tile_part_length = self.source.read_u32()?;
        let tile_part_index = self.source.read_u8()?;
        let no_tile_parts = self.source.read_u8()?;

        self.expect_marker(MARKER_SYMBOL_SOD)?;

        // Psot counts the SOT marker, the SOT segment and the SOD marker
        let header_length = (MARKER_LENGTH + length as u64 + MARKER_LENGTH) as u32;
        let data_length = tile_part_length.checked_sub(header_length).ok_or(
            CodestreamError::TileLengthUnderflow {
                psot: tile_part_length,
                header_length,
                offset,
            },
        )?;

        self.take(data_length as u64)?;
        let data = self.source.read_bytes(data_length as usize)?;

        debug!(
            "Tile {} part {} of {} with {} bytes",
            tile_index, tile_part_index, no_tile_parts, data_length
        );
        info!("Tile end at byte offset {}", self.source.position());

        Ok(Tile {
            offset,
            tile_index,
            tile_part_length,
            tile_part_index,
            no_tile_parts,
            data,
        })
    }

    fn skip_segment(&mut self, marker: MarkerSymbol) -> Result<(), CodestreamError> {
        let length = self.decode_length(marker, 2)?;
        warn!(
            "Skipping marker 0x{:04X} segment of {} bytes at byte offset {}",
            marker,
            length,
            self.source.position() - 2
        );
        self.source.skip(length as u64 - 2)?;
        Ok(())
    }

    fn decode(&mut self) -> Result<ContiguousCodestream, CodestreamError> {
        let offset = self.source.position();

        // SOC (Required as the first marker)
        self.expect_marker(MARKER_SYMBOL_SOC)?;
        info!("SOC start at byte offset {}", offset);

        // SIZ (Required as the second marker segment)
        self.expect_marker(MARKER_SYMBOL_SIZ)?;
        let image_and_tile_size = self.decode_siz()?;

        let mut coding_style: Option<CodingStyleMarkerSegment> = None;
        let mut quantization_default: Option<QuantizationDefaultMarkerSegment> = None;
        let mut comments = vec![];
        let mut tiles = vec![];

        // The last two bytes belong to EOC
        while self.budget.remaining() > MARKER_LENGTH {
            let marker_offset = self.source.position();
            let marker = self.decode_marker()?;

            match MarkerSymbols::new(marker) {
                MarkerSymbols::CodingStyleDefault => {
                    if coding_style.is_some() {
                        return Err(CodestreamError::MarkerDuplicate {
                            marker,
                            offset: marker_offset,
                        });
                    }
                    coding_style = Some(self.decode_cod()?);
                }
                MarkerSymbols::QuantizationDefault => {
                    if quantization_default.is_some() {
                        return Err(CodestreamError::MarkerDuplicate {
                            marker,
                            offset: marker_offset,
                        });
                    }
                    quantization_default = Some(self.decode_qcd()?);
                }
                MarkerSymbols::StartOfTile => {
                    tiles.push(self.decode_tile()?);
                }
                MarkerSymbols::Comment => {
                    comments.push(self.decode_com()?);
                }
                MarkerSymbols::Other { value } => {
                    self.skip_segment(value)?;
                }
                // Delimiters without a segment cannot appear here
                MarkerSymbols::StartOfCodestream
                | MarkerSymbols::StartOfData
                | MarkerSymbols::EndOfCodestream
                | MarkerSymbols::EndOfPacketHeader
                | MarkerSymbols::ImageAndTileSize => {
                    return Err(CodestreamError::MarkerOutOfPlace {
                        marker,
                        offset: marker_offset,
                    });
                }
            }
        }

        if self.budget.remaining() != MARKER_LENGTH {
            return Err(CodestreamError::EndOfCodestreamMisaligned {
                remaining: self.budget.remaining(),
            });
        }

        let eoc_offset = self.source.position();
        self.expect_marker(MARKER_SYMBOL_EOC)?;
        info!("EOC at byte offset {}", eoc_offset);

        let coding_style = coding_style.ok_or(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_COD,
        })?;
        let quantization_default = quantization_default.ok_or(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_QCD,
        })?;

        Ok(ContiguousCodestream {
            offset,
            length: self.budget.consumed(),
            image_and_tile_size,
            coding_style,
            quantization_default,
            comments,
            tiles,
        })
    }
}

/// Decode a codestream of `length` bytes starting at the current position of
/// `source`, e.g. the payload of a Contiguous Codestream box.
///
/// On success exactly `length` bytes have been consumed.
pub fn decode_jpc<S: ByteSource>(
    source: &mut S,
    length: u64,
) -> Result<ContiguousCodestream, CodestreamError> {
    let mut decoder = CodestreamDecoder {
        source,
        budget: Budget::new(length),
    };
    decoder.decode()
}
