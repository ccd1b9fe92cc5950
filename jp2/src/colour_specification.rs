use jpc::ByteSource;
use log::{debug, info, warn};

use crate::{BoxHeader, BoxType, JBox, JP2Error, BOX_TYPE_COLOUR_SPECIFICATION};

const METHOD_ENUMERATED_COLOUR_SPACE: u8 = 1;
const METHOD_RESTRICTED_ICC_PROFILE: u8 = 2;

// METH + PREC + APPROX
const COLOUR_SPECIFICATION_FIXED_LENGTH: u64 = 3;

// Fixed fields followed by a 4 byte EnumCS
const COLOUR_SPECIFICATION_ENUMERATED_LENGTH: u64 = 7;

/// Colour space value reported when the box does not use an enumerated
/// colour space.
pub const COLOUR_SPACE_NOT_ENUMERATED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourSpecificationMethods {
    EnumeratedColourSpace,
    RestrictedICCProfile,
    Reserved { value: u8 },
}

impl ColourSpecificationMethods {
    fn new(value: u8) -> ColourSpecificationMethods {
        match value {
            METHOD_ENUMERATED_COLOUR_SPACE => ColourSpecificationMethods::EnumeratedColourSpace,
            METHOD_RESTRICTED_ICC_PROFILE => ColourSpecificationMethods::RestrictedICCProfile,
            value => ColourSpecificationMethods::Reserved { value },
        }
    }
}

const ENUMERATED_COLOUR_SPACE_SRGB: i64 = 16;
const ENUMERATED_COLOUR_SPACE_GREYSCALE: i64 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumeratedColourSpaces {
    #[allow(non_camel_case_types)]
    sRGB,
    Greyscale,
    Reserved { value: u32 },
}

// I.5.3.3
//
// Colour Specification box
//
// Each Colour Specification box defines one method by which an application can
// interpret the colourspace of the decompressed image data.
//
// A JP2 file may contain multiple Colour Specification boxes; a conforming JP2
// reader uses the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColourSpecificationBox {
    length: u64,
    offset: u64,
    method: u8,
    precedence: u8,
    colourspace_approximation: u8,
    colour_space: i64,
    profile_length: u64,
}

impl ColourSpecificationBox {
    pub fn method(&self) -> ColourSpecificationMethods {
        ColourSpecificationMethods::new(self.method)
    }

    pub fn method_u8(&self) -> u8 {
        self.method
    }

    // Reserved, readers shall ignore the value of this field.
    pub fn precedence(&self) -> i8 {
        self.precedence as i8
    }

    // Readers shall ignore the value of this field.
    pub fn colourspace_approximation(&self) -> u8 {
        self.colourspace_approximation
    }

    /// Enumerated colour space (EnumCS), or -1 when the box uses any method
    /// other than an enumerated colour space.
    pub fn colour_space(&self) -> i64 {
        self.colour_space
    }

    pub fn enumerated_colour_space(&self) -> Option<EnumeratedColourSpaces> {
        match self.colour_space {
            COLOUR_SPACE_NOT_ENUMERATED => None,
            ENUMERATED_COLOUR_SPACE_SRGB => Some(EnumeratedColourSpaces::sRGB),
            ENUMERATED_COLOUR_SPACE_GREYSCALE => Some(EnumeratedColourSpaces::Greyscale),
            value => Some(EnumeratedColourSpaces::Reserved {
                value: value as u32,
            }),
        }
    }

    /// Number of ICC profile or vendor bytes skipped without interpretation.
    pub fn profile_length(&self) -> u64 {
        self.profile_length
    }
}

impl JBox for ColourSpecificationBox {
    // The type of a Colour Specification box shall be ‘colr’ (0x636F 6C72).
    fn identifier(&self) -> BoxType {
        BOX_TYPE_COLOUR_SPECIFICATION
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

pub(crate) fn decode_colour_specification<S: ByteSource>(
    source: &mut S,
    header: &BoxHeader,
) -> Result<(ColourSpecificationBox, u64), JP2Error> {
    let length = header.box_length;
    let offset = source.position();
    if length < COLOUR_SPECIFICATION_FIXED_LENGTH {
        return Err(JP2Error::BoxLengthTooShort {
            box_type: header.box_type,
            length,
            minimum: COLOUR_SPECIFICATION_FIXED_LENGTH,
            offset: header.offset,
        });
    }
    info!("ColourSpecificationBox start at {:?}", offset);

    let mut colour_specification_box = ColourSpecificationBox {
        length,
        offset,
        method: source.read_u8()?,
        precedence: source.read_u8()?,
        colourspace_approximation: source.read_u8()?,
        colour_space: COLOUR_SPACE_NOT_ENUMERATED,
        profile_length: 0,
    };
    let mut consumed = COLOUR_SPECIFICATION_FIXED_LENGTH;

    if colour_specification_box.precedence != 0 {
        warn!(
            "Precedence {:?} unexpected",
            colour_specification_box.precedence()
        );
    }
    if colour_specification_box.colourspace_approximation != 0 {
        warn!(
            "Colourspace Approximation {:?} unexpected",
            colour_specification_box.colourspace_approximation
        );
    }
    debug!("Method {:?}", colour_specification_box.method());

    match colour_specification_box.method() {
        // EnumCS is the last field in the box
        ColourSpecificationMethods::EnumeratedColourSpace => {
            if length != COLOUR_SPECIFICATION_ENUMERATED_LENGTH {
                return Err(JP2Error::BoxLengthMismatch {
                    box_type: header.box_type,
                    expected: COLOUR_SPECIFICATION_ENUMERATED_LENGTH,
                    actual: length,
                    offset: header.offset,
                });
            }
            colour_specification_box.colour_space = source.read_u32()? as i64;
            consumed += 4;
            debug!(
                "Enumerated Colour Space {:?}",
                colour_specification_box.colour_space
            );
        }

        // The ICC profile is left to a colour managed consumer
        ColourSpecificationMethods::RestrictedICCProfile => {
            let profile_length = length - COLOUR_SPECIFICATION_FIXED_LENGTH;
            debug!("Skipping restricted ICC profile of {} bytes", profile_length);
            source.skip(profile_length)?;
            colour_specification_box.profile_length = profile_length;
            consumed += profile_length;
        }

        ColourSpecificationMethods::Reserved { value } => {
            let profile_length = length - COLOUR_SPECIFICATION_FIXED_LENGTH;
            warn!(
                "Colour specification method {} not supported, skipping {} bytes",
                value, profile_length
            );
            source.skip(profile_length)?;
            colour_specification_box.profile_length = profile_length;
            consumed += profile_length;
        }
    }

    info!("ColourSpecificationBox finish at {:?}", source.position());

    Ok((colour_specification_box, consumed))
}
