use clap::Parser;
use log::info;
use std::error;
use std::error::Error;
use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use jp2::{decode_jp2_with_options, DecodeOptions, JP2File};
use jpc::{decode_jpc, ContiguousCodestream, Reader};

#[derive(Debug)]
enum JP2000Error {
    DecodingContainer { error: String, kind: jp2::ErrorKind },
    DecodingCodestream { error: String, kind: jpc::ErrorKind },
    UnsupportedExtension { extension: String },
}

impl error::Error for JP2000Error {}
impl fmt::Display for JP2000Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DecodingContainer { error, kind } => {
                write!(f, "error decoding jp2 container ({:?}) {}", kind, error)
            }
            Self::DecodingCodestream { error, kind } => {
                write!(f, "error decoding jpc codestream ({:?}) {}", kind, error)
            }
            Self::UnsupportedExtension { extension } => {
                write!(f, "unsupported extension {:?}", extension)
            }
        }
    }
}

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Decode .jp2 container or .jpc codestream file structure (noop)
    Decode(Decode),

    /// Print a summary of a .jp2 container or .jpc codestream file (stdout)
    Info(Info),
}

#[derive(Parser)]
struct Decode {
    /// Path to .jp2, .jpc or .j2c file
    path: String,

    /// Skip the comparison of the signature box against the JP2 signature
    #[clap(long)]
    no_verify_signature: bool,
}

#[derive(Parser)]
struct Info {
    /// Path to .jp2, .jpc or .j2c file
    path: String,

    /// Skip the comparison of the signature box against the JP2 signature
    #[clap(long)]
    no_verify_signature: bool,
}

enum Decoded {
    Container(JP2File),
    Codestream(ContiguousCodestream),
}

fn decode_path(path: &str, verify_signature: bool) -> Result<Decoded, Box<dyn Error>> {
    let path = Path::new(path);
    let extension = path.extension().and_then(OsStr::to_str).unwrap_or("");

    match extension {
        "jp2" => {
            let mut reader = Reader::new(BufReader::new(File::open(path)?))?;
            let options = DecodeOptions { verify_signature };
            match decode_jp2_with_options(&mut reader, &options) {
                Ok(jp2) => Ok(Decoded::Container(jp2)),
                Err(error) => Err(JP2000Error::DecodingContainer {
                    error: error.to_string(),
                    kind: error.kind(),
                }
                .into()),
            }
        }
        "jpc" | "j2c" => {
            let mut reader = Reader::new(BufReader::new(File::open(path)?))?;
            let length = reader.length();
            match decode_jpc(&mut reader, length) {
                Ok(codestream) => Ok(Decoded::Codestream(codestream)),
                Err(error) => Err(JP2000Error::DecodingCodestream {
                    error: error.to_string(),
                    kind: error.kind(),
                }
                .into()),
            }
        }
        _ => Err(JP2000Error::UnsupportedExtension {
            extension: extension.to_owned(),
        }
        .into()),
    }
}

fn print_jp2(jp2: &JP2File) {
    let file_type = jp2.file_type_box();
    println!("File type");
    println!("  brand: {:?}", file_type.brand());
    println!("  minor version: {}", file_type.min_version());
    println!(
        "  compatibility list: {:?}",
        file_type.compatibility_list()
    );

    let image_header = jp2.image_header_box();
    println!("Image header");
    println!(
        "  size: {}x{}",
        image_header.width(),
        image_header.height()
    );
    println!("  components: {}", image_header.components_num());
    println!("  bits per component: {}", image_header.components_bits());
    println!("  colourspace unknown: {}", image_header.colourspace_unknown());
    println!(
        "  intellectual property: {}",
        image_header.intellectual_property()
    );

    for colour in jp2.colour_specification_boxes() {
        println!("Colour specification");
        println!("  method: {:?}", colour.method());
        println!("  colour space: {}", colour.colour_space());
        if colour.profile_length() > 0 {
            println!("  skipped profile bytes: {}", colour.profile_length());
        }
    }

    if let Some(channel_definition) = jp2.channel_definition_box() {
        println!("Channel definition");
        for channel in channel_definition.channels() {
            println!(
                "  channel {} type {:?} association {}",
                channel.channel_index(),
                channel.channel_type(),
                channel.channel_association()
            );
        }
    }

    println!("XML boxes: {}", jp2.xml_boxes().len());

    for codestream_box in jp2.contiguous_codestreams_boxes() {
        print_codestream(codestream_box.codestream());
    }
}

fn print_codestream(codestream: &ContiguousCodestream) {
    println!("Codestream at offset {}", codestream.offset());

    let siz = codestream.image_and_tile_size_marker_segment();
    println!(
        "  reference grid: {}x{} offset ({}, {})",
        siz.reference_grid_width(),
        siz.reference_grid_height(),
        siz.image_horizontal_offset(),
        siz.image_vertical_offset()
    );
    println!(
        "  reference tile: {}x{} offset ({}, {})",
        siz.reference_tile_width(),
        siz.reference_tile_height(),
        siz.tile_horizontal_offset(),
        siz.tile_vertical_offset()
    );
    for (index, component) in siz.components().iter().enumerate() {
        println!(
            "  component {}: {} bits{} sub-sampling {}x{}",
            index,
            component.precision(),
            if component.values_are_signed() {
                " signed"
            } else {
                ""
            },
            component.horizontal_separation(),
            component.vertical_separation()
        );
    }

    let cod = codestream.coding_style_marker_segment();
    let (code_block_width, code_block_height) = cod.code_block_size();
    println!("  progression order: {:?}", cod.progression_order());
    println!("  layers: {}", cod.no_layers());
    println!("  decomposition levels: {}", cod.no_decomposition_levels());
    println!(
        "  code-block: {}x{}",
        code_block_width, code_block_height
    );
    println!("  transformation: {:?}", cod.transformation());

    let qcd = codestream.quantization_default_marker_segment();
    println!("  quantization: {:?}", qcd.quantization_style());
    if !qcd.quantization_exponents().is_empty() {
        println!("  exponents: {:?}", qcd.quantization_exponents());
    }

    for comment in codestream.comment_marker_segments() {
        match comment.comment_utf8() {
            Ok(text) => println!("  comment: {:?}", text),
            Err(_) => println!("  comment: {} bytes", comment.comment().len()),
        }
    }

    println!("  tiles: {}", codestream.tiles().len());
    for tile in codestream.tiles() {
        println!(
            "    tile {} part {} of {}: {} bytes",
            tile.tile_index(),
            tile.tile_part_index(),
            tile.no_tile_parts(),
            tile.data().len()
        );
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opts: Opts = Opts::parse();

    match opts.subcommand {
        SubCommand::Decode(c) => {
            decode_path(&c.path, !c.no_verify_signature)?;
            info!("Decoded {}", c.path);
        }
        SubCommand::Info(c) => match decode_path(&c.path, !c.no_verify_signature)? {
            Decoded::Container(jp2) => print_jp2(&jp2),
            Decoded::Codestream(codestream) => print_codestream(&codestream),
        },
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    match run() {
        Err(e) => Err(e.to_string().into()),
        Ok(_) => Ok(()),
    }
}
