use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use log::{debug, error};

use containerparser::bits::reader::fourcc_to_string;
use containerparser::id3::frames::{remove_unsynchronisation, walk_frames};
use containerparser::id3::{extended_header_len, parse_header, ID3_HEADER_LEN};
use containerparser::isobmff::children_start;
use containerparser::metadata::read_head;
use containerparser::sfnt::read_directory;
use containerparser::streams::{read_at, Hdf5Record};
use containerparser::{
    stream_dicom_elements, stream_fits_headers, stream_hdf5_structure, ContainerFormat,
    ContainerUnit, DecoderRegistry, HeaderShape, LocalSeekableStream, ParserConfig,
    SeekableStream, Step, UnitCursor,
};

/// Print the structural metadata of a container file
#[derive(Parser, Debug)]
#[command(name = "container_scan")]
#[command(about = "Extract structural metadata from RIFF, ISOBMFF, SFNT, DICOM, ID3v2, FITS and HDF5 files")]
#[command(version)]
struct Cli {
    /// File to scan
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Print the unit tree with offsets and sizes instead of the field set
    #[arg(long)]
    tree: bool,

    /// JSON parser configuration
    #[arg(long, value_name = "JSON")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => match ParserConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(2);
            }
        },
        None => ParserConfig::default(),
    };
    let registry = match DecoderRegistry::new(&config) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    let result = if cli.tree {
        print_tree(&registry, &cli.path).map_err(|e| e.to_string())
    } else {
        registry
            .extract_path(&cli.path)
            .map_err(|e| e.to_string())
            .and_then(|fields| fields.to_json().map_err(|e| e.to_string()))
            .map(|json| println!("{}", json))
    };
    if let Err(e) = result {
        error!("{}: {}", cli.path.display(), e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn print_tree(registry: &DecoderRegistry, path: &Path) -> io::Result<()> {
    let mut stream = LocalSeekableStream::open(path)?;
    let format = registry.detect(&mut stream)?;
    println!("{} ({}, {} bytes)", path.display(), format.display_name(), stream.total_len()?);
    let limits = &registry.context().limits;

    match format {
        ContainerFormat::Wav | ContainerFormat::Webp => {
            let cursor = UnitCursor::new(&mut stream, HeaderShape::Riff)?
                .with_limits(limits.max_depth, limits.max_units);
            print_units(cursor, riff_children)
        }
        ContainerFormat::IsoBmff => {
            let cursor = UnitCursor::new(&mut stream, HeaderShape::IsoBmff)?
                .with_limits(limits.max_depth, limits.max_units);
            print_units(cursor, children_start)
        }
        ContainerFormat::Sfnt => print_sfnt(&mut stream),
        ContainerFormat::Dicom => {
            for record in stream_dicom_elements(&mut stream)? {
                let record = record?;
                println!(
                    "{}{} {} [offset: {}, length: {}]",
                    "  ".repeat(record.depth + 1),
                    record.tag,
                    record.vr.as_deref().unwrap_or("--"),
                    record.offset,
                    record.length.map_or("undefined".to_string(), |l| l.to_string())
                );
            }
            Ok(())
        }
        ContainerFormat::Id3 => print_id3(&mut stream),
        ContainerFormat::Fits => {
            let mut hdu = None;
            for card in stream_fits_headers(&mut stream)? {
                let card = card?;
                if hdu != Some(card.hdu) {
                    println!("  HDU {}", card.hdu);
                    hdu = Some(card.hdu);
                }
                match &card.value {
                    Some(value) => println!("    {} = {}", card.keyword, value),
                    None => println!("    {}", card.keyword),
                }
            }
            Ok(())
        }
        ContainerFormat::Hdf5 => {
            for record in stream_hdf5_structure(&mut stream)? {
                match record? {
                    Hdf5Record::Error { message } => println!("  error: {}", message),
                    record => println!("  {}", serde_json::to_string(&record)?),
                }
            }
            Ok(())
        }
        ContainerFormat::Unknown => {
            println!("  no unit tree for unrecognised data");
            Ok(())
        }
    }
}

/// Walk every unit depth first. `children` says where a unit's children
/// start inside its payload, if it has any.
fn print_units<F>(mut cursor: UnitCursor<'_>, mut children: F) -> io::Result<()>
where
    F: FnMut(&mut UnitCursor<'_>, &ContainerUnit, Option<&[u8; 4]>) -> io::Result<Option<u64>>,
{
    let mut path: Vec<[u8; 4]> = Vec::new();
    loop {
        let unit = match cursor.next_unit()? {
            Step::Unit(unit) => unit,
            Step::End => {
                if !cursor.leave() {
                    break;
                }
                path.pop();
                continue;
            }
            Step::Malformed(e) => {
                println!("{}! {}", "  ".repeat(path.len() + 1), e);
                continue;
            }
        };
        let code = unit.tag.fourcc().copied().unwrap_or_default();
        println!(
            "{}{} [offset: {}, size: {}{}]",
            "  ".repeat(path.len() + 1),
            fourcc_to_string(&code),
            unit.header_offset,
            unit.total_length(),
            if unit.truncated { ", truncated" } else { "" }
        );
        match children(&mut cursor, &unit, path.last())? {
            Some(skip) => match cursor.enter(&unit, skip) {
                Ok(()) => path.push(code),
                Err(e) => debug!("not entering {}: {}", fourcc_to_string(&code), e),
            },
            None => cursor.skip(&unit),
        }
    }
    Ok(())
}

/// The form chunk and `LIST` chunks hold a 4-byte type, then chunks.
fn riff_children(
    _cursor: &mut UnitCursor<'_>,
    unit: &ContainerUnit,
    parent: Option<&[u8; 4]>,
) -> io::Result<Option<u64>> {
    let form = parent.is_none() && matches!(unit.tag.fourcc(), Some(b"RIFF" | b"RF64" | b"BW64"));
    Ok((form || unit.tag.is(b"LIST")).then_some(4))
}

fn print_sfnt(stream: &mut dyn SeekableStream) -> io::Result<()> {
    let directory = match read_directory(stream)? {
        Ok(directory) => directory,
        Err(e) => {
            println!("  {}", e);
            return Ok(());
        }
    };
    println!(
        "  {} tables, {}",
        directory.offset_table.num_tables,
        directory.offset_table.scaler.flavor()
    );
    for entry in &directory.entries {
        println!(
            "  {} [offset: {}, size: {}, checksum: {:08X}]",
            entry.tag_string(),
            entry.offset,
            entry.length,
            entry.checksum
        );
    }
    Ok(())
}

fn print_id3(stream: &mut dyn SeekableStream) -> io::Result<()> {
    let head = read_head(stream, ID3_HEADER_LEN)?;
    let header = match parse_header(&head) {
        Ok(header) => header,
        Err(e) => {
            println!("  {}", e);
            return Ok(());
        }
    };
    println!("  ID3v2.{}.{} [size: {}]", header.major, header.revision, header.size);
    let mut body = read_at(stream, ID3_HEADER_LEN as u64, header.size as usize)?;
    if header.unsynchronisation() && header.major < 4 {
        body = remove_unsynchronisation(&body);
    }
    let start = if header.major >= 3 && header.extended_header() {
        match extended_header_len(&body, header.major) {
            Ok(len) => len,
            Err(e) => {
                println!("  ! {}", e);
                return Ok(());
            }
        }
    } else {
        0
    };
    let (frames, stopped) = walk_frames(&body[start..], header.major);
    for frame in &frames {
        println!(
            "    {} [body offset: {}, size: {}]",
            frame.id,
            start + frame.offset,
            frame.data.len()
        );
    }
    if let Some(e) = stopped {
        println!("    ! {}", e);
    }
    Ok(())
}
