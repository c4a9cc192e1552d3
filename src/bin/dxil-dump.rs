use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use dxil_dump::container::DxbcContainer;
use dxil_dump::decode::BitstreamDecoder;
use dxil_dump::header::{DebugName, Features, ProgramHeader};
use dxil_dump::render::TreeRenderer;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors the CLI raises itself, on top of the library's [`dxil_dump::DecodeError`].
#[derive(Debug, Error)]
enum CliError {
    #[error("no bitcode chunk (DXIL or ILDB) found in container")]
    NoBitcodeChunk,
}

/// Dump the structure of a DXBC container and its DXIL/LLVM bitcode chunk.
#[derive(Debug, Parser)]
#[command(version)]
struct CommandLine {
    /// Path to a DXBC container (a compiled DXIL shader)
    file: PathBuf,

    /// Render metadata records with the debug-info pretty-printer
    #[clap(long, default_value_t = true, overrides_with = "no_pretty_metadata")]
    pretty_metadata: bool,

    /// Disable the metadata pretty-printer; print every record generically
    #[clap(long)]
    no_pretty_metadata: bool,

    /// Force selection of the debug-info (`ILDB`) bitcode chunk
    #[clap(long, conflicts_with = "release")]
    debug: bool,

    /// Force selection of the release (`DXIL`) bitcode chunk
    #[clap(long)]
    release: bool,

    /// Increase log verbosity (can be passed multiple times)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    if let Err(err) = real_main() {
        if err
            .root_cause()
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
        {
            return;
        }
        eprintln!("error: {err:#}");
        process::exit(exit_code_for(&err));
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(
            dxil_dump::DecodeError::ContainerInvalid { .. } | dxil_dump::DecodeError::BadMagic { .. },
        ) = cause.downcast_ref::<dxil_dump::DecodeError>()
        {
            return 3;
        }
        if cause.downcast_ref::<CliError>().is_some() {
            return 4;
        }
        if cause.downcast_ref::<io::Error>().is_some() {
            return 2;
        }
    }
    1
}

fn real_main() -> anyhow::Result<()> {
    let cli = match CommandLine::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            err.print().ok();
            process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };
    init_tracing(cli.verbose);

    let pretty_metadata = cli.pretty_metadata && !cli.no_pretty_metadata;

    let bytes = fs::read(&cli.file)
        .with_context(|| format!("failed to read {}", cli.file.display()))?;

    let container = DxbcContainer::parse(&bytes)
        .with_context(|| format!("failed to parse {} as a DXBC container", cli.file.display()))?;

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());

    writeln!(
        out,
        "DXBC major={} minor={} length={} chunks={}",
        container.header.major_version,
        container.header.minor_version,
        container.header.file_length,
        container.header.chunk_count
    )?;
    for chunk in &container.chunks {
        writeln!(out, "  chunk {} ({} bytes)", chunk.fourcc_str(), chunk.data.len())?;
    }

    if let Some(features_chunk) = container.features_chunk() {
        let features = Features::parse(features_chunk.data)?;
        writeln!(out, "SFI0 features: {features:?}")?;
    }

    if let Some(debug_name_chunk) = container.debug_name_chunk() {
        let debug_name = DebugName::parse(debug_name_chunk.data)?;
        writeln!(out, "ILDN name: {}", debug_name.name)?;
    }

    let bitcode_chunk = if cli.debug {
        container.find(b"ILDB")
    } else if cli.release {
        container.find(b"DXIL")
    } else {
        container.bitcode_chunk()
    }
    .ok_or(CliError::NoBitcodeChunk)?;

    let program_header = ProgramHeader::parse(bitcode_chunk.data, bitcode_chunk.data.len())
        .context("failed to parse DXIL program header")?;
    writeln!(
        out,
        "shader: kind={} model={}.{} dxil_version={}",
        program_header.shader_kind.name(),
        program_header.shader_model.major,
        program_header.shader_model.minor,
        program_header.dxil_version
    )?;

    let bitcode_bytes = &bitcode_chunk.data[program_header.bitcode_range()];
    let mut decoder = BitstreamDecoder::new();
    let tree = decoder
        .decode(bitcode_bytes)
        .context("failed to decode DXIL bitstream")?;

    let renderer = TreeRenderer::new(&decoder, pretty_metadata);
    write!(out, "{}", renderer.render(&tree))?;

    out.flush()?;
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("dxil_dump={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
