#![forbid(unsafe_code)]

//! promptlens CLI - show generation metadata embedded in images.
//!
//! # Commands
//!
//! - `show`: Print name, pixel size, prompts, models, LoRAs and settings of images
//! - `prompt`: Print only the positive (or negative) prompt
//! - `detect`: Show which metadata format an image carries
//! - `parse`: Run a parser on a raw metadata text blob

use std::fmt::Write as _;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pl_core::{ParsedMetadata, SourceFormat};
use pl_parser::{FormatHint, detect_format, extract, parse_text, summary_json};
use pl_png::{ImageInfo, PngMetadata, ReadOptions, read_metadata_from_path};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// promptlens CLI - show generation metadata embedded in images.
#[derive(Debug, Parser)]
#[command(
    name = "pl-cli",
    version,
    about = "promptlens CLI - show generation metadata embedded in images",
    long_about = "Reads the text metadata that image generators embed in PNG files.\n\n\
        Understands A1111-style parameter blocks and node-graph workflows, and\n\
        prints prompts, models, LoRAs and sampler settings."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging (can be repeated for more detail: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the generation metadata of one or more images.
    Show {
        /// Image files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output JSON instead of a text report
        #[arg(long)]
        json: bool,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,

        /// Skip zTXt and compressed iTXt chunks
        #[arg(long)]
        no_decompress: bool,
    },

    /// Print only the prompt of an image. Exits with 1 when it is empty.
    Prompt {
        /// Image file
        input: PathBuf,

        /// Print the negative prompt instead
        #[arg(short, long)]
        negative: bool,
    },

    /// Show which metadata format an image carries.
    Detect {
        /// Image file
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse a raw metadata text blob (no image involved).
    Parse {
        /// Input file path or "-" for stdin. Anything else is parsed as inline text.
        #[arg(default_value = "-")]
        input: String,

        /// Which parser to run
        #[arg(short, long, value_enum, default_value = "auto")]
        format: FormatArg,

        /// Output the full result as JSON
        #[arg(long)]
        json: bool,

        /// Output a one-line JSON summary
        #[arg(long, conflicts_with = "json")]
        summary: bool,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },
}

/// Parser selection for the parse command.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum FormatArg {
    /// Graph for JSON objects, flat text otherwise
    Auto,
    /// Node-graph workflow
    Graph,
    /// A1111-style parameter block
    Flat,
}

impl From<FormatArg> for FormatHint {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Auto => Self::Auto,
            FormatArg::Graph => Self::Graph,
            FormatArg::Flat => Self::Flat,
        }
    }
}

/// One image in `show --json` output.
#[derive(Debug, Serialize)]
struct ShowResult<'a> {
    path: String,
    name: String,
    width: Option<u32>,
    height: Option<u32>,
    metadata: &'a ParsedMetadata,
}

/// Result of detecting the metadata format.
#[derive(Debug, Serialize)]
struct DetectResult {
    source_format: String,
    producer: String,
    fields: Vec<String>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Show {
            inputs,
            json,
            pretty,
            no_decompress,
        } => {
            let options = if no_decompress {
                ReadOptions::without_decompression()
            } else {
                ReadOptions::default()
            };
            cmd_show(&inputs, json, pretty, &options)
        }

        Command::Prompt { input, negative } => cmd_prompt(&input, negative),

        Command::Detect { input, json } => cmd_detect(&input, json),

        Command::Parse {
            input,
            format,
            json,
            summary,
            pretty,
        } => cmd_parse(&input, format.into(), json, summary, pretty),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .try_init();
}

fn load_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        Ok(buffer)
    } else if Path::new(input).exists() {
        std::fs::read_to_string(input).context(format!("Failed to read file: {input}"))
    } else {
        Ok(input.to_string())
    }
}

/// Header and text fields of an image. Formats without a chunk reader yield
/// neither.
fn load_image(path: &Path, options: &ReadOptions) -> Result<PngMetadata> {
    let is_png = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if !is_png {
        warn!("No metadata reader for {}; treating as no metadata", path.display());
        return Ok(PngMetadata::default());
    }

    let image = read_metadata_from_path(path, options)
        .with_context(|| format!("Failed to read image metadata: {}", path.display()))?;
    debug!(
        path = %path.display(),
        info = ?image.info,
        fields = ?image.fields.keys().collect::<Vec<_>>(),
        "read image metadata"
    );
    Ok(image)
}

/// Final path component, or the whole path when there is none.
fn file_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(output)
}

// =============================================================================
// Command: show
// =============================================================================

fn cmd_show(inputs: &[PathBuf], json: bool, pretty: bool, options: &ReadOptions) -> Result<ExitCode> {
    let mut results = Vec::with_capacity(inputs.len());
    let mut failed = false;

    for path in inputs {
        match load_image(path, options) {
            Ok(image) => results.push((path, image.info, extract(&image.fields))),
            Err(err) => {
                error!("{err:#}");
                failed = true;
            }
        }
    }

    if json {
        let listing: Vec<ShowResult<'_>> = results
            .iter()
            .map(|(path, info, metadata)| ShowResult {
                path: path.display().to_string(),
                name: file_name(path),
                width: info.map(|info| info.width),
                height: info.map(|info| info.height),
                metadata,
            })
            .collect();
        println!("{}", to_json(&listing, pretty)?);
    } else {
        for (index, (path, info, metadata)) in results.iter().enumerate() {
            if index > 0 {
                println!();
            }
            print!("{}", render_image_header(&file_name(path), *info));
            print!("{}", render_report(metadata));
        }
    }

    info!("Processed {} of {} inputs", results.len(), inputs.len());
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// File name, then `W x H px` when the header was readable.
fn render_image_header(name: &str, info: Option<ImageInfo>) -> String {
    match info {
        Some(ImageInfo { width, height }) => format!("{name}\n{width} x {height} px\n\n"),
        None => format!("{name}\n\n"),
    }
}

/// Plain-text rendering of a result, one titled section per non-empty field.
fn render_report(parsed: &ParsedMetadata) -> String {
    if parsed.is_failure() {
        return "Graph parse error\n".to_string();
    }
    if parsed.source_format == SourceFormat::None {
        return "No Metadata Detected\n".to_string();
    }

    let mut out = String::new();
    push_section(&mut out, "Model", &parsed.model_lines.join("\n"));
    push_section(&mut out, "LoRA", &parsed.loras.join("\n"));
    push_section(&mut out, "Prompt", parsed.positive.as_deref().unwrap_or(""));
    push_section(&mut out, "Negative", parsed.negative.as_deref().unwrap_or(""));
    push_section(&mut out, "Settings", &settings_line(parsed));
    if out.is_empty() {
        out.push_str("(empty)\n");
    }
    out
}

fn push_section(out: &mut String, title: &str, body: &str) {
    if body.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title}:");
    for line in body.lines() {
        let _ = writeln!(out, "  {line}");
    }
}

/// Flat settings print raw; graph settings print as `Key: value | Key: value`.
fn settings_line(parsed: &ParsedMetadata) -> String {
    if let Some(raw) = parsed.raw_params() {
        return raw.to_string();
    }
    parsed
        .params
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join(" | ")
}

// =============================================================================
// Command: prompt
// =============================================================================

fn cmd_prompt(input: &Path, negative: bool) -> Result<ExitCode> {
    let parsed = extract(&load_image(input, &ReadOptions::default())?.fields);
    if parsed.is_failure() {
        warn!("Graph parse error in {}", input.display());
    }

    let text = if negative {
        parsed.negative.as_deref()
    } else {
        parsed.positive.as_deref()
    }
    .unwrap_or("");

    if text.is_empty() {
        info!("No {} prompt in {}", if negative { "negative" } else { "positive" }, input.display());
        return Ok(ExitCode::FAILURE);
    }
    println!("{text}");
    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// Command: detect
// =============================================================================

fn cmd_detect(input: &Path, json_output: bool) -> Result<ExitCode> {
    let fields = load_image(input, &ReadOptions::default())?.fields;
    let format = detect_format(&fields);
    let keys: Vec<String> = fields.keys().cloned().collect();

    if json_output {
        let result = DetectResult {
            source_format: format.as_str().to_string(),
            producer: format.producer().to_string(),
            fields: keys,
        };
        println!("{}", to_json(&result, true)?);
    } else {
        println!("Format:   {}", format.as_str());
        println!("Producer: {}", format.producer());
        if keys.is_empty() {
            println!("Fields:   (none)");
        } else {
            println!("Fields:   {}", keys.join(", "));
        }
    }

    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// Command: parse
// =============================================================================

fn cmd_parse(input: &str, hint: FormatHint, json: bool, summary: bool, pretty: bool) -> Result<ExitCode> {
    let source = load_input(input)?;
    let parsed = parse_text(&source, hint);

    if summary {
        if pretty {
            let value: serde_json::Value = serde_json::from_str(&summary_json(&parsed))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            println!("{}", summary_json(&parsed));
        }
    } else if json {
        println!("{}", to_json(&parsed, pretty)?);
    } else {
        print!("{}", render_report(&parsed));
    }

    Ok(ExitCode::SUCCESS)
}
