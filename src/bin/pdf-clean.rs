//! PDF Clean CLI tool
//!
//! A command-line tool for rewriting page content streams and rebuilding
//! minimal, self-contained resource dictionaries.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use glob::glob;
use std::path::PathBuf;
use std::process;
use tracing::{warn, Level};

use pdf_clean::pdf::{
    clean_pdf, find_inherited_lookups, summarize_page,
    CleanOptions, DEFAULT_MAX_DEPTH,
};

/// PDF Clean - Rebuild page content streams and minimal resource dictionaries
#[derive(Parser)]
#[command(name = "pdf-clean")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Clean every page of a PDF
    pdf-clean clean input.pdf -o cleaned.pdf

    # Clean pages 1 and 3 only, leaving streams uncompressed
    pdf-clean clean input.pdf -o cleaned.pdf --pages 1,3 --no-compress

    # Clean a batch of PDFs into a directory
    pdf-clean clean --out-dir cleaned \"scans/*.pdf\"

    # Show resources and inherited lookups of each page
    pdf-clean inspect input.pdf")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean page content streams and resources
    Clean {
        /// Input PDF files. Supports glob patterns like "*.pdf"
        #[arg(required = true)]
        inputs: Vec<String>,

        #[command(flatten)]
        destination: Destination,

        /// Page numbers to clean, e.g. "1,3" (default: all pages)
        #[arg(long, value_delimiter = ',')]
        pages: Option<Vec<u32>>,

        /// Leave streams uncompressed
        #[arg(long)]
        no_compress: bool,

        /// Keep objects no longer referenced after cleaning
        #[arg(long)]
        keep_unused: bool,

        /// Limit on nesting of forms, groups and fonts
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,
    },

    /// Show the resources of each page and nested objects without their own
    Inspect {
        /// PDF file to inspect
        input: PathBuf,

        /// Page numbers to inspect, e.g. "1,3" (default: all pages)
        #[arg(long, value_delimiter = ',')]
        pages: Option<Vec<u32>>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Destination {
    /// Output PDF file path (single input only)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output directory; each input keeps its file name
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Clean {
            inputs, destination, pages, no_compress, keep_unused, max_depth,
        } => {
            let options = CleanOptions {
                pages,
                compress: !no_compress,
                prune_unused: !keep_unused,
                max_depth,
            };
            cmd_clean(inputs, destination, &options)
        }
        Commands::Inspect { input, pages } => {
            cmd_inspect(input, pages)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::WARN,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Expand glob patterns; literal paths pass through unchanged.
/// The result is sorted and free of duplicates.
fn expand_inputs(patterns: Vec<String>) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        if !pattern.contains(['*', '?', '[']) {
            paths.push(PathBuf::from(pattern));
            continue;
        }

        let matched_before = paths.len();
        let entries = glob(&pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))?;
        for entry in entries {
            match entry {
                Ok(path) => paths.push(path),
                Err(e) => warn!(%pattern, error = %e, "skipping unreadable glob match"),
            }
        }
        if paths.len() == matched_before {
            bail!("No files matched pattern: {}", pattern);
        }
    }

    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Clean one or more PDFs
fn cmd_clean(inputs: Vec<String>, destination: Destination, options: &CleanOptions) -> Result<()> {
    let inputs = expand_inputs(inputs)?;

    // Validate inputs exist
    for path in &inputs {
        if !path.exists() {
            bail!("Input file not found: {}", path.display());
        }
    }

    let jobs: Vec<(PathBuf, PathBuf)> = match (destination.output, destination.out_dir) {
        (Some(output), _) => {
            if inputs.len() != 1 {
                bail!("--output takes a single input; use --out-dir for {} files", inputs.len());
            }
            inputs.into_iter().map(|input| (input, output.clone())).collect()
        }
        (None, Some(dir)) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let mut jobs = Vec::new();
            for input in inputs {
                let name = input
                    .file_name()
                    .with_context(|| format!("Not a file: {}", input.display()))?;
                let output = dir.join(name);
                jobs.push((input, output));
            }
            jobs
        }
        (None, None) => bail!("Either --output or --out-dir is required"),
    };

    eprintln!("Cleaning {} PDF file(s)...", jobs.len());

    for (input, output) in &jobs {
        let report = clean_pdf(input, output, options)
            .with_context(|| format!("Failed to clean {}", input.display()))?;

        eprintln!(
            "{} -> {}: {} pages, {} forms, {} soft masks, {} patterns, {} Type3 fonts, {} objects pruned",
            input.display(),
            output.display(),
            report.pages_cleaned,
            report.stats.forms,
            report.stats.soft_masks,
            report.stats.tiling_patterns,
            report.stats.type3_fonts,
            report.objects_pruned,
        );
    }

    Ok(())
}

/// Show resources and inherited lookups of each page
fn cmd_inspect(input: PathBuf, pages: Option<Vec<u32>>) -> Result<()> {
    if !input.exists() {
        bail!("Input file not found: {}", input.display());
    }

    let doc = lopdf::Document::load(&input)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    let all_pages = doc.get_pages();

    let selected: Vec<u32> = match pages {
        Some(numbers) => numbers,
        None => all_pages.keys().copied().collect(),
    };

    println!("File: {}", input.display());
    println!("Pages: {}", all_pages.len());

    for number in selected {
        let Some(&page_id) = all_pages.get(&number) else {
            bail!("Page {} not found", number);
        };

        let summary = summarize_page(&doc, page_id)?;
        println!();
        println!("Page {} ({} {} R)", number, page_id.0, page_id.1);
        println!("  Contents: {:?}", summary.contents);
        for (category, names) in &summary.resources {
            println!("  {}: {}", category.name(), names.join(", "));
        }
        if summary.has_procset {
            println!("  ProcSet");
        }

        let lookups = find_inherited_lookups(&doc, page_id)?;
        for lookup in &lookups {
            let used: Vec<String> = lookup
                .resources
                .iter()
                .map(|(category, names)| format!("{} [{}]", category.name(), names.join(", ")))
                .collect();
            println!("  inherits: {:?} /{} uses {}", lookup.kind, lookup.name, used.join(" "));
        }
    }

    Ok(())
}
