use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use photo_timestamps::filetimes::{CreationTimeMechanism, FileTimeSetter};
use photo_timestamps::pipeline::{ProcessOptions, Processor, collect_images, parse_extension_list};
use photo_timestamps::{config, exif, timestamp};

#[derive(Parser, Debug)]
#[command(
    name = "photo-timestamps",
    version,
    about = "Update photo EXIF dates and file times from the timestamp in each file name"
)]
struct Cli {
    /// Directory containing image files
    #[arg(value_name = "DIRECTORY")]
    directory: Option<PathBuf>,

    /// Recursively process subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Comma-separated list of file extensions to process [default: .jpg,.jpeg,.png,.tiff,.tif,.heic]
    #[arg(short, long, value_name = "LIST")]
    extensions: Option<String>,

    /// Perform a dry run without modifying files
    #[arg(short, long)]
    dry_run: bool,

    /// Show detailed output for debugging
    #[arg(short, long)]
    verbose: bool,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Only set modification/access times, never creation time
    #[arg(long)]
    no_creation_time: bool,

    /// Keep a .bak copy of each file before rewriting its metadata
    #[arg(long)]
    backup: bool,

    /// Print the filename timestamp and current EXIF dates, then exit
    #[arg(long = "show-dates")]
    show_dates: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let path = config::Config::default().save(cli.config.as_deref())?;
        println!("Default config written to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    // Load config and apply CLI overrides
    let mut config = config::Config::load(cli.config.as_deref())?;
    if cli.recursive {
        config.recursive = true;
    }
    if cli.dry_run {
        config.output.dry_run = true;
    }
    if cli.no_creation_time {
        config.creation_time = false;
    }
    if cli.backup {
        config.output.backup_originals = true;
    }
    let extensions = match cli.extensions.as_deref() {
        Some(list) => parse_extension_list(list),
        None => config.normalized_extensions(),
    };

    let Some(directory) = cli.directory.as_deref() else {
        anyhow::bail!("No directory specified. Use --help for usage.");
    };
    if !directory.is_dir() {
        log::error!("{} is not a valid directory", directory.display());
        return Ok(ExitCode::FAILURE);
    }

    // Handle --show-dates
    if cli.show_dates {
        let images = collect_images(directory, config.recursive, &extensions)?;
        for image_path in &images {
            print_dates(image_path);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mechanism = CreationTimeMechanism::resolve(config.creation_time);
    log::info!(
        "Running on: {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    log::info!(
        "Creation time support: {}",
        if mechanism.is_available() {
            format!("Available ({})", mechanism.name())
        } else {
            "Not available".to_string()
        }
    );
    log::info!(
        "{}Processing images in {}",
        if config.output.dry_run { "DRY RUN - " } else { "" },
        directory.display()
    );
    log::info!("File extensions: {}", extensions.join(", "));
    log::info!(
        "Recursive mode: {}",
        if config.recursive { "Yes" } else { "No" }
    );

    let file_times = FileTimeSetter::new(mechanism);
    if cli.verbose && !config.output.dry_run {
        if let Err(e) = file_times.self_test() {
            log::warn!("Failed to set test file timestamp: {e:#}");
        }
    }

    let processor = Processor::new(
        exif::default_strategies(),
        file_times,
        ProcessOptions {
            dry_run: config.output.dry_run,
            backup_originals: config.output.backup_originals,
        },
    );

    let summary = match processor.process_directory(directory, config.recursive, &extensions) {
        Ok(summary) => summary,
        Err(e) => {
            log::error!("{e:#}");
            return Ok(ExitCode::FAILURE);
        }
    };

    log::info!("{} succeeded, {} failed", summary.succeeded, summary.failed);

    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Print the filename timestamp and the EXIF dates currently stored in a file.
fn print_dates(path: &Path) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("  {DIM}{}{RESET}", "─".repeat(50));

    let from_name = timestamp::timestamp_from_path(path)
        .map(|ts| timestamp::format_exif_datetime(&ts))
        .unwrap_or_else(|| "(none)".to_string());
    print_row("Filename", &from_name);

    match exif::read_exif_dates(path) {
        Ok(dates) => {
            for (tag, value) in dates.rows() {
                print_row(tag, value.as_deref().unwrap_or("(none)"));
            }
        }
        Err(e) => println!("  {DIM}(could not read EXIF: {e:#}){RESET}"),
    }
}

/// Print a single row in the date table.
fn print_row(tag: &str, val: &str) {
    println!("  {:<22} : {val}", tag);
}
