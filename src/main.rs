use clap::{Parser, ValueEnum};
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use console::style;
use log::LevelFilter;
use media_sorter::config::{parse_mapping, JobSettings};
use media_sorter::utils::{format_duration, format_file_size};
use media_sorter::{pipeline, CleanupMode, DateLayout, RunSummary};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateFolders {
    /// <year>/<month>
    YearMonth,
    /// <year>/<month>/<day>
    YearMonthDay,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CleanupPasses {
    /// One deepest-first pass
    Single,
    /// Repeat until nothing more is removed
    UntilStable,
}

#[derive(Parser)]
#[command(
    name = "mediasort",
    version,
    about = "Copy media files into an organized tree, dropping byte-identical duplicates",
    long_about = "Scan source folders for media files, hash their content, keep one copy of each file per name and content, and copy them into a destination organized by root folders or by date."
)]
struct Cli {
    /// Source folders to scan
    #[arg(
        short,
        long = "src",
        value_name = "PATH",
        value_delimiter = ',',
        help = "Source folders to scan (comma-separated or repeated)"
    )]
    src: Vec<PathBuf>,

    /// Only scan these subfolders of each source
    #[arg(long, value_delimiter = ',', help = "Only scan these subfolders of each source (comma-separated)")]
    sub: Vec<String>,

    /// Destination root
    #[arg(short, long = "dst", value_name = "PATH", help = "Destination folder")]
    dst: Option<PathBuf>,

    #[arg(long, value_delimiter = ',', help = "Media extensions to include (comma-separated)")]
    exts: Vec<String>,

    #[arg(long, value_delimiter = ',', help = "Root organization folder names (comma-separated)")]
    roots: Vec<String>,

    #[arg(
        long = "map",
        value_name = "NAME=FOLDER",
        value_delimiter = ',',
        help = "Folder mappings used when a file has no root (comma-separated or repeated)"
    )]
    map: Vec<String>,

    #[arg(long, value_delimiter = ',', help = "Folder names to skip entirely (comma-separated)")]
    ignore: Vec<String>,

    #[arg(short, long, help = "Number of workers [default: 3]")]
    workers: Option<usize>,

    #[arg(long, value_enum, help = "Date folders for files without a root [default: year-month]")]
    date_layout: Option<DateFolders>,

    #[arg(long, value_enum, help = "Empty directory sweep after --delete [default: single]")]
    cleanup: Option<CleanupPasses>,

    #[arg(long, help = "Show what would be done without making changes")]
    dry_run: bool,

    #[arg(long, help = "Delete the originals and empty folders after copying")]
    delete: bool,

    #[arg(short, long, help = "Skip confirmation prompts (use with caution)")]
    yes: bool,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(long, help = "Print the final summary as JSON")]
    json: bool,

    #[arg(long, value_name = "FILE", help = "JSON job file; command line values override it")]
    config: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> Result<JobSettings> {
        let mappings = self
            .map
            .iter()
            .filter(|m| !m.trim().is_empty())
            .map(|m| parse_mapping(m))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(JobSettings {
            sources: self.src.clone(),
            subfolders: self.sub.clone(),
            destination: self.dst.clone(),
            extensions: self.exts.clone(),
            roots: self.roots.clone(),
            mappings,
            ignore: self.ignore.clone(),
            workers: self.workers,
            date_layout: self.date_layout.map(|d| match d {
                DateFolders::YearMonth => DateLayout::YearMonth,
                DateFolders::YearMonthDay => DateLayout::YearMonthDay,
            }),
            cleanup: self.cleanup.map(|c| match c {
                CleanupPasses::Single => CleanupMode::Single,
                CleanupPasses::UntilStable => CleanupMode::UntilStable,
            }),
            dry_run: self.dry_run,
            delete: self.delete,
            verbose: self.verbose,
        })
    }
}

fn main() {
    let args = Cli::parse();

    if let Err(e) = run(&args) {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Cli) -> Result<()> {
    let settings = match &args.config {
        Some(path) => JobSettings::from_file(path)?.merge(args.settings()?),
        None => args.settings()?,
    };
    let config = settings.into_config()?;

    init_logging(config.verbose);
    config.validate()?;

    if config.dry_run {
        println!("{}", style("🧪 Dry run mode - no changes will be made").yellow().bold());
    } else if config.delete && !args.yes {
        let proceed = dialoguer::Confirm::new()
            .with_prompt("Originals and emptied folders will be deleted after copying. Continue?")
            .interact()?;

        if !proceed {
            println!("{}", style("Operation cancelled").yellow());
            return Ok(());
        }
    }

    println!("{}", style("🔍 Scanning source folders...").cyan().bold());
    let summary = pipeline::run(&config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        display_summary(&summary);
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module("media_sorter", level)
        .filter_module("mediasort", level)
        .format_timestamp(None)
        .parse_default_env()
        .init();
}

fn display_summary(summary: &RunSummary) {
    println!();
    println!("{}", style("📈 Summary").green().bold());
    println!("{}", style("-".repeat(20)).green());
    println!("Directories scanned: {}", summary.directories);
    println!("Files read: {}", summary.files_read);
    println!("Bytes discovered: {}", format_file_size(summary.bytes_discovered));
    println!("Unique contents: {}", summary.groups);
    println!("Files selected: {}", summary.selected);
    println!("Files copied: {}", summary.copied);
    if summary.failed_copies > 0 {
        println!("{}", style(format!("Failed copies: {}", summary.failed_copies)).red());
    }
    println!("Bytes written: {}", format_file_size(summary.bytes_written));
    if summary.deleted > 0 || summary.removed_dirs > 0 {
        println!("Originals deleted: {}", summary.deleted);
        println!("Empty folders removed: {}", summary.removed_dirs);
    }
    if summary.kept_sources > 0 {
        println!(
            "{}",
            style(format!("Originals kept after a failed copy: {}", summary.kept_sources)).yellow()
        );
    }
    println!("Finished in {}", format_duration(std::time::Duration::from_secs_f64(summary.elapsed_secs)));
}
