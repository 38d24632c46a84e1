//! # srcs CLI - record source trees and replay them
//!
//! ## Usage
//! ```bash
//! # Record ./project every second until "stop" is typed (or stdin closes)
//! srcs record --source ./project --output session.srcs
//!
//! # While recording, type on stdin:
//! #   tag before-refactor
//! #   stop
//!
//! # Turn the recording into git history
//! srcs convert --in session.srcs --out ./history
//!
//! # Look at the tree as it was at a tag or a timestamp
//! srcs list --in session.srcs
//! srcs export --in session.srcs --out ./at-tag --tag before-refactor
//! srcs export-segments --in session.srcs --out first-minute.srcs --time 60
//! ```

use clap::{Args, Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use srcs::{
    export_segments, export_tree_at, list_segments, CompressionStrategy, ConvertProgress,
    CopyFromDirectorySourceCodeProvider, MetricsSnapshot, RecorderConfig, RecorderHandle,
    RecordingListener, Result, Selector, SnapshotEvent, SourceCodeRecorderBuilder, SrcsError,
    ToGitConverter,
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// srcs - record how a source tree evolves and replay it into git
#[derive(Parser)]
#[command(name = "srcs")]
#[command(version)]
#[command(about = "Record the evolution of a source tree and replay it into git")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a directory into a .srcs container
    #[command(alias = "rec")]
    Record {
        /// Directory to record
        #[arg(long)]
        source: PathBuf,

        /// Container to write
        #[arg(long)]
        output: PathBuf,

        /// Snapshot period, e.g. "1s" or "500ms"
        #[arg(long, value_parser = humantime::parse_duration)]
        every: Option<Duration>,

        /// Stop after this long; without it, record until "stop" on stdin
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,

        /// Force a key snapshot every N snapshots
        #[arg(long)]
        key_spacing: Option<u64>,

        /// JSON recorder configuration; flags override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Extra ignore patterns (gitignore syntax)
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Compression strategy: none, fast or adaptive
        #[arg(long)]
        compression: Option<String>,

        /// Keep the shadow repository for inspection
        #[arg(long)]
        keep_shadow: bool,
    },

    /// Replay a container into a new git repository
    Convert {
        /// Container to read
        #[arg(long = "in")]
        input: PathBuf,

        /// Repository to create (must be missing or empty)
        #[arg(long = "out")]
        output: PathBuf,

        /// Skip damaged segments instead of aborting
        #[arg(long)]
        lenient: bool,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// Write the tree recorded at a timestamp or tag into a directory
    Export {
        /// Container to read
        #[arg(long = "in")]
        input: PathBuf,

        /// Directory to create (must be missing or empty)
        #[arg(long = "out")]
        output: PathBuf,

        #[command(flatten)]
        selector: SelectorArgs,
    },

    /// Write the segments up to a timestamp or tag into a new container
    ExportSegments {
        /// Container to read
        #[arg(long = "in")]
        input: PathBuf,

        /// Container to write
        #[arg(long = "out")]
        output: PathBuf,

        #[command(flatten)]
        selector: SelectorArgs,
    },

    /// List the segments of a container
    #[command(alias = "ls")]
    List {
        /// Container to read
        #[arg(long = "in")]
        input: PathBuf,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SelectorArgs {
    /// Seconds since the start of the recording
    #[arg(long)]
    time: Option<u64>,

    /// Tag name
    #[arg(long)]
    tag: Option<String>,
}

impl SelectorArgs {
    fn into_selector(self) -> Selector {
        match (self.time, self.tag) {
            (Some(time), _) => Selector::Timestamp(time),
            (None, Some(tag)) => Selector::Tag(tag),
            // clap's group guarantees one of the two
            (None, None) => Selector::Timestamp(0),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Record {
            source,
            output,
            every,
            duration,
            key_spacing,
            config,
            ignore,
            compression,
            keep_shadow,
        } => {
            let mut recorder_config = match config {
                Some(path) => load_config(&path)?,
                None => RecorderConfig::default(),
            };
            if let Some(every) = every {
                recorder_config.snapshot_every_ms =
                    u64::try_from(every.as_millis()).unwrap_or(u64::MAX);
            }
            if let Some(spacing) = key_spacing {
                recorder_config.engine.key_snapshot_spacing = spacing;
            }
            if let Some(name) = compression {
                recorder_config.engine.compression = CompressionStrategy::from_name(&name)?;
            }
            recorder_config.engine.ignore_patterns.extend(ignore);
            recorder_config.engine.keep_shadow |= keep_shadow;
            cmd_record(source, output, duration, recorder_config)
        }
        Commands::Convert {
            input,
            output,
            lenient,
            progress,
        } => cmd_convert(input, output, lenient, progress),
        Commands::Export {
            input,
            output,
            selector,
        } => cmd_export(input, output, selector.into_selector()),
        Commands::ExportSegments {
            input,
            output,
            selector,
        } => cmd_export_segments(input, output, selector.into_selector()),
        Commands::List { input } => cmd_list(input),
    }
}

fn load_config(path: &Path) -> Result<RecorderConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Prints one line per appended segment
struct ConsoleListener;

impl RecordingListener for ConsoleListener {
    fn on_snapshot(&self, event: &SnapshotEvent) {
        let kind = match event.snapshot_type {
            srcs::SnapshotType::Key => "KEY".yellow().bold(),
            srcs::SnapshotType::Patch => "PATCH".cyan(),
        };
        let tag = if event.tag.is_empty() {
            String::new()
        } else {
            format!(" {}", format!("[{}]", event.tag).green())
        };
        println!(
            "  #{:<4} {:>6}s  {:<5} {:>10}  {}{}",
            event.index,
            event.timestamp_sec,
            kind,
            format_bytes(event.segment_bytes),
            format_duration(truncate_millis(event.processing_time)),
            tag
        );
    }

    fn on_finished(&self, metrics: &MetricsSnapshot) {
        println!(
            "{} {} segments ({} key, {} patch, {} tagged), {}",
            "✓".green().bold(),
            metrics.total_snapshots,
            metrics.key_snapshots,
            metrics.patch_snapshots,
            metrics.tagged_snapshots,
            format_bytes(metrics.bytes_written)
        );
    }
}

/// Record until the duration ends or `stop` arrives on stdin
fn cmd_record(
    source: PathBuf,
    output: PathBuf,
    duration: Option<Duration>,
    config: RecorderConfig,
) -> Result<()> {
    if !source.is_dir() {
        return Err(SrcsError::InvalidConfiguration(format!(
            "source {} is not a directory",
            source.display()
        )));
    }

    let provider = CopyFromDirectorySourceCodeProvider::new(source.clone())
        .with_ignore_patterns(config.engine.ignore_patterns.clone());
    let period = config.snapshot_every();
    let mut recorder = SourceCodeRecorderBuilder::new(provider, &output)
        .config(config)
        .recording_listener(Arc::new(ConsoleListener))
        .build()?;

    println!(
        "{} {} every {} into {}",
        "Recording".blue().bold(),
        source.display().to_string().cyan(),
        format_duration(period),
        output.display().to_string().cyan()
    );
    let bounded = duration.is_some();
    if !bounded {
        println!("  Type {} or {} on stdin", "tag <name>".yellow(), "stop".yellow());
    }

    let handle = recorder.handle();
    std::thread::spawn(move || read_commands(handle, bounded));

    recorder.start(duration.unwrap_or(Duration::MAX))?;
    recorder.close()?;
    Ok(())
}

/// Forward `tag <name>` and `stop` lines to the recorder
fn read_commands(handle: RecorderHandle, bounded: bool) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        let sent = if let Some(tag) = line.strip_prefix("tag ") {
            handle.tag_current_state(tag.trim())
        } else if line == "stop" {
            let _ = handle.stop();
            return;
        } else if line.is_empty() {
            continue;
        } else {
            eprintln!("{} unknown command '{}'", "?".yellow(), line);
            continue;
        };
        if sent.is_err() {
            return;
        }
    }
    // Nobody can stop an unbounded recording once stdin is gone
    if !bounded {
        let _ = handle.stop();
    }
}

/// Replay a container into git
fn cmd_convert(input: PathBuf, output: PathBuf, lenient: bool, show_progress: bool) -> Result<()> {
    println!(
        "{} {} into {}",
        "Converting".blue().bold(),
        input.display().to_string().cyan(),
        output.display().to_string().cyan()
    );

    let start = Instant::now();
    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Replaying segments...");
        Some(pb)
    } else {
        None
    };

    let mut converter = ToGitConverter::new(&input, &output).stop_on_error(!lenient);
    if let Some(pb) = progress.clone() {
        converter = converter.with_progress(move |event| match event {
            ConvertProgress::Committed { index, commit } => {
                pb.set_message(format!("Segment #{} → {}", index, short_id(commit)));
            }
            ConvertProgress::Skipped { index, reason } => {
                pb.println(format!("{} segment #{} skipped: {}", "!".yellow(), index, reason));
            }
            _ => {}
        });
    }

    let result = converter.convert();
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let report = result?;

    println!(
        "{} {} commits, {} tags in {}",
        "✓".green().bold(),
        report.commits.to_string().cyan(),
        report.tags.to_string().cyan(),
        format_duration(truncate_millis(start.elapsed()))
    );
    if report.skipped > 0 {
        println!(
            "{} {} segments skipped, {} patch operations forced until the next key",
            "!".yellow().bold(),
            report.skipped,
            report.conflicts
        );
    }
    if !report.diagnostics.is_empty() {
        println!("{}", "Diagnostics:".yellow().bold());
        for diagnostic in &report.diagnostics {
            println!("  - {}", diagnostic);
        }
    }
    Ok(())
}

/// Export the tree at a selector
fn cmd_export(input: PathBuf, output: PathBuf, selector: Selector) -> Result<()> {
    let stats = export_tree_at(&input, &selector, &output)?;
    println!(
        "{} Exported tree at {} into {} ({} files, {})",
        "✓".green().bold(),
        selector.to_string().yellow(),
        output.display().to_string().cyan(),
        stats.files_written,
        format_bytes(stats.bytes_written)
    );
    Ok(())
}

/// Export a container prefix
fn cmd_export_segments(input: PathBuf, output: PathBuf, selector: Selector) -> Result<()> {
    let written = export_segments(&input, &selector, &output)?;
    println!(
        "{} Wrote {} segments up to {} into {}",
        "✓".green().bold(),
        written.to_string().cyan(),
        selector.to_string().yellow(),
        output.display().to_string().cyan()
    );
    Ok(())
}

/// Print one line per segment
fn cmd_list(input: PathBuf) -> Result<()> {
    let mut count = 0;
    for info in list_segments(&input).iter()? {
        println!("{}", info?);
        count += 1;
    }
    if count == 0 {
        println!("{}", "No segments".yellow());
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

fn truncate_millis(duration: Duration) -> Duration {
    Duration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Format bytes as human-readable size
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}
