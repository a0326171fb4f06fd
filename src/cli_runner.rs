//! Runs a parsed command line against the engine.
//!
//! Every subcommand drives one of the tool sessions, so the CLI exercises the
//! same code paths an embedding UI would. Operations run on a current-thread
//! runtime.

use crate::archive::ArchiveCodec;
use crate::cli::{self, Commands};
use crate::common::sanitize_relative;
use crate::compress::ArchiveBuilder;
use crate::config::EngineConfig;
use crate::extract::{ArchiveReader, ExtractOptions, ExtractResult};
use crate::ledger::{ObjectUrlRegistry, ResourceLedger};
use crate::progress::{Phase, ProgressAggregator, ProgressState};
use crate::raster::OutputFormat;
use crate::session::{ExtractSession, ImageSession, SizeUnit, ZipSession};
use crate::source::{EntryHandle, FsDirectory, PathSource, SourceInput};
use crate::validate::format_size;
use parking_lot::Mutex;
use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (`warn` when unset).
pub const LOG_ENV: &str = "FILEFORGE_LOG";

/// Install the stderr log subscriber.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<(), Box<dyn Error>> {
    let args = cli::run()?;
    let config = cli::load_config_from_opt_or_env(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(run_command(args.command, config))
}

async fn run_command(command: Commands, config: EngineConfig) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Zip { inputs, name, output, level, store, zstd, continue_on_error, retries, retry_delay_ms, progress } => {
            let mut options = config.build_options();
            if store {
                options.codec = ArchiveCodec::Store;
            } else if zstd {
                options.codec = ArchiveCodec::Zstd;
            }
            if let Some(level) = level {
                options.compression_level = level;
            }
            if continue_on_error {
                options.continue_on_error = true;
            }
            if let Some(retries) = retries {
                options.retries = retries;
            }
            if let Some(delay) = retry_delay_ms {
                options.retry_delay_ms = delay;
            }

            let mut session = ZipSession::new(ArchiveBuilder::new(options, config.chunked_reader()));
            let items = open_inputs(&inputs).await?;
            for failure in session.add(SourceInput::Dropped(items)).await {
                eprintln!("Warning: could not list {}", failure);
            }
            if let Some(name) = name {
                session.set_archive_name(name);
            }

            let mut tracker = progress_for(&config, progress, "zip");
            let out_dir = output.unwrap_or_else(|| PathBuf::from("."));
            let target = out_dir.join(session.download_name());
            let built = session.compress(&mut tracker).await?;

            for failure in &built.failed {
                eprintln!("Skipped {}", failure);
            }
            tokio::fs::create_dir_all(&out_dir).await?;
            tokio::fs::write(&target, &built.bytes).await?;
            println!(
                "Created {} ({} files, {} -> {}, {}% smaller)",
                target.display(),
                built.entry_count,
                format_size(built.original_size),
                format_size(built.compressed_size),
                built.ratio_percent
            );
        }
        Commands::Unzip { archive, output, strict, progress } => {
            let mut extract_options = config.extract_options();
            if strict {
                extract_options.continue_on_error = Some(false);
            } else if extract_options.continue_on_error.is_none() {
                extract_options.continue_on_error = Some(true);
            }

            let mut session = ExtractSession::with_reader(ObjectUrlRegistry::new(), ArchiveReader::new(extract_options));
            let bytes = tokio::fs::read(&archive).await?;
            session.select(display_name(&archive), bytes)?;

            let mut tracker = progress_for(&config, progress, "unzip");
            let result = session.extract(&mut tracker).await?;
            let out_dir = output.unwrap_or_else(|| PathBuf::from("."));
            let dirs: Vec<String> = result.directories.iter().map(|d| d.path.clone()).collect();
            let files: Vec<String> = result.files.iter().map(|f| f.path.clone()).collect();
            let skipped = result.skipped.clone();

            for dir in &dirs {
                if let Some(rel) = sanitize_relative(dir) {
                    tokio::fs::create_dir_all(out_dir.join(rel)).await?;
                }
            }
            for path in &files {
                let (Some(rel), Some((_, blob))) = (sanitize_relative(path), session.download(path)) else {
                    continue;
                };
                let target = out_dir.join(rel);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, blob.bytes()).await?;
            }
            for failure in &skipped {
                eprintln!("Skipped {}", failure);
            }
            println!("Extracted {} files to {}", files.len(), out_dir.display());
        }
        Commands::List { archive, json } => {
            let bytes = tokio::fs::read(&archive).await?;
            let mut ledger = ResourceLedger::new(ObjectUrlRegistry::new());
            let reader = ArchiveReader::new(ExtractOptions { continue_on_error: Some(true) });
            let result = reader.extract(&bytes, &mut ledger, &mut ProgressAggregator::disabled()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result.summaries())?);
            } else {
                print_tree(&result);
            }
        }
        Commands::Image { input, max_size_kb, max_width, max_height, quality, min_quality, png, no_aspect, output, progress } => {
            let mut options = config.image_options();
            if let Some(w) = max_width {
                options.max_width = w;
            }
            if let Some(h) = max_height {
                options.max_height = h;
            }
            if let Some(q) = quality {
                options.quality = q;
            }
            if let Some(q) = min_quality {
                options.min_quality = q;
            }
            if png {
                options.format = OutputFormat::Png;
            }
            if no_aspect {
                options.preserve_aspect_ratio = false;
            }
            let target_kb = max_size_kb.unwrap_or(options.max_size_kb);

            let mut session = ImageSession::with_options(ObjectUrlRegistry::new(), options);
            let bytes = tokio::fs::read(&input).await?;
            session.select(display_name(&input), None, bytes)?;

            let mut tracker = progress_for(&config, progress, "image");
            let produced = session.compress(target_kb, SizeUnit::Kb, &mut tracker).await?;
            let target = output.unwrap_or_else(|| PathBuf::from(&produced.download_name));
            tokio::fs::write(&target, &produced.result.output_bytes).await?;

            let result = &produced.result;
            match result.quality_used {
                Some(q) => println!(
                    "Wrote {} ({} -> {}, {}% smaller, quality {:.2})",
                    target.display(),
                    format_size(result.original_size),
                    format_size(result.output_size),
                    result.ratio_percent,
                    q
                ),
                None => println!("Wrote {} (already within {} KB, unchanged)", target.display(), target_kb),
            }
        }
    }

    Ok(())
}

/// Files and directories named on the command line, as drop items.
async fn open_inputs(inputs: &[PathBuf]) -> Result<Vec<EntryHandle>, Box<dyn Error>> {
    let mut items = Vec::with_capacity(inputs.len());
    for path in inputs {
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.is_dir() {
            items.push(EntryHandle::Directory(Arc::new(FsDirectory::open(path)?)));
        } else {
            let source = PathSource::open(path).await?;
            items.push(EntryHandle::file(format!("/{}", display_name(path)), Arc::new(source)));
        }
    }
    Ok(items)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_tree(result: &ExtractResult) {
    for (depth, node) in result.file_tree.walk() {
        let indent = "  ".repeat(depth);
        match node.file() {
            Some(file) => println!("{}{} ({})", indent, node.name, format_size(file.size)),
            None => println!("{}{}/", indent, node.name),
        }
    }
    println!("{} files, {} directories", result.count, result.directories.len());
}

fn progress_for(config: &EngineConfig, enabled: bool, operation: &str) -> ProgressAggregator {
    let mut tracker = config.progress();
    if enabled {
        tracker.enable_with_callback(create_cli_progress_callback(operation));
    }
    tracker
}

// --- utils for CLI progress -------------------------------------------------

fn create_cli_progress_callback(operation: &str) -> impl Fn(ProgressState) + Send + Sync + 'static {
    let operation = operation.to_uppercase();
    let start_time = Instant::now();
    let last_update = Mutex::new(Instant::now());
    let prev_len = Mutex::new(0usize);
    let done = AtomicBool::new(false);

    move |state: ProgressState| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        // Update every 100ms to avoid terminal spam, but always show 100% completion
        let should_update = state.percent >= 100 || {
            let mut last = last_update.lock();
            if now.duration_since(*last).as_millis() >= 100 {
                *last = now;
                true
            } else {
                false
            }
        };
        if !should_update {
            return;
        }

        let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
        let phase = match state.phase {
            Phase::Packing => "packing",
            Phase::Encoding => "encoding",
        };

        let elapsed = start_time.elapsed().as_secs_f32();
        let eta_str = if state.percent > 0 && state.percent < 100 {
            let eta_seconds = elapsed * f32::from(100 - state.percent) / f32::from(state.percent);
            if eta_seconds > 60.0 {
                format!("{:.1}m", eta_seconds / 60.0)
            } else {
                format!("{:.1}s", eta_seconds)
            }
        } else {
            "--".to_string()
        };

        let build_status_line = |bw: usize| -> String {
            let filled = usize::from(state.percent) * bw / 100;
            format!(
                "[{}] [{}{}] {:>3}% | {} {}/{} | ETA: {}",
                operation,
                "█".repeat(filled),
                "░".repeat(bw - filled),
                state.percent,
                phase,
                state.processed_units,
                state.total_units,
                eta_str
            )
        };

        // Shrink the bar until the line fits the terminal.
        let mut bar_width: usize = 40;
        let status_line = loop {
            let line = build_status_line(bar_width);
            if line.chars().count() <= term_width || bar_width <= 10 {
                break line;
            }
            bar_width -= 4;
        };

        let mut line_to_print = status_line;
        {
            let mut prev = prev_len.lock();
            let len = line_to_print.chars().count();
            if *prev > len {
                line_to_print.push_str(&" ".repeat(*prev - len));
            }
            *prev = len;
        }
        // stderr, so stdout stays clean
        eprint!("\r\x1B[2K{}", line_to_print);
        io::stderr().flush().ok();

        if state.percent >= 100 {
            eprintln!();
            done.store(true, Ordering::Relaxed);
        }
    }
}
