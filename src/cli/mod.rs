use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::error::ForgeError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON configuration file. Falls back to the FILEFORGE_CONFIG environment variable.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Pack files and directories into a ZIP archive.
    #[command(alias = "z")]
    Zip {
        /// One or more input files or directories to add to the archive.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Archive base name. Defaults to the name of the first input.
        #[arg(short, long)]
        name: Option<String>,

        /// Directory the archive is written to. Defaults to the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compression level (Deflate 0-9, Zstandard 1-22).
        #[arg(long)]
        level: Option<i32>,

        /// Store entries without compression.
        #[arg(long, conflicts_with = "zstd")]
        store: bool,

        /// Compress entries with Zstandard instead of Deflate.
        #[arg(long)]
        zstd: bool,

        /// Skip unreadable files instead of aborting.
        #[arg(long)]
        continue_on_error: bool,

        /// Read attempts per file.
        #[arg(long)]
        retries: Option<u32>,

        /// Delay between read attempts in milliseconds.
        #[arg(long)]
        retry_delay_ms: Option<u64>,

        /// Show a progress bar on stderr.
        #[arg(long)]
        progress: bool,
    },

    /// Extract a ZIP archive into a directory.
    #[command(alias = "x")]
    Unzip {
        /// The archive file to extract.
        #[arg(required = true)]
        archive: PathBuf,

        /// The directory where files will be extracted. Defaults to the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Abort on the first entry that cannot be decoded.
        #[arg(long)]
        strict: bool,

        /// Show a progress bar on stderr.
        #[arg(long)]
        progress: bool,
    },

    /// List the contents of a ZIP archive as a tree.
    #[command(alias = "l")]
    List {
        /// The archive file to list contents of.
        #[arg(required = true)]
        archive: PathBuf,

        /// Print a flat JSON entry list instead of a tree.
        #[arg(long)]
        json: bool,
    },

    /// Recompress an image below a size target.
    #[command(alias = "i")]
    Image {
        /// The image to recompress.
        #[arg(required = true)]
        input: PathBuf,

        /// Size target in KiB.
        #[arg(long = "max-size-kb")]
        max_size_kb: Option<f64>,

        #[arg(long)]
        max_width: Option<u32>,

        #[arg(long)]
        max_height: Option<u32>,

        /// Initial encoder quality (0-1].
        #[arg(long)]
        quality: Option<f64>,

        /// Lowest encoder quality the search may use (0-1].
        #[arg(long)]
        min_quality: Option<f64>,

        /// Encode as PNG instead of JPEG.
        #[arg(long)]
        png: bool,

        /// Clamp width and height independently.
        #[arg(long)]
        no_aspect: bool,

        /// Output file. Defaults to `compressed_<name>.jpg` in the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show a progress bar on stderr.
        #[arg(long)]
        progress: bool,
    },
}

/// Loads the engine configuration.
///
/// Priority:
/// 1. `--config` command-line argument.
/// 2. `FILEFORGE_CONFIG` environment variable.
/// 3. Built-in defaults.
pub fn load_config_from_opt_or_env(config_opt: Option<&Path>) -> Result<EngineConfig, ForgeError> {
    EngineConfig::load(config_opt)
}

/// Parses command-line arguments using `clap`.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    let args = Args::parse();
    Ok(args)
}
