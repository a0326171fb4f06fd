//! # fileforge Core Library
//!
//! An in-memory file transformation engine with three tools:
//!
//! - **Archive creation**: heterogeneous inputs (file lists, dropped
//!   directories with paged listings, relative-path file lists) are
//!   normalized and packed into one ZIP archive.
//! - **Archive extraction**: a ZIP archive is decoded into blobs exposed
//!   through transient handles, plus a rebuilt folder tree.
//! - **Image recompression**: an image is scaled and re-encoded under a size
//!   ceiling by a bounded binary search on encoder quality.
//!
//! ## Key Modules
//!
//! - [`source`]: Input normalization and the byte source abstraction.
//! - [`chunked`]: Windowed reads over a byte source.
//! - [`compress`]: The archive builder.
//! - [`extract`]: The archive reader and folder tree.
//! - [`raster`]: The image recompressor.
//! - [`progress`]: Two-phase progress on one monotonic scale.
//! - [`ledger`]: Transient handle bookkeeping.
//! - [`session`]: Per-tool state holders for an interactive front end.
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use fileforge::compress::ArchiveBuilder;
//! use fileforge::progress::ProgressAggregator;
//! use fileforge::source::{normalize, MemorySource, SourceInput};
//!
//! # async fn demo() -> fileforge::Result<()> {
//! let input = SourceInput::Files(vec![Arc::new(MemorySource::new("a.txt", b"hello".to_vec()))]);
//! let normalized = normalize(input).await;
//! let output = ArchiveBuilder::default()
//!     .build(&normalized.entries, &mut ProgressAggregator::disabled())
//!     .await?;
//! assert_eq!(output.entry_count, 1);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod chunked;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod compress;
pub mod config;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod progress;
pub mod raster;
pub mod session;
pub mod source;
pub mod validate;

pub use error::{EntryFailure, ForgeError, Result};
