#![doc(html_root_url = "https://docs.rs/tspipe/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tspipe - MPEG transport stream processor
//!
//! `tspipe` moves 188-byte transport packets through a chain of stages: one
//! input, any number of processors, one output. Stages run concurrently and
//! exchange packet batches through bounded queues, so a slow output throttles
//! the whole chain. Around that chain the crate provides the stream analysis
//! engines a segmenting output needs.
//!
//! ## Features
//!
//! - Section demultiplexing with CRC validation and table version tracking
//! - PAT/PMT decoding and re-packetization
//! - PCR based bitrate estimation with clock wrap handling
//! - Continuity counter regeneration and validation
//! - Segment boundary policy: fixed size, label, duration and intra-frame cuts
//! - HLS output with live sliding window or archival playlists
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tspipe::config::{PipelineConfig, StageSpec};
//! use tspipe::pipeline::{Pipeline, PluginRegistry};
//!
//! #[tokio::main]
//! async fn main() -> tspipe::Result<()> {
//!     let config = PipelineConfig::new(
//!         StageSpec::new("file", json!({ "path": "input.ts" })),
//!         StageSpec::new("hls", json!({
//!             "template": "out/segment.ts",
//!             "playlist": "out/playlist.m3u8",
//!             "intra_close": true
//!         })),
//!     );
//!
//!     let pipeline = Pipeline::build(&config, &PluginRegistry::with_builtins())?;
//!     let report = pipeline.run().await?;
//!     for stage in &report.stages {
//!         println!("{}: {} packets", stage.name, stage.packets);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `pipeline`: stage trait, plugin registry and the concurrent coordinator
//! - `plugins`: built-in inputs, processors and outputs
//! - `format::ts`: packets, sections, PSI tables, PCR analysis, continuity,
//!   segment boundaries, retention and HLS
//! - `codec`: intra-frame detection for MPEG-2, AVC and HEVC video
//! - `config`: JSON pipeline configuration
//! - `error`: crate error type and `Result` alias
//! - `utils`: bit reader and MPEG-2 CRC32

/// Intra-frame detection for video codecs
pub mod codec;

/// Pipeline configuration
pub mod config;

/// Error types and utilities
pub mod error;

/// Container formats
pub mod format;

/// Stage chain and coordinator
pub mod pipeline;

/// Built-in stages
pub mod plugins;

/// Common utilities and helper functions
pub mod utils;

pub use error::{Result, TsError};
