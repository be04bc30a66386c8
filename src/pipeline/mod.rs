//! Stage chain plumbing.
//!
//! A [`Pipeline`] moves [`PacketBatch`](crate::format::ts::PacketBatch)es
//! from a source stage through zero or more transforms to a sink. Every stage
//! runs in its own task; neighbours are connected by bounded queues, so a slow
//! sink stalls the stages upstream of it instead of growing memory. An
//! [`AbortHandle`] interrupts every stage, even one blocked on a full queue.
//!
//! ```no_run
//! use tspipe::config::PipelineConfig;
//! use tspipe::pipeline::{Pipeline, PluginRegistry};
//!
//! # async fn run() -> tspipe::Result<()> {
//! let config = PipelineConfig::load("tspipe.json")?;
//! let pipeline = Pipeline::build(&config, &PluginRegistry::with_builtins())?;
//! let abort = pipeline.abort_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     abort.abort();
//! });
//! let report = pipeline.run().await?;
//! println!("{:?}", report.status);
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod registry;
mod stage;

pub use coordinator::{AbortHandle, Pipeline, PipelineReport, PipelineStatus, StageReport};
pub use registry::{PluginRegistry, StageFactory};
pub use stage::{Flow, Stage, StageRole};
