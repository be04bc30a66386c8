use crate::error::Result;
use crate::format::ts::PacketBatch;
use async_trait::async_trait;
use std::fmt;

/// Position of a stage in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageRole {
    /// Originates packets.
    Source,
    /// Receives packets from upstream and forwards them downstream.
    Transform,
    /// Consumes packets and never forwards them.
    Sink,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageRole::Source => "input",
            StageRole::Transform => "processor",
            StageRole::Sink => "output",
        };
        f.write_str(name)
    }
}

/// What a stage wants after processing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// No more packets after this batch. A source returns it when its input
    /// is exhausted; a transform or sink may use it to end the stream early.
    EndOfStream,
}

/// One processing stage of a pipeline.
///
/// Each stage runs in its own task and owns its processing state. The
/// coordinator calls `start` once before any batch moves, then
/// `process_batch` repeatedly, then exactly one of `stop` (normal end of
/// stream) or `abort` (cancellation or failure anywhere in the pipeline).
#[async_trait]
pub trait Stage: Send {
    fn name(&self) -> &str;

    fn role(&self) -> StageRole;

    /// One-time setup. A failure here prevents the pipeline from starting.
    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Processes one batch in place.
    ///
    /// A source receives an empty batch and fills it up to its capacity. A
    /// transform may modify, drop or replace packets; what remains in the
    /// batch is forwarded. A sink consumes the batch.
    async fn process_batch(&mut self, batch: &mut PacketBatch) -> Result<Flow>;

    /// Flushes pending state after the last batch.
    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Releases held resources without completing pending work.
    async fn abort(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display_matches_config_sections() {
        assert_eq!(StageRole::Source.to_string(), "input");
        assert_eq!(StageRole::Transform.to_string(), "processor");
        assert_eq!(StageRole::Sink.to_string(), "output");
    }
}
