use crate::config::StageSpec;
use crate::error::Result;
use crate::format::ts::{PacketBatch, PacketMetadata, TsPacket};
use crate::pipeline::{Flow, Stage, StageRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NullOptions {
    /// Packets to generate; unlimited when absent.
    #[serde(default)]
    pub count: Option<u64>,
}

/// Generates null packets.
pub struct NullInput {
    options: NullOptions,
    emitted: u64,
}

impl NullInput {
    pub fn new(options: NullOptions) -> Self {
        Self { options, emitted: 0 }
    }

    pub fn create(spec: &StageSpec) -> Result<Box<dyn Stage>> {
        Ok(Box::new(Self::new(spec.options()?)))
    }
}

#[async_trait]
impl Stage for NullInput {
    fn name(&self) -> &str {
        "null"
    }

    fn role(&self) -> StageRole {
        StageRole::Source
    }

    async fn process_batch(&mut self, batch: &mut PacketBatch) -> Result<Flow> {
        while !batch.is_full() {
            if Some(self.emitted) == self.options.count {
                return Ok(Flow::EndOfStream);
            }
            batch.push(TsPacket::null(), PacketMetadata::new())?;
            self.emitted += 1;
        }
        // cooperative yield between batches
        tokio::task::yield_now().await;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::PID_NULL;
    use tokio::runtime::Runtime;

    #[test]
    fn test_generates_requested_count() {
        Runtime::new().unwrap().block_on(async {
            let mut input = NullInput::new(NullOptions { count: Some(5) });
            let mut batch = PacketBatch::with_capacity(3);
            assert_eq!(input.process_batch(&mut batch).await.unwrap(), Flow::Continue);
            assert_eq!(batch.len(), 3);
            assert!(batch.packets().iter().all(|p| p.pid() == PID_NULL));

            let mut batch = PacketBatch::with_capacity(3);
            assert_eq!(input.process_batch(&mut batch).await.unwrap(), Flow::EndOfStream);
            assert_eq!(batch.len(), 2);
        });
    }
}
