use crate::config::StageSpec;
use crate::error::Result;
use crate::format::ts::PacketBatch;
use crate::pipeline::{Flow, Stage, StageRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DropOptions {}

/// Discards every packet.
#[derive(Debug, Default)]
pub struct DropOutput {
    packets: u64,
}

impl DropOutput {
    pub fn create(spec: &StageSpec) -> Result<Box<dyn Stage>> {
        let _: DropOptions = spec.options()?;
        Ok(Box::new(Self::default()))
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }
}

#[async_trait]
impl Stage for DropOutput {
    fn name(&self) -> &str {
        "drop"
    }

    fn role(&self) -> StageRole {
        StageRole::Sink
    }

    async fn process_batch(&mut self, batch: &mut PacketBatch) -> Result<Flow> {
        self.packets += batch.len() as u64;
        batch.clear();
        Ok(Flow::Continue)
    }

    async fn stop(&mut self) -> Result<()> {
        log::debug!("drop: {} packets discarded", self.packets);
        Ok(())
    }
}
