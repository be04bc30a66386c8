use crate::config::StageSpec;
use crate::error::{Result, TsError};
use crate::format::ts::{PacketBatch, PidSet, LABEL_MAX, PID_MAX};
use crate::pipeline::{Flow, Stage, StageRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelOptions {
    pub pids: Vec<u16>,
    pub label: u8,
    /// Only label packets starting a payload unit.
    #[serde(default)]
    pub pusi_only: bool,
}

/// Attaches a label to the packets of selected PIDs.
///
/// Combined with the `close_labels` option of the `hls` output, this lets an
/// upstream stage decide where segments end.
pub struct LabelStage {
    pids: PidSet,
    label: u8,
    pusi_only: bool,
    labelled: u64,
}

impl LabelStage {
    pub fn new(options: LabelOptions) -> Result<Self> {
        if options.label > LABEL_MAX {
            return Err(TsError::Config(format!(
                "label: label {} out of range 0..={}",
                options.label, LABEL_MAX
            )));
        }
        if options.pids.is_empty() {
            return Err(TsError::Config("label: at least one PID is required".into()));
        }
        if let Some(pid) = options.pids.iter().find(|&&pid| pid as usize >= PID_MAX) {
            return Err(TsError::Config(format!("label: invalid PID {:#x}", pid)));
        }
        Ok(Self {
            pids: options.pids.iter().copied().collect(),
            label: options.label,
            pusi_only: options.pusi_only,
            labelled: 0,
        })
    }

    pub fn create(spec: &StageSpec) -> Result<Box<dyn Stage>> {
        Ok(Box::new(Self::new(spec.options()?)?))
    }
}

#[async_trait]
impl Stage for LabelStage {
    fn name(&self) -> &str {
        "label"
    }

    fn role(&self) -> StageRole {
        StageRole::Transform
    }

    async fn process_batch(&mut self, batch: &mut PacketBatch) -> Result<Flow> {
        for (packet, metadata) in batch.iter_mut() {
            if self.pids.contains(packet.pid()) && (!self.pusi_only || packet.pusi()) {
                metadata.labels.insert(self.label);
                self.labelled += 1;
            }
        }
        Ok(Flow::Continue)
    }

    async fn stop(&mut self) -> Result<()> {
        log::debug!("label: {} packets labelled {}", self.labelled, self.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::{PacketMetadata, TSHeader, TsPacket};
    use tokio::runtime::Runtime;

    #[test]
    fn test_labels_pusi_packets_of_selected_pid() {
        Runtime::new().unwrap().block_on(async {
            let mut stage = LabelStage::new(LabelOptions {
                pids: vec![0x100],
                label: 7,
                pusi_only: true,
            })
            .unwrap();

            let mut batch = PacketBatch::with_capacity(3);
            for (pid, pusi) in [(0x100, true), (0x100, false), (0x101, true)] {
                let packet = TsPacket::build(&TSHeader::new(pid).with_pusi(pusi), None, &[0; 8]).unwrap();
                batch.push(packet, PacketMetadata::new()).unwrap();
            }
            stage.process_batch(&mut batch).await.unwrap();

            let labelled: Vec<bool> = batch.metadata().iter().map(|m| m.labels.contains(7)).collect();
            assert_eq!(labelled, vec![true, false, false]);
        });
    }

    #[test]
    fn test_label_range_checked() {
        let err = LabelStage::new(LabelOptions {
            pids: vec![0x100],
            label: 32,
            pusi_only: false,
        })
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "configuration error: label: label 32 out of range 0..=31");
    }
}
