use crate::config::StageSpec;
use crate::error::{Result, TsError};
use crate::format::ts::{CcMode, CcStatus, ContinuityRegulator, PacketBatch, PidSet, PID_MAX};
use crate::pipeline::{Flow, Stage, StageRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContinuityOptions {
    /// PIDs whose counters are regulated.
    #[serde(default)]
    pub pids: Vec<u16>,
    #[serde(default = "default_mode")]
    pub mode: CcMode,
    /// Also report discontinuities on the other PIDs.
    #[serde(default = "default_true")]
    pub report_unwatched: bool,
}

fn default_mode() -> CcMode {
    CcMode::Generate
}

impl Default for ContinuityOptions {
    fn default() -> Self {
        Self {
            pids: Vec::new(),
            mode: CcMode::Generate,
            report_unwatched: true,
        }
    }
}

/// Regenerates or checks continuity counters.
pub struct ContinuityStage {
    regulator: ContinuityRegulator,
    corrected: u64,
}

impl ContinuityStage {
    pub fn new(options: ContinuityOptions) -> Result<Self> {
        if let Some(pid) = options.pids.iter().find(|&&pid| pid as usize >= PID_MAX) {
            return Err(TsError::Config(format!("continuity: invalid PID {:#x}", pid)));
        }
        let pids: PidSet = options.pids.iter().copied().collect();
        Ok(Self {
            regulator: ContinuityRegulator::new(options.mode)
                .with_pids(pids)
                .report_unwatched(options.report_unwatched),
            corrected: 0,
        })
    }

    pub fn create(spec: &StageSpec) -> Result<Box<dyn Stage>> {
        Ok(Box::new(Self::new(spec.options()?)?))
    }
}

#[async_trait]
impl Stage for ContinuityStage {
    fn name(&self) -> &str {
        "continuity"
    }

    fn role(&self) -> StageRole {
        StageRole::Transform
    }

    async fn process_batch(&mut self, batch: &mut PacketBatch) -> Result<Flow> {
        for (packet, _) in batch.iter_mut() {
            match self.regulator.feed(packet) {
                CcStatus::Discontinuity { expected, found } => log::warn!(
                    "continuity: discontinuity on PID {:#06x}, expected {}, got {}",
                    packet.pid(),
                    expected,
                    found
                ),
                CcStatus::Corrected { .. } => self.corrected += 1,
                _ => {}
            }
        }
        Ok(Flow::Continue)
    }

    async fn stop(&mut self) -> Result<()> {
        log::info!(
            "continuity: {} counters rewritten, {} discontinuities",
            self.corrected,
            self.regulator.discontinuity_count()
        );
        Ok(())
    }
}
