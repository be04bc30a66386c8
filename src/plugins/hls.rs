use crate::config::StageSpec;
use crate::error::{Result, TsError};
use crate::format::ts::{
    BoundaryConfig, HLSConfig, HLSSegmenter, LabelSet, PacketBatch, LABEL_MAX, TS_PACKET_SIZE,
};
use crate::pipeline::{Flow, Stage, StageRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_VOD_DURATION: u64 = 10;
pub const DEFAULT_LIVE_DURATION: u64 = 5;
pub const DEFAULT_EXTRA_DURATION: u64 = 2;

fn default_extra_duration() -> u64 {
    DEFAULT_EXTRA_DURATION
}

/// Options of the `hls` output. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HlsOptions {
    /// Segment file template, e.g. `out/seg.ts` or `out/seg-0100.ts`.
    pub template: String,
    #[serde(default)]
    pub playlist: Option<PathBuf>,
    /// Target segment duration; 10 by default, 5 in live mode.
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub max_unit_packets: Option<u64>,
    /// Fixed segment size in bytes, rounded down to whole packets.
    #[serde(default)]
    pub fixed_segment_size: Option<u64>,
    /// Segments kept in live mode; 0 keeps everything.
    #[serde(default)]
    pub live: usize,
    #[serde(default)]
    pub close_labels: Vec<u8>,
    #[serde(default)]
    pub intra_close: bool,
    #[serde(default = "default_extra_duration")]
    pub max_extra_duration: u64,
    #[serde(default)]
    pub start_media_sequence: u64,
}

impl HlsOptions {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            playlist: None,
            duration: None,
            max_unit_packets: None,
            fixed_segment_size: None,
            live: 0,
            close_labels: Vec::new(),
            intra_close: false,
            max_extra_duration: DEFAULT_EXTRA_DURATION,
            start_media_sequence: 0,
        }
    }

    /// Resolves defaults and checks option combinations.
    pub fn to_config(&self) -> Result<HLSConfig> {
        let max_unit_packets = match (self.max_unit_packets, self.fixed_segment_size) {
            (Some(_), Some(_)) => {
                return Err(TsError::Config(
                    "hls: max_unit_packets and fixed_segment_size are mutually exclusive".into(),
                ))
            }
            (Some(packets), None) => Some(packets),
            (None, Some(bytes)) => Some(bytes / TS_PACKET_SIZE as u64),
            (None, None) => None,
        };
        if let Some(label) = self.close_labels.iter().find(|&&label| label > LABEL_MAX) {
            return Err(TsError::Config(format!(
                "hls: close label {} out of range 0..={}",
                label, LABEL_MAX
            )));
        }
        let default_duration = if self.live > 0 {
            DEFAULT_LIVE_DURATION
        } else {
            DEFAULT_VOD_DURATION
        };

        let boundary = BoundaryConfig {
            target_duration: Duration::from_secs(self.duration.unwrap_or(default_duration)),
            max_unit_packets,
            close_labels: self.close_labels.iter().copied().collect::<LabelSet>(),
            intra_close: self.intra_close,
            max_extra_duration: Duration::from_secs(self.max_extra_duration),
        };
        boundary.validate()?;

        Ok(HLSConfig {
            template: self.template.clone(),
            playlist: self.playlist.clone(),
            boundary,
            live_depth: self.live,
            start_media_sequence: self.start_media_sequence,
        })
    }
}

/// Segments the stream into files and maintains an HLS playlist.
pub struct HlsOutput {
    segmenter: HLSSegmenter,
}

impl HlsOutput {
    pub fn new(options: &HlsOptions) -> Result<Self> {
        Ok(Self {
            segmenter: HLSSegmenter::new(options.to_config()?)?,
        })
    }

    pub fn create(spec: &StageSpec) -> Result<Box<dyn Stage>> {
        Ok(Box::new(Self::new(&spec.options()?)?))
    }

    pub fn segmenter(&self) -> &HLSSegmenter {
        &self.segmenter
    }
}

async fn create_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            tokio::fs::create_dir_all(dir).await?;
            Ok(())
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl Stage for HlsOutput {
    fn name(&self) -> &str {
        "hls"
    }

    fn role(&self) -> StageRole {
        StageRole::Sink
    }

    async fn start(&mut self) -> Result<()> {
        let config = self.segmenter.config();
        create_parent_dir(Path::new(&config.template)).await?;
        if let Some(playlist) = &config.playlist {
            create_parent_dir(playlist).await?;
        }
        log::info!(
            "hls: target duration {} s, {}",
            config.boundary.target_duration.as_secs(),
            if config.live_depth > 0 {
                format!("live with {} segments", config.live_depth)
            } else {
                "archival".to_string()
            }
        );
        Ok(())
    }

    async fn process_batch(&mut self, batch: &mut PacketBatch) -> Result<Flow> {
        for (packet, metadata) in batch.iter() {
            self.segmenter.write_packet(packet, metadata).await?;
        }
        Ok(Flow::Continue)
    }

    async fn stop(&mut self) -> Result<()> {
        self.segmenter.finish().await?;
        log::info!("hls: {} segments written", self.segmenter.closed_segments());
        Ok(())
    }

    async fn abort(&mut self) {
        self.segmenter.abort().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_option_defaults() {
        let spec = StageSpec::new("hls", json!({ "template": "out/seg.ts" }));
        let config = spec.options::<HlsOptions>().unwrap().to_config().unwrap();
        assert_eq!(config.boundary.target_duration, Duration::from_secs(10));
        assert_eq!(config.boundary.max_extra_duration, Duration::from_secs(2));
        assert_eq!(config.live_depth, 0);
        assert_eq!(config.playlist, None);

        let spec = StageSpec::new("hls", json!({ "template": "seg.ts", "live": 6 }));
        let config = spec.options::<HlsOptions>().unwrap().to_config().unwrap();
        assert_eq!(config.boundary.target_duration, Duration::from_secs(5));
        assert_eq!(config.live_depth, 6);
    }

    #[test]
    fn test_fixed_segment_size_in_packets() {
        let mut options = HlsOptions::new("seg.ts");
        options.fixed_segment_size = Some(188 * 1000 + 100);
        let config = options.to_config().unwrap();
        assert_eq!(config.boundary.max_unit_packets, Some(1000));

        options.max_unit_packets = Some(10);
        assert!(options.to_config().unwrap_err().is_config());
    }

    #[test]
    fn test_size_and_labels_conflict() {
        let mut options = HlsOptions::new("seg.ts");
        options.max_unit_packets = Some(500);
        options.close_labels = vec![3];
        let err = options.to_config().unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: max_unit_packets and close_labels are mutually exclusive"
        );
    }

    #[test]
    fn test_unknown_option_rejected() {
        let spec = StageSpec::new("hls", json!({ "template": "seg.ts", "segment_time": 4 }));
        let err = HlsOutput::create(&spec).err().unwrap();
        assert!(err.is_config());
    }
}
