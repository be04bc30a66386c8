use crate::error::{Result, TsError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::path::Path;

pub const DEFAULT_BUFFER_DEPTH: usize = 16;
pub const DEFAULT_BATCH_SIZE: usize = 128;
pub const MAX_BATCH_SIZE: usize = 65536;
pub const DEFAULT_MAX_STAGES: usize = 64;

/// Environment variable overriding [`PipelineConfig::buffer_depth`].
pub const ENV_BUFFER_DEPTH: &str = "TSPIPE_BUFFER_DEPTH";
/// Environment variable overriding [`PipelineConfig::batch_size`].
pub const ENV_BATCH_SIZE: &str = "TSPIPE_BATCH_SIZE";

/// One stage of the chain: a plugin name and its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    pub name: String,
    #[serde(default)]
    pub options: Value,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, options: Value) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    /// Decodes the options into the plugin's own option type.
    ///
    /// Missing options decode like an empty object, so plugins whose options
    /// all have defaults need no `options` entry at all.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T> {
        let options = match &self.options {
            Value::Null => json!({}),
            other => other.clone(),
        };
        serde_json::from_value(options)
            .map_err(|e| TsError::Config(format!("plugin '{}': {}", self.name, e)))
    }
}

fn default_buffer_depth() -> usize {
    DEFAULT_BUFFER_DEPTH
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_stages() -> usize {
    DEFAULT_MAX_STAGES
}

/// Description of a whole pipeline, usually read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Batches held by each queue between two stages.
    #[serde(default = "default_buffer_depth")]
    pub buffer_depth: usize,
    /// Packets per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound on the total number of stages.
    #[serde(default = "default_max_stages")]
    pub max_stages: usize,
    pub input: StageSpec,
    #[serde(default)]
    pub processors: Vec<StageSpec>,
    pub output: StageSpec,
}

impl PipelineConfig {
    pub fn new(input: StageSpec, output: StageSpec) -> Self {
        Self {
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            batch_size: DEFAULT_BATCH_SIZE,
            max_stages: DEFAULT_MAX_STAGES,
            input,
            processors: Vec::new(),
            output,
        }
    }

    pub fn with_processor(mut self, spec: StageSpec) -> Self {
        self.processors.push(spec);
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a configuration file, then applies the environment overrides
    /// and validates the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TsError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config = Self::from_json(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(depth) = lookup(ENV_BUFFER_DEPTH) {
            self.buffer_depth = depth.trim().parse()?;
        }
        if let Some(size) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = size.trim().parse()?;
        }
        Ok(())
    }

    /// Input, processors and output.
    pub fn stage_count(&self) -> usize {
        self.processors.len() + 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_depth == 0 {
            return Err(TsError::Config("buffer_depth must be at least 1".into()));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(TsError::Config(format!(
                "batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if self.max_stages < 2 {
            return Err(TsError::Config("max_stages must be at least 2".into()));
        }
        if self.stage_count() > self.max_stages {
            return Err(TsError::Config(format!(
                "{} stages configured, max_stages is {}",
                self.stage_count(),
                self.max_stages
            )));
        }
        Ok(())
    }
}

/// Writes a starter configuration if `path` does not exist yet.
///
/// Returns whether a file was written.
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> Result<bool> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(false);
    }
    let template = PipelineConfig::new(
        StageSpec::new("file", json!({ "path": "input.ts" })),
        StageSpec::new(
            "hls",
            json!({
                "template": "output/segment.ts",
                "playlist": "output/playlist.m3u8",
                "duration": 10
            }),
        ),
    )
    .with_processor(StageSpec::new("continuity", json!({ "pids": [0] })));
    std::fs::write(path, serde_json::to_string_pretty(&template)?)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    fn minimal() -> PipelineConfig {
        PipelineConfig::new(StageSpec::new("null", Value::Null), StageSpec::new("drop", Value::Null))
    }

    #[test]
    fn test_defaults_from_json() {
        let config = PipelineConfig::from_json(
            r#"{ "input": { "name": "file", "options": { "path": "in.ts" } },
                 "output": { "name": "drop" } }"#,
        )
        .unwrap();
        assert_eq!(config.buffer_depth, DEFAULT_BUFFER_DEPTH);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.max_stages, DEFAULT_MAX_STAGES);
        assert!(config.processors.is_empty());
        assert_eq!(config.output.options, Value::Null);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = PipelineConfig::from_json(
            r#"{ "input": { "name": "null" }, "output": { "name": "drop" }, "depth": 3 }"#,
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = minimal();
        config.batch_size = 0;
        assert_err!(config.validate());
        config.batch_size = MAX_BATCH_SIZE + 1;
        assert_err!(config.validate());
        config.batch_size = MAX_BATCH_SIZE;
        assert_ok!(config.validate());

        config.buffer_depth = 0;
        assert_err!(config.validate());
    }

    #[test]
    fn test_max_stages_enforced() {
        let mut config = minimal()
            .with_processor(StageSpec::new("label", Value::Null))
            .with_processor(StageSpec::new("label", Value::Null));
        config.max_stages = 3;
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: 4 stages configured, max_stages is 3");
        config.max_stages = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_apply_after_file() {
        let mut config = minimal();
        config
            .apply_overrides(|key| match key {
                ENV_BUFFER_DEPTH => Some("4".to_string()),
                ENV_BATCH_SIZE => Some(" 512 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.buffer_depth, 4);
        assert_eq!(config.batch_size, 512);

        let err = config
            .apply_overrides(|key| (key == ENV_BATCH_SIZE).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, TsError::ParseInt(_)));
    }

    #[test]
    fn test_stage_options_decoding() {
        #[derive(Deserialize, Debug)]
        #[serde(deny_unknown_fields)]
        struct Options {
            #[serde(default)]
            count: u64,
        }

        let spec = StageSpec::new("null", Value::Null);
        assert_eq!(spec.options::<Options>().unwrap().count, 0);

        let spec = StageSpec::new("null", json!({ "count": 5 }));
        assert_eq!(spec.options::<Options>().unwrap().count, 5);

        let spec = StageSpec::new("null", json!({ "cuont": 5 }));
        let err = spec.options::<Options>().unwrap_err();
        assert!(err.to_string().contains("plugin 'null'"));
    }

    #[test]
    fn test_default_template_round_trip() {
        let path = std::env::temp_dir().join(format!("tspipe-template-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        assert!(create_default_config_template(&path).unwrap());
        assert!(!create_default_config_template(&path).unwrap());
        let config = PipelineConfig::load(&path);
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.input.name, "file");
        assert_eq!(config.output.name, "hls");
        assert_eq!(config.stage_count(), 3);
    }
}
