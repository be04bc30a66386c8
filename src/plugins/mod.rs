//! Built-in stages.
//!
//! | role      | name         | stage                               |
//! |-----------|--------------|-------------------------------------|
//! | input     | `file`       | [`file::FileInput`]                 |
//! | input     | `null`       | [`null::NullInput`]                 |
//! | processor | `continuity` | [`continuity::ContinuityStage`]     |
//! | processor | `label`      | [`label::LabelStage`]               |
//! | output    | `file`       | [`file::FileOutput`]                |
//! | output    | `drop`       | [`drop::DropOutput`]                |
//! | output    | `hls`        | [`hls::HlsOutput`]                  |

pub mod continuity;
pub mod drop;
pub mod file;
pub mod hls;
pub mod label;
pub mod null;

use crate::pipeline::{PluginRegistry, StageRole};

/// Adds every built-in stage to `registry`.
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register(StageRole::Source, "file", file::FileInput::create);
    registry.register(StageRole::Source, "null", null::NullInput::create);
    registry.register(StageRole::Transform, "continuity", continuity::ContinuityStage::create);
    registry.register(StageRole::Transform, "label", label::LabelStage::create);
    registry.register(StageRole::Sink, "file", file::FileOutput::create);
    registry.register(StageRole::Sink, "drop", drop::DropOutput::create);
    registry.register(StageRole::Sink, "hls", hls::HlsOutput::create);
}
