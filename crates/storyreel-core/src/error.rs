// crates/storyreel-core/src/error.rs
//
// Typed failures surfaced to whoever drives the pipeline. Every variant is
// terminal for the current call: either a complete video is written or
// nothing is.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A file is missing, unreadable, or not decodable.
    /// `scene_index` is None for remix inputs (video / music).
    #[error("{} '{}' unavailable: {reason}", describe_scene(*scene_index), path.display())]
    AssetUnavailable {
        scene_index: Option<usize>,
        path:        PathBuf,
        reason:      String,
    },

    #[error("timeline has no scenes")]
    EmptyTimeline,

    #[error("scene {scene_index} has invalid duration {duration}s (must be > 0)")]
    InvalidSceneDuration { scene_index: usize, duration: f64 },

    #[error("music track '{}' is unusable: {reason}", path.display())]
    InvalidMusicTrack { path: PathBuf, reason: String },

    #[error("encode failed: {0}")]
    EncodeFailure(String),

    #[error("invalid render settings: {0}")]
    InvalidSettings(String),

    #[error("cancelled")]
    Cancelled,
}

fn describe_scene(idx: Option<usize>) -> String {
    match idx {
        Some(i) => format!("scene {i} asset"),
        None    => "asset".to_string(),
    }
}

impl PipelineError {
    pub fn asset(scene_index: Option<usize>, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::AssetUnavailable {
            scene_index,
            path:   path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors loading or saving `PipelineConfig`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_message_names_scene_and_path() {
        let e = PipelineError::asset(Some(2), "/tmp/missing.mp3", "No such file");
        let msg = e.to_string();
        assert!(msg.contains("scene 2"), "{msg}");
        assert!(msg.contains("/tmp/missing.mp3"), "{msg}");
        assert!(msg.contains("No such file"), "{msg}");
    }

    #[test]
    fn remix_asset_message_has_no_scene() {
        let e = PipelineError::asset(None, "in.mp4", "no audio stream");
        assert!(e.to_string().starts_with("asset 'in.mp4'"));
    }
}
