// crates/storyreel-core/src/scene.rs
//
// Scene and music descriptors handed to the assembler / remixer.
// Pure data, serializable so a caller can persist a job as JSON.
//
// A SceneAsset is what the caller knows before assembly (duration may be
// missing). A ResolvedScene is what the assembler works from after every
// asset has been opened and its duration made authoritative.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// One narrated scene: a still image held for the length of its speech clip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneAsset {
    pub image_path:     PathBuf,
    pub audio_path:     PathBuf,
    /// Seconds. When present it is authoritative over the decoded length.
    /// When absent the assembler decodes `audio_path` and measures it.
    #[serde(default)]
    pub audio_duration: Option<f64>,
    #[serde(default)]
    pub caption_text:   Option<String>,
}

impl SceneAsset {
    pub fn new(image_path: impl Into<PathBuf>, audio_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path:     image_path.into(),
            audio_path:     audio_path.into(),
            audio_duration: None,
            caption_text:   None,
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.audio_duration = Some(secs);
        self
    }

    pub fn with_caption(mut self, text: impl Into<String>) -> Self {
        self.caption_text = Some(text.into());
        self
    }

    /// Caption to overlay, or None when absent or whitespace-only.
    pub fn caption(&self) -> Option<&str> {
        self.caption_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Ordered scenes. Index 0 plays first; clips are spliced with hard cuts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub scenes: Vec<SceneAsset>,
}

impl Timeline {
    pub fn new(scenes: Vec<SceneAsset>) -> Self {
        Self { scenes }
    }

    pub fn len(&self) -> usize { self.scenes.len() }

    pub fn is_empty(&self) -> bool { self.scenes.is_empty() }

    /// Sum of the durations the caller supplied. Scenes without a duration
    /// contribute nothing; use the assembler's report for the real total.
    pub fn total_duration(&self) -> f64 {
        self.scenes.iter().filter_map(|s| s.audio_duration).sum()
    }
}

/// Background music plus its mix gain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MusicTrack {
    pub path:   PathBuf,
    /// Linear gain applied to the music samples. Not clamped: 1.5 amplifies.
    #[serde(default = "default_music_volume")]
    pub volume: f32,
}

impl MusicTrack {
    pub fn new(path: impl Into<PathBuf>, volume: f32) -> Self {
        Self { path: path.into(), volume }
    }
}

pub(crate) fn default_music_volume() -> f32 { 0.3 }

/// A scene whose assets have been opened and whose duration is final.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedScene {
    pub index:      usize,
    pub image_path: PathBuf,
    pub audio_path: PathBuf,
    /// Authoritative clip length in seconds (> 0).
    pub duration:   f64,
    pub caption:    Option<String>,
}

/// A full pipeline run as read from a job file: timeline plus optional music.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Job {
    #[serde(flatten)]
    pub timeline: Timeline,
    #[serde(default)]
    pub music:    Option<MusicTrack>,
}
