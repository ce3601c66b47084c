// crates/storyreel-core/src/lib.rs
//
// Plain data and math shared by storyreel-media and storyreel-cli.
// No FFmpeg, no threads, no I/O beyond reading/writing the config file.

pub mod config;
pub mod error;
pub mod helpers;
pub mod media_types;
pub mod mix;
pub mod scene;

pub use config::PipelineConfig;
pub use error::{ConfigError, PipelineError};
pub use scene::{Job, MusicTrack, ResolvedScene, SceneAsset, Timeline};
