// crates/storyreel-media/src/lib.rs
//
// FFmpeg-backed half of storyreel. Blocking, synchronous entry points
// (`assemble`, `remix`) plus a thread-per-job `PipelineWorker` for callers
// that must not block.
//
// Module map:
//   probe    : container/stream facts (duration, fps, which streams exist)
//   audio    : decode any audio stream to 44.1 kHz stereo f32 `Pcm`
//   decode   : decode a still image to RGBA at the output size
//   overlay  : caption rasterisation and RGBA compositing
//   encode   : the timeline assembler (H.264 + AAC)
//   remix    : background-music mixing onto an assembled video
//   worker   : background threads, cancel flags, result channel

use std::sync::Once;

pub mod audio;
pub mod decode;
pub mod encode;
pub mod overlay;
pub mod probe;
pub mod remix;
pub mod worker;

mod helpers;

pub use encode::{assemble, AssembleSpec};
pub use remix::{remix, RemixSpec, DEFAULT_SPEECH_FADE_SECS};
pub use worker::PipelineWorker;
pub use storyreel_core::media_types::{AssembleReport, JobKind, PipelineResult, Progress, RemixReport};

static INIT: Once = Once::new();

/// Initialise FFmpeg once per process. Safe to call repeatedly; the
/// pipeline entry points call it themselves.
pub fn init() {
    INIT.call_once(|| {
        if let Err(e) = ffmpeg_the_third::init() {
            tracing::error!("ffmpeg init failed: {e}");
        }
        ffmpeg_the_third::util::log::set_level(ffmpeg_the_third::util::log::Level::Error);
    });
}
