// crates/storyreel-core/src/media_types.rs
//
// Types that flow from storyreel-media's worker threads back to the caller.
// No ffmpeg, just plain data.

use std::path::PathBuf;
use uuid::Uuid;

use crate::error::PipelineError;

/// Which pipeline stage a job runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    Assemble,
    Remix,
}

/// Frame-level progress of one running job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub frame:        u64,
    pub total_frames: u64,
}

impl Progress {
    pub fn fraction(&self) -> f32 {
        if self.total_frames == 0 { return 0.0; }
        (self.frame as f32 / self.total_frames as f32).min(1.0)
    }
}

/// Outcome of a successful `assemble`.
#[derive(Clone, Debug, PartialEq)]
pub struct AssembleReport {
    pub output:       PathBuf,
    pub frames:       u64,
    /// Sum of the resolved scene durations, seconds.
    pub duration:     f64,
    /// Start time of each scene in the output, seconds.
    pub scene_starts: Vec<f64>,
}

/// Outcome of a successful `remix`.
#[derive(Clone, Debug, PartialEq)]
pub struct RemixReport {
    pub output:         PathBuf,
    /// Video duration the music was fitted to, seconds.
    pub duration:       f64,
    /// How many passes of the music source were needed (1 = trimmed only).
    pub music_loops:    usize,
}

/// Results sent from `PipelineWorker` threads.
#[derive(Debug)]
pub enum PipelineResult {
    Progress     { job_id: Uuid, kind: JobKind, progress: Progress },
    AssembleDone { job_id: Uuid, report: AssembleReport },
    RemixDone    { job_id: Uuid, report: RemixReport },
    Failed       { job_id: Uuid, kind: JobKind, error: PipelineError },
    Cancelled    { job_id: Uuid, kind: JobKind },
}

impl PipelineResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::Progress     { job_id, .. }
            | Self::AssembleDone { job_id, .. }
            | Self::RemixDone    { job_id, .. }
            | Self::Failed       { job_id, .. }
            | Self::Cancelled    { job_id, .. } => *job_id,
        }
    }

    /// True for the last message a job sends.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}
