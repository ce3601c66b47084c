// crates/storyreel-cli/src/main.rs
//
// `storyreel`: command-line shell around the media pipeline.
//
//   storyreel render --job job.json [--output out.mp4] [--music m.mp3] [--volume 0.3] [--fps 30]
//   storyreel remix  --video in.mp4 --music m.mp3 --output out.mp4 [--volume 0.3] [--fps 30]
//
// Jobs run on a PipelineWorker thread; this thread only waits on the result
// channel and logs progress.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use storyreel_core::config::OutputKind;
use storyreel_core::helpers::time::format_duration;
use storyreel_core::{Job, MusicTrack, PipelineConfig};
use storyreel_media::{AssembleSpec, PipelineResult, PipelineWorker, RemixSpec};

#[derive(Parser, Debug)]
#[command(name = "storyreel")]
#[command(about = "Assemble narrated scene videos and mix in background music", long_about = None)]
struct Cli {
    /// Pipeline settings file; written with defaults if missing
    #[arg(short, long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble the scenes of a job file into one video
    Render {
        /// Job file (JSON: scenes + optional music)
        #[arg(short, long)]
        job: PathBuf,

        /// Output video; defaults to videos/video_<timestamp>.mp4
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Background music, overrides the job's
        #[arg(long)]
        music: Option<PathBuf>,

        /// Music volume (linear), overrides job and config
        #[arg(long)]
        volume: Option<f32>,

        /// Frame rate, overrides config
        #[arg(long)]
        fps: Option<u32>,
    },

    /// Mix background music under an existing video
    Remix {
        #[arg(long)]
        video: PathBuf,

        #[arg(long)]
        music: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        volume: Option<f32>,

        #[arg(long)]
        fps: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let config = PipelineConfig::load_or_default(&cli.config)
        .with_context(|| format!("load config '{}'", cli.config.display()))?;
    config.validate()?;

    storyreel_media::init();
    let worker = PipelineWorker::new();

    match cli.command {
        Command::Render { job, output, music, volume, fps } => {
            render(&worker, &config, &job, output, music, volume, fps)
        }
        Command::Remix { video, music, output, volume, fps } => {
            let track = MusicTrack::new(music, volume.unwrap_or(config.default_music_volume));
            let mut spec = RemixSpec::new(video, track, fps.unwrap_or(config.video_fps), output);
            spec.speech_fade_secs = config.speech_fade_secs;
            run_remix(&worker, spec).map(|_| ())
        }
    }
}

fn render(
    worker:     &PipelineWorker,
    config:     &PipelineConfig,
    job_path:   &Path,
    output:     Option<PathBuf>,
    music_path: Option<PathBuf>,
    volume:     Option<f32>,
    fps:        Option<u32>,
) -> anyhow::Result<()> {
    let text = fs::read_to_string(job_path)
        .with_context(|| format!("read job file '{}'", job_path.display()))?;
    let mut job: Job = serde_json::from_str(&text)
        .with_context(|| format!("parse job file '{}'", job_path.display()))?;
    if let Some(base) = job_path.parent() {
        rebase_job(&mut job, base);
    }

    let mut settings = config.render_settings();
    if let Some(fps) = fps {
        settings.fps = fps;
    }

    let output = match output {
        Some(p) => p,
        None => {
            let base = Path::new(".");
            config.ensure_directories_exist(base)?;
            let name = format!("video_{}.mp4", Local::now().format("%Y%m%d_%H%M%S"));
            config.output_dir(base, OutputKind::Videos).join(name)
        }
    };

    let music = match (music_path, job.music.take()) {
        (Some(path), _)     => Some(MusicTrack::new(path, volume.unwrap_or(config.default_music_volume))),
        (None, Some(mut m)) => {
            if let Some(v) = volume {
                m.volume = v;
            }
            Some(m)
        }
        (None, None)        => None,
    };

    // With music, the speech-only cut goes to a side file that the remix
    // reads and that is removed afterwards.
    let speech_out = match &music {
        Some(_) => with_suffix(&output, "_speech"),
        None    => output.clone(),
    };

    info!(
        "render: {} scenes ({} of given speech) from {}",
        job.timeline.len(), format_duration(job.timeline.total_duration()), job_path.display(),
    );
    let fps = settings.fps;
    let id = worker.start_assemble(AssembleSpec {
        timeline: job.timeline,
        settings,
        output:   speech_out.clone(),
    });
    let PipelineResult::AssembleDone { report, .. } = wait(worker, id)? else {
        bail!("assemble job ended without a report");
    };
    info!(
        "assembled {} ({} frames, {})",
        report.output.display(), report.frames, format_duration(report.duration),
    );

    if let Some(track) = music {
        let mut spec = RemixSpec::new(&speech_out, track, fps, &output);
        spec.speech_fade_secs = config.speech_fade_secs;
        run_remix(worker, spec)?;
        if let Err(e) = fs::remove_file(&speech_out) {
            warn!("could not remove {}: {e}", speech_out.display());
        }
    }

    info!("done: {}", output.display());
    Ok(())
}

fn run_remix(worker: &PipelineWorker, spec: RemixSpec) -> anyhow::Result<PathBuf> {
    info!(
        "remix: {} + {} @ volume {}",
        spec.video.display(), spec.music.path.display(), spec.music.volume,
    );
    let id = worker.start_remix(spec);
    let PipelineResult::RemixDone { report, .. } = wait(worker, id)? else {
        bail!("remix job ended without a report");
    };
    info!(
        "remixed {} ({}, music ×{})",
        report.output.display(), format_duration(report.duration), report.music_loops,
    );
    Ok(report.output)
}

/// Block until `job_id` finishes, logging progress every 10 %.
fn wait(worker: &PipelineWorker, job_id: Uuid) -> anyhow::Result<PipelineResult> {
    let mut last_step = None;
    for msg in worker.rx.iter() {
        if msg.job_id() != job_id {
            continue;
        }
        match msg {
            PipelineResult::Progress { kind, progress, .. } => {
                let step = (progress.fraction() * 10.0) as u32;
                if last_step != Some(step) {
                    last_step = Some(step);
                    info!(
                        "{kind:?}: {:>3.0}% ({}/{} frames)",
                        progress.fraction() * 100.0, progress.frame, progress.total_frames,
                    );
                }
            }
            PipelineResult::Failed { error, .. } => return Err(error.into()),
            PipelineResult::Cancelled { .. }    => bail!("job {job_id} cancelled"),
            done                                => return Ok(done),
        }
    }
    bail!("worker channel closed before job {job_id} finished")
}

/// Relative asset paths in a job file are relative to the job file.
fn rebase_job(job: &mut Job, base: &Path) {
    let fix = |p: &mut PathBuf| {
        if p.is_relative() {
            *p = base.join(&*p);
        }
    };
    for scene in &mut job.timeline.scenes {
        fix(&mut scene.image_path);
        fix(&mut scene.audio_path);
    }
    if let Some(m) = &mut job.music {
        fix(&mut m.path);
    }
}

/// `dir/name.ext` → `dir/name<suffix>.ext`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None      => format!("{stem}{suffix}"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyreel_core::SceneAsset;

    #[test]
    fn suffix_goes_before_extension() {
        assert_eq!(with_suffix(Path::new("out/v.mp4"), "_speech"), PathBuf::from("out/v_speech.mp4"));
        assert_eq!(with_suffix(Path::new("v"), "_speech"), PathBuf::from("v_speech"));
    }

    #[test]
    fn job_paths_rebased_unless_absolute() {
        let mut job = Job::default();
        job.timeline.scenes.push(SceneAsset::new("img/1.png", "/abs/1.wav"));
        job.music = Some(MusicTrack::new("m.mp3", 0.3));
        rebase_job(&mut job, Path::new("/jobs"));
        assert_eq!(job.timeline.scenes[0].image_path, PathBuf::from("/jobs/img/1.png"));
        assert_eq!(job.timeline.scenes[0].audio_path, PathBuf::from("/abs/1.wav"));
        assert_eq!(job.music.unwrap().path, PathBuf::from("/jobs/m.mp3"));
    }

    #[test]
    fn cli_parses_render() {
        let cli = Cli::try_parse_from([
            "storyreel", "render", "--job", "job.json", "--volume", "0.5", "--fps", "24",
        ]).unwrap();
        match cli.command {
            Command::Render { job, volume, fps, output, music } => {
                assert_eq!(job, PathBuf::from("job.json"));
                assert_eq!(volume, Some(0.5));
                assert_eq!(fps, Some(24));
                assert!(output.is_none() && music.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("config.json"));
    }

    #[test]
    fn cli_remix_requires_output() {
        assert!(Cli::try_parse_from([
            "storyreel", "remix", "--video", "a.mp4", "--music", "m.mp3",
        ]).is_err());
    }
}
