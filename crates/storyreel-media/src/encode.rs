// crates/storyreel-media/src/encode.rs
//
// Timeline Assembler: ordered scenes (still + speech + optional caption) →
// one H.264 + AAC file.
//
// Flow:
//   1. Validate settings, reject an empty timeline.
//   2. Resolve every scene before anything is written: duration sanity,
//      image decodes, speech decodes (≥ 1 sample), caption font loads.
//      The first failing scene aborts the run with its index.
//   3. Lay scenes out on the output timeline with cumulative rounding
//      (`frame_spans` / `sample_spans`): contiguous, no drift.
//   4. Encode into a staged temp file next to the target, then rename.
//
// Stream layout in the output:
//   Stream 0: H.264 video (YUV420P, CRF 18, preset fast, square pixels)
//   Stream 1: AAC audio  (FLTP stereo, 44100 Hz, 128 kbps)
//
// PTS strategy:
//   Video: output frame index in 1/fps. Each scene's still is converted to
//   YUV once and re-sent for every frame of its span.
//   Audio: sample counter in 1/44100. Scene speech is zero-padded or cut to
//   its sample span, so the given duration always wins over the decoded one.
//   Audio is fed up to the end of each video frame to keep muxing interleaved.
//
// Cancellation:
//   `cancel` is checked before each scene is resolved and before every
//   video frame. Cancel and error share one exit path: the staged file is
//   dropped (deleted) and nothing reaches `output`.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;
use tracing::{debug, info, warn};

use storyreel_core::config::RenderSettings;
use storyreel_core::helpers::time::{
    format_duration, format_time, frame_spans, sample_spans, AUDIO_RATE, DURATION_TOLERANCE_SECS,
};
use storyreel_core::media_types::{AssembleReport, Progress};
use storyreel_core::{PipelineError, ResolvedScene, Timeline};

use crate::audio::decode_pcm;
use crate::decode::load_still;
use crate::helpers::aac::{add_aac_stream, AudioEncState};
use crate::helpers::staging::StagedOutput;
use crate::helpers::yuv::rgba_to_yuv420p;
use crate::overlay::CaptionPainter;

// ── Public types ──────────────────────────────────────────────────────────────

/// Complete description of an assemble job.
#[derive(Clone, Debug)]
pub struct AssembleSpec {
    pub timeline: Timeline,
    pub settings: RenderSettings,
    /// Destination file, including extension (`.mp4`).
    pub output:   PathBuf,
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Report progress every this many encoded video frames.
pub(crate) const PROGRESS_INTERVAL: u64 = 15;

/// Size stills are decoded at during validation; only decodability matters.
const PROBE_STILL_SIZE: u32 = 16;

// ── Public entry point ────────────────────────────────────────────────────────

/// Assemble `spec.timeline` into `spec.output`. Blocking; run it off any UI
/// thread (see `PipelineWorker`).
///
/// `on_progress` is called every `PROGRESS_INTERVAL` frames and once at the
/// end. On any error or cancellation nothing is written to `spec.output`.
pub fn assemble(
    spec:            &AssembleSpec,
    cancel:          &AtomicBool,
    mut on_progress: impl FnMut(Progress),
) -> Result<AssembleReport, PipelineError> {
    crate::init();
    let (width, height) = validate_settings(&spec.settings)?;
    let fps = spec.settings.fps;

    if spec.timeline.is_empty() {
        return Err(PipelineError::EmptyTimeline);
    }

    info!("assemble: resolving {} scenes", spec.timeline.len());
    let scenes  = resolve_scenes(&spec.timeline, cancel)?;
    let painter = load_caption_painter(&scenes, &spec.settings, height)?;

    let durations: Vec<f64> = scenes.iter().map(|s| s.duration).collect();
    let clips: Vec<SceneClip> = scenes.iter()
        .zip(frame_spans(&durations, fps))
        .zip(sample_spans(&durations))
        .map(|((scene, frames), samples)| SceneClip { scene, frames, samples })
        .collect();
    let total_frames = clips.last().map_or(0, |c| c.frames.end);

    info!(
        "assemble: {} scenes, {} frames @ {fps} fps ({}) → {}",
        clips.len(), total_frames,
        format_duration(total_frames as f64 / fps as f64),
        spec.output.display(),
    );

    // Declared before the muxer so it outlives it: the temp file is closed
    // before it is either renamed or deleted.
    let staged = StagedOutput::new(&spec.output).map_err(PipelineError::EncodeFailure)?;

    let job = EncodeJob { clips: &clips, width, height, fps, total_frames };
    job.run(staged.path(), painter, cancel, &mut on_progress)?;

    let output = staged.commit().map_err(PipelineError::EncodeFailure)?;
    info!("assemble: wrote {}", output.display());

    Ok(AssembleReport {
        output,
        frames:       total_frames,
        duration:     total_frames as f64 / fps as f64,
        scene_starts: clips.iter().map(|c| c.frames.start as f64 / fps as f64).collect(),
    })
}

// ── Validation and resolution ─────────────────────────────────────────────────

/// Encoded frame size, or `InvalidSettings`.
pub(crate) fn validate_settings(settings: &RenderSettings) -> Result<(u32, u32), PipelineError> {
    if settings.fps == 0 {
        return Err(PipelineError::InvalidSettings("fps must be >= 1".into()));
    }
    let (w, h) = settings.output_dims();
    if w == 0 || h == 0 {
        return Err(PipelineError::InvalidSettings(format!(
            "frame size {}x{} is too small", settings.width, settings.height
        )));
    }
    Ok((w, h))
}

/// Check every scene's assets and settle its duration. Each speech clip is
/// decoded in full, so `cancel` is honoured between scenes.
fn resolve_scenes(timeline: &Timeline, cancel: &AtomicBool) -> Result<Vec<ResolvedScene>, PipelineError> {
    let mut resolved = Vec::with_capacity(timeline.len());

    for (index, scene) in timeline.scenes.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled);
        }
        if let Some(d) = scene.audio_duration {
            if !(d.is_finite() && d > 0.0) {
                return Err(PipelineError::InvalidSceneDuration { scene_index: index, duration: d });
            }
        }

        for path in [&scene.image_path, &scene.audio_path] {
            if !path.is_file() {
                return Err(PipelineError::asset(Some(index), path, "file not found"));
            }
        }

        load_still(&scene.image_path, PROBE_STILL_SIZE, PROBE_STILL_SIZE)
            .map_err(|e| PipelineError::asset(Some(index), &scene.image_path, e))?;

        let decoded = decode_pcm(&scene.audio_path)
            .map_err(|e| PipelineError::asset(Some(index), &scene.audio_path, e.to_string()))?
            .duration_secs();

        let duration = match scene.audio_duration {
            Some(given) => {
                if (given - decoded).abs() > DURATION_TOLERANCE_SECS {
                    warn!(
                        "scene {index}: given duration {given:.3}s differs from decoded {decoded:.3}s; using given"
                    );
                }
                given
            }
            None => decoded,
        };

        debug!("scene {index}: {duration:.3}s ← {}", scene.audio_path.display());
        resolved.push(ResolvedScene {
            index,
            image_path: scene.image_path.clone(),
            audio_path: scene.audio_path.clone(),
            duration,
            caption:    scene.caption().map(str::to_owned),
        });
    }
    Ok(resolved)
}

/// Load the caption font only when some scene has a caption.
fn load_caption_painter(
    scenes:   &[ResolvedScene],
    settings: &RenderSettings,
    frame_h:  u32,
) -> Result<Option<CaptionPainter>, PipelineError> {
    let Some(first) = scenes.iter().find(|s| s.caption.is_some()) else {
        return Ok(None);
    };
    CaptionPainter::load(&settings.caption, frame_h)
        .map(Some)
        .map_err(|(path, reason)| PipelineError::asset(Some(first.index), path, reason))
}

// ── Output plumbing (shared with remix) ───────────────────────────────────────

/// Open a muxer for `path`, guessing the container from its extension and
/// falling back to MP4 when there is none.
pub(crate) fn open_output(path: &Path) -> Result<ffmpeg::format::context::Output, String> {
    let res = if path.extension().is_some() {
        ffmpeg::format::output(path)
    } else {
        ffmpeg::format::output_as(path, "mp4")
    };
    res.map_err(|e| format!("could not open output '{}': {e}", path.display()))
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// One scene placed on the output timeline: the still, caption and speech
/// are held for exactly `frames` / `samples`.
struct SceneClip<'a> {
    scene:   &'a ResolvedScene,
    frames:  Range<u64>,
    samples: Range<u64>,
}

struct EncodeJob<'a> {
    clips:        &'a [SceneClip<'a>],
    width:        u32,
    height:       u32,
    fps:          u32,
    total_frames: u64,
}

impl EncodeJob<'_> {
    fn run(
        &self,
        path:        &Path,
        mut painter: Option<CaptionPainter>,
        cancel:      &AtomicBool,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<(), PipelineError> {
        let fail = PipelineError::EncodeFailure;

        let mut octx  = open_output(path).map_err(fail)?;
        let mut video = add_h264_stream(&mut octx, self.width, self.height, self.fps).map_err(fail)?;
        let mut audio = add_aac_stream(&mut octx).map_err(fail)?;

        octx.write_header().map_err(|e| fail(format!("write output header: {e}")))?;
        // Muxers may rewrite stream time bases in write_header.
        video.bind_stream(&octx).map_err(fail)?;
        audio.bind_stream(&octx).map_err(fail)?;

        for clip in self.clips {
            if cancel.load(Ordering::Relaxed) {
                return Err(PipelineError::Cancelled);
            }
            self.encode_clip(clip, &mut octx, &mut video, &mut audio, painter.as_mut(), cancel, on_progress)?;
        }

        video.finish(&mut octx).map_err(fail)?;
        audio.finish(&mut octx).map_err(fail)?;
        debug!("assemble: {} audio samples encoded", audio.samples_sent());

        octx.write_trailer().map_err(|e| fail(format!("write trailer: {e}")))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_clip(
        &self,
        clip:        &SceneClip,
        octx:        &mut ffmpeg::format::context::Output,
        video:       &mut VideoEncState,
        audio:       &mut AudioEncState,
        painter:     Option<&mut CaptionPainter>,
        cancel:      &AtomicBool,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<(), PipelineError> {
        let fail  = PipelineError::EncodeFailure;
        let scene = clip.scene;
        debug!(
            "scene {} at {}: frames {:?}, samples {:?}",
            scene.index, format_time(clip.frames.start as f64 / self.fps as f64, self.fps),
            clip.frames, clip.samples
        );

        // ── Visual: one composite frame for the whole span ────────────────────
        let mut still = load_still(&scene.image_path, self.width, self.height)
            .map_err(|e| PipelineError::asset(Some(scene.index), &scene.image_path, e))?;
        if let (Some(text), Some(painter)) = (scene.caption.as_deref(), painter) {
            painter.draw(&mut still.data, self.width, self.height, text);
        }
        let mut yuv = rgba_to_yuv420p(&still.data, self.width, self.height).map_err(fail)?;

        // ── Audio: speech fitted to the scene's sample span ───────────────────
        let mut pcm = decode_pcm(&scene.audio_path)
            .map_err(|e| PipelineError::asset(Some(scene.index), &scene.audio_path, e.to_string()))?;
        pcm.fit_exact((clip.samples.end - clip.samples.start) as usize);
        let mut cursor = 0usize;

        for frame_idx in clip.frames.clone() {
            if cancel.load(Ordering::Relaxed) {
                return Err(PipelineError::Cancelled);
            }

            yuv.set_pts(Some(frame_idx as i64));
            video.send(&yuv, octx).map_err(fail)?;

            // Speech up to the end of this frame.
            let frame_end = (frame_idx + 1) * AUDIO_RATE as u64 / self.fps as u64;
            let until = (frame_end.saturating_sub(clip.samples.start) as usize).min(pcm.len());
            if until > cursor {
                audio.fifo.push(&pcm.left[cursor..until], &pcm.right[cursor..until]);
                cursor = until;
                audio.drain_fifo(octx, false).map_err(fail)?;
            }

            let done = frame_idx + 1;
            if done % PROGRESS_INTERVAL == 0 || done == self.total_frames {
                on_progress(Progress { frame: done, total_frames: self.total_frames });
            }
        }

        // Rounding can leave a few samples past the last frame boundary.
        if cursor < pcm.len() {
            audio.fifo.push(&pcm.left[cursor..], &pcm.right[cursor..]);
            audio.drain_fifo(octx, false).map_err(fail)?;
        }
        Ok(())
    }
}

// ── H.264 stream ──────────────────────────────────────────────────────────────

struct VideoEncState {
    encoder:      encoder::video::Video,
    stream_index: usize,
    /// 1/fps; frame PTS are output frame indices.
    enc_tb:       Rational,
    ost_tb:       Rational,
}

impl VideoEncState {
    fn bind_stream(&mut self, octx: &ffmpeg::format::context::Output) -> Result<(), String> {
        self.ost_tb = octx.stream(self.stream_index)
            .ok_or_else(|| "video output stream missing".to_string())?
            .time_base();
        Ok(())
    }

    fn send(&mut self, frame: &VideoFrame, octx: &mut ffmpeg::format::context::Output) -> Result<(), String> {
        self.encoder.send_frame(frame)
            .map_err(|e| format!("send video frame to encoder: {e}"))?;
        self.drain_packets(octx)
    }

    fn drain_packets(&mut self, octx: &mut ffmpeg::format::context::Output) -> Result<(), String> {
        let mut pkt = Packet::empty();
        while self.encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(self.stream_index);
            // Every frame lasts one tick; the muxer needs it for the last one.
            if pkt.duration() == 0 {
                pkt.set_duration(1);
            }
            pkt.rescale_ts(self.enc_tb, self.ost_tb);
            pkt.write_interleaved(octx)
                .map_err(|e| format!("write video packet: {e}"))?;
        }
        Ok(())
    }

    fn finish(&mut self, octx: &mut ffmpeg::format::context::Output) -> Result<(), String> {
        self.encoder.send_eof()
            .map_err(|e| format!("send EOF to video encoder: {e}"))?;
        self.drain_packets(octx)
    }
}

fn add_h264_stream(
    octx:   &mut ffmpeg::format::context::Output,
    width:  u32,
    height: u32,
    fps:    u32,
) -> Result<VideoEncState, String> {
    let enc_tb = Rational::new(1, fps as i32);
    let global_header = octx.format().flags().contains(ffmpeg::format::Flags::GLOBAL_HEADER);

    let h264 = encoder::find(CodecId::H264)
        .ok_or_else(|| "H.264 encoder not found; is libx264 available?".to_string())?;

    let stream_index = {
        let mut ost = octx.add_stream(h264)
            .map_err(|e| format!("add video stream: {e}"))?;
        ost.set_time_base(enc_tb);
        ost.index()
    };

    // Stream has no .codec() accessor in this ffmpeg-the-third; the encoder
    // context is built on its own and copied into codecpar below.
    let mut enc = codec::context::Context::new_with_codec(h264)
        .encoder()
        .video()
        .map_err(|e| format!("create video encoder context: {e}"))?;
    enc.set_width(width);
    enc.set_height(height);
    enc.set_format(Pixel::YUV420P);
    enc.set_time_base(enc_tb);
    enc.set_frame_rate(Some(Rational::new(fps as i32, 1)));
    enc.set_bit_rate(0); // CRF controls quality
    if global_header {
        enc.set_flags(codec::Flags::GLOBAL_HEADER);
    }

    let mut opts = ffmpeg::Dictionary::new();
    opts.set("crf",    "18");
    opts.set("preset", "fast");

    let mut encoder = enc.open_as_with(h264, opts)
        .map_err(|e| format!("open H.264 encoder: {e}"))?;

    // libavcodec resets the SAR while opening; set it on the opened context
    // so avcodec_parameters_from_context picks it up.
    encoder.set_aspect_ratio(Rational::new(1, 1));

    unsafe {
        let ret = ffmpeg::ffi::avcodec_parameters_from_context(
            (**(*octx.as_mut_ptr()).streams.add(stream_index)).codecpar,
            encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
        );
        if ret < 0 {
            return Err(format!("copy H.264 parameters to stream: {ret}"));
        }
    }

    Ok(VideoEncState { encoder, stream_index, enc_tb, ost_tb: enc_tb })
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyreel_core::SceneAsset;

    fn spec(scenes: Vec<SceneAsset>, fps: u32, w: u32, h: u32, out: &Path) -> AssembleSpec {
        AssembleSpec {
            timeline: Timeline::new(scenes),
            settings: RenderSettings::new(fps, w, h),
            output:   out.to_path_buf(),
        }
    }

    #[test]
    fn zero_fps_is_invalid_settings() {
        let err = validate_settings(&RenderSettings::new(0, 640, 360)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSettings(_)));
    }

    #[test]
    fn odd_dims_round_down() {
        assert_eq!(validate_settings(&RenderSettings::new(30, 641, 361)).unwrap(), (640, 360));
        assert!(validate_settings(&RenderSettings::new(30, 1, 360)).is_err());
    }

    #[test]
    fn empty_timeline_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let err = assemble(&spec(vec![], 30, 64, 64, &out), &AtomicBool::new(false), |_| {})
            .unwrap_err();
        assert_eq!(err, PipelineError::EmptyTimeline);
        assert!(!out.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn non_positive_duration_names_scene() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let scenes = vec![SceneAsset::new("a.png", "a.wav").with_duration(-1.0)];
        let err = assemble(&spec(scenes, 30, 64, 64, &out), &AtomicBool::new(false), |_| {})
            .unwrap_err();
        assert_eq!(err, PipelineError::InvalidSceneDuration { scene_index: 0, duration: -1.0 });
        assert!(!out.exists());
    }

    #[test]
    fn missing_file_names_scene_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let img = dir.path().join("missing.png");
        let scenes = vec![SceneAsset::new(&img, dir.path().join("missing.wav"))];
        match assemble(&spec(scenes, 30, 64, 64, &out), &AtomicBool::new(false), |_| {}) {
            Err(PipelineError::AssetUnavailable { scene_index, path, .. }) => {
                assert_eq!(scene_index, Some(0));
                assert_eq!(path, img);
            }
            other => panic!("expected AssetUnavailable, got {other:?}"),
        }
        assert!(!out.exists());
    }

    #[test]
    fn cancel_stops_before_scene_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        // Assets do not exist; a cancelled run must not get as far as looking.
        let scenes = vec![SceneAsset::new(dir.path().join("a.png"), dir.path().join("a.wav"))];
        let err = assemble(&spec(scenes, 30, 64, 64, &out), &AtomicBool::new(true), |_| {})
            .unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
