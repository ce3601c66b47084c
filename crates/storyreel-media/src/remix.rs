// crates/storyreel-media/src/remix.rs
//
// Audio Remixer: lay a background-music track under an assembled video.
//
//   speech = the video's audio, fitted to Dv, tail faded over speech_fade_secs
//   music  = looped (Dm < Dv) or trimmed (Dm ≥ Dv) to exactly Dv, × volume
//   out    = video stream copied packet for packet + AAC(speech + music)
//
// Dv is the video stream's duration, so the mixed track always ends with
// the picture. Inputs are only ever opened for reading; the output goes
// through the same staged write as the assembler.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::media::Type as MediaType;
use ffmpeg::util::rational::Rational;
use tracing::{debug, info, warn};

use storyreel_core::helpers::time::{format_duration, samples_for, ticks_for, AUDIO_RATE};
use storyreel_core::media_types::{Progress, RemixReport};
use storyreel_core::mix::{apply_gain, fade_out_tail, loop_count, loop_to_length, mix_into, rms, Pcm};
use storyreel_core::{MusicTrack, PipelineError};

use crate::audio::{decode_pcm, PcmError};
use crate::encode::{open_output, PROGRESS_INTERVAL};
use crate::helpers::aac::add_aac_stream;
use crate::helpers::staging::StagedOutput;

/// Speech tail fade applied by every remix unless overridden.
pub const DEFAULT_SPEECH_FADE_SECS: f64 = 3.0;

/// Audio is encoded this far ahead of the video packet being copied so the
/// muxer always has both streams to interleave.
const AUDIO_LOOKAHEAD_SECS: f64 = 0.5;

/// Frame rates closer than this count as equal.
const FPS_EPSILON: f64 = 0.01;

#[derive(Clone, Debug)]
pub struct RemixSpec {
    /// An assembled video with one video and one audio stream.
    pub video:            PathBuf,
    pub music:            MusicTrack,
    /// Pipeline frame rate; the copied video keeps its own, a mismatch is
    /// only logged.
    pub fps:              u32,
    pub speech_fade_secs: f64,
    pub output:           PathBuf,
}

impl RemixSpec {
    pub fn new(video: impl Into<PathBuf>, music: MusicTrack, fps: u32, output: impl Into<PathBuf>) -> Self {
        Self {
            video: video.into(),
            music,
            fps,
            speech_fade_secs: DEFAULT_SPEECH_FADE_SECS,
            output: output.into(),
        }
    }
}

/// Mix `spec.music` under `spec.video` into `spec.output`. Blocking.
pub fn remix(
    spec:            &RemixSpec,
    cancel:          &AtomicBool,
    mut on_progress: impl FnMut(Progress),
) -> Result<RemixReport, PipelineError> {
    crate::init();
    validate(spec)?;

    // ── Video input ───────────────────────────────────────────────────────────
    let video_err = |reason: String| PipelineError::asset(None, &spec.video, reason);
    if !spec.video.is_file() {
        return Err(video_err("file not found".into()));
    }
    // Music is checked before the video is probed so a bad track fails fast.
    let music = load_music(&spec.music)?;
    let mut ictx = input(&spec.video).map_err(|e| video_err(format!("open: {e}")))?;

    let (video_idx, in_video_tb, dv) = {
        let stream = ictx.streams().best(MediaType::Video)
            .ok_or_else(|| video_err("no video stream".into()))?;
        let tb = stream.time_base();
        let stream_secs = stream.duration() as f64 * f64::from(tb);
        let dv = if stream_secs > 0.0 {
            stream_secs
        } else {
            ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64
        };

        let rate = stream.avg_frame_rate();
        if rate.numerator() > 0 && rate.denominator() > 0 {
            let in_fps = f64::from(rate);
            if (in_fps - spec.fps as f64).abs() > FPS_EPSILON {
                warn!("remix: video runs at {in_fps:.3} fps, pipeline fps is {}; keeping the video's", spec.fps);
            }
        }
        (stream.index(), tb, dv)
    };
    if ictx.streams().best(MediaType::Audio).is_none() {
        return Err(video_err("no audio stream".into()));
    }
    if !(dv.is_finite() && dv > 0.0) {
        return Err(video_err("duration unknown".into()));
    }

    // ── Mix ───────────────────────────────────────────────────────────────────
    let n = samples_for(dv);
    let mut speech = decode_pcm(&spec.video).map_err(|e| match e {
        PcmError::Empty => video_err("audio stream has no samples".into()),
        PcmError::Unreadable(msg) => video_err(msg),
    })?;
    speech.fit_exact(n);
    fade_out_tail(&mut speech, spec.speech_fade_secs);

    let loops = loop_count(music.len(), n);
    debug!(
        "music {:.3}s → {:.3}s ({loops} pass{})",
        music.duration_secs(), n as f64 / AUDIO_RATE as f64,
        if loops == 1 { "" } else { "es" },
    );
    let mut music = loop_to_length(&music, n);
    apply_gain(&mut music, spec.music.volume);
    info!(
        "remix: {} video, music ×{loops} @ volume {} (speech rms {:.3}, music rms {:.3})",
        format_duration(dv), spec.music.volume, rms(&speech), rms(&music),
    );
    mix_into(&mut speech, &music);
    let mixed = speech;

    // ── Write ─────────────────────────────────────────────────────────────────
    let staged = StagedOutput::new(&spec.output).map_err(PipelineError::EncodeFailure)?;
    let total_frames = ticks_for(dv, spec.fps).max(1);

    let copy = StreamCopy { video_idx, in_video_tb, total_frames };
    copy.run(&mut ictx, staged.path(), &mixed, cancel, &mut on_progress)?;

    let output = staged.commit().map_err(PipelineError::EncodeFailure)?;
    info!("remix: wrote {}", output.display());

    Ok(RemixReport { output, duration: dv, music_loops: loops })
}

fn validate(spec: &RemixSpec) -> Result<(), PipelineError> {
    if spec.fps == 0 {
        return Err(PipelineError::InvalidSettings("fps must be >= 1".into()));
    }
    if !(spec.speech_fade_secs.is_finite() && spec.speech_fade_secs >= 0.0) {
        return Err(PipelineError::InvalidSettings(format!(
            "speech fade {}s must be >= 0", spec.speech_fade_secs
        )));
    }
    if !spec.music.volume.is_finite() {
        return Err(PipelineError::InvalidMusicTrack {
            path:   spec.music.path.clone(),
            reason: format!("volume {} is not a number", spec.music.volume),
        });
    }
    for input in [&spec.video, &spec.music.path] {
        if same_file(input, &spec.output) {
            return Err(PipelineError::InvalidSettings(format!(
                "output '{}' would overwrite an input", spec.output.display()
            )));
        }
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// Decode the music track; a track with no samples is `InvalidMusicTrack`.
fn load_music(track: &MusicTrack) -> Result<Pcm, PipelineError> {
    if !track.path.is_file() {
        return Err(PipelineError::asset(None, &track.path, "file not found"));
    }
    decode_pcm(&track.path).map_err(|e| match e {
        PcmError::Empty => PipelineError::InvalidMusicTrack {
            path:   track.path.clone(),
            reason: "duration is 0".into(),
        },
        PcmError::Unreadable(msg) => PipelineError::asset(None, &track.path, msg),
    })
}

// ── Stream copy + AAC ─────────────────────────────────────────────────────────

struct StreamCopy {
    video_idx:    usize,
    in_video_tb:  Rational,
    total_frames: u64,
}

impl StreamCopy {
    fn run(
        &self,
        ictx:        &mut ffmpeg::format::context::Input,
        path:        &Path,
        mixed:       &Pcm,
        cancel:      &AtomicBool,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<(), PipelineError> {
        let fail = PipelineError::EncodeFailure;

        let mut octx = open_output(path).map_err(fail)?;
        let out_video_idx = copy_stream_params(ictx, self.video_idx, &mut octx).map_err(fail)?;
        let mut audio = add_aac_stream(&mut octx).map_err(fail)?;

        octx.write_header().map_err(|e| fail(format!("write output header: {e}")))?;
        audio.bind_stream(&octx).map_err(fail)?;
        let out_video_tb = octx.stream(out_video_idx)
            .ok_or_else(|| fail("video output stream missing".into()))?
            .time_base();

        let mut cursor = 0usize;
        let mut copied = 0u64;

        for result in ictx.packets() {
            let (stream, mut packet) = result.map_err(|e| fail(format!("read video packet: {e}")))?;
            if stream.index() != self.video_idx { continue; }

            if cancel.load(Ordering::Relaxed) {
                return Err(PipelineError::Cancelled);
            }

            // Keep audio a little ahead of the packet being copied.
            let ts = packet.pts().or(packet.dts()).unwrap_or(0);
            let secs = ts as f64 * f64::from(self.in_video_tb) + AUDIO_LOOKAHEAD_SECS;
            let until = samples_for(secs).min(mixed.len());
            if until > cursor {
                audio.fifo.push(&mixed.left[cursor..until], &mixed.right[cursor..until]);
                cursor = until;
                audio.drain_fifo(&mut octx, false).map_err(fail)?;
            }

            packet.set_stream(out_video_idx);
            packet.rescale_ts(self.in_video_tb, out_video_tb);
            packet.set_position(-1);
            packet.write_interleaved(&mut octx)
                .map_err(|e| fail(format!("write video packet: {e}")))?;

            copied += 1;
            if copied % PROGRESS_INTERVAL == 0 {
                on_progress(Progress { frame: copied.min(self.total_frames), total_frames: self.total_frames });
            }
        }

        if cursor < mixed.len() {
            audio.fifo.push(&mixed.left[cursor..], &mixed.right[cursor..]);
        }
        audio.finish(&mut octx).map_err(fail)?;
        octx.write_trailer().map_err(|e| fail(format!("write trailer: {e}")))?;

        debug!("remix: copied {copied} video packets, {} audio samples", audio.samples_sent());
        on_progress(Progress { frame: self.total_frames, total_frames: self.total_frames });
        Ok(())
    }
}

/// Add an output stream carrying `ictx`'s stream `idx` unchanged.
fn copy_stream_params(
    ictx: &ffmpeg::format::context::Input,
    idx:  usize,
    octx: &mut ffmpeg::format::context::Output,
) -> Result<usize, String> {
    let ist = ictx.stream(idx).ok_or_else(|| "video input stream missing".to_string())?;
    // No safe constructor for an encoder-less stream in ffmpeg-the-third;
    // build it through FFI as avformat's remux example does.
    unsafe {
        let ost = ffmpeg::ffi::avformat_new_stream(octx.as_mut_ptr(), std::ptr::null());
        if ost.is_null() {
            return Err("add video stream: out of memory".into());
        }
        let ist_ptr = ist.as_ptr();
        let ret = ffmpeg::ffi::avcodec_parameters_copy((*ost).codecpar, (*ist_ptr).codecpar);
        if ret < 0 {
            return Err(format!("copy video stream parameters: {ret}"));
        }
        // The input container's tag may be invalid in the output container.
        (*(*ost).codecpar).codec_tag = 0;
        (*ost).time_base      = (*ist_ptr).time_base;
        (*ost).avg_frame_rate = (*ist_ptr).avg_frame_rate;
        Ok((*ost).index as usize)
    }
}
