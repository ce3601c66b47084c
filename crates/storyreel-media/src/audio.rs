// crates/storyreel-media/src/audio.rs
//
// Decode the best audio stream of any file (speech clip, music asset, or an
// assembled video) into planar stereo f32 at AUDIO_RATE.
//
// Everything downstream (fitting, looping, mixing, the AAC FIFO) works on
// that one format, so resampling happens exactly once, here.

use std::fmt;
use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::format::sample::{Sample, Type as SampleType};
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::error::EAGAIN;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use tracing::debug;

use storyreel_core::helpers::time::AUDIO_RATE;
use storyreel_core::mix::Pcm;

/// Target format: float planar, matches the AAC encoder input.
const OUT_FMT: Sample = Sample::F32(SampleType::Planar);

/// Extra output capacity per resampler call, on top of the rate ratio.
const RESAMPLE_HEADROOM: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum PcmError {
    /// Missing file, no audio stream, a decoder that would not open, or a
    /// demux/decode/resample error partway through.
    Unreadable(String),
    /// Opened and decoded fine but produced no samples.
    Empty,
}

impl fmt::Display for PcmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PcmError::Unreadable(msg) => write!(f, "{msg}"),
            PcmError::Empty           => write!(f, "no audio samples decoded"),
        }
    }
}

/// Decode all audio from `src` into stereo `Pcm` at AUDIO_RATE.
pub fn decode_pcm(src: &Path) -> Result<Pcm, PcmError> {
    crate::init();
    let mut ictx = input(src).map_err(|e| PcmError::Unreadable(format!("open: {e}")))?;

    let audio_stream_idx = ictx
        .streams()
        .best(MediaType::Audio)
        .ok_or_else(|| PcmError::Unreadable("no audio stream".into()))?
        .index();

    let mut decoder = {
        let stream = ictx
            .stream(audio_stream_idx)
            .ok_or_else(|| PcmError::Unreadable("audio stream vanished".into()))?;
        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| PcmError::Unreadable(format!("codec context: {e}")))?;
        dec_ctx.decoder().audio()
            .map_err(|e| PcmError::Unreadable(format!("audio decoder: {e}")))?
    };

    // Built lazily on the first frame so the real source format is known.
    let mut resampler: Option<resampling::Context> = None;
    let mut pcm = Pcm::new();

    for result in ictx.packets() {
        let (stream, packet) = match result {
            Ok(item) => item,
            Err(e) => {
                more(Err(e), "demux")?;
                break;
            }
        };
        if stream.index() != audio_stream_idx { continue; }
        decoder.send_packet(&packet).map_err(|e| unreadable("decode", e))?;
        receive_all(&mut decoder, &mut resampler, &mut pcm)?;
    }

    more(decoder.send_eof(), "decode")?;
    receive_all(&mut decoder, &mut resampler, &mut pcm)?;

    if let Some(rs) = resampler.as_mut() {
        drain_resampler(rs, &mut pcm)?;
    }

    if pcm.is_empty() {
        return Err(PcmError::Empty);
    }
    debug!("decoded {:.3}s PCM ← {}", pcm.duration_secs(), src.display());
    Ok(pcm)
}

/// Decoded length in seconds.
pub fn decoded_duration(src: &Path) -> Result<f64, PcmError> {
    decode_pcm(src).map(|p| p.duration_secs())
}

// ── Internal implementation ───────────────────────────────────────────────────

/// `Ok(true)` when the call produced something, `Ok(false)` at end of stream
/// or when the codec wants more input. Any other error means damaged input:
/// a short decode would otherwise be padded with silence downstream.
fn more(res: Result<(), ffmpeg::Error>, stage: &str) -> Result<bool, PcmError> {
    match res {
        Ok(()) => Ok(true),
        Err(ffmpeg::Error::Eof) => Ok(false),
        Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => Ok(false),
        Err(e) => Err(unreadable(stage, e)),
    }
}

fn unreadable(stage: &str, e: ffmpeg::Error) -> PcmError {
    PcmError::Unreadable(format!("{stage}: {e}"))
}

fn receive_all(
    decoder:   &mut ffmpeg::decoder::Audio,
    resampler: &mut Option<resampling::Context>,
    out:       &mut Pcm,
) -> Result<(), PcmError> {
    let mut frame = AudioFrame::empty();
    while more(decoder.receive_frame(&mut frame), "decode")? {
        append_resampled(&frame, resampler, out)?;
    }
    Ok(())
}

/// Resample `frame` to FLTP stereo AUDIO_RATE if needed and append it.
fn append_resampled(
    frame:     &AudioFrame,
    resampler: &mut Option<resampling::Context>,
    out:       &mut Pcm,
) -> Result<(), PcmError> {
    let src_channels = frame.ch_layout().channels();
    let needs_resample = frame.format() != OUT_FMT
        || frame.rate()                != AUDIO_RATE
        || src_channels                != 2;

    if !needs_resample {
        append_planar(frame, out);
        return Ok(());
    }

    if resampler.is_none() {
        // Mono sources must be declared as MONO or swr misreads the layout.
        let src_layout = if src_channels >= 2 { frame.ch_layout() } else { ChannelLayout::MONO };
        let ctx = resampling::Context::get2(
            frame.format(), src_layout,            frame.rate(),
            OUT_FMT,        ChannelLayout::STEREO, AUDIO_RATE,
        ).map_err(|e| PcmError::Unreadable(format!("create resampler: {e}")))?;
        *resampler = Some(ctx);
    }
    let Some(rs) = resampler.as_mut() else { return Ok(()) };

    // Pre-size the output so swr never has to hold back converted samples;
    // an output sized to the input count loses data when upsampling.
    let in_rate  = frame.rate().max(1) as usize;
    let capacity = frame.samples() * AUDIO_RATE as usize / in_rate + RESAMPLE_HEADROOM;
    let mut resampled = AudioFrame::new(OUT_FMT, capacity, ChannelLayoutMask::STEREO);

    // A mid-stream format change fails here against the context built for
    // the first frame.
    rs.run(frame, &mut resampled).map_err(|e| unreadable("resample", e))?;
    append_planar(&resampled, out);
    Ok(())
}

/// Pull whatever swr still buffers after the last input frame.
fn drain_resampler(rs: &mut resampling::Context, out: &mut Pcm) -> Result<(), PcmError> {
    // Bounded: each call empties up to 4096 samples of internal delay.
    for _ in 0..16 {
        let mut tail = AudioFrame::new(OUT_FMT, 4096, ChannelLayoutMask::STEREO);
        rs.flush(&mut tail).map_err(|e| unreadable("resample flush", e))?;
        if tail.samples() == 0 { break; }
        append_planar(&tail, out);
    }
    Ok(())
}

/// Copy a FLTP frame into `out`. Mono frames fill both channels.
fn append_planar(frame: &AudioFrame, out: &mut Pcm) {
    let n = frame.samples();
    if n == 0 { return; }
    let left = plane_f32(frame, 0, n);
    let right = if frame.ch_layout().channels() >= 2 { plane_f32(frame, 1, n) } else { left.clone() };
    out.extend(&left, &right);
}

fn plane_f32(frame: &AudioFrame, plane: usize, n: usize) -> Vec<f32> {
    frame.data(plane)
        .chunks_exact(4)
        .take(n)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_stream_and_again_stop_quietly() {
        assert_eq!(more(Ok(()), "decode"), Ok(true));
        assert_eq!(more(Err(ffmpeg::Error::Eof), "decode"), Ok(false));
        assert_eq!(more(Err(ffmpeg::Error::Other { errno: EAGAIN }), "decode"), Ok(false));
    }

    #[test]
    fn damaged_data_is_unreadable() {
        match more(Err(ffmpeg::Error::InvalidData), "decode") {
            Err(PcmError::Unreadable(msg)) => assert!(msg.starts_with("decode: "), "{msg}"),
            other => panic!("expected Unreadable, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_unreadable() {
        let err = decode_pcm(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, PcmError::Unreadable(_)), "{err:?}");
    }
}
