// crates/storyreel-media/src/helpers/aac.rs
//
// AAC output stream shared by the assembler and the remixer.
//
// AAC wants exactly `frame_size` (1024) samples per input frame, while the
// pipeline hands over PCM in whatever chunk matches the current video frame.
// Everything goes through a planar stereo FIFO; full frames are popped from
// the front, the remainder carries over, and the tail is zero-padded once at
// the very end.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::Sample;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;

use storyreel_core::helpers::time::AUDIO_RATE;

const AAC_BIT_RATE: usize = 128_000;

// ── FIFO ─────────────────────────────────────────────────────────────────────

/// Stereo FLTP sample queue.
#[derive(Default)]
pub struct AudioFifo {
    left:  Vec<f32>,
    right: Vec<f32>,
}

impl AudioFifo {
    pub fn len(&self) -> usize { self.left.len() }

    pub fn is_empty(&self) -> bool { self.left.is_empty() }

    pub fn push(&mut self, left: &[f32], right: &[f32]) {
        let n = left.len().min(right.len());
        self.left.extend_from_slice(&left[..n]);
        self.right.extend_from_slice(&right[..n]);
    }

    /// Pop `n` samples as an encoder frame with PTS `sample_idx`.
    /// Short tails are zero-padded to `n`.
    fn pop_frame(&mut self, n: usize, sample_idx: i64) -> AudioFrame {
        let available = self.left.len().min(n);

        let mut frame = AudioFrame::new(
            Sample::F32(SampleType::Planar),
            n,
            ChannelLayoutMask::STEREO,
        );
        frame.set_rate(AUDIO_RATE);
        frame.set_pts(Some(sample_idx));

        write_plane(&mut frame, 0, &self.left[..available], n);
        write_plane(&mut frame, 1, &self.right[..available], n);

        self.left.drain(..available);
        self.right.drain(..available);
        frame
    }
}

fn write_plane(frame: &mut AudioFrame, plane: usize, src: &[f32], n: usize) {
    let dst = frame.data_mut(plane);
    for (i, bytes) in dst.chunks_exact_mut(4).take(n).enumerate() {
        let v = src.get(i).copied().unwrap_or(0.0);
        bytes.copy_from_slice(&v.to_ne_bytes());
    }
}

// ── Encoder state ────────────────────────────────────────────────────────────

/// The opened AAC encoder plus everything needed to keep writing to it.
pub struct AudioEncState {
    encoder:        encoder::Audio,
    stream_index:   usize,
    /// Next frame's PTS in samples (encoder time base 1/AUDIO_RATE).
    out_sample_idx: i64,
    frame_size:     usize,
    pub fifo:       AudioFifo,
    audio_tb:       Rational,
    /// Muxer time base of the output stream; only final after write_header.
    ost_tb:         Rational,
}

impl AudioEncState {
    /// Samples already handed to the encoder.
    pub fn samples_sent(&self) -> i64 { self.out_sample_idx }

    /// Pick up the muxer's time base. Call once, after `write_header`.
    pub fn bind_stream(&mut self, octx: &ffmpeg::format::context::Output) -> Result<(), String> {
        self.ost_tb = octx.stream(self.stream_index)
            .ok_or_else(|| "audio output stream missing".to_string())?
            .time_base();
        Ok(())
    }

    /// Encode every full frame in the FIFO. With `flush`, the partial tail
    /// goes out too, zero-padded.
    pub fn drain_fifo(
        &mut self,
        octx:  &mut ffmpeg::format::context::Output,
        flush: bool,
    ) -> Result<(), String> {
        while self.fifo.len() >= self.frame_size || (flush && !self.fifo.is_empty()) {
            let frame = self.fifo.pop_frame(self.frame_size, self.out_sample_idx);
            self.out_sample_idx += self.frame_size as i64;

            self.encoder.send_frame(&frame)
                .map_err(|e| format!("send audio frame to encoder: {e}"))?;
            self.drain_packets(octx)?;
        }
        Ok(())
    }

    fn drain_packets(&mut self, octx: &mut ffmpeg::format::context::Output) -> Result<(), String> {
        let mut pkt = Packet::empty();
        while self.encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(self.stream_index);
            pkt.rescale_ts(self.audio_tb, self.ost_tb);
            pkt.write_interleaved(octx)
                .map_err(|e| format!("write audio packet: {e}"))?;
        }
        Ok(())
    }

    /// Zero-pad and send the FIFO tail, then EOF the encoder.
    pub fn finish(&mut self, octx: &mut ffmpeg::format::context::Output) -> Result<(), String> {
        self.drain_fifo(octx, true)?;
        self.encoder.send_eof()
            .map_err(|e| format!("send EOF to audio encoder: {e}"))?;
        self.drain_packets(octx)
    }
}

/// Add an AAC stream (44.1 kHz stereo FLTP, 128 kbps) to `octx` and open
/// its encoder. Must be called before `write_header`.
pub fn add_aac_stream(octx: &mut ffmpeg::format::context::Output) -> Result<AudioEncState, String> {
    let audio_tb = Rational::new(1, AUDIO_RATE as i32);
    let global_header = octx.format().flags().contains(ffmpeg::format::Flags::GLOBAL_HEADER);

    let aac = encoder::find(CodecId::AAC)
        .ok_or_else(|| "AAC encoder not found".to_string())?;

    let stream_index = {
        let mut ost = octx.add_stream(aac)
            .map_err(|e| format!("add audio stream: {e}"))?;
        ost.set_time_base(audio_tb);
        ost.index()
    };

    let mut enc = codec::context::Context::new_with_codec(aac)
        .encoder()
        .audio()
        .map_err(|e| format!("create audio encoder context: {e}"))?;
    enc.set_rate(AUDIO_RATE as i32);
    enc.set_ch_layout(ChannelLayout::STEREO);
    enc.set_format(Sample::F32(SampleType::Planar));
    enc.set_bit_rate(AAC_BIT_RATE);
    enc.set_time_base(audio_tb);
    if global_header {
        enc.set_flags(codec::Flags::GLOBAL_HEADER);
    }

    let encoder = enc.open_as_with(aac, ffmpeg::Dictionary::new())
        .map_err(|e| format!("open AAC encoder: {e}"))?;

    let frame_size = (encoder.frame_size() as usize).max(1024);

    // encoder::Audio does not implement AsPtr<AVCodecParameters>, so the
    // stream parameters are filled through FFI.
    unsafe {
        let ret = ffmpeg::ffi::avcodec_parameters_from_context(
            (**(*octx.as_mut_ptr()).streams.add(stream_index)).codecpar,
            encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
        );
        if ret < 0 {
            return Err(format!("copy AAC parameters to stream: {ret}"));
        }
    }

    Ok(AudioEncState {
        encoder,
        stream_index,
        out_sample_idx: 0,
        frame_size,
        fifo: AudioFifo::default(),
        audio_tb,
        ost_tb: audio_tb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_pads_short_tail_with_silence() {
        let mut fifo = AudioFifo::default();
        fifo.push(&[0.5, 0.5, 0.5], &[-0.5, -0.5, -0.5]);
        let frame = fifo.pop_frame(4, 0);
        assert!(fifo.is_empty());

        let left: Vec<f32> = frame.data(0).chunks_exact(4).take(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(left, vec![0.5, 0.5, 0.5, 0.0]);
        assert_eq!(frame.pts(), Some(0));
    }

    #[test]
    fn fifo_keeps_remainder() {
        let mut fifo = AudioFifo::default();
        let l: Vec<f32> = (0..10).map(|i| i as f32).collect();
        fifo.push(&l, &l);
        let _ = fifo.pop_frame(4, 0);
        assert_eq!(fifo.len(), 6);
        let frame = fifo.pop_frame(4, 4);
        let right: Vec<f32> = frame.data(1).chunks_exact(4).take(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(right, vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(fifo.len(), 2);
    }

    #[test]
    fn push_uses_common_length() {
        let mut fifo = AudioFifo::default();
        fifo.push(&[1.0, 2.0, 3.0], &[1.0]);
        assert_eq!(fifo.len(), 1);
    }
}
