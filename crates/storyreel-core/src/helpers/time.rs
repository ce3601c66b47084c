// crates/storyreel-core/src/helpers/time.rs
//
// Timing model shared by the assembler, the remixer and log output.
//
// Scene boundaries are computed from cumulative start/end times and rounded
// once, never per scene, so rounding error cannot accumulate: spans are
// contiguous and the last one ends at round(total * rate).

use std::ops::Range;

/// Sample rate of every decoded and encoded PCM buffer.
pub const AUDIO_RATE: u32 = 44_100;

/// Given vs. decoded speech length beyond this is worth a warning.
pub const DURATION_TOLERANCE_SECS: f64 = 0.05;

/// Characters per second assumed by `estimate_speech_duration`.
const EST_CHARS_PER_SEC: f64 = 15.0;

/// Number of `rate`-Hz ticks in `secs`, rounded to nearest.
#[inline]
pub fn ticks_for(secs: f64, rate: u32) -> u64 {
    (secs.max(0.0) * rate as f64).round() as u64
}

/// Number of PCM samples (per channel) at `AUDIO_RATE` in `secs`.
#[inline]
pub fn samples_for(secs: f64) -> usize {
    ticks_for(secs, AUDIO_RATE) as usize
}

/// Contiguous tick ranges for consecutive clips of the given durations.
///
/// Clip *i* covers `[round(start_i * rate), round(end_i * rate))`.
///
/// ```
/// use storyreel_core::helpers::time::spans;
/// let s = spans(&[5.0, 4.5], 30);
/// assert_eq!(s, vec![0..150, 150..285]);
/// ```
pub fn spans(durations: &[f64], rate: u32) -> Vec<Range<u64>> {
    let mut out   = Vec::with_capacity(durations.len());
    let mut t     = 0.0_f64;
    let mut start = 0_u64;
    for d in durations {
        t += d.max(0.0);
        let end = ticks_for(t, rate).max(start);
        out.push(start..end);
        start = end;
    }
    out
}

/// Video frame spans at `fps`.
pub fn frame_spans(durations: &[f64], fps: u32) -> Vec<Range<u64>> {
    spans(durations, fps)
}

/// Audio sample spans at `AUDIO_RATE`.
pub fn sample_spans(durations: &[f64]) -> Vec<Range<u64>> {
    spans(durations, AUDIO_RATE)
}

/// Rough speech length from character count and speaking rate.
///
/// Last resort only, for callers that need a number before any audio exists
/// (e.g. showing an estimate while synthesis is pending). The assembler never
/// calls this: a scene without a duration is measured by decoding its audio.
pub fn estimate_speech_duration(text: &str, speaking_rate: f64) -> f64 {
    let rate = if speaking_rate > 0.0 { speaking_rate } else { 1.0 };
    text.chars().count() as f64 / EST_CHARS_PER_SEC / rate
}

/// Format a duration in seconds as `MM:SS:FF` with frames at `fps`.
///
/// ```
/// use storyreel_core::helpers::time::format_time;
/// assert_eq!(format_time(0.0, 30),  "00:00:00");
/// assert_eq!(format_time(61.5, 30), "01:01:15");
/// ```
pub fn format_time(s: f64, fps: u32) -> String {
    let fps = fps.max(1);
    let m   = (s / 60.0) as u32;
    let sc  = (s % 60.0) as u32;
    let fr  = ((s * fps as f64) as u32) % fps;
    format!("{m:02}:{sc:02}:{fr:02}")
}

/// Seconds as a short log string: `4.2s`, `3m07s`, `1h04m35s`.
/// Anything past a minute is rounded to whole seconds.
pub fn format_duration(secs: f64) -> String {
    let secs = secs.max(0.0);
    if secs < 60.0 {
        return format!("{secs:.1}s");
    }
    let whole = secs.round() as u64;
    let (h, m, s) = (whole / 3600, whole / 60 % 60, whole % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else {
        format!("{m}m{s:02}s")
    }
}
