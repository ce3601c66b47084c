// crates/storyreel-core/src/mix.rs
//
// PCM math for the remixer and assembler.
//
// All functions operate on planar stereo f32 at AUDIO_RATE. No FFmpeg:
// storyreel-media decodes into `Pcm` and encodes out of it.
//
// Sections:
//   - Pcm buffer
//   - Length reconciliation (loop / trim / pad)
//   - Gain and fades
//   - Mixing

use crate::helpers::time::AUDIO_RATE;

// ── Pcm buffer ───────────────────────────────────────────────────────────────

/// Planar stereo float samples. Both channels always have equal length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pcm {
    pub left:  Vec<f32>,
    pub right: Vec<f32>,
}

impl Pcm {
    pub fn new() -> Self { Self::default() }

    /// Mono source duplicated into both channels.
    pub fn from_mono(samples: &[f32]) -> Self {
        Self { left: samples.to_vec(), right: samples.to_vec() }
    }

    /// Samples per channel.
    pub fn len(&self) -> usize { self.left.len() }

    pub fn is_empty(&self) -> bool { self.left.is_empty() }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / AUDIO_RATE as f64
    }

    /// Append one chunk of planar samples. `right` may be the same slice as
    /// `left` for mono input.
    pub fn extend(&mut self, left: &[f32], right: &[f32]) {
        let n = left.len().min(right.len());
        self.left.extend_from_slice(&left[..n]);
        self.right.extend_from_slice(&right[..n]);
    }

    /// Zero-pad or truncate to exactly `n` samples.
    pub fn fit_exact(&mut self, n: usize) {
        self.left.resize(n, 0.0);
        self.right.resize(n, 0.0);
    }
}

// ── Length reconciliation ────────────────────────────────────────────────────

/// Music policy: repeat from the start until at least `n` samples exist,
/// then cut to exactly `n`. A source of `n` or more samples is simply
/// trimmed to its leading `n` samples.
///
/// Returns an empty buffer if `src` is empty; callers reject that case
/// before getting here.
pub fn loop_to_length(src: &Pcm, n: usize) -> Pcm {
    if src.is_empty() {
        return Pcm::new();
    }
    if src.len() >= n {
        return Pcm {
            left:  src.left[..n].to_vec(),
            right: src.right[..n].to_vec(),
        };
    }
    let mut out = Pcm {
        left:  Vec::with_capacity(n),
        right: Vec::with_capacity(n),
    };
    while out.len() < n {
        let take = (n - out.len()).min(src.len());
        out.extend(&src.left[..take], &src.right[..take]);
    }
    out
}

/// How many times `src_len` must repeat to cover `n` (1 when no loop needed).
pub fn loop_count(src_len: usize, n: usize) -> usize {
    if src_len == 0 { return 0; }
    n.div_ceil(src_len).max(1)
}

// ── Gain and fades ───────────────────────────────────────────────────────────

/// Linear gain. Any finite value is applied literally.
pub fn apply_gain(pcm: &mut Pcm, gain: f32) {
    if gain == 1.0 { return; }
    for s in pcm.left.iter_mut().chain(pcm.right.iter_mut()) {
        *s *= gain;
    }
}

/// Linear fade to silence over the final `fade_secs`. When the buffer is
/// shorter than the fade, the whole buffer is ramped.
pub fn fade_out_tail(pcm: &mut Pcm, fade_secs: f64) {
    let n = pcm.len();
    let fade = ((fade_secs.max(0.0) * AUDIO_RATE as f64).round() as usize).min(n);
    if fade == 0 { return; }
    let start = n - fade;
    for i in 0..fade {
        // i = 0 → just under full volume, last sample → 0.
        let g = (fade - 1 - i) as f32 / fade as f32;
        pcm.left[start + i]  *= g;
        pcm.right[start + i] *= g;
    }
}

// ── Mixing ───────────────────────────────────────────────────────────────────

/// Add `src` into `dst` sample by sample over their common length.
/// No normalisation: the sum is written as-is.
pub fn mix_into(dst: &mut Pcm, src: &Pcm) {
    for (d, s) in dst.left.iter_mut().zip(&src.left) { *d += *s; }
    for (d, s) in dst.right.iter_mut().zip(&src.right) { *d += *s; }
}

/// Root-mean-square level across both channels.
pub fn rms(pcm: &Pcm) -> f32 {
    if pcm.is_empty() { return 0.0; }
    let sum: f64 = pcm.left.iter().chain(&pcm.right)
        .map(|s| (*s as f64) * (*s as f64))
        .sum();
    (sum / (pcm.len() * 2) as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Pcm {
        let v: Vec<f32> = (0..n).map(|i| i as f32).collect();
        Pcm::from_mono(&v)
    }

    #[test]
    fn short_music_loops_seamlessly_to_exact_length() {
        let src = ramp(4);
        let out = loop_to_length(&src, 10);
        assert_eq!(out.len(), 10);
        assert_eq!(out.left, vec![0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0, 0.0, 1.0]);
        assert_eq!(out.left, out.right);
        assert_eq!(loop_count(4, 10), 3);
    }

    #[test]
    fn long_music_is_trimmed_from_start() {
        let out = loop_to_length(&ramp(10), 3);
        assert_eq!(out.left, vec![0.0, 1.0, 2.0]);
        assert_eq!(loop_count(10, 3), 1);
    }

    #[test]
    fn equal_length_is_identity() {
        let src = ramp(5);
        assert_eq!(loop_to_length(&src, 5), src);
    }

    #[test]
    fn empty_music_yields_empty() {
        assert!(loop_to_length(&Pcm::new(), 100).is_empty());
        assert_eq!(loop_count(0, 100), 0);
    }

    #[test]
    fn gain_is_not_clamped() {
        let mut p = Pcm::from_mono(&[0.5, -0.5]);
        apply_gain(&mut p, 1.5);
        assert_eq!(p.left, vec![0.75, -0.75]);
        apply_gain(&mut p, 0.0);
        assert!(p.left.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn fade_reaches_silence_and_leaves_head_alone() {
        let n = AUDIO_RATE as usize * 5;
        let mut p = Pcm::from_mono(&vec![1.0; n]);
        fade_out_tail(&mut p, 3.0);
        let fade_start = n - AUDIO_RATE as usize * 3;
        assert_eq!(p.left[fade_start - 1], 1.0);
        assert!(p.left[fade_start] < 1.0);
        assert_eq!(p.left[n - 1], 0.0);
        // monotonically non-increasing through the fade
        assert!(p.left[fade_start..].windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn fade_longer_than_buffer_ramps_everything() {
        let mut p = Pcm::from_mono(&[1.0; 4]);
        fade_out_tail(&mut p, 10.0);
        assert_eq!(p.left, vec![0.75, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn mix_is_additive() {
        let mut a = Pcm::from_mono(&[0.25, 0.5, 0.75]);
        let b = Pcm::from_mono(&[1.0, 1.0]);
        mix_into(&mut a, &b);
        assert_eq!(a.left, vec![1.25, 1.5, 0.75]);
    }

    #[test]
    fn zero_volume_music_leaves_speech_untouched() {
        let speech = Pcm::from_mono(&[0.2, -0.4, 0.6]);
        let mut music = Pcm::from_mono(&[0.9, 0.9, 0.9]);
        apply_gain(&mut music, 0.0);
        let mut mixed = speech.clone();
        mix_into(&mut mixed, &music);
        assert_eq!(mixed, speech);
    }

    #[test]
    fn fit_exact_pads_and_truncates() {
        let mut p = ramp(3);
        p.fit_exact(5);
        assert_eq!(p.left, vec![0.0, 1.0, 2.0, 0.0, 0.0]);
        p.fit_exact(2);
        assert_eq!(p.right, vec![0.0, 1.0]);
    }

    #[test]
    fn rms_of_constant() {
        let p = Pcm::from_mono(&[0.5; 8]);
        assert!((rms(&p) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&Pcm::new()), 0.0);
    }
}
