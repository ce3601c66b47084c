// crates/storyreel-core/src/helpers/geometry.rs
//
// Frame and caption-band geometry. Font-agnostic: the caller lays the text
// out and passes in the resulting block height.

/// Axis-aligned pixel rectangle, origin top-left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn bottom(&self) -> u32 { self.y + self.h }
}

/// Round dimensions down to even values; YUV420P needs both even.
///
/// ```
/// use storyreel_core::helpers::geometry::even_dims;
/// assert_eq!(even_dims(1081, 1919), (1080, 1918));
/// ```
pub fn even_dims(w: u32, h: u32) -> (u32, u32) {
    (w & !1, h & !1)
}

/// Background box for a caption block of height `text_h`.
///
/// Spans the full frame width, is `text_h + 2 * padding` tall and sits on
/// the bottom edge. Clamped so it never exceeds the frame.
///
/// ```
/// use storyreel_core::helpers::geometry::{caption_box, Rect};
/// assert_eq!(caption_box(1080, 1920, 60, 10), Rect { x: 0, y: 1840, w: 1080, h: 80 });
/// ```
pub fn caption_box(frame_w: u32, frame_h: u32, text_h: u32, padding: u32) -> Rect {
    let h = text_h.saturating_add(padding.saturating_mul(2)).min(frame_h);
    Rect { x: 0, y: frame_h - h, w: frame_w, h }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_is_bottom_anchored_full_width() {
        let r = caption_box(640, 360, 40, 10);
        assert_eq!(r.w, 640);
        assert_eq!(r.h, 60);
        assert_eq!(r.bottom(), 360);
    }

    #[test]
    fn box_never_exceeds_frame() {
        let r = caption_box(100, 50, 500, 10);
        assert_eq!(r, Rect { x: 0, y: 0, w: 100, h: 50 });
    }

    #[test]
    fn odd_dims_round_down() {
        assert_eq!(even_dims(641, 361), (640, 360));
        assert_eq!(even_dims(1, 1), (0, 0));
    }
}
