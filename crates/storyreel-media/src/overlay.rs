// crates/storyreel-media/src/overlay.rs
//
// Caption rasterisation onto packed RGBA frames.
//
// Text is laid out with `fontdue::layout` (word wrap inside the padded frame
// width, lines centred); `geometry::caption_box` sizes the bottom band from
// the laid-out height. Compositing is straight "source over" on 8-bit RGBA,
// alpha taken from the style colours and, for text, multiplied by the glyph
// coverage.

use std::collections::HashMap;
use std::path::PathBuf;

use fontdue::layout::{
    CoordinateSystem, GlyphRasterConfig, HorizontalAlign, Layout, LayoutSettings, TextStyle,
    WrapStyle,
};
use fontdue::{Font, FontSettings};
use tracing::debug;

use storyreel_core::config::CaptionStyle;
use storyreel_core::helpers::geometry::{caption_box, Rect};

/// Font plus per-frame-size settings for drawing captions.
pub struct CaptionPainter {
    font:         Font,
    px:           f32,
    line_spacing: f32,
    padding:      u32,
    text_color:   [u8; 4],
    box_color:    [u8; 4],
    glyph_cache:  HashMap<GlyphRasterConfig, Vec<u8>>,
}

impl CaptionPainter {
    /// Resolve and parse the style's font at the size used for `frame_h`.
    ///
    /// Err carries the path that was tried (or a placeholder when no font
    /// could be found at all) and a reason.
    pub fn load(style: &CaptionStyle, frame_h: u32) -> Result<Self, (PathBuf, String)> {
        let font_path = style.resolve_font().ok_or_else(|| {
            (PathBuf::from("caption font"), "no font_path set and no system font found".to_string())
        })?;
        let bytes = std::fs::read(&font_path)
            .map_err(|e| (font_path.clone(), format!("read font: {e}")))?;
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| (font_path.clone(), format!("parse font: {e}")))?;

        let px = style.scaled_font_size(frame_h);
        debug!("caption font {} @ {px:.1}px ← {}", font.name().unwrap_or("?"), font_path.display());

        Ok(Self {
            font,
            px,
            line_spacing: style.line_spacing.max(1.0),
            padding:      style.padding,
            text_color:   style.text_color,
            box_color:    style.box_color,
            glyph_cache:  HashMap::new(),
        })
    }

    /// Lay `text` out for a frame `frame_w` wide, origin at the top of the
    /// text block (not yet offset into the band).
    pub fn layout(&self, text: &str, frame_w: u32) -> Layout {
        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings {
            x:                self.padding as f32,
            y:                0.0,
            max_width:        Some(frame_w.saturating_sub(self.padding * 2).max(1) as f32),
            horizontal_align: HorizontalAlign::Center,
            line_height:      self.line_spacing,
            wrap_style:       WrapStyle::Word,
            wrap_hard_breaks: true,
            ..LayoutSettings::default()
        });
        layout.append(&[&self.font], &TextStyle::new(text, self.px, 0));
        layout
    }

    /// Background box `draw` would fill for `text`.
    pub fn caption_rect(&self, text: &str, frame_w: u32, frame_h: u32) -> Rect {
        band_for(&self.layout(text, frame_w), frame_w, frame_h, self.padding)
    }

    /// Composite `text` onto `rgba` (packed, `w`×`h`): a full-width
    /// translucent band on the bottom edge, lines centred inside it.
    pub fn draw(&mut self, rgba: &mut [u8], w: u32, h: u32, text: &str) {
        let layout = self.layout(text, w);
        if layout.glyphs().is_empty() { return; }

        let rect = band_for(&layout, w, h, self.padding);
        fill_rect(rgba, w, h, rect, self.box_color);

        let top  = (rect.y + self.padding) as f32;
        let font = &self.font;
        for glyph in layout.glyphs() {
            if glyph.width == 0 || glyph.height == 0 { continue; }
            let bitmap = self.glyph_cache
                .entry(glyph.key)
                .or_insert_with(|| font.rasterize_config(glyph.key).1);
            blend_glyph(
                rgba, w, h,
                glyph.x.round() as i32,
                (top + glyph.y).round() as i32,
                glyph.width, glyph.height,
                bitmap,
                self.text_color,
            );
        }
    }
}

fn band_for(layout: &Layout, frame_w: u32, frame_h: u32, padding: u32) -> Rect {
    caption_box(frame_w, frame_h, layout.height().ceil() as u32, padding)
}

// ── Pixel ops ────────────────────────────────────────────────────────────────

/// Blend `rect` (clipped to the frame) with a solid RGBA colour.
pub fn fill_rect(rgba: &mut [u8], w: u32, h: u32, rect: Rect, color: [u8; 4]) {
    let x1 = rect.x.saturating_add(rect.w).min(w);
    let y1 = rect.bottom().min(h);
    for y in rect.y.min(h)..y1 {
        for x in rect.x.min(w)..x1 {
            let idx = ((y * w + x) * 4) as usize;
            blend_pixel(rgba, idx, color);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn blend_glyph(
    rgba:   &mut [u8],
    w:      u32,
    h:      u32,
    x:      i32,
    y:      i32,
    gw:     usize,
    gh:     usize,
    bitmap: &[u8],
    color:  [u8; 4],
) {
    for row in 0..gh {
        let py = y + row as i32;
        if py < 0 || py >= h as i32 { continue; }
        for col in 0..gw {
            let px = x + col as i32;
            if px < 0 || px >= w as i32 { continue; }
            let Some(&coverage) = bitmap.get(row * gw + col) else { continue };
            if coverage == 0 { continue; }
            let alpha = ((u16::from(coverage) * u16::from(color[3])) / 255) as u8;
            let idx = ((py as u32 * w + px as u32) * 4) as usize;
            blend_pixel(rgba, idx, [color[0], color[1], color[2], alpha]);
        }
    }
}

/// Source-over onto an opaque destination pixel; destination alpha stays 255.
pub fn blend_pixel(rgba: &mut [u8], idx: usize, src: [u8; 4]) {
    let a = u16::from(src[3]);
    if a == 0 { return; }
    let inv = 255 - a;
    for c in 0..3 {
        let d = u16::from(rgba[idx + c]);
        rgba[idx + c] = ((u16::from(src[c]) * a + d * inv + 127) / 255) as u8;
    }
    rgba[idx + 3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
        (0..w * h).flat_map(|_| [rgb[0], rgb[1], rgb[2], 255]).collect()
    }

    fn px(buf: &[u8], w: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * w + x) * 4) as usize;
        [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]
    }

    #[test]
    fn blend_opaque_replaces() {
        let mut buf = vec![10, 20, 30, 255];
        blend_pixel(&mut buf, 0, [200, 100, 50, 255]);
        assert_eq!(buf, vec![200, 100, 50, 255]);
    }

    #[test]
    fn blend_transparent_is_noop() {
        let mut buf = vec![10, 20, 30, 255];
        blend_pixel(&mut buf, 0, [200, 100, 50, 0]);
        assert_eq!(buf, vec![10, 20, 30, 255]);
    }

    #[test]
    fn half_black_halves_white() {
        let mut buf = vec![255, 255, 255, 255];
        blend_pixel(&mut buf, 0, [0, 0, 0, 128]);
        // (255 * 127 + 127) / 255 = 127
        assert_eq!(buf, vec![127, 127, 127, 255]);
    }

    #[test]
    fn fill_rect_only_touches_rect() {
        let (w, h) = (8, 6);
        let mut buf = solid(w, h, [255, 255, 255]);
        fill_rect(&mut buf, w, h, Rect { x: 0, y: 4, w: 8, h: 2 }, [0, 0, 0, 255]);
        assert_eq!(px(&buf, w, 3, 3), [255, 255, 255, 255]);
        assert_eq!(px(&buf, w, 0, 4), [0, 0, 0, 255]);
        assert_eq!(px(&buf, w, 7, 5), [0, 0, 0, 255]);
    }

    #[test]
    fn fill_rect_clips_to_frame() {
        let (w, h) = (4, 4);
        let mut buf = solid(w, h, [255, 255, 255]);
        fill_rect(&mut buf, w, h, Rect { x: 2, y: 2, w: 10, h: 10 }, [0, 0, 0, 255]);
        assert_eq!(px(&buf, w, 3, 3), [0, 0, 0, 255]);
        assert_eq!(px(&buf, w, 1, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn missing_explicit_font_is_an_error() {
        let style = CaptionStyle {
            font_path: Some(PathBuf::from("/definitely/not/here.ttf")),
            ..CaptionStyle::default()
        };
        let Err((path, _)) = CaptionPainter::load(&style, 720) else {
            panic!("expected load failure");
        };
        assert_eq!(path, PathBuf::from("/definitely/not/here.ttf"));
    }

    // The remaining tests need a real font; they pass trivially on hosts
    // with none of the fallback fonts installed.

    fn system_painter(frame_h: u32) -> Option<CaptionPainter> {
        CaptionStyle::default().resolve_font()?;
        CaptionPainter::load(&CaptionStyle::default(), frame_h).ok()
    }

    #[test]
    fn caption_band_sits_on_bottom_edge() {
        let (w, h) = (320, 240);
        let Some(mut painter) = system_painter(h) else { return };
        let mut buf = solid(w, h, [255, 255, 255]);
        painter.draw(&mut buf, w, h, "Hello");

        let rect = painter.caption_rect("Hello", w, h);
        assert_eq!(rect.bottom(), h);
        assert_eq!(rect.w, w);
        // Top of frame untouched; band corner darkened by the 50 % box.
        assert_eq!(px(&buf, w, 0, 0), [255, 255, 255, 255]);
        assert_eq!(px(&buf, w, 0, h - 1), [127, 127, 127, 255]);
        // Some glyph pixel is brighter than the bare box.
        let glyph_lit = (rect.y..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .any(|(x, y)| px(&buf, w, x, y)[0] > 200);
        assert!(glyph_lit);
    }

    fn line_count(layout: &Layout) -> usize {
        layout.lines().map_or(0, |l| l.len())
    }

    /// Horizontal extent of the inked glyphs.
    fn ink_span(layout: &Layout) -> (f32, f32) {
        layout.glyphs().iter()
            .filter(|g| g.width > 0)
            .fold((f32::MAX, f32::MIN), |(lo, hi), g| (lo.min(g.x), hi.max(g.x + g.width as f32)))
    }

    #[test]
    fn long_caption_wraps_into_taller_band() {
        let (w, h) = (200, 400);
        let Some(painter) = system_painter(h) else { return };
        let text = "this caption is far too long to fit on a single line of a narrow frame";
        let one  = painter.caption_rect("Hi", w, h);
        let many = painter.caption_rect(text, w, h);
        assert!(many.h > one.h);

        let layout = painter.layout(text, w);
        assert!(line_count(&layout) > 1);
        let (lo, hi) = ink_span(&layout);
        assert!(lo >= 0.0 && hi <= w as f32, "ink {lo}..{hi}");
    }

    #[test]
    fn hard_breaks_start_new_lines() {
        let Some(painter) = system_painter(720) else { return };
        assert_eq!(line_count(&painter.layout("one", 1280)), 1);
        assert_eq!(line_count(&painter.layout("one\ntwo", 1280)), 2);
    }

    #[test]
    fn short_line_is_centred() {
        let w = 640;
        let Some(painter) = system_painter(480) else { return };
        let (lo, hi) = ink_span(&painter.layout("Hi", w));
        let (left, right) = (lo, w as f32 - hi);
        // Side bearings make ink slightly asymmetric.
        assert!((left - right).abs() <= painter.px, "left {left} right {right}");
    }
}
