// crates/storyreel-media/src/decode.rs
//
// Still-image decode for the assembler. FFmpeg's image demuxers handle
// PNG/JPEG/WebP/BMP, so stills go through the same path as video frames:
// open → first decoded frame → swscale to RGBA at the output size.

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;

use crate::helpers::yuv::extract_rgba;

/// Packed RGBA pixels, no stride padding.
#[derive(Clone, Debug, PartialEq)]
pub struct StillFrame {
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>,
}

impl StillFrame {
    /// RGBA of the pixel at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

/// Decode the first frame of `path` and scale it to `out_w`×`out_h` RGBA.
pub fn load_still(path: &Path, out_w: u32, out_h: u32) -> Result<StillFrame, String> {
    crate::init();
    let mut ictx = input(path).map_err(|e| format!("open: {e}"))?;

    let video_stream_idx = ictx.streams().best(Type::Video)
        .ok_or_else(|| "not an image (no video stream)".to_string())?
        .index();

    let mut decoder = {
        let stream = ictx.stream(video_stream_idx)
            .ok_or_else(|| "image stream vanished".to_string())?;
        let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| format!("codec context: {e}"))?;
        ctx.decoder().video().map_err(|e| format!("image decoder: {e}"))?
    };

    let mut decoded = VideoFrame::empty();
    let mut got = false;

    'packets: for (stream, packet) in ictx.packets().flatten() {
        if stream.index() != video_stream_idx { continue; }
        decoder.send_packet(&packet).map_err(|e| format!("decode: {e}"))?;
        if decoder.receive_frame(&mut decoded).is_ok() {
            got = true;
            break 'packets;
        }
    }
    if !got {
        let _ = decoder.send_eof();
        got = decoder.receive_frame(&mut decoded).is_ok();
    }
    if !got {
        return Err("no frame decoded".into());
    }

    let (src_w, src_h) = (decoded.width(), decoded.height());
    if src_w == 0 || src_h == 0 {
        return Err("image has zero size".into());
    }

    let mut scaler = SwsContext::get(
        decoded.format(), src_w, src_h,
        Pixel::RGBA,      out_w, out_h,
        Flags::BILINEAR,
    ).map_err(|e| format!("scaler: {e}"))?;

    let mut rgba = VideoFrame::empty();
    scaler.run(&decoded, &mut rgba).map_err(|e| format!("scale: {e}"))?;

    Ok(StillFrame {
        width:  out_w,
        height: out_h,
        data:   extract_rgba(&rgba, out_w as usize, out_h as usize),
    })
}
