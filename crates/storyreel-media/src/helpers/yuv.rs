// crates/storyreel-media/src/helpers/yuv.rs
//
// Frame buffer conversions between packed (stride-free) byte vectors and
// strided ffmpeg VideoFrames.
//
// Packed RGBA layout: row-major, exactly w * 4 bytes per row.
// ffmpeg frames may pad each row; the copies here add or strip that padding.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;

/// Copy the visible RGBA pixels out of a (possibly strided) frame.
pub fn extract_rgba(frame: &VideoFrame, w: usize, h: usize) -> Vec<u8> {
    let stride    = frame.stride(0);
    let src       = frame.data(0);
    let row_bytes = w * 4;
    let mut out   = vec![0u8; row_bytes * h];
    for row in 0..h {
        out[row * row_bytes .. (row + 1) * row_bytes]
            .copy_from_slice(&src[row * stride .. row * stride + row_bytes]);
    }
    out
}

/// Write packed RGBA into an RGBA frame, respecting its stride.
pub fn write_rgba(packed: &[u8], frame: &mut VideoFrame, w: usize, h: usize) {
    let stride    = frame.stride(0);
    let dst       = frame.data_mut(0);
    let row_bytes = w * 4;
    for row in 0..h {
        dst[row * stride .. row * stride + row_bytes]
            .copy_from_slice(&packed[row * row_bytes .. (row + 1) * row_bytes]);
    }
}

/// Convert a packed RGBA buffer to a YUV420P frame of the same size.
/// The returned frame has square pixels and no PTS.
pub fn rgba_to_yuv420p(packed: &[u8], w: u32, h: u32) -> Result<VideoFrame, String> {
    let mut rgba = VideoFrame::new(Pixel::RGBA, w, h);
    write_rgba(packed, &mut rgba, w as usize, h as usize);

    let mut scaler = SwsContext::get(
        Pixel::RGBA,    w, h,
        Pixel::YUV420P, w, h,
        Flags::BILINEAR,
    ).map_err(|e| format!("create RGBA→YUV scaler: {e}"))?;

    let mut yuv = VideoFrame::empty();
    scaler.run(&rgba, &mut yuv).map_err(|e| format!("RGBA→YUV: {e}"))?;

    // swscale copies the source SAR; players letterbox anything but 1:1.
    unsafe {
        (*yuv.as_mut_ptr()).sample_aspect_ratio =
            ffmpeg::ffi::AVRational { num: 1, den: 1 };
    }
    Ok(yuv)
}
