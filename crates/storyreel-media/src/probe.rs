// crates/storyreel-media/src/probe.rs
//
// In-process FFmpeg probing: duration, frame rate, stream presence.
// Opens the container only; nothing is decoded here.

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::media::Type;
use tracing::debug;

/// Facts about one media file.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaInfo {
    /// Seconds. Video stream duration when there is one, else container.
    pub duration:  f64,
    pub has_video: bool,
    pub has_audio: bool,
    /// Average video frame rate, if known.
    pub fps:       Option<f64>,
    pub width:     u32,
    pub height:    u32,
}

pub fn probe_media(path: &Path) -> Result<MediaInfo, String> {
    crate::init();
    let ctx = input(path).map_err(|e| format!("open: {e}"))?;

    let container = ctx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;

    let video = ctx.streams().best(Type::Video);
    let audio = ctx.streams().best(Type::Audio);

    let mut info = MediaInfo {
        duration:  container.max(0.0),
        has_video: video.is_some(),
        has_audio: audio.is_some(),
        fps:       None,
        width:     0,
        height:    0,
    };

    if let Some(stream) = video {
        let tb = stream.time_base();
        let d  = stream.duration() as f64 * f64::from(tb);
        if d > 0.0 {
            info.duration = d;
        }
        let rate = stream.avg_frame_rate();
        if rate.denominator() != 0 && rate.numerator() > 0 {
            info.fps = Some(f64::from(rate));
        }
        let (w, h) = unsafe {
            let p = (*stream.as_ptr()).codecpar;
            ((*p).width as u32, (*p).height as u32)
        };
        info.width  = w;
        info.height = h;
    } else if info.duration <= 0.0 {
        if let Some(stream) = audio {
            let d = stream.duration() as f64 * f64::from(stream.time_base());
            if d > 0.0 {
                info.duration = d;
            }
        }
    }

    debug!(
        "probe {:.3}s video={} audio={} ← {}",
        info.duration, info.has_video, info.has_audio, path.display()
    );
    Ok(info)
}
