// crates/storyreel-core/src/config.rs
//
// Pipeline settings file (JSON). Read once per run by the shell and turned
// into `RenderSettings` / mix defaults; the pipeline never writes it.
//
// Missing file → defaults are written back so the user has something to
// edit. A file that exists but does not parse is an error, not a silent
// reset: the user's edits would otherwise be overwritten.

use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::helpers::geometry::even_dims;

// ── Caption style ────────────────────────────────────────────────────────────

/// Visual constants for caption overlays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionStyle {
    /// TTF/OTF file. None → first hit in `FALLBACK_FONTS`.
    pub font_path:    Option<PathBuf>,
    /// Pixel size at 720 px frame height; scaled with the frame.
    pub font_size:    f32,
    pub text_color:   [u8; 4],
    /// Background box, RGBA; alpha < 255 for the translucent band.
    pub box_color:    [u8; 4],
    pub padding:      u32,
    /// Line height as a multiple of the font size.
    pub line_spacing: f32,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_path:    None,
            font_size:    24.0,
            text_color:   [255, 255, 255, 255],
            box_color:    [0, 0, 0, 128],
            padding:      10,
            line_spacing: 1.3,
        }
    }
}

/// Common system font locations tried when `font_path` is unset.
pub const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

impl CaptionStyle {
    /// The font file to load: explicit path, else the first fallback that exists.
    pub fn resolve_font(&self) -> Option<PathBuf> {
        if let Some(p) = &self.font_path {
            return Some(p.clone());
        }
        FALLBACK_FONTS.iter().map(PathBuf::from).find(|p| p.is_file())
    }

    /// Effective pixel size for a frame of height `frame_h`.
    pub fn scaled_font_size(&self, frame_h: u32) -> f32 {
        let scale = (frame_h as f32 / 720.0).max(1.0);
        (self.font_size * scale).max(1.0)
    }
}

// ── Render settings ──────────────────────────────────────────────────────────

/// What the assembler needs beyond the scene list.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub fps:     u32,
    pub width:   u32,
    pub height:  u32,
    pub caption: CaptionStyle,
}

impl RenderSettings {
    pub fn new(fps: u32, width: u32, height: u32) -> Self {
        Self { fps, width, height, caption: CaptionStyle::default() }
    }

    /// Output dimensions as encoded (rounded down to even).
    pub fn output_dims(&self) -> (u32, u32) {
        even_dims(self.width, self.height)
    }
}

// ── Config file ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPaths {
    pub scripts: PathBuf,
    pub images:  PathBuf,
    pub audios:  PathBuf,
    pub videos:  PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            scripts: PathBuf::from("generated_content/scripts"),
            images:  PathBuf::from("generated_content/images"),
            audios:  PathBuf::from("generated_content/audios"),
            videos:  PathBuf::from("generated_content/videos"),
        }
    }
}

/// Which output directory to resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Scripts,
    Images,
    Audios,
    Videos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub video_fps:            u32,
    pub image_width:          u32,
    pub image_height:         u32,
    pub default_music_volume: f32,
    pub speech_fade_secs:     f64,
    pub caption:              CaptionStyle,
    pub output_paths:         OutputPaths,
    // Consumed by the generation services, carried for the shell.
    pub default_tts_voice:          String,
    pub default_image_style_prompt: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_fps:            30,
            image_width:          1080,
            image_height:         1920,
            default_music_volume: 0.3,
            speech_fade_secs:     3.0,
            caption:              CaptionStyle::default(),
            output_paths:         OutputPaths::default(),
            default_tts_voice:          "th-TH-Neural2-C".into(),
            default_image_style_prompt: String::new(),
        }
    }
}

impl PipelineConfig {
    /// Load `path`, or write and return defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let cfg = Self::default();
            cfg.save(path)?;
            return Ok(cfg);
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video_fps == 0 {
            return Err(ConfigError::Invalid("video_fps must be >= 1".into()));
        }
        let (w, h) = even_dims(self.image_width, self.image_height);
        if w == 0 || h == 0 {
            return Err(ConfigError::Invalid(format!(
                "image size {}x{} is too small", self.image_width, self.image_height
            )));
        }
        if !self.speech_fade_secs.is_finite() || self.speech_fade_secs < 0.0 {
            return Err(ConfigError::Invalid("speech_fade_secs must be >= 0".into()));
        }
        Ok(())
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            fps:     self.video_fps,
            width:   self.image_width,
            height:  self.image_height,
            caption: self.caption.clone(),
        }
    }

    /// `base` joined with the configured directory; absolute entries win.
    pub fn output_dir(&self, base: &Path, kind: OutputKind) -> PathBuf {
        let rel = match kind {
            OutputKind::Scripts => &self.output_paths.scripts,
            OutputKind::Images  => &self.output_paths.images,
            OutputKind::Audios  => &self.output_paths.audios,
            OutputKind::Videos  => &self.output_paths.videos,
        };
        base.join(rel)
    }

    pub fn ensure_directories_exist(&self, base: &Path) -> Result<(), ConfigError> {
        for kind in [OutputKind::Scripts, OutputKind::Images, OutputKind::Audios, OutputKind::Videos] {
            fs::create_dir_all(self.output_dir(base, kind))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = PipelineConfig::load_or_default(&path).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert!(path.exists());
        assert_eq!(PipelineConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "video_fps": 24, "caption": { "font_size": 32.0 } }"#).unwrap();
        let cfg = PipelineConfig::load(&path).unwrap();
        assert_eq!(cfg.video_fps, 24);
        assert_eq!(cfg.image_width, 1080);
        assert_eq!(cfg.caption.font_size, 32.0);
        assert_eq!(cfg.caption.padding, 10);
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(PipelineConfig::load_or_default(&path), Err(ConfigError::Json(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn zero_fps_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "video_fps": 0 }"#).unwrap();
        assert!(matches!(PipelineConfig::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn directories_created_under_base() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig::default();
        cfg.ensure_directories_exist(dir.path()).unwrap();
        assert!(cfg.output_dir(dir.path(), OutputKind::Videos).is_dir());
        assert!(dir.path().join("generated_content/images").is_dir());
    }

    #[test]
    fn font_scales_with_frame_height() {
        let style = CaptionStyle::default();
        assert_eq!(style.scaled_font_size(360), 24.0);
        assert_eq!(style.scaled_font_size(1440), 48.0);
    }

    #[test]
    fn render_settings_round_dims_even() {
        let mut cfg = PipelineConfig::default();
        cfg.image_width = 641;
        assert_eq!(cfg.render_settings().output_dims(), (640, 1920));
    }
}
