//! Typed configuration sections and validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {0} resolution")]
    InvalidResolution(&'static str),
    #[error("invalid frame rate (must be 1-120 fps)")]
    InvalidFrameRate,
    #[error("invalid countdown time {0}s (must be at most 60s)")]
    InvalidCountdown(u32),
    #[error("invalid copy limits: need max_copies >= default_copies >= 1 (got default {default}, max {max})")]
    InvalidCopies { default: u32, max: u32 },
    #[error("max_local_photos must be at least 1")]
    InvalidPhotoLimit,
    #[error("storage path `{0}` must not be empty")]
    EmptyPath(&'static str),
    #[error("originals and framed photos must live in different directories")]
    SharedPhotoDirectory,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Camera settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Still capture resolution `[width, height]`.
    pub resolution: [u32; 2],
    /// Live preview resolution `[width, height]`.
    pub preview_resolution: [u32; 2],
    /// Target preview frames per second.
    pub fps: u32,
    /// Camera device index.
    pub device_id: u32,
    /// Mirror preview and stills horizontally.
    pub mirror: bool,
    /// Upper bound for a still capture.
    pub capture_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            resolution: [1920, 1080],
            preview_resolution: [1280, 720],
            fps: 30,
            device_id: 0,
            mirror: true,
            capture_timeout_ms: 5000,
        }
    }
}

impl CameraConfig {
    /// Creates a configuration with the given still and preview dimensions.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            resolution: [width, height],
            preview_resolution: [width, height],
            ..Default::default()
        }
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Interval between preview frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }

    /// Validates the camera parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution.contains(&0) {
            return Err(ConfigError::InvalidResolution("capture"));
        }
        if self.preview_resolution.contains(&0) {
            return Err(ConfigError::InvalidResolution("preview"));
        }
        if self.fps == 0 || self.fps > 120 {
            return Err(ConfigError::InvalidFrameRate);
        }
        Ok(())
    }
}

/// Kiosk UI settings consumed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub fullscreen: bool,
    /// Countdown length in seconds before the still is taken.
    pub countdown_time: u32,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            fullscreen: false,
            countdown_time: 3,
        }
    }
}

/// Local storage and sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Maximum number of originals kept locally.
    pub max_local_photos: usize,
    /// Mirror committed photos to `sync_path`.
    pub auto_sync: bool,
    pub originals_path: PathBuf,
    pub framed_path: PathBuf,
    /// Root of the sync mirror (removable or cloud-mounted drive).
    pub sync_path: PathBuf,
    /// Period of the background sync sweep.
    pub sync_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_local_photos: 100,
            auto_sync: true,
            originals_path: PathBuf::from("./captured_photos/originals"),
            framed_path: PathBuf::from("./captured_photos/framed"),
            sync_path: PathBuf::from("./google_drive_sync"),
            sync_interval_secs: 60,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration rooted in a single directory (used by tests and demos).
    pub fn rooted_at(root: impl AsRef<Path>, max_local_photos: usize) -> Self {
        let root = root.as_ref();
        Self {
            max_local_photos,
            auto_sync: true,
            originals_path: root.join("originals"),
            framed_path: root.join("framed"),
            sync_path: root.join("sync"),
            sync_interval_secs: 60,
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// Validates the storage parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_local_photos == 0 {
            return Err(ConfigError::InvalidPhotoLimit);
        }
        if self.originals_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("originals_path"));
        }
        if self.framed_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("framed_path"));
        }
        if self.auto_sync && self.sync_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("sync_path"));
        }
        if self.originals_path == self.framed_path {
            return Err(ConfigError::SharedPhotoDirectory);
        }
        Ok(())
    }
}

/// Frame asset settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FramesConfig {
    /// Frame selected when a booth starts; `None` disables framing.
    pub default_frame: Option<String>,
    pub frames_path: PathBuf,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            default_frame: Some("classic_frame.png".to_string()),
            frames_path: PathBuf::from("./assets/frames"),
        }
    }
}

/// Paper sizes understood by the print backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperSize {
    #[serde(rename = "4x6")]
    Photo4x6,
    A4,
    Letter,
    Legal,
}

impl PaperSize {
    /// CUPS media keyword for this paper size.
    pub fn cups_media(self) -> &'static str {
        match self {
            PaperSize::Photo4x6 => "na_index-4x6_4x6in",
            PaperSize::A4 => "iso_a4_210x297mm",
            PaperSize::Letter => "na_letter_8.5x11in",
            PaperSize::Legal => "na_legal_8.5x14in",
        }
    }
}

/// Print transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintBackendKind {
    /// CUPS command-line tools (`lp`, `lpstat`, `cancel`).
    Lp,
    /// In-memory backend; nothing is printed.
    None,
}

/// Printing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintingConfig {
    pub default_copies: u32,
    pub max_copies: u32,
    pub printer_name: String,
    pub paper_size: PaperSize,
    pub backend: PrintBackendKind,
    /// Period of the job status poll.
    pub poll_interval_secs: u64,
}

impl Default for PrintingConfig {
    fn default() -> Self {
        Self {
            default_copies: 1,
            max_copies: 5,
            printer_name: "Canon_Printer".to_string(),
            paper_size: PaperSize::Photo4x6,
            backend: PrintBackendKind::Lp,
            poll_interval_secs: 2,
        }
    }
}

impl PrintingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Validates the copy limits (`max_copies >= default_copies >= 1`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_copies < 1 || self.max_copies < self.default_copies {
            return Err(ConfigError::InvalidCopies {
                default: self.default_copies,
                max: self.max_copies,
            });
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub log_path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("./logs/photobooth.log"),
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metrics server port (0 to disable).
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BoothConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub frames: FramesConfig,
    #[serde(default)]
    pub printing: PrintingConfig,
    #[serde(default)]
    pub logs: LogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl BoothConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Loads the file at `path`, falling back to defaults when it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: BoothConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.camera.validate()?;
        if self.ui.countdown_time > 60 {
            return Err(ConfigError::InvalidCountdown(self.ui.countdown_time));
        }
        self.storage.validate()?;
        self.printing.validate()?;
        Ok(())
    }

    pub fn countdown(&self) -> u32 {
        self.ui.countdown_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = BoothConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_resolution_invalid() {
        let mut config = CameraConfig::default();
        config.resolution = [0, 1080];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidResolution("capture"))
        ));
    }

    #[test]
    fn test_copy_limits() {
        let mut printing = PrintingConfig::default();
        printing.default_copies = 0;
        assert!(matches!(
            printing.validate(),
            Err(ConfigError::InvalidCopies { .. })
        ));

        printing.default_copies = 3;
        printing.max_copies = 2;
        assert!(printing.validate().is_err());

        printing.max_copies = 3;
        assert!(printing.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BoothConfig::from_toml(
            r#"
            [ui]
            countdown_time = 5

            [storage]
            max_local_photos = 2
            auto_sync = false

            [printing]
            paper_size = "A4"
            backend = "none"
            "#,
        )
        .unwrap();

        assert_eq!(config.countdown(), 5);
        assert_eq!(config.storage.max_local_photos, 2);
        assert!(!config.storage.auto_sync);
        assert_eq!(config.printing.paper_size, PaperSize::A4);
        assert_eq!(config.printing.backend, PrintBackendKind::None);
        assert_eq!(config.printing.max_copies, 5);
        assert_eq!(config.camera.resolution, [1920, 1080]);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(matches!(
            BoothConfig::from_toml("[storage]\nmax_local_photos = 0\n"),
            Err(ConfigError::InvalidPhotoLimit)
        ));
        assert!(matches!(
            BoothConfig::from_toml("[ui\n"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_paper_size_media_names() {
        assert_eq!(PaperSize::Photo4x6.cups_media(), "na_index-4x6_4x6in");
        let config = BoothConfig::from_toml("[printing]\npaper_size = \"4x6\"\n").unwrap();
        assert_eq!(config.printing.paper_size, PaperSize::Photo4x6);
    }
}
