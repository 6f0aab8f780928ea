//! Booth configuration.
//!
//! The configuration is loaded once at startup from a TOML file,
//! validated eagerly and then handed to each component as an
//! immutable snapshot. Reloading requires a restart.

mod settings;

pub use settings::{
    BoothConfig, CameraConfig, ConfigError, FramesConfig, LogConfig, MetricsConfig, PaperSize,
    PrintBackendKind, PrintingConfig, StorageConfig, UiConfig,
};
