//! Viewer configuration storage
//!
//! The configuration lives in a versioned JSON envelope in the platform
//! config directory. A missing file yields the defaults.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_SCHEMA_VERSION: u32 = 1;
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve config directory")]
    NoConfigDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported config version {found} (expected {CONFIG_SCHEMA_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Same ceiling the viewer applies to interactive zoom
pub const MAX_DEFAULT_SCALE: f32 = 16.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Zoom factor used when a document is opened
    pub default_scale: f32,
    /// Clockwise degrees, a multiple of 90
    pub default_rotation: i32,
    /// Font for signature text; the system fonts are searched when unset
    pub signature_font: Option<PathBuf>,
    pub signature_font_size: f32,
    /// Consecutive failures of one render before it is reported as stuck
    pub render_failure_threshold: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            default_scale: 1.0,
            default_rotation: 0,
            signature_font: None,
            signature_font_size: 16.0,
            render_failure_threshold: 3,
        }
    }
}

impl ViewerConfig {
    pub fn validate(&self) -> Result<(), StorageError> {
        if !self.default_scale.is_finite()
            || self.default_scale <= 0.0
            || self.default_scale > MAX_DEFAULT_SCALE
        {
            return Err(StorageError::Invalid(format!(
                "default_scale must be in (0, {MAX_DEFAULT_SCALE}], got {}",
                self.default_scale
            )));
        }
        if self.default_rotation.rem_euclid(90) != 0 {
            return Err(StorageError::Invalid(format!(
                "default_rotation must be a multiple of 90, got {}",
                self.default_rotation
            )));
        }
        if !self.signature_font_size.is_finite() || self.signature_font_size <= 0.0 {
            return Err(StorageError::Invalid(format!(
                "signature_font_size must be positive, got {}",
                self.signature_font_size
            )));
        }
        if self.render_failure_threshold == 0 {
            return Err(StorageError::Invalid(
                "render_failure_threshold must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Read a config envelope from an explicit path. The file must exist.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let bytes = fs::read(path.as_ref())?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedVersion { found: envelope.version });
        }

        envelope.config.validate()?;
        Ok(envelope.config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u32,
    config: ViewerConfig,
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "Pagemark", "Pagemark")
            .ok_or(StorageError::NoConfigDirectory)?;

        Ok(Self { root: dirs.config_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn load_config(&self) -> Result<ViewerConfig, StorageError> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(ViewerConfig::default());
        }

        ViewerConfig::load_from_path(path)
    }

    pub fn save_config(&self, config: &ViewerConfig) -> Result<(), StorageError> {
        config.validate()?;
        fs::create_dir_all(&self.root)?;

        let envelope = ConfigEnvelope { version: CONFIG_SCHEMA_VERSION, config: config.clone() };

        let bytes = serde_json::to_vec_pretty(&envelope)?;
        fs::write(self.config_path(), bytes)?;
        Ok(())
    }
}
