//! Service configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; a user `config.toml` in the config directory overrides any
//! subset of keys.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! process_timeout = 10      # Seconds of pixel evaluation before cancel; 0 disables
//! savers = ["jpg", "png", "avif", "webp", "tiff", "gif", "json"]
//!
//! [images]
//! quality = 85              # Lossy encoding quality (1-100)
//! line_cache_height = 16    # Rows per evaluation band
//! max_pages = 256           # Pages kept from a multi-page source
//! gravity = "centre"        # Default crop gravity (anchor name or focal-X-Y)
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! # Only disable the deadline
//! process_timeout = 0
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::format::{Output, SaverMask};
use crate::imaging::{Gravity, Quality};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration loaded from `config.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Evaluation budget in seconds. Zero or less disables the deadline.
    pub process_timeout: i64,
    /// Output formats that may be produced, by extension name.
    pub savers: Vec<String>,
    pub images: ImagesConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            process_timeout: 10,
            savers: Output::ALL
                .iter()
                .map(|o| o.extension().to_string())
                .collect(),
            images: ImagesConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process_timeout < 0 {
            return Err(ConfigError::Validation(
                "process_timeout must not be negative".into(),
            ));
        }
        for saver in &self.savers {
            saver
                .parse::<Output>()
                .map_err(|e| ConfigError::Validation(format!("savers: {e}")))?;
        }
        if self.images.quality == 0 || self.images.quality > 100 {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if self.images.line_cache_height == 0 {
            return Err(ConfigError::Validation(
                "images.line_cache_height must be non-zero".into(),
            ));
        }
        if self.images.max_pages == 0 {
            return Err(ConfigError::Validation(
                "images.max_pages must be non-zero".into(),
            ));
        }
        self.images
            .gravity
            .parse::<Gravity>()
            .map_err(|e| ConfigError::Validation(format!("images.gravity: {e}")))?;
        Ok(())
    }

    /// Bitmask of the enabled savers. Unparseable names are skipped;
    /// [`validate`](Self::validate) rejects them up front.
    pub fn saver_mask(&self) -> SaverMask {
        SaverMask::from_outputs(self.savers.iter().filter_map(|s| s.parse().ok()))
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.images.quality)
    }

    pub fn gravity(&self) -> Gravity {
        self.images.gravity.parse().unwrap_or_default()
    }
}

/// Pixel pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Lossy encoding quality (1-100).
    pub quality: u32,
    /// Rows per evaluation band.
    pub line_cache_height: u32,
    /// Pages kept from a multi-page source.
    pub max_pages: u32,
    /// Default crop gravity.
    pub gravity: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            quality: 85,
            line_cache_height: 16,
            max_pages: 256,
            gravity: "centre".to_string(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// The built-in settings as a TOML table, the layer every user
/// `config.toml` is laid over.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(ServiceConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config: {e}")))
}

/// Lay `overlay` over `base`.
///
/// Tables merge key by key, so `[images] quality = 70` keeps the other
/// `[images]` defaults. Any other overlay value, arrays included, replaces
/// the base value: a user `savers` list is the whole list.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse `config.toml` in `dir` without interpreting it.
///
/// `Ok(None)` when the file is absent: the stock settings apply as they are.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Build the effective settings from the stock table and the user's
/// `config.toml`, if any. Unknown keys and out-of-range values are errors.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let merged = match overlay {
        Some(user) => merge_toml(base, user),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the given directory.
pub fn load_config(dir: &Path) -> Result<ServiceConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(dir)?;
    let config = resolve_config(base, overlay)?;
    tracing::debug!(
        dir = %dir.display(),
        process_timeout = config.process_timeout,
        savers = %config.saver_mask(),
        "Loaded config"
    );
    Ok(config)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pixelsmith configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Seconds of pixel evaluation allowed per image before the operation is
# canceled. 0 disables the deadline.
process_timeout = 10

# Output formats that may be produced. Requests for any other format fail.
savers = ["jpg", "png", "avif", "webp", "tiff", "gif", "json"]

# ---------------------------------------------------------------------------
# Pixel pipeline
# ---------------------------------------------------------------------------
[images]
# Lossy encoding quality (1 = worst, 100 = best).
quality = 85

# Rows computed per evaluation band. Progress is reported between bands.
line_cache_height = 16

# Pages kept from a multi-page (animated) source.
max_pages = 256

# Default crop gravity: top-left, top, top-right, left, centre, right,
# bottom-left, bottom, bottom-right, or focal-X-Y with X, Y in [0, 1].
gravity = "centre"
"##
}
