//! Configuration file support for Specula.
//!
//! Settings are stored as versioned JSON. Every section and field has a
//! default, so partial files and files from older versions load fine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Log level setting for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version of the configuration file format
    #[serde(default = "default_version")]
    pub version: u32,

    /// Application name (for identification)
    #[serde(default = "default_app_name")]
    pub app_name: String,

    #[serde(default)]
    pub preferences: UserPreferences,

    #[serde(default)]
    pub roi: RoiConfig,

    #[serde(default)]
    pub dist_view: DistViewConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub segmentation: SegmentationConfig,

    #[serde(default)]
    pub illumination: IlluminationConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_app_name() -> String {
    "Specula".to_string()
}

/// User preferences section of the config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Region-of-interest behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiConfig {
    /// Incremental ROI updates are used while
    /// `area(sub) + area(add) <= threshold * area(new roi)`.
    #[serde(default = "default_incremental_threshold")]
    pub incremental_threshold: f64,

    /// Largest side of the initial ROI for big images
    #[serde(default = "default_initial_max_side")]
    pub initial_max_side: i32,

    /// Images with more pixels than this start with a centered sub-ROI
    #[serde(default = "default_initial_area_limit")]
    pub initial_area_limit: i64,
}

fn default_incremental_threshold() -> f64 {
    constants::DEFAULT_INCREMENTAL_THRESHOLD
}

fn default_initial_max_side() -> i32 {
    constants::INITIAL_ROI_MAX_SIDE
}

fn default_initial_area_limit() -> i64 {
    constants::INITIAL_ROI_AREA_LIMIT
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            incremental_threshold: default_incremental_threshold(),
            initial_max_side: default_initial_max_side(),
            initial_area_limit: default_initial_area_limit(),
        }
    }
}

/// Distribution view settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistViewConfig {
    /// Quantization levels per band
    #[serde(default = "default_bins")]
    pub bins: u32,
}

fn default_bins() -> u32 {
    constants::DEFAULT_DIST_VIEW_BINS
}

impl Default for DistViewConfig {
    fn default() -> Self {
        Self {
            bins: default_bins(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_clusters")]
    pub clusters: usize,
    #[serde(default = "default_cluster_iterations")]
    pub iterations: usize,
}

fn default_clusters() -> usize {
    constants::DEFAULT_CLUSTERS
}

fn default_cluster_iterations() -> usize {
    constants::DEFAULT_CLUSTER_ITERATIONS
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            clusters: default_clusters(),
            iterations: default_cluster_iterations(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Maximum spectral distance between neighbouring pixels of one segment
    #[serde(default = "default_spectral_threshold")]
    pub spectral_threshold: f32,
}

fn default_spectral_threshold() -> f32 {
    constants::DEFAULT_SEGMENTATION_THRESHOLD
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            spectral_threshold: default_spectral_threshold(),
        }
    }
}

/// Wavelength range assigned to images that carry no wavelength metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IlluminationConfig {
    #[serde(default = "default_spectrum_start")]
    pub spectrum_start_nm: f32,
    #[serde(default = "default_spectrum_end")]
    pub spectrum_end_nm: f32,
}

fn default_spectrum_start() -> f32 {
    constants::DEFAULT_SPECTRUM_START_NM
}

fn default_spectrum_end() -> f32 {
    constants::DEFAULT_SPECTRUM_END_NM
}

impl Default for IlluminationConfig {
    fn default() -> Self {
        Self {
            spectrum_start_nm: default_spectrum_start(),
            spectrum_end_nm: default_spectrum_end(),
        }
    }
}

impl AppConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            app_name: default_app_name(),
            ..Default::default()
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        // Validate version compatibility
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        Ok(config)
    }

    /// Get the default config filename.
    pub fn default_filename() -> &'static str {
        "specula-config.json"
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        // Try to use XDG config directory, fall back to home directory
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("specula").join(Self::default_filename()))
        } else {
            dirs::home_dir().map(|home_dir| {
                home_dir
                    .join(".config")
                    .join("specula")
                    .join(Self::default_filename())
            })
        }
    }

    /// Try to load configuration from the default path.
    /// Returns None if the file doesn't exist or can't be read.
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config file found at {:?}", path);
            return None;
        }

        match std::fs::read_to_string(&path) {
            Ok(json) => match Self::from_json(&json) {
                Ok(config) => {
                    log::info!("Loaded configuration from {:?}", path);
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse config file {:?}: {}", path, e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read config file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Configuration from the default path, or defaults.
    pub fn load_or_default() -> Self {
        Self::load_from_default_path().unwrap_or_else(Self::new)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },
}
