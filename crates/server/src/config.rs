//! Server configuration.
//!
//! Settings are resolved with the following priority:
//! 1. CLI arguments (highest, applied in `main`)
//! 2. Environment variables (`VISIONTAG_*`)
//! 3. Config file (TOML, `--config`)
//! 4. Default values (lowest)
//!
//! Every numeric knob is clamped to a documented minimum after loading,
//! so a hostile or fat-fingered environment can never configure the
//! server into a degenerate state (zero-permit gate, 1-item cache, ...).

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resolved runtime settings. Partial TOML files work: every missing
/// field keeps its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Display name reported by the health endpoint.
    pub app_name: String,

    /// Bind host.
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Path to the detector model weights.
    pub model_path: String,

    /// Maximum upload size per file, in megabytes. Min 1.
    pub max_upload_mb: usize,

    /// Largest image side passed to the detector; bigger images are
    /// downscaled preserving aspect ratio. Min 128.
    pub max_dimension: u32,

    /// Maximum number of files per batch request. Min 1.
    pub max_batch_files: usize,

    /// Result cache TTL in seconds. 0 disables caching entirely.
    pub cache_ttl_seconds: u64,

    /// Result cache capacity. Min 16.
    pub cache_max_items: usize,

    /// Whether a credential is mandatory on every detect call.
    pub auth_required: bool,

    /// Key registered with both scopes when `api_keys` is empty.
    pub default_api_key: String,

    /// API key list: `key[:scope|scope...],key2[:...]`.
    pub api_keys: Option<String>,

    /// Sliding-window rate limit per identity. Min 10.
    pub rate_limit_per_minute: usize,

    /// Log level when `RUST_LOG` is unset.
    pub log_level: String,

    /// Concurrent inference permit count. Min 1.
    pub max_concurrent_inference: usize,

    /// Per-call inference deadline in seconds. Min 1.
    pub inference_timeout_seconds: u64,

    /// Allowed CORS origins; `*` allows all.
    pub cors_origins: Vec<String>,

    /// Remote image download timeout in seconds. Min 1.
    pub remote_fetch_timeout_seconds: u64,

    /// Maximum remote image size, in megabytes. Min 1.
    pub max_remote_image_mb: usize,

    /// Capacity of the recent-detections ring.
    pub recent_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "VisionTag API".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            model_path: "yolov8n.onnx".to_string(),
            max_upload_mb: 8,
            max_dimension: 1280,
            max_batch_files: 10,
            cache_ttl_seconds: 300,
            cache_max_items: 256,
            auth_required: false,
            default_api_key: "visiontag-local-dev-key".to_string(),
            api_keys: None,
            rate_limit_per_minute: 120,
            log_level: "info".to_string(),
            max_concurrent_inference: 2,
            inference_timeout_seconds: 25,
            cors_origins: vec!["*".to_string()],
            remote_fetch_timeout_seconds: 8,
            max_remote_image_mb: 8,
            recent_capacity: 250,
        }
    }
}

impl Settings {
    /// Crate version, reported by health and startup logs.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Load settings: file (when given) -> env -> clamps.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match config_path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        settings.apply_env();
        settings.clamp();
        Ok(settings)
    }

    /// Read settings from a TOML file. Missing fields keep defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Write the resolved settings as TOML.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(ConfigError::Io)
    }

    /// Apply `VISIONTAG_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(value) = env_string("VISIONTAG_APP_NAME") {
            self.app_name = value;
        }
        if let Some(value) = env_string("VISIONTAG_HOST") {
            self.host = value;
        }
        if let Some(value) = env_parsed("VISIONTAG_PORT") {
            self.port = value;
        }
        if let Some(value) = env_string("VISIONTAG_MODEL_PATH") {
            self.model_path = value;
        }
        if let Some(value) = env_parsed("VISIONTAG_MAX_UPLOAD_MB") {
            self.max_upload_mb = value;
        }
        if let Some(value) = env_parsed("VISIONTAG_MAX_DIMENSION") {
            self.max_dimension = value;
        }
        if let Some(value) = env_parsed("VISIONTAG_MAX_BATCH_FILES") {
            self.max_batch_files = value;
        }
        if let Some(value) = env_parsed("VISIONTAG_CACHE_TTL_SECONDS") {
            self.cache_ttl_seconds = value;
        }
        if let Some(value) = env_parsed("VISIONTAG_CACHE_MAX_ITEMS") {
            self.cache_max_items = value;
        }
        if let Some(value) = env_bool("VISIONTAG_AUTH_REQUIRED") {
            self.auth_required = value;
        }
        if let Some(value) = env_string("VISIONTAG_DEFAULT_API_KEY") {
            self.default_api_key = value;
        }
        if let Some(value) = env_string("VISIONTAG_API_KEYS") {
            self.api_keys = Some(value);
        }
        if let Some(value) = env_parsed("VISIONTAG_RATE_LIMIT_PER_MINUTE") {
            self.rate_limit_per_minute = value;
        }
        if let Some(value) = env_string("VISIONTAG_LOG_LEVEL") {
            self.log_level = value.to_lowercase();
        }
        if let Some(value) = env_parsed("VISIONTAG_MAX_CONCURRENT_INFERENCE") {
            self.max_concurrent_inference = value;
        }
        if let Some(value) = env_parsed("VISIONTAG_INFERENCE_TIMEOUT_SECONDS") {
            self.inference_timeout_seconds = value;
        }
        if let Some(value) = env_string("VISIONTAG_CORS_ORIGINS") {
            self.cors_origins = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = env_parsed("VISIONTAG_REMOTE_FETCH_TIMEOUT_SECONDS") {
            self.remote_fetch_timeout_seconds = value;
        }
        if let Some(value) = env_parsed("VISIONTAG_MAX_REMOTE_IMAGE_MB") {
            self.max_remote_image_mb = value;
        }
    }

    /// Enforce the documented minimums.
    pub fn clamp(&mut self) {
        self.max_upload_mb = self.max_upload_mb.max(1);
        self.max_dimension = self.max_dimension.max(128);
        self.max_batch_files = self.max_batch_files.max(1);
        self.cache_max_items = self.cache_max_items.max(16);
        self.rate_limit_per_minute = self.rate_limit_per_minute.max(10);
        self.max_concurrent_inference = self.max_concurrent_inference.max(1);
        self.inference_timeout_seconds = self.inference_timeout_seconds.max(1);
        self.remote_fetch_timeout_seconds = self.remote_fetch_timeout_seconds.max(1);
        self.max_remote_image_mb = self.max_remote_image_mb.max(1);
        self.recent_capacity = self.recent_capacity.max(10);
        if self.cors_origins.is_empty() {
            self.cors_origins = vec!["*".to_string()];
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn max_remote_bytes(&self) -> usize {
        self.max_remote_image_mb * 1024 * 1024
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_seconds)
    }

    pub fn remote_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_fetch_timeout_seconds)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading/writing the config file.
    Io(std::io::Error),
    /// Error parsing TOML.
    Parse(toml::de::Error),
    /// Error serializing to TOML.
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "Parse error: {e}"),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let settings = Settings {
            port: 9001,
            cache_max_items: 64,
            auth_required: true,
            api_keys: Some("ops:admin".to_string()),
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        let loaded = Settings::load_from(&path).unwrap();

        assert_eq!(loaded.port, 9001);
        assert_eq!(loaded.cache_max_items, 64);
        assert!(loaded.auth_required);
        assert_eq!(loaded.api_keys, Some("ops:admin".to_string()));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(&path, "port = 1234\n").unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.port, 1234);
        assert_eq!(loaded.cache_ttl_seconds, Settings::default().cache_ttl_seconds);
    }

    #[test]
    fn clamp_enforces_minimums() {
        let mut settings = Settings {
            max_upload_mb: 0,
            cache_max_items: 1,
            rate_limit_per_minute: 0,
            max_concurrent_inference: 0,
            inference_timeout_seconds: 0,
            cors_origins: Vec::new(),
            ..Settings::default()
        };
        settings.clamp();
        assert_eq!(settings.max_upload_mb, 1);
        assert_eq!(settings.cache_max_items, 16);
        assert_eq!(settings.rate_limit_per_minute, 10);
        assert_eq!(settings.max_concurrent_inference, 1);
        assert_eq!(settings.inference_timeout_seconds, 1);
        assert_eq!(settings.cors_origins, vec!["*".to_string()]);
    }

    #[test]
    fn zero_cache_ttl_survives_clamping() {
        // TTL 0 is the documented cache-off switch, not a config mistake.
        let mut settings = Settings {
            cache_ttl_seconds: 0,
            ..Settings::default()
        };
        settings.clamp();
        assert_eq!(settings.cache_ttl_seconds, 0);
    }

    #[test]
    fn byte_helpers_scale_megabytes() {
        let settings = Settings::default();
        assert_eq!(settings.max_upload_bytes(), 8 * 1024 * 1024);
        assert_eq!(settings.max_remote_bytes(), 8 * 1024 * 1024);
    }
}
