//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;

/// Runtime configuration for astra-server.
///
/// Every field has a default so the server starts without any environment
/// variables set; it just reports classifiers as unavailable until the model
/// directory and gallery exist.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:5000"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory for the daily rolling log file.  Stdout only when unset.
    pub log_dir: Option<PathBuf>,

    /// Base directory for relative model and gallery paths.
    pub model_dir: PathBuf,

    /// TOML catalog replacing the built-in model table.
    pub models_file: Option<PathBuf>,

    /// Classifier whose embedding feeds the OOD gate.
    pub reference_model: String,

    /// Reference gallery, relative to `model_dir` unless absolute.
    pub gallery_path: PathBuf,

    /// Minimum cosine similarity for an image to count as a DSO.
    pub similarity_threshold: f32,

    /// Longest edge of upload previews, in pixels.
    pub preview_max_edge: u32,

    /// Request body limit, in MiB.
    pub max_upload_size_mb: usize,

    /// Comma-separated CORS origins; any origin when unset.
    pub cors_allowed_origins: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
            log_dir: None,
            model_dir: PathBuf::from("models"),
            models_file: None,
            reference_model: "vgg".to_owned(),
            gallery_path: PathBuf::from("embeddings/vgg_embeddings.f32"),
            similarity_threshold: astra_core::SIMILARITY_THRESHOLD,
            preview_max_edge: 1024,
            max_upload_size_mb: 25,
            cors_allowed_origins: None,
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env_or("ASTRA_BIND", &defaults.bind_address),
            log_level: env_or("ASTRA_LOG", &defaults.log_level),
            log_json: std::env::var("ASTRA_LOG_JSON")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.log_json),
            log_dir: env_path("ASTRA_LOG_DIR"),
            model_dir: env_path("ASTRA_MODEL_DIR").unwrap_or(defaults.model_dir),
            models_file: env_path("ASTRA_MODELS_FILE"),
            reference_model: env_or("ASTRA_REFERENCE_MODEL", &defaults.reference_model),
            gallery_path: env_path("ASTRA_GALLERY_PATH").unwrap_or(defaults.gallery_path),
            similarity_threshold: parse_env(
                "ASTRA_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            ),
            preview_max_edge: parse_env("ASTRA_PREVIEW_MAX_EDGE", defaults.preview_max_edge),
            max_upload_size_mb: parse_env("ASTRA_MAX_UPLOAD_SIZE_MB", defaults.max_upload_size_mb),
            cors_allowed_origins: std::env::var("ASTRA_CORS_ORIGINS").ok(),
        }
    }

    /// `gallery_path` resolved against `model_dir`.
    pub fn resolved_gallery_path(&self) -> PathBuf {
        if self.gallery_path.is_absolute() {
            self.gallery_path.clone()
        } else {
            self.model_dir.join(&self.gallery_path)
        }
    }

    pub fn max_upload_size_bytes(&self) -> usize {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
