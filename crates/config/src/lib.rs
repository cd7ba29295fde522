//! Configuration loading and validation.
//!
//! Values are layered with [figment]: compiled-in defaults, then an optional
//! configuration file (TOML, YAML or JSON, picked by extension), then
//! `MODELHUB_`-prefixed environment variables where `__` separates nesting
//! levels (`MODELHUB_CACHE__MAX_SIZE_GIB=8`).
//!
//! ```toml
//! [cache]
//! root = "/var/cache/modelhub"
//! max_size_gib = 8
//!
//! [hub]
//! root_url = "https://model-hub.mozilla.org/"
//! url_template = "{model}/{revision}"
//!
//! [[hub.rules]]
//! filter = "DENY"
//! url_prefix = "https://model-hub.mozilla.org/untrusted/"
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::instrument;

const ENV_PREFIX: &str = "MODELHUB_";
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheSettings,
    pub hub: HubSettings,
}

/// Where and how much the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Absolute directory holding blobs.
    pub root: PathBuf,
    /// SQLite metadata database. Relative paths are resolved against `root`.
    pub database: PathBuf,
    /// Blob path prefix for model files.
    pub namespace: String,
    /// Blob path prefix for owner icons.
    pub icon_namespace: String,
    /// Quota for everything under `namespace`, in GiB.
    pub max_size_gib: f64,
}
impl Default for CacheSettings {
    fn default() -> Self {
        let root = ProjectDirs::from("", "", "modelhub")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("modelhub"));
        Self {
            root,
            database: PathBuf::from("cache.sqlite"),
            namespace: "models".to_string(),
            icon_namespace: "icons".to_string(),
            max_size_gib: 4.0,
        }
    }
}
impl CacheSettings {
    pub fn max_size_bytes(&self) -> u64 {
        // Saturating float-to-int cast; validate() has already ruled out
        // negative and non-finite values.
        (self.max_size_gib * BYTES_PER_GIB) as u64
    }

    pub fn database_path(&self) -> PathBuf {
        match self.database.is_absolute() {
            true => self.database.clone(),
            false => self.root.join(&self.database),
        }
    }
}

/// Where models come from and which origins may be contacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub root_url: String,
    /// Remote layout between the root and the file path. Must contain both
    /// `{model}` and `{revision}`.
    pub url_template: String,
    /// Regular expression every requested file name must match.
    pub file_pattern: String,
    /// Upper bound on the ETag revalidation HEAD request.
    pub etag_timeout_ms: u64,
    /// Ordered allow/deny rules; the first matching prefix wins.
    pub rules: Vec<UrlRule>,
    /// Skip the allow/deny gate entirely.
    pub bypass_rules: bool,
}
impl Default for HubSettings {
    fn default() -> Self {
        Self {
            root_url: "https://model-hub.mozilla.org/".to_string(),
            url_template: "{model}/{revision}".to_string(),
            file_pattern: r"^[A-Za-z0-9_.-]+(/[A-Za-z0-9_.-]+)*$".to_string(),
            etag_timeout_ms: 1000,
            rules: Vec::new(),
            bypass_rules: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleFilter {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRule {
    pub filter: RuleFilter,
    pub url_prefix: String,
}

impl Config {
    /// Load defaults, an optional file, then the environment.
    #[instrument(skip_all, fields(path = ?path.map(Path::display)))]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            figment = match extension {
                "toml" => figment.merge(Toml::file_exact(path)),
                "yaml" | "yml" => figment.merge(Yaml::file_exact(path)),
                "json" => figment.merge(Json::file_exact(path)),
                other => exn::bail!(ErrorKind::UnsupportedFormat(other.to_string())),
            };
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate from an already-assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(root = %config.cache.root.display(), hub = %config.hub.root_url, "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let cache = &self.cache;
        if !cache.root.is_absolute() {
            exn::bail!(ErrorKind::Invalid("cache.root"));
        }
        if !(cache.max_size_gib.is_finite() && cache.max_size_gib > 0.0) {
            exn::bail!(ErrorKind::Invalid("cache.max_size_gib"));
        }
        for (field, value) in [("cache.namespace", &cache.namespace), ("cache.icon_namespace", &cache.icon_namespace)] {
            if value.is_empty() || value.contains('/') || value.starts_with('.') {
                exn::bail!(ErrorKind::Invalid(field));
            }
        }
        if cache.namespace == cache.icon_namespace {
            exn::bail!(ErrorKind::Invalid("cache.icon_namespace"));
        }
        let hub = &self.hub;
        if !hub.url_template.contains("{model}") || !hub.url_template.contains("{revision}") {
            exn::bail!(ErrorKind::Invalid("hub.url_template"));
        }
        if hub.root_url.is_empty() {
            exn::bail!(ErrorKind::Invalid("hub.root_url"));
        }
        if hub.rules.iter().any(|rule| rule.url_prefix.is_empty()) {
            exn::bail!(ErrorKind::Invalid("hub.rules"));
        }
        Ok(())
    }
}
