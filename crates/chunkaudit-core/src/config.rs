use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    /// `config.toml`, then `config.<RUST_ENV>.toml`, then `APP_*` variables
    /// (`APP_STORE__PATH` sets `store.path`).
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    /// Wraps an already assembled figment; tests build one from TOML strings.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    pub fn settings(&self) -> Result<Settings> {
        let mut settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let raw = settings.store.path.to_string_lossy().into_owned();
        settings.store.path = expand_path(raw);
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub default_collection: String,
    /// Used when a collection is created without a known vector width.
    pub embedding_dim: i32,
    pub connect_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/lancedb"),
            default_collection: "documents".to_string(),
            embedding_dim: 1024,
            connect_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub base_url: String,
    pub ingest_flow_id: String,
    pub chat_flow_id: String,
    pub file_input_component: String,
    pub chat_input_component: String,
    pub store_query_component: String,
    pub n_results: u32,
    pub timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7860".to_string(),
            ingest_flow_id: String::new(),
            chat_flow_id: String::new(),
            file_input_component: "File-ingest".to_string(),
            chat_input_component: "ChatInput-query".to_string(),
            store_query_component: "VectorStore-query".to_string(),
            n_results: 4,
            timeout_secs: 300,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.store.embedding_dim <= 0 {
            return Err(Error::InvalidConfig(format!(
                "store.embedding_dim must be positive, got {}",
                self.store.embedding_dim
            )));
        }
        if self.store.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig("store.connect_timeout_ms must be positive".into()));
        }
        if self.store.default_collection.trim().is_empty() {
            return Err(Error::InvalidConfig("store.default_collection is empty".into()));
        }
        if self.pipeline.timeout_secs == 0 {
            return Err(Error::InvalidConfig("pipeline.timeout_secs must be positive".into()));
        }
        if self.pipeline.n_results == 0 {
            return Err(Error::InvalidConfig("pipeline.n_results must be positive".into()));
        }
        let url = url::Url::parse(&self.pipeline.base_url).map_err(|e| {
            Error::InvalidConfig(format!("pipeline.base_url '{}': {e}", self.pipeline.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "pipeline.base_url must be http(s), got '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
