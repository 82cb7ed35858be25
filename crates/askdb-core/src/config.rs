//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (nested keys separated by `__`, e.g.
//! `APP_CACHE__TTL_SECS=60`). Provides helpers to expand `~` and `${VAR}` and to
//! resolve relative paths against a known base directory.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> { Self::load_from(Path::new(".")) }

    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        if matches!(env, "prod" | "production") {
            let backend: String = self.get("generation.backend")?;
            if backend == "extractive" {
                anyhow::bail!("generation.backend = \"extractive\" is not allowed in production");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub query: QuerySettings,
    pub cache: CacheSettings,
    pub embedding: EmbeddingSettings,
    pub search: SearchSettings,
    pub fusion: FusionSettings,
    pub context: ContextSettings,
    pub generation: GenerationSettings,
    pub trace: TraceSettings,
    pub logging: LoggingSettings,
    pub health: HealthSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<(), Error> {
        let fail = |m: &str| Err(Error::Config(m.to_string()));
        if self.query.max_k == 0 {
            return fail("query.max_k must be at least 1");
        }
        if self.query.default_top_k == 0 || self.query.default_top_k > self.query.max_k {
            return fail("query.default_top_k must be within 1..=query.max_k");
        }
        if self.query.max_query_chars == 0 {
            return fail("query.max_query_chars must be at least 1");
        }
        if self.fusion.lexical_weight < 0.0 || self.fusion.vector_weight < 0.0 {
            return fail("fusion weights must not be negative");
        }
        if self.fusion.lexical_weight + self.fusion.vector_weight <= 0.0 {
            return fail("at least one fusion weight must be positive");
        }
        if self.context.token_budget == 0 {
            return fail("context.token_budget must be at least 1");
        }
        if self.embedding.dim == 0 {
            return fail("embedding.dim must be at least 1");
        }
        if self.generation.inactivity_timeout_ms == 0 {
            return fail("generation.inactivity_timeout_ms must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub max_k: usize,
    pub default_top_k: usize,
    pub max_query_chars: usize,
    pub default_model: String,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self { max_k: 10, default_top_k: 3, max_query_chars: 1000, default_model: "llama3.2:1b".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
    pub op_timeout_ms: u64,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration { Duration::from_secs(self.ttl_secs) }
    pub fn sweep_interval(&self) -> Duration { Duration::from_secs(self.sweep_interval_secs) }
    pub fn op_timeout(&self) -> Duration { Duration::from_millis(self.op_timeout_ms) }
}

impl Default for CacheSettings {
    fn default() -> Self { Self { ttl_secs: 24 * 3600, max_entries: 50_000, sweep_interval_secs: 300, op_timeout_ms: 100 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    Hashing,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub dim: usize,
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hashing,
            dim: 384,
            url: "https://api.jina.ai/v1/embeddings".to_string(),
            model: "jina-embeddings-v3".to_string(),
            api_key: None,
            timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub index_dir: String,
    pub vector_path: String,
    pub lexical_timeout_ms: u64,
    pub vector_timeout_ms: u64,
}

impl SearchSettings {
    pub fn lexical_timeout(&self) -> Duration { Duration::from_millis(self.lexical_timeout_ms) }
    pub fn vector_timeout(&self) -> Duration { Duration::from_millis(self.vector_timeout_ms) }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            index_dir: "./data/indexes/tantivy".to_string(),
            vector_path: "./data/indexes/vectors.json".to_string(),
            lexical_timeout_ms: 3_000,
            vector_timeout_ms: 1_500,
        }
    }
}

/// How per-source scores are brought onto a common `[0, 1]` scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum Normalization {
    /// Min-max within each request's result set.
    PerRequest,
    /// Fixed corpus-wide ranges, clamped.
    Fixed { lexical_min: f32, lexical_max: f32, vector_min: f32, vector_max: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub lexical_weight: f32,
    pub vector_weight: f32,
    pub normalization: Normalization,
}

impl Default for FusionSettings {
    fn default() -> Self { Self { lexical_weight: 0.5, vector_weight: 0.5, normalization: Normalization::PerRequest } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub token_budget: usize,
}

impl Default for ContextSettings {
    fn default() -> Self { Self { token_budget: 1_500 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationBackendKind {
    Ollama,
    Extractive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub backend: GenerationBackendKind,
    pub url: String,
    pub inactivity_timeout_ms: u64,
    /// Wall-clock cap on a whole generation; 0 disables it.
    pub request_timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: usize,
    pub buffer: usize,
}

impl GenerationSettings {
    pub fn inactivity_timeout(&self) -> Duration { Duration::from_millis(self.inactivity_timeout_ms) }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            backend: GenerationBackendKind::Extractive,
            url: "http://localhost:11434".to_string(),
            inactivity_timeout_ms: 30_000,
            request_timeout_ms: 120_000,
            temperature: 0.3,
            max_tokens: 512,
            buffer: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceSinkKind {
    Log,
    Jsonl,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    pub sink: TraceSinkKind,
    pub path: String,
    pub export_timeout_ms: u64,
}

impl TraceSettings {
    pub fn export_timeout(&self) -> Duration { Duration::from_millis(self.export_timeout_ms) }
}

impl Default for TraceSettings {
    fn default() -> Self { Self { sink: TraceSinkKind::Log, path: "./data/traces.jsonl".to_string(), export_timeout_ms: 500 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self { Self { filter: "info".to_string(), json: false } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub probe_timeout_ms: u64,
    pub slow_threshold_ms: u64,
}

impl HealthSettings {
    pub fn probe_timeout(&self) -> Duration { Duration::from_millis(self.probe_timeout_ms) }
    pub fn slow_threshold(&self) -> Duration { Duration::from_millis(self.slow_threshold_ms) }
}

impl Default for HealthSettings {
    fn default() -> Self { Self { probe_timeout_ms: 2_000, slow_threshold_ms: 1_000 } }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
