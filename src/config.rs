//! Configuration module for the step guide service.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SG_` and use double underscores
//! to separate nested levels:
//! - `SG_MATCHING__TASK_THRESHOLD=0.35` sets `matching.task_threshold`
//! - `SG_SESSION__TTL_SECS=600` sets `session.ttl_secs`
//! - `SG_EMBEDDING__PROVIDER=local` sets `embedding.provider`
//!
//! The OpenAI API key is only ever read from `OPENAI_API_KEY`.

use crate::matching::{ClassifierFailurePolicy, DEFAULT_STEP_THRESHOLD, DEFAULT_TASK_THRESHOLD};
use crate::openai::RetryPolicy;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".stepguide";
const ENV_PREFIX: &str = "SG_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root directory (where .stepguide is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub corpus: CorpusConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorpusConfig {
    /// Directory holding the task vector file
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Task metadata JSON, parallel to the vector file
    #[serde(default = "default_meta_path")]
    pub meta_path: PathBuf,

    /// Embedding dimension the corpus was built with
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MatchingConfig {
    /// Maximum squared L2 distance accepted for a task match
    #[serde(default = "default_task_threshold")]
    pub task_threshold: f32,

    /// Maximum squared L2 distance accepted for a step match
    #[serde(default = "default_step_threshold")]
    pub step_threshold: f32,

    /// What a classifier failure means for mismatch detection
    #[serde(default)]
    pub classifier_failure: ClassifierFailurePolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Idle time after which a session expires
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Number of query/reply pairs kept per session
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Background sweep interval in server mode
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Sweep expired sessions at the start of every store operation
    #[serde(default = "default_true")]
    pub sweep_on_access: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAi,
    Local,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// HTTP server bind address
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".stepguide/corpus")
}
fn default_meta_path() -> PathBuf {
    PathBuf::from(".stepguide/corpus/task_meta.json")
}
fn default_dimension() -> usize {
    crate::vector::VECTOR_DIMENSION_1536
}
fn default_task_threshold() -> f32 {
    DEFAULT_TASK_THRESHOLD
}
fn default_step_threshold() -> f32 {
    DEFAULT_STEP_THRESHOLD
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_history_limit() -> usize {
    10
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_provider() -> EmbeddingProvider {
    EmbeddingProvider::OpenAi
}
fn default_embedding_model() -> String {
    crate::openai::DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_chat_model() -> String {
    crate::openai::DEFAULT_CHAT_MODEL.to_string()
}
fn default_base_url() -> String {
    crate::openai::DEFAULT_BASE_URL.to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_bind_address() -> String {
    "0.0.0.0:9091".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            debug: false,
            corpus: CorpusConfig::default(),
            matching: MatchingConfig::default(),
            session: SessionConfig::default(),
            embedding: EmbeddingConfig::default(),
            classifier: ClassifierConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            meta_path: default_meta_path(),
            dimension: default_dimension(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            task_threshold: default_task_threshold(),
            step_threshold: default_step_threshold(),
            classifier_failure: ClassifierFailurePolicy::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            history_limit: default_history_limit(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_on_access: true,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

fn env_provider() -> Env {
    // Double underscore separates nested levels; single underscores stay
    // inside field names.
    Env::prefixed(ENV_PREFIX).map(|key| key.as_str().to_lowercase().replace("__", ".").into())
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(env_provider())
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(env_provider())
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a .stepguide directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .stepguide is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Resolve a configured path against the workspace root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = r#"# stepguide configuration
# Environment overrides: SG_<SECTION>__<KEY>, e.g. SG_SESSION__TTL_SECS=600
# The OpenAI key is read from OPENAI_API_KEY only.

version = 1
debug = false

[corpus]
# Directory holding the task vector file written by 'stepguide build-corpus'
index_path = ".stepguide/corpus"
# Task records in the same order as the vectors
meta_path = ".stepguide/corpus/task_meta.json"
# Must match the embedding model (1536 for text-embedding-ada-002, 384 for local)
dimension = 1536

[matching]
# Maximum squared L2 distance for a match
task_threshold = 0.40
step_threshold = 0.40
# "fail_open": a classifier error keeps the current task
# "fail_closed": a classifier error triggers a new task search
classifier_failure = "fail_open"

[session]
ttl_secs = 3600
history_limit = 10
sweep_interval_secs = 60
sweep_on_access = true

[embedding]
# "openai" or "local" (AllMiniLML6V2, 384 dimensions)
provider = "openai"
model = "text-embedding-ada-002"
base_url = "https://api.openai.com/v1"
timeout_secs = 30
max_retries = 2
retry_backoff_ms = 500

[classifier]
model = "gpt-4"
base_url = "https://api.openai.com/v1"
timeout_secs = 30
max_retries = 2
retry_backoff_ms = 500

[server]
bind = "0.0.0.0:9091"
"#;

        std::fs::write(&config_path, template)?;

        if force {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
        }

        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.corpus.dimension, 1536);
        assert_eq!(settings.matching.task_threshold, 0.40);
        assert_eq!(settings.matching.step_threshold, 0.40);
        assert_eq!(
            settings.matching.classifier_failure,
            ClassifierFailurePolicy::FailOpen
        );
        assert_eq!(settings.session.ttl_secs, 3600);
        assert_eq!(settings.session.history_limit, 10);
        assert_eq!(settings.embedding.provider, EmbeddingProvider::OpenAi);
        assert_eq!(settings.server.bind, "0.0.0.0:9091");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[matching]
task_threshold = 0.25
classifier_failure = "fail_closed"

[embedding]
provider = "local"

[session]
ttl_secs = 120
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.matching.task_threshold, 0.25);
        assert_eq!(
            settings.matching.classifier_failure,
            ClassifierFailurePolicy::FailClosed
        );
        assert_eq!(settings.embedding.provider, EmbeddingProvider::Local);
        assert_eq!(settings.session.ttl(), Duration::from_secs(120));
        // Untouched fields keep their defaults
        assert_eq!(settings.matching.step_threshold, 0.40);
        assert_eq!(settings.session.history_limit, 10);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.session.history_limit = 4;
        settings.classifier.model = "gpt-4o-mini".to_string();

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.session.history_limit, 4);
        assert_eq!(loaded.classifier.model, "gpt-4o-mini");
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[server]\nbind = \"127.0.0.1:1\"\n").unwrap();

        unsafe {
            std::env::set_var("SG_SERVER__BIND", "127.0.0.1:7000");
        }
        let settings = Settings::load_from(&config_path).unwrap();
        unsafe {
            std::env::remove_var("SG_SERVER__BIND");
        }

        assert_eq!(settings.server.bind, "127.0.0.1:7000");
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = EmbeddingConfig {
            max_retries: 3,
            retry_backoff_ms: 100,
            ..EmbeddingConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_resolve_path() {
        let settings = Settings {
            workspace_root: Some(PathBuf::from("/srv/guide")),
            ..Settings::default()
        };
        assert_eq!(
            settings.resolve_path(Path::new(".stepguide/corpus")),
            PathBuf::from("/srv/guide/.stepguide/corpus")
        );
        assert_eq!(
            settings.resolve_path(Path::new("/abs/meta.json")),
            PathBuf::from("/abs/meta.json")
        );
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[matching]\nclassifier_failure = \"maybe\"\n").unwrap();
        assert!(Settings::load_from(&config_path).is_err());
    }
}
