//! Configuration management for librag
//!
//! Loads the TOML configuration, applies `LIBRAG_SECTION__KEY` environment
//! overrides and validates the result before anything is constructed from it.

use crate::error::{LibragError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub library: LibraryConfig,
    pub storage: StorageConfig,
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Watched document folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub root: PathBuf,
    /// Comma separated extension allow-list; empty allows every file
    pub extensions: String,
}

/// Durable store location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Relative paths are resolved against `data_dir`; a `.gz` suffix enables gzip
    pub store_file: PathBuf,
    pub auto_save: bool,
}

/// Local model server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    /// Falls back to `chat_model` when blank
    #[serde(default)]
    pub hints_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    pub log_every: usize,
}

/// Periodic library scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    pub interval: String,
}

/// Scheduled store compaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub enabled: bool,
    /// Six-field cron expression (seconds first)
    pub schedule: String,
}

/// Multi-query retrieval tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub max_hints: usize,
    pub mmr_enabled: bool,
    /// 1.0 ranks purely by relevance, 0.0 purely by diversity
    pub mmr_lambda: f64,
    pub mmr_overfetch: usize,
}

/// Startup and on-demand store loading
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub auto_load: bool,
    pub clear: bool,
    pub batch_size: usize,
    pub log_every: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// fast, medium, long, xlong or max
    pub think: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::chunking::DEFAULT_CHUNK_SIZE,
            overlap: crate::chunking::DEFAULT_OVERLAP,
            log_every: 50,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: "60s".to_string(),
        }
    }
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 0 3 * * *".to_string(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 6,
            max_context_chars: 6000,
            max_hints: 8,
            mmr_enabled: true,
            mmr_lambda: 0.5,
            mmr_overfetch: 24,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            auto_load: true,
            clear: true,
            batch_size: 200,
            log_every: 100,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            think: "medium".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LibragError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| LibragError::io(e, format!("Failed to read config file: {:?}", path)))?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load `path`, or fall back to defaults (plus env overrides) when the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(LibragError::ConfigNotFound { path }) => {
                tracing::warn!("No config at {:?}; using defaults", path);
                let mut config = Config::default();
                config.apply_env_overrides();
                ConfigValidator::validate(&config)?;
                Ok(config)
            }
            other => other,
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LibragError::io(e, format!("Failed to create config directory: {:?}", parent))
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| LibragError::io(e, format!("Failed to write config file: {:?}", path)))?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LIBRAG_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("LIBRAG_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "LIBRARY__ROOT" => self.library.root = PathBuf::from(value),
            "LIBRARY__EXTENSIONS" => self.library.extensions = value.to_string(),
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__STORE_FILE" => self.storage.store_file = PathBuf::from(value),
            "STORAGE__AUTO_SAVE" => self.storage.auto_save = parse_env(path, value)?,
            "OLLAMA__BASE_URL" => self.ollama.base_url = value.to_string(),
            "OLLAMA__EMBEDDING_MODEL" => self.ollama.embedding_model = value.to_string(),
            "OLLAMA__CHAT_MODEL" => self.ollama.chat_model = value.to_string(),
            "OLLAMA__HINTS_MODEL" => self.ollama.hints_model = value.to_string(),
            "INGEST__CHUNK_SIZE" => self.ingest.chunk_size = parse_env(path, value)?,
            "INGEST__OVERLAP" => self.ingest.overlap = parse_env(path, value)?,
            "WATCH__ENABLED" => self.watch.enabled = parse_env(path, value)?,
            "WATCH__INTERVAL" => self.watch.interval = value.to_string(),
            "COMPACTION__ENABLED" => self.compaction.enabled = parse_env(path, value)?,
            "COMPACTION__SCHEDULE" => self.compaction.schedule = value.to_string(),
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_env(path, value)?,
            "RETRIEVAL__MMR_ENABLED" => self.retrieval.mmr_enabled = parse_env(path, value)?,
            "RETRIEVAL__MMR_LAMBDA" => self.retrieval.mmr_lambda = parse_env(path, value)?,
            "LOAD__AUTO_LOAD" => self.load.auto_load = parse_env(path, value)?,
            "CHAT__THINK" => self.chat.think = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Library root with `~` expanded
    pub fn library_root(&self) -> PathBuf {
        expand_tilde(&self.library.root)
    }

    /// Absolute store file path: `store_file` joined onto the expanded `data_dir`
    /// unless it is already absolute
    pub fn store_path(&self) -> PathBuf {
        let file = expand_tilde(&self.storage.store_file);
        if file.is_absolute() {
            file
        } else {
            expand_tilde(&self.storage.data_dir).join(file)
        }
    }

    /// Model used for hint extraction
    pub fn hints_model(&self) -> &str {
        if self.ollama.hints_model.trim().is_empty() {
            &self.ollama.chat_model
        } else {
            &self.ollama.hints_model
        }
    }

    /// Scan interval parsed from `watch.interval`
    pub fn watch_interval(&self) -> Result<Duration> {
        parse_duration(&self.watch.interval).ok_or_else(|| LibragError::InvalidConfigValue {
            path: "watch.interval".to_string(),
            message: format!("Invalid duration: {}", self.watch.interval),
        })
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| LibragError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("librag").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| LibragError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".librag"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| LibragError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse `500ms`, `60s`, `5m`, `1h` or a bare number of seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match unit.trim() {
        "ms" => Some(Duration::from_millis(n)),
        "" | "s" => Some(Duration::from_secs(n)),
        "m" => Some(Duration::from_secs(n * 60)),
        "h" => Some(Duration::from_secs(n * 3600)),
        _ => None,
    }
}

/// Replace a leading `~` with the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.librag");

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            library: LibraryConfig {
                root: data_dir.join("library"),
                extensions: crate::library::DEFAULT_EXTENSIONS.to_string(),
            },
            storage: StorageConfig {
                data_dir,
                store_file: PathBuf::from("index.jsonl.gz"),
                auto_save: true,
            },
            ollama: OllamaConfig {
                base_url: "http://localhost:11434".to_string(),
                embedding_model: "nomic-embed-text".to_string(),
                chat_model: "llama3.1".to_string(),
                hints_model: String::new(),
            },
            ingest: IngestConfig::default(),
            watch: WatchConfig::default(),
            compaction: CompactionConfig::default(),
            retrieval: RetrievalConfig::default(),
            load: LoadConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("60s"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("42"), Some(Duration::from_secs(42)));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("10d"), None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.retrieval.top_k = 9;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retrieval.top_k, 9);
        assert_eq!(loaded.compaction.schedule, "0 0 3 * * *");
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[_meta]
schema_version = "1.0.0"

[library]
root = "/srv/docs"
extensions = "txt,md"

[storage]
data_dir = "/srv/data"
store_file = "index.jsonl"
auto_save = false

[ollama]
base_url = "http://127.0.0.1:11434"
embedding_model = "nomic-embed-text"
chat_model = "llama3.1"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.ingest.chunk_size, 800);
        assert_eq!(config.load.batch_size, 200);
        assert_eq!(config.store_path(), PathBuf::from("/srv/data/index.jsonl"));
        assert_eq!(config.hints_model(), "llama3.1");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, LibragError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vec![
            ("LIBRAG_RETRIEVAL__TOP_K".to_string(), "3".to_string()),
            ("LIBRAG_OLLAMA__HINTS_MODEL".to_string(), "qwen2".to_string()),
            ("LIBRAG_WATCH__ENABLED".to_string(), "nope".to_string()),
            ("OTHER_VAR".to_string(), "x".to_string()),
        ]);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.hints_model(), "qwen2");
        // unparseable value is ignored
        assert!(config.watch.enabled);
    }

    #[test]
    fn test_absolute_store_file_wins() {
        let mut config = Config::default();
        config.storage.store_file = PathBuf::from("/var/lib/librag/store.jsonl");
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/librag/store.jsonl"));
    }
}
