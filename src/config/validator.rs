use crate::config::{parse_duration, Config, SCHEMA_VERSION};
use crate::error::{LibragError, Result, ValidationError};
use std::str::FromStr;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every violation at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_paths(config, &mut errors);
        Self::validate_ollama(config, &mut errors);
        Self::validate_ingest(config, &mut errors);
        Self::validate_schedules(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_load(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LibragError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_paths(config: &Config, errors: &mut Vec<ValidationError>) {
        // Existence is not checked: the library root is created on open and
        // the store file appears on first save.
        if config.library.root.as_os_str().is_empty() {
            errors.push(ValidationError::new("library.root", "Library root cannot be empty"));
        }
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new("storage.data_dir", "Data directory cannot be empty"));
        }
        if config.storage.store_file.as_os_str().is_empty() {
            errors.push(ValidationError::new("storage.store_file", "Store file cannot be empty"));
        }
    }

    fn validate_ollama(config: &Config, errors: &mut Vec<ValidationError>) {
        let url = config.ollama.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ValidationError::new(
                "ollama.base_url",
                format!("Base URL must start with http:// or https://, got '{}'", url),
            ));
        }
    }

    fn validate_ingest(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.ingest.chunk_size == 0 {
            errors.push(ValidationError::new(
                "ingest.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }
        if config.ingest.log_every == 0 {
            errors.push(ValidationError::new(
                "ingest.log_every",
                "Log interval must be greater than 0",
            ));
        }
    }

    fn validate_schedules(config: &Config, errors: &mut Vec<ValidationError>) {
        match parse_duration(&config.watch.interval) {
            Some(d) if d.is_zero() => errors.push(ValidationError::new(
                "watch.interval",
                "Interval must be greater than 0",
            )),
            Some(_) => {}
            None => errors.push(ValidationError::new(
                "watch.interval",
                format!("Invalid duration format: {}", config.watch.interval),
            )),
        }

        if let Err(e) = cron::Schedule::from_str(&config.compaction.schedule) {
            errors.push(ValidationError::new(
                "compaction.schedule",
                format!("Invalid cron expression '{}': {}", config.compaction.schedule, e),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let r = &config.retrieval;
        if r.top_k == 0 {
            errors.push(ValidationError::new("retrieval.top_k", "top_k must be greater than 0"));
        }
        if r.max_context_chars == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_context_chars",
                "Context budget must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&r.mmr_lambda) {
            errors.push(ValidationError::new(
                "retrieval.mmr_lambda",
                format!("Lambda must be between 0.0 and 1.0, got {}", r.mmr_lambda),
            ));
        }
    }

    fn validate_load(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.load.batch_size == 0 {
            errors.push(ValidationError::new(
                "load.batch_size",
                "Batch size must be greater than 0",
            ));
        }
        if config.load.log_every == 0 {
            errors.push(ValidationError::new(
                "load.log_every",
                "Log interval must be greater than 0",
            ));
        }
    }
}
