//! Runtime configuration: an optional TOML file plus `LAO_TUTOR_*` overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use tutor_core::correction::CorrectionConfig;
use tutor_core::progression::ProgressionConfig;
use tutor_core::scheduler::SchedulerConfig;

use crate::error::ConfigError;

pub const ENV_PREFIX: &str = "LAO_TUTOR_";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://lao_tutor.sqlite3";

/// Knobs of the turn loop itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Extra attempts after a version conflict before the turn fails.
    pub max_conflict_retries: u32,
    /// Upper bound on due cards fetched per turn.
    pub due_limit: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            due_limit: 20,
        }
    }
}

impl TurnConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::Turn` if `due_limit` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.due_limit == 0 {
            return Err(ConfigError::Turn("due_limit must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    pub database_url: String,
    pub log_level: String,
    pub scheduler: SchedulerConfig,
    pub progression: ProgressionConfig,
    pub correction: CorrectionConfig,
    pub turn: TurnConfig,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            log_level: "info".to_owned(),
            scheduler: SchedulerConfig::default(),
            progression: ProgressionConfig::default(),
            correction: CorrectionConfig::default(),
            turn: TurnConfig::default(),
        }
    }
}

impl TutorConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML or a validation error.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read, or any parse or
    /// validation error.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Resolve the effective configuration from the process environment.
    ///
    /// `explicit_path` wins over `LAO_TUTOR_CONFIG`; without either, defaults
    /// are used. Env overrides are applied last.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or an override is invalid.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(explicit_path, |key| std::env::var(key).ok())
    }

    /// [`TutorConfig::load`] with an injectable environment lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or an override is invalid.
    pub fn load_with(
        explicit_path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env_path = env(&format!("{ENV_PREFIX}CONFIG"));
        let mut config = match explicit_path.map(Path::to_path_buf).or(env_path.map(Into::into)) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = env(&format!("{ENV_PREFIX}DATABASE_URL")) {
            if url.trim().is_empty() {
                return Err(ConfigError::Env {
                    key: "LAO_TUTOR_DATABASE_URL",
                    raw: url,
                });
            }
            self.database_url = url;
        }
        if let Some(level) = env(&format!("{ENV_PREFIX}LOG_LEVEL")) {
            self.log_level = level;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the first section that fails validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.progression.validate()?;
        self.correction.validate()?;
        self.turn.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn partial_documents_keep_defaults() {
        let config = TutorConfig::from_toml_str(
            r#"
            database_url = "sqlite::memory:"

            [progression]
            window = 4

            [turn]
            max_conflict_retries = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.progression.window, 4);
        assert_eq!(config.progression, ProgressionConfig {
            window: 4,
            ..ProgressionConfig::default()
        });
        assert_eq!(config.turn.max_conflict_retries, 1);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn invalid_sections_are_rejected() {
        let err = TutorConfig::from_toml_str("[correction]\npass_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Correction(_)));

        let err = TutorConfig::from_toml_str("[turn]\ndue_limit = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Turn(_)));

        assert!(matches!(
            TutorConfig::from_toml_str("window = [").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn env_overrides_apply_last() {
        let config = TutorConfig::load_with(
            None,
            env(&[
                ("LAO_TUTOR_DATABASE_URL", "sqlite://elsewhere.db"),
                ("LAO_TUTOR_LOG_LEVEL", "debug"),
            ]),
        )
        .unwrap();
        assert_eq!(config.database_url, "sqlite://elsewhere.db");
        assert_eq!(config.log_level, "debug");

        let err = TutorConfig::load_with(None, env(&[("LAO_TUTOR_DATABASE_URL", " ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = TutorConfig::load_with(
            None,
            env(&[("LAO_TUTOR_CONFIG", "/definitely/not/here.toml")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
