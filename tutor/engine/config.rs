use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared_logging::LogLevel;

use crate::trainer::DEFAULT_TOTAL_ITERATIONS;

/// Largest iteration budget accepted from configuration or the command line.
pub const MAX_TOTAL_ITERATIONS: usize = 10_000;
/// Delay between training ticks when none is configured.
pub const DEFAULT_TICK_DELAY_MS: u64 = 100;
/// Upper bound on the tick delay.
pub const MAX_TICK_DELAY_MS: u64 = 10_000;

/// Run settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingSettings {
    /// Iteration budget.
    pub total_iterations: usize,
    /// Milliseconds between ticks.
    pub tick_delay_ms: u64,
    /// Seed for weight initialization; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            total_iterations: DEFAULT_TOTAL_ITERATIONS,
            tick_delay_ms: DEFAULT_TICK_DELAY_MS,
            seed: None,
        }
    }
}

impl TrainingSettings {
    /// Tick delay as a duration.
    #[must_use]
    pub const fn tick_delay(&self) -> Duration {
        Duration::from_millis(self.tick_delay_ms)
    }
}

/// Where the samples come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetSettings {
    /// CSV file with a `studyHours,attendance,passed` header.
    pub path: Option<PathBuf>,
}

/// Logging and event sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// JSON-lines log file.
    pub log_path: Option<PathBuf>,
    /// JSON-lines event file.
    pub event_log: Option<PathBuf>,
    /// Minimum severity written to the log.
    pub min_level: LogLevel,
}

/// Complete configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TutorConfig {
    /// `[training]` table.
    pub training: TrainingSettings,
    /// `[dataset]` table.
    pub dataset: DatasetSettings,
    /// `[logging]` table.
    pub logging: LoggingSettings,
}

/// Values supplied on the command line; `Some` wins over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Iteration budget.
    pub total_iterations: Option<usize>,
    /// Tick delay in milliseconds.
    pub tick_delay_ms: Option<u64>,
    /// Initialization seed.
    pub seed: Option<u64>,
    /// Dataset file.
    pub dataset: Option<PathBuf>,
    /// Log file.
    pub log_path: Option<PathBuf>,
    /// Event file.
    pub event_log: Option<PathBuf>,
    /// Minimum log level.
    pub min_level: Option<LogLevel>,
}

impl TutorConfig {
    /// Loads and validates a TOML file. Relative paths are resolved against
    /// the file's directory.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid TOML, or holds
    /// out-of-range values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config = Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_relative(&base);
        Ok(config)
    }

    /// Parses and validates TOML text without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Fails on invalid TOML, unknown keys, or out-of-range values.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Fails when `total_iterations` is outside `1..=10000` or the tick delay
    /// exceeds [`MAX_TICK_DELAY_MS`].
    pub fn validate(&self) -> Result<()> {
        let total = self.training.total_iterations;
        if !(1..=MAX_TOTAL_ITERATIONS).contains(&total) {
            bail!("training.total_iterations must be within 1..={MAX_TOTAL_ITERATIONS}, got {total}");
        }
        if self.training.tick_delay_ms > MAX_TICK_DELAY_MS {
            bail!(
                "training.tick_delay_ms must be at most {MAX_TICK_DELAY_MS}, got {}",
                self.training.tick_delay_ms
            );
        }
        Ok(())
    }

    /// Applies command-line values over the file and re-validates.
    ///
    /// # Errors
    ///
    /// Same as [`TutorConfig::validate`] on the merged values.
    pub fn merge_overrides(mut self, overrides: ConfigOverrides) -> Result<Self> {
        if let Some(total) = overrides.total_iterations {
            self.training.total_iterations = total;
        }
        if let Some(delay) = overrides.tick_delay_ms {
            self.training.tick_delay_ms = delay;
        }
        self.training.seed = overrides.seed.or(self.training.seed);
        self.dataset.path = overrides.dataset.or(self.dataset.path);
        self.logging.log_path = overrides.log_path.or(self.logging.log_path);
        self.logging.event_log = overrides.event_log.or(self.logging.event_log);
        if let Some(level) = overrides.min_level {
            self.logging.min_level = level;
        }
        self.validate()?;
        Ok(self)
    }

    fn resolve_relative(&mut self, base: &Path) {
        for path in [
            &mut self.dataset.path,
            &mut self.logging.log_path,
            &mut self.logging.event_log,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_uses_defaults() {
        let config = TutorConfig::parse("").unwrap();
        assert_eq!(config.training.total_iterations, DEFAULT_TOTAL_ITERATIONS);
        assert_eq!(config.training.tick_delay(), Duration::from_millis(100));
        assert_eq!(config.logging.min_level, LogLevel::Info);
        assert!(config.dataset.path.is_none());
    }

    #[test]
    fn parses_every_table() {
        let config = TutorConfig::parse(
            r#"
            [training]
            total_iterations = 25
            tick_delay_ms = 0
            seed = 42

            [dataset]
            path = "/data/students.csv"

            [logging]
            min_level = "DEBUG"
            "#,
        )
        .unwrap();
        assert_eq!(config.training.total_iterations, 25);
        assert_eq!(config.training.seed, Some(42));
        assert_eq!(config.logging.min_level, LogLevel::Debug);
        assert_eq!(
            config.dataset.path.as_deref(),
            Some(Path::new("/data/students.csv"))
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(TutorConfig::parse("[training]\ntotal_iterations = 0\n").is_err());
        assert!(TutorConfig::parse("[training]\ntotal_iterations = 10001\n").is_err());
        assert!(TutorConfig::parse("[training]\ntick_delay_ms = 60000\n").is_err());
        assert!(TutorConfig::parse("[training]\nlearning_rate = 0.5\n").is_err());
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tutor.toml");
        fs::write(
            &path,
            "[dataset]\npath = \"data/students.csv\"\n[logging]\nlog_path = \"/var/log/tutor.log\"\n",
        )
        .unwrap();
        let config = TutorConfig::load(&path).unwrap();
        assert_eq!(
            config.dataset.path.unwrap(),
            dir.path().join("data/students.csv")
        );
        assert_eq!(
            config.logging.log_path.unwrap(),
            PathBuf::from("/var/log/tutor.log")
        );
    }

    #[test]
    fn overrides_win_and_are_validated() {
        let base = TutorConfig::parse("[training]\nseed = 1\ntotal_iterations = 50\n").unwrap();
        let merged = base
            .clone()
            .merge_overrides(ConfigOverrides {
                total_iterations: Some(300),
                seed: None,
                min_level: Some(LogLevel::Warn),
                ..ConfigOverrides::default()
            })
            .unwrap();
        assert_eq!(merged.training.total_iterations, 300);
        assert_eq!(merged.training.seed, Some(1));
        assert_eq!(merged.logging.min_level, LogLevel::Warn);

        let err = base.merge_overrides(ConfigOverrides {
            total_iterations: Some(0),
            ..ConfigOverrides::default()
        });
        assert!(err.is_err());
    }
}
