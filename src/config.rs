//! Reporter configuration file support
//!
//! Handles parsing of `agol-reporter.toml` configuration files and
//! environment variable overrides. Credentials are best kept out of the
//! file and supplied through `AGOL_REPORTER_PASSWORD`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::report::RateCard;
use crate::report::enrich::{DEFAULT_CREDITS_PER_MB, DEFAULT_DOLLARS_PER_CREDIT};
use crate::report::usage::ReportSink;
use crate::report::writer::{
    DEFAULT_LOG_BACKUP_COUNT, DEFAULT_LOG_DELIMITER, DEFAULT_LOG_MAX_BYTES,
};
use crate::retry::{DEFAULT_INITIAL_DELAY_SECS, DEFAULT_MAX_RETRIES, RetryPolicy};

/// Default configuration filename
pub const CONFIG_FILENAME: &str = "agol-reporter.toml";

/// Environment variable for the organization URL
pub const ENV_ORG: &str = "AGOL_REPORTER_ORG";

/// Environment variable for the reporting user
pub const ENV_USERNAME: &str = "AGOL_REPORTER_USERNAME";

/// Environment variable for the reporting user's password
pub const ENV_PASSWORD: &str = "AGOL_REPORTER_PASSWORD";

/// Environment variable for the report directory
pub const ENV_REPORT_DIR: &str = "AGOL_REPORTER_REPORT_DIR";

/// Error type for configuration handling
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Missing configuration value: {0}")]
    Missing(String),
}

/// Result type for configuration handling
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Organization section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationSection {
    /// Organization URL, e.g. `https://utah.maps.arcgis.com`
    #[serde(default)]
    pub url: String,

    /// Reporting user; their folders are reported on
    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

/// Metatable locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetatablesSection {
    /// Canonical SGID metatable: layer URL or feature set JSON export
    #[serde(default)]
    pub sgid: String,

    /// Shelved/AGOL metatable: layer URL or feature set JSON export
    #[serde(default)]
    pub shelved: String,
}

/// Where a metatable is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetatableLocation {
    /// Hosted table or layer URL
    Url(String),
    /// Feature set JSON file
    File(PathBuf),
}

impl MetatableLocation {
    pub fn parse(location: &str) -> Self {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            MetatableLocation::Url(location.to_string())
        } else {
            MetatableLocation::File(PathBuf::from(location))
        }
    }
}

/// Storage rate card section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesSection {
    #[serde(default = "default_credits_per_mb")]
    pub credits_per_mb: f64,

    #[serde(default = "default_dollars_per_credit")]
    pub dollars_per_credit: f64,
}

fn default_credits_per_mb() -> f64 {
    DEFAULT_CREDITS_PER_MB
}

fn default_dollars_per_credit() -> f64 {
    DEFAULT_DOLLARS_PER_CREDIT
}

impl Default for RatesSection {
    fn default() -> Self {
        Self {
            credits_per_mb: default_credits_per_mb(),
            dollars_per_credit: default_dollars_per_credit(),
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One CSV file per run (default)
    #[default]
    Csv,
    /// Appended, rotating log file
    Log,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "log" => Ok(OutputFormat::Log),
            _ => Err(format!("Unknown output format: {}. Use 'csv' or 'log'.", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Log => write!(f, "log"),
        }
    }
}

/// Output section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Directory reports are written under
    #[serde(default)]
    pub report_dir: String,

    #[serde(default)]
    pub format: OutputFormat,

    /// Field delimiter for the log format
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Log size that triggers a rollover; 0 disables rotation
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Rotated log files to keep
    #[serde(default = "default_backup_count")]
    pub backup_count: u32,
}

fn default_delimiter() -> String {
    DEFAULT_LOG_DELIMITER.to_string()
}

fn default_max_bytes() -> u64 {
    DEFAULT_LOG_MAX_BYTES
}

fn default_backup_count() -> u32 {
    DEFAULT_LOG_BACKUP_COUNT
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            report_dir: String::new(),
            format: OutputFormat::default(),
            delimiter: default_delimiter(),
            max_bytes: default_max_bytes(),
            backup_count: default_backup_count(),
        }
    }
}

/// Retry section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,

    /// Log each retry at warn level
    #[serde(default)]
    pub verbose: bool,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_delay_secs() -> f64 {
    DEFAULT_INITIAL_DELAY_SECS
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_secs: default_initial_delay_secs(),
            verbose: false,
        }
    }
}

/// Main configuration structure
///
/// Represents the `agol-reporter.toml` configuration file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReporterConfig {
    #[serde(default)]
    pub organization: OrganizationSection,

    #[serde(default)]
    pub metatables: MetatablesSection,

    #[serde(default)]
    pub rates: RatesSection,

    #[serde(default)]
    pub output: OutputSection,

    #[serde(default)]
    pub retry: RetrySection,
}

impl ReporterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `path`, then apply environment overrides.
    ///
    /// A missing file yields the defaults, so a run can be configured
    /// entirely from the environment.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_ORG) {
            self.organization.url = url;
        }

        if let Ok(username) = std::env::var(ENV_USERNAME) {
            self.organization.username = username;
        }

        if let Ok(password) = std::env::var(ENV_PASSWORD) {
            self.organization.password = password;
        }

        if let Ok(dir) = std::env::var(ENV_REPORT_DIR) {
            self.output.report_dir = dir;
        }
    }

    /// Check that everything a run needs is present
    pub fn validate(&self) -> ConfigResult<()> {
        let required = [
            ("organization.url", &self.organization.url),
            ("organization.username", &self.organization.username),
            ("organization.password", &self.organization.password),
            ("metatables.sgid", &self.metatables.sgid),
            ("metatables.shelved", &self.metatables.shelved),
            ("output.report_dir", &self.output.report_dir),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing.join(", ")))
        }
    }

    pub fn sgid_metatable(&self) -> MetatableLocation {
        MetatableLocation::parse(&self.metatables.sgid)
    }

    pub fn shelved_metatable(&self) -> MetatableLocation {
        MetatableLocation::parse(&self.metatables.shelved)
    }

    pub fn rate_card(&self) -> RateCard {
        RateCard {
            credits_per_mb: self.rates.credits_per_mb,
            dollars_per_credit: self.rates.dollars_per_credit,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_retries, self.retry.initial_delay_secs)
            .with_verbose(self.retry.verbose)
    }

    pub fn report_sink(&self) -> ReportSink {
        match self.output.format {
            OutputFormat::Csv => ReportSink::Csv,
            OutputFormat::Log => ReportSink::RotatingLog {
                delimiter: self.output.delimiter.clone(),
                max_bytes: self.output.max_bytes,
                backup_count: self.output.backup_count,
            },
        }
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# AGOL reporter configuration

[organization]
# Organization URL
url = "https://utah.maps.arcgis.com"
# Reporting user; every folder of this user is reported on
username = ""
# Prefer the AGOL_REPORTER_PASSWORD environment variable
# password = ""

[metatables]
# Canonical SGID metatable (layer URL or feature set JSON export)
sgid = ""
# Shelved/AGOL metatable (layer URL or feature set JSON export)
shelved = ""

[rates]
credits_per_mb = 0.24
dollars_per_credit = 0.1

[output]
# Reports are written to <report_dir>/AGOLUsage
report_dir = ""
# "csv" (one file per run) or "log" (appended, rotating)
format = "csv"
delimiter = "|"
max_bytes = 10485760
backup_count = 10

[retry]
max_retries = 3
initial_delay_secs = 2.0
verbose = false
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ReporterConfig::new();
        assert_eq!(config.rates.credits_per_mb, 0.24);
        assert_eq!(config.rates.dollars_per_credit, 0.1);
        assert_eq!(config.output.format, OutputFormat::Csv);
        assert_eq!(config.output.delimiter, "|");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay_secs, 2.0);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[organization]
url = "https://example.maps.arcgis.com"
username = "reporter"

[metatables]
sgid = "https://services.arcgis.com/abc/arcgis/rest/services/Meta/FeatureServer/0"
shelved = "exports/shelved.json"

[rates]
credits_per_mb = 0.5

[output]
report_dir = "/tmp/reports"
format = "log"
delimiter = ";"
"#;
        let config = ReporterConfig::parse(toml).unwrap();
        assert_eq!(config.organization.username, "reporter");
        assert_eq!(config.rates.credits_per_mb, 0.5);
        assert_eq!(config.rates.dollars_per_credit, 0.1);
        assert_eq!(config.output.format, OutputFormat::Log);
        assert!(matches!(config.sgid_metatable(), MetatableLocation::Url(_)));
        assert_eq!(
            config.shelved_metatable(),
            MetatableLocation::File(PathBuf::from("exports/shelved.json"))
        );
        assert_eq!(
            config.report_sink(),
            ReportSink::RotatingLog {
                delimiter: ";".to_string(),
                max_bytes: DEFAULT_LOG_MAX_BYTES,
                backup_count: DEFAULT_LOG_BACKUP_COUNT,
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_format() {
        let result = ReporterConfig::parse("[output]\nformat = \"xlsx\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_lists_missing_values() {
        let mut config = ReporterConfig::new();
        config.organization.url = "https://example.maps.arcgis.com".to_string();

        match config.validate() {
            Err(ConfigError::Missing(msg)) => {
                assert!(msg.contains("organization.username"));
                assert!(msg.contains("organization.password"));
                assert!(msg.contains("metatables.sgid"));
                assert!(!msg.contains("organization.url"));
            }
            other => panic!("expected missing values, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = ReporterConfig::load(&dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[retry]\nmax_retries = 5\nverbose = true\n").unwrap();

        let config = ReporterConfig::load(&path).unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert!(policy.verbose);
    }

    #[test]
    fn test_password_not_serialized_when_empty() {
        let toml = ReporterConfig::new().to_toml().unwrap();
        assert!(!toml.contains("password"));
        assert!(toml.contains("credits_per_mb"));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("csv".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!("LOG".parse::<OutputFormat>().unwrap(), OutputFormat::Log);
        assert!("xlsx".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_sample_config_is_valid() {
        let sample = sample_config();
        let result = ReporterConfig::parse(sample);
        assert!(result.is_ok(), "Sample config should be valid TOML");
    }
}
