//! Search configuration.
//!
//! # Configuration Locations
//!
//! The configuration can be loaded from multiple locations in order of precedence:
//! 1. Custom config file specified via `--config` flag
//! 2. Local `.textsweep.yaml` in the current directory
//! 3. Global `$HOME/.config/textsweep/config.yaml`
//!
//! # Configuration Format
//!
//! ```yaml
//! # Search pattern (regex unless fixed_strings is set)
//! pattern: "TODO|FIXME"
//! root_path: "."
//! case_sensitive: false
//!
//! file_extensions: ["rs", "toml"]
//! ignore_patterns: ["target/**", ".git/**"]
//!
//! # Content decoding
//! charset: "utf-8"
//! encoding_mode: lossy
//! exclude_binary: true
//!
//! # Engine tuning
//! thread_count: 4
//! buffer_size: 524288
//! buffer_count: 3
//! short_read_threshold: 1000000
//! poll_interval: "100ms"
//! join_timeout: "5s"
//!
//! log_level: "info"
//! ```
//!
//! When using the CLI, command-line arguments take precedence over config file
//! values; see [`SearchConfig::merge_with_cli`].
use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::errors::{SearchError, SearchResult};

/// How to handle byte sequences the declared charset cannot decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Fail the file with a decode error
    #[default]
    FailFast,
    /// Substitute U+FFFD and keep scanning
    Lossy,
}

impl EncodingMode {
    /// Parses the CLI spelling (`failfast` | `lossy`)
    pub fn parse(value: &str) -> SearchResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "failfast" | "fail-fast" | "strict" => Ok(EncodingMode::FailFast),
            "lossy" => Ok(EncodingMode::Lossy),
            other => Err(SearchError::config_error(format!(
                "Unknown encoding mode '{}', expected failfast or lossy",
                other
            ))),
        }
    }
}

/// Configuration for a search run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// The search pattern; empty reports every file in scope without scanning
    #[serde(default)]
    pub pattern: String,

    /// Treat the pattern as literal text instead of a regular expression
    #[serde(default)]
    pub fixed_strings: bool,

    /// Match case exactly
    #[serde(default = "default_true")]
    pub case_sensitive: bool,

    /// Only match whole words
    #[serde(default)]
    pub whole_word: bool,

    /// Root directory to start search from
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,

    /// Optional list of file extensions to include (e.g., ["rs", "toml"])
    /// If None, all file extensions are included
    #[serde(default)]
    pub file_extensions: Option<Vec<String>>,

    /// Patterns to ignore (supports glob syntax)
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Charset label used to decode files found on disk
    #[serde(default = "default_charset")]
    pub charset: String,

    /// How to handle undecodable input
    #[serde(default)]
    pub encoding_mode: EncodingMode,

    /// Skip files whose content looks binary
    #[serde(default = "default_true")]
    pub exclude_binary: bool,

    /// Whether to only show statistics instead of individual matches
    #[serde(default)]
    pub stats_only: bool,

    /// Number of threads to use for searching
    /// Defaults to number of CPU cores if not specified
    #[serde(default = "default_thread_count")]
    pub thread_count: NonZeroUsize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Characters per buffer in the large-file view
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Number of buffers the large-file view may hold at once
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    /// Files whose byte stream ends within this many bytes are read in one go
    #[serde(default = "default_short_read_threshold")]
    pub short_read_threshold: u64,

    /// Stop collecting matches in a file after this many
    #[serde(default)]
    pub max_matches_per_file: Option<usize>,

    /// How often the coordinator polls for progress and cancellation
    #[serde(default = "default_poll_interval", with = "duration_str")]
    pub poll_interval: Duration,

    /// Upper bound on waiting for workers once the search winds down
    #[serde(default = "default_join_timeout", with = "duration_str")]
    pub join_timeout: Duration,

    /// Compiled size limit for the regex, in bytes
    #[serde(default = "default_regex_size_limit")]
    pub regex_size_limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_root_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_charset() -> String {
    "utf-8".to_string()
}

fn default_thread_count() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_log_level() -> String {
    "warn".to_string()
}

pub(crate) fn default_buffer_size() -> usize {
    512 * 1024
}

pub(crate) fn default_buffer_count() -> usize {
    3
}

pub(crate) fn default_short_read_threshold() -> u64 {
    1_000_000
}

pub(crate) fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

pub(crate) fn default_join_timeout() -> Duration {
    Duration::from_secs(5)
}

pub(crate) fn default_regex_size_limit() -> usize {
    10 * (1 << 20)
}

/// Human-readable durations ("100ms", "5s") via humantime
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            fixed_strings: false,
            case_sensitive: true,
            whole_word: false,
            root_path: default_root_path(),
            file_extensions: None,
            ignore_patterns: Vec::new(),
            charset: default_charset(),
            encoding_mode: EncodingMode::default(),
            exclude_binary: true,
            stats_only: false,
            thread_count: default_thread_count(),
            log_level: default_log_level(),
            buffer_size: default_buffer_size(),
            buffer_count: default_buffer_count(),
            short_read_threshold: default_short_read_threshold(),
            max_matches_per_file: None,
            poll_interval: default_poll_interval(),
            join_timeout: default_join_timeout(),
            regex_size_limit: default_regex_size_limit(),
        }
    }
}

impl SearchConfig {
    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration from a specific file
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // Default config locations
        let config_files = [
            // Global config
            dirs::config_dir().map(|p| p.join("textsweep/config.yaml")),
            // Local config
            Some(PathBuf::from(".textsweep.yaml")),
        ];

        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit file must exist
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder.build()?.try_deserialize()
    }

    /// Writes this configuration as YAML
    pub fn save_to(&self, path: &Path) -> SearchResult<()> {
        let yaml = serde_yaml::to_string(self).map_err(|e| {
            SearchError::config_error(format!("Failed to serialize configuration to YAML: {}", e))
        })?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Checks the engine tuning values before a run
    pub fn validate(&self) -> SearchResult<()> {
        if self.buffer_size == 0 {
            return Err(SearchError::config_error("buffer_size must be at least 1"));
        }
        if self.buffer_count < 2 {
            return Err(SearchError::config_error("buffer_count must be at least 2"));
        }
        if self.poll_interval.is_zero() {
            return Err(SearchError::config_error("poll_interval must be non-zero"));
        }
        if encoding_rs::Encoding::for_label(self.charset.as_bytes()).is_none() {
            return Err(SearchError::config_error(format!(
                "Unknown charset '{}'",
                self.charset
            )));
        }
        Ok(())
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli_config: SearchConfig) -> Self {
        // CLI values take precedence over config file values
        if !cli_config.pattern.is_empty() {
            self.pattern = cli_config.pattern;
        }
        if cli_config.fixed_strings {
            self.fixed_strings = true;
        }
        if !cli_config.case_sensitive {
            self.case_sensitive = false;
        }
        if cli_config.whole_word {
            self.whole_word = true;
        }
        if cli_config.root_path != default_root_path() {
            self.root_path = cli_config.root_path;
        }
        if cli_config.file_extensions.is_some() {
            self.file_extensions = cli_config.file_extensions;
        }
        if !cli_config.ignore_patterns.is_empty() {
            self.ignore_patterns = cli_config.ignore_patterns;
        }
        if cli_config.charset != default_charset() {
            self.charset = cli_config.charset;
        }
        if cli_config.encoding_mode != EncodingMode::default() {
            self.encoding_mode = cli_config.encoding_mode;
        }
        if !cli_config.exclude_binary {
            self.exclude_binary = false;
        }
        if cli_config.stats_only {
            self.stats_only = true;
        }
        if cli_config.max_matches_per_file.is_some() {
            self.max_matches_per_file = cli_config.max_matches_per_file;
        }
        // Always use CLI thread count if specified
        self.thread_count = cli_config.thread_count;
        if cli_config.log_level != default_log_level() {
            self.log_level = cli_config.log_level;
        }
        self
    }

    /// Installs a global fmt subscriber filtered at `log_level`.
    ///
    /// Returns false when a subscriber was already installed.
    pub fn init_logging(&self) -> bool {
        let filter = EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok()
    }
}
