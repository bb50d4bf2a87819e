//! Configuration management
//!
//! This module handles loading, validation, and management of the Coursive
//! configuration. Configuration is stored in TOML format at
//! ~/.coursive/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, log level
//! - **llm**: Chat-completions endpoint and default model parameters
//! - **scheduler**: Sweep cadence for the waiting queue
//! - **courses**: Catalog file location
//!
//! # Path Expansion
//!
//! The configuration system automatically expands `~` to the user's home
//! directory and creates the data directory if it doesn't exist.

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// This structure represents the complete Coursive configuration loaded from
/// ~/.coursive/config.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// LLM collaborator configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Waiting-queue scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Course catalog configuration
    #[serde(default)]
    pub courses: CoursesConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion); holds the SQLite database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LLM collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the chat-completions API
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Default model name; dialog elements may override per element
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Default sampling temperature for non-reasoning models
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Default reasoning effort for reasoning-capable models
    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// Waiting-queue scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Sweep cadence in the shared duration grammar (e.g. "1m", "30s").
    /// Mixed day + sub-day cadences are rejected at startup and replaced by
    /// the default cadence.
    #[serde(default = "default_check_interval")]
    pub check_interval: String,
}

/// Course catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoursesConfig {
    /// Catalog file mapping course ids to course scripts (supports ~ expansion)
    #[serde(default = "default_catalog_path")]
    pub catalog: PathBuf,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.coursive")
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f64 {
    0.0
}

fn default_reasoning_effort() -> String {
    "low".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_check_interval() -> String {
    "1m".to_string()
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("~/.coursive/courses.yml")
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            reasoning_effort: default_reasoning_effort(),
            timeout_secs: default_llm_timeout(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
        }
    }
}

impl Default for CoursesConfig {
    fn default() -> Self {
        Self {
            catalog: default_catalog_path(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.coursive/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default
    /// configuration. Validates the configuration after loading and returns
    /// descriptive errors if validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.coursive/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".coursive").join("config.toml"))
    }

    /// Create a default configuration
    fn default_config() -> Self {
        Self {
            core: CoreConfig {
                data_dir: default_data_dir(),
                log_level: default_log_level(),
            },
            llm: LlmConfig::default(),
            scheduler: SchedulerConfig::default(),
            courses: CoursesConfig::default(),
        }
    }

    /// Path of the SQLite database inside the data directory
    pub fn db_path(&self) -> PathBuf {
        self.core.data_dir.join("coursive.db")
    }

    /// Validate and process configuration
    ///
    /// Validates the log level, expands `~` in paths, and creates the data
    /// directory if it doesn't exist.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_efforts = ["minimal", "low", "medium", "high"];
        if !valid_efforts.contains(&self.llm.reasoning_effort.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid reasoning effort '{}'. Must be one of: {}",
                self.llm.reasoning_effort,
                valid_efforts.join(", ")
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        self.courses.catalog = expand_path(&self.courses.catalog)?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
