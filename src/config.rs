//! Agent configuration.
//!
//! Values come from `ARGCOV_*` environment variables and from the agent
//! option string (`-agentpath:libargcov.so=output=cov.txt,serializer=truncate(40)`).
//! Options override the environment.
//!
//! | Key | Env | Default |
//! |-----|-----|---------|
//! | `output` | `ARGCOV_OUTPUT` | none, nothing is written |
//! | `input` | `ARGCOV_INPUT` | none |
//! | `serializer` | `ARGCOV_SERIALIZER` | `plain` |
//! | `deserializer` | `ARGCOV_DESERIALIZER` | `plain` |
//! | `mode` | `ARGCOV_MODE` | `coverage` (or `template`) |
//! | `include` | `ARGCOV_INCLUDE` | `all`; rules separated by `;` |
//! | `fields` | `ARGCOV_FIELDS` | `false` |
//! | `log` | `ARGCOV_LOG` | `argcov=info` |

use std::path::PathBuf;

use thiserror::Error;

use crate::collector::CollectorMode;

pub const KEYS: [&str; 8] = ["output", "input", "serializer", "deserializer", "mode", "include", "fields", "log"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown configuration key {0:?}")]
    UnknownKey(String),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("option {0:?} is not key=value")]
    MissingValue(String),
    #[error("unbalanced parentheses in {0:?}")]
    Unbalanced(String),
    #[error("invalid member rule {0:?}")]
    InvalidRule(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub output: Option<PathBuf>,
    pub input: Option<PathBuf>,
    pub serializer: String,
    pub deserializer: String,
    pub mode: CollectorMode,
    pub include: Vec<String>,
    pub fields: bool,
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output: None,
            input: None,
            serializer: "plain".to_string(),
            deserializer: "plain".to_string(),
            mode: CollectorMode::Coverage,
            include: Vec::new(),
            fields: false,
            log: "argcov=info".to_string(),
        }
    }
}

impl Config {
    /// Reads every key through `lookup`; missing keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        for key in KEYS {
            if let Some(value) = lookup(key) {
                config.set(key, &value)?;
            }
        }
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(format!("ARGCOV_{}", key.to_ascii_uppercase())).ok())
    }

    pub fn from_options(options: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_options(options)?;
        Ok(config)
    }

    /// Environment first, then `options` on top.
    pub fn load(options: &str) -> Result<Self, ConfigError> {
        let mut config = Self::from_env()?;
        config.apply_options(options)?;
        Ok(config)
    }

    pub fn apply_options(&mut self, options: &str) -> Result<(), ConfigError> {
        let mut include_seen = false;
        for option in split_top_level(options)? {
            let (key, value) = option.split_once('=').ok_or_else(|| ConfigError::MissingValue(option.to_string()))?;
            let key = key.trim();
            // repeated include= options accumulate, the first one replaces
            if key == "include" && !include_seen {
                self.include.clear();
                include_seen = true;
            }
            self.set(key, value.trim())?;
        }
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() };
        match key {
            "output" => self.output = non_empty(value).map(PathBuf::from),
            "input" => self.input = non_empty(value).map(PathBuf::from),
            "serializer" => self.serializer = non_empty(value).ok_or_else(invalid)?.to_string(),
            "deserializer" => self.deserializer = non_empty(value).ok_or_else(invalid)?.to_string(),
            "mode" => {
                self.mode = match value.to_ascii_lowercase().as_str() {
                    "coverage" => CollectorMode::Coverage,
                    "template" => CollectorMode::Template,
                    _ => return Err(invalid()),
                }
            }
            "include" => {
                self.include.extend(value.split(';').map(str::trim).filter(|r| !r.is_empty()).map(String::from));
            }
            "fields" => {
                self.fields = match value.to_ascii_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => true,
                    "false" | "no" | "off" | "0" => false,
                    _ => return Err(invalid()),
                }
            }
            "log" => self.log = value.to_string(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Splits on commas that are not inside parentheses, so
/// `serializer=truncate(4,x),output=a` gives two options.
fn split_top_level(options: &str) -> Result<Vec<&str>, ConfigError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in options.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1).ok_or_else(|| ConfigError::Unbalanced(options.to_string()))?,
            ',' if depth == 0 => {
                parts.push(&options[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ConfigError::Unbalanced(options.to_string()));
    }
    parts.push(&options[start..]);
    Ok(parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect())
}
