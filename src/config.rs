//! # Server Configuration
//!
//! [`ServerConfig`] is read from YAML, then overlaid with `BRRTS_*`
//! environment variables, so a deployment can tune limits without editing
//! the file. Every field has a default; an empty document is valid.
//!
//! ```yaml
//! address: 0.0.0.0:8080
//! max_header_size: 16384
//! max_body_size: 10485760
//! stack_size: 0x10000
//! keep_alive: true
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `BRRTS_MAX_HEADER_SIZE` | `max_header_size` |
//! | `BRRTS_MAX_BODY_SIZE` | `max_body_size` |
//! | `BRRTS_READ_BUFFER_SIZE` | `read_buffer_size` |
//! | `BRRTS_STACK_SIZE` | `stack_size` (decimal or `0x` hex) |
//! | `BRRTS_KEEP_ALIVE` | `keep_alive` |
//! | `BRRTS_PATTERN_MATCHING` | `pattern_matching` |
//!
//! Stack size affects memory directly: total = `stack_size` × concurrent
//! coroutines. 64 KiB suits most handlers; raise it for deep recursion.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::buffer::{DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY};
use crate::http::{ParserLimits, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADERS, DEFAULT_MAX_HEADER_SIZE};
use crate::router::RouterOptions;

pub const DEFAULT_STACK_SIZE: usize = 0x10000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value `{value}` for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub address: String,
    pub max_header_size: usize,
    pub max_body_size: usize,
    pub max_headers: usize,
    /// Bytes requested from the socket per read.
    pub read_buffer_size: usize,
    /// Pooled buffers kept for chunked bodies.
    pub pool_capacity: usize,
    #[serde(deserialize_with = "size")]
    pub stack_size: usize,
    /// Coroutine worker threads; `None` keeps the runtime default.
    pub workers: Option<usize>,
    pub keep_alive: bool,
    /// Enable parameterised, regex and prefix routes.
    pub pattern_matching: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_headers: DEFAULT_MAX_HEADERS,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            stack_size: DEFAULT_STACK_SIZE,
            workers: None,
            keep_alive: true,
            pattern_matching: true,
        }
    }
}

/// Sizes may be YAML integers or strings in decimal or `0x` hex.
fn size<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(usize),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Int(n) => Ok(n),
        Raw::Str(s) => {
            parse_size(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid size `{s}`")))
        }
    }
}

/// Decimal or `0x`-prefixed hexadecimal.
#[must_use]
pub fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    /// Read `path`, then apply the environment overlay.
    ///
    /// # Errors
    ///
    /// I/O failures, malformed YAML, or an unparsable `BRRTS_*` value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus the environment overlay.
    ///
    /// # Errors
    ///
    /// An unparsable `BRRTS_*` value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Parse YAML without looking at the environment.
    ///
    /// # Errors
    ///
    /// Malformed YAML or unknown fields.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Overlay `BRRTS_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// An unparsable value.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| env::var(name).ok())
    }

    /// Overlay variables from any lookup function.
    ///
    /// # Errors
    ///
    /// An unparsable value.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sizes: [(&'static str, &mut usize); 4] = [
            ("BRRTS_MAX_HEADER_SIZE", &mut self.max_header_size),
            ("BRRTS_MAX_BODY_SIZE", &mut self.max_body_size),
            ("BRRTS_READ_BUFFER_SIZE", &mut self.read_buffer_size),
            ("BRRTS_STACK_SIZE", &mut self.stack_size),
        ];
        for (var, field) in sizes {
            if let Some(value) = lookup(var) {
                *field = parse_size(&value).ok_or(ConfigError::InvalidEnv { var, value })?;
            }
        }
        let flags: [(&'static str, &mut bool); 2] = [
            ("BRRTS_KEEP_ALIVE", &mut self.keep_alive),
            ("BRRTS_PATTERN_MATCHING", &mut self.pattern_matching),
        ];
        for (var, field) in flags {
            if let Some(value) = lookup(var) {
                *field = parse_bool(&value).ok_or(ConfigError::InvalidEnv { var, value })?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn parser_limits(&self) -> ParserLimits {
        ParserLimits {
            max_header_size: self.max_header_size,
            max_body_size: self.max_body_size,
            max_headers: self.max_headers,
        }
    }

    #[must_use]
    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            pattern_matching: self.pattern_matching,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let c = ServerConfig::from_yaml_str("").unwrap();
        assert_eq!(c.max_header_size, 16 * 1024);
        assert_eq!(c.max_body_size, 10 * 1024 * 1024);
        assert_eq!(c.max_headers, 100);
        assert_eq!(c.read_buffer_size, 8 * 1024);
        assert_eq!(c.pool_capacity, 256);
        assert_eq!(c.stack_size, 64 * 1024);
        assert!(c.keep_alive && c.pattern_matching);
    }

    #[test]
    fn test_yaml_and_hex_stack() {
        let c = ServerConfig::from_yaml_str("stack_size: \"0x8000\"\nkeep_alive: false\nmax_headers: 20\n")
            .unwrap();
        assert_eq!(c.stack_size, 0x8000);
        assert!(!c.keep_alive);
        assert_eq!(c.parser_limits().max_headers, 20);
        assert!(ServerConfig::from_yaml_str("bogus: 1").is_err());
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("BRRTS_STACK_SIZE", "0x4000"),
            ("BRRTS_MAX_BODY_SIZE", "1024"),
            ("BRRTS_PATTERN_MATCHING", "off"),
        ]
        .into_iter()
        .collect();
        let mut c = ServerConfig::default();
        c.apply_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.stack_size, 0x4000);
        assert_eq!(c.max_body_size, 1024);
        assert!(!c.router_options().pattern_matching);

        let err = c
            .apply_vars(|k| (k == "BRRTS_KEEP_ALIVE").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "BRRTS_KEEP_ALIVE", .. }));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("16384"), Some(16384));
        assert_eq!(parse_size("0x4000"), Some(16384));
        assert_eq!(parse_size("lots"), None);
    }
}
