//! Dispatcher and transport configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Environment variables override whatever was loaded:
//!
//! | variable                           | field                          |
//! |------------------------------------|--------------------------------|
//! | `TAGDISPATCH_WORKERS`              | `dispatcher.worker_threads`    |
//! | `TAGDISPATCH_DEFAULT_TAG`          | `dispatcher.default_tag`       |
//! | `TAGDISPATCH_CONNECT_TIMEOUT_SECS` | `transport.connect_timeout_secs` |
//! | `TAGDISPATCH_READ_TIMEOUT_SECS`    | `transport.read_timeout_secs`  |

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::encode::OCTET_STREAM;
use crate::error::ConfigError;
use crate::tag::DEFAULT_TAG;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Upper bound on calls executing at once.
    pub worker_threads: usize,
    /// Tag for descriptors that carry none.
    pub default_tag: String,
    /// Sent with every request unless the descriptor overrides them.
    pub default_headers: BTreeMap<String, String>,
    /// Content type of upload file parts that do not set their own.
    pub upload_content_type: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            worker_threads: 4,
            default_tag: DEFAULT_TAG.to_string(),
            default_headers: BTreeMap::new(),
            upload_content_type: OCTET_STREAM.to_string(),
        }
    }
}

/// Timeouts handed to the default transport. The dispatcher itself has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            connect_timeout_secs: Some(30),
            read_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    pub transport: TransportConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = parse_var::<usize, _>(&lookup, "TAGDISPATCH_WORKERS")? {
            if workers == 0 {
                return Err(ConfigError::Env {
                    var: "TAGDISPATCH_WORKERS",
                    value: "0".to_string(),
                });
            }
            self.dispatcher.worker_threads = workers;
        }
        if let Some(tag) = lookup("TAGDISPATCH_DEFAULT_TAG") {
            self.dispatcher.default_tag = tag;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "TAGDISPATCH_CONNECT_TIMEOUT_SECS")? {
            self.transport.connect_timeout_secs = Some(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "TAGDISPATCH_READ_TIMEOUT_SECS")? {
            self.transport.read_timeout_secs = Some(secs);
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_object_gives_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.dispatcher.default_tag, "net");
        assert_eq!(config.transport.connect_timeout_secs, Some(30));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = Config::from_json_str(
            r#"{"dispatcher":{"worker_threads":2,"default_headers":{"Authorization":"Client-ID x"}}}"#,
        )
        .unwrap();
        assert_eq!(config.dispatcher.worker_threads, 2);
        assert_eq!(config.dispatcher.default_headers["Authorization"], "Client-ID x");
        assert_eq!(config.dispatcher.upload_content_type, "application/octet-stream");
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = Config::from_json_str("{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_vars(vars(&[
                ("TAGDISPATCH_WORKERS", "8"),
                ("TAGDISPATCH_DEFAULT_TAG", "bg"),
                ("TAGDISPATCH_READ_TIMEOUT_SECS", " 15 "),
            ]))
            .unwrap();
        assert_eq!(config.dispatcher.worker_threads, 8);
        assert_eq!(config.dispatcher.default_tag, "bg");
        assert_eq!(config.transport.read_timeout_secs, Some(15));
        assert_eq!(config.transport.connect_timeout_secs, Some(30));
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_vars(vars(&[("TAGDISPATCH_CONNECT_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env {
                var: "TAGDISPATCH_CONNECT_TIMEOUT_SECS",
                ..
            }
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = Config::default();
        assert!(config.apply_vars(vars(&[("TAGDISPATCH_WORKERS", "0")])).is_err());
    }
}
