//! Environment configuration.
//!
//! A deployment script hands over one document holding a section per
//! environment plus an optional shared `default` section. [`Config::resolve`]
//! flattens it into the effective configuration for the selected environment.

use serde_json::{Map, Value};

use crate::{shiplog_debug, Error, Result};

/// Section of the document shared by every environment.
pub const SHARED_SECTION: &str = "default";

pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_KEEP_RELEASES: u64 = 5;

/// The effective configuration of a run.
///
/// Keys are kept as-is so deployment scripts can carry arbitrary settings;
/// the accessors cover the keys shipr itself reads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    values: Map<String, Value>,
}

impl Config {
    /// Built-in defaults applied before any section of the document.
    pub fn defaults() -> Self {
        let mut values = Map::new();
        values.insert("branch".to_string(), Value::from(DEFAULT_BRANCH));
        values.insert("keepReleases".to_string(), Value::from(DEFAULT_KEEP_RELEASES));
        values.insert("shallowClone".to_string(), Value::from(false));
        Self { values }
    }

    /// Merge defaults, the shared section and the environment section, in that order.
    ///
    /// The merge is shallow: a key present in a later source replaces the
    /// earlier value wholesale.
    pub fn resolve(document: &Value, environment: &str) -> Result<Self> {
        let sections = document.as_object();
        let selected = sections
            .and_then(|s| s.get(environment))
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::EnvironmentNotFound(environment.to_string()))?;

        let mut config = Self::defaults();
        if let Some(shared) = sections.and_then(|s| s.get(SHARED_SECTION)) {
            config.merge(shared)?;
        }
        // Resolving "default" itself merges the same section twice, which is harmless.
        config.merge(selected)?;

        shiplog_debug!(
            "Config::resolve environment={} keys={:?}",
            environment,
            config.values.keys().collect::<Vec<_>>()
        );
        Ok(config)
    }

    fn merge(&mut self, section: &Value) -> Result<()> {
        match section {
            Value::Object(map) => {
                for (key, value) in map {
                    self.values.insert(key.clone(), value.clone());
                }
                Ok(())
            }
            Value::Null => Ok(()),
            other => Err(Error::Config(format!(
                "environment section must be a table, got {}",
                other
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn branch(&self) -> &str {
        self.get_str("branch").unwrap_or(DEFAULT_BRANCH)
    }

    pub fn keep_releases(&self) -> u64 {
        self.get("keepReleases")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_KEEP_RELEASES)
    }

    pub fn shallow_clone(&self) -> bool {
        self.get("shallowClone")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Remote targets; `servers` may be a single string or a list.
    pub fn servers(&self) -> Result<Vec<String>> {
        match self.get("servers") {
            None | Some(Value::Null) => Err(Error::ServersNotConfigured),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) if items.is_empty() => Err(Error::ServersNotConfigured),
            Some(Value::Array(_)) => self.string_list("servers"),
            Some(other) => Err(Error::Config(format!(
                "servers must be a string or a list, got {}",
                other
            ))),
        }
    }

    /// Exclude patterns for file sync, empty when unset.
    pub fn ignores(&self) -> Result<Vec<String>> {
        self.string_list("ignores")
    }

    /// Extra arguments for the sync tool, empty when unset.
    pub fn rsync(&self) -> Result<Vec<String>> {
        self.string_list("rsync")
    }

    /// Private key used for the remote connections.
    pub fn key(&self) -> Option<&str> {
        self.get_str("key")
    }

    /// Strict host key checking; `None` leaves the ssh default in place.
    pub fn strict(&self) -> Option<bool> {
        self.get("strict").and_then(Value::as_bool)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        Error::Config(format!("{} must only contain strings, got {}", key, item))
                    })
                })
                .collect(),
            Some(other) => Err(Error::Config(format!(
                "{} must be a list of strings, got {}",
                key, other
            ))),
        }
    }
}
