//! Store configuration.
//!
//! Defaults suit most applications; [`StoreConfig::from_env`] overrides them
//! from `RECORD_CACHE_*` variables, and the struct deserializes from any serde
//! format with missing fields defaulted.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

pub const ENV_BUFFER_SIZE: &str = "RECORD_CACHE_BUFFER_SIZE";
pub const ENV_PAGE_SIZE: &str = "RECORD_CACHE_PAGE_SIZE";
pub const ENV_CHANGE_BUFFER: &str = "RECORD_CACHE_CHANGE_BUFFER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of the store actor's mailbox.
    pub buffer_size: usize,
    /// Page size sent with paged fetches when the adapter has none configured.
    pub default_page_size: u32,
    /// Capacity of each record array's change channel. Slow subscribers that
    /// fall further behind than this see a lag error.
    pub change_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            buffer_size: 32,
            default_page_size: 25,
            change_buffer: 64,
        }
    }
}

impl StoreConfig {
    /// Defaults, overridden by any `RECORD_CACHE_*` variable that parses.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            buffer_size: parse_or(&lookup, ENV_BUFFER_SIZE, defaults.buffer_size),
            default_page_size: parse_or(&lookup, ENV_PAGE_SIZE, defaults.default_page_size),
            change_buffer: parse_or(&lookup, ENV_CHANGE_BUFFER, defaults.change_buffer),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_default_page_size(mut self, page_size: u32) -> Self {
        self.default_page_size = page_size;
        self
    }

    pub fn with_change_buffer(mut self, change_buffer: usize) -> Self {
        self.change_buffer = change_buffer;
        self
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            warn!(key, value = %raw, "Ignoring invalid setting");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_and_rejects_garbage() {
        let vars: HashMap<&str, &str> = [(ENV_PAGE_SIZE, "10"), (ENV_BUFFER_SIZE, "lots"), (ENV_CHANGE_BUFFER, "0")]
            .into_iter()
            .collect();
        let config = StoreConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.default_page_size, 10);
        assert_eq!(config.buffer_size, 32);
        assert_eq!(config.change_buffer, 64);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{ "default_page_size": 5 }"#).unwrap();
        assert_eq!(config, StoreConfig::default().with_default_page_size(5));
    }
}
