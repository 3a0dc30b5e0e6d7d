//! Keyed configuration lookup.
//!
//! The core never parses configuration files, it only asks for already
//! resolved values by key.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{Error, Result};

pub trait Config: Send + Sync {
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Typed accessors for every [`Config`].
pub trait ConfigExt: Config {
    fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get_raw(key) {
            Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| Error::Config {
                key: key.to_owned(),
                message: e.to_string(),
            }),
            None => Ok(None),
        }
    }

    fn get_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.get(key)?.unwrap_or(default))
    }

    fn require<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)?
            .ok_or_else(|| Error::MissingConfig { key: key.to_owned() })
    }

    /// Reads a toggle, accepting `true/false`, `1/0`, `yes/no` and `on/off`.
    fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        let Some(raw) = self.get_raw(key) else {
            return Ok(default);
        };

        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(Error::Config {
                key: key.to_owned(),
                message: format!("`{}` is not a boolean", other),
            }),
        }
    }
}

impl<C: Config + ?Sized> ConfigExt for C {}

/// Reads `<PREFIX>_<SCOPE>_<KEY>` environment variables, e.g. `HOOKWIRE_MONO_ASSEMBLY`.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    prefix: String,
}

impl EnvConfig {
    pub fn new(prefix: &str, scope: &str) -> Self {
        Self {
            prefix: format!("{}_{}_", prefix, scope).to_ascii_uppercase(),
        }
    }

    pub fn variable(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_ascii_uppercase())
    }
}

impl Config for EnvConfig {
    fn get_raw(&self, key: &str) -> Option<String> {
        std::env::var(self.variable(key)).ok()
    }
}

#[derive(Debug, Default, Clone)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_owned(), value.into());
        self
    }
}

impl Config for MapConfig {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
