//! Filter configuration.
//!
//! The filter is configured from a flat map of option names to values, the
//! same shape a host pipeline hands each plugin. The map is validated once
//! into a [`GeoIpConfig`]; nothing is looked up dynamically afterwards.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Language used for place names when none is configured.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Event field that receives the enrichment result when none is configured.
pub const DEFAULT_TARGET: &str = "geoip";

/// Option names as they appear in configuration maps.
pub const OPT_SRC: &str = "src";
pub const OPT_DB_PATH: &str = "dbPath";
pub const OPT_LANGUAGE: &str = "language";
pub const OPT_TARGET: &str = "target";

/// Configuration as written by the user, before defaults and validation.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    src: Option<String>,
    #[serde(rename = "dbPath")]
    db_path: Option<Utf8PathBuf>,
    language: Option<String>,
    target: Option<String>,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

/// Validated configuration of a geoip filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeoIpConfig {
    src: String,
    #[serde(rename = "dbPath")]
    db_path: Utf8PathBuf,
    language: String,
    target: String,
}

impl GeoIpConfig {
    /// Create a configuration with the default language and target.
    pub fn new(src: impl Into<String>, db_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            src: src.into(),
            db_path: db_path.into(),
            language: DEFAULT_LANGUAGE.to_string(),
            target: DEFAULT_TARGET.to_string(),
        }
    }

    /// Set the language used to pick place names.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the event field that receives the enrichment result.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Build a configuration from an option map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingOption`] when `src` or `dbPath` is absent,
    /// [`Error::InvalidOption`] when an option is empty, and [`Error::Json`]
    /// when an option has the wrong type.
    pub fn from_map(options: &Map<String, Value>) -> Result<Self> {
        Self::from_value(Value::Object(options.clone()))
    }

    /// Build a configuration from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw = RawConfig::deserialize(value)?;
        Self::from_raw(raw)
    }

    /// Build a configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    /// Read and validate a JSON configuration file.
    pub fn from_file(path: &Utf8Path) -> Result<Self> {
        Self::from_map(&read_options(path)?)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        for name in raw.unknown.keys() {
            debug!(option = %name, "ignoring unknown geoip filter option");
        }

        let src = raw.src.ok_or(Error::MissingOption { name: OPT_SRC })?;
        let db_path = raw.db_path.ok_or(Error::MissingOption { name: OPT_DB_PATH })?;

        let mut config = Self::new(src, db_path);
        if let Some(language) = raw.language {
            config.language = language;
        }
        if let Some(target) = raw.target {
            config.target = target;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every option holds a usable value.
    pub fn validate(&self) -> Result<()> {
        let options = [
            (OPT_SRC, self.src.as_str()),
            (OPT_DB_PATH, self.db_path.as_str()),
            (OPT_LANGUAGE, self.language.as_str()),
            (OPT_TARGET, self.target.as_str()),
        ];
        for (name, value) in options {
            if value.trim().is_empty() {
                return Err(Error::InvalidOption {
                    name,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn src(&self) -> &str {
        &self.src
    }

    #[inline]
    pub fn db_path(&self) -> &Utf8Path {
        &self.db_path
    }

    #[inline]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Read a JSON configuration file into a raw option map.
///
/// The map is returned unvalidated so callers can layer overrides on top of
/// it before handing it to [`GeoIpConfig::from_map`].
pub fn read_options(path: &Utf8Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_owned(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}
