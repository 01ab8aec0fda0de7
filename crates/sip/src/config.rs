//! Stack configuration.
//!
//! A [`StackConfig`] deserializes from any serde format, every field has a
//! default. Deployments configured through flat `key=value` properties use
//! [`StackConfig::from_properties`] instead:
//!
//! | key                                 | field                    |
//! |-------------------------------------|--------------------------|
//! | `sip.parser.headers_to_parse`       | `headers_to_parse`       |
//! | `sip.parser.strict`                 | `strict`                 |
//! | `sip.parser.read_body`              | `read_body`              |
//! | `sip.parser.report_dropped_headers` | `report_dropped_headers` |
//! | `sip.timer.kind`                    | `timer.kind`             |
//! | `sip.timer.threads`                 | `timer.threads`          |
//! | `sip.timer.tick_ms`                 | `timer.tick_ms`          |
//! | `sip.timer.ticks_per_wheel`         | `timer.ticks_per_wheel`  |

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::codec::header::HeaderPolicy;
use crate::timer::TimerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Comma separated header names to parse eagerly, `None` for the default set
    pub headers_to_parse: Option<String>,
    pub strict: bool,
    pub read_body: bool,
    /// Log headers dropped during ingestion at `warn` instead of `debug`
    pub report_dropped_headers: bool,
    pub timer: TimerConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self { headers_to_parse: None, strict: false, read_body: true, report_dropped_headers: false, timer: TimerConfig::default() }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for property `{key}`: {reason}")]
    InvalidProperty { key: String, value: String, reason: String },
}

impl ConfigError {
    pub fn invalid_property<K: ToString, V: ToString, R: ToString>(key: K, value: V, reason: R) -> Self {
        Self::InvalidProperty { key: key.to_string(), value: value.to_string(), reason: reason.to_string() }
    }
}

impl StackConfig {
    /// Reads the `sip.*` keys of a flat property map, unknown keys are ignored.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(headers) = properties.get("sip.parser.headers_to_parse") {
            config.headers_to_parse = Some(headers.clone());
        }
        read_property(properties, "sip.parser.strict", &mut config.strict)?;
        read_property(properties, "sip.parser.read_body", &mut config.read_body)?;
        read_property(properties, "sip.parser.report_dropped_headers", &mut config.report_dropped_headers)?;
        read_property(properties, "sip.timer.kind", &mut config.timer.kind)?;
        read_property(properties, "sip.timer.threads", &mut config.timer.threads)?;
        read_property(properties, "sip.timer.tick_ms", &mut config.timer.tick_ms)?;
        read_property(properties, "sip.timer.ticks_per_wheel", &mut config.timer.ticks_per_wheel)?;

        Ok(config)
    }

    pub fn header_policy(&self) -> HeaderPolicy {
        HeaderPolicy::from_config(self.headers_to_parse.as_deref())
    }
}

fn read_property<T>(properties: &HashMap<String, String>, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = properties.get(key) {
        *target = value.trim().parse().map_err(|e| ConfigError::invalid_property(key, value, e))?;
    }
    Ok(())
}
