//! Plug-in configuration materialisation.
//!
//! A plug-in's configuration is a plain serde struct marked with
//! `#[derive(PlugInConfiguration)]`. The host stores the user's settings as
//! raw JSON; at construction time the struct's `Default` value is serialised,
//! the stored JSON is merged over it and the result deserialised back. Keys
//! absent from the stored JSON therefore keep their default value.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BuildError, BuildResult};

/// A type usable as a plug-in's configuration.
///
/// Implement it with `#[derive(PlugInConfiguration)]`.
pub trait PlugInConfiguration:
    Serialize + DeserializeOwned + Default + Send + Sync + 'static
{
    /// Display name of the configuration type.
    const TYPE_NAME: &'static str;

    /// `false` only for [`NoConfiguration`].
    const DECLARED: bool = true;

    /// Produces the configuration value for a new plug-in object.
    ///
    /// `None`, an empty string or whitespace yields `Self::default()`.
    /// Otherwise the stored JSON is overlaid on the default value.
    fn materialize(raw: Option<&str>) -> BuildResult<Self> {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(Self::default()),
        };

        let stored: Value = serde_json::from_str(raw)
            .map_err(|e| BuildError::invalid_configuration(Self::TYPE_NAME, e.to_string()))?;
        let mut merged = serde_json::to_value(Self::default())
            .map_err(|e| BuildError::invalid_configuration(Self::TYPE_NAME, e.to_string()))?;
        overlay(&mut merged, stored);

        serde_json::from_value(merged)
            .map_err(|e| BuildError::invalid_configuration(Self::TYPE_NAME, e.to_string()))
    }
}

/// Marker configuration for plug-ins that take none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoConfiguration;

impl PlugInConfiguration for NoConfiguration {
    const TYPE_NAME: &'static str = "NoConfiguration";
    const DECLARED: bool = false;

    fn materialize(_raw: Option<&str>) -> BuildResult<Self> {
        Ok(Self)
    }
}

/// Merges `patch` into `target`.
///
/// Objects are merged key by key, recursively. Any other value in `patch`
/// replaces the value in `target`.
pub fn overlay(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Polling {
        interval_ms: u64,
        retries: u32,
        endpoint: Endpoint,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Endpoint {
        host: String,
        port: u16,
    }

    impl Default for Polling {
        fn default() -> Self {
            Self {
                interval_ms: 1000,
                retries: 3,
                endpoint: Endpoint {
                    host: "localhost".into(),
                    port: 502,
                },
            }
        }
    }

    impl PlugInConfiguration for Polling {
        const TYPE_NAME: &'static str = "Polling";
    }

    #[test]
    fn test_missing_json_yields_default() {
        assert_eq!(Polling::materialize(None).unwrap(), Polling::default());
        assert_eq!(Polling::materialize(Some("  ")).unwrap(), Polling::default());
    }

    #[test]
    fn test_stored_json_overlays_default() {
        let config =
            Polling::materialize(Some(r#"{"retries": 7, "endpoint": {"port": 1502}}"#)).unwrap();

        assert_eq!(config.interval_ms, 1000);
        assert_eq!(config.retries, 7);
        assert_eq!(config.endpoint.host, "localhost");
        assert_eq!(config.endpoint.port, 1502);
    }

    #[test]
    fn test_malformed_json_is_invalid_configuration() {
        let err = Polling::materialize(Some("{not json")).unwrap_err();
        assert!(matches!(
            err,
            BuildError::InvalidConfiguration { ref type_name, .. } if type_name == "Polling"
        ));
    }

    #[test]
    fn test_wrong_shape_is_invalid_configuration() {
        let err = Polling::materialize(Some(r#"{"retries": "many"}"#)).unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_no_configuration_ignores_json() {
        assert_eq!(
            NoConfiguration::materialize(Some(r#"{"a": 1}"#)).unwrap(),
            NoConfiguration
        );
    }

    #[test]
    fn test_overlay_replaces_non_objects() {
        let mut target = json!({"a": [1, 2], "b": {"c": 1}});
        overlay(&mut target, json!({"a": [3], "b": 5}));
        assert_eq!(target, json!({"a": [3], "b": 5}));
    }
}
