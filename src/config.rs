//! Provider configuration.
//!
//! Exactly one provider is active per process. Its configuration is read once
//! at start-up, either from a JSON file or from `WASTE_*` environment
//! variables, and is not changed afterwards.

use crate::error::{ClassifierError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default bound on a single remote inference request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the different provider types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Random labels from a fixed table, for demos and tests
    Mock {
        /// Seed for reproducible label selection
        #[serde(default)]
        seed: Option<u64>,
        /// Simulated inference latency
        #[serde(default)]
        latency_ms: Option<u64>,
    },
    /// JSON REST inference endpoint
    Rest {
        url: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    /// ONNX model evaluated in-process
    InProcess {
        /// Directory or http(s) base URL holding `model.onnx` and `metadata.json`
        model_location: String,
    },
    /// Named hosted inference space
    Hosted {
        /// Space name in `owner/name` form
        space: String,
        /// Override for the space's base URL
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

impl ProviderConfig {
    /// Read a configuration file such as `{"provider": "rest", "url": "..."}`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Build a configuration from `WASTE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            lookup(key).ok_or_else(|| ClassifierError::Config(format!("{key} is not set")))
        };
        let parse_u64 = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map_err(|e| ClassifierError::Config(format!("{key}: {e}")))
                })
                .transpose()
        };

        let parse_timeout = |key: &str| -> Result<Option<u64>> {
            let timeout_ms = parse_u64(key)?;
            timeout_from(timeout_ms).map_err(|_| {
                ClassifierError::Config(format!("{key} must be greater than zero"))
            })?;
            Ok(timeout_ms)
        };

        let provider = lookup("WASTE_PROVIDER").unwrap_or_else(|| "mock".to_string());
        match provider.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(ProviderConfig::Mock {
                seed: parse_u64("WASTE_MOCK_SEED")?,
                latency_ms: parse_u64("WASTE_MOCK_LATENCY_MS")?,
            }),
            "rest" => Ok(ProviderConfig::Rest {
                url: require("WASTE_REST_URL")?,
                timeout_ms: parse_timeout("WASTE_TIMEOUT_MS")?,
            }),
            "in_process" | "onnx" => Ok(ProviderConfig::InProcess {
                model_location: require("WASTE_MODEL_LOCATION")?,
            }),
            "hosted" => Ok(ProviderConfig::Hosted {
                space: require("WASTE_HOSTED_SPACE")?,
                host: lookup("WASTE_HOSTED_HOST"),
                timeout_ms: parse_timeout("WASTE_TIMEOUT_MS")?,
            }),
            other => Err(ClassifierError::Config(format!("unknown provider '{other}'"))),
        }
    }
}

/// Request timeout for a remote provider. Zero would expire every request.
pub(crate) fn timeout_from(timeout_ms: Option<u64>) -> Result<Duration> {
    match timeout_ms {
        None => Ok(DEFAULT_TIMEOUT),
        Some(0) => Err(ClassifierError::Config(
            "timeout_ms must be greater than zero".to_string(),
        )),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_mock() {
        let config = ProviderConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(
            config,
            ProviderConfig::Mock {
                seed: None,
                latency_ms: None
            }
        );
    }

    #[test]
    fn test_rest_requires_url() {
        let result = ProviderConfig::from_lookup(lookup_from(&[("WASTE_PROVIDER", "rest")]));
        assert!(matches!(result, Err(ClassifierError::Config(msg)) if msg.contains("WASTE_REST_URL")));

        let config = ProviderConfig::from_lookup(lookup_from(&[
            ("WASTE_PROVIDER", "REST"),
            ("WASTE_REST_URL", "http://localhost:7860/run/predict"),
            ("WASTE_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(
            config,
            ProviderConfig::Rest {
                url: "http://localhost:7860/run/predict".to_string(),
                timeout_ms: Some(1500)
            }
        );
    }

    #[test]
    fn test_rejects_bad_numbers_and_unknown_providers() {
        let bad_seed = ProviderConfig::from_lookup(lookup_from(&[("WASTE_MOCK_SEED", "seven")]));
        assert!(matches!(bad_seed, Err(ClassifierError::Config(_))));

        let unknown = ProviderConfig::from_lookup(lookup_from(&[("WASTE_PROVIDER", "tflite")]));
        assert!(matches!(unknown, Err(ClassifierError::Config(_))));
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider.json");
        std::fs::write(
            &path,
            r#"{"provider": "hosted", "space": "acme/waste-sorter", "timeout_ms": 5000}"#,
        )
        .unwrap();

        let config = ProviderConfig::from_json_file(&path).unwrap();
        assert_eq!(
            config,
            ProviderConfig::Hosted {
                space: "acme/waste-sorter".to_string(),
                host: None,
                timeout_ms: Some(5000)
            }
        );
    }

    #[test]
    fn test_timeout_default() {
        assert_eq!(timeout_from(None).unwrap(), DEFAULT_TIMEOUT);
        assert_eq!(timeout_from(Some(250)).unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        assert!(matches!(timeout_from(Some(0)), Err(ClassifierError::Config(_))));

        for provider in ["rest", "hosted"] {
            let result = ProviderConfig::from_lookup(lookup_from(&[
                ("WASTE_PROVIDER", provider),
                ("WASTE_REST_URL", "http://localhost:7860/run/predict"),
                ("WASTE_HOSTED_SPACE", "acme/waste-sorter"),
                ("WASTE_TIMEOUT_MS", "0"),
            ]));
            assert!(
                matches!(&result, Err(ClassifierError::Config(msg)) if msg.contains("WASTE_TIMEOUT_MS")),
                "{provider}: {result:?}"
            );
        }
    }
}
