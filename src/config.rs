// src/config.rs
//! Runtime configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration.
use crate::error::ConfigError;
use crate::runtime::EventBus;
use crate::runtime::bus::{SegmentMatcher, SubstringMatcher, TopicMatcher};
use crate::runtime::capability::{CapabilityRegistry, ChatCompletion, Echo};
use crate::runtime::reflex::ReflexConfig;
use crate::runtime::vm::DEFAULT_MAX_CALL_DEPTH;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "synapse.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynapseConfig {
    pub runtime: RuntimeSettings,
    pub bus: BusSettings,
    pub log: LogSettings,
    pub reflex: ReflexConfig,
    pub capability: Vec<CapabilitySettings>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSettings {
    pub worker_threads: usize,
    pub max_call_depth: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    #[default]
    Substring,
    Segment,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusSettings {
    pub matcher: MatcherKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Chat,
    Echo,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapabilitySettings {
    pub name: String,
    pub kind: CapabilityKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl SynapseConfig {
    /// Reads `path` if given, else `synapse.toml` when it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Path::new(DEFAULT_CONFIG_FILE),
            None => return Ok(Self::default()),
        };
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "loading config");
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SynapseConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.worker_threads == 0 {
            return Err(ConfigError::Invalid("runtime.worker_threads must be at least 1".into()));
        }
        if self.runtime.max_call_depth == 0 {
            return Err(ConfigError::Invalid("runtime.max_call_depth must be at least 1".into()));
        }
        let mut names = HashSet::new();
        for cap in &self.capability {
            if !names.insert(cap.name.as_str()) {
                return Err(ConfigError::Invalid(format!("capability `{}` is defined twice", cap.name)));
            }
            if cap.kind == CapabilityKind::Chat && cap.endpoint.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "chat capability `{}` needs an `endpoint`",
                    cap.name
                )));
            }
        }
        Ok(())
    }

    pub fn matcher(&self) -> Box<dyn TopicMatcher> {
        match self.bus.matcher {
            MatcherKind::Substring => Box::new(SubstringMatcher),
            MatcherKind::Segment => Box::new(SegmentMatcher),
        }
    }

    pub fn event_bus(&self) -> EventBus {
        EventBus::with_matcher(self.matcher())
    }

    /// `echo` is always available; configured capabilities may replace it.
    pub fn capabilities(&self) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        registry.register("echo", Echo);
        for cap in &self.capability {
            match cap.kind {
                CapabilityKind::Echo => registry.register(cap.name.clone(), Echo),
                CapabilityKind::Chat => registry.register(
                    cap.name.clone(),
                    ChatCompletion::new(
                        cap.endpoint.clone().unwrap_or_default(),
                        cap.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
                        cap.api_key_env.clone(),
                    ),
                ),
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::reflex::{RelaySettings, ThresholdSettings};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SynapseConfig::from_toml_str("").unwrap();
        assert_eq!(config.runtime.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(config.runtime.worker_threads, num_cpus::get());
        assert_eq!(config.bus.matcher, MatcherKind::Substring);
        assert_eq!(config.log.filter, "warn");
        assert!(config.capability.is_empty());
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            [runtime]
            worker_threads = 2
            max_call_depth = 64

            [bus]
            matcher = "segment"

            [log]
            filter = "synapse=debug"

            [[reflex.threshold]]
            source = "sensor.temp"
            threshold = 80.5
            alert = "alert.temperature.high"

            [[reflex.relay]]
            source = "orders.*"
            target = "audit.orders"

            [[capability]]
            name = "chat"
            kind = "chat"
            endpoint = "http://localhost:8080/v1"
            model = "local"
        "#;
        let config = SynapseConfig::from_toml_str(text).unwrap();
        assert_eq!(config.runtime.worker_threads, 2);
        assert_eq!(config.bus.matcher, MatcherKind::Segment);
        assert_eq!(config.matcher().name(), "segment");
        assert_eq!(
            config.reflex.threshold,
            vec![ThresholdSettings {
                source: "sensor.temp".into(),
                threshold: 80.5,
                alert: "alert.temperature.high".into(),
                field: None,
            }]
        );
        assert_eq!(
            config.reflex.relay,
            vec![RelaySettings {
                source: "orders.*".into(),
                target: "audit.orders".into(),
            }]
        );
        assert_eq!(config.capability[0].api_key_env, "OPENAI_API_KEY");
        let registry = config.capabilities();
        assert!(registry.contains("chat"));
        assert!(registry.contains("echo"));
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            SynapseConfig::from_toml_str("[runtime]\nworker_threads = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SynapseConfig::from_toml_str("[[capability]]\nname = \"c\"\nkind = \"chat\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SynapseConfig::from_toml_str("[bus]\nmatcher = \"regex\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SynapseConfig::from_toml_str("[runtime]\nthreads = 2"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = SynapseConfig::load(Some(Path::new("/nonexistent/synapse.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
