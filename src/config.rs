use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "WEBREALM_CONFIG";

const DEFAULT_GLOBAL_TYPE: &str = "Window";

const DEFAULT_LEGACY_EVENT_ALIASES: &[(&str, &str)] = &[
    ("animationend", "webkitAnimationEnd"),
    ("animationiteration", "webkitAnimationIteration"),
    ("animationstart", "webkitAnimationStart"),
    ("transitionend", "webkitTransitionEnd"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read realm config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("global_types must name at least one platform type")]
    NoGlobalType,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RealmConfigFile {
    global_types: Option<Vec<String>>,
    global_name: Option<String>,
    legacy_event_aliases: Option<BTreeMap<String, String>>,
    activation_event_types: Option<Vec<String>>,
    report_listener_errors: Option<bool>,
}

/// Settings a realm is created with.
#[derive(Debug, Clone, PartialEq)]
pub struct RealmConfig {
    /// Platform types the global object claims, e.g. `Window`.
    pub global_types: Vec<String>,
    pub global_name: String,
    /// Event types retried under a legacy name when a trusted event finds no listener.
    pub legacy_event_aliases: BTreeMap<String, String>,
    /// Event types that trigger activation behaviour.
    pub activation_event_types: Vec<String>,
    pub report_listener_errors: bool,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            global_types: vec![DEFAULT_GLOBAL_TYPE.to_string()],
            global_name: DEFAULT_GLOBAL_TYPE.to_string(),
            legacy_event_aliases: DEFAULT_LEGACY_EVENT_ALIASES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            activation_event_types: vec!["click".to_string()],
            report_listener_errors: true,
        }
    }
}

impl RealmConfig {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let file = if let Some(path) = config_path {
            if path.exists() {
                let contents = fs::read_to_string(path)?;
                if contents.trim().is_empty() {
                    RealmConfigFile::default()
                } else {
                    serde_yaml::from_str(&contents)?
                }
            } else {
                RealmConfigFile::default()
            }
        } else {
            RealmConfigFile::default()
        };
        Self::from_file(file)
    }

    /// Load from the path named by `WEBREALM_CONFIG`, if any.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(env::var_os(CONFIG_ENV).map(PathBuf::from))
    }

    /// Defaults, with the global claiming `types` instead of `Window`.
    pub fn with_global_types<I, S>(types: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_file(RealmConfigFile {
            global_types: Some(types.into_iter().map(Into::into).collect()),
            ..RealmConfigFile::default()
        })
    }

    fn from_file(file: RealmConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let global_types = match file.global_types {
            Some(types) if types.is_empty() => return Err(ConfigError::NoGlobalType),
            Some(types) => types,
            None => defaults.global_types,
        };
        let global_name = file
            .global_name
            .unwrap_or_else(|| global_types[0].clone());
        Ok(Self {
            global_types,
            global_name,
            legacy_event_aliases: file
                .legacy_event_aliases
                .unwrap_or(defaults.legacy_event_aliases),
            activation_event_types: file
                .activation_event_types
                .unwrap_or(defaults.activation_event_types),
            report_listener_errors: file
                .report_listener_errors
                .unwrap_or(defaults.report_listener_errors),
        })
    }

    pub fn is(&self, platform_type: &str) -> bool {
        self.global_types.iter().any(|ty| ty == platform_type)
    }

    pub fn legacy_alias(&self, event_type: &str) -> Option<&str> {
        self.legacy_event_aliases.get(event_type).map(String::as_str)
    }

    pub fn is_activation_event(&self, event_type: &str) -> bool {
        self.activation_event_types.iter().any(|ty| ty == event_type)
    }
}
