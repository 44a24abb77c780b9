use crate::core::keys::{AttributeTag, Category, KeyRegistry};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_PARALLEL_THRESHOLD: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for parameter '{parameter}': {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },
    #[error("Unknown attribute type '{type_name}' for key '{key}'")]
    UnknownAttributeType { key: String, type_name: String },
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

/// How much runtime checking an evaluation pass performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckLevel {
    /// No score sanity checks.
    None,
    /// Rejects non-finite restraint scores.
    #[default]
    Usage,
    /// Like `Usage`, and rebuilds the dependency graph on every evaluation.
    Internal,
}

/// An attribute key to register before any particle is created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub category: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub check_level: CheckLevel,
    /// Minimum number of tuples before a container restraint scores in parallel.
    pub parallel_threshold: usize,
    pub keys: Vec<KeyDeclaration>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            check_level: CheckLevel::default(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            keys: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ModelConfigFile {
    check_level: Option<CheckLevel>,
    parallel_threshold: Option<usize>,
    #[serde(default)]
    keys: Vec<KeyDeclaration>,
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "<memory>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: ModelConfigFile = toml::from_str(content).map_err(|e| ConfigError::Toml {
            path: origin.to_string(),
            source: e,
        })?;
        let mut builder = ModelConfigBuilder::new();
        if let Some(level) = file.check_level {
            builder = builder.check_level(level);
        }
        if let Some(threshold) = file.parallel_threshold {
            builder = builder.parallel_threshold(threshold);
        }
        for key in file.keys {
            builder = builder.declare_key(key);
        }
        builder.build()
    }

    /// Registers every declared key with `registry`.
    pub fn register_keys(&self, registry: &KeyRegistry) -> Result<(), ConfigError> {
        for declaration in &self.keys {
            let tag = parse_tag(declaration)?;
            registry.register_raw(tag, Category(declaration.category), &declaration.name);
        }
        Ok(())
    }
}

fn parse_tag(declaration: &KeyDeclaration) -> Result<AttributeTag, ConfigError> {
    declaration
        .type_name
        .parse()
        .map_err(|_| ConfigError::UnknownAttributeType {
            key: declaration.name.clone(),
            type_name: declaration.type_name.clone(),
        })
}

#[derive(Default)]
pub struct ModelConfigBuilder {
    check_level: Option<CheckLevel>,
    parallel_threshold: Option<usize>,
    keys: Vec<KeyDeclaration>,
}

impl ModelConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_level(mut self, level: CheckLevel) -> Self {
        self.check_level = Some(level);
        self
    }
    pub fn parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = Some(threshold);
        self
    }
    pub fn declare_key(mut self, declaration: KeyDeclaration) -> Self {
        self.keys.push(declaration);
        self
    }

    pub fn build(self) -> Result<ModelConfig, ConfigError> {
        let parallel_threshold = self
            .parallel_threshold
            .unwrap_or(DEFAULT_PARALLEL_THRESHOLD);
        if parallel_threshold == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "parallel_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        for declaration in &self.keys {
            parse_tag(declaration)?;
            if declaration.name.trim().is_empty() {
                return Err(ConfigError::InvalidParameter {
                    parameter: "keys",
                    reason: "key names must not be empty".to_string(),
                });
            }
        }
        Ok(ModelConfig {
            check_level: self.check_level.unwrap_or_default(),
            parallel_threshold,
            keys: self.keys,
        })
    }
}
