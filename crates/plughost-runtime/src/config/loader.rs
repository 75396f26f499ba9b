//! Layered loading of [`PlugHostConfig`].
//!
//! Later sources override earlier ones:
//!
//! 1. Built-in defaults
//! 2. One configuration file: the file set with [`ConfigLoader::file`], or the
//!    first `plughost.toml` / `plughost.yaml` / `plughost.yml` found in the
//!    search directories (the working directory and `<config dir>/plughost`
//!    unless others are given)
//! 3. Sectioned environment variables, `__` separating the section from the
//!    key: `PLUGHOST_HOST__UNLOAD_ATTEMPTS=20`, `PLUGHOST_LOGGING__LEVEL=debug`
//! 4. Shorthand variables for the settings that usually differ per machine:
//!    `PLUGHOST_ASSEMBLY_ROOT` and `PLUGHOST_PLUG_IN_LOG`
//! 5. Programmatic overrides from [`ConfigLoader::merge`]
//!
//! TOML files need the `toml-config` feature, YAML files `yaml-config`.

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use figment::value::Uncased;
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult};
use super::schema::PlugHostConfig;
use super::validation::validate_config;

/// Prefix of every environment variable the host reads.
pub const ENV_PREFIX: &str = "PLUGHOST_";

/// Shorthand variables, without the prefix, and the keys they set.
const ENV_SHORTHANDS: &[(&str, &str)] = &[
    ("ASSEMBLY_ROOT", "host.assembly_root"),
    ("PLUG_IN_LOG", "logging.plug_in_level"),
];

/// File names looked for in each search directory, in order.
const FILE_NAMES: &[&str] = &["plughost.toml", "plughost.yaml", "plughost.yml"];

/// Collects configuration sources and extracts a validated [`PlugHostConfig`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    search_dirs: Vec<PathBuf>,
    env_prefix: Option<String>,
    overrides: Vec<PlugHostConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            search_dirs: Vec::new(),
            env_prefix: Some(ENV_PREFIX.to_string()),
            overrides: Vec::new(),
        }
    }

    /// Loads exactly this file; a missing file is an error.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Adds a directory searched for `plughost.*`. Replaces the default
    /// directories once any is given.
    pub fn search_path<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.search_dirs.push(dir.as_ref().to_path_buf());
        self
    }

    /// Reads environment variables under another prefix, for hosts that
    /// share a process environment.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Ignores the environment.
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// Applies `config` over every other source.
    pub fn merge(mut self, config: PlugHostConfig) -> Self {
        self.overrides.push(config);
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<PlugHostConfig> {
        let config: PlugHostConfig = self
            .figment()?
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        validate_config(&config)?;

        debug!(
            max_executing_instances = config.host.max_executing_instances,
            assembly_root = ?config.host.assembly_root,
            level = %config.logging.level,
            plug_in_level = %config.logging.plug_in_level,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn figment(&self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(PlugHostConfig::default()));

        match self.file.clone().or_else(|| self.find_file()) {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path)),
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                figment = merge_file(figment, &path)?;
            }
            None => debug!("No configuration file found, using defaults"),
        }

        if let Some(prefix) = &self.env_prefix {
            let shorthands: Vec<&str> = ENV_SHORTHANDS.iter().map(|(name, _)| *name).collect();
            figment = figment
                .merge(Env::prefixed(prefix).ignore(&shorthands).split("__"))
                .merge(Env::prefixed(prefix).filter_map(|name| {
                    ENV_SHORTHANDS
                        .iter()
                        .find(|(short, _)| name.as_str().eq_ignore_ascii_case(short))
                        .map(|(_, key)| Uncased::from(*key))
                }));
        }

        for config in &self.overrides {
            figment = figment.merge(Serialized::defaults(config));
        }
        Ok(figment)
    }

    fn find_file(&self) -> Option<PathBuf> {
        let defaults;
        let dirs = if self.search_dirs.is_empty() {
            defaults = default_search_dirs();
            &defaults
        } else {
            &self.search_dirs
        };
        dirs.iter()
            .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
            .find(|path| path.is_file())
    }
}

fn default_search_dirs() -> Vec<PathBuf> {
    std::env::current_dir()
        .ok()
        .into_iter()
        .chain(dirs::config_dir().map(|dir| dir.join("plughost")))
        .collect()
}

fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    match path.extension().and_then(|e| e.to_str()) {
        #[cfg(feature = "toml-config")]
        Some("toml") => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        Some("yaml" | "yml") => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::ParseError(format!(
            "{} is not in an enabled configuration format",
            path.display()
        ))),
    }
}

/// Loads configuration from the default sources.
pub fn load_config() -> ConfigResult<PlugHostConfig> {
    ConfigLoader::new().load()
}
