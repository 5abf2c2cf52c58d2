//! # PMOMusic Configuration Module
//!
//! This module provides configuration management for PMOMusic, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Typed getters and setters for configuration values
//! - Shared singleton access
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config()?;
//! let level = config.get_log_min_level()?;
//! config.set_log_min_level("DEBUG".to_string())?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Provider crates add their own accessors through extension traits
//! (see `pmotidal::TidalConfigExt`).

use anyhow::{anyhow, Result};
use dirs::home_dir;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, OnceLock},
};
use tracing::info;

pub mod encryption;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmomusic.yaml");

static CONFIG: OnceLock<Arc<Config>> = OnceLock::new();

const ENV_CONFIG_DIR: &str = "PMOMUSIC_CONFIG";
const ENV_PREFIX: &str = "PMOMUSIC_CONFIG__";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Configuration manager for PMOMusic
///
/// Values live in a YAML tree addressed by key paths such as
/// `&["accounts", "tidal", "client_id"]`. Keys are case-insensitive; every
/// write is persisted to `config.yaml` immediately.
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    path: PathBuf,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> PathBuf {
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        if Path::new(".pmomusic").exists() {
            return PathBuf::from(".pmomusic");
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".pmomusic");
            if home_config.exists() {
                return home_config;
            }
        }

        PathBuf::from(".pmomusic")
    }

    /// Creates the directory if needed and checks it is readable and writable
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let probe = path.join(".write_test");
        fs::write(&probe, b"test")?;
        fs::remove_file(&probe)?;
        fs::read_dir(path)?;

        Ok(())
    }

    /// Loads the configuration from the specified directory
    ///
    /// The embedded defaults are loaded first, then `config.yaml` from the
    /// config directory is merged over them, then `PMOMUSIC_CONFIG__A__B=value`
    /// environment overrides are applied. The merged tree is written back so
    /// the file always lists every known key.
    ///
    /// An empty `directory` selects the directory from `PMOMUSIC_CONFIG`,
    /// `./.pmomusic` or `~/.pmomusic`, in that order.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(&config_dir)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join("config.yaml");

        let mut merged: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut merged, &external);
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using embedded defaults");
            }
        }

        let mut value = lower_keys(merged);
        apply_env_overrides(&mut value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(value),
        };
        config.save()?;
        Ok(config)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Value>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("configuration lock poisoned"))
    }

    /// Returns the directory holding `config.yaml`
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = {
            let data = self.lock()?;
            serde_yaml::to_string(&*data)?
        };
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock()?;
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if any key along the path is missing.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock()?;
        let mut current = &*data;
        for (i, key) in path.iter().enumerate() {
            match current {
                Value::Mapping(map) => {
                    current = map
                        .get(Value::String(key.to_lowercase()))
                        .ok_or_else(|| anyhow!("Path {} does not exist", path[..=i].join(".")))?;
                }
                _ => return Err(anyhow!("Path {} is not a mapping", path[..i].join("."))),
            }
        }
        Ok(current.clone())
    }

    /// Returns a non-empty string value, or `None` when missing, empty or not a string
    pub fn get_string(&self, path: &[&str]) -> Option<String> {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Returns an unsigned integer value, accepting numeric strings
    pub fn get_u64(&self, path: &[&str]) -> Option<u64> {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_u64(),
            Ok(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns a boolean value, or `default` when missing or mistyped
    pub fn get_bool(&self, path: &[&str], default: bool) -> bool {
        match self.get_value(path) {
            Ok(Value::Bool(b)) => b,
            _ => default,
        }
    }

    /// Stores an unsigned integer
    pub fn set_u64(&self, path: &[&str], value: u64) -> Result<()> {
        self.set_value(path, Value::Number(Number::from(value)))
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le chemin peut être absolu ou relatif au répertoire de configuration.
    /// S'il n'est pas configuré, `default` est enregistré puis utilisé. Le
    /// répertoire est créé s'il n'existe pas.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<PathBuf> {
        let dir = match self.get_string(path) {
            Some(dir) => dir,
            None => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };

        let dir = Path::new(&dir);
        let absolute = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.config_dir.join(dir)
        };

        if !absolute.exists() {
            fs::create_dir_all(&absolute)?;
            info!(directory = %absolute.display(), "Created managed directory");
        }

        Ok(absolute)
    }

    /// Définit un répertoire géré par la configuration
    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> Result<String> {
        Ok(self
            .get_string(&["host", "logger", "min_level"])
            .unwrap_or_else(|| DEFAULT_LOG_MIN_LEVEL.to_string()))
    }

    /// Définit le niveau de log minimum dans la configuration
    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }

    pub fn get_log_enable_console(&self) -> bool {
        self.get_bool(&["host", "logger", "enable_console"], DEFAULT_LOG_ENABLE_CONSOLE)
    }

    pub fn set_log_enable_console(&self, enabled: bool) -> Result<()> {
        self.set_value(&["host", "logger", "enable_console"], Value::Bool(enabled))
    }
}

/// Returns the global configuration instance
///
/// The configuration is loaded on first access from the default location.
pub fn get_config() -> Result<Arc<Config>> {
    if let Some(config) = CONFIG.get() {
        return Ok(config.clone());
    }
    let loaded = Arc::new(Config::load_config("")?);
    // Un autre thread a pu initialiser la config entre-temps : on garde la sienne
    Ok(CONFIG.get_or_init(|| loaded).clone())
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((first, rest)) = path.split_first() else {
        *data = value;
        return Ok(());
    };

    let Value::Mapping(map) = data else {
        return Err(anyhow!("Current node is not a map"));
    };

    let key = Value::String(first.to_lowercase());
    if rest.is_empty() {
        map.insert(key, value);
        Ok(())
    } else {
        let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
        set_value_internal(entry, rest, value)
    }
}

fn apply_env_overrides(config: &mut Value) {
    for (key, raw) in env::vars() {
        let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key_path: Vec<&str> = suffix.split("__").collect();
        let value = serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw.clone()));
        if let Err(err) = set_value_internal(config, &key_path, value) {
            tracing::warn!(env_var = %key, "Ignoring config override: {}", err);
        }
    }
}

fn lower_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lower_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys).collect()),
        other => other,
    }
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default value.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_defaults_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
        assert_eq!(config.get_u64(&["host", "tidal", "segment_prefetch"]), Some(2));
        assert!(dir.path().join("config.yaml").exists());
    }

    #[test]
    fn test_set_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        let config = Config::load_config(path).unwrap();
        config
            .set_value(&["Accounts", "Tidal", "Country_Code"], Value::String("FR".into()))
            .unwrap();

        let reloaded = Config::load_config(path).unwrap();
        assert_eq!(
            reloaded.get_string(&["accounts", "tidal", "country_code"]),
            Some("FR".to_string())
        );
    }

    #[test]
    fn test_logger_settings_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        let config = Config::load_config(path).unwrap();
        assert!(config.get_log_enable_console());

        config.set_log_min_level("DEBUG".to_string()).unwrap();
        config.set_log_enable_console(false).unwrap();

        let reloaded = Config::load_config(path).unwrap();
        assert_eq!(reloaded.get_log_min_level().unwrap(), "DEBUG");
        assert!(!reloaded.get_log_enable_console());
    }

    #[test]
    fn test_missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert!(config.get_value(&["nope", "missing"]).is_err());
        assert_eq!(config.get_string(&["nope"]), None);
    }

    #[test]
    fn test_managed_dir_is_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        let scratch = config
            .get_managed_dir(&["host", "tidal", "scratch_directory"], "unused")
            .unwrap();
        assert_eq!(scratch, dir.path().join("scratch_tidal"));
        assert!(scratch.is_dir());
    }

    #[test]
    fn test_merge_yaml_keeps_defaults() {
        let mut default: Value = serde_yaml::from_str("a: {b: 1, c: 2}").unwrap();
        let external: Value = serde_yaml::from_str("a: {c: 3}").unwrap();
        merge_yaml(&mut default, &external);

        let expected: Value = serde_yaml::from_str("a: {b: 1, c: 3}").unwrap();
        assert_eq!(default, expected);
    }
}
