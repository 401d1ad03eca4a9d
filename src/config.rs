use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "BLOGFEED";

/// Scheme used in `Authorization: <scheme> <credential>`.
pub const DEFAULT_AUTH_SCHEME: &str = "Token";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_scheme: default_auth_scheme(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000/api/".to_string()
}

fn default_auth_scheme() -> String {
    DEFAULT_AUTH_SCHEME.to_string()
}

fn default_user_agent() -> String {
    format!("blogfeed/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("config: failed to read {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("config: failed to parse {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.trim().is_empty() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.auth_scheme.trim().is_empty() {
        base.api.auth_scheme = other.api.auth_scheme;
    }
    if !other.api.user_agent.trim().is_empty() {
        base.api.user_agent = other.api.user_agent;
    }
    if !other.api.timeout.is_zero() {
        base.api.timeout = other.api.timeout;
    }
    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }
    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" if !value.trim().is_empty() => cfg.api.base_url = value,
        "api.auth_scheme" if !value.trim().is_empty() => cfg.api.auth_scheme = value,
        "api.user_agent" if !value.trim().is_empty() => cfg.api.user_agent = value,
        "api.timeout" => match humantime::parse_duration(&value) {
            Ok(duration) => cfg.api.timeout = duration,
            Err(err) => log::warn!("config: ignoring api.timeout {value:?}: {err}"),
        },
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("blogfeed").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_point_at_local_api() {
        let cfg = Config::default();
        assert_eq!(cfg.api.base_url, "http://127.0.0.1:8000/api/");
        assert_eq!(cfg.api.auth_scheme, "Token");
        assert_eq!(cfg.api.timeout, Duration::from_secs(20));
        assert!(cfg.storage.path.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: https://blog.example.com/api/\n  timeout: 5s\nstorage:\n  path: /tmp/blogfeed.db\n",
        )
        .unwrap();

        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("BLOGFEED_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://blog.example.com/api/");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
        assert_eq!(cfg.api.auth_scheme, "Token");
        assert_eq!(cfg.storage.path, Some(PathBuf::from("/tmp/blogfeed.db")));
    }

    #[test]
    fn env_overrides() {
        env::set_var("BLOGFEED_TEST_ENV_API__AUTH_SCHEME", "Bearer");
        env::set_var("BLOGFEED_TEST_ENV_API__TIMEOUT", "90s");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/blogfeed.yaml")),
            env_prefix: Some("BLOGFEED_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.auth_scheme, "Bearer");
        assert_eq!(cfg.api.timeout, Duration::from_secs(90));
        env::remove_var("BLOGFEED_TEST_ENV_API__AUTH_SCHEME");
        env::remove_var("BLOGFEED_TEST_ENV_API__TIMEOUT");
    }
}
