use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// Env var consulted for the object store API key when none is configured.
pub const DEFAULT_API_KEY_VAR: &str = "CUSTODY_STORAGE_API_KEY";

/// User-level configuration loaded from `~/.config/custody/config.toml` (platform-specific).
///
/// Only the *names* of environment variables holding secrets live here.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the case records directory.
    pub data_dir: Option<PathBuf>,
    /// Override for the staging root (system temp dir when unset).
    pub staging_dir: Option<PathBuf>,
    /// Plaintext bytes per encrypted chunk.
    pub chunk_size: Option<usize>,
    pub key: Option<KeyConfig>,
    pub object_store: Option<ObjectStoreConfig>,
}

/// Where the encryption key comes from. Keyring wins when both are set.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KeyConfig {
    pub env_var: Option<String>,
    pub keyring_service: Option<String>,
    pub keyring_account: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    pub url: String,
    pub bucket: String,
    pub api_key_env: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl ObjectStoreConfig {
    pub fn api_key_var(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_VAR)
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("custody").join("config.toml"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn returns_default_when_blank() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "  \n").expect("write");
        assert_eq!(load_from_path(&path).expect("load"), Config::default());
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            data_dir = "/var/lib/custody"
            staging_dir = "/var/tmp/custody"
            chunk_size = 4096
            [key]
            env_var = "INCIDENT_KEY"
            [object_store]
            url = "https://project.supabase.co"
            bucket = "evidence"
            api_key_env = "SUPABASE_SERVICE_KEY"
            timeout_secs = 30
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                data_dir: Some(PathBuf::from("/var/lib/custody")),
                staging_dir: Some(PathBuf::from("/var/tmp/custody")),
                chunk_size: Some(4096),
                key: Some(KeyConfig {
                    env_var: Some("INCIDENT_KEY".into()),
                    keyring_service: None,
                    keyring_account: None,
                }),
                object_store: Some(ObjectStoreConfig {
                    url: "https://project.supabase.co".into(),
                    bucket: "evidence".into(),
                    api_key_env: Some("SUPABASE_SERVICE_KEY".into()),
                    timeout_secs: Some(30),
                }),
            }
        );
    }

    #[test]
    fn api_key_var_falls_back_to_default() {
        let store = ObjectStoreConfig {
            url: "https://project.supabase.co".into(),
            bucket: "evidence".into(),
            api_key_env: None,
            timeout_secs: None,
        };
        assert_eq!(store.api_key_var(), DEFAULT_API_KEY_VAR);
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            data_dir: Some(PathBuf::from("/tmp/custody-data")),
            ..Config::default()
        };

        write_to_path_if_missing(&cfg, &path).expect("write should succeed");
        let other = Config::default();
        let second = write_to_path_if_missing(&other, &path).expect("second write ok");
        assert_eq!(second, path);
        assert_eq!(load_from_path(&path).expect("load"), cfg);
    }
}
