use std::{path::PathBuf, sync::Arc};

use crate::config::{Config, ObjectStoreConfig};
use color_eyre::{eyre::eyre, Result};
use custody_core::storage::ObjectStore;
use custody_pipeline::PipelineConfig;
use custody_records::LocalCaseStore;
use custody_remote::{SupabaseConfig, SupabaseObjectStore};
use custody_storage::{
    encryptor::DEFAULT_CHUNK_SIZE,
    key_provider::{EnvKeyProvider, KeyProvider, KeyringProvider},
};
use dirs::data_dir;
use tracing::debug;

const CASES_FILE: &str = "cases.json";

/// Resolve the default data directory for case records.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| eyre!("no data dir available"))?;
    Ok(base.join("custody"))
}

/// Open the case records file, honoring the `data_dir` override.
pub fn case_store_from_config(config: &Config) -> Result<LocalCaseStore> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    let path = root.join(CASES_FILE);
    debug!(?path, "opening case records");
    LocalCaseStore::open(path).map_err(|e| eyre!(e.to_string()))
}

/// Key source from config: keyring when configured, otherwise an env var.
pub fn key_provider_from_config(config: &Config) -> Box<dyn KeyProvider> {
    let key = config.key.clone().unwrap_or_default();
    match (key.keyring_service, key.keyring_account) {
        (Some(service), Some(account)) => Box::new(KeyringProvider::new(service, account)),
        _ => match key.env_var {
            Some(var) => Box::new(EnvKeyProvider::new(var)),
            None => Box::new(EnvKeyProvider::default()),
        },
    }
}

/// Build the remote object store, reading its API key from the configured env var.
pub fn object_store_from_config(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    let store = config
        .object_store
        .as_ref()
        .ok_or_else(|| eyre!("no [object_store] section in config; run `custody config init` and edit it"))?;
    let api_key = read_api_key(store)?;
    debug!(url = %store.url, bucket = %store.bucket, "configuring object store");
    let remote = SupabaseObjectStore::new(SupabaseConfig {
        url: store.url.clone(),
        bucket: store.bucket.clone(),
        api_key,
        timeout_secs: store.timeout_secs,
    })
    .map_err(|e| eyre!(e.to_string()))?;
    Ok(Arc::new(remote))
}

fn read_api_key(store: &ObjectStoreConfig) -> Result<String> {
    let var = store.api_key_var();
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(eyre!("object store API key not set; export {var}")),
    }
}

pub fn pipeline_config(config: &Config) -> PipelineConfig {
    PipelineConfig {
        staging_dir: config.staging_dir.clone(),
        chunk_size: config.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
    }
}
