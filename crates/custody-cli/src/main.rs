mod cases;
mod cli;
mod config;
mod evidence;
mod storage;

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use custody_core::{records::CaseStore, storage::ObjectStore};
use custody_storage::{
    encryptor::{decrypt_bytes, encrypt_bytes},
    key_provider::{encode_key, SymmetricKey},
    staging::StagingArea,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

const HEALTH_PROBE_PREFIX: &str = "health";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    let mut out = std::io::stdout();
    match cli.command {
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Keygen => print_new_key(),
        cli::Command::Actor(cmd) => {
            let store = storage::case_store_from_config(&config)?;
            cases::handle_actor(cmd, &store, &mut out).await?
        }
        cli::Command::Incident(cmd) => {
            let store = storage::case_store_from_config(&config)?;
            cases::handle_incident(cmd, &store, &mut out).await?
        }
        cli::Command::Audit(cmd) => {
            let store = storage::case_store_from_config(&config)?;
            cases::handle_audit(cmd, &store, &mut out).await?
        }
        cli::Command::Evidence(cmd) => evidence::handle(cmd, &config).await?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Checks every subsystem an evidence submission depends on.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let key = storage::key_provider_from_config(config)
        .get_key()
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    check_key(&key)?;
    println!("Key: ok");

    let staging = match &config.staging_dir {
        Some(dir) => StagingArea::new(dir),
        None => StagingArea::in_temp_dir(),
    };
    check_staging(&staging)?;
    println!("Staging: ok ({})", staging.root().display());

    let cases = storage::case_store_from_config(config)?;
    let actors = cases
        .list_actors()
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    println!("Case records: ok ({} actors)", actors.len());

    let objects = storage::object_store_from_config(config)?;
    check_object_store(objects.as_ref()).await?;
    println!("Object store: ok ({})", objects.name());
    Ok(())
}

fn check_key(key: &SymmetricKey) -> Result<()> {
    let probe = b"custody health probe";
    let sealed = encrypt_bytes(key, probe).map_err(|e| eyre!(e.to_string()))?;
    let opened = decrypt_bytes(key, &sealed).map_err(|e| eyre!(e.to_string()))?;
    if opened != probe {
        color_eyre::eyre::bail!("encryption round-trip failed");
    }
    Ok(())
}

fn check_staging(staging: &StagingArea) -> Result<()> {
    let staged = staging.stage(&b"ok"[..]).map_err(|e| eyre!(e.to_string()))?;
    let dir = staged.dir().to_path_buf();
    staging.release(staged);
    if dir.exists() {
        color_eyre::eyre::bail!("staging directory {} was not cleaned up", dir.display());
    }
    Ok(())
}

async fn check_object_store(store: &dyn ObjectStore) -> Result<()> {
    let probe_key = format!("{HEALTH_PROBE_PREFIX}/{}", Uuid::new_v4());
    let payload = b"ok".to_vec();
    store
        .upload(&probe_key, payload.clone())
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    let round_trip = store
        .download(&probe_key)
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    store
        .delete(&probe_key)
        .await
        .map_err(|e| eyre!(e.to_string()))?;

    if round_trip != payload {
        color_eyre::eyre::bail!("object store round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

/// The key goes to stdout only, so it can be piped into a secret store.
fn print_new_key() {
    println!("{}", encode_key(&SymmetricKey::generate()));
}
