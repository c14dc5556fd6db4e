mod cli;
mod config;
mod context;
mod files;
mod storage;

use crate::{
    cli::{ConfigCommand, KeysCommand},
    context::AppContext,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use pqems_core::storage::SecretStore;
use sha2::{Digest, Sha256};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FINGERPRINT_LEN: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Version => print_version(),
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Probe => run_probe(&config)?,
        cli::Command::Health => {
            let ctx = AppContext::from_config(&config)?;
            run_store_health(&*ctx.backend().store()).await?;
            println!("Storage ({}): ok", ctx.backend().kind());
        }
        cli::Command::Keygen => {
            let ctx = AppContext::from_config(&config)?;
            run_keygen(&ctx).await?
        }
        cli::Command::Encrypt { input, output } => {
            let ctx = AppContext::from_config(&config)?;
            files::encrypt(&ctx, &input, &output).await?;
            println!("Encrypted {} -> {}", input.display(), output.display());
        }
        cli::Command::Decrypt { input, output } => {
            let ctx = AppContext::from_config(&config)?;
            files::decrypt(&ctx, &input, &output).await?;
            println!("Decrypted {} -> {}", input.display(), output.display());
        }
        cli::Command::Keys(KeysCommand::Delete) => {
            let ctx = AppContext::from_config(&config)?;
            ctx.keys().delete_keys().await.map_err(|e| eyre!(e))?;
            println!("Keys deleted from {}", ctx.backend().kind());
        }
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("pqems {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

fn run_probe(config: &config::Config) -> Result<()> {
    let (kind, forced) = storage::resolve_kind(config)?;
    if forced {
        println!("Backend: {kind} (forced by config)");
    } else {
        println!("Backend: {kind}");
    }
    Ok(())
}

/// Store, load and delete a probe record through the backend.
async fn run_store_health(store: &dyn SecretStore) -> Result<()> {
    let probe_key = "health/probe";
    let payload = b"ok";
    store
        .store(probe_key, payload)
        .await
        .map_err(|e| eyre!(e))?;
    let round_trip = store.load(probe_key).await.map_err(|e| eyre!(e))?;
    store.delete(probe_key).await.map_err(|e| eyre!(e))?;

    if round_trip != payload {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

async fn run_keygen(ctx: &AppContext) -> Result<()> {
    let pair = ctx
        .keys()
        .generate_and_store()
        .await
        .map_err(|e| eyre!(e))?;
    println!("Algorithm: {}", pair.algorithm_id);
    println!("Backend: {}", ctx.backend().kind());
    println!("Fingerprint: {}", fingerprint(&pair.public_key));
    Ok(())
}

/// Short, stable identifier of a public key for operators to compare.
fn fingerprint(public_key: &[u8]) -> String {
    let mut encoded = URL_SAFE_NO_PAD.encode(Sha256::digest(public_key));
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}
