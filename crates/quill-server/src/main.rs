mod cli;
mod config;
mod error;
mod field;
mod middleware;
mod routes;
mod server;
mod state;
mod storage;

use std::time::Duration;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use quill_core::ratelimit::RateLimitStore;
use quill_crypto::{FieldCipher, FieldKey};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    match cli.command.unwrap_or(Command::Serve { listen: None }) {
        Command::Serve { listen } => {
            let addr = storage::listen_addr(listen, storage::env_listen_addr(), &config)?;
            let services = storage::build_services(&config)?;
            server::serve(services, addr).await?
        }
        Command::Keygen => println!("{}", FieldKey::generate().to_base64()),
        Command::Health => run_health_check(&config).await?,
        Command::Config(ConfigCommand::Init) => init_config(cli.config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Checks the field key and the rate limit store without starting the server.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let cipher = storage::field_cipher(config)?;
    check_cipher(&cipher)?;
    println!("Field key: ok");

    let redis = storage::redis_settings(storage::env_redis_url(), config);
    let store = storage::rate_limit_store(redis.as_ref())?;
    check_store(store.as_ref()).await?;
    if store.is_degraded() {
        println!(
            "Rate limit store: degraded ({} unreachable, counting in process)",
            store.name()
        );
    } else {
        println!("Rate limit store: ok ({})", store.name());
    }
    Ok(())
}

fn check_cipher(cipher: &FieldCipher) -> Result<()> {
    let sample = "health check";
    let envelope = cipher.encrypt(sample)?;
    if cipher.decrypt(&envelope)? != sample {
        color_eyre::eyre::bail!("field encryption round-trip failed");
    }
    Ok(())
}

async fn check_store(store: &dyn RateLimitStore) -> Result<()> {
    let key = "health:check";
    store
        .increment(key, Duration::from_secs(1))
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    store.decrement(key).await.map_err(|e| eyre!(e.to_string()))?;
    Ok(())
}

fn init_config(path: Option<std::path::PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => config::default_path()?,
    };
    let template = config::Config {
        listen_addr: Some(storage::listen_addr(None, None, &config::Config::default())?),
        ..config::Config::default()
    };
    let path = config::write_default_if_missing(&template, &path)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
