//! Builders that turn config plus environment into live service handles.

use std::{env, net::SocketAddr, sync::Arc};

use color_eyre::{eyre::eyre, Result};
use quill_agent::openai::{OpenAiSettings, OpenAiSummarizer};
use quill_core::{
    auth::StaticTokenAuthenticator,
    journal::InMemoryJournalStore,
    observability::{ErrorReporter, TracingReporter},
    ratelimit::InMemoryRateLimitStore,
    summary::{KeywordSummarizer, Summarizer},
};
use quill_crypto::{
    EnvKeyProvider, FieldCipher, KeyProvider, StaticKeyProvider, ENCRYPTION_KEY_ENV,
};
use quill_ratelimit::{FallbackRateLimitStore, RedisRateLimitStore, RedisSettings};
use tracing::{debug, info, warn};

use crate::{config::Config, field::FieldCodec, middleware::TrustedProxies, state::AppState};

pub const REDIS_URL_ENV: &str = "QUILL_REDIS_URL";
pub const LISTEN_ADDR_ENV: &str = "QUILL_LISTEN_ADDR";
pub const OPENAI_KEY_ENVS: [&str; 2] = ["QUILL_OPENAI_API_KEY", "OPENAI_API_KEY"];
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// The environment key wins over the config file.
pub fn key_provider(config: &Config) -> Box<dyn KeyProvider> {
    if env_value(ENCRYPTION_KEY_ENV).is_some() {
        debug!("field key from environment");
        return Box::new(EnvKeyProvider::default());
    }
    debug!("field key from config file");
    Box::new(StaticKeyProvider::new(config.encryption_key.clone()))
}

/// Load the field key once; a missing or malformed key aborts startup.
pub fn field_cipher(config: &Config) -> Result<FieldCipher> {
    let provider = key_provider(config);
    FieldCipher::from_provider(provider.as_ref())
        .map_err(|err| eyre!("field encryption key unusable: {err}"))
}

/// `env_url` replaces the configured URL but keeps the configured timeout
/// and prefix.
pub fn redis_settings(env_url: Option<String>, config: &Config) -> Option<RedisSettings> {
    match (env_url, config.redis.clone()) {
        (Some(url), Some(mut settings)) => {
            settings.url = url;
            Some(settings)
        }
        (Some(url), None) => Some(RedisSettings::new(url)),
        (None, settings) => settings,
    }
}

/// Counter store for every limiter. A malformed Redis URL is an error here;
/// an unreachable server only degrades at request time.
pub fn rate_limit_store(settings: Option<&RedisSettings>) -> Result<Arc<FallbackRateLimitStore>> {
    let local = InMemoryRateLimitStore::new();
    let store = match settings {
        Some(settings) => {
            let redis = RedisRateLimitStore::new(settings)?;
            info!(prefix = %settings.key_prefix, "rate limits shared through redis");
            FallbackRateLimitStore::new(Arc::new(redis), local)
        }
        None => {
            info!("rate limits kept in process");
            FallbackRateLimitStore::local_only(local)
        }
    };
    Ok(Arc::new(store))
}

pub fn openai_settings(env_key: Option<String>, config: &Config) -> Option<OpenAiSettings> {
    let openai = config.openai.clone().unwrap_or_default();
    let api_key = openai.api_key.filter(|k| !k.trim().is_empty()).or(env_key)?;
    let mut settings = OpenAiSettings::new(api_key);
    if let Some(model) = openai.model {
        settings.model = model;
    }
    settings.api_base = openai.endpoint;
    Some(settings)
}

pub fn summarizer(settings: Option<OpenAiSettings>) -> Result<Arc<dyn Summarizer>> {
    match settings {
        Some(settings) => {
            info!(model = %settings.model, "summaries generated with openai");
            let summarizer =
                OpenAiSummarizer::new(settings).map_err(|err| eyre!("openai client: {err:#}"))?;
            Ok(Arc::new(summarizer))
        }
        None => {
            warn!("no OpenAI key configured, falling back to keyword summaries");
            Ok(Arc::new(KeywordSummarizer))
        }
    }
}

pub fn authenticator(config: &Config) -> StaticTokenAuthenticator {
    if config.auth.tokens.is_empty() {
        warn!("no API tokens configured, authenticated routes will answer 401");
    }
    config.auth.tokens.clone().into_iter().collect()
}

/// CLI flag, then `QUILL_LISTEN_ADDR`, then config, then the default.
pub fn listen_addr(
    flag: Option<SocketAddr>,
    env_addr: Option<String>,
    config: &Config,
) -> Result<SocketAddr> {
    if let Some(addr) = flag {
        return Ok(addr);
    }
    if let Some(raw) = env_addr {
        return raw
            .trim()
            .parse()
            .map_err(|err| eyre!("{LISTEN_ADDR_ENV}={raw:?} is not a socket address: {err}"));
    }
    if let Some(addr) = config.listen_addr {
        return Ok(addr);
    }
    Ok(DEFAULT_LISTEN_ADDR.parse()?)
}

pub fn env_listen_addr() -> Option<String> {
    env_value(LISTEN_ADDR_ENV)
}

pub fn env_redis_url() -> Option<String> {
    env_value(REDIS_URL_ENV)
}

pub fn env_openai_key() -> Option<String> {
    OPENAI_KEY_ENVS.iter().find_map(|name| env_value(name))
}

/// Everything the server needs, wired from config and environment.
pub struct Services {
    pub state: AppState,
    /// Also held by `state.rate_limits`; kept typed for the eviction sweep.
    pub rate_limits: Arc<FallbackRateLimitStore>,
}

pub fn build_services(config: &Config) -> Result<Services> {
    let reporter: Arc<dyn ErrorReporter> = Arc::new(TracingReporter);
    let fields = FieldCodec::new(field_cipher(config)?, reporter.clone());
    let rate_limits = rate_limit_store(redis_settings(env_redis_url(), config).as_ref())?;
    let summarizer = summarizer(openai_settings(env_openai_key(), config))?;
    let journal = InMemoryJournalStore::new();

    let state = AppState {
        fields,
        notes: Arc::new(journal.clone()),
        summaries: Arc::new(journal),
        summarizer,
        authenticator: Arc::new(authenticator(config)),
        rate_limits: rate_limits.clone(),
        trusted_proxies: TrustedProxies::new(config.trusted_proxies.iter().copied()),
        reporter,
    };
    Ok(Services { state, rate_limits })
}
