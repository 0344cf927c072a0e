//! Cache administration commands

use anyhow::{bail, Context};
use serde_json::Value;
use tracing::info;

use super::Command;
use crate::config::AppConfig;
use crate::infrastructure::cache::{CacheConfig, CacheService};
use crate::infrastructure::logging;

/// Load configuration, connect to the store and run one command
pub async fn run(command: Command) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging);

    let cache_config = if std::env::var("CACHE_STORE").is_ok() {
        CacheConfig::from_env()?
    } else {
        config.cache.clone()
    };

    let cache = crate::create_cache_service(&cache_config).await?;
    let output = execute(&cache, command).await?;

    println!("{}", output);
    Ok(())
}

/// Runs a command and renders its result
pub async fn execute(cache: &CacheService, command: Command) -> anyhow::Result<String> {
    match command {
        Command::Stats => {
            let stats = cache.stats().await;
            serde_json::to_string_pretty(&stats).context("Failed to render stats")
        }
        Command::Get { key } => match cache.get::<Value>(&key).await {
            Some(value) => {
                serde_json::to_string_pretty(&value).context("Failed to render value")
            }
            None => Ok("(nil)".to_string()),
        },
        Command::Forget { key } => {
            let deleted = cache.forget(&key).await;
            Ok(if deleted { "deleted" } else { "not found" }.to_string())
        }
        Command::Wipe { tag } => {
            let deleted = cache.wipe(&tag).await;
            info!(tag = %tag, deleted, "Tag wiped from CLI");
            Ok(format!("{} key(s) deleted", deleted))
        }
        Command::Unlock { key } => {
            let released = cache.unlock(&key).await;
            Ok(if released { "released" } else { "not locked" }.to_string())
        }
        Command::Flush { yes } => {
            if !yes {
                bail!("Refusing to flush without --yes");
            }

            if !cache.flush().await {
                bail!("Flush failed");
            }

            info!(prefix = %cache.prefix(), "Cache flushed from CLI");
            Ok("flushed".to_string())
        }
        Command::Ping => {
            cache
                .store()
                .ping()
                .await
                .map_err(|e| anyhow::anyhow!("Store did not answer: {}", e))?;
            Ok("PONG".to_string())
        }
    }
}
