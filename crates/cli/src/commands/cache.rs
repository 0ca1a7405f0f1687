use std::sync::Arc;

use clap::Subcommand;
use kickoff_core::config::{AppConfig, CacheBackend};
use kickoff_core::{CacheStore, Canonicalizer, EndpointCatalog};
use kickoff_db::{connect_with_settings, migrations, SqliteCacheStore};

use crate::commands::{load_config, runtime, CommandResult};

#[derive(Debug, Clone, Subcommand)]
pub enum CacheCommand {
    #[command(about = "Remove every cached response")]
    Flush,
    #[command(about = "Remove cached responses by key prefix or endpoint")]
    Invalidate {
        #[arg(long, help = "Raw key prefix, e.g. kickoff:v1:team_search:")]
        prefix: Option<String>,
        #[arg(long, conflicts_with = "prefix", help = "Every entry of one endpoint")]
        endpoint: Option<String>,
    },
    #[command(about = "Delete entries whose TTL has already elapsed")]
    Purge,
    #[command(about = "Count live cache entries")]
    Stats,
}

/// Maintenance for the persistent cache. The memory backend lives only inside
/// a running process, so there is nothing to manage from here.
pub fn run(action: CacheCommand) -> CommandResult {
    let config = match load_config("cache") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    if config.cache.backend != CacheBackend::Sqlite {
        return CommandResult::failure(
            "cache",
            "cache_backend",
            "cache.backend is `memory`; set KICKOFF_CACHE_BACKEND=sqlite to manage a persistent cache",
            2,
        );
    }

    let runtime = match runtime("cache") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    match runtime.block_on(perform(&config, action)) {
        Ok(message) => CommandResult::success("cache", message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("cache", error_class, message, exit_code)
        }
    }
}

type CacheFailure = (&'static str, String, u8);

async fn perform(config: &AppConfig, action: CacheCommand) -> Result<String, CacheFailure> {
    let store = open_sqlite(config).await?;
    match action {
        CacheCommand::Flush => {
            store.flush().await.map_err(|error| ("cache_flush", error.to_string(), 5u8))?;
            Ok("cache flushed".to_string())
        }
        CacheCommand::Invalidate { prefix, endpoint } => {
            let prefix = match (prefix, endpoint) {
                (Some(prefix), _) => prefix,
                (None, Some(endpoint)) => endpoint_prefix(config, &endpoint),
                (None, None) => {
                    return Err((
                        "invalid_arguments",
                        "invalidate needs --prefix or --endpoint".to_string(),
                        2,
                    ))
                }
            };
            let removed = store
                .invalidate_prefix(&prefix)
                .await
                .map_err(|error| ("cache_invalidate", error.to_string(), 5u8))?;
            Ok(format!("removed {removed} entries with prefix `{prefix}`"))
        }
        CacheCommand::Purge => {
            let removed =
                store.purge_expired().await.map_err(|error| ("cache_purge", error.to_string(), 5u8))?;
            Ok(format!("purged {removed} expired entries"))
        }
        CacheCommand::Stats => {
            let live =
                store.entry_count().await.map_err(|error| ("cache_stats", error.to_string(), 5u8))?;
            Ok(format!("{live} live entries"))
        }
    }
}

async fn open_sqlite(config: &AppConfig) -> Result<SqliteCacheStore, CacheFailure> {
    let pool = connect_with_settings(&config.cache.database_url, 1, 30)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(SqliteCacheStore::with_system_clock(pool))
}

fn endpoint_prefix(config: &AppConfig, endpoint: &str) -> String {
    Canonicalizer::new(config.cache.key_prefix.clone(), Arc::new(EndpointCatalog::football()))
        .endpoint_prefix(endpoint)
}
