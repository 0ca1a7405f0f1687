use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kickoff_core::config::{AppConfig, CacheBackend};
use kickoff_core::{CacheStore, EndpointCatalog, ExecutionResult, MemoryCacheStore, OrchestratorBuilder};
use kickoff_db::{connect_with_settings, migrations, SqliteCacheStore};
use kickoff_upstream::HttpUpstream;
use serde::Serialize;
use tracing::info;

use crate::commands::query::QueryArgs;
use crate::commands::{load_config, runtime, CommandResult};

#[derive(Debug, Serialize)]
struct FetchReport {
    command: &'static str,
    status: &'static str,
    result: ExecutionResult,
}

pub fn run(args: QueryArgs, deadline_secs: Option<u64>) -> CommandResult {
    let config = match load_config("fetch") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    if let Err(error) = config.require_api_key() {
        return CommandResult::failure("fetch", "config_validation", error.to_string(), 2);
    }

    let (requirements, static_params) = match args.into_request() {
        Ok(request) => request,
        Err(message) => return CommandResult::failure("fetch", "invalid_arguments", message, 2),
    };

    let runtime = match runtime("fetch") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let store = open_store(&config).await?;
        let catalog = EndpointCatalog::football();
        let upstream = HttpUpstream::from_config(&config, Arc::new(catalog.clone()))
            .context("failed to build upstream client")?;

        let mut builder = OrchestratorBuilder::from_config(&config, Arc::new(upstream))
            .catalog(catalog)
            .store(store);
        if let Some(deadline_secs) = deadline_secs.filter(|secs| *secs > 0) {
            builder = builder.batch_timeout(Some(Duration::from_secs(deadline_secs)));
        }
        let orchestrator = builder.build();

        info!(
            event_name = "cli.fetch.started",
            requirements = requirements.len(),
            "fetching requirements"
        );
        Ok::<_, anyhow::Error>(orchestrator.run(&requirements, &static_params).await)
    });

    match result {
        Ok(result) => {
            let exit_code = if result.success { 0 } else { 1 };
            let report = FetchReport {
                command: "fetch",
                status: if result.success { "ok" } else { "error" },
                result,
            };
            CommandResult::report("fetch", exit_code, &report)
        }
        Err(error) => CommandResult::failure("fetch", "bootstrap", format!("{error:#}"), 4),
    }
}

/// Store selected by `cache.backend`. The sqlite store is migrated on open.
pub(crate) async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
    match config.cache.backend {
        CacheBackend::Memory => {
            Ok(Arc::new(MemoryCacheStore::default().with_max_entries(config.cache.memory_max_entries)))
        }
        CacheBackend::Sqlite => {
            let pool = connect_with_settings(&config.cache.database_url, 5, 30)
                .await
                .with_context(|| format!("failed to open cache database `{}`", config.cache.database_url))?;
            migrations::run_pending(&pool).await.context("failed to migrate cache database")?;
            Ok(Arc::new(SqliteCacheStore::with_system_clock(pool)))
        }
    }
}
