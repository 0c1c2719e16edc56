use std::sync::Arc;

use anyhow::{Context, Result};
use tally_config::Config;
use tally_log::LogError;
use tally_metchan::Channel;
use tally_outlet::{
    ConsumerDirectory, DirectoryConfig, HttpMetricsApi, OutletBackends, OutletService,
    RedisDirectory, RedisLeaseService, RedisSampleStore, StaticDirectory,
};
use tally_redis::AsyncRedisPool;
use tally_system::Controller;
use tally_upstream::GaugesClient;

/// Validates the parts of the config that only matter for `run`.
pub fn check_config(config: &Config) -> Result<()> {
    if config.outlet().enabled && config.redis().is_none() {
        anyhow::bail!("the outlet requires a redis server, set `redis` or TALLY_REDIS_URL");
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    tally_log::info!(
        "launching tally from config folder {}",
        config.path().display()
    );
    tally_log::info!("  app name: {}", config.app_name());
    tally_log::info!("  log level: {}", config.logging().level.as_str());
    tally_log::info!(
        "  outlet: {}",
        if config.outlet().enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    tally_log::info!(
        "  metchan: {}",
        if config.metchan().url.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );
}

/// Initialize the logging system.
pub fn init_logging(config: &Config) {
    tally_log::init(config.logging());
}

/// Runs all services until shutdown.
pub fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tally")
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    let controller = Controller::new(config.shutdown_timeout());

    let metchan = Channel::new(
        config.app_name(),
        config.metchan(),
        &config.client_options(),
    )
    .context("failed to create the metchan")?;
    let metchan = Arc::new(metchan);
    metchan.start().context("failed to start the metchan")?;

    let outlet = match config.redis() {
        Some(redis) if config.outlet().enabled => {
            let pool = AsyncRedisPool::from_config(redis).context("failed to connect to redis")?;
            let service = create_outlet(&config, pool, Arc::clone(&metchan))?;
            Some(tokio::spawn(service.run(controller.handle())))
        }
        _ => None,
    };

    let shutdown = controller.run().await?;

    if let Some(outlet) = outlet {
        match shutdown.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, outlet).await {
                Ok(Ok(())) => (),
                Ok(Err(error)) => tally_log::error!("outlet failed: {}", LogError(&error)),
                Err(_) => tally_log::warn!("outlet did not stop within the shutdown timeout"),
            },
            None => outlet.abort(),
        }
    }

    tokio::task::spawn_blocking(move || metchan.stop())
        .await
        .context("failed to stop the metchan")?;

    tally_log::info!("shutdown complete");
    Ok(())
}

fn create_outlet(
    config: &Config,
    pool: AsyncRedisPool,
    metchan: Arc<Channel>,
) -> Result<OutletService> {
    let outlet = config.outlet();

    let directory: Arc<dyn ConsumerDirectory> = match &outlet.directory {
        DirectoryConfig::Redis => Arc::new(RedisDirectory::new(pool.clone(), config.app_name())),
        DirectoryConfig::Static { consumers } => Arc::new(StaticDirectory::new(consumers)),
    };

    let client = GaugesClient::new(&config.client_options())
        .context("failed to create the gauges client")?;
    let url = outlet.api_url.parse().context("invalid outlet api url")?;

    let backends = OutletBackends {
        store: Arc::new(RedisSampleStore::new(pool.clone())),
        leases: Arc::new(RedisLeaseService::new(pool)),
        directory,
        api: Arc::new(HttpMetricsApi::new(client, url)),
    };

    Ok(OutletService::new(
        outlet.clone(),
        config.app_name(),
        backends,
        metchan,
    ))
}
