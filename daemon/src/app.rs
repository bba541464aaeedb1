use anyhow::Context;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::config::{AppConfig, CONFIG_PATH};
use crate::management::comm::OsHostControl;
use crate::management::host::HostProcessControl;
use crate::management::manager::Fleet;
use crate::management::supervisor::SupervisorContext;
use crate::management::version::read_binary_version;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_context(config: AppConfig) -> Arc<SupervisorContext> {
    let host: Arc<dyn HostProcessControl> = Arc::new(OsHostControl::new());
    let facts = host.facts();
    info!(
        "host: {} cpus, {} MiB free, platform {}",
        facts.cpu_count,
        facts.free_memory >> 20,
        facts.platform.name()
    );

    match read_binary_version(&config.game_server.binary_path, facts.platform) {
        Ok(version) => info!("game version {}", version),
        Err(e) => warn!("could not read the game version: {}", e),
    }

    Arc::new(SupervisorContext::new(
        config.game_server,
        config.data_dir,
        host,
    ))
}

pub async fn run_app() -> anyhow::Result<()> {
    info!("gsv_daemon {}", VERSION);
    let config = AppConfig::load(CONFIG_PATH).context("failed to load config.json")?;
    debug!("config loaded: {}", serde_json::to_string_pretty(&config)?);

    let fleet = Fleet::build(init_context(config)).context("invalid fleet configuration")?;
    info!("supervising {} game servers", fleet.len());
    fleet.start_all().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down, game servers keep running");
    fleet.shutdown().await;

    info!("Bye.");
    Ok(())
}
