use modelgate::registry::STATUS_RUNNING;
use modelgate::{commands, config};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    modelgate::init_logging();

    let data_dir = std::env::var_os("MODELGATE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(config::default_data_dir);
    let state = modelgate::init(&data_dir).await?;

    // Bring back everything that was running when the process last exited.
    for api in commands::apis::list_apis(&state).await? {
        if api.status == STATUS_RUNNING {
            if let Err(e) = commands::apis::start_api(&state, api.id.clone()).await {
                log::warn!("Could not restart api {}: {}", api.id, e);
            }
        }
    }

    tokio::signal::ctrl_c().await?;

    log::info!("Shutting down");
    for id in state.listeners.ids().await {
        if let Err(e) = commands::apis::stop_api(&state, id.clone()).await {
            log::warn!("Failed to stop api {}: {}", id, e);
        }
    }
    Ok(())
}
