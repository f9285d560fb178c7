//! Forwards SDK listener events, one JSON object per stdin line, to the worker.
//!
//! ```text
//! {"type":"ready","payload":{"device_id":"abc"}}
//! {"type":"stateChanged","payload":{"paused":false,"position":1000,"duration":200000,
//!   "track_window":{"current_track":{"name":"Song","artists":[{"name":"Band"}]}}}}
//! {"type":"authenticationError","payload":{"message":"token expired"}}
//! ```

use std::io::{BufRead, stdin};

use log::{error, info, warn};
use playbar_sync::{PlayerCommand, PlayerManager, PlayerUpdate, SdkEvent, WorkerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (controller, mut update_rx) = PlayerManager::start(WorkerConfig::from_env()?)?;

    let update_task = tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            match update {
                PlayerUpdate::Render(view) => info!(
                    "[Render] {} | {} | {}",
                    view.track_name, view.progress.elapsed, view.play_pause_icon
                ),
                PlayerUpdate::DeviceChanged(device) => info!("[Device] {device:?}"),
                PlayerUpdate::Notice(notice) if notice.is_blocking() => {
                    error!("[Notice] {}", notice.message);
                }
                PlayerUpdate::Notice(notice) => warn!("[Notice] {}", notice.message),
                _ => {}
            }
        }
    });

    let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<String>(8);
    std::thread::spawn(move || {
        for line in stdin().lock().lines().map_while(Result::ok) {
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = line_rx.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        match SdkEvent::from_json(&line) {
            Ok(event) => {
                info!("forwarding {}", event.name());
                controller.send(PlayerCommand::Sdk(event)).await?;
            }
            Err(e) => warn!("ignoring malformed event: {e}"),
        }
        if controller.is_terminated()? {
            error!("session terminated, stopping the bridge.");
            break;
        }
    }

    controller.shutdown().await?;
    update_task.await?;

    Ok(())
}
