use std::io::{BufRead, stdin};

use log::{error, info, warn};
use playbar_sync::{NoticeLevel, PlayerCommand, PlayerManager, PlayerUpdate, WorkerConfig};

fn print_help() {
    info!("Commands: p (play/pause), n (next), b (previous), s (shuffle), r (repeat),");
    info!("          seek <seconds>, uri <spotify:...>, u (refresh), q (quit)");
}

fn parse_command(line: &str) -> Option<PlayerCommand> {
    let mut parts = line.split_whitespace();
    let command = match parts.next()? {
        "p" => PlayerCommand::TogglePlayPause,
        "n" => PlayerCommand::Next,
        "b" => PlayerCommand::Previous,
        "s" => PlayerCommand::ToggleShuffle,
        "r" => PlayerCommand::CycleRepeat,
        "u" => PlayerCommand::RequestUpdate,
        "seek" => {
            let seconds: u64 = parts.next()?.parse().ok()?;
            PlayerCommand::SeekTo(seconds * 1000)
        }
        "uri" => PlayerCommand::StartUri(parts.next()?.to_string()),
        "q" => PlayerCommand::Shutdown,
        _ => return None,
    };
    Some(command)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = WorkerConfig::from_env()?;
    info!("Polling {} every {:?}", config.base_url, config.poll_interval());

    let (controller, mut update_rx) = match PlayerManager::start(config) {
        Ok((c, rx)) => (c, rx),
        Err(e) => {
            error!("Failed to start the player worker: {e}");
            return Err(e.into());
        }
    };

    let update_task = tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            match update {
                PlayerUpdate::Render(view) if view.is_idle => {
                    info!("[Render] {}", view.track_name);
                }
                PlayerUpdate::Render(view) => {
                    info!(
                        "[Render] {} - {} | {} / {} | {} | shuffle: {} | repeat: {}",
                        view.track_name,
                        view.artist_line,
                        view.progress.elapsed,
                        view.progress.total,
                        if view.is_playing { "playing" } else { "paused" },
                        view.shuffle_active,
                        view.repeat_mode.as_str(),
                    );
                }
                PlayerUpdate::Progress(progress) => {
                    info!(
                        "[Progress] {} / {} ({:.1}%)",
                        progress.elapsed, progress.total, progress.progress_percent
                    );
                }
                PlayerUpdate::Notice(notice) => match notice.level {
                    NoticeLevel::Blocking => error!("[Notice] {}", notice.message),
                    NoticeLevel::Warning => warn!("[Notice] {}", notice.message),
                    NoticeLevel::Info => info!("[Notice] {}", notice.message),
                },
                other => info!("[Update] {other:?}"),
            }
        }
    });

    print_help();
    let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<String>(8);
    std::thread::spawn(move || {
        for line in stdin().lock().lines().map_while(Result::ok) {
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = line_rx.recv().await {
        match parse_command(&line) {
            Some(PlayerCommand::Shutdown) => break,
            Some(command) => controller.send(command).await?,
            None => print_help(),
        }
    }

    controller.shutdown().await?;
    update_task.await?;

    Ok(())
}
