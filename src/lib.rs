//! 让"正在播放"栏与远程音乐播放器保持同步的 Rust 库。
//!
//! `playbar-sync` 将三种播放状态来源协调为一个视图：从后端 REST API 轮询到的
//! 快照、浏览器内播放 SDK 推送的状态，以及在两次权威更新之间推进显示位置的
//! 本地计时器。它还会把播放栏的控制操作 (播放、暂停、切歌、跳转、随机、循环)
//! 发送回后端。
//!
//! ## 核心功能
//!
//! * **快照协调**: 每个权威快照都整体替换之前的快照，旧快照永远不会覆盖新快照。
//! * **本地进度计时**: 最多只有一个计时器在运行，被取代的计时器发出的 tick 会被丢弃。
//! * **推送优先，轮询兜底**: SDK 设备推送状态时暂停轮询，设备离开后恢复。
//! * **错误分类**: 认证和账户错误会以阻断性通知结束会话，其他错误会重试或以警告显示。
//!
//! ## 使用方法
//!
//! 与本库交互的入口是 [`PlayerManager::start()`] 函数。
//!
//! 1.  `PlayerManager::start(config)` 会启动工作线程，并返回
//!     `(PlayerController, mpsc::Receiver<PlayerUpdate>)`。
//! 2.  [`PlayerController`] 用于发送 [`PlayerCommand`]，SDK 事件包装在
//!     [`PlayerCommand::Sdk`] 中发送。
//! 3.  接收端产出 [`PlayerUpdate`]：完整渲染、仅进度更新、设备和音量变化以及用户通知。
//! 4.  退出前务必调用 [`PlayerController::shutdown()`]。
//!
//! ## 示例
//!
//! ```no_run
//! use playbar_sync::{PlayerCommand, PlayerManager, PlayerUpdate, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (controller, mut update_rx) = PlayerManager::start(WorkerConfig::from_env()?)?;
//!
//!     let update_task = tokio::spawn(async move {
//!         while let Some(update) = update_rx.recv().await {
//!             match update {
//!                 PlayerUpdate::Render(view) => {
//!                     println!("{} - {}", view.track_name, view.artist_line);
//!                 }
//!                 PlayerUpdate::Progress(progress) => {
//!                     println!("{} / {}", progress.elapsed, progress.total);
//!                 }
//!                 PlayerUpdate::Notice(notice) => eprintln!("{}", notice.message),
//!                 _ => {}
//!             }
//!         }
//!     });
//!
//!     controller.send(PlayerCommand::TogglePlayPause).await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!
//!     controller.shutdown().await?;
//!     update_task.await?;
//!     Ok(())
//! }
//! ```

mod api;
mod backend;
mod config;
mod error;
mod reconciler;
mod render;
mod sdk;
mod tasks;
mod ticker;
mod utils;
mod worker;

pub use api::{
    Notice, NoticeLevel, PlaybackSnapshot, PlayerCommand, PlayerController, PlayerUpdate,
    PlayerView, ProgressView, RepeatMode, SnapshotOrigin, Track,
};
pub use backend::{ControlAction, HttpBackend, ImagePayload, PlaybackBackend};
pub use config::{DEFAULT_BASE_URL, WorkerConfig};
pub use error::{PlaybarError, Result};
pub use reconciler::{ApplyOutcome, PlaybackStateReconciler, TICK_STEP_MS};
pub use render::{
    ICON_PAUSE, ICON_PLAY, IDLE_TRACK_NAME, PLACEHOLDER_ARTWORK_URL, render, render_progress,
};
pub use sdk::{
    SdkAlbum, SdkArtist, SdkEvent, SdkEventHandler, SdkPlaybackState, SdkTrack, SdkTrackWindow,
    dispatch,
};
pub use ticker::Ticker;
pub use utils::{format_time, is_playable_uri, join_artist_names, progress_percent};

use std::sync::{Arc, LazyLock, Mutex};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

use crate::api::SessionInfo;

static WORKER_HANDLE: LazyLock<Mutex<Option<JoinHandle<()>>>> = LazyLock::new(|| Mutex::new(None));

/// 库的静态入口。
pub struct PlayerManager;

impl PlayerManager {
    /// 针对 `config` 描述的 HTTP 后端启动播放器工作线程。
    ///
    /// # 返回
    /// - `Ok((controller, update_rx))`:
    ///   - `controller`: 用于发送命令的 [`PlayerController`]。
    ///   - `update_rx`: 接收所有 [`PlayerUpdate`]。
    /// - `Err(PlaybarError)`: 配置无效、工作线程无法启动，或已有工作线程在运行。
    pub fn start(config: WorkerConfig) -> Result<(PlayerController, mpsc::Receiver<PlayerUpdate>)> {
        config.validate()?;
        let backend = HttpBackend::new(&config)?;
        Self::start_with_backend(backend, config)
    }

    /// 与 [`PlayerManager::start()`] 相同，但使用调用方提供的后端。
    pub fn start_with_backend<B>(
        backend: B,
        config: WorkerConfig,
    ) -> Result<(PlayerController, mpsc::Receiver<PlayerUpdate>)>
    where
        B: PlaybackBackend + Send + 'static,
    {
        config.validate()?;
        {
            let handle_guard = WORKER_HANDLE.lock()?;
            if let Some(handle) = handle_guard.as_ref()
                && !handle.is_finished()
            {
                return Err(PlaybarError::AlreadyRunning);
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<PlayerCommand>(32);
        let (update_tx, update_rx) = mpsc::channel::<PlayerUpdate>(64);
        let session = Arc::new(Mutex::new(SessionInfo::default()));

        let new_handle = worker::start_player_worker_thread(
            backend,
            config,
            command_rx,
            update_tx,
            Arc::clone(&session),
        )?;

        let controller = PlayerController {
            command_tx,
            session,
        };

        {
            let mut handle_guard = WORKER_HANDLE.lock()?;
            *handle_guard = Some(new_handle);
        }

        Ok((controller, update_rx))
    }
}
