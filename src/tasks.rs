use std::{rc::Rc, time::Duration};

use tokio::{
    sync::mpsc::Sender as TokioSender,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{ControlAction, PlaybackBackend},
    worker::InternalUpdate,
};

/// 获取一次当前播放快照并报告给工作线程。
///
/// `epoch` 标识这次轮询；如果 epoch 已不是最新 (已清理或被新的轮询取代)，
/// 工作线程会忽略其结果。
pub(crate) async fn poll_current_task<B: PlaybackBackend>(
    backend: Rc<B>,
    epoch: u64,
    update_tx: TokioSender<InternalUpdate>,
) {
    let start_time = Instant::now();
    log::trace!("[Poller] 正在轮询当前播放状态 (epoch {epoch})...");

    let result = backend.current().await;

    match &result {
        Ok(snapshot) if snapshot.track.is_some() => {
            log::trace!(
                "[Poller] 轮询 {epoch} 返回了曲目, playing={}，耗时 {:?}",
                snapshot.is_playing,
                start_time.elapsed()
            );
        }
        Ok(_) => {
            log::trace!(
                "[Poller] 轮询 {epoch} 返回了空状态，耗时 {:?}",
                start_time.elapsed()
            );
        }
        Err(e) => {
            log::debug!("[Poller] 轮询 {epoch} 失败: {e}，耗时 {:?}", start_time.elapsed());
        }
    }

    if update_tx
        .send(InternalUpdate::PollCompleted { epoch, result })
        .await
        .is_err()
    {
        log::debug!("[Poller] 工作线程已退出，丢弃轮询 {epoch} 的结果。");
    }
}

/// 向后端发送一个控制操作并报告结果。
pub(crate) async fn control_task<B: PlaybackBackend>(
    backend: Rc<B>,
    action: ControlAction,
    device_id: Option<String>,
    update_tx: TokioSender<InternalUpdate>,
) {
    log::debug!("[Command Executor] 正在执行 {action:?} (设备 {device_id:?})");
    let result = backend.control(&action, device_id.as_deref()).await;
    if update_tx
        .send(InternalUpdate::ControlCompleted { action, result })
        .await
        .is_err()
    {
        log::debug!("[Command Executor] 工作线程已退出，丢弃控制结果。");
    }
}

/// 在 `delay` 之后请求工作线程刷新轮询。
///
/// 在读回状态之前给播放器留出应用控制操作的时间。
pub(crate) async fn delayed_refresh_task(delay: Duration, update_tx: TokioSender<InternalUpdate>) {
    tokio::time::sleep(delay).await;
    let _ = update_tx.send(InternalUpdate::RefreshDue).await;
}

/// 每个 `period` 发送一次给定的代数，直到被取消。
///
/// 第一次 tick 在启动一个完整周期之后触发，而不是立即触发。
pub(crate) async fn progress_ticker_task(
    period: Duration,
    generation: u64,
    tick_tx: TokioSender<u64>,
    cancel_token: CancellationToken,
) {
    log::trace!("[Ticker] 第 {generation} 代计时器已启动。");
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => {
                break;
            }
            _ = interval.tick() => {
                if tick_tx.send(generation).await.is_err() {
                    log::warn!("[Ticker] 无法投递 tick，工作循环似乎已关闭，退出。");
                    break;
                }
            }
        }
    }
    log::trace!("[Ticker] 第 {generation} 代计时器已结束。");
}
