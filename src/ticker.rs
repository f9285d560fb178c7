use std::time::Duration;

use tokio::{sync::mpsc::Sender as TokioSender, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::tasks;

/// 重复进度计时器的持有者。
///
/// 同一时刻最多运行一个计时器：[`Ticker::start`] 会先停止之前的计时器，
/// 丢弃 `Ticker` 同样会停止它。必须在 `LocalSet` 中使用。
pub struct Ticker {
    period: Duration,
    tick_tx: TokioSender<u64>,
    active: Option<(JoinHandle<()>, CancellationToken, u64)>,
}

impl Ticker {
    /// tick 以其启动时的代数 (generation) 发送到 `tick_tx`。
    pub fn new(period: Duration, tick_tx: TokioSender<u64>) -> Self {
        Self {
            period,
            tick_tx,
            active: None,
        }
    }

    /// 为 `generation` 启动计时，替换正在运行的计时器。
    ///
    /// 重启也会重置相位：下一次 tick 在一个完整周期之后到达。
    pub fn start(&mut self, generation: u64) {
        self.stop();
        let cancel_token = CancellationToken::new();
        let handle = tokio::task::spawn_local(tasks::progress_ticker_task(
            self.period,
            generation,
            self.tick_tx.clone(),
            cancel_token.clone(),
        ));
        self.active = Some((handle, cancel_token, generation));
    }

    /// 停止正在运行的计时器 (如果有)。
    pub fn stop(&mut self) {
        if let Some((handle, token, generation)) = self.active.take() {
            log::trace!("[Ticker] 正在停止第 {generation} 代的计时器。");
            token.cancel();
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// 正在运行的计时器的代数。
    pub fn generation(&self) -> Option<u64> {
        self.active.as_ref().map(|(_, _, generation)| *generation)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
