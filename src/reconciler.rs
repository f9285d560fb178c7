//! 持有唯一的权威播放快照。
//!
//! 轮询和推送得到的快照都经由 [`PlaybackStateReconciler::apply_snapshot`]
//! 进入；两次更新之间由计时器逐步推进位置。每次权威更新都会使 *代数*
//! (generation) 加一，而 tick 携带其启动时的代数，因此更新之前安排的 tick
//! 永远不会移动替换它的快照的位置。

use std::time::Duration;

use tokio::time::Instant;

use crate::{
    api::{PlaybackSnapshot, PlayerView, ProgressView, RepeatMode},
    render::{render, render_progress},
};

/// 默认每次 tick 推进的毫秒数，对应 1 秒的计时器周期。
pub const TICK_STEP_MS: u64 = 1000;

/// [`PlaybackStateReconciler::apply_snapshot`] 的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// 快照替换了当前快照，使用这个视图重绘。
    Applied(PlayerView),
    /// 快照的采样时间早于当前快照，已被丢弃。
    Stale,
}

/// 持有当前快照，所有显示的值都由它派生。
#[derive(Debug)]
pub struct PlaybackStateReconciler {
    current: Option<PlaybackSnapshot>,
    generation: u64,
    tick_step_ms: u64,
}

impl Default for PlaybackStateReconciler {
    fn default() -> Self {
        Self {
            current: None,
            generation: 0,
            tick_step_ms: TICK_STEP_MS,
        }
    }
}

impl PlaybackStateReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个每次 tick 推进 `tick_interval` 的调和器。
    ///
    /// 步长必须与计时器周期一致，显示的进度才会与真实时间同速。
    pub fn with_tick_step(tick_interval: Duration) -> Self {
        Self {
            tick_step_ms: u64::try_from(tick_interval.as_millis())
                .unwrap_or(u64::MAX)
                .max(1),
            ..Self::default()
        }
    }

    /// 每次 tick 推进的毫秒数。
    pub fn tick_step_ms(&self) -> u64 {
        self.tick_step_ms
    }

    /// 用 `snapshot` 替换当前快照。
    ///
    /// 参见 [`Self::apply_snapshot_at`]。
    pub fn apply_snapshot(&mut self, snapshot: PlaybackSnapshot) -> ApplyOutcome {
        self.apply_snapshot_at(snapshot, Instant::now())
    }

    /// 替换当前快照，并补偿其采样后经过的时间。
    ///
    /// 新快照整体生效，旧快照的任何字段都不会保留。采样时间早于当前快照的
    /// 快照视为过期，无论来源都会被丢弃。正在播放的快照会先推进
    /// `now - captured_at`，再限制在曲目时长之内。
    pub fn apply_snapshot_at(&mut self, snapshot: PlaybackSnapshot, now: Instant) -> ApplyOutcome {
        if let Some(current) = &self.current
            && snapshot.captured_at < current.captured_at
        {
            log::debug!(
                "[Reconciler] 丢弃过期的 {:?} 快照，其采样时间比当前快照早 {:?}",
                snapshot.origin,
                current.captured_at - snapshot.captured_at
            );
            return ApplyOutcome::Stale;
        }

        let mut snapshot = snapshot.clamped();
        if snapshot.is_playing && snapshot.track.is_some() {
            let latency_ms =
                u64::try_from(now.saturating_duration_since(snapshot.captured_at).as_millis())
                    .unwrap_or(u64::MAX);
            snapshot.position_ms = snapshot.position_ms.saturating_add(latency_ms);
            snapshot = snapshot.clamped();
        }

        log::trace!(
            "[Reconciler] 应用 {:?} 快照: position={}ms playing={}",
            snapshot.origin,
            snapshot.position_ms,
            snapshot.is_playing
        );
        self.generation += 1;
        self.current = Some(snapshot);
        ApplyOutcome::Applied(self.view())
    }

    /// 将持有的位置推进一步。
    ///
    /// 没有播放或 tick 属于旧代数时返回 `None`，不做任何修改。
    pub fn tick(&mut self, generation: u64) -> Option<ProgressView> {
        if generation != self.generation {
            log::trace!(
                "[Reconciler] 忽略第 {generation} 代的 tick，当前代数为 {}",
                self.generation
            );
            return None;
        }
        let snapshot = self.current.as_mut()?;
        if !snapshot.is_playing || snapshot.track.is_none() {
            return None;
        }
        snapshot.position_ms = snapshot
            .position_ms
            .saturating_add(self.tick_step_ms)
            .min(snapshot.duration_ms());
        Some(render_progress(snapshot))
    }

    /// 先于播放器立即移动显示的位置。
    ///
    /// 不会回滚：如果播放器拒绝了跳转，下一个权威快照会覆盖这个值。
    /// 空闲时返回 `None`。
    pub fn seek_to(&mut self, position_ms: u64) -> Option<ProgressView> {
        let snapshot = self.current.as_mut()?;
        snapshot.track.as_ref()?;
        snapshot.position_ms = position_ms.min(snapshot.duration_ms());
        self.generation += 1;
        Some(render_progress(snapshot))
    }

    /// 丢弃当前快照并返回空闲视图。
    pub fn reset(&mut self) -> PlayerView {
        self.current = None;
        self.generation += 1;
        self.view()
    }

    /// 当前状态的完整视图。
    pub fn view(&self) -> PlayerView {
        render(self.current.as_ref())
    }

    /// 是否已加载曲目且正在播放。
    pub fn is_playing(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|s| s.is_playing && s.track.is_some())
    }

    /// 持有的位置是否已到达曲目末尾。
    pub fn is_at_end(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|s| s.track.is_some() && s.position_ms >= s.duration_ms())
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.current.as_ref().is_some_and(|s| s.shuffle_enabled)
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.current
            .as_ref()
            .map_or(RepeatMode::Off, |s| s.repeat_mode)
    }

    /// 当前快照的代数，tick 必须携带这个值。
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
