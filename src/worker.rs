use std::{rc::Rc, thread};

use chrono::Utc;
use tokio::{
    runtime::Builder as RuntimeBuilder,
    sync::mpsc::{self, Receiver as TokioReceiver, Sender as TokioSender},
    task::{JoinHandle, LocalSet},
    time::{Instant, MissedTickBehavior},
};

use crate::{
    api::{
        Notice, NoticeLevel, PlaybackSnapshot, PlayerCommand, PlayerUpdate, SharedSession, SnapshotOrigin,
    },
    backend::{ControlAction, PlaybackBackend},
    config::WorkerConfig,
    error::{PlaybarError, Result},
    reconciler::{ApplyOutcome, PlaybackStateReconciler},
    sdk::{self, SdkEventHandler, SdkPlaybackState},
    tasks,
    ticker::Ticker,
};

/// 工作线程自身后台任务产生的事件。
#[derive(Debug)]
pub(crate) enum InternalUpdate {
    /// 一次轮询完成。`epoch` 用于判断结果是否仍然需要。
    PollCompleted {
        epoch: u64,
        result: Result<PlaybackSnapshot>,
    },
    /// 一个控制操作完成。
    ControlCompleted {
        action: ControlAction,
        result: Result<()>,
    },
    /// 控制操作后的延迟已到，需要读回状态。
    RefreshDue,
}

/// 播放栏的协调者。
///
/// 在 `LocalSet` 内的单个线程上运行。它持有：
/// 1. 持有当前快照的协调器 (reconciler)，
/// 2. 进度计时器，
/// 3. 后备轮询和控制操作任务，
/// 4. 其他处理器可能读取的会话值 (SDK 设备、音量)。
///
/// 轮询和推送得到的快照都经过 [`Self::apply`]。
pub(crate) struct PlayerWorker<B: PlaybackBackend + 'static> {
    config: WorkerConfig,
    backend: Rc<B>,

    // --- 核心 I/O ---
    command_rx: TokioReceiver<PlayerCommand>,
    update_tx: TokioSender<PlayerUpdate>,
    internal_tx: TokioSender<InternalUpdate>,
    internal_rx: TokioReceiver<InternalUpdate>,
    tick_rx: TokioReceiver<u64>,

    // --- 播放状态 ---
    reconciler: PlaybackStateReconciler,
    ticker: Ticker,
    session: SharedSession,
    push_active: bool,
    terminated: bool,

    // --- 后台任务 ---
    poll_epoch: u64,
    active_poll: Option<JoinHandle<()>>,
    pending_refresh: Option<JoinHandle<()>>,
}

impl<B: PlaybackBackend + 'static> PlayerWorker<B> {
    pub(crate) fn new(
        backend: B,
        config: WorkerConfig,
        command_rx: TokioReceiver<PlayerCommand>,
        update_tx: TokioSender<PlayerUpdate>,
        session: SharedSession,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(32);
        let (tick_tx, tick_rx) = mpsc::channel(8);
        let tick_interval = config.tick_interval();
        let ticker = Ticker::new(tick_interval, tick_tx);
        Self {
            config,
            backend: Rc::new(backend),
            command_rx,
            update_tx,
            internal_tx,
            internal_rx,
            tick_rx,
            reconciler: PlaybackStateReconciler::with_tick_step(tick_interval),
            ticker,
            session,
            push_active: false,
            terminated: false,
            poll_epoch: 0,
            active_poll: None,
            pending_refresh: None,
        }
    }

    /// 驱动工作线程，直到收到 `Shutdown` 或所有控制器都被丢弃。
    pub(crate) async fn run(mut self) {
        log::info!("[PlayerWorker] Worker 已启动，轮询地址 {}", self.config.base_url);
        self.main_event_loop().await;
        self.teardown();
    }

    async fn main_event_loop(&mut self) {
        let mut poll_interval = tokio::time::interval(self.config.poll_interval());
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let poll_enabled = self.should_poll();
            tokio::select! {
                // 命令优先，Shutdown 先于待处理的工作
                biased;

                maybe_command = self.command_rx.recv() => {
                    match maybe_command {
                        Some(PlayerCommand::Shutdown) => {
                            log::debug!("[PlayerWorker] 收到关闭请求。");
                            break;
                        }
                        None => {
                            log::debug!("[PlayerWorker] 所有控制器都已丢弃。");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                    }
                },

                Some(update) = self.internal_rx.recv() => {
                    self.handle_internal_update(update);
                },

                Some(generation) = self.tick_rx.recv() => {
                    self.handle_tick(generation);
                },

                _ = poll_interval.tick(), if poll_enabled => {
                    self.start_poll(false);
                }
            }
        }
    }

    fn handle_command(&mut self, command: PlayerCommand) {
        log::trace!("[PlayerWorker] 收到命令: {command:?}");
        match command {
            PlayerCommand::Play => self.dispatch_control(ControlAction::Play),
            PlayerCommand::Pause => self.dispatch_control(ControlAction::Pause),
            PlayerCommand::TogglePlayPause => {
                let action = if self.reconciler.is_playing() {
                    ControlAction::Pause
                } else {
                    ControlAction::Play
                };
                self.dispatch_control(action);
            }
            PlayerCommand::Next => self.dispatch_control(ControlAction::Next),
            PlayerCommand::Previous => self.dispatch_control(ControlAction::Previous),
            PlayerCommand::SeekTo(position_ms) => self.seek_to(position_ms),
            PlayerCommand::SetShuffle(enabled) => {
                self.dispatch_control(ControlAction::Shuffle(enabled));
            }
            PlayerCommand::ToggleShuffle => {
                let enabled = !self.reconciler.shuffle_enabled();
                self.dispatch_control(ControlAction::Shuffle(enabled));
            }
            PlayerCommand::SetRepeatMode(mode) => {
                self.dispatch_control(ControlAction::Repeat(mode));
            }
            PlayerCommand::CycleRepeat => {
                let next = self.reconciler.repeat_mode().next();
                self.dispatch_control(ControlAction::Repeat(next));
            }
            PlayerCommand::StartUri(uri) => self.dispatch_control(ControlAction::StartUri(uri)),
            PlayerCommand::SetVolume(volume) => self.set_volume(volume),
            PlayerCommand::Sdk(event) => sdk::dispatch(event, self),
            PlayerCommand::RequestUpdate => self.start_poll(true),
            PlayerCommand::Shutdown => {}
        }
    }

    fn handle_internal_update(&mut self, update: InternalUpdate) {
        match update {
            InternalUpdate::PollCompleted { epoch, result } => {
                self.handle_poll_result(epoch, result);
            }
            InternalUpdate::ControlCompleted { action, result } => {
                self.handle_control_result(action, result);
            }
            InternalUpdate::RefreshDue => {
                self.pending_refresh = None;
                self.start_poll(true);
            }
        }
    }

    fn handle_tick(&mut self, generation: u64) {
        if self.terminated {
            return;
        }
        let Some(progress) = self.reconciler.tick(generation) else {
            return;
        };
        self.publish(PlayerUpdate::Progress(progress));

        if self.reconciler.is_at_end() {
            log::debug!("[PlayerWorker] 曲目已播放到末尾，等待下一首。");
            self.ticker.stop();
            if !self.push_active {
                self.schedule_refresh();
            }
        }
    }

    /// 权威快照的唯一入口。
    fn apply(&mut self, snapshot: PlaybackSnapshot) {
        if self.terminated {
            return;
        }
        match self.reconciler.apply_snapshot(snapshot) {
            ApplyOutcome::Applied(view) => {
                self.publish(PlayerUpdate::Render(view));
                self.sync_ticker();
            }
            ApplyOutcome::Stale => {}
        }
    }

    /// 为当前代数重启计时器，没有播放时停止计时器。
    fn sync_ticker(&mut self) {
        if self.reconciler.is_playing() && !self.terminated && !self.reconciler.is_at_end() {
            self.ticker.start(self.reconciler.generation());
        } else {
            self.ticker.stop();
        }
    }

    fn seek_to(&mut self, position_ms: u64) {
        if self.terminated {
            self.refuse_control(&ControlAction::Seek(position_ms));
            return;
        }
        let Some(progress) = self.reconciler.seek_to(position_ms) else {
            log::debug!("[PlayerWorker] 没有播放，忽略跳转。");
            return;
        };
        let target = progress.position_ms;
        self.publish(PlayerUpdate::Progress(progress));
        self.sync_ticker();
        self.dispatch_control(ControlAction::Seek(target));
    }

    fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            log::warn!("[PlayerWorker] 忽略非有限值的音量 {volume}。");
            return;
        };
        match self.session.lock() {
            Ok(mut session) => session.volume = volume,
            Err(e) => {
                log::error!("[PlayerWorker] 会话锁已中毒: {e}");
                return;
            }
        }
        self.publish(PlayerUpdate::VolumeChanged(volume));
    }

    fn dispatch_control(&mut self, action: ControlAction) {
        if self.terminated {
            self.refuse_control(&action);
            return;
        }
        if let Err(e) = action.validate() {
            log::warn!("[PlayerWorker] 拒绝 {action:?}: {e}");
            self.publish(PlayerUpdate::Notice(Notice::warning(e.to_string())));
            return;
        }

        let device_id = self.device_id();
        tokio::task::spawn_local(tasks::control_task(
            Rc::clone(&self.backend),
            action,
            device_id,
            self.internal_tx.clone(),
        ));
    }

    fn refuse_control(&self, action: &ControlAction) {
        log::warn!("[PlayerWorker] 会话已终止，拒绝 {action:?}。");
        self.publish(PlayerUpdate::Notice(Notice::warning(
            PlaybarError::SessionTerminated.to_string(),
        )));
    }

    fn handle_control_result(&mut self, action: ControlAction, result: Result<()>) {
        match result {
            Ok(()) => {
                log::debug!("[PlayerWorker] {action:?} 执行成功。");
                if !self.push_active {
                    self.schedule_refresh();
                }
            }
            Err(e) if e.is_terminal() => self.terminate(&e),
            Err(e) => {
                log::error!("[PlayerWorker] {action:?} 执行失败: {e}");
                self.publish(PlayerUpdate::Notice(Notice::warning(format!(
                    "Could not {}: {e}",
                    action.label()
                ))));
            }
        }
    }

    fn should_poll(&self) -> bool {
        !self.terminated && (!self.push_active || self.config.poll_while_push_active)
    }

    /// 发起一次轮询。
    ///
    /// 上一次轮询仍在进行时，定时轮询会被跳过，强制轮询则会取代它。
    fn start_poll(&mut self, force: bool) {
        if self.terminated {
            return;
        }
        if let Some(active) = self.active_poll.take() {
            if !active.is_finished() && !force {
                log::trace!("[PlayerWorker] 上一次轮询仍在进行，跳过本次。");
                self.active_poll = Some(active);
                return;
            }
            active.abort();
        }

        self.poll_epoch += 1;
        self.active_poll = Some(tokio::task::spawn_local(tasks::poll_current_task(
            Rc::clone(&self.backend),
            self.poll_epoch,
            self.internal_tx.clone(),
        )));
    }

    fn handle_poll_result(&mut self, epoch: u64, result: Result<PlaybackSnapshot>) {
        if epoch != self.poll_epoch {
            log::trace!(
                "[PlayerWorker] 丢弃轮询 {epoch} 的结果，当前为 {}。",
                self.poll_epoch
            );
            return;
        }
        self.active_poll = None;

        match result {
            Ok(snapshot) => self.apply(snapshot),
            Err(e) if e.is_terminal() => self.terminate(&e),
            Err(e) => {
                log::warn!("[PlayerWorker] 轮询失败，将在下一个周期重试: {e}");
            }
        }
    }

    fn schedule_refresh(&mut self) {
        if let Some(previous) = self.pending_refresh.take() {
            previous.abort();
        }
        self.pending_refresh = Some(tokio::task::spawn_local(tasks::delayed_refresh_task(
            self.config.refresh_delay(),
            self.internal_tx.clone(),
        )));
    }

    /// 在认证或账户错误之后结束会话。
    fn terminate(&mut self, error: &PlaybarError) {
        if self.terminated {
            return;
        }
        log::error!("[PlayerWorker] 终止性错误，停止会话: {error}");
        self.terminated = true;
        if let Ok(mut session) = self.session.lock() {
            session.terminated = true;
        }
        self.ticker.stop();
        self.cancel_background_tasks();
        self.publish(PlayerUpdate::Notice(Notice::blocking(error.to_string())));
    }

    fn cancel_background_tasks(&mut self) {
        // 递增 epoch 会丢弃已在队列中的结果
        self.poll_epoch += 1;
        if let Some(poll) = self.active_poll.take() {
            poll.abort();
        }
        if let Some(refresh) = self.pending_refresh.take() {
            refresh.abort();
        }
    }

    fn teardown(&mut self) {
        log::info!("[PlayerWorker] 正在清理...");
        self.ticker.stop();
        self.cancel_background_tasks();
        self.reconciler.reset();
        self.internal_rx.close();
    }

    fn device_id(&self) -> Option<String> {
        match self.session.lock() {
            Ok(session) => session.device_id.clone(),
            Err(e) => {
                log::error!("[PlayerWorker] 会话锁已中毒: {e}");
                None
            }
        }
    }

    fn set_device_id(&self, device_id: Option<String>) {
        if let Ok(mut session) = self.session.lock() {
            session.device_id = device_id;
        }
    }

    fn publish(&self, update: PlayerUpdate) {
        if self.update_tx.try_send(update).is_err() {
            log::warn!("[PlayerWorker] 发布更新失败，接收端已满或已关闭。");
        }
    }
}

impl<B: PlaybackBackend + 'static> SdkEventHandler for PlayerWorker<B> {
    fn on_ready(&mut self, device_id: String) {
        log::info!("[PlayerWorker] SDK 设备已就绪: {device_id}");
        self.set_device_id(Some(device_id.clone()));
        self.push_active = true;
        self.publish(PlayerUpdate::Notice(Notice::new(
            NoticeLevel::Info,
            format!("Web player connected ({device_id})"),
        )));
        self.publish(PlayerUpdate::DeviceChanged(Some(device_id)));
    }

    fn on_not_ready(&mut self, device_id: String) {
        log::warn!("[PlayerWorker] SDK 设备已离线: {device_id}");
        if self.device_id().as_deref() == Some(device_id.as_str()) {
            self.set_device_id(None);
            self.publish(PlayerUpdate::DeviceChanged(None));
        }
        self.push_active = false;
        self.start_poll(true);
    }

    fn on_state_changed(&mut self, state: Option<SdkPlaybackState>) {
        let snapshot = match state {
            Some(state) => state.into_snapshot(Instant::now(), Utc::now()),
            None => PlaybackSnapshot::new(None, Instant::now(), SnapshotOrigin::Push),
        };
        self.apply(snapshot);
    }

    fn on_initialization_error(&mut self, message: String) {
        log::error!("[PlayerWorker] SDK 初始化失败，继续使用轮询: {message}");
        self.push_active = false;
        self.publish(PlayerUpdate::Notice(Notice::warning(format!(
            "The web player could not start: {message}"
        ))));
    }

    fn on_authentication_error(&mut self, message: String) {
        self.terminate(&PlaybarError::Auth(message));
    }

    fn on_account_error(&mut self, message: String) {
        self.terminate(&PlaybarError::UnsupportedAccount(message));
    }

    fn on_playback_error(&mut self, message: String) {
        log::warn!("[PlayerWorker] SDK 播放错误: {message}");
        self.publish(PlayerUpdate::Notice(Notice::warning(format!(
            "Playback failed: {message}"
        ))));
    }
}

/// 启动工作线程。
///
/// 该线程运行一个单线程 Tokio 运行时和一个 `LocalSet`，所有播放器状态都在其上
/// 存储和修改。
pub(crate) fn start_player_worker_thread<B>(
    backend: B,
    config: WorkerConfig,
    command_rx: TokioReceiver<PlayerCommand>,
    update_tx: TokioSender<PlayerUpdate>,
    session: SharedSession,
) -> Result<thread::JoinHandle<()>>
where
    B: PlaybackBackend + Send + 'static,
{
    let runtime = RuntimeBuilder::new_current_thread().enable_all().build()?;

    thread::Builder::new()
        .name("playbar_worker_thread".to_string())
        .spawn(move || {
            let local_set = LocalSet::new();
            let worker = PlayerWorker::new(backend, config, command_rx, update_tx, session);
            local_set.block_on(&runtime, worker.run());
            log::trace!("[PlayerWorker Thread] 工作循环已退出，线程即将终止。");
        })
        .map_err(|e| PlaybarError::WorkerThread(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::*;
    use crate::{
        api::{PlayerController, PlayerView, ProgressView, RepeatMode, SessionInfo, Track},
        sdk::{SdkEvent, SdkTrack, SdkTrackWindow},
    };

    #[derive(Default)]
    struct FakeState {
        snapshots: VecDeque<Result<Option<PlaybackSnapshot>>>,
        poll_delay: Duration,
        polls: usize,
        controls: Vec<(ControlAction, Option<String>)>,
        control_error: Option<fn() -> PlaybarError>,
    }

    #[derive(Clone, Default)]
    struct FakeBackend(Rc<RefCell<FakeState>>);

    impl FakeBackend {
        /// Queues a poll result; `None` stamps "now" and means idle.
        fn push_snapshot(&self, snapshot: Option<PlaybackSnapshot>) {
            self.0.borrow_mut().snapshots.push_back(Ok(snapshot));
        }

        fn push_error(&self, error: PlaybarError) {
            self.0.borrow_mut().snapshots.push_back(Err(error));
        }

        fn polls(&self) -> usize {
            self.0.borrow().polls
        }

        fn controls(&self) -> Vec<(ControlAction, Option<String>)> {
            self.0.borrow().controls.clone()
        }
    }

    impl PlaybackBackend for FakeBackend {
        async fn current(&self) -> Result<PlaybackSnapshot> {
            let (delay, next) = {
                let mut state = self.0.borrow_mut();
                state.polls += 1;
                let next = state.snapshots.pop_front();
                (state.poll_delay, next)
            };
            tokio::time::sleep(delay).await;
            match next {
                Some(Ok(Some(mut snapshot))) => {
                    snapshot.captured_at = Instant::now();
                    Ok(snapshot)
                }
                Some(Err(e)) => Err(e),
                Some(Ok(None)) | None => Ok(PlaybackSnapshot::new(
                    None,
                    Instant::now(),
                    SnapshotOrigin::Poll,
                )),
            }
        }

        async fn control(&self, action: &ControlAction, device_id: Option<&str>) -> Result<()> {
            let mut state = self.0.borrow_mut();
            state
                .controls
                .push((action.clone(), device_id.map(str::to_string)));
            match state.control_error {
                Some(make_error) => Err(make_error()),
                None => Ok(()),
            }
        }
    }

    fn playing(name: &str, duration_ms: u64, position_ms: u64) -> PlaybackSnapshot {
        let mut snapshot = PlaybackSnapshot::new(
            Some(Track {
                id: format!("{name}-id"),
                name: name.to_string(),
                artist_names: vec!["Artist".into()],
                album_name: None,
                artwork_url: None,
                duration_ms,
            }),
            Instant::now(),
            SnapshotOrigin::Poll,
        );
        snapshot.position_ms = position_ms;
        snapshot.is_playing = true;
        snapshot
    }

    fn paused(name: &str, duration_ms: u64, position_ms: u64) -> PlaybackSnapshot {
        let mut snapshot = playing(name, duration_ms, position_ms);
        snapshot.is_playing = false;
        snapshot
    }

    fn spawn_worker(
        backend: FakeBackend,
    ) -> (
        PlayerController,
        TokioReceiver<PlayerUpdate>,
        JoinHandle<()>,
    ) {
        spawn_worker_with(backend, WorkerConfig::default())
    }

    fn spawn_worker_with(
        backend: FakeBackend,
        config: WorkerConfig,
    ) -> (
        PlayerController,
        TokioReceiver<PlayerUpdate>,
        JoinHandle<()>,
    ) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (update_tx, update_rx) = mpsc::channel(256);
        let session = Arc::new(Mutex::new(SessionInfo::default()));
        let worker = PlayerWorker::new(
            backend,
            config,
            command_rx,
            update_tx,
            session.clone(),
        );
        let handle = tokio::task::spawn_local(worker.run());
        (
            PlayerController {
                command_tx,
                session,
            },
            update_rx,
            handle,
        )
    }

    async fn next_render(rx: &mut TokioReceiver<PlayerUpdate>) -> PlayerView {
        loop {
            match rx.recv().await.expect("worker closed the update channel") {
                PlayerUpdate::Render(view) => return view,
                _ => continue,
            }
        }
    }

    async fn next_notice(rx: &mut TokioReceiver<PlayerUpdate>) -> Notice {
        loop {
            match rx.recv().await.expect("worker closed the update channel") {
                PlayerUpdate::Notice(notice) => return notice,
                _ => continue,
            }
        }
    }

    /// Everything published during the next `window`.
    async fn collect_for(
        rx: &mut TokioReceiver<PlayerUpdate>,
        window: Duration,
    ) -> Vec<PlayerUpdate> {
        let mut updates = Vec::new();
        let _ = tokio::time::timeout(window, async {
            while let Some(update) = rx.recv().await {
                updates.push(update);
            }
        })
        .await;
        updates
    }

    fn progress_of(updates: &[PlayerUpdate]) -> Vec<ProgressView> {
        updates
            .iter()
            .filter_map(|u| match u {
                PlayerUpdate::Progress(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    async fn run_local<F: std::future::Future<Output = ()>>(future: F) {
        LocalSet::new().run_until(future).await
    }

    #[tokio::test(start_paused = true)]
    async fn polled_playing_snapshot_ticks_once_per_second() {
        run_local(async {
            let backend = FakeBackend::default();
            backend.push_snapshot(Some(playing("X", 200_000, 0)));
            let (controller, mut rx, handle) = spawn_worker(backend);

            let view = next_render(&mut rx).await;
            assert_eq!(view.track_name, "X");
            assert!(view.is_playing);

            let updates = collect_for(&mut rx, Duration::from_millis(3_500)).await;
            let progress = progress_of(&updates);
            assert_eq!(
                progress.iter().map(|p| p.position_ms).collect::<Vec<_>>(),
                [1_000, 2_000, 3_000]
            );
            let last = progress.last().unwrap();
            assert!((last.progress_percent - 1.5).abs() < 1e-9);

            controller.shutdown().await.unwrap();
            handle.await.unwrap();
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn faster_timer_keeps_real_time_speed() {
        run_local(async {
            let backend = FakeBackend::default();
            backend.push_snapshot(Some(playing("X", 200_000, 0)));
            let config = WorkerConfig {
                tick_interval_ms: 250,
                ..WorkerConfig::default()
            };
            let (controller, mut rx, handle) = spawn_worker_with(backend, config);
            next_render(&mut rx).await;

            let updates = collect_for(&mut rx, Duration::from_millis(1_010)).await;
            let progress = progress_of(&updates);
            assert_eq!(
                progress.iter().map(|p| p.position_ms).collect::<Vec<_>>(),
                [250, 500, 750, 1_000]
            );

            controller.shutdown().await.unwrap();
            handle.await.unwrap();
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn paused_snapshot_never_ticks() {
        run_local(async {
            let backend = FakeBackend::default();
            backend.push_snapshot(Some(paused("X", 200_000, 30_000)));
            let (controller, mut rx, handle) = spawn_worker(backend);

            let view = next_render(&mut rx).await;
            assert_eq!(view.progress.position_ms, 30_000);

            let updates = collect_for(&mut rx, Duration::from_millis(4_000)).await;
            assert!(progress_of(&updates).is_empty());

            controller.shutdown().await.unwrap();
            handle.await.unwrap();
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_poll_renders_idle() {
        run_local(async {
            let backend = FakeBackend::default();
            backend.push_snapshot(None);
            let (controller, mut rx, handle) = spawn_worker(backend);

            let view = next_render(&mut rx).await;
            assert!(view.is_idle);
            assert_eq!(view.track_name, "No track");

            controller.shutdown().await.unwrap();
            handle.await.unwrap();
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn seek_moves_display_before_the_backend_answers() {
        run_local(async {
            let backend = FakeBackend::default();
            backend.push_snapshot(Some(playing("X", 200_000, 0)));
            let (controller, mut rx, handle) = spawn_worker(backend.clone());
            next_render(&mut rx).await;

            controller.send(PlayerCommand::SeekTo(90_000)).await.unwrap();
            let progress = loop {
                if let Some(PlayerUpdate::Progress(p)) = rx.recv().await {
                    break p;
                }
            };
            assert_eq!(progress.position_ms, 90_000);

            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(backend.controls(), [(ControlAction::Seek(90_000), None)]);

            controller.shutdown().await.unwrap();
            handle.await.unwrap();
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_repeat_and_toggles_follow_current_state() {
        run_local(async {
            let backend = FakeBackend::default();
            let mut snapshot = playing("X", 200_000, 0);
            snapshot.repeat_mode = RepeatMode::Context;
            snapshot.shuffle_enabled = true;
            backend.push_snapshot(Some(snapshot));
            let (controller, mut rx, handle) = spawn_worker(backend.clone());
            next_render(&mut rx).await;

            controller.send(PlayerCommand::CycleRepeat).await.unwrap();
            controller.send(PlayerCommand::ToggleShuffle).await.unwrap();
            controller.send(PlayerCommand::TogglePlayPause).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;

            let actions: Vec<_> = backend.controls().into_iter().map(|(a, _)| a).collect();
            assert_eq!(
                actions,
                [
                    ControlAction::Repeat(RepeatMode::Track),
                    ControlAction::Shuffle(false),
                    ControlAction::Pause
                ]
            );

            controller.shutdown().await.unwrap();
            handle.await.unwrap();
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn control_failure_surfaces_notice_but_poll_failure_is_swallowed() {
        run_local(async {
            let backend = FakeBackend::default();
            backend.push_error(PlaybarError::Network {
                status: 500,
                message: "boom".into(),
            });
            backend.0.borrow_mut().control_error = Some(|| PlaybarError::Network {
                status: 404,
                message: "No active device".into(),
            });
            let (controller, mut rx, handle) = spawn_worker(backend.clone());

            // the failed first poll publishes nothing
            let updates = collect_for(&mut rx, Duration::from_millis(100)).await;
            assert!(updates.is_empty());

            controller.send(PlayerCommand::Next).await.unwrap();
            let notice = next_notice(&mut rx).await;
            assert!(!notice.is_blocking());
            assert!(notice.message.contains("No active device"));
            assert!(!controller.is_terminated().unwrap());

            controller.shutdown().await.unwrap();
            handle.await.unwrap();
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_error_is_terminal() {
        run_local(async {
            let backend = FakeBackend::default();
            backend.push_snapshot(Some(playing("X", 200_000, 0)));
            let (controller, mut rx, handle) = spawn_worker(backend.clone());
            next_render(&mut rx).await;

            controller
                .send(PlayerCommand::Sdk(SdkEvent::AuthenticationError {
                    message: "token expired".into(),
                }))
                .await
                .unwrap();
            let notice = next_notice(&mut rx).await;
            assert!(notice.is_blocking());
            assert!(controller.is_terminated().unwrap());

            controller.send(PlayerCommand::Next).await.unwrap();
            let refused = next_notice(&mut rx).await;
            assert!(!refused.is_blocking());

            let polls_before = backend.polls();
            let updates = collect_for(&mut rx, Duration::from_secs(12)).await;
            assert!(progress_of(&updates).is_empty());
            assert_eq!(backend.polls(), polls_before);
            assert!(backend.controls().is_empty());

            controller.shutdown().await.unwrap();
            handle.await.unwrap();
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn sdk_ready_suspends_polling_and_routes_controls() {
        run_local(async {
            let backend = FakeBackend::default();
            backend.push_snapshot(None);
            let (controller, mut rx, handle) = spawn_worker(backend.clone());
            next_render(&mut rx).await;
            assert_eq!(backend.polls(), 1);

            controller
                .send(PlayerCommand::Sdk(SdkEvent::Ready {
                    device_id: "web-player".into(),
                }))
                .await
                .unwrap();
            let connected = next_notice(&mut rx).await;
            assert_eq!(connected.level, NoticeLevel::Info);
            assert!(connected.message.contains("web-player"));

            let state = SdkPlaybackState {
                paused: false,
                position: 5_000,
                duration: 100_000,
                shuffle: false,
                repeat_mode: 2,
                timestamp: None,
                track_window: SdkTrackWindow {
                    current_track: Some(SdkTrack {
                        id: Some("pushed".into()),
                        name: "Pushed".into(),
                        duration_ms: None,
                        artists: vec![],
                        album: None,
                    }),
                },
            };
            controller
                .send(PlayerCommand::Sdk(SdkEvent::StateChanged(Some(state))))
                .await
                .unwrap();

            let view = next_render(&mut rx).await;
            assert_eq!(view.track_name, "Pushed");
            assert_eq!(view.repeat_mode, RepeatMode::Track);
            assert_eq!(controller.device_id().unwrap().as_deref(), Some("web-player"));

            controller.send(PlayerCommand::Play).await.unwrap();
            let _ = collect_for(&mut rx, Duration::from_secs(11)).await;
            assert_eq!(backend.polls(), 1, "polling must pause while push is active");
            assert_eq!(
                backend.controls(),
                [(ControlAction::Play, Some("web-player".to_string()))]
            );

            controller
                .send(PlayerCommand::Sdk(SdkEvent::NotReady {
                    device_id: "web-player".into(),
                }))
                .await
                .unwrap();
            let _ = collect_for(&mut rx, Duration::from_millis(100)).await;
            assert!(backend.polls() >= 2, "not_ready falls back to polling");
            assert_eq!(controller.device_id().unwrap(), None);

            controller.shutdown().await.unwrap();
            handle.await.unwrap();
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn poll_result_after_teardown_is_ignored() {
        run_local(async {
            let backend = FakeBackend::default();
            backend.0.borrow_mut().poll_delay = Duration::from_secs(2);
            backend.push_snapshot(Some(playing("Late", 200_000, 0)));
            let (controller, mut rx, handle) = spawn_worker(backend.clone());

            tokio::time::sleep(Duration::from_secs(1)).await;
            controller.shutdown().await.unwrap();
            handle.await.unwrap();

            tokio::time::sleep(Duration::from_secs(3)).await;
            let mut renders = 0;
            while let Ok(update) = rx.try_recv() {
                if matches!(update, PlayerUpdate::Render(_)) {
                    renders += 1;
                }
            }
            assert_eq!(renders, 0);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_uri_is_rejected_locally() {
        run_local(async {
            let backend = FakeBackend::default();
            let (controller, mut rx, handle) = spawn_worker(backend.clone());

            controller
                .send(PlayerCommand::StartUri("https://example.com".into()))
                .await
                .unwrap();
            let notice = next_notice(&mut rx).await;
            assert!(notice.message.contains("invalid playback URI"));
            assert!(backend.controls().is_empty());

            controller.send(PlayerCommand::SetVolume(1.7)).await.unwrap();
            loop {
                if let Some(PlayerUpdate::VolumeChanged(v)) = rx.recv().await {
                    assert_eq!(v, 1.0);
                    break;
                }
            }
            assert_eq!(controller.volume().unwrap(), 1.0);

            controller.shutdown().await.unwrap();
            handle.await.unwrap();
        })
        .await;
    }
}
