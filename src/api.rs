use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, time::Instant};

use crate::{
    error::{PlaybarError, Result},
    sdk::SdkEvent,
};

/// 播放器的循环模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    /// 不循环。
    Off,
    /// 循环当前上下文 (专辑、歌单等)。
    Context,
    /// 单曲循环。
    Track,
}

impl RepeatMode {
    /// 点击循环按钮后应切换到的模式。
    ///
    /// `Off -> Context -> Track -> Off`。
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::Context,
            Self::Context => Self::Track,
            Self::Track => Self::Off,
        }
    }

    /// 循环按钮是否应高亮。
    pub fn is_active(self) -> bool {
        self != Self::Off
    }

    /// 后端使用的名称 (`off`、`context`、`track`)。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Context => "context",
            Self::Track => "track",
        }
    }

    /// 转换 SDK 的数字循环模式，未知值视为 `Off`。
    pub fn from_sdk(value: u8) -> Self {
        match value {
            1 => Self::Context,
            2 => Self::Track,
            _ => Self::Off,
        }
    }

    /// 解析后端的文本循环状态，未知值视为 `Off`。
    pub fn from_wire(value: &str) -> Self {
        match value {
            "context" => Self::Context,
            "track" => Self::Track,
            _ => Self::Off,
        }
    }
}

/// 快照的来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SnapshotOrigin {
    /// `player/current` 接口的响应。
    Poll,
    /// 播放 SDK 的 `stateChanged` 事件。
    Push,
    /// 本地构造，例如测试或嵌入方应用。
    Local,
}

/// 正在播放的曲目。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    /// 曲目在服务商处的 ID。
    pub id: String,
    /// 曲目标题。
    pub name: String,
    /// 艺术家名称，保持服务商给出的顺序。
    pub artist_names: Vec<String>,
    /// 专辑标题 (如果已知)。
    pub album_name: Option<String>,
    /// 专辑封面的 URL。
    pub artwork_url: Option<String>,
    /// 曲目时长 (毫秒)。
    pub duration_ms: u64,
}

/// 某一时刻的播放状态：在放什么、放到哪里。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    /// `None` 表示当前没有播放。
    pub track: Option<Track>,
    /// 播放位置 (毫秒)。
    pub position_ms: u64,
    /// 是否正在播放。
    pub is_playing: bool,
    /// 是否开启随机播放。
    pub shuffle_enabled: bool,
    /// 当前循环模式。
    pub repeat_mode: RepeatMode,
    /// 数据源采样该状态的时刻。
    #[serde(skip)]
    pub captured_at: Instant,
    /// 快照经由哪条路径到达。
    pub origin: SnapshotOrigin,
}

impl PlaybackSnapshot {
    /// 创建一个位于 0 位置、暂停、随机和循环均关闭的快照。
    pub fn new(track: Option<Track>, captured_at: Instant, origin: SnapshotOrigin) -> Self {
        Self {
            track,
            position_ms: 0,
            is_playing: false,
            shuffle_enabled: false,
            repeat_mode: RepeatMode::Off,
            captured_at,
            origin,
        }
    }

    /// 曲目时长，空闲时为 0。
    pub fn duration_ms(&self) -> u64 {
        self.track.as_ref().map_or(0, |t| t.duration_ms)
    }

    /// 返回 `position_ms` 被限制在 `[0, duration_ms]` 内的快照。
    ///
    /// 空闲快照的位置总是 0。
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.position_ms = self.position_ms.min(self.duration_ms());
        self
    }
}

/// 播放栏所有 UI 字段的值。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerView {
    /// 没有播放内容时为 `true`。
    pub is_idle: bool,
    /// 曲目标题，空闲时为占位文本。
    pub track_name: String,
    /// 以 `", "` 连接的艺术家名称。
    pub artist_line: String,
    /// 封面 URL，缺失时为占位图。
    pub artwork_url: String,
    /// 已播放/总时长以及进度条宽度。
    pub progress: ProgressView,
    /// 是否正在播放。
    pub is_playing: bool,
    /// 播放/暂停按钮的图标类名。
    pub play_pause_icon: &'static str,
    /// 随机按钮是否高亮。
    pub shuffle_active: bool,
    /// 循环按钮是否高亮。
    pub repeat_active: bool,
    /// 实际的循环模式。
    pub repeat_mode: RepeatMode,
    /// 下一次点击循环按钮将请求的模式。
    pub next_repeat_mode: RepeatMode,
}

/// [`PlayerView`] 中与时间/进度相关的部分，每次 tick 都会重绘。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    /// 显示的位置 (毫秒)。
    pub position_ms: u64,
    /// 曲目时长 (毫秒)。
    pub duration_ms: u64,
    /// `m:ss` 格式的已播放时间。
    pub elapsed: String,
    /// `m:ss` 格式的总时长。
    pub total: String,
    /// 进度条宽度百分比 (0.0 到 100.0)。
    pub progress_percent: f64,
}

/// 面向用户的提示的严重程度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    /// 普通信息。
    Info,
    /// 控制操作失败，会话仍可继续。
    Warning,
    /// 会话无法继续 (认证或账户问题)。
    Blocking,
}

/// 需要展示给用户的消息。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn blocking(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Blocking, message)
    }

    /// 该提示是否应阻塞 UI。
    pub fn is_blocking(&self) -> bool {
        self.level == NoticeLevel::Blocking
    }
}

/// 发送给播放器工作线程的命令。
///
/// 这是与工作线程交互的主要方式，通过 [`PlayerController`] 发送。
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    /// 继续播放。
    Play,
    /// 暂停播放。
    Pause,
    /// 正在播放时暂停，否则继续播放。
    TogglePlayPause,
    /// 切到下一首。
    Next,
    /// 回到上一首。
    Previous,
    /// 跳转到指定位置 (毫秒)。
    ///
    /// 显示的位置会立即移动，播放器随后跟上。
    SeekTo(u64),
    /// 开启或关闭随机播放。
    SetShuffle(bool),
    /// 切换当前的随机播放状态。
    ToggleShuffle,
    /// 设置指定的循环模式。
    SetRepeatMode(RepeatMode),
    /// 切换到下一个循环模式 (`off -> context -> track -> off`)。
    CycleRepeat,
    /// 开始播放一个 `spotify:` URI (曲目、专辑、艺术家或歌单)。
    StartUri(String),
    /// 为嵌入方的 SDK 桥接记录新的音量 (0.0 到 1.0)。
    SetVolume(f32),
    /// 从浏览器内播放 SDK 转发来的事件。
    Sdk(SdkEvent),
    /// 立即轮询一次后端。
    RequestUpdate,
    /// 关闭工作线程。
    Shutdown,
}

/// 播放器工作线程发布的更新。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum PlayerUpdate {
    /// 应用了新的权威快照，需要整体重绘。
    Render(PlayerView),
    /// 只有时间/进度字段发生了变化。
    Progress(ProgressView),
    /// 控制操作所路由到的 SDK 设备发生了变化。
    DeviceChanged(Option<String>),
    /// 记录的音量发生了变化。
    VolumeChanged(f32),
    /// 给用户的消息。
    Notice(Notice),
}

/// 其他 UI 处理器只读的会话数据。
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SessionInfo {
    pub(crate) device_id: Option<String>,
    pub(crate) volume: f32,
    pub(crate) terminated: bool,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            device_id: None,
            volume: 1.0,
            terminated: false,
        }
    }
}

pub(crate) type SharedSession = Arc<Mutex<SessionInfo>>;

/// 与播放器工作线程通信的句柄。
///
/// 所有控制器都被丢弃后，工作线程会自行关闭。
#[derive(Clone)]
pub struct PlayerController {
    /// [`PlayerCommand`] 的发送端。
    pub command_tx: mpsc::Sender<PlayerCommand>,
    pub(crate) session: SharedSession,
}

impl PlayerController {
    /// 向工作线程发送一条命令。
    pub async fn send(&self, command: PlayerCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(PlaybarError::from)
    }

    /// 关闭工作线程。
    pub async fn shutdown(&self) -> Result<()> {
        self.send(PlayerCommand::Shutdown).await
    }

    /// 控制操作所路由到的 SDK 设备 (如果已就绪)。
    pub fn device_id(&self) -> Result<Option<String>> {
        Ok(self.session.lock()?.device_id.clone())
    }

    /// 最近一次记录的音量。
    pub fn volume(&self) -> Result<f32> {
        Ok(self.session.lock()?.volume)
    }

    /// 会话是否因认证或账户错误而终止。
    pub fn is_terminated(&self) -> Result<bool> {
        Ok(self.session.lock()?.terminated)
    }
}
