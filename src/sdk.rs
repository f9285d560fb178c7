//! 浏览器内播放 SDK 的事件。
//!
//! SDK 运行在页面中；嵌入方的桥接层将其监听回调以 [`SdkEvent`] 值或
//! `{"type": "stateChanged", "payload": {...}}` 形式的 JSON 转发过来。
//! 使用方通过 [`SdkEventHandler`] 处理表和 [`dispatch`] 响应这些事件。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{
    api::{PlaybackSnapshot, RepeatMode, SnapshotOrigin, Track},
    backend::pick_image_url,
    error::Result,
};

/// 一次 SDK 监听回调。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum SdkEvent {
    /// SDK 播放器已连接，可通过 `device_id` 寻址。
    Ready { device_id: String },
    /// 设备已离线。
    NotReady { device_id: String },
    /// 播放状态变化；播放器不再有状态时为 `None`。
    StateChanged(Option<SdkPlaybackState>),
    /// SDK 初始化失败 (环境不受支持)。
    InitializationError { message: String },
    /// 访问令牌被拒绝。
    AuthenticationError { message: String },
    /// 该账户无法使用 SDK (非 premium)。
    AccountError { message: String },
    /// 播放曲目失败。
    PlaybackError { message: String },
}

impl SdkEvent {
    /// 解析桥接层以 JSON 转发的事件。
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 该事件在 SDK 中的监听器名称。
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::NotReady { .. } => "not_ready",
            Self::StateChanged(_) => "player_state_changed",
            Self::InitializationError { .. } => "initialization_error",
            Self::AuthenticationError { .. } => "authentication_error",
            Self::AccountError { .. } => "account_error",
            Self::PlaybackError { .. } => "playback_error",
        }
    }
}

/// 设备时钟换算出的采样年龄上限，超过时视为两端时钟不一致，按"刚刚采样"处理。
const MAX_SAMPLE_AGE: Duration = Duration::from_secs(2);

/// SDK 的播放状态对象，只保留播放栏用到的字段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkPlaybackState {
    pub paused: bool,
    /// `timestamp` 时刻的位置 (毫秒)。
    pub position: u64,
    /// 曲目时长 (毫秒)。
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub shuffle: bool,
    /// `0` 关闭，`1` 上下文循环，`2` 单曲循环。
    #[serde(default)]
    pub repeat_mode: u8,
    /// 采样 `position` 时设备本地的纪元毫秒数。
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub track_window: SdkTrackWindow,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdkTrackWindow {
    #[serde(default)]
    pub current_track: Option<SdkTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkTrack {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub artists: Vec<SdkArtist>,
    #[serde(default)]
    pub album: Option<SdkAlbum>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkArtist {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkAlbum {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub images: Vec<crate::backend::ImagePayload>,
}

impl SdkPlaybackState {
    /// 将 SDK 状态转换为快照。
    ///
    /// 设备时钟经由墙上时钟映射到单调时钟：设备时间 300ms 前采样的状态得到
    /// `captured_at = now - 300ms`。来自未来的时间戳，以及年龄超过
    /// [`MAX_SAMPLE_AGE`] 的时间戳 (两端时钟不一致) 都按 "现在" 处理。
    pub fn into_snapshot(self, now: Instant, wall_now: DateTime<Utc>) -> PlaybackSnapshot {
        let captured_at = self
            .timestamp
            .and_then(|ts| u64::try_from(wall_now.timestamp_millis().saturating_sub(ts)).ok())
            .map(Duration::from_millis)
            .filter(|age| *age <= MAX_SAMPLE_AGE)
            .and_then(|age| now.checked_sub(age))
            .unwrap_or(now);

        let state_duration = self.duration;
        let track = self.track_window.current_track.map(|t| {
            let (album_name, artwork_url) = match t.album {
                Some(album) => (album.name, pick_image_url(&album.images, 300)),
                None => (None, None),
            };
            Track {
                id: t.id.unwrap_or_default(),
                name: t.name,
                artist_names: t.artists.into_iter().map(|a| a.name).collect(),
                album_name,
                artwork_url,
                duration_ms: if state_duration > 0 {
                    state_duration
                } else {
                    t.duration_ms.unwrap_or(0)
                },
            }
        });

        PlaybackSnapshot {
            track,
            position_ms: self.position,
            is_playing: !self.paused,
            shuffle_enabled: self.shuffle,
            repeat_mode: RepeatMode::from_sdk(self.repeat_mode),
            captured_at,
            origin: SnapshotOrigin::Push,
        }
        .clamped()
    }
}

/// SDK 事件的类型化处理表，每个监听器对应一个方法。
pub trait SdkEventHandler {
    fn on_ready(&mut self, device_id: String);
    fn on_not_ready(&mut self, device_id: String);
    fn on_state_changed(&mut self, state: Option<SdkPlaybackState>);
    fn on_initialization_error(&mut self, message: String);
    fn on_authentication_error(&mut self, message: String);
    fn on_account_error(&mut self, message: String);
    fn on_playback_error(&mut self, message: String);
}

/// 将 `event` 分发给 `handler` 中对应的方法。
pub fn dispatch<H: SdkEventHandler + ?Sized>(event: SdkEvent, handler: &mut H) {
    log::trace!("[SDK] 正在分发 {}", event.name());
    match event {
        SdkEvent::Ready { device_id } => handler.on_ready(device_id),
        SdkEvent::NotReady { device_id } => handler.on_not_ready(device_id),
        SdkEvent::StateChanged(state) => handler.on_state_changed(state),
        SdkEvent::InitializationError { message } => handler.on_initialization_error(message),
        SdkEvent::AuthenticationError { message } => handler.on_authentication_error(message),
        SdkEvent::AccountError { message } => handler.on_account_error(message),
        SdkEvent::PlaybackError { message } => handler.on_playback_error(message),
    }
}
