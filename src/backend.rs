//! 代理流媒体播放器 API 的后端 REST 客户端。

use std::future::Future;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url, header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::time::Instant;

use crate::{
    api::{PlaybackSnapshot, RepeatMode, SnapshotOrigin, Track},
    config::WorkerConfig,
    error::{PlaybarError, Result},
    utils::is_playable_uri,
};

const CURRENT_PATH: &str = "player/current/";
const CSRF_HEADER: &str = "X-CSRFToken";
/// 播放栏显示效果最好的封面宽度。
const ARTWORK_TARGET_WIDTH: u32 = 300;

/// 后端能理解的控制操作。
#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    Play,
    Pause,
    Next,
    Previous,
    /// 位置 (毫秒)。
    Seek(u64),
    Shuffle(bool),
    Repeat(RepeatMode),
    /// 开始播放一个 `spotify:` URI。
    StartUri(String),
}

impl ControlAction {
    /// 操作的路由，相对于后端根路径。
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Play | Self::StartUri(_) => "player/play/",
            Self::Pause => "player/pause/",
            Self::Next => "player/next/",
            Self::Previous => "player/previous/",
            Self::Seek(_) => "player/seek/",
            Self::Shuffle(_) => "player/shuffle/",
            Self::Repeat(_) => "player/repeat/",
        }
    }

    /// 操作的 JSON 请求体。只有已知 `device_id` 时才会包含它。
    pub fn body(&self, device_id: Option<&str>) -> Value {
        let mut body = Map::new();
        match self {
            Self::Seek(position_ms) => {
                body.insert("position_ms".into(), json!(position_ms));
            }
            Self::Shuffle(state) => {
                body.insert("state".into(), json!(state));
            }
            Self::Repeat(mode) => {
                body.insert("state".into(), json!(mode.as_str()));
            }
            Self::StartUri(uri) => {
                body.insert("uri".into(), json!(uri));
            }
            Self::Play | Self::Pause | Self::Next | Self::Previous => {}
        }
        if let Some(device_id) = device_id {
            body.insert("device_id".into(), json!(device_id));
        }
        Value::Object(body)
    }

    /// 在发出请求之前校验操作。
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::StartUri(uri) if !is_playable_uri(uri) => {
                Err(PlaybarError::InvalidUri(uri.clone()))
            }
            _ => Ok(()),
        }
    }

    /// 在通知中使用的可读名称。
    pub fn label(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Next => "next track",
            Self::Previous => "previous track",
            Self::Seek(_) => "seek",
            Self::Shuffle(_) => "shuffle",
            Self::Repeat(_) => "repeat",
            Self::StartUri(_) => "start playback",
        }
    }
}

/// 权威快照的来源，也是控制操作的接收方。
///
/// [`HttpBackend`] 是生产环境的实现。工作线程在 `LocalSet` 上驱动这些
/// future，所以它们不需要是 `Send`。
pub trait PlaybackBackend {
    /// 获取当前播放状态。"没有播放"是一个不含曲目的快照，而不是错误。
    fn current(&self) -> impl Future<Output = Result<PlaybackSnapshot>>;

    /// 执行 `action`，给出 `device_id` 时发往该设备。
    fn control(
        &self,
        action: &ControlAction,
        device_id: Option<&str>,
    ) -> impl Future<Output = Result<()>>;
}

/// 基于 `reqwest` 的 HTTP [`PlaybackBackend`]。
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    csrf_token: Option<String>,
    session_cookie: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| PlaybarError::InvalidConfig(format!("base_url {base:?}: {e}")))?;
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            base_url,
            csrf_token: config.csrf_token.clone(),
            session_cookie: config.session_cookie.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PlaybarError::InvalidConfig(format!("cannot build route {path:?}: {e}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.csrf_token {
            builder = builder.header(CSRF_HEADER, token);
        }
        if let Some(cookie) = &self.session_cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder
    }
}

impl PlaybackBackend for HttpBackend {
    async fn current(&self) -> Result<PlaybackSnapshot> {
        let url = self.endpoint(CURRENT_PATH)?;
        let request_start = Instant::now();
        let response = self.request(Method::GET, url).send().await?;
        // 状态是在请求与响应之间的某个时刻采样的
        let captured_at = request_start + request_start.elapsed() / 2;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            log::trace!("[Backend] 当前没有播放 (204)。");
            return Ok(PlaybackSnapshot::new(None, captured_at, SnapshotOrigin::Poll));
        }
        if !status.is_success() {
            return Err(error_for_status(response).await);
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(PlaybackSnapshot::new(None, captured_at, SnapshotOrigin::Poll));
        }
        let payload: CurrentPlaybackPayload = serde_json::from_slice(&body)?;
        Ok(payload.into_snapshot(captured_at))
    }

    async fn control(&self, action: &ControlAction, device_id: Option<&str>) -> Result<()> {
        action.validate()?;
        let url = self.endpoint(action.endpoint())?;
        let response = self
            .request(Method::POST, url)
            .json(&action.body(device_id))
            .send()
            .await?;

        if response.status().is_success() {
            log::debug!("[Backend] {action:?} 已被接受 ({})。", response.status());
            Ok(())
        } else {
            Err(error_for_status(response).await)
        }
    }
}

/// 将非 2xx 状态码映射为错误。
///
/// `401` 表示后端没有该用户的有效凭据。`403` 只有在消息提到 premium 时
/// 才映射为终止性的 [`PlaybarError::UnsupportedAccount`]，其余 403
/// 与其他状态码一样是可重试的 [`PlaybarError::Network`]。
pub(crate) fn classify_status(status: StatusCode, message: String) -> PlaybarError {
    match status {
        StatusCode::UNAUTHORIZED => PlaybarError::Auth(if message.is_empty() {
            "the streaming account is not connected".to_string()
        } else {
            message
        }),
        StatusCode::FORBIDDEN if requires_premium(&message) => {
            PlaybarError::UnsupportedAccount(message)
        }
        _ => PlaybarError::Network {
            status: status.as_u16(),
            message,
        },
    }
}

/// 403 也用于普通的指令拒绝 (如 "Restriction violated")，只有提到 premium 的才是账户问题。
fn requires_premium(message: &str) -> bool {
    message.to_ascii_lowercase().contains("premium")
}

async fn error_for_status(response: Response) -> PlaybarError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = extract_error_message(&text).unwrap_or_else(|| text.trim().to_string());
    log::debug!("[Backend] 请求失败，状态码 {status}: {message}");
    classify_status(status, message)
}

/// 从 `{"error": "..."}`、`{"error": {"message": "..."}}` 或
/// `{"message": "..."}` 中提取错误文本。
fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error") {
        Some(Value::String(message)) => return Some(message.clone()),
        Some(Value::Object(inner)) => {
            if let Some(Value::String(message)) = inner.get("message") {
                return Some(message.clone());
            }
        }
        _ => {}
    }
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// 选出宽度最接近 `target` 的图片。
///
/// 没有宽度的图片按宽度 0 计算，距离相同时取第一个。
pub(crate) fn pick_image_url(images: &[ImagePayload], target: u32) -> Option<String> {
    images
        .iter()
        .min_by_key(|img| img.width.unwrap_or(0).abs_diff(target))
        .map(|img| img.url.clone())
}

/// `player/current/` 的响应体。
#[derive(Debug, Deserialize)]
struct CurrentPlaybackPayload {
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    progress_ms: Option<u64>,
    #[serde(default)]
    shuffle_state: bool,
    #[serde(default)]
    repeat_state: Option<String>,
    #[serde(default)]
    item: Option<ItemPayload>,
}

#[derive(Debug, Deserialize)]
struct ItemPayload {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    album: Option<AlbumPayload>,
    #[serde(default)]
    artists: Vec<ArtistPayload>,
}

#[derive(Debug, Deserialize)]
struct AlbumPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    images: Vec<ImagePayload>,
}

#[derive(Debug, Deserialize)]
struct ArtistPayload {
    name: String,
}

/// 后端和 SDK 共用的封面条目格式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl CurrentPlaybackPayload {
    fn into_snapshot(self, captured_at: Instant) -> PlaybackSnapshot {
        let Some(item) = self.item else {
            return PlaybackSnapshot::new(None, captured_at, SnapshotOrigin::Poll);
        };

        let (album_name, artwork_url) = match item.album {
            Some(album) => (
                album.name,
                pick_image_url(&album.images, ARTWORK_TARGET_WIDTH),
            ),
            None => (None, None),
        };
        let track = Track {
            id: item.id.unwrap_or_default(),
            name: item.name,
            artist_names: item.artists.into_iter().map(|a| a.name).collect(),
            album_name,
            artwork_url,
            duration_ms: item.duration_ms,
        };

        PlaybackSnapshot {
            track: Some(track),
            position_ms: self.progress_ms.unwrap_or(0),
            is_playing: self.is_playing,
            shuffle_enabled: self.shuffle_state,
            repeat_mode: self
                .repeat_state
                .as_deref()
                .map_or(RepeatMode::Off, RepeatMode::from_wire),
            captured_at,
            origin: SnapshotOrigin::Poll,
        }
        .clamped()
    }
}
