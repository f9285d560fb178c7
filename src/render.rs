//! 将播放快照映射为播放栏的各个字段值。
//!
//! 这里全部是纯函数，不涉及网络和计时器。

use crate::{
    api::{PlaybackSnapshot, PlayerView, ProgressView, RepeatMode},
    utils::{format_time, join_artist_names, progress_percent},
};

/// 没有播放时显示的曲目标题。
pub const IDLE_TRACK_NAME: &str = "No track";
/// 曲目没有封面或处于空闲时显示的图片。
pub const PLACEHOLDER_ARTWORK_URL: &str = "https://via.placeholder.com/56";
/// 播放中时播放/暂停按钮的图标类名。
pub const ICON_PAUSE: &str = "fas fa-pause";
/// 暂停或空闲时播放/暂停按钮的图标类名。
pub const ICON_PLAY: &str = "fas fa-play";

/// 渲染完整的播放栏。
///
/// `None` 或没有曲目的快照会渲染为空闲状态。
pub fn render(snapshot: Option<&PlaybackSnapshot>) -> PlayerView {
    let Some((snapshot, track)) = snapshot.and_then(|s| s.track.as_ref().map(|t| (s, t))) else {
        return idle_view();
    };

    let repeat_mode = snapshot.repeat_mode;
    PlayerView {
        is_idle: false,
        track_name: track.name.clone(),
        artist_line: join_artist_names(&track.artist_names),
        artwork_url: track
            .artwork_url
            .clone()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| PLACEHOLDER_ARTWORK_URL.to_string()),
        progress: render_progress(snapshot),
        is_playing: snapshot.is_playing,
        play_pause_icon: if snapshot.is_playing {
            ICON_PAUSE
        } else {
            ICON_PLAY
        },
        shuffle_active: snapshot.shuffle_enabled,
        repeat_active: repeat_mode.is_active(),
        repeat_mode,
        next_repeat_mode: repeat_mode.next(),
    }
}

/// 只渲染时间和进度字段。
pub fn render_progress(snapshot: &PlaybackSnapshot) -> ProgressView {
    let duration_ms = snapshot.duration_ms();
    let position_ms = snapshot.position_ms.min(duration_ms);
    ProgressView {
        position_ms,
        duration_ms,
        elapsed: format_time(position_ms),
        total: format_time(duration_ms),
        progress_percent: progress_percent(position_ms, duration_ms),
    }
}

fn idle_view() -> PlayerView {
    PlayerView {
        is_idle: true,
        track_name: IDLE_TRACK_NAME.to_string(),
        artist_line: String::new(),
        artwork_url: PLACEHOLDER_ARTWORK_URL.to_string(),
        progress: ProgressView {
            position_ms: 0,
            duration_ms: 0,
            elapsed: format_time(0),
            total: format_time(0),
            progress_percent: 0.0,
        },
        is_playing: false,
        play_pause_icon: ICON_PLAY,
        shuffle_active: false,
        repeat_active: false,
        repeat_mode: RepeatMode::Off,
        next_repeat_mode: RepeatMode::Off.next(),
    }
}
