/// 将毫秒格式化为 `m:ss`。
///
/// 分钟不补零，超过 59 也继续累加 (长混音会显示为 `75:03`)；秒总是两位。
pub fn format_time(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{minutes}:{seconds:02}")
}

/// 进度条宽度的百分比。
///
/// 时长为 0 时返回 0 而不是 `NaN`，结果不会超过 100。
pub fn progress_percent(position_ms: u64, duration_ms: u64) -> f64 {
    if duration_ms == 0 {
        return 0.0;
    }
    let ratio = position_ms.min(duration_ms) as f64 / duration_ms as f64;
    ratio * 100.0
}

/// 按播放栏的显示方式连接艺术家名称。
///
/// 空白名称会被跳过，不完整的 SDK 数据不会留下多余的分隔符。
pub fn join_artist_names(names: &[String]) -> String {
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `uri` 是否是可播放的 `spotify:` URI。
///
/// 类型段和 ID 都必须存在：`spotify:track:abc` 可以，`spotify:` 不行。
pub fn is_playable_uri(uri: &str) -> bool {
    let mut parts = uri.splitn(3, ':');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some("spotify"), Some(kind), Some(id)) if !kind.is_empty() && !id.is_empty()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_padded_seconds() {
        assert_eq!(format_time(0), "0:00");
        assert_eq!(format_time(3_000), "0:03");
        assert_eq!(format_time(200_000), "3:20");
        assert_eq!(format_time(4_503_999), "75:03");
    }

    #[test]
    fn progress_handles_zero_duration_and_overshoot() {
        assert_eq!(progress_percent(3_000, 0), 0.0);
        assert!((progress_percent(3_000, 200_000) - 1.5).abs() < 1e-9);
        assert_eq!(progress_percent(500_000, 200_000), 100.0);
    }

    #[test]
    fn artist_names_skip_blanks() {
        let names = vec!["Daft Punk".to_string(), " ".to_string(), "Pharrell".to_string()];
        assert_eq!(join_artist_names(&names), "Daft Punk, Pharrell");
        assert_eq!(join_artist_names(&[]), "");
    }

    #[test]
    fn playable_uri_requires_kind_and_id() {
        assert!(is_playable_uri("spotify:track:0VjIjW4GlUZAMYd2vXMi3b"));
        assert!(is_playable_uri("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M"));
        assert!(!is_playable_uri("spotify:"));
        assert!(!is_playable_uri("spotify:track:"));
        assert!(!is_playable_uri("https://open.spotify.com/track/abc"));
    }
}
