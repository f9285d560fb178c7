use std::time::Duration;

use serde::Deserialize;

use crate::error::{PlaybarError, Result};

/// 未配置时使用的后端根地址。
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/spotify/";

/// 播放器工作线程及其 HTTP 后端的配置。
///
/// 可以从 JSON 反序列化 (缺失的键取默认值)，也可以通过
/// [`WorkerConfig::from_env`] 从 `PLAYBAR_*` 环境变量读取。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 后端播放器路由的根地址，`player/current/` 等路径拼接在其后。
    pub base_url: String,
    /// 每个控制操作都会以 `X-CSRFToken` 头发送。
    pub csrf_token: Option<String>,
    /// 原样作为 `Cookie` 头发送 (后端会话)。
    pub session_cookie: Option<String>,
    /// 兜底轮询的间隔。
    pub poll_interval_ms: u64,
    /// 本地进度计时器的周期，每次 tick 推进同样的时长。
    pub tick_interval_ms: u64,
    /// 控制操作成功后到刷新轮询之间的延迟。
    pub refresh_delay_ms: u64,
    /// 单次后端请求的超时时长。
    pub request_timeout_ms: u64,
    /// SDK 设备推送状态时是否继续轮询。
    pub poll_while_push_active: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            csrf_token: None,
            session_cookie: None,
            poll_interval_ms: 5_000,
            tick_interval_ms: 1_000,
            refresh_delay_ms: 500,
            request_timeout_ms: 10_000,
            poll_while_push_active: false,
        }
    }
}

impl WorkerConfig {
    /// 从环境变量读取配置。
    ///
    /// 支持的变量： `PLAYBAR_BASE_URL`, `PLAYBAR_CSRF_TOKEN`,
    /// `PLAYBAR_SESSION_COOKIE`, `PLAYBAR_POLL_INTERVAL_MS`,
    /// `PLAYBAR_TICK_INTERVAL_MS`, `PLAYBAR_REFRESH_DELAY_MS`,
    /// `PLAYBAR_REQUEST_TIMEOUT_MS` 和 `PLAYBAR_POLL_WHILE_PUSH_ACTIVE`。
    /// 未设置的变量保持默认值。
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 解析 JSON 文档，缺失的键保持默认值。
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup("PLAYBAR_BASE_URL") {
            config.base_url = url;
        }
        config.csrf_token = lookup("PLAYBAR_CSRF_TOKEN").or(config.csrf_token);
        config.session_cookie = lookup("PLAYBAR_SESSION_COOKIE").or(config.session_cookie);

        let parse_ms = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw.trim().parse().map_err(|e| {
                    PlaybarError::InvalidConfig(format!("{key}={raw:?} is not a number: {e}"))
                }),
                None => Ok(default),
            }
        };
        config.poll_interval_ms = parse_ms("PLAYBAR_POLL_INTERVAL_MS", config.poll_interval_ms)?;
        config.tick_interval_ms = parse_ms("PLAYBAR_TICK_INTERVAL_MS", config.tick_interval_ms)?;
        config.refresh_delay_ms = parse_ms("PLAYBAR_REFRESH_DELAY_MS", config.refresh_delay_ms)?;
        config.request_timeout_ms =
            parse_ms("PLAYBAR_REQUEST_TIMEOUT_MS", config.request_timeout_ms)?;

        if let Some(raw) = lookup("PLAYBAR_POLL_WHILE_PUSH_ACTIVE") {
            config.poll_while_push_active = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(PlaybarError::InvalidConfig(format!(
                        "PLAYBAR_POLL_WHILE_PUSH_ACTIVE={other:?} is not a boolean"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// 拒绝为 0 的间隔，否则工作循环会空转。
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("tick_interval_ms", self.tick_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(PlaybarError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
