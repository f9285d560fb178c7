use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

use crate::api::PlayerCommand;

/// 定义库的统一错误枚举。
#[derive(Debug, Error)]
pub enum PlaybarError {
    /// 后端返回了非 2xx 状态，且既不是认证问题也不是账户问题。
    #[error("backend request failed with status {status}: {message}")]
    Network {
        /// 后端返回的 HTTP 状态码。
        status: u16,
        /// 从响应体中提取的错误信息 (如果有)。
        message: String,
    },

    /// 请求没有得到任何响应 (连接被拒绝、超时等)。
    ///
    /// 封装了 `reqwest::Error`。
    #[error("HTTP transport failure: {0}")]
    Http(#[from] reqwest::Error),

    /// 会话对应的凭据缺失、过期或无效。
    #[error("authentication failed: {0}")]
    Auth(String),

    /// 该流媒体账户不支持远程控制 (非 premium)。
    #[error("account not supported: {0}")]
    UnsupportedAccount(String),

    /// 无法解码响应或 SDK 数据。
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// 传给 `StartUri` 的不是 `spotify:` URI。
    #[error("invalid playback URI: {0}")]
    InvalidUri(String),

    /// 配置值格式错误。
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// 会话遇到了终止性错误，不再接受控制操作。
    #[error("session terminated, control actions are disabled")]
    SessionTerminated,

    /// 无法启动后台工作线程。
    #[error("failed to start worker thread: {0}")]
    WorkerThread(String),

    /// 创建 Tokio 异步运行时失败。
    #[error("failed to create Tokio runtime: {0}")]
    TokioRuntime(#[from] std::io::Error),

    /// 向工作线程发送命令失败。
    ///
    /// 这通常意味着后台工作线程已经关闭。
    #[error("failed to send command to the worker")]
    CommandSend(#[from] SendError<PlayerCommand>),

    /// 在工作线程仍在运行时再次调用了 `PlayerManager::start()`。
    #[error("player worker is already running")]
    AlreadyRunning,

    /// 锁已被毒化。
    #[error("lock poisoned: {0}")]
    MutexPoisoned(String),
}

impl PlaybarError {
    /// 该错误是否会终止会话。
    ///
    /// 终止性错误会以阻塞提示的形式呈现，并停止轮询、计时和后续的所有控制操作。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::UnsupportedAccount(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for PlaybarError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PlaybarError::MutexPoisoned(err.to_string())
    }
}

/// 库内通用的 `Result` 别名。
pub type Result<T> = std::result::Result<T, PlaybarError>;
