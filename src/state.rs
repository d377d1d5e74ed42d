//! 定义WebSocket连接的就绪状态及其分类。
//! Defines the readiness states of a WebSocket connection and their classification.
//!
//! 传输层的"已接受"并不等于应用层的"就绪"：只有可运行状态才允许处理消息。
//! Transport-level "accepted" is not application-level "ready": only operational
//! states permit message processing.

use serde::Serialize;
use std::{fmt, str::FromStr};

/// The lifecycle state of a connection.
/// 连接的生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// The transport handshake is in progress.
    /// 传输层握手进行中。
    Connecting,
    /// The transport has accepted the connection.
    /// 传输层已接受连接。
    Accepted,
    /// The user behind the connection has been authenticated.
    /// 连接背后的用户已通过认证。
    Authenticated,
    /// Dependent services (database, cache, model clients) are initialized.
    /// 依赖服务（数据库、缓存、模型客户端）已初始化。
    ServicesReady,
    /// The application may process messages.
    /// 应用程序可以处理消息。
    ProcessingReady,
    /// A message is being processed.
    /// 正在处理消息。
    Processing,
    /// Ready, with no message in flight.
    /// 已就绪，没有正在处理的消息。
    Idle,
    /// Some services failed; reduced functionality.
    /// 部分服务失败，功能受限。
    Degraded,
    /// Services are being re-established.
    /// 正在重新建立服务。
    Reconnecting,
    /// The connection is shutting down.
    /// 连接正在关闭。
    Closing,
    /// The connection is closed.
    /// 连接已关闭。
    Closed,
    /// The connection failed. Only a retry back to `Connecting` is possible.
    /// 连接失败。只能重试回到 `Connecting`。
    Failed,
}

impl ConnectionState {
    /// All states in declaration order.
    /// 按声明顺序排列的所有状态。
    pub const ALL: [ConnectionState; 12] = [
        ConnectionState::Connecting,
        ConnectionState::Accepted,
        ConnectionState::Authenticated,
        ConnectionState::ServicesReady,
        ConnectionState::ProcessingReady,
        ConnectionState::Processing,
        ConnectionState::Idle,
        ConnectionState::Degraded,
        ConnectionState::Reconnecting,
        ConnectionState::Closing,
        ConnectionState::Closed,
        ConnectionState::Failed,
    ];

    /// 获取状态的字符串表示
    /// Gets the string representation of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Accepted => "ACCEPTED",
            ConnectionState::Authenticated => "AUTHENTICATED",
            ConnectionState::ServicesReady => "SERVICES_READY",
            ConnectionState::ProcessingReady => "PROCESSING_READY",
            ConnectionState::Processing => "PROCESSING",
            ConnectionState::Idle => "IDLE",
            ConnectionState::Degraded => "DEGRADED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state name.
/// 解析未知状态名称时返回的错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown connection state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for ConnectionState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseStateError(s.to_owned()))
    }
}

/// 检查状态是否允许处理消息
/// Check if the state permits message processing
pub fn is_operational(state: ConnectionState) -> bool {
    matches!(
        state,
        ConnectionState::ProcessingReady
            | ConnectionState::Processing
            | ConnectionState::Idle
            | ConnectionState::Degraded
    )
}

/// 检查状态是否仍处于建立阶段
/// Check if the state is still in the setup phase
pub fn is_setup_phase(state: ConnectionState) -> bool {
    matches!(
        state,
        ConnectionState::Connecting
            | ConnectionState::Accepted
            | ConnectionState::Authenticated
            | ConnectionState::ServicesReady
    )
}

/// 检查状态是否为终止状态
/// Check if the state is terminal
pub fn is_terminal(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Closed | ConnectionState::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_partitions() {
        for state in ConnectionState::ALL {
            let classes = [is_operational(state), is_setup_phase(state), is_terminal(state)];
            assert!(
                classes.iter().filter(|c| **c).count() <= 1,
                "{state} belongs to more than one class"
            );
        }

        assert!(!is_operational(ConnectionState::Reconnecting));
        assert!(!is_setup_phase(ConnectionState::Reconnecting));
        assert!(!is_terminal(ConnectionState::Closing));
        assert!(is_operational(ConnectionState::Degraded));
        assert!(is_setup_phase(ConnectionState::ServicesReady));
        assert!(is_terminal(ConnectionState::Failed));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectionState::ProcessingReady.to_string(), "PROCESSING_READY");
        assert_eq!(
            "services_ready".parse::<ConnectionState>(),
            Ok(ConnectionState::ServicesReady)
        );
        assert_eq!(
            "bogus".parse::<ConnectionState>(),
            Err(ParseStateError("bogus".to_string()))
        );
        for state in ConnectionState::ALL {
            assert_eq!(state.as_str().parse::<ConnectionState>(), Ok(state));
        }
    }

    #[test]
    fn test_serializes_as_display_name() {
        let json = serde_json::to_string(&ConnectionState::ServicesReady).unwrap();
        assert_eq!(json, "\"SERVICES_READY\"");
    }
}
