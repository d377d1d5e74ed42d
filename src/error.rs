//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.
//!
//! 非法的状态转换不是错误：`transition_to` 通过返回 `false` 表示。
//! Invalid state transitions are not errors: `transition_to` reports them by returning `false`.

use crate::{
    identity::{ConnectionId, UserId},
    state::ConnectionState,
};
use std::time::Duration;
use thiserror::Error;

/// The primary error type for the connection lifecycle library.
/// 连接生命周期库的主要错误类型。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A connection id was registered again by a different user.
    /// 同一个连接ID被另一个用户重复注册。
    #[error(
        "connection {connection_id} is already registered to user {registered_user}, \
         refusing registration for user {requested_user}"
    )]
    UserMismatch {
        connection_id: ConnectionId,
        registered_user: UserId,
        requested_user: UserId,
    },

    /// No state machine is registered for the connection.
    /// 该连接没有注册状态机。
    #[error("no state machine registered for connection {0}")]
    ConnectionNotFound(ConnectionId),

    /// The connection reached a terminal state before becoming operational.
    /// 连接在进入可运行状态之前已到达终止状态。
    #[error("connection {connection_id} terminated in state {state} before becoming ready")]
    ConnectionTerminated {
        connection_id: ConnectionId,
        state: ConnectionState,
    },

    /// The connection did not become operational in time and has been force-failed.
    ///
    /// 连接未能在规定时间内进入可运行状态，已被强制置为失败。
    #[error("connection {connection_id} was not ready after {waited:?}")]
    ReadinessTimeout {
        connection_id: ConnectionId,
        waited: Duration,
    },
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;
