//! 连接状态转换记录与观察者模块
//! Connection State Transition Record and Observer Module
//!
//! 该模块定义不可变的转换记录、状态变化回调以及回调集合。
//! 回调以集合语义保存：同一个回调重复注册只保留一份。
//!
//! This module defines the immutable transition record, state change callbacks
//! and the callback set. Callbacks are kept with set semantics: registering the
//! same callback twice keeps a single entry.

use crate::{identity::ConnectionId, state::ConnectionState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::error;

/// 转换附带的自由格式元数据
/// Free-form metadata attached to a transition
pub type TransitionMetadata = BTreeMap<String, String>;

/// 状态变化回调类型定义
/// State change callback type definition
///
/// 回调的身份由 `Arc` 的分配决定，克隆得到的 `Arc` 视为同一个回调。
/// A callback's identity is its `Arc` allocation; clones of the `Arc` are the same callback.
pub type StateChangeCallback = Arc<dyn Fn(&TransitionRecord) + Send + Sync>;

/// 一次已完成的状态转换
/// One realized state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    from_state: ConnectionState,
    to_state: ConnectionState,
    timestamp: DateTime<Utc>,
    reason: Option<String>,
    metadata: TransitionMetadata,
    emergency: bool,
}

impl TransitionRecord {
    pub(crate) fn new(
        from_state: ConnectionState,
        to_state: ConnectionState,
        reason: Option<String>,
        metadata: TransitionMetadata,
    ) -> Self {
        Self {
            from_state,
            to_state,
            timestamp: Utc::now(),
            reason,
            metadata,
            emergency: false,
        }
    }

    pub(crate) fn emergency(
        from_state: ConnectionState,
        reason: String,
        metadata: TransitionMetadata,
    ) -> Self {
        Self {
            emergency: true,
            ..Self::new(from_state, ConnectionState::Failed, Some(reason), metadata)
        }
    }

    pub fn from_state(&self) -> ConnectionState {
        self.from_state
    }

    pub fn to_state(&self) -> ConnectionState {
        self.to_state
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn metadata(&self) -> &TransitionMetadata {
        &self.metadata
    }

    /// 是否为绕过转换表的紧急转换
    /// Whether this was an emergency transition that bypassed the table
    pub fn is_emergency(&self) -> bool {
        self.emergency
    }
}

/// 回调集合
/// Callback set
#[derive(Default)]
pub(crate) struct CallbackSet {
    callbacks: Vec<StateChangeCallback>,
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("callbacks_count", &self.callbacks.len())
            .finish()
    }
}

fn same_callback(a: &StateChangeCallback, b: &StateChangeCallback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl CallbackSet {
    /// 添加回调，已存在时返回 `false`
    /// Add a callback, returns `false` if it is already present
    pub(crate) fn insert(&mut self, callback: StateChangeCallback) -> bool {
        if self.callbacks.iter().any(|c| same_callback(c, &callback)) {
            return false;
        }
        self.callbacks.push(callback);
        true
    }

    /// 移除回调，返回是否存在
    /// Remove a callback, returns whether it was present
    pub(crate) fn remove(&mut self, callback: &StateChangeCallback) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|c| !same_callback(c, callback));
        self.callbacks.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// 获取当前回调的快照，用于在锁外调用
    /// Snapshot the current callbacks so they can be invoked outside the lock
    pub(crate) fn snapshot(&self) -> Vec<StateChangeCallback> {
        self.callbacks.clone()
    }
}

/// 依次调用所有回调，单个回调的panic被捕获并记录，不影响其他回调
/// Invoke every callback in order; a panicking callback is caught and logged
/// without affecting the others
pub(crate) fn notify_all(
    connection_id: &ConnectionId,
    record: &TransitionRecord,
    callbacks: &[StateChangeCallback],
) -> usize {
    let mut faults = 0;
    for (index, callback) in callbacks.iter().enumerate() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(record))) {
            faults += 1;
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            error!(
                connection_id = %connection_id,
                callback_index = index,
                from = %record.from_state(),
                to = %record.to_state(),
                panic = %message,
                "State change callback panicked"
            );
        }
    }
    faults
}
