//! 连接状态机 - 统一管理单个连接从接受到就绪的完整生命周期
//! Connection State Machine - Unified management of one connection's lifecycle
//! from transport acceptance to application readiness
//!
//! 所有状态修改都经过 `transition_to` 的验证，`force_fail` 是唯一的紧急出口。
//! 提交在状态机锁内完成；回调在锁外按提交顺序调用，因此回调可以重新进入状态机。
//!
//! Every state mutation goes through the validated `transition_to`; `force_fail`
//! is the only emergency escape hatch. Commits happen under the machine lock;
//! callbacks run outside the lock in commit order, so they may re-enter the machine.

use super::{
    metrics::StateMachineMetrics,
    transitions::{CallbackSet, StateChangeCallback, TransitionMetadata, TransitionRecord, notify_all},
    validation::StateValidator,
};
use crate::{
    config::StateMachineConfig,
    error::{Error, Result},
    identity::{ConnectionId, UserId},
    state::{self, ConnectionState},
};
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// 受状态机锁保护的可变部分
/// Mutable part guarded by the machine lock
#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    history: Vec<TransitionRecord>,
    consecutive_failures: u32,
    completed_setup_phases: BTreeSet<ConnectionState>,
    total_transitions: u64,
    failed_transitions: u64,
    emergency_transitions: u64,
    setup_duration: Option<Duration>,
    last_activity: DateTime<Utc>,
    callbacks: CallbackSet,
    /// 已提交但尚未通知给回调的转换
    /// Committed transitions not yet delivered to callbacks
    pending: VecDeque<TransitionRecord>,
    /// 是否已有线程在投递 `pending`
    /// Whether some thread is already draining `pending`
    dispatching: bool,
}

/// 单个连接的状态机
/// State machine of a single connection
pub struct ConnectionStateMachine {
    connection_id: ConnectionId,
    user_id: UserId,
    config: StateMachineConfig,
    created_at: DateTime<Utc>,
    started: Instant,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl std::fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ConnectionStateMachine")
            .field("connection_id", &self.connection_id)
            .field("user_id", &self.user_id)
            .field("state", &inner.state)
            .field("history_len", &inner.history.len())
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("callbacks", &inner.callbacks)
            .finish()
    }
}

impl ConnectionStateMachine {
    /// 创建处于 `CONNECTING` 状态的新状态机
    /// Create a new state machine in `CONNECTING`
    pub fn new(
        connection_id: impl Into<ConnectionId>,
        user_id: impl Into<UserId>,
        config: StateMachineConfig,
    ) -> Self {
        let now = Utc::now();
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            config,
            created_at: now,
            started: Instant::now(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Connecting,
                history: Vec::new(),
                consecutive_failures: 0,
                completed_setup_phases: BTreeSet::new(),
                total_transitions: 0,
                failed_transitions: 0,
                emergency_transitions: 0,
                setup_duration: None,
                last_activity: now,
                callbacks: CallbackSet::default(),
                pending: VecDeque::new(),
                dispatching: false,
            }),
            state_tx,
        }
    }

    // 回调在锁外运行，锁中毒时内部数据仍然一致
    // Callbacks run outside the lock, so the data is consistent even if poisoned
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 获取当前状态
    /// Get current state
    pub fn current_state(&self) -> ConnectionState {
        self.lock().state
    }

    /// 尝试转换到新状态
    /// Attempt to transition to a new state
    ///
    /// 非法转换返回 `false` 且不修改状态和历史，只增加失败计数。
    /// 连续失败达到上限时状态机被升级为 `FAILED`，调用者仍然得到 `false`，
    /// 需要重新读取当前状态才能发现升级。
    ///
    /// An invalid transition returns `false` without touching state or history;
    /// only the failure counters advance. When consecutive failures reach the
    /// limit the machine escalates to `FAILED`; the caller still gets `false`
    /// and must re-read the current state to notice.
    pub fn transition_to(
        &self,
        target: ConnectionState,
        reason: Option<&str>,
        metadata: Option<TransitionMetadata>,
    ) -> bool {
        let max_failures = self.config.max_consecutive_failures;

        let (committed, dispatch) = {
            let mut inner = self.lock();
            let current = inner.state;

            debug!(
                connection_id = %self.connection_id,
                current_state = %current,
                target_state = %target,
                "Attempting state transition"
            );

            // 失败计数已达上限时，无论请求什么目标都改为 FAILED
            // Once the failure counter is at the limit, any request becomes FAILED
            let effective = if inner.consecutive_failures >= max_failures
                && !state::is_terminal(current)
            {
                warn!(
                    connection_id = %self.connection_id,
                    requested_state = %target,
                    "Failure limit reached, redirecting transition to FAILED"
                );
                ConnectionState::Failed
            } else {
                target
            };

            if StateValidator::is_valid_transition(current, effective) {
                let record = TransitionRecord::new(
                    current,
                    effective,
                    reason.map(str::to_owned),
                    metadata.unwrap_or_default(),
                );
                (effective == target, self.commit(&mut inner, record))
            } else {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.failed_transitions += 1;
                warn!(
                    connection_id = %self.connection_id,
                    current_state = %current,
                    attempted_state = %effective,
                    consecutive_failures = inner.consecutive_failures,
                    "Invalid state transition attempted"
                );

                if inner.consecutive_failures >= max_failures && !state::is_terminal(current) {
                    (false, self.escalate(&mut inner, target))
                } else {
                    (false, false)
                }
            }
        };

        if dispatch {
            self.dispatch_pending();
        }
        committed
    }

    /// 无条件转换到 `FAILED`，用于紧急终止（例如外部超时）
    /// Unconditionally move to `FAILED`, used for emergency termination (e.g. external timeouts)
    ///
    /// 即使已经处于终止状态也会记录一条紧急转换，从不panic。
    /// Records an emergency transition even when already terminal; never panics.
    pub fn force_fail(&self, reason: &str) {
        let dispatch = {
            let mut inner = self.lock();
            let current = inner.state;
            warn!(
                connection_id = %self.connection_id,
                current_state = %current,
                reason,
                "Force failing connection"
            );

            let mut metadata = TransitionMetadata::new();
            metadata.insert("previous_state".to_owned(), current.to_string());
            let record = TransitionRecord::emergency(current, reason.to_owned(), metadata);
            inner.emergency_transitions += 1;
            self.commit(&mut inner, record)
        };

        if dispatch {
            self.dispatch_pending();
        }
    }

    /// 开始优雅关闭
    /// Begin graceful shutdown
    ///
    /// 可运行状态进入 `CLOSING`，仍在建立或重连中的连接直接 `CLOSED`。
    /// 已在关闭或已终止时不做任何修改并返回 `true`。
    ///
    /// Operational states move to `CLOSING`; connections still setting up or
    /// reconnecting go straight to `CLOSED`. Already closing or terminated
    /// connections are left untouched and `true` is returned.
    pub fn begin_graceful_shutdown(&self, reason: Option<&str>) -> bool {
        let current = self.current_state();
        match StateValidator::graceful_shutdown_target(current) {
            Some(target) => self.transition_to(target, reason, None),
            None => {
                debug!(
                    connection_id = %self.connection_id,
                    current_state = %current,
                    "Graceful shutdown requested on closing or terminated connection"
                );
                true
            }
        }
    }

    /// 连续失败达到上限：绕过转换表，强制进入 FAILED
    /// Consecutive failures hit the limit: bypass the table and force FAILED
    fn escalate(&self, inner: &mut Inner, requested: ConnectionState) -> bool {
        let from = inner.state;
        warn!(
            connection_id = %self.connection_id,
            current_state = %from,
            requested_state = %requested,
            consecutive_failures = inner.consecutive_failures,
            "Escalating connection to FAILED after repeated invalid transitions"
        );

        let mut metadata = TransitionMetadata::new();
        metadata.insert("escalated".to_owned(), "true".to_owned());
        metadata.insert("requested_state".to_owned(), requested.to_string());
        metadata.insert(
            "consecutive_failures".to_owned(),
            inner.consecutive_failures.to_string(),
        );
        let record = TransitionRecord::emergency(
            from,
            format!(
                "escalated after {} consecutive invalid transitions",
                inner.consecutive_failures
            ),
            metadata,
        );
        inner.emergency_transitions += 1;
        self.commit(inner, record)
    }

    /// 在锁内应用一条转换记录，返回调用者是否需要负责投递回调
    /// Apply a transition record under the lock; returns whether the caller must
    /// deliver callbacks
    fn commit(&self, inner: &mut Inner, record: TransitionRecord) -> bool {
        let from = record.from_state();
        let to = record.to_state();

        if StateValidator::ends_setup(from, to) && inner.setup_duration.is_none() {
            inner.setup_duration = Some(self.started.elapsed());
        }
        if !record.is_emergency() && state::is_setup_phase(from) {
            inner.completed_setup_phases.insert(from);
        }

        inner.state = to;
        inner.total_transitions += 1;
        inner.consecutive_failures = 0;
        inner.last_activity = record.timestamp();
        inner.history.push(record.clone());
        inner.pending.push_back(record);
        self.state_tx.send_replace(to);

        trace!(
            connection_id = %self.connection_id,
            from = %from,
            to = %to,
            "State transition committed"
        );
        if to == ConnectionState::ProcessingReady {
            info!(
                connection_id = %self.connection_id,
                user_id = %self.user_id,
                setup_duration = ?inner.setup_duration,
                "Connection ready for messages"
            );
        }

        if inner.dispatching {
            false
        } else {
            inner.dispatching = true;
            true
        }
    }

    /// 按提交顺序投递所有待通知的转换，直到队列为空
    /// Deliver pending transitions in commit order until the queue is empty
    fn dispatch_pending(&self) {
        loop {
            let (record, callbacks) = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(record) => (record, inner.callbacks.snapshot()),
                    None => {
                        inner.dispatching = false;
                        return;
                    }
                }
            };
            notify_all(&self.connection_id, &record, &callbacks);
        }
    }

    /// 状态是否属于可运行集合
    /// Whether the state belongs to the operational set
    pub fn is_operational(&self) -> bool {
        state::is_operational(self.current_state())
    }

    /// 与 `is_operational` 相同：只有可运行状态才允许处理消息
    /// Same as `is_operational`: only operational states permit message processing
    pub fn is_ready_for_messages(&self) -> bool {
        self.is_operational()
    }

    /// 就绪且满足降级模式和失败计数的额外条件
    /// Ready, and the degraded-mode and failure-counter guards hold
    pub fn can_process_messages(&self) -> bool {
        let inner = self.lock();
        StateValidator::can_process_messages(
            inner.state,
            inner.completed_setup_phases.len(),
            inner.consecutive_failures,
            &self.config,
        )
    }

    /// 获取转换历史的副本
    /// Get a copy of the transition history
    pub fn get_state_history(&self) -> Vec<TransitionRecord> {
        self.lock().history.clone()
    }

    pub fn get_metrics(&self) -> StateMachineMetrics {
        let inner = self.lock();
        StateMachineMetrics {
            connection_id: self.connection_id.clone(),
            user_id: self.user_id.clone(),
            current_state: inner.state,
            total_transitions: inner.total_transitions,
            failed_transitions: inner.failed_transitions,
            consecutive_failures: inner.consecutive_failures,
            emergency_transitions: inner.emergency_transitions,
            completed_setup_phases: inner.completed_setup_phases.iter().copied().collect(),
            setup_duration: inner.setup_duration,
            history_len: inner.history.len(),
            created_at: self.created_at,
            last_activity: inner.last_activity,
            is_ready_for_messages: state::is_operational(inner.state),
            can_process_messages: StateValidator::can_process_messages(
                inner.state,
                inner.completed_setup_phases.len(),
                inner.consecutive_failures,
                &self.config,
            ),
        }
    }

    /// 注册状态变化回调，已注册时返回 `false`
    /// Register a state change callback, returns `false` if already registered
    pub fn add_state_change_callback(&self, callback: StateChangeCallback) -> bool {
        self.lock().callbacks.insert(callback)
    }

    /// 移除状态变化回调
    /// Remove a state change callback
    pub fn remove_state_change_callback(&self, callback: &StateChangeCallback) -> bool {
        self.lock().callbacks.remove(callback)
    }

    /// 订阅最新状态，在提交时更新
    /// Subscribe to the latest state, updated at commit time
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// 等待连接进入可运行状态
    /// Wait for the connection to become operational
    ///
    /// 超时后状态机被强制置为 `FAILED`，使停滞的连接确定性地结束。
    /// On timeout the machine is force-failed so a stalled connection ends deterministically.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<ConnectionState> {
        let mut state_rx = self.state_tx.subscribe();

        let wait = async {
            loop {
                let current = *state_rx.borrow_and_update();
                if state::is_operational(current) {
                    return Ok(current);
                }
                if state::is_terminal(current) {
                    return Err(Error::ConnectionTerminated {
                        connection_id: self.connection_id.clone(),
                        state: current,
                    });
                }
                if state_rx.changed().await.is_err() {
                    return Err(Error::ConnectionTerminated {
                        connection_id: self.connection_id.clone(),
                        state: current,
                    });
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                self.force_fail("readiness timeout");
                Err(Error::ReadinessTimeout {
                    connection_id: self.connection_id.clone(),
                    waited: timeout,
                })
            }
        }
    }
}
