//! 状态机指标快照
//! State machine metrics snapshot

use crate::{
    identity::{ConnectionId, UserId},
    state::ConnectionState,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// 状态机指标快照，在状态机锁内一次性采集
/// State machine metrics snapshot, captured at once under the machine lock
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateMachineMetrics {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    /// 当前状态
    /// Current state
    pub current_state: ConnectionState,
    /// 成功的转换次数（包括紧急转换）
    /// Successful transitions, emergency transitions included
    pub total_transitions: u64,
    /// 累计的非法转换尝试次数
    /// Invalid transition attempts over the machine's lifetime
    pub failed_transitions: u64,
    /// 自上次成功转换以来的连续非法尝试次数
    /// Consecutive invalid attempts since the last successful transition
    pub consecutive_failures: u32,
    /// 紧急转换次数（强制失败与升级）
    /// Emergency transitions (forced failures and escalations)
    pub emergency_transitions: u64,
    /// 已完成的建立阶段
    /// Completed setup phases
    pub completed_setup_phases: Vec<ConnectionState>,
    /// 从创建到离开建立阶段的耗时，只记录第一次
    /// Time from creation until the setup phase was first left
    pub setup_duration: Option<Duration>,
    pub history_len: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_ready_for_messages: bool,
    pub can_process_messages: bool,
}

impl std::fmt::Display for StateMachineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StateMachineMetrics {{ connection: {}, state: {}, transitions: {}/{} failed, setup: {:?}, ready: {} }}",
            self.connection_id,
            self.current_state,
            self.total_transitions,
            self.failed_transitions,
            self.setup_duration,
            self.can_process_messages
        )
    }
}
