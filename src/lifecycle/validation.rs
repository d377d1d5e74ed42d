//! 连接状态验证逻辑模块
//! Connection State Validation Logic Module
//!
//! 该模块负责状态转换表、就绪检查和降级模式的准入判断。
//! 为状态机提供一致且无副作用的验证服务。
//!
//! This module owns the transition table, readiness checks and degraded-mode
//! admission. It provides consistent, side-effect free validation services for
//! the state machine.

use crate::{
    config::StateMachineConfig,
    state::{self, ConnectionState},
};

/// 状态验证器，负责所有状态相关的验证和检查逻辑
/// State validator responsible for all state-related validation and check logic
pub struct StateValidator;

impl StateValidator {
    /// 获取从指定状态出发的所有合法目标状态
    /// Get every legal target state reachable from the given state
    pub fn valid_targets(from: ConnectionState) -> &'static [ConnectionState] {
        use ConnectionState::*;

        match from {
            Connecting => &[Accepted, Failed, Closed],
            Accepted => &[Authenticated, Failed, Closed],
            Authenticated => &[ServicesReady, Degraded, Failed, Closed],
            ServicesReady => &[ProcessingReady, Degraded, Failed, Closed],
            ProcessingReady => &[Processing, Idle, Degraded, Closing, Failed, Closed],
            Processing => &[Idle, ProcessingReady, Degraded, Closing, Failed, Closed],
            Idle => &[Processing, ProcessingReady, Degraded, Closing, Failed, Closed],
            Degraded => &[
                ProcessingReady,
                Processing,
                Idle,
                Reconnecting,
                Closing,
                Failed,
                Closed,
            ],
            Reconnecting => &[ServicesReady, ProcessingReady, Degraded, Failed, Closed],
            Closing => &[Closed],
            Closed => &[],
            // 仅允许重试
            // Retry only
            Failed => &[Connecting],
        }
    }

    /// 验证状态转换是否合法
    /// Validate if state transition is legal
    pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
        // 终止状态只保留重试这一条出边，在查表之前检查
        // Terminal states keep only the retry edge; checked before the table lookup
        if state::is_terminal(from) {
            return from == ConnectionState::Failed && to == ConnectionState::Connecting;
        }

        Self::valid_targets(from).contains(&to)
    }

    /// 检查连接是否可以处理消息
    /// Check if the connection can process messages
    ///
    /// `DEGRADED` 需要足够的已完成建立阶段；连续失败次数在升级为 `FAILED`
    /// 之前的最后一次尝试时就撤销就绪。
    ///
    /// `DEGRADED` requires enough completed setup phases; readiness is revoked
    /// one attempt before consecutive failures escalate to `FAILED`.
    pub fn can_process_messages(
        current: ConnectionState,
        completed_setup_phases: usize,
        consecutive_failures: u32,
        config: &StateMachineConfig,
    ) -> bool {
        if !state::is_operational(current) {
            return false;
        }

        if current == ConnectionState::Degraded
            && completed_setup_phases < config.degraded_min_setup_phases
        {
            return false;
        }

        consecutive_failures < config.max_consecutive_failures.saturating_sub(1)
    }

    /// 检查是否应当结束建立阶段计时
    /// Check if the transition ends the setup-phase timer
    pub fn ends_setup(from: ConnectionState, to: ConnectionState) -> bool {
        state::is_setup_phase(from) && !state::is_setup_phase(to)
    }

    /// 获取优雅关闭的目标状态
    /// Get the target state of a graceful shutdown
    ///
    /// 已经在关闭或已终止时返回 `None`。
    /// Returns `None` when already closing or terminated.
    pub fn graceful_shutdown_target(current: ConnectionState) -> Option<ConnectionState> {
        match current {
            ConnectionState::ProcessingReady
            | ConnectionState::Processing
            | ConnectionState::Idle
            | ConnectionState::Degraded => Some(ConnectionState::Closing),
            ConnectionState::Connecting
            | ConnectionState::Accepted
            | ConnectionState::Authenticated
            | ConnectionState::ServicesReady
            | ConnectionState::Reconnecting => Some(ConnectionState::Closed),
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed => None,
        }
    }
}
