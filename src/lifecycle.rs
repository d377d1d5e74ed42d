//! 连接生命周期管理模块
//! Connection Lifecycle Management Module
//!
//! 该模块提供单个连接就绪状态的统一管理，包括转换验证、转换记录与回调、
//! 指标快照以及状态机本身。采用分层设计，职责清晰分离。
//!
//! This module provides unified readiness management for a single connection,
//! including transition validation, transition records and callbacks, metrics
//! snapshots and the state machine itself. It adopts a layered design with
//! clear separation of responsibilities.

mod machine;
mod metrics;
mod transitions;
mod validation;

pub use machine::ConnectionStateMachine;
pub use metrics::StateMachineMetrics;
pub use transitions::{StateChangeCallback, TransitionMetadata, TransitionRecord};
pub use validation::StateValidator;

use crate::state::ConnectionState;

/// 验证状态转换是否合法
/// Validate if state transition is legal
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    StateValidator::is_valid_transition(from, to)
}

/// 获取从指定状态出发的所有合法目标状态
/// Get every legal target state reachable from the given state
pub fn valid_targets(from: ConnectionState) -> &'static [ConnectionState] {
    StateValidator::valid_targets(from)
}
