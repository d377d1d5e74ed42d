//! 定义了连接状态机和注册表的可配置参数。
//! Defines configurable parameters for connection state machines and the registry.

/// A structure containing all configurable parameters of the lifecycle core.
///
/// 包含生命周期核心所有可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Per-connection state machine parameters.
    /// 单个连接状态机的参数。
    pub state_machine: StateMachineConfig,

    /// Registry-wide parameters. Machines created by the registry use
    /// `state_machine`.
    /// 注册表参数。注册表创建的状态机使用 `state_machine`。
    pub registry: RegistryConfig,
}

/// Per-connection state machine parameters.
///
/// 单个连接状态机的参数。
#[derive(Debug, Clone)]
pub struct StateMachineConfig {
    /// The number of consecutive invalid transition attempts after which the
    /// machine escalates to `FAILED`. Readiness is revoked one attempt earlier.
    ///
    /// 连续非法转换尝试的次数上限，达到后状态机升级为 `FAILED`。
    /// 就绪状态会提前一次被撤销。
    pub max_consecutive_failures: u32,
    /// The minimum number of completed setup phases required before a
    /// `DEGRADED` connection may process messages.
    ///
    /// `DEGRADED` 连接处理消息之前必须完成的最少建立阶段数。
    pub degraded_min_setup_phases: usize,
}

/// How the registry treats a second registration of a known connection id.
///
/// 注册表如何处理已知连接ID的再次注册。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateRegistrationPolicy {
    /// Always hand back the existing machine, whatever user id was supplied.
    /// 总是返回已存在的状态机，忽略传入的用户ID。
    ReturnExisting,
    /// Hand back the existing machine for the same user, reject a different user.
    /// 同一用户返回已存在的状态机，不同用户则拒绝。
    #[default]
    RejectUserMismatch,
}

/// Registry-wide parameters.
///
/// 注册表参数。
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Policy applied on duplicate registration.
    /// 重复注册时采用的策略。
    pub duplicate_policy: DuplicateRegistrationPolicy,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            degraded_min_setup_phases: 2,
        }
    }
}
