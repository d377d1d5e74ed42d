//! 连接状态机注册表 - 管理连接ID到状态机的映射
//! Connection State Machine Registry - Manages the connection ID to state machine mapping
//!
//! 注册表只存取状态机的引用，从不直接修改状态机的内部字段，
//! 因此注册表锁与状态机锁之间没有加锁顺序要求。
//!
//! The registry only stores and retrieves machine references and never touches a
//! machine's internal fields directly, so there is no lock ordering between the
//! registry and the machines.

use crate::{
    config::{Config, DuplicateRegistrationPolicy},
    error::{Error, Result},
    identity::{ConnectionId, UserId},
    lifecycle::{ConnectionStateMachine, StateChangeCallback, TransitionMetadata},
    state::{self, ConnectionState},
};
use dashmap::{DashMap, mapref::entry::Entry};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, OnceLock},
};
use tracing::{debug, info, warn};

/// 注册表统计信息
/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// 快照中的连接总数
    /// Total connections in the snapshot
    pub total_connections: usize,
    /// 可运行的连接数
    /// Operational connections
    pub operational_connections: usize,
    /// 各状态的连接数
    /// Connection count per state
    pub state_distribution: BTreeMap<ConnectionState, usize>,
    /// 统计完成时注册表的大小
    /// Registry size when the statistics were finished
    pub registry_size: usize,
}

impl std::fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RegistryStats {{ connections: {}, operational: {}, size: {} }}",
            self.total_connections, self.operational_connections, self.registry_size
        )
    }
}

/// 连接状态机注册表
/// Connection state machine registry
///
/// 每个连接ID至多对应一个状态机。通常由连接管理器或服务器对象持有；
/// 无法传递实例的协作方可以使用 [`global_registry`]。
///
/// At most one machine exists per connection ID. Usually owned by the connection
/// manager or server object; collaborators that cannot be handed an instance may
/// use [`global_registry`].
#[derive(Debug, Default)]
pub struct ConnectionStateMachineRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionStateMachine>>,
    config: Config,
}

impl ConnectionStateMachineRegistry {
    /// 创建新的注册表
    /// Create a new registry
    pub fn new(config: Config) -> Self {
        Self {
            connections: DashMap::new(),
            config,
        }
    }

    /// 注册连接，返回其状态机
    /// Register a connection and return its state machine
    ///
    /// 已注册的连接ID返回现有的状态机，不创建新实例也不修改状态，传入的回调被忽略。
    /// 在 [`DuplicateRegistrationPolicy::RejectUserMismatch`] 下，不同用户的重复注册返回
    /// [`Error::UserMismatch`]。
    ///
    /// A known connection ID returns the existing machine without creating a new
    /// one or mutating state; the supplied callbacks are ignored. Under
    /// [`DuplicateRegistrationPolicy::RejectUserMismatch`] a duplicate
    /// registration by a different user returns [`Error::UserMismatch`].
    pub fn register_connection(
        &self,
        connection_id: impl Into<ConnectionId>,
        user_id: impl Into<UserId>,
        callbacks: Vec<StateChangeCallback>,
    ) -> Result<Arc<ConnectionStateMachine>> {
        let connection_id = connection_id.into();
        let user_id = user_id.into();

        match self.connections.entry(connection_id.clone()) {
            Entry::Occupied(entry) => {
                let existing = entry.get().clone();
                drop(entry);

                if existing.user_id() == &user_id {
                    debug!(
                        connection_id = %connection_id,
                        user_id = %user_id,
                        "Connection already registered, returning existing state machine"
                    );
                    return Ok(existing);
                }

                match self.config.registry.duplicate_policy {
                    DuplicateRegistrationPolicy::ReturnExisting => {
                        warn!(
                            connection_id = %connection_id,
                            registered_user = %existing.user_id(),
                            requested_user = %user_id,
                            "Connection re-registered by a different user, returning existing state machine"
                        );
                        Ok(existing)
                    }
                    DuplicateRegistrationPolicy::RejectUserMismatch => {
                        warn!(
                            connection_id = %connection_id,
                            registered_user = %existing.user_id(),
                            requested_user = %user_id,
                            "Rejecting registration of a connection owned by a different user"
                        );
                        Err(Error::UserMismatch {
                            connection_id,
                            registered_user: existing.user_id().clone(),
                            requested_user: user_id,
                        })
                    }
                }
            }
            Entry::Vacant(entry) => {
                let machine = Arc::new(ConnectionStateMachine::new(
                    connection_id.clone(),
                    user_id.clone(),
                    self.config.state_machine.clone(),
                ));
                for callback in callbacks {
                    machine.add_state_change_callback(callback);
                }
                entry.insert(machine.clone());

                info!(
                    connection_id = %connection_id,
                    user_id = %user_id,
                    "Connection registered"
                );
                Ok(machine)
            }
        }
    }

    /// 获取连接的状态机
    /// Get the state machine of a connection
    pub fn get_connection_state_machine(
        &self,
        connection_id: &str,
    ) -> Option<Arc<ConnectionStateMachine>> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    /// 注销连接，返回是否确实移除
    /// Unregister a connection, returns whether it was removed
    pub fn unregister_connection(&self, connection_id: &str) -> bool {
        match self.connections.remove(connection_id) {
            Some((id, machine)) => {
                info!(
                    connection_id = %id,
                    final_state = %machine.current_state(),
                    "Connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// 在注册表锁外获取所有状态机引用的快照
    /// Snapshot every machine reference so filtering happens outside the registry locks
    fn snapshot(&self) -> Vec<(ConnectionId, Arc<ConnectionStateMachine>)> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn filter_connections(
        &self,
        predicate: impl Fn(&ConnectionStateMachine) -> bool,
    ) -> HashMap<ConnectionId, Arc<ConnectionStateMachine>> {
        self.snapshot()
            .into_iter()
            .filter(|(_, machine)| predicate(&**machine))
            .collect()
    }

    /// 获取所有可运行的连接
    /// Get every operational connection
    pub fn get_all_operational_connections(
        &self,
    ) -> HashMap<ConnectionId, Arc<ConnectionStateMachine>> {
        self.filter_connections(ConnectionStateMachine::is_operational)
    }

    /// 获取处于指定状态的连接
    /// Get the connections in the given state
    pub fn get_connections_by_state(
        &self,
        state: ConnectionState,
    ) -> HashMap<ConnectionId, Arc<ConnectionStateMachine>> {
        self.filter_connections(|machine| machine.current_state() == state)
    }

    /// 清理所有处于终止状态的连接，返回清理数量
    /// Remove every connection in a terminal state, returns how many were removed
    pub fn cleanup_closed_connections(&self) -> usize {
        let mut removed = 0;
        self.connections.retain(|connection_id, machine| {
            let current = machine.current_state();
            if state::is_terminal(current) {
                debug!(
                    connection_id = %connection_id,
                    final_state = %current,
                    "Removing terminated connection"
                );
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            info!(removed, remaining = self.connections.len(), "Cleaned up terminated connections");
        }
        removed
    }

    /// 获取注册表统计信息
    /// Get registry statistics
    pub fn get_registry_stats(&self) -> RegistryStats {
        let snapshot = self.snapshot();
        let mut state_distribution = BTreeMap::new();
        let mut operational_connections = 0;

        for (_, machine) in &snapshot {
            let current = machine.current_state();
            *state_distribution.entry(current).or_insert(0) += 1;
            if state::is_operational(current) {
                operational_connections += 1;
            }
        }

        RegistryStats {
            total_connections: snapshot.len(),
            operational_connections,
            state_distribution,
            registry_size: self.connections.len(),
        }
    }

    /// 检查连接是否可以处理消息，未知连接视为未就绪
    /// Check if the connection can process messages; unknown connections are not ready
    pub fn is_connection_ready(&self, connection_id: &str) -> bool {
        self.get_connection_state_machine(connection_id)
            .is_some_and(|machine| machine.can_process_messages())
    }

    /// 对已注册的连接执行状态转换
    /// Transition a registered connection
    pub fn transition_connection(
        &self,
        connection_id: &str,
        target: ConnectionState,
        reason: Option<&str>,
        metadata: Option<TransitionMetadata>,
    ) -> Result<bool> {
        let machine = self
            .get_connection_state_machine(connection_id)
            .ok_or_else(|| Error::ConnectionNotFound(connection_id.into()))?;
        Ok(machine.transition_to(target, reason, metadata))
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// 移除所有连接，用于进程或测试夹具的拆除
    /// Remove every connection, for process or test-fixture teardown
    pub fn clear(&self) {
        let count = self.connections.len();
        self.connections.clear();
        debug!(count, "Registry cleared");
    }
}

/// 全局注册表实例
/// Global registry instance
static GLOBAL_REGISTRY: OnceLock<ConnectionStateMachineRegistry> = OnceLock::new();

/// 获取全局注册表，首次调用时使用默认配置创建
/// Get the global registry, created with the default configuration on first use
pub fn global_registry() -> &'static ConnectionStateMachineRegistry {
    GLOBAL_REGISTRY.get_or_init(|| ConnectionStateMachineRegistry::new(Config::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;

    fn create_test_registry() -> ConnectionStateMachineRegistry {
        ConnectionStateMachineRegistry::new(Config::default())
    }

    fn drive(machine: &ConnectionStateMachine, states: &[ConnectionState]) {
        for state in states {
            assert!(machine.transition_to(*state, None, None), "-> {state}");
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = create_test_registry();
        let machine = registry.register_connection("c1", "u1", Vec::new()).unwrap();

        assert_eq!(machine.current_state(), ConnectionState::Connecting);
        assert!(registry.contains("c1"));
        assert_eq!(registry.len(), 1);

        let found = registry.get_connection_state_machine("c1").unwrap();
        assert!(Arc::ptr_eq(&machine, &found));
        assert!(registry.get_connection_state_machine("c2").is_none());
    }

    #[test]
    fn test_duplicate_registration_same_user() {
        let registry = create_test_registry();
        let first = registry.register_connection("c1", "u1", Vec::new()).unwrap();
        drive(&first, &[ConnectionState::Accepted]);

        let second = registry.register_connection("c1", "u1", Vec::new()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.current_state(), ConnectionState::Accepted);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_different_user() {
        let registry = create_test_registry();
        registry.register_connection("c1", "u1", Vec::new()).unwrap();

        let err = registry.register_connection("c1", "u2", Vec::new()).unwrap_err();
        assert_eq!(
            err,
            Error::UserMismatch {
                connection_id: "c1".into(),
                registered_user: "u1".into(),
                requested_user: "u2".into(),
            }
        );

        let lenient = ConnectionStateMachineRegistry::new(Config {
            registry: RegistryConfig {
                duplicate_policy: DuplicateRegistrationPolicy::ReturnExisting,
            },
            ..Config::default()
        });
        let first = lenient.register_connection("c1", "u1", Vec::new()).unwrap();
        let second = lenient.register_connection("c1", "u2", Vec::new()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.user_id().as_str(), "u1");
    }

    #[test]
    fn test_unregister() {
        let registry = create_test_registry();
        registry.register_connection("c1", "u1", Vec::new()).unwrap();

        assert!(registry.unregister_connection("c1"));
        assert!(!registry.unregister_connection("c1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cleanup_removes_only_terminal() {
        let registry = create_test_registry();
        let closed = registry.register_connection("closed", "u", Vec::new()).unwrap();
        let failed = registry.register_connection("failed", "u", Vec::new()).unwrap();
        let closing = registry.register_connection("closing", "u", Vec::new()).unwrap();
        registry.register_connection("fresh", "u", Vec::new()).unwrap();

        drive(&closed, &[ConnectionState::Closed]);
        failed.force_fail("timeout");
        drive(
            &closing,
            &[
                ConnectionState::Accepted,
                ConnectionState::Authenticated,
                ConnectionState::ServicesReady,
                ConnectionState::ProcessingReady,
                ConnectionState::Closing,
            ],
        );

        assert_eq!(registry.cleanup_closed_connections(), 2);
        assert_eq!(registry.cleanup_closed_connections(), 0);

        assert!(!registry.contains("closed"));
        assert!(!registry.contains("failed"));
        assert!(registry.contains("closing"));
        assert!(registry.contains("fresh"));
    }

    #[test]
    fn test_filters_and_stats() {
        let registry = create_test_registry();
        let ready = registry.register_connection("ready", "u", Vec::new()).unwrap();
        let degraded = registry.register_connection("degraded", "u", Vec::new()).unwrap();
        registry.register_connection("connecting", "u", Vec::new()).unwrap();

        drive(
            &ready,
            &[
                ConnectionState::Accepted,
                ConnectionState::Authenticated,
                ConnectionState::ServicesReady,
                ConnectionState::ProcessingReady,
            ],
        );
        drive(
            &degraded,
            &[
                ConnectionState::Accepted,
                ConnectionState::Authenticated,
                ConnectionState::Degraded,
            ],
        );

        let operational = registry.get_all_operational_connections();
        assert_eq!(operational.len(), 2);
        assert!(operational.contains_key("ready"));
        assert!(operational.contains_key("degraded"));

        let connecting = registry.get_connections_by_state(ConnectionState::Connecting);
        assert_eq!(connecting.len(), 1);
        assert!(connecting.contains_key("connecting"));
        assert!(registry.get_connections_by_state(ConnectionState::Idle).is_empty());

        let stats = registry.get_registry_stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.operational_connections, 2);
        assert_eq!(stats.registry_size, 3);
        assert_eq!(stats.state_distribution.get(&ConnectionState::ProcessingReady), Some(&1));
        assert_eq!(stats.state_distribution.get(&ConnectionState::Degraded), Some(&1));
        assert_eq!(stats.state_distribution.get(&ConnectionState::Connecting), Some(&1));
    }

    #[test]
    fn test_readiness_fails_closed() {
        let registry = create_test_registry();
        assert!(!registry.is_connection_ready("unknown"));

        let machine = registry.register_connection("c1", "u1", Vec::new()).unwrap();
        assert!(!registry.is_connection_ready("c1"));

        drive(
            &machine,
            &[
                ConnectionState::Accepted,
                ConnectionState::Authenticated,
                ConnectionState::ServicesReady,
                ConnectionState::ProcessingReady,
            ],
        );
        assert!(registry.is_connection_ready("c1"));
    }

    #[test]
    fn test_transition_connection() {
        let registry = create_test_registry();
        registry.register_connection("c1", "u1", Vec::new()).unwrap();

        assert_eq!(
            registry.transition_connection("c1", ConnectionState::Accepted, Some("accepted"), None),
            Ok(true)
        );
        assert_eq!(
            registry.transition_connection("c1", ConnectionState::Idle, None, None),
            Ok(false)
        );
        assert_eq!(
            registry.transition_connection("missing", ConnectionState::Accepted, None, None),
            Err(Error::ConnectionNotFound("missing".into()))
        );
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = global_registry();
        let b = global_registry();
        assert!(std::ptr::eq(a, b));
    }
}
