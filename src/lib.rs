#![deny(clippy::expect_used, clippy::unwrap_used)]

//! WebSocket连接生命周期库的根：区分传输层"已接受"与应用层"就绪"。
//! The root of the WebSocket connection lifecycle library: keeps transport-level
//! "accepted" apart from application-level "ready".

pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod registry;
pub mod state;

pub use config::{Config, DuplicateRegistrationPolicy, RegistryConfig, StateMachineConfig};
pub use error::{Error, Result};
pub use identity::{ConnectionId, UserId};
pub use lifecycle::{
    ConnectionStateMachine, StateChangeCallback, StateMachineMetrics, TransitionMetadata,
    TransitionRecord, is_valid_transition, valid_targets,
};
pub use registry::{ConnectionStateMachineRegistry, RegistryStats, global_registry};
pub use state::{ConnectionState, is_operational, is_setup_phase, is_terminal};
