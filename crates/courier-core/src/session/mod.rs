//! Session supervision: registry, state machine, reconnection policy, and
//! health monitoring.

pub mod reconnect;
pub mod state;
pub mod supervisor;

pub(crate) mod health;
pub(crate) mod machine;

pub use reconnect::{delay_for_attempt, should_reconnect, MAX_RECONNECT_ATTEMPTS};
pub use state::{Session, SessionId, SessionInfo, SessionStatus};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError};
