pub mod admission;
pub mod auth;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod router;
pub mod state_engine;

/// Convenience re-exports for the most commonly used types across the hub.
pub mod prelude {
    pub use crate::admission::{AdmissionController, CreatedSession, JoinedSession};
    pub use crate::config::AppConfig;
    pub use crate::connection::ConnectionManager;
    pub use crate::error::{HubError, HubResult};
    pub use crate::execution::ExecutionDispatcher;
    pub use crate::model::{Principal, Session};
    pub use crate::registry::SessionRegistry;
    pub use crate::router::EventRouter;
}
