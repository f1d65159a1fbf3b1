//! Realtime + REST gateway: axum router, WebSocket upgrade, port-fallback
//! daemon startup.

pub mod daemon;
pub mod routes;
pub mod ws;

pub use daemon::run;
