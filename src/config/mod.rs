//! Application configuration: schema, TOML loading, env overrides.

mod loader;
mod schema;

pub use loader::{default_config_path, load_config, load_default_config, save_config};
pub use schema::{AppConfig, AuthConfig, RateLimitConfig, SandboxConfig, ServerConfig, SessionConfig};
