//! TOML configuration schema for the session hub.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `~/.sessionhub/config.toml`:
//! ```toml
//! [server]
//! port = 3001
//!
//! [auth]
//! jwt_secret = "change-me"
//! allow_dev_tokens = false
//!
//! [sandbox]
//! base_url = "https://emkc.org/api/v2/piston"
//!
//! [session]
//! max_users_default = 10
//! allow_guests_default = false
//! ```

use serde::{Deserialize, Serialize};

// ─── ServerConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Realtime + HTTP bind port. If busy, probed upward to `port + 9`.
    pub port: u16,
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            bind_addr: "0.0.0.0".to_owned(),
        }
    }
}

// ─── AuthConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret for the locally-signed (HS256) token path.
    pub jwt_secret: String,
    /// Algorithms accepted on the locally-signed path.
    pub jwt_algorithms: Vec<String>,
    /// Optional federated-identity admin credentials. Absence disables that path.
    pub federated_admin_key: Option<String>,
    /// Whether the development-token path is reachable at all. MUST default
    /// to `false`; only test/dev builds should flip it on.
    pub allow_dev_tokens: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_algorithms: vec!["HS256".to_owned(), "RS256".to_owned()],
            federated_admin_key: None,
            allow_dev_tokens: false,
        }
    }
}

// ─── SandboxConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Base URL of the external code-execution sandbox.
    pub base_url: String,
    /// Overall HTTP timeout for a `/execute` call, in milliseconds.
    pub http_timeout_ms: u64,
    pub compile_timeout_ms: u64,
    pub run_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_url: "https://emkc.org/api/v2/piston".to_owned(),
            http_timeout_ms: 15_000,
            compile_timeout_ms: 10_000,
            run_timeout_ms: 3_000,
        }
    }
}

// ─── SessionConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_users_default: usize,
    pub allow_guests_default: bool,
    /// Seconds an empty session is kept alive before the GC sweep purges it.
    pub gc_interval_secs: u64,
    /// Max bytes accepted in a single `code_change` payload.
    pub max_code_change_bytes: usize,
    /// Max chat messages retained per session.
    pub max_chat_log_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_users_default: 10,
            allow_guests_default: false,
            gc_interval_secs: 3600,
            max_code_change_bytes: 1_000_000,
            max_chat_log_len: 500,
        }
    }
}

// ─── RateLimitConfig ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Max connections from a single source IP within `window_secs`.
    pub max_connections: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            window_secs: 30,
        }
    }
}

// ─── AppConfig ─────────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// Loaded from `~/.sessionhub/config.toml`, falling back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub sandbox: SandboxConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
}
