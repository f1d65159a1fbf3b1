//! TOML configuration loading, env-var overrides, and atomic saves.
//!
//! # Loading order
//! 1. Parse `~/.sessionhub/config.toml` (or the path in `HUB_CONFIG`)
//! 2. Apply `HUB_*` environment variable overrides
//! 3. Fall back to [`AppConfig::default()`] if the file is missing

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use super::schema::AppConfig;

// ─── default_config_path ────────────────────────────────────────────────────

/// Return the default config file path: `~/.sessionhub/config.toml`.
pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::home_dir()
        .map(|h| h.join(".sessionhub").join("config.toml"))
        .ok_or_else(|| "could not determine home directory".to_string())
}

// ─── load_config ─────────────────────────────────────────────────────────────

/// Load [`AppConfig`] from the given path, falling back to defaults if the
/// file does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, String> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)
            .map_err(|e| format!("failed to parse config at {path:?}: {e}"))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(format!("failed to read config at {path:?}: {e}")),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the path in `HUB_CONFIG`, or the default path.
pub fn load_default_config() -> AppConfig {
    let path = env::var("HUB_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml")));

    load_config(&path).unwrap_or_default()
}

// ─── apply_env_overrides ─────────────────────────────────────────────────────

/// Apply `HUB_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `HUB_PORT`                 → `server.port`
/// - `HUB_BIND_ADDR`            → `server.bind_addr`
/// - `HUB_JWT_SECRET`           → `auth.jwt_secret`
/// - `HUB_ALLOW_DEV_TOKENS`     → `auth.allow_dev_tokens` (1/0)
/// - `HUB_FEDERATED_ADMIN_KEY`  → `auth.federated_admin_key`
/// - `HUB_SANDBOX_URL`          → `sandbox.base_url`
/// - `HUB_MAX_USERS_PER_SESSION`→ `session.max_users_default`
/// - `HUB_ALLOW_GUESTS_DEFAULT` → `session.allow_guests_default` (1/0)
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("HUB_PORT") {
        if let Ok(port) = v.parse::<u16>() {
            config.server.port = port;
        }
    }
    if let Ok(v) = env::var("HUB_BIND_ADDR") {
        config.server.bind_addr = v;
    }
    if let Ok(v) = env::var("HUB_JWT_SECRET") {
        config.auth.jwt_secret = v;
    }
    if let Ok(v) = env::var("HUB_ALLOW_DEV_TOKENS") {
        config.auth.allow_dev_tokens = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = env::var("HUB_FEDERATED_ADMIN_KEY") {
        config.auth.federated_admin_key = Some(v);
    }
    if let Ok(v) = env::var("HUB_SANDBOX_URL") {
        config.sandbox.base_url = v;
    }
    if let Ok(v) = env::var("HUB_MAX_USERS_PER_SESSION") {
        if let Ok(n) = v.parse::<usize>() {
            config.session.max_users_default = n;
        }
    }
    if let Ok(v) = env::var("HUB_ALLOW_GUESTS_DEFAULT") {
        config.session.allow_guests_default = v == "1" || v.eq_ignore_ascii_case("true");
    }
}

// ─── save_config ─────────────────────────────────────────────────────────────

/// Atomically save `config` to `path`: write to `<path>.tmp`, then rename.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), String> {
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("failed to serialise config: {e}"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create config dir: {e}"))?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &content).map_err(|e| format!("failed to write temp config: {e}"))?;
    fs::rename(&tmp_path, path).map_err(|e| format!("failed to replace config file: {e}"))?;

    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unsafe_code)] // env::set_var / remove_var are unsafe in Rust 2024; tests are single-threaded.
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
port = 4100
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.session.max_users_default, 10);
        assert!(!config.auth.allow_dev_tokens);
    }

    #[test]
    fn load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
port = 5000
bind_addr = "127.0.0.1"

[auth]
jwt_secret = "topsecret"
allow_dev_tokens = true

[sandbox]
base_url = "http://localhost:2000"

[session]
max_users_default = 25
allow_guests_default = true

[rate_limit]
max_connections = 20
window_secs = 60
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.auth.jwt_secret, "topsecret");
        assert!(config.auth.allow_dev_tokens);
        assert_eq!(config.session.max_users_default, 25);
        assert!(config.session.allow_guests_default);
        assert_eq!(config.rate_limit.max_connections, 20);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut original = AppConfig::default();
        original.server.port = 6000;
        original.auth.jwt_secret = "s3cr3t".to_owned();

        save_config(&path, &original).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, original, "config should round-trip through save/load");
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let nested_path = dir.path().join("a").join("b").join("config.toml");
        save_config(&nested_path, &AppConfig::default()).unwrap();
        assert!(nested_path.exists());
    }

    #[test]
    fn env_override_port() {
        let key = "HUB_PORT";
        unsafe {
            env::set_var(key, "9100");
        }
        let config = load_default_config();
        unsafe {
            env::remove_var(key);
        }
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn env_override_allow_dev_tokens() {
        let key = "HUB_ALLOW_DEV_TOKENS";
        unsafe {
            env::set_var(key, "1");
        }
        let config = load_default_config();
        unsafe {
            env::remove_var(key);
        }
        assert!(config.auth.allow_dev_tokens);
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "this is not valid toml!!!");
        let result = load_config(&path);
        assert!(result.is_err());
    }
}
