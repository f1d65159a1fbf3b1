//! Execution Dispatcher (C7): maps language → sandbox runtime, calls the
//! external sandbox, and normalizes its response.

mod languages;

pub use languages::{filename_for, runtime_for};

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::config::AppConfig;
use crate::error::{HubError, HubResult};

#[derive(Debug, Serialize)]
struct SandboxFile {
    name: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct SandboxRequest {
    language: String,
    version: String,
    files: Vec<SandboxFile>,
    stdin: String,
    compile_timeout: u64,
    run_timeout: u64,
}

#[derive(Debug, Deserialize)]
struct SandboxStage {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    code: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct SandboxResponse {
    language: String,
    version: String,
    #[serde(default)]
    compile: Option<SandboxStage>,
    run: SandboxStage,
}

/// Normalized execution result broadcast as `execution_result`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub success: bool,
    pub language: String,
    pub version: String,
    pub compile: Option<StageResult>,
    pub run: StageResult,
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    pub execution_time: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

pub struct ExecutionDispatcher {
    client: reqwest::Client,
    base_url: String,
    compile_timeout_ms: u64,
    run_timeout_ms: u64,
}

impl ExecutionDispatcher {
    pub fn new(config: AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.sandbox.http_timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.sandbox.base_url,
            compile_timeout_ms: config.sandbox.compile_timeout_ms,
            run_timeout_ms: config.sandbox.run_timeout_ms,
        }
    }

    /// Run `code` against the external sandbox. `execution_started` has
    /// already been broadcast by the caller; this produces the terminal
    /// `execution_result` or maps a failure to `execution_error`.
    pub async fn execute(&self, language: &str, code: &str, input: Option<&str>) -> HubResult<ExecutionResult> {
        let runtime = runtime_for(language).ok_or_else(|| HubError::UnsupportedLanguage(language.to_owned()))?;
        let filename = filename_for(language);

        let (lang, version) = runtime
            .split_once('@')
            .unwrap_or((runtime, "latest"));

        let request = SandboxRequest {
            language: lang.to_owned(),
            version: version.to_owned(),
            files: vec![SandboxFile {
                name: filename.to_owned(),
                content: code.to_owned(),
            }],
            stdin: input.unwrap_or_default().to_owned(),
            compile_timeout: self.compile_timeout_ms,
            run_timeout: self.run_timeout_ms,
        };

        let url = format!("{}/execute", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HubError::ExecutionTimeout
                } else {
                    error!(error = %e, "sandbox request failed");
                    HubError::ExecutionFailed(e.to_string())
                }
            })?;

        let body: SandboxResponse = response
            .json()
            .await
            .map_err(|e| HubError::ExecutionFailed(format!("malformed sandbox response: {e}")))?;

        Ok(normalize(body))
    }

    /// `GET /runtimes` passthrough, used to cross-check C7's language table
    /// against the live sandbox at startup. Non-fatal if unreachable.
    pub async fn list_runtimes(&self) -> HubResult<Value> {
        let url = format!("{}/runtimes", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| HubError::ExecutionFailed(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| HubError::ExecutionFailed(e.to_string()))
    }
}

fn normalize(body: SandboxResponse) -> ExecutionResult {
    let compile = body.compile.map(|c| StageResult {
        stdout: c.stdout,
        stderr: c.stderr,
        code: c.code.unwrap_or(0),
    });
    let run = StageResult {
        stdout: body.run.stdout.clone(),
        stderr: body.run.stderr.clone(),
        code: body.run.code.unwrap_or(0),
    };

    let output = run.stdout.clone();
    let error = if !run.stderr.is_empty() {
        run.stderr.clone()
    } else {
        compile.as_ref().map(|c| c.stderr.clone()).unwrap_or_default()
    };
    let exit_code = if run.code != 0 {
        run.code
    } else {
        compile.as_ref().map(|c| c.code).unwrap_or(0)
    };

    ExecutionResult {
        event_type: "execution_result",
        success: exit_code == 0,
        language: body.language,
        version: body.version,
        compile,
        run,
        output,
        error,
        exit_code,
        execution_time: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_language_is_rejected_before_any_request() {
        let dispatcher = ExecutionDispatcher::new(AppConfig::default());
        let runtime = runtime_for("brainfuck");
        assert!(runtime.is_none());
        let _ = dispatcher; // constructed to exercise `new`
    }

    #[test]
    fn normalize_prefers_run_stderr_over_compile_stderr() {
        let body = SandboxResponse {
            language: "python".to_owned(),
            version: "3.10.0".to_owned(),
            compile: Some(SandboxStage {
                stdout: String::new(),
                stderr: "compile warning".to_owned(),
                code: Some(0),
            }),
            run: SandboxStage {
                stdout: "4\n".to_owned(),
                stderr: "runtime error".to_owned(),
                code: Some(1),
            },
        };
        let result = normalize(body);
        assert_eq!(result.error, "runtime error");
        assert_eq!(result.exit_code, 1);
        assert!(!result.success);
    }
}
