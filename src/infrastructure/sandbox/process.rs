//! Subprocess sandbox for Python and JavaScript functions
//!
//! The user code becomes the body of a function whose parameters are the
//! scope's top-level keys. The scope is written to stdin as JSON and the
//! function's return value is read back from stdout as JSON.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::SandboxConfig;
use crate::domain::sandbox::{FunctionSandbox, SandboxError};
use crate::domain::workflow::FunctionLanguage;

static PARAM_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Stderr kept for error messages
const MAX_STDERR_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: SandboxConfig,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn interpreter(&self, language: FunctionLanguage) -> Result<(&str, &'static str), SandboxError> {
        match language {
            FunctionLanguage::Python => Ok((&self.config.python_command, "main.py")),
            FunctionLanguage::Javascript => Ok((&self.config.javascript_command, "main.js")),
            FunctionLanguage::Jexl => Err(SandboxError::unsupported(language.as_str())),
        }
    }

    async fn run(
        &self,
        language: FunctionLanguage,
        code: &str,
        scope: Value,
    ) -> Result<Value, SandboxError> {
        let (program, file_name) = self.interpreter(language)?;
        let params = parameters(&scope);

        let source = match language {
            FunctionLanguage::Python => python_source(code, &params),
            _ => javascript_source(code, &params),
        };

        let workdir = tempfile::tempdir()
            .map_err(|e| SandboxError::unavailable(format!("Failed to create workdir: {}", e)))?;
        let script = workdir.path().join(file_name);
        tokio::fs::write(&script, source)
            .await
            .map_err(|e| SandboxError::unavailable(format!("Failed to write script: {}", e)))?;

        let mut command = Command::new(program);
        if language == FunctionLanguage::Python {
            command.arg("-I");
        }
        command
            .arg(&script)
            .current_dir(workdir.path())
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            SandboxError::unavailable(format!("Failed to start '{}': {}", program, e))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::unavailable("Failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::unavailable("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::unavailable("Failed to capture stderr"))?;

        let input = serde_json::to_vec(&scope)
            .map_err(|e| SandboxError::unavailable(format!("Failed to encode scope: {}", e)))?;
        let limit = self.config.max_output_bytes;

        let write_input = async move {
            // A function that exits without reading stdin closes the pipe early
            let _ = stdin.write_all(&input).await;
            drop(stdin);
            Ok::<(), SandboxError>(())
        };

        let read_output = async move {
            let output = read_limited(stdout, limit).await?;
            if output.len() > limit {
                return Err(SandboxError::OutputTooLarge { limit });
            }
            Ok(output)
        };

        let read_errors = async move { read_limited(stderr, MAX_STDERR_BYTES).await };

        let execution = async {
            let ((), output, errors) = tokio::try_join!(write_input, read_output, read_errors)?;
            let status = child
                .wait()
                .await
                .map_err(|e| SandboxError::unavailable(format!("Failed to wait for function: {}", e)))?;
            Ok::<_, SandboxError>((status, output, errors))
        };

        let (status, output, errors) = timeout(Duration::from_millis(self.config.timeout_ms), execution)
            .await
            .map_err(|_| SandboxError::Timeout {
                timeout_ms: self.config.timeout_ms,
            })??;

        if !status.success() {
            let message = String::from_utf8_lossy(&errors).trim().to_string();
            return Err(SandboxError::raised(if message.is_empty() {
                format!("Function exited with {}", status)
            } else {
                message
            }));
        }

        let text = String::from_utf8_lossy(&output);
        let text = text.trim();
        if text.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(text)
            .map_err(|e| SandboxError::raised(format!("Function returned invalid JSON: {}", e)))
    }
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl FunctionSandbox for ProcessSandbox {
    async fn execute(
        &self,
        language: FunctionLanguage,
        code: &str,
        scope: Value,
    ) -> Result<Value, SandboxError> {
        if !self.config.process_enabled {
            return Err(SandboxError::unsupported(language.as_str()));
        }

        debug!(language = %language.as_str(), "Running function in subprocess");

        let result = self.run(language, code, scope).await;
        if let Err(error) = &result {
            warn!(language = %language.as_str(), error = %error, "Function failed");
        }
        result
    }
}

/// Read at most `limit + 1` bytes so callers can detect overflow
async fn read_limited<R>(reader: R, limit: usize) -> Result<Vec<u8>, SandboxError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut buffer)
        .await
        .map_err(|e| SandboxError::unavailable(format!("Failed to read function output: {}", e)))?;
    Ok(buffer)
}

/// Scope keys usable as function parameters, in a stable order
fn parameters(scope: &Value) -> Vec<String> {
    let mut params: Vec<String> = scope
        .as_object()
        .map(|object| {
            object
                .keys()
                .filter(|key| PARAM_PATTERN.is_match(key))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    params.sort();
    params
}

fn python_source(code: &str, params: &[String]) -> String {
    let body: String = if code.trim().is_empty() {
        "    return None\n".to_string()
    } else {
        code.lines().map(|line| format!("    {}\n", line)).collect()
    };
    let args: Vec<String> = params.iter().map(|p| format!("_scope.get({:?})", p)).collect();

    format!(
        "import json, sys\n\
         _scope = json.loads(sys.stdin.read() or '{{}}')\n\
         def _litechat_fn({params}):\n\
         {body}\
         _result = _litechat_fn({args})\n\
         sys.stdout.write(json.dumps(_result))\n",
        params = params.join(", "),
        body = body,
        args = args.join(", "),
    )
}

fn javascript_source(code: &str, params: &[String]) -> String {
    let args: Vec<String> = params.iter().map(|p| format!("scope[{:?}]", p)).collect();

    format!(
        "const chunks = [];\n\
         process.stdin.on('data', (c) => chunks.push(c));\n\
         process.stdin.on('end', async () => {{\n\
         try {{\n\
         const scope = JSON.parse(Buffer.concat(chunks).toString() || '{{}}');\n\
         const fn = async function ({params}) {{\n{code}\n}};\n\
         const result = await fn({args});\n\
         process.stdout.write(JSON.stringify(result === undefined ? null : result));\n\
         }} catch (e) {{\n\
         process.stderr.write(String(e && e.message ? e.message : e));\n\
         process.exit(1);\n\
         }}\n\
         }});\n",
        params = params.join(", "),
        code = code,
        args = args.join(", "),
    )
}
