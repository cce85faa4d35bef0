use serde::Deserialize;

/// Sandbox limits and interpreter commands
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock limit for one subprocess function
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum stdout a function may produce
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Allow python/javascript functions. Off unless every workflow author
    /// is trusted with the service user's filesystem and network.
    #[serde(default)]
    pub process_enabled: bool,
    #[serde(default = "default_python_command")]
    pub python_command: String,
    #[serde(default = "default_javascript_command")]
    pub javascript_command: String,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_python_command() -> String {
    "python3".to_string()
}

fn default_javascript_command() -> String {
    "node".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            process_enabled: false,
            python_command: default_python_command(),
            javascript_command: default_javascript_command(),
        }
    }
}
