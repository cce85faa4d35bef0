//! Built-in tools

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::registry::Tool;
use crate::domain::tool::ToolError;

/// Maximum response body kept by `http_fetch`
const MAX_FETCH_BODY_BYTES: usize = 256 * 1024;

/// Returns its arguments unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the arguments unchanged"
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        Ok(args)
    }
}

#[derive(Debug, Deserialize)]
struct FetchArgs {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Fetches a URL and returns `{ status, body }`
///
/// JSON response bodies are returned parsed; anything else as text.
#[derive(Debug, Clone)]
pub struct HttpFetchTool {
    client: reqwest::Client,
}

impl HttpFetchTool {
    pub fn new() -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("litechat-workflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::execution("http_fetch", e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn name(&self) -> &str {
        "http_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S)"
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let args: FetchArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments(self.name(), e.to_string()))?;

        let url = reqwest::Url::parse(&args.url)
            .map_err(|e| ToolError::invalid_arguments(self.name(), e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::invalid_arguments(
                self.name(),
                format!("Unsupported URL scheme '{}'", url.scheme()),
            ));
        }

        let method = reqwest::Method::from_bytes(args.method.to_uppercase().as_bytes())
            .map_err(|e| ToolError::invalid_arguments(self.name(), e.to_string()))?;

        let mut request = self.client.request(method, url);

        for (key, value) in &args.headers {
            request = request.header(key, value);
        }

        request = match args.body {
            Some(Value::String(text)) => request.body(text),
            Some(body) => request.json(&body),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::execution(self.name(), e.to_string()))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ToolError::execution(self.name(), e.to_string()))?;

        let truncated = bytes.len() > MAX_FETCH_BODY_BYTES;
        let bytes = &bytes[..bytes.len().min(MAX_FETCH_BODY_BYTES)];

        let body = serde_json::from_slice::<Value>(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()));

        Ok(json!({
            "status": status,
            "body": body,
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_echo_returns_args() {
        let result = EchoTool.call(json!(["a", 1])).await.unwrap();
        assert_eq!(result, json!(["a", 1]));
    }

    #[tokio::test]
    async fn test_fetch_parses_json_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
            .mount(&server)
            .await;

        let tool = HttpFetchTool::new().unwrap();
        let result = tool
            .call(json!({"url": format!("{}/items", server.uri())}))
            .await
            .unwrap();

        assert_eq!(result["status"], 200);
        assert_eq!(result["body"]["count"], 2);
        assert_eq!(result["truncated"], false);
    }

    #[tokio::test]
    async fn test_fetch_returns_text_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .mount(&server)
            .await;

        let tool = HttpFetchTool::new().unwrap();
        let result = tool
            .call(json!({
                "url": format!("{}/submit", server.uri()),
                "method": "post",
                "body": {"name": "x"}
            }))
            .await
            .unwrap();

        assert_eq!(result["status"], 201);
        assert_eq!(result["body"], "created");
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http_scheme() {
        let tool = HttpFetchTool::new().unwrap();
        let result = tool.call(json!({"url": "file:///etc/passwd"})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn test_fetch_requires_url() {
        let tool = HttpFetchTool::new().unwrap();
        let result = tool.call(json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments { .. })));
    }
}
