use crate::config::AiConfig;
use crate::error::{truncate_body, RcaError};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_KEY_LEN: usize = 256;

/// System instruction plus the selected log text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub content: String,
}

impl Prompt {
    /// One message per line, in selection order.
    pub fn new<S: AsRef<str>>(system: &str, messages: &[S]) -> Self {
        let content = messages
            .iter()
            .map(|m| m.as_ref())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            system: system.to_string(),
            content,
        }
    }

    pub fn render(&self) -> String {
        format!("{}\n{}", self.system, self.content)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Root-cause analysis through an OpenAI-compatible chat completions API.
pub struct RcaClient {
    http: reqwest::Client,
    config: AiConfig,
}

impl RcaClient {
    pub fn new(config: AiConfig) -> Result<Self, RcaError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RcaError::Unreachable(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Sends the selected messages for analysis and returns the reply verbatim.
    pub async fn analyze<S: AsRef<str>>(&self, messages: &[S]) -> Result<String, RcaError> {
        let endpoint = self.config.endpoint.as_ref().ok_or(RcaError::NotConfigured)?;
        if messages.iter().all(|m| m.as_ref().trim().is_empty()) {
            return Err(RcaError::EmptySelection);
        }

        let prompt = Prompt::new(&self.config.system_prompt, messages);
        let url = format!("{}/chat/completions", endpoint.host);
        let payload = json!({
            "model": endpoint.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.content},
            ],
        });

        info!("Requesting RCA for {} message(s) from {}", messages.len(), endpoint.model);
        debug!("RCA prompt:\n{}", prompt.render());
        let response = self
            .http
            .post(&url)
            .bearer_auth(&endpoint.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!("AI endpoint request failed: {}", e);
                RcaError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("AI endpoint returned {}", status);
            return Err(RcaError::UpstreamError(status.as_u16(), truncate_body(&body)));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| RcaError::InvalidResponse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| RcaError::InvalidResponse("No response from AI".to_string()))
    }

    /// Stores an analysis under `key`. Failures are logged and swallowed.
    pub async fn save_result(&self, key: &str, content: &str) {
        let Some(path) = self.result_path(key) else {
            warn!("Not saving AI result under invalid key");
            return;
        };
        if let Err(e) = fs::create_dir_all(&self.config.results_dir).await {
            warn!("Failed to create {:?}: {}", self.config.results_dir, e);
            return;
        }
        match fs::write(&path, content).await {
            Ok(()) => info!("Saved AI result to {:?}", path),
            Err(e) => warn!("Failed to save AI result to {:?}: {}", path, e),
        }
    }

    pub async fn load_result(&self, key: &str) -> Result<String, RcaError> {
        let path = self.result_path(key).ok_or(RcaError::InvalidKey)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RcaError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn result_path(&self, key: &str) -> Option<PathBuf> {
        is_valid_key(key).then(|| self.config.results_dir.join(format!("{}.txt", key)))
    }
}

/// Base64url-style names only: `[A-Za-z0-9_-]{1,256}`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiEndpoint, DEFAULT_SYSTEM_PROMPT};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::path::Path;
    use tempfile::TempDir;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(host: Option<String>, results_dir: &Path) -> RcaClient {
        RcaClient::new(AiConfig {
            endpoint: host.map(|host| AiEndpoint {
                host,
                api_key: "sk-test".to_string(),
                model: "test-model".to_string(),
            }),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            results_dir: results_dir.to_path_buf(),
        })
        .unwrap()
    }

    #[test]
    fn prompt_keeps_selection_order() {
        let prompt = Prompt::new("Find the cause.", &["first", "second"]);
        assert_eq!(prompt.content, "first\nsecond");
        assert_eq!(prompt.render(), "Find the cause.\nfirst\nsecond");
    }

    #[tokio::test]
    async fn returns_completion_text_unmodified() {
        let dir = TempDir::new().unwrap();
        let router = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["model"], "test-model");
                assert_eq!(body["messages"][0]["content"], DEFAULT_SYSTEM_PROMPT);
                assert_eq!(body["messages"][1]["content"], "db down\nretry failed");
                Json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "  Root cause: db.\n"}}]
                }))
            }),
        );
        let base = serve(router).await;

        let text = client(Some(base), dir.path())
            .analyze(&["db down", "retry failed"])
            .await
            .unwrap();
        assert_eq!(text, "  Root cause: db.\n");
    }

    #[tokio::test]
    async fn transport_failure_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let result = client(Some("http://127.0.0.1:1".to_string()), dir.path())
            .analyze(&["boom"])
            .await;
        assert!(matches!(result, Err(RcaError::Unreachable(_))));
    }

    #[tokio::test]
    async fn error_status_is_upstream_error() {
        let dir = TempDir::new().unwrap();
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base = serve(router).await;

        match client(Some(base), dir.path()).analyze(&["boom"]).await {
            Err(RcaError::UpstreamError(429, body)) => assert_eq!(body, "slow down"),
            other => panic!("expected UpstreamError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_choices_are_invalid() {
        let dir = TempDir::new().unwrap();
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { Json(serde_json::json!({"choices": []})) }),
        );
        let base = serve(router).await;

        let result = client(Some(base), dir.path()).analyze(&["boom"]).await;
        assert!(matches!(result, Err(RcaError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn unconfigured_and_empty_requests_are_rejected() {
        let dir = TempDir::new().unwrap();
        let result = client(None, dir.path()).analyze(&["boom"]).await;
        assert!(matches!(result, Err(RcaError::NotConfigured)));

        let result = client(Some("http://127.0.0.1:1".to_string()), dir.path())
            .analyze(&["  ", ""])
            .await;
        assert!(matches!(result, Err(RcaError::EmptySelection)));
    }

    #[tokio::test]
    async fn saved_results_can_be_loaded() {
        let dir = TempDir::new().unwrap();
        let results_dir = dir.path().join("ai-results");
        let rca = client(None, &results_dir);

        rca.save_result("abc_DEF-1", "analysis").await;
        assert_eq!(rca.load_result("abc_DEF-1").await.unwrap(), "analysis");
        assert!(results_dir.join("abc_DEF-1.txt").is_file());
        assert!(matches!(rca.load_result("missing").await, Err(RcaError::NotFound)));
        assert!(matches!(rca.load_result("../etc/passwd").await, Err(RcaError::InvalidKey)));
    }

    #[test]
    fn key_validation() {
        assert!(is_valid_key("aGVsbG8-_x"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("a/b"));
        assert!(!is_valid_key("a.b"));
        assert!(!is_valid_key(&"a".repeat(257)));
    }
}
