//! HTTP client for an OpenAI-compatible chat completions endpoint.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::config::ServiceSettings;
use crate::error::AppError;
use crate::text_service::{AskResponse, TextService};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

const CLIENT_USER_AGENT: &str = concat!("gradebatch/", env!("CARGO_PKG_VERSION"));

/// Path of the chat completions endpoint, relative to the base URL.
const COMPLETIONS_PATH: &str = "v1/chat/completions";

/// Service error codes that mean the account is out of capacity rather than
/// the request being bad.
const CAPACITY_ERROR_CODES: &[&str] = &["rate_limit_exceeded", "insufficient_quota"];

/// Renders the endpoint for logs: path only, never host or query.
fn sanitize_url_for_logs(url: &Url) -> String {
    url.path().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ServiceErrorBody,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpTextService
// ─────────────────────────────────────────────────────────────────────────────

/// One session against the completions endpoint.
#[derive(Clone)]
pub struct HttpTextService {
    http: reqwest::Client,
    endpoint: Url,
    model: String,
    api_key: SecretString,
}

impl std::fmt::Debug for HttpTextService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTextService")
            .field("endpoint", &sanitize_url_for_logs(&self.endpoint))
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl HttpTextService {
    /// Creates a session from connection settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` for an unparseable base URL and
    /// `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(settings: &ServiceSettings) -> Result<Self, AppError> {
        let endpoint = completions_url(&settings.base_url)?;
        let http = build_http_client(Duration::from_secs(settings.timeout_secs))?;
        Ok(Self {
            http,
            endpoint,
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    /// Sends one prompt and returns the first choice's text.
    ///
    /// # Errors
    ///
    /// - `AppError::ConnectionFailed` for network errors and timeouts
    /// - `AppError::RateLimited` for 429 and capacity error codes
    /// - `AppError::ServiceError` for other error statuses or a malformed body
    pub async fn complete(&self, prompt: &str) -> Result<String, AppError> {
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(&self.endpoint);

        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let result = self
            .http
            .post(self.endpoint.as_str())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await;
        let duration_ms = start.elapsed().as_millis();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                // The reqwest error may carry the full URL; log only the kind
                let kind = if e.is_timeout() { "timeout" } else { "connect" };
                info!(
                    "[TEXT-SVC] POST {} FAILED ({}) {}ms",
                    sanitized_url, kind, duration_ms
                );
                return Err(AppError::ConnectionFailed(format!(
                    "Request to the text service failed ({})",
                    kind
                )));
            }
        };

        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        info!(
            "[TEXT-SVC] POST {} {} {}ms {}",
            sanitized_url,
            status.as_u16(),
            duration_ms,
            request_id
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            AppError::ServiceError(format!("Failed to parse completion response: {}", e))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ServiceError("Completion response has no choices".into()))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

impl TextService for HttpTextService {
    fn ask<'a>(&'a self, prompt: &'a str) -> Pin<Box<dyn Future<Output = AskResponse> + Send + 'a>> {
        Box::pin(async move {
            let result = self.complete(prompt).await;
            if let Err(e) = &result {
                warn!("[TEXT-SVC] Prompt failed: {}", e.to_presentation().message);
            }
            AskResponse::from(result)
        })
    }
}

/// Maps an error response to an `AppError`.
async fn parse_error_response(response: reqwest::Response, status: reqwest::StatusCode) -> AppError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = envelope
            .error
            .code
            .or(envelope.error.kind)
            .unwrap_or_else(|| "error".to_string());

        if CAPACITY_ERROR_CODES.contains(&code.as_str()) {
            return AppError::RateLimited {
                retry_after_secs: None,
            };
        }

        return AppError::ServiceError(format!("[{}] {}", code, envelope.error.message));
    }

    AppError::ServiceError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

/// Resolves the completions endpoint below `base_url`, keeping any path
/// prefix the base already has.
fn completions_url(base_url: &str) -> Result<Url, AppError> {
    let mut base = Url::parse(base_url)
        .map_err(|e| AppError::InvalidConfig(format!("Invalid base URL: {}", e)))?;
    if base.cannot_be_a_base() {
        return Err(AppError::InvalidConfig("Invalid base URL".into()));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(COMPLETIONS_PATH)
        .map_err(|e| AppError::InvalidConfig(format!("Invalid base URL: {}", e)))
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: &str) -> ServiceSettings {
        ServiceSettings {
            base_url: base_url.to_string(),
            model: "gpt-test".to_string(),
            api_key: SecretString::from("test_key".to_string()),
            timeout_secs: 5,
        }
    }

    fn completion(text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": text }, "finish_reason": "stop" }
            ]
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // URL handling
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn completions_url_appends_to_base() {
        assert_eq!(
            completions_url("https://api.example.com").unwrap().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://proxy.example.com/openai").unwrap().as_str(),
            "https://proxy.example.com/openai/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://proxy.example.com/openai/").unwrap().as_str(),
            "https://proxy.example.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn completions_url_rejects_garbage() {
        assert!(matches!(
            completions_url("not a url"),
            Err(AppError::InvalidConfig(_))
        ));
    }

    #[test]
    fn logged_endpoint_is_path_only() {
        let url = Url::parse("https://user:pw@api.example.com/v1/chat/completions?api_key=sk-1#frag")
            .unwrap();

        assert_eq!(sanitize_url_for_logs(&url), "/v1/chat/completions");
    }

    #[test]
    fn debug_output_redacts_key() {
        let service = HttpTextService::new(&settings("https://api.example.com")).unwrap();
        let debug = format!("{:?}", service);
        assert!(!debug.contains("test_key"));
        assert!(debug.contains("[REDACTED]"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_complete_sends_model_and_prompt() {
        let mock_server = MockServer::start().await;
        let service = HttpTextService::new(&settings(&mock_server.uri())).unwrap();

        let expected_request = serde_json::json!({
            "model": "gpt-test",
            "messages": [{ "role": "user", "content": "Grade this answer" }]
        });

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_key"))
            .and(body_json(&expected_request))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("CORRECT")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let text = service.complete("Grade this answer").await.unwrap();
        assert_eq!(text, "CORRECT");
    }

    #[tokio::test]
    async fn test_ask_reports_success() {
        let mock_server = MockServer::start().await;
        let service = HttpTextService::new(&settings(&mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("INCORRECT")))
            .mount(&mock_server)
            .await;

        let response = service.ask("prompt").await;
        assert!(response.success);
        assert_eq!(response.response, "INCORRECT");
        assert_eq!(response.error_message, None);
    }

    #[tokio::test]
    async fn test_null_content_is_empty_answer() {
        let mock_server = MockServer::start().await;
        let service = HttpTextService::new(&settings(&mock_server.uri())).unwrap();

        let body = serde_json::json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": null } }]
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&mock_server)
            .await;

        assert_eq!(service.complete("prompt").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_no_choices_is_service_error() {
        let mock_server = MockServer::start().await;
        let service = HttpTextService::new(&settings(&mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        assert!(matches!(
            service.complete("prompt").await,
            Err(AppError::ServiceError(_))
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Error mapping
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_429_maps_to_rate_limited_with_retry_after() {
        let mock_server = MockServer::start().await;
        let service = HttpTextService::new(&settings(&mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "60"))
            .mount(&mock_server)
            .await;

        match service.complete("prompt").await {
            Err(AppError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, Some(60))
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quota_error_code_maps_to_rate_limited() {
        let mock_server = MockServer::start().await;
        let service = HttpTextService::new(&settings(&mock_server.uri())).unwrap();

        let body = serde_json::json!({
            "error": { "message": "You exceeded your current quota", "type": "insufficient_quota", "code": "insufficient_quota" }
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(body))
            .mount(&mock_server)
            .await;

        assert!(matches!(
            service.complete("prompt").await,
            Err(AppError::RateLimited { retry_after_secs: None })
        ));
    }

    #[tokio::test]
    async fn test_error_body_maps_to_service_error() {
        let mock_server = MockServer::start().await;
        let service = HttpTextService::new(&settings(&mock_server.uri())).unwrap();

        let body = serde_json::json!({
            "error": { "message": "The model does not exist", "type": "invalid_request_error", "code": "model_not_found" }
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(body))
            .mount(&mock_server)
            .await;

        match service.complete("prompt").await {
            Err(AppError::ServiceError(msg)) => {
                assert!(msg.contains("model_not_found"));
                assert!(msg.contains("does not exist"));
            }
            other => panic!("expected ServiceError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plain_error_falls_back_to_status() {
        let mock_server = MockServer::start().await;
        let service = HttpTextService::new(&settings(&mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&mock_server)
            .await;

        match service.complete("prompt").await {
            Err(AppError::ServiceError(msg)) => assert!(msg.contains("502")),
            other => panic!("expected ServiceError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_failed() {
        // Port 9 (discard) on localhost is not listening in test environments
        let service = HttpTextService::new(&settings("http://127.0.0.1:9")).unwrap();

        let response = service.ask("prompt").await;
        assert!(!response.success);
        assert!(response.error_message.is_some());
    }
}
