//! Pluggable sink traits: messages, outbound HTTP, logging
//!
//! The engines never talk to the outside world directly — they hold trait
//! objects for the three sinks and surface sink failures as action errors.
//! Production implementations live here next to the recording doubles the
//! test suites use.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce::preview_json;

/// Failure from a collaborator call. Engines convert these into action
/// errors; they never bubble out as panics.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// Message delivery failed
    #[error("message delivery failed: {0}")]
    Message(String),

    /// Outbound HTTP request failed
    #[error("http request failed: {0}")]
    Http(String),
}

// =============================================================================
// Messages
// =============================================================================

/// Outbound message sink.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn send(
        &self,
        channel: &str,
        recipient: &str,
        message: &str,
        template: Option<&str>,
    ) -> Result<(), CollaboratorError>;
}

/// A message captured by [`RecordingMessageHandler`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel: String,
    pub recipient: String,
    pub message: String,
    pub template: Option<String>,
}

/// Test double that records every send.
#[derive(Default)]
pub struct RecordingMessageHandler {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingMessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingMessageHandler {
    async fn send(
        &self,
        channel: &str,
        recipient: &str,
        message: &str,
        template: Option<&str>,
    ) -> Result<(), CollaboratorError> {
        self.sent.lock().push(SentMessage {
            channel: channel.to_string(),
            recipient: recipient.to_string(),
            message: message.to_string(),
            template: template.map(str::to_string),
        });
        Ok(())
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Response handed back to the engines. The body is parsed JSON when the
/// server sent any, `null` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

/// Outbound HTTP sink.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, CollaboratorError>;
}

/// Production implementation over `reqwest`.
#[derive(Default, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, CollaboratorError> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|e| CollaboratorError::Http(e.to_string()))?;
        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CollaboratorError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(HttpResponse { status, body })
    }
}

/// A request captured by [`CannedHttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// Test double that returns a fixed response and records every request.
pub struct CannedHttpClient {
    response: HttpResponse,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl CannedHttpClient {
    pub fn new(response: HttpResponse) -> Self {
        Self {
            response,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpClient for CannedHttpClient {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, CollaboratorError> {
        self.requests.lock().push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body: body.cloned(),
        });
        Ok(self.response.clone())
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log severity carried on `log` actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Logging sink. Synchronous and infallible by contract — a logger that
/// cannot log drops the line.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, data: Option<&Value>);
}

/// Production implementation over `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, data: Option<&Value>) {
        let data = data.map(|d| preview_json(d, 512));
        let data = data.as_deref();
        match level {
            LogLevel::Debug => tracing::debug!(data, "{message}"),
            LogLevel::Info => tracing::info!(data, "{message}"),
            LogLevel::Warn => tracing::warn!(data, "{message}"),
            LogLevel::Error => tracing::error!(data, "{message}"),
        }
    }
}

/// A line captured by [`RecordingLogger`].
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub data: Option<Value>,
}

/// Test double that records every line.
#[derive(Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }
}

impl Logger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str, data: Option<&Value>) {
        self.entries.lock().push(LogEntry {
            level,
            message: message.to_string(),
            data: data.cloned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recording_message_handler() {
        let handler = RecordingMessageHandler::new();
        handler
            .send("email", "ada@example.com", "hello", Some("welcome"))
            .await
            .unwrap();
        let sent = handler.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, "email");
        assert_eq!(sent[0].template.as_deref(), Some("welcome"));
    }

    #[tokio::test]
    async fn test_canned_http_client_records_requests() {
        let client = CannedHttpClient::new(HttpResponse {
            status: 201,
            body: json!({"ok": true}),
        });
        let response = client
            .request("post", "https://api.example.com/x", &HashMap::new(), Some(&json!({"a": 1})))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(client.requests().len(), 1);
        assert_eq!(client.requests()[0].method, "post");
    }

    #[test]
    fn test_recording_logger_defaults_to_info() {
        let logger = RecordingLogger::new();
        logger.log(LogLevel::default(), "started", None);
        assert_eq!(logger.entries()[0].level, LogLevel::Info);
    }
}
