use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::message::ChatMessage;

/// Attempts per request when the model's content is not valid JSON.
const MAX_CONTENT_ATTEMPTS: u32 = 2;
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("could not reach model service at {host}: {reason}")]
    Transport { host: String, reason: String },

    #[error("model service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model service returned an unreadable body: {0}")]
    MalformedBody(String),

    #[error("model returned invalid JSON: {content}")]
    MalformedContent {
        content: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("model '{model}' is not available at {host}")]
    ModelUnavailable { model: String, host: String },
}

#[derive(Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    pub format: &'static str,
    pub options: ChatOptions,
}

#[derive(Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
}

#[derive(Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelTag>,
}

#[derive(Deserialize)]
pub struct ModelTag {
    #[serde(default)]
    pub name: String,
}

/// Request/response transport to a chat model.
pub trait ChatBackend {
    fn model(&self) -> &str;
    fn host(&self) -> &str;

    /// Send one chat completion and return the raw `message.content` string.
    fn chat(&self, messages: &[ChatMessage], timeout: Duration) -> Result<String, GatewayError>;

    /// Names of the models the service can serve.
    fn list_models(&self) -> Result<Vec<String>, GatewayError>;
}

/// Ollama `/api/chat` and `/api/tags` over blocking HTTP.
pub struct OllamaClient {
    client: Client,
    host: String,
    model: String,
    temperature: f32,
}

impl OllamaClient {
    pub fn new(host: &str, model: &str, temperature: f32) -> Self {
        Self {
            client: Client::new(),
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
        }
    }

    fn transport(&self, err: reqwest::Error) -> GatewayError {
        let reason = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        GatewayError::Transport { host: self.host.clone(), reason }
    }
}

impl ChatBackend for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn chat(&self, messages: &[ChatMessage], timeout: Duration) -> Result<String, GatewayError> {
        let req = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            format: "json",
            options: ChatOptions { temperature: self.temperature },
        };

        let resp = self
            .client
            .post(format!("{}/api/chat", self.host))
            .timeout(timeout)
            .json(&req)
            .send()
            .map_err(|e| self.transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(GatewayError::Status { status: status.as_u16(), body });
        }

        let body: ChatResponse = resp
            .json()
            .map_err(|e| GatewayError::MalformedBody(e.to_string()))?;

        Ok(body.message.map(|m| m.content).unwrap_or_default())
    }

    fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(PROBE_TIMEOUT)
            .send()
            .map_err(|e| self.transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Status { status: status.as_u16(), body: String::new() });
        }

        let tags: TagsResponse = resp
            .json()
            .map_err(|e| GatewayError::MalformedBody(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// JSON contract and readiness probing on top of a [`ChatBackend`].
pub struct Gateway<B> {
    backend: B,
}

impl<B: ChatBackend> Gateway<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// One chat call whose content must decode as JSON.
    ///
    /// Undecodable content is retried once with the same messages. Transport
    /// errors are returned immediately.
    pub fn send(&self, messages: &[ChatMessage], timeout: Duration) -> Result<Value, GatewayError> {
        let mut attempt = 1;
        loop {
            debug!(attempt, messages = messages.len(), "sending chat request");
            let content = self.backend.chat(messages, timeout)?;

            match serde_json::from_str::<Value>(content.trim()) {
                Ok(value) => return Ok(value),
                Err(source) if attempt < MAX_CONTENT_ATTEMPTS => {
                    warn!(attempt, error = %source, "model content was not JSON, retrying");
                    attempt += 1;
                }
                Err(source) => return Err(GatewayError::MalformedContent { content, source }),
            }
        }
    }

    /// Poll the model listing until a name starts with the configured model.
    pub fn wait_for_model(&self, retries: u32, interval: Duration) -> Result<(), GatewayError> {
        let model = self.backend.model();

        for attempt in 1..=retries {
            match self.backend.list_models() {
                Ok(names) if names.iter().any(|name| name.starts_with(model)) => {
                    debug!(attempt, model, "model is ready");
                    return Ok(());
                }
                Ok(names) => debug!(attempt, available = names.len(), "model not listed yet"),
                Err(e) => debug!(attempt, error = %e, "model service not reachable yet"),
            }

            if attempt < retries {
                thread::sleep(interval);
            }
        }

        Err(GatewayError::ModelUnavailable {
            model: model.to_string(),
            host: self.backend.host().to_string(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{transport_error, ScriptedBackend};
    use super::*;
    use serde_json::json;

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("rules"), ChatMessage::user("scan the logs")]
    }

    #[test]
    fn decodes_inner_json_content() {
        let backend = ScriptedBackend::new();
        backend.queue_raw("  {\"verdict\": \"continue\"}\n");
        let gateway = Gateway::new(backend);

        let value = gateway.send(&messages(), Duration::from_secs(5)).unwrap();
        assert_eq!(value, json!({ "verdict": "continue" }));
        assert_eq!(gateway.backend().calls(), 1);
    }

    #[test]
    fn retries_once_on_malformed_content() {
        let backend = ScriptedBackend::new();
        backend.queue_raw("Sure! Here is the JSON:");
        backend.queue_json(json!({ "verdict": "pass" }));
        let gateway = Gateway::new(backend);

        let value = gateway.send(&messages(), Duration::from_secs(5)).unwrap();
        assert_eq!(value["verdict"], "pass");

        let requests = gateway.backend().requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
    }

    #[test]
    fn second_malformed_content_is_a_hard_error() {
        let backend = ScriptedBackend::new();
        backend.queue_raw("");
        backend.queue_raw("{not json");
        backend.queue_json(json!({ "never": "reached" }));
        let gateway = Gateway::new(backend);

        let err = gateway.send(&messages(), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedContent { ref content, .. } if content == "{not json"));
        assert_eq!(gateway.backend().calls(), 2);
    }

    #[test]
    fn transport_errors_are_not_retried() {
        let backend = ScriptedBackend::new();
        backend.queue_error(transport_error());
        backend.queue_json(json!({}));
        let gateway = Gateway::new(backend);

        assert!(matches!(
            gateway.send(&messages(), Duration::from_secs(5)),
            Err(GatewayError::Transport { .. })
        ));
        assert_eq!(gateway.backend().calls(), 1);
    }

    #[test]
    fn readiness_matches_model_prefix() {
        let backend = ScriptedBackend::new();
        backend.queue_listing_error();
        backend.queue_listing(&["mistral:7b"]);
        backend.queue_listing(&["mistral:7b", "llama3.2:3b-instruct-q4"]);
        let gateway = Gateway::new(backend);

        assert!(gateway.wait_for_model(5, Duration::ZERO).is_ok());
    }

    #[test]
    fn readiness_gives_up_after_retries() {
        let backend = ScriptedBackend::new();
        backend.queue_listing(&["mistral:7b"]);
        backend.queue_listing(&["mistral:7b"]);
        backend.queue_listing(&["llama3.2:3b"]);
        let gateway = Gateway::new(backend);

        match gateway.wait_for_model(2, Duration::ZERO) {
            Err(GatewayError::ModelUnavailable { model, host }) => {
                assert_eq!(model, "llama3.2:3b");
                assert_eq!(host, "http://scripted");
            }
            other => panic!("expected unavailable, got {other:?}"),
        }
    }

    #[test]
    fn request_body_matches_chat_protocol() {
        let msgs = messages();
        let req = ChatRequest {
            model: "llama3.2:3b",
            messages: &msgs,
            stream: false,
            format: "json",
            options: ChatOptions { temperature: 0.5 },
        };
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "llama3.2:3b",
                "messages": [
                    { "role": "system", "content": "rules" },
                    { "role": "user", "content": "scan the logs" }
                ],
                "stream": false,
                "format": "json",
                "options": { "temperature": 0.5 }
            })
        );
    }

    #[test]
    fn host_trailing_slash_is_trimmed() {
        let client = OllamaClient::new("http://ollama:11434/", "llama3.2:3b", 0.4);
        assert_eq!(client.host(), "http://ollama:11434");
    }
}
