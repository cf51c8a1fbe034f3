// src/runtime/capability.rs
//! External AI capabilities invoked by `uses` services.
//!
//! Programs see a capability as an opaque asynchronous call taking a JSON
//! input and an options map. The registry maps capability names to
//! implementations; the runtime never looks one up by anything but name.
use crate::error::CapabilityError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub type Options = Map<String, Json>;

#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, input: Json, options: &Options) -> Result<Json, CapabilityError>;
}

/// Named capabilities available to a program.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.capabilities.keys().collect();
        names.sort();
        f.debug_struct("CapabilityRegistry").field("capabilities", &names).finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `capability` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, capability: impl Capability + 'static) {
        self.capabilities.insert(name.into(), Arc::new(capability));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub async fn invoke(&self, name: &str, input: Json, options: &Options) -> Result<Json, CapabilityError> {
        let capability = self
            .capabilities
            .get(name)
            .ok_or_else(|| CapabilityError::Unknown(name.to_string()))?;
        debug!(capability = name, "invoking capability");
        capability.invoke(input, options).await
    }
}

/// Returns its input unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

#[async_trait]
impl Capability for Echo {
    async fn invoke(&self, input: Json, _options: &Options) -> Result<Json, CapabilityError> {
        Ok(input)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: Message,
}

/// Chat completion against an OpenAI-compatible HTTP endpoint.
///
/// The input becomes the user message (strings as-is, anything else as
/// JSON text). Options `model`, `system` and `temperature` override the
/// defaults per call. The API key is read from `api_key_env` at call time.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    client: Client,
    endpoint: String,
    model: String,
    api_key_env: String,
}

impl ChatCompletion {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key_env: api_key_env.into(),
        }
    }

    fn request(&self, input: &Json, options: &Options) -> ChatRequest {
        let content = match input {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut messages = Vec::new();
        if let Some(Json::String(system)) = options.get("system") {
            messages.push(Message {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content,
        });
        ChatRequest {
            model: options
                .get("model")
                .and_then(Json::as_str)
                .unwrap_or(&self.model)
                .to_string(),
            messages,
            temperature: options.get("temperature").and_then(Json::as_f64),
        }
    }
}

#[async_trait]
impl Capability for ChatCompletion {
    async fn invoke(&self, input: Json, options: &Options) -> Result<Json, CapabilityError> {
        let api_key = std::env::var(&self.api_key_env).map_err(|_| CapabilityError::MissingOption {
            capability: "chat".to_string(),
            option: self.api_key_env.clone(),
        })?;
        let request = self.request(&input, options);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CapabilityError::Malformed("response has no choices".to_string()))?;
        Ok(Json::String(choice.message.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_registry_dispatches_by_name() {
        let mut registry = CapabilityRegistry::new();
        registry.register("echo", Echo);
        let out = registry.invoke("echo", json!({"a": 1}), &Options::new()).await.unwrap();
        assert_eq!(out, json!({"a": 1}));
        let err = registry.invoke("tts", json!(null), &Options::new()).await.unwrap_err();
        assert_eq!(err, CapabilityError::Unknown("tts".into()));
    }

    #[test]
    fn test_chat_request_uses_options() {
        let chat = ChatCompletion::new("http://localhost:1/v1/", "base-model", "UNSET_KEY");
        let mut options = Options::new();
        options.insert("system".into(), json!("be brief"));
        options.insert("temperature".into(), json!(0.2));
        let request = chat.request(&json!("hello"), &options);
        assert_eq!(request.model, "base-model");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].content, "hello");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(chat.endpoint, "http://localhost:1/v1");
    }

    #[tokio::test]
    async fn test_chat_requires_api_key() {
        let chat = ChatCompletion::new("http://localhost:1/v1", "m", "SYNAPSE_TEST_KEY_THAT_IS_NOT_SET");
        let err = chat.invoke(json!("hi"), &Options::new()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::MissingOption { .. }));
    }
}
