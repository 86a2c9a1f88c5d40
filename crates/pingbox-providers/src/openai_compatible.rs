//! Unified OpenAI-compatible text generator.
//!
//! One struct serves every chat-completions backend in the registry; backends
//! differ only by endpoint URL, auth style and API key.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use pingbox_core::config::{LlmConfig, LlmProviderConfig};
use pingbox_core::error::{PingBoxError, Result};
use pingbox_core::traits::TextGenerator;
use pingbox_core::types::GenerationContext;

use crate::prompt::{PromptBuilder, clean_llm_text};
use crate::provider_registry::{AuthStyle, ProviderConfig};

/// Generates notification text through one chat-completions endpoint.
pub struct OpenAiCompatibleGenerator {
    /// Provider name (e.g. "openrouter", "groq").
    name: String,
    model: String,
    api_key: String,
    /// e.g. "https://api.groq.com/openai/v1"
    base_url: String,
    chat_path: String,
    auth_style: AuthStyle,
    extra_headers: Vec<(String, String)>,
    temperature: f32,
    max_tokens: u32,
    prompt: Arc<PromptBuilder>,
    client: reqwest::Client,
}

impl OpenAiCompatibleGenerator {
    /// Create from a registry entry and one chain entry.
    ///
    /// Resolution order:
    /// - API key: `entry.api_key` > registry env vars > empty
    /// - Base URL: `entry.endpoint` > env override > registry default
    /// - Model: `entry.model` > registry default
    pub fn from_registry(
        registry: &ProviderConfig,
        entry: &LlmProviderConfig,
        llm: &LlmConfig,
        prompt: Arc<PromptBuilder>,
    ) -> Self {
        let api_key = if !entry.api_key.trim().is_empty() {
            entry.api_key.trim().to_string()
        } else {
            registry
                .env_keys
                .iter()
                .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
                .unwrap_or_default()
        };

        let base_url = if !entry.endpoint.trim().is_empty() {
            entry.endpoint.trim().trim_end_matches('/').to_string()
        } else {
            registry
                .base_url_env
                .and_then(|env_key| {
                    let val = std::env::var(env_key).ok()?;
                    // OLLAMA_HOST is usually given without the /v1 suffix.
                    if val.ends_with("/v1") {
                        Some(val)
                    } else {
                        Some(format!("{}/v1", val.trim_end_matches('/')))
                    }
                })
                .unwrap_or_else(|| registry.base_url.to_string())
        };

        let model = if entry.model.trim().is_empty() {
            registry.default_model.to_string()
        } else {
            entry.model.trim().to_string()
        };

        Self {
            name: registry.name.to_string(),
            model,
            api_key,
            base_url,
            chat_path: registry.chat_path.to_string(),
            auth_style: registry.auth_style,
            extra_headers: registry
                .extra_headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            prompt,
            client: reqwest::Client::new(),
        }
    }

    /// Create for a custom endpoint (`"custom:https://my-server.com/v1"`).
    pub fn custom(entry: &LlmProviderConfig, llm: &LlmConfig, prompt: Arc<PromptBuilder>) -> Self {
        let base_url = entry
            .provider
            .trim()
            .strip_prefix("custom:")
            .unwrap_or(entry.provider.trim())
            .trim_end_matches('/')
            .to_string();

        let api_key = if !entry.api_key.trim().is_empty() {
            entry.api_key.trim().to_string()
        } else {
            std::env::var("CUSTOM_API_KEY").unwrap_or_default()
        };
        let auth_style = if api_key.is_empty() {
            AuthStyle::None
        } else {
            AuthStyle::Bearer
        };

        Self {
            name: "custom".to_string(),
            model: entry.model.trim().to_string(),
            api_key,
            base_url,
            chat_path: "/chat/completions".to_string(),
            auth_style,
            extra_headers: Vec::new(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            prompt,
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_url(&self) -> String {
        format!("{}{}", self.base_url, self.chat_path)
    }

    fn request_body(&self, context: &GenerationContext) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": self.prompt.system() },
                { "role": "user", "content": self.prompt.build_user(context) },
            ],
        })
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_style {
            AuthStyle::Bearer if !self.api_key.is_empty() => {
                req.header("Authorization", format!("Bearer {}", self.api_key))
            }
            _ => req,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, context: &GenerationContext) -> Result<String> {
        if self.auth_style != AuthStyle::None && self.api_key.is_empty() {
            return Err(PingBoxError::ApiKeyMissing(self.name.clone()));
        }
        if context.entity_name.trim().is_empty() {
            return Err(PingBoxError::Provider("entity name is empty".into()));
        }

        let url = self.chat_url();
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(context));
        for (key, value) in &self.extra_headers {
            req = req.header(key.as_str(), value.as_str());
        }
        let req = self.apply_auth(req);

        let resp = req.send().await.map_err(|e| {
            PingBoxError::Http(format!("{} connection failed ({}): {}", self.name, url, e))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(PingBoxError::Provider(format!(
                "{} API error {}: {}",
                self.name, status, text
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| PingBoxError::Http(e.to_string()))?;
        let raw = extract_content(&json)
            .ok_or_else(|| PingBoxError::Provider(format!("{}: empty content", self.name)))?;

        let text = clean_llm_text(&raw);
        if text.is_empty() {
            return Err(PingBoxError::Provider(format!("{}: response is empty after cleanup", self.name)));
        }
        tracing::debug!(
            "{} ({}) generated {} chars for '{}'",
            self.name,
            self.model,
            text.chars().count(),
            context.entity_name
        );
        Ok(text)
    }
}

/// First non-blank text in `choices[0].message`: the content string, then
/// text parts of a multi-part content, then the reasoning fields.
fn extract_content(json: &Value) -> Option<String> {
    let message = &json["choices"].get(0)?["message"];
    let non_blank = |v: &Value| {
        v.as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    if let Some(text) = non_blank(&message["content"]) {
        return Some(text);
    }
    if let Some(parts) = message["content"].as_array() {
        let part = parts
            .iter()
            .filter(|p| p["type"] == "text")
            .find_map(|p| non_blank(&p["text"]));
        if part.is_some() {
            return part;
        }
    }
    if let Some(text) = non_blank(&message["reasoning"]) {
        return Some(text);
    }
    message["reasoning_details"]
        .as_array()?
        .iter()
        .find_map(|d| non_blank(&d["text"]).or_else(|| non_blank(&d["summary"])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider_registry::get_provider_config;
    use pingbox_core::types::{TimeOfDay, UserMode};

    fn entry(provider: &str, model: &str, key: &str, endpoint: &str) -> LlmProviderConfig {
        LlmProviderConfig {
            provider: provider.into(),
            model: model.into(),
            api_key: key.into(),
            endpoint: endpoint.into(),
        }
    }

    fn context() -> GenerationContext {
        GenerationContext {
            entity_name: "tea".into(),
            time_of_day: TimeOfDay::Morning,
            style: UserMode::Cozy,
            random_seed: 7,
        }
    }

    #[test]
    fn test_from_registry_resolution() {
        let registry = get_provider_config("groq").unwrap();
        let generator = OpenAiCompatibleGenerator::from_registry(
            registry,
            &entry("groq", "", "sk-test", "http://proxy.local/v1/"),
            &LlmConfig::default(),
            Arc::new(PromptBuilder::default()),
        );
        assert_eq!(generator.name(), "groq");
        assert_eq!(generator.model(), "llama-3.1-8b-instant");
        assert_eq!(generator.chat_url(), "http://proxy.local/v1/chat/completions");
    }

    #[test]
    fn test_custom_endpoint() {
        let generator = OpenAiCompatibleGenerator::custom(
            &entry("custom:http://10.0.0.2:8000/v1/", "qwen", "", ""),
            &LlmConfig::default(),
            Arc::new(PromptBuilder::default()),
        );
        assert_eq!(generator.chat_url(), "http://10.0.0.2:8000/v1/chat/completions");
        assert_eq!(generator.model(), "qwen");
    }

    #[test]
    fn test_request_body() {
        let registry = get_provider_config("openrouter").unwrap();
        let generator = OpenAiCompatibleGenerator::from_registry(
            registry,
            &entry("openrouter", "meta/llama", "k", ""),
            &LlmConfig::default(),
            Arc::new(PromptBuilder::new("SYSTEM")),
        );
        let body = generator.request_body(&context());
        assert_eq!(body["model"], "meta/llama");
        assert_eq!(body["max_tokens"], 180);
        assert_eq!(body["messages"][0]["content"], "SYSTEM");
        let user: Value = serde_json::from_str(body["messages"][1]["content"].as_str().unwrap()).unwrap();
        assert_eq!(user["current_entity"], "tea");
        assert_eq!(user["style_mode"], "cozy");
    }

    #[test]
    fn test_extract_content_variants() {
        let plain = json!({"choices": [{"message": {"content": "  hi  "}}]});
        assert_eq!(extract_content(&plain).as_deref(), Some("hi"));

        let parts = json!({"choices": [{"message": {"content": [
            {"type": "image_url", "image_url": {"url": "x"}},
            {"type": "text", "text": "from parts"}
        ]}}]});
        assert_eq!(extract_content(&parts).as_deref(), Some("from parts"));

        let reasoning = json!({"choices": [{"message": {"content": "", "reasoning": "thought"}}]});
        assert_eq!(extract_content(&reasoning).as_deref(), Some("thought"));

        let details = json!({"choices": [{"message": {"content": null,
            "reasoning_details": [{"text": ""}, {"summary": "summed up"}]}}]});
        assert_eq!(extract_content(&details).as_deref(), Some("summed up"));

        assert_eq!(extract_content(&json!({"choices": []})), None);
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let registry = get_provider_config("openai").unwrap();
        let mut generator = OpenAiCompatibleGenerator::from_registry(
            registry,
            &entry("openai", "", "", ""),
            &LlmConfig::default(),
            Arc::new(PromptBuilder::default()),
        );
        generator.api_key.clear();
        let err = generator.generate(&context()).await.unwrap_err();
        assert!(matches!(err, PingBoxError::ApiKeyMissing(ref p) if p == "openai"));
    }
}
