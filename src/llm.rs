//! Language-model client and generator selection.
//!
//! A request is served by one of two flows, chosen once per request by
//! [`Generator::select`]: the assistant-backed flow, used when a custom
//! assistant id is configured, and the generic chat flow otherwise. Both
//! go through the same chat-completions endpoint; the assistant id rides
//! along as request metadata.
//!
//! Retry policy matches the embedding client: HTTP 429 and 5xx retry with
//! exponential backoff, other client errors fail immediately.

use anyhow::{bail, Result};
use base64::Engine;
use std::time::Duration;

use crate::config::LlmConfig;

/// Which generation flow serves a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generator {
    /// A pre-configured assistant handles the request.
    Assistant { id: String },
    /// Plain chat completion with an inline system prompt.
    Chat,
}

impl Generator {
    /// Pick the flow for this request. The assistant flow is used when an
    /// assistant id is configured; otherwise the generic chat flow.
    pub fn select(config: &LlmConfig) -> Self {
        match &config.assistant_id {
            Some(id) if !id.is_empty() => Generator::Assistant { id: id.clone() },
            _ => Generator::Chat,
        }
    }
}

pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    config: LlmConfig,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if !config.is_enabled() {
            bail!("LLM provider is disabled");
        }
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            config: config.clone(),
        })
    }

    /// One chat completion call. Returns the assistant message text.
    pub async fn complete(
        &self,
        generator: &Generator,
        system: &str,
        user: &str,
    ) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        if let Generator::Assistant { id } = generator {
            body["metadata"] = serde_json::json!({ "assistant_id": id });
        }

        self.post_chat(body).await
    }

    /// Produce a short natural-language caption for an image. Used by the
    /// extractor for standalone image uploads and images embedded in PDFs.
    pub async fn caption_image(&self, bytes: &[u8], mime: &str) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let data_url = format!("data:{};base64,{}", mime, encoded);

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "text",
                            "text": "Describe this image in one or two sentences, \
                                     focusing on any text, diagrams, or figures it contains."
                        },
                        { "type": "image_url", "image_url": { "url": data_url } },
                    ],
                },
            ],
        });

        self.post_chat(body).await
    }

    async fn post_chat(&self, body: serde_json::Value) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return extract_message_text(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Chat API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Chat API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
    }
}

fn extract_message_text(json: &serde_json::Value) -> Result<String> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_selects_assistant_when_configured() {
        let mut cfg = LlmConfig::default();
        cfg.assistant_id = Some("asst_abc".to_string());
        assert_eq!(
            Generator::select(&cfg),
            Generator::Assistant {
                id: "asst_abc".to_string()
            }
        );
    }

    #[test]
    fn generator_falls_back_to_chat() {
        let mut cfg = LlmConfig::default();
        assert_eq!(Generator::select(&cfg), Generator::Chat);

        cfg.assistant_id = Some(String::new());
        assert_eq!(Generator::select(&cfg), Generator::Chat);
    }

    #[test]
    fn parse_chat_response() {
        let json = serde_json::json!({
            "choices": [ { "message": { "role": "assistant", "content": "Hi there" } } ]
        });
        assert_eq!(extract_message_text(&json).unwrap(), "Hi there");
    }

    #[test]
    fn parse_chat_response_missing_content() {
        let json = serde_json::json!({ "choices": [] });
        assert!(extract_message_text(&json).is_err());
    }
}
