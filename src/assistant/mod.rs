//! Generated first-line replies and thread titles.
//!
//! The provider is best-effort by contract: any upstream failure (HTTP,
//! timeout, malformed body, empty choice) turns into `None` and the ticket
//! simply waits for a human. Nothing in the relay path ever depends on a
//! reply being produced.

use crate::kb::{self, Topic, ALL_TOPICS};
use crate::shared::config::AssistantConfig;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait ReplyProvider: Send + Sync {
    /// Draft an answer to the client's message, or `None` when the model
    /// cannot or should not answer.
    async fn generate(&self, topic: Topic, lang: &str, question: &str) -> Option<String>;

    /// Short human-readable title for a new ticket thread.
    async fn summarize_as_title(&self, topic: Topic, first_message: &str) -> String;
}

pub struct OpenAiAssistant {
    client: reqwest::Client,
    config: AssistantConfig,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

const TITLE_MAX_CHARS: usize = 50;

/// Title used when generation fails, keyed by the stored topic string.
pub fn fallback_title(topic: &str) -> String {
    let emoji = match topic {
        "balance" => "💰",
        "withdrop" => "🎁",
        "bugs" => "🐛",
        "donate" => "💎",
        "cooperation" => "🤝",
        _ => "📝",
    };
    format!("{} Новый вопрос", emoji)
}

fn truncate_title(raw: &str) -> String {
    let cleaned = raw.trim().trim_matches('"').replace('\n', " ");
    if cleaned.chars().count() <= TITLE_MAX_CHARS {
        return cleaned;
    }
    cleaned.chars().take(TITLE_MAX_CHARS - 1).collect::<String>() + "…"
}

/// Compile the FAQ knowledge base into one system prompt.
fn knowledge_prompt(lang: &str) -> String {
    let mut prompt = String::from(
        "You are a support assistant for a Telegram gifts marketplace. \
         Answer using ONLY the knowledge base below. Keep answers short and \
         polite. If the knowledge base does not cover the question, or the \
         user needs account-specific help, reply exactly with: HANDOFF.\n\n\
         Knowledge base:\n",
    );
    for topic in ALL_TOPICS {
        for entry in kb::faq_entries(topic, lang) {
            if entry.answer.is_empty() {
                continue;
            }
            prompt.push_str("Q: ");
            prompt.push_str(entry.question);
            prompt.push_str("\nA: ");
            prompt.push_str(entry.answer);
            prompt.push_str("\n\n");
        }
    }
    prompt.push_str(match lang {
        "ru" => "Respond in Russian.",
        _ => "Respond in English.",
    });
    prompt
}

impl OpenAiAssistant {
    pub fn new(config: AssistantConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Option<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "temperature": self.config.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await;
        let response = match response {
            Ok(r) => r,
            Err(err) => {
                warn!("Assistant request failed: {}", err);
                return None;
            }
        };
        if !response.status().is_success() {
            warn!("Assistant returned status {}", response.status());
            return None;
        }
        let completion: ChatCompletion = match response.json().await {
            Ok(c) => c,
            Err(err) => {
                warn!("Assistant returned malformed body: {}", err);
                return None;
            }
        };
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
    }
}

#[async_trait]
impl ReplyProvider for OpenAiAssistant {
    async fn generate(&self, topic: Topic, lang: &str, question: &str) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        debug!("Generating reply for topic {}", topic.as_str());
        let reply = self
            .complete(&knowledge_prompt(lang), question, self.config.max_tokens)
            .await?;
        if reply == "HANDOFF" {
            return None;
        }
        Some(reply)
    }

    async fn summarize_as_title(&self, topic: Topic, first_message: &str) -> String {
        if !self.config.enabled {
            return fallback_title(topic.as_str());
        }
        let system = "Summarize the user's support question as a thread title \
                      of at most five words, in the user's language. Start the \
                      title with one fitting emoji. Reply with the title only.";
        match self.complete(system, first_message, 30).await {
            Some(title) => truncate_title(&title),
            None => fallback_title(topic.as_str()),
        }
    }
}
