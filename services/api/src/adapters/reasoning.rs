//! services/api/src/adapters/reasoning.rs
//!
//! This module contains the adapter for the reasoning LLM.
//! It implements the `ReasoningService` port from the `core` crate on top of an
//! OpenAI-compatible chat endpoint, spreading calls over a ring of credentials.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use tutor_core::ports::{PortError, PortResult, Prompt, ReasoningService};
use tutor_core::text::truncate_words;

use crate::config::ReasoningConfig;

const SYSTEM_INSTRUCTIONS: &str = "You are a patient tutor's reasoning engine. Follow the output format the user message asks for exactly and add nothing else.";

//=========================================================================================
// Failure Classification
//=========================================================================================

/// How a failed call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 429 or quota exhaustion: cool the credential down and try another.
    RateLimited,
    /// 401/403: the credential is unusable for now.
    Unauthorized,
    /// 5xx, timeouts and connection resets: retry after a backoff.
    Transient,
    /// Anything else: give up on this call.
    Fatal,
}

impl FailureKind {
    fn benches_key(self) -> bool {
        matches!(self, FailureKind::RateLimited | FailureKind::Unauthorized)
    }
}

fn status_regex() -> &'static Regex {
    static STATUS: OnceLock<Regex> = OnceLock::new();
    STATUS.get_or_init(|| Regex::new(r"\b([45]\d\d)\b").expect("status pattern is valid"))
}

/// Classifies a client error from its rendered message.
pub fn classify_failure(message: &str) -> FailureKind {
    let lower = message.to_lowercase();

    if let Some(code) = status_regex()
        .captures(&lower)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
    {
        return match code {
            429 => FailureKind::RateLimited,
            401 | 403 => FailureKind::Unauthorized,
            500..=599 | 408 => FailureKind::Transient,
            _ => FailureKind::Fatal,
        };
    }

    if ["rate limit", "rate_limit", "too many requests", "insufficient_quota"]
        .iter()
        .any(|p| lower.contains(p))
    {
        FailureKind::RateLimited
    } else if ["invalid api key", "incorrect api key", "invalid_api_key", "unauthorized", "permission"]
        .iter()
        .any(|p| lower.contains(p))
    {
        FailureKind::Unauthorized
    } else if ["timed out", "timeout", "connection", "overloaded", "temporarily unavailable", "server_error"]
        .iter()
        .any(|p| lower.contains(p))
    {
        FailureKind::Transient
    } else {
        FailureKind::Fatal
    }
}

/// Capped exponential delay with equal jitter. `jitter` is expected in `[0, 1)`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration, jitter: f64) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt)).min(cap);
    let half = exponential / 2;
    half + half.mul_f64(jitter.clamp(0.0, 1.0))
}

//=========================================================================================
// Credential Ring
//=========================================================================================

/// Round-robin over credential slots, skipping any that are cooling down.
pub struct KeyRing {
    size: usize,
    cursor: AtomicUsize,
    cooling: RwLock<HashMap<usize, Instant>>,
    cooldown: Duration,
}

impl KeyRing {
    pub fn new(size: usize, cooldown: Duration) -> Self {
        Self {
            size,
            cursor: AtomicUsize::new(0),
            cooling: RwLock::new(HashMap::new()),
            cooldown,
        }
    }

    /// Usable slots in the order they should be tried. Each call starts one
    /// slot further along the ring.
    pub async fn available(&self) -> Vec<usize> {
        if self.size == 0 {
            return Vec::new();
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % self.size;

        let mut cooling = self.cooling.write().await;
        cooling.retain(|_, since| since.elapsed() < self.cooldown);

        (0..self.size)
            .map(|offset| (start + offset) % self.size)
            .filter(|slot| !cooling.contains_key(slot))
            .collect()
    }

    pub async fn cool_down(&self, slot: usize) {
        self.cooling.write().await.insert(slot, Instant::now());
        warn!(slot, cooldown_secs = self.cooldown.as_secs(), "credential entering cooldown");
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ReasoningService` using an OpenAI-compatible LLM.
pub struct OpenAiReasoningAdapter {
    clients: Vec<Client<OpenAIConfig>>,
    ring: KeyRing,
    model: String,
    max_retries: u32,
    retry_base: Duration,
    retry_cap: Duration,
}

impl OpenAiReasoningAdapter {
    /// Builds one client per configured credential.
    pub fn new(config: &ReasoningConfig) -> Self {
        let clients: Vec<Client<OpenAIConfig>> = config
            .api_keys
            .iter()
            .map(|key| {
                let mut openai = OpenAIConfig::new().with_api_key(key);
                if let Some(base) = &config.base_url {
                    openai = openai.with_api_base(base);
                }
                Client::with_config(openai)
            })
            .collect();

        Self {
            ring: KeyRing::new(clients.len(), config.key_cooldown),
            clients,
            model: config.model.clone(),
            max_retries: config.max_retries,
            retry_base: config.retry_base,
            retry_cap: config.retry_cap,
        }
    }

    pub fn credential_count(&self) -> usize {
        self.clients.len()
    }

    /// One chat completion against one credential. Errors come back rendered.
    async fn complete(&self, slot: usize, prompt: &Prompt) -> Result<String, String> {
        let client = self
            .clients
            .get(slot)
            .ok_or_else(|| format!("no credential in slot {slot}"))?;

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| e.to_string())?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.text.as_str())
                .build()
                .map_err(|e| e.to_string())?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_completion_tokens(prompt.max_output_tokens)
            .n(1)
            .build()
            .map_err(|e| e.to_string())?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| e.to_string())?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| "reasoning model returned no text content".to_string())
    }
}

//=========================================================================================
// `ReasoningService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ReasoningService for OpenAiReasoningAdapter {
    async fn generate(&self, prompt: &Prompt) -> PortResult<String> {
        let mut last_error = String::from("no attempt made");

        for attempt in 0..=self.max_retries {
            let Some(slot) = self.ring.available().await.first().copied() else {
                warn!(kind = prompt.kind.as_str(), "every reasoning credential is cooling down");
                return Err(PortError::Unexpected(
                    "no reasoning credential is currently available".to_string(),
                ));
            };

            debug!(kind = prompt.kind.as_str(), slot, attempt, "calling reasoning model");
            match self.complete(slot, prompt).await {
                Ok(text) => {
                    return Ok(match prompt.max_words {
                        Some(limit) => truncate_words(&text, limit as usize),
                        None => text,
                    });
                }
                Err(message) => {
                    let kind = classify_failure(&message);
                    warn!(
                        kind = prompt.kind.as_str(),
                        slot,
                        attempt,
                        failure = ?kind,
                        error = %message,
                        "reasoning call failed"
                    );
                    last_error = message;

                    if kind.benches_key() {
                        self.ring.cool_down(slot).await;
                    } else if kind == FailureKind::Transient {
                        if attempt < self.max_retries {
                            let jitter = rand::thread_rng().gen::<f64>();
                            tokio::time::sleep(backoff_delay(
                                attempt,
                                self.retry_base,
                                self.retry_cap,
                                jitter,
                            ))
                            .await;
                        }
                    } else {
                        break;
                    }
                }
            }
        }

        Err(PortError::Unexpected(last_error))
    }
}
