//! # LLM Provider Interface
//!
//! A trait-based abstraction for talking to the policy-writing collaborator.
//!
//! ## Design
//! - `LlmProvider` trait defines the core interface
//! - `OpenAIProvider` covers every OpenAI-compatible chat endpoint
//!   (OpenAI, Azure OpenAI, DeepSeek, Hugging Face router, local servers)
//! - Usage tracking

pub mod openai;

pub use openai::OpenAIProvider;

use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Core Types
// ============================================================================

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Pretty print the message to stdout
    pub fn pretty_print(&self) {
        let role_str = match self.role {
            Role::System => "SYSTEM",
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        };
        println!("[{}]", role_str);
        println!("{}", self.content);
        println!();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Request parameters for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Error type for provider operations
#[derive(Debug)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// API returned an error
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited
    RateLimited { retry_after: Option<u64> },
    /// Authentication failed
    AuthenticationFailed,
    /// Other error
    Other(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {}s)", secs)?;
                }
                Ok(())
            }
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        let (kind, temporary) = match &err {
            ProviderError::Network(_) => (ErrorKind::NetworkFailed, true),
            ProviderError::RateLimited { .. } => (ErrorKind::RateLimited, true),
            ProviderError::AuthenticationFailed => (ErrorKind::AuthenticationFailed, false),
            ProviderError::Api { status, .. } => (ErrorKind::InferenceFailed, *status >= 500),
            ProviderError::Parse(_) => (ErrorKind::ParseFailed, false),
            ProviderError::Other(_) => (ErrorKind::InferenceFailed, false),
        };
        let mut error = Error::new(kind, err.to_string()).with_operation("provider::complete");
        match &err {
            ProviderError::Api { status, .. } => {
                error = error.with_context("status", status.to_string());
            }
            ProviderError::RateLimited { retry_after: Some(secs) } => {
                error = error.with_context("retry_after", secs.to_string());
            }
            _ => {}
        }
        let error = if temporary { error.temporary() } else { error.permanent() };
        error.set_source(err)
    }
}

/// The main LLM provider trait
#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openai", "azure")
    fn name(&self) -> &str;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Send a completion request and get a full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Azure OpenAI API version used by the preset
pub const AZURE_API_VERSION: &str = "2024-02-15-preview";

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    /// Extra query parameters appended to every request
    pub query: Vec<(String, String)>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAI,
    Azure,
    DeepSeek,
    HuggingFace,
    Local,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAI => "openai",
            ProviderType::Azure => "azure",
            ProviderType::DeepSeek => "deepseek",
            ProviderType::HuggingFace => "huggingface",
            ProviderType::Local => "local",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderType::OpenAI),
            "azure" => Ok(ProviderType::Azure),
            "deepseek" => Ok(ProviderType::DeepSeek),
            "huggingface" | "hf" => Ok(ProviderType::HuggingFace),
            "local" => Ok(ProviderType::Local),
            other => Err(Error::config_invalid(format!("unknown provider '{}'", other))
                .with_context("provider", other.to_string())),
        }
    }
}

impl ProviderConfig {
    fn preset(provider_type: ProviderType, api_key: Option<String>, base_url: &str, model: &str) -> Self {
        Self {
            provider_type,
            api_key,
            base_url: Some(base_url.trim_end_matches('/').to_string()),
            default_model: Some(model.to_string()),
            headers: HashMap::new(),
            query: Vec::new(),
            timeout_secs: Some(120),
        }
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::preset(ProviderType::OpenAI, Some(api_key.into()), "https://api.openai.com/v1", "gpt-4o-mini")
    }

    /// Azure OpenAI: the deployment is addressed by URL and the key goes in
    /// an `api-key` header.
    pub fn azure(endpoint: &str, deployment: &str, api_key: impl Into<String>) -> Self {
        let base = format!(
            "{}/openai/deployments/{}",
            endpoint.trim_end_matches('/'),
            deployment
        );
        let mut config = Self::preset(ProviderType::Azure, None, &base, deployment);
        config.headers.insert("api-key".into(), api_key.into());
        config.query.push(("api-version".into(), AZURE_API_VERSION.into()));
        config
    }

    pub fn deepseek(api_key: impl Into<String>) -> Self {
        Self::preset(ProviderType::DeepSeek, Some(api_key.into()), "https://api.deepseek.com", "deepseek-chat")
    }

    /// Hugging Face inference router (OpenAI-compatible)
    pub fn huggingface(token: impl Into<String>) -> Self {
        Self::preset(
            ProviderType::HuggingFace,
            Some(token.into()),
            "https://router.huggingface.co/v1",
            "meta-llama/Llama-3.1-8B-Instruct",
        )
    }

    /// Any OpenAI-compatible server without authentication (vLLM, Ollama, ...)
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let mut config = Self::preset(ProviderType::Local, None, &base_url.into(), &model.into());
        config.timeout_secs = Some(300);
        config
    }

    /// Build a preset from environment variables.
    ///
    /// | provider      | variables                                    |
    /// |---------------|----------------------------------------------|
    /// | `openai`      | `OPENAI_API_KEY`                             |
    /// | `azure`       | `AZURE_API_KEY`, `AZURE_ENDPOINT`, `AZURE_DEPLOYMENT` (default `gpt-4o`) |
    /// | `deepseek`    | `DEEPSEEK_API_KEY`                           |
    /// | `huggingface` | `HF_TOKEN`                                   |
    /// | `local`       | `LOCAL_BASE_URL`, `LOCAL_MODEL` (both optional) |
    pub fn from_env(provider_type: ProviderType) -> crate::error::Result<Self> {
        Self::from_lookup(provider_type, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        provider_type: ProviderType,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> crate::error::Result<Self> {
        let required = |key: &'static str| {
            lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
                Error::config_invalid(format!("{} is not set", key))
                    .with_operation("provider_config::from_env")
                    .with_context("provider", provider_type.as_str())
                    .with_context("variable", key)
            })
        };
        Ok(match provider_type {
            ProviderType::OpenAI => Self::openai(required("OPENAI_API_KEY")?),
            ProviderType::Azure => {
                let deployment = lookup("AZURE_DEPLOYMENT").unwrap_or_else(|| "gpt-4o".to_string());
                Self::azure(&required("AZURE_ENDPOINT")?, &deployment, required("AZURE_API_KEY")?)
            }
            ProviderType::DeepSeek => Self::deepseek(required("DEEPSEEK_API_KEY")?),
            ProviderType::HuggingFace => Self::huggingface(required("HF_TOKEN")?),
            ProviderType::Local => Self::local(
                lookup("LOCAL_BASE_URL").unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
                lookup("LOCAL_MODEL").unwrap_or_else(|| "llama3.1".to_string()),
            ),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

// ============================================================================
// Usage Tracking
// ============================================================================

/// Tracks token usage across multiple calls
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    pub total_calls: usize,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub by_model: HashMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.total_calls += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    pub fn total_tokens(&self) -> usize {
        self.total_prompt_tokens + self.total_completion_tokens
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are an RL agent");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You are an RL agent");

        assert_eq!(ChatMessage::user("obs").role, Role::User);
        assert_eq!(ChatMessage::assistant("```json {}```").role, Role::Assistant);
    }

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new(vec![ChatMessage::user("Hello")])
            .with_model("gpt-4o")
            .with_temperature(0.7)
            .with_max_tokens(800);

        assert_eq!(request.model, Some("gpt-4o".into()));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(800));
    }

    #[test]
    fn test_provider_presets() {
        let config = ProviderConfig::openai("sk-test");
        assert_eq!(config.provider_type, ProviderType::OpenAI);
        assert_eq!(config.default_model.as_deref(), Some("gpt-4o-mini"));

        let config = ProviderConfig::azure("https://example.openai.azure.com/", "gpt-4o", "key");
        assert_eq!(
            config.base_url.as_deref(),
            Some("https://example.openai.azure.com/openai/deployments/gpt-4o")
        );
        assert_eq!(config.headers.get("api-key").map(String::as_str), Some("key"));
        assert!(config.api_key.is_none());
        assert_eq!(config.query, vec![("api-version".to_string(), AZURE_API_VERSION.to_string())]);

        let config = ProviderConfig::deepseek("k");
        assert_eq!(config.base_url.as_deref(), Some("https://api.deepseek.com"));
        assert_eq!(config.default_model.as_deref(), Some("deepseek-chat"));

        let config = ProviderConfig::openai("k").with_timeout(15);
        assert_eq!(config.timeout_secs, Some(15));
    }

    #[test]
    fn test_from_lookup() {
        let config = ProviderConfig::from_lookup(ProviderType::DeepSeek, |key| {
            (key == "DEEPSEEK_API_KEY").then(|| "secret".to_string())
        })
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("secret"));

        let err = ProviderConfig::from_lookup(ProviderType::Azure, |_| None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("variable"), Some("AZURE_ENDPOINT"));

        let local = ProviderConfig::from_lookup(ProviderType::Local, |_| None).unwrap();
        assert_eq!(local.base_url.as_deref(), Some("http://localhost:11434/v1"));
    }

    #[test]
    fn test_provider_type_parse() {
        assert_eq!("Azure".parse::<ProviderType>().unwrap(), ProviderType::Azure);
        assert_eq!("hf".parse::<ProviderType>().unwrap(), ProviderType::HuggingFace);
        assert!("anthropic".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_provider_error_conversion() {
        let err: Error = ProviderError::Network("reset".into()).into();
        assert_eq!(err.kind(), ErrorKind::NetworkFailed);
        assert!(err.is_retryable());

        let err: Error = ProviderError::AuthenticationFailed.into();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert!(!err.is_retryable());

        let err: Error = ProviderError::Api { status: 503, message: "busy".into() }.into();
        assert_eq!(err.kind(), ErrorKind::InferenceFailed);
        assert_eq!(err.context_value("status"), Some("503"));
        assert!(err.is_retryable());

        let err: Error = ProviderError::Api { status: 400, message: "bad".into() }.into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rate_limit_keeps_retry_after() {
        let err: Error = ProviderError::RateLimited { retry_after: Some(20) }.into();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());
        assert_eq!(err.context_value("retry_after"), Some("20"));

        let err: Error = ProviderError::RateLimited { retry_after: None }.into();
        assert_eq!(err.context_value("retry_after"), None);
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();
        tracker.track("gpt-4o", &Usage { prompt_tokens: 100, completion_tokens: 50, total_tokens: 150 });
        tracker.track("gpt-4o", &Usage { prompt_tokens: 200, completion_tokens: 100, total_tokens: 300 });

        assert_eq!(tracker.total_calls, 2);
        assert_eq!(tracker.total_prompt_tokens, 300);
        assert_eq!(tracker.total_tokens(), 450);
        assert_eq!(tracker.by_model["gpt-4o"].total_tokens, 450);
    }
}
