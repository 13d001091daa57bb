//! Policy agent - orchestrates the collaborator <-> VM loop

use crate::extract::extract_policy_source;
use crate::prompt;
use gymcraft_vm::{
    compile, ChatMessage, CompiledPolicy, CompletionRequest, Error, ExecutionLimits, Interpreter,
    LlmProvider, PolicyMemory, PolicySchema, Result, UsageTracker, DEFAULT_ENTRY,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Trace lines included in a failure report
const REPORT_TRACE_LINES: usize = 12;

/// Longest self-imposed wait between provider retries
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Invocations attempted per step before giving up
    pub max_attempts: usize,
    /// Function the policy module must define
    pub entry: String,
    /// Model override (provider default when `None`)
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub limits: ExecutionLimits,
    /// Seed for the policy's `RANDOM` instruction
    pub seed: Option<u64>,
    /// Retries for temporary provider errors, per request
    pub provider_retries: u32,
    /// First backoff delay, doubled on every retry
    pub retry_backoff: Duration,
    /// Actions are integers in `0..action_count`
    pub action_count: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            entry: DEFAULT_ENTRY.to_string(),
            model: None,
            temperature: None,
            limits: ExecutionLimits::default(),
            seed: None,
            provider_retries: 2,
            retry_backoff: Duration::from_millis(500),
            action_count: 4,
        }
    }
}

/// An agent whose policy is written by a collaborator.
///
/// The conversation is append-only and sent in full with every request. The
/// accepted policy is shared by reference until a reply replaces it.
pub struct PolicyAgent<P: LlmProvider> {
    provider: P,
    config: AgentConfig,
    messages: Vec<ChatMessage>,
    policy: Option<Arc<CompiledPolicy>>,
    memory: PolicyMemory,
    rng: StdRng,
    usage: UsageTracker,
    requests: usize,
}

impl<P: LlmProvider> PolicyAgent<P> {
    /// Build the opening conversation without contacting the collaborator.
    pub fn new(provider: P, config: AgentConfig, environment: &str) -> Result<Self> {
        if config.max_attempts == 0 {
            return Err(Error::config_invalid("max_attempts must be at least 1")
                .with_operation("policy_agent::new"));
        }
        if config.action_count == 0 {
            return Err(Error::config_invalid("action_count must be at least 1")
                .with_operation("policy_agent::new"));
        }
        let schema = PolicySchema::new(config.limits);
        let messages = vec![
            prompt::system_message(environment, &schema),
            prompt::initial_request(&config.entry),
        ];
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            provider,
            config,
            messages,
            policy: None,
            memory: PolicyMemory::new(),
            rng,
            usage: UsageTracker::new(),
            requests: 0,
        })
    }

    /// Build the agent and obtain the first policy.
    ///
    /// A first reply without a policy is fatal.
    pub async fn connect(provider: P, config: AgentConfig, environment: &str) -> Result<Self> {
        let mut agent = Self::new(provider, config, environment)?;
        tracing::info!(provider = agent.provider.name(), "asking for the first policy");
        agent.request_policy().await?;
        Ok(agent)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn policy(&self) -> Option<&Arc<CompiledPolicy>> {
        self.policy.as_ref()
    }

    pub fn memory(&self) -> &PolicyMemory {
        &self.memory
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Provider calls made so far, retries included
    pub fn requests(&self) -> usize {
        self.requests
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Send the conversation and adopt the policy in the reply, if any.
    ///
    /// Returns whether the policy was replaced. A reply without a policy keeps
    /// the current one, unless there is none yet.
    pub async fn request_policy(&mut self) -> Result<bool> {
        let reply = self.complete_with_retry().await?;
        self.messages.push(ChatMessage::assistant(reply.clone()));

        match extract_policy_source(&reply) {
            Some(source) => {
                let compiled = self.compile_policy(source)?;
                tracing::info!(
                    policy = compiled.name(),
                    instructions = compiled.instruction_count(),
                    "accepted new policy"
                );
                self.policy = Some(Arc::new(compiled));
                Ok(true)
            }
            None if self.policy.is_some() => {
                tracing::debug!("reply holds no policy, keeping the current one");
                Ok(false)
            }
            None => Err(Error::policy_compilation("no policy defined but one is required")
                .with_operation("policy_agent::request_policy")),
        }
    }

    /// Compile policy source with the configured entry symbol.
    pub fn compile_policy(&self, source: &str) -> Result<CompiledPolicy> {
        compile(source, &self.config.entry).map_err(|e| e.with_operation("policy_agent::compile_policy"))
    }

    /// Start a new episode: memory is emptied.
    pub fn reset(&mut self) {
        self.memory.clear();
    }

    /// Choose an action for `observation`.
    ///
    /// A policy fault is reported to the collaborator and the step is retried
    /// with the policy it sends back, up to `max_attempts` times. Failed
    /// invocations leave memory untouched.
    pub async fn act(&mut self, observation: &Value) -> Result<i64> {
        let max_attempts = self.config.max_attempts;
        let mut last_fault = None;

        for attempt in 1..=max_attempts {
            let policy = self.policy.clone().ok_or_else(|| {
                Error::invalid_state("no policy has been accepted yet").with_operation("policy_agent::act")
            })?;
            let (outcome, trace) = {
                let mut interpreter = Interpreter::new(&policy, self.config.limits);
                let outcome = interpreter
                    .invoke(observation, &self.memory, &mut self.rng)
                    .and_then(|out| Ok((out.action_index(self.config.action_count)?, out.memory)));
                let trace = match outcome {
                    Ok(_) => String::new(),
                    Err(_) => interpreter.trace_excerpt(REPORT_TRACE_LINES),
                };
                (outcome, trace)
            };

            match outcome {
                Ok((action, memory)) => {
                    self.memory = memory;
                    return Ok(action);
                }
                Err(e) if e.kind().is_policy_fault() => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "policy invocation failed, asking for a new policy"
                    );
                    self.messages.push(prompt::failure_report(
                        observation,
                        &self.memory,
                        &e,
                        &trace,
                        &self.config.entry,
                    ));
                    self.request_policy().await?;
                    last_fault = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let exhausted = Error::policy_exhausted(max_attempts).with_operation("policy_agent::act");
        Err(match last_fault {
            Some(fault) => exhausted.set_source(fault),
            None => exhausted,
        })
    }

    /// Report the episode's reward and let the collaborator improve the policy.
    ///
    /// Returns whether the policy was replaced.
    pub async fn learn(&mut self, cumulative_reward: f64) -> Result<bool> {
        self.messages.push(prompt::learn_feedback(cumulative_reward));
        self.request_policy().await
    }

    async fn complete_with_retry(&mut self) -> Result<String> {
        let mut retries = 0;
        loop {
            let mut request = CompletionRequest::new(self.messages.clone());
            if let Some(model) = &self.config.model {
                request = request.with_model(model.clone());
            }
            if let Some(temperature) = self.config.temperature {
                request = request.with_temperature(temperature);
            }

            self.requests += 1;
            match self.provider.complete(request).await {
                Ok(response) => {
                    self.usage.track(&response.model, &response.usage);
                    return response.content.ok_or_else(|| {
                        Error::inference_failed("collaborator returned no content")
                            .permanent()
                            .with_operation("policy_agent::request_policy")
                    });
                }
                Err(e) => {
                    let err = Error::from(e).with_operation("policy_agent::request_policy");
                    if err.is_retryable() && retries < self.config.provider_retries {
                        retries += 1;
                        let delay = retry_delay(self.config.retry_backoff, retries, &err);
                        tracing::warn!(retries, delay_ms = delay.as_millis() as u64, error = %err, "provider request failed, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err.persist());
                }
            }
        }
    }
}

/// Exponential backoff from `base`, capped at [`MAX_BACKOFF`], stretched to the
/// server's `retry_after` hint.
fn retry_delay(base: Duration, retry: u32, err: &Error) -> Duration {
    let backoff = base
        .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
        .min(MAX_BACKOFF);
    let hint = err
        .context_value("retry_after")
        .and_then(|secs| secs.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_default();
    backoff.max(hint)
}
