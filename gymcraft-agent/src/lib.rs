//! # gymcraft Agent
//!
//! The agent orchestrates the LLM <-> environment loop:
//! 1. The collaborator receives the environment description and the policy language
//! 2. It answers with a policy module, which is compiled but not trusted
//! 3. Every step the policy runs in the VM with the observation and its memory
//! 4. If the policy faults, the failure is reported and a fixed policy requested
//! 5. After every episode the cumulative reward is fed back for refinement
//!
//! The LLM writes the policy, the VM runs it.

mod agent;
mod episode;
mod extract;
mod prompt;
mod reward_log;

pub use agent::{AgentConfig, PolicyAgent};
pub use episode::{run_episode, Controller, EpisodeReport, ProgramController, RandomController, Trainer};
pub use extract::extract_policy_source;
pub use reward_log::RewardLog;
