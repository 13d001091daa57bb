//! # gymcraft VM
//!
//! A small sandboxed virtual machine for policies written by a text-generation
//! collaborator.
//!
//! ## Core Concepts
//! - **Policy module**: JSON document of named functions made of opcodes
//! - **Compiler**: symbol lookup, signature check and label resolution
//! - **Interpreter**: per-call frames with their own stack, bounded by
//!   instruction, call-depth and wall-clock budgets
//! - **Memory**: a JSON object the policy threads through an episode
//! - **Schema**: prompt-ready reference of the instruction set
//! - **Provider**: trait-based LLM communication (OpenAI-compatible APIs)

pub mod compile;
pub mod error;
pub mod interpreter;
pub mod memory;
pub mod opcode;
pub mod provider;
pub mod schema;
pub mod stack;
pub mod value;

pub use compile::{compile, CompiledFunction, CompiledPolicy, DEFAULT_ENTRY};
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use interpreter::{ExecutionLimits, ExecutionStep, Interpreter, PolicyOutput};
pub use memory::PolicyMemory;
pub use opcode::{LogLevel, Opcode, PolicyFunction, PolicyModule};
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    OpenAIProvider, ProviderConfig, ProviderError, ProviderType, Role, Usage, UsageTracker,
};
pub use schema::PolicySchema;
pub use stack::Stack;
