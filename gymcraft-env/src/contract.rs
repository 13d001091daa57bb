//! The environment contract shared by every simulated world.

use crate::render::Frame;
use gymcraft_error::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Free-form per-step diagnostics, a JSON object.
pub type Info = serde_json::Map<String, serde_json::Value>;

/// Lifecycle of an environment instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, never reset
    Uninitialized,
    /// Episode in progress
    Ready,
    /// Episode finished; only `reset` is accepted
    Terminal,
}

impl Phase {
    /// Fail with `InvalidState` unless an episode is running.
    pub fn ensure_ready(self, operation: &'static str) -> Result<()> {
        match self {
            Phase::Ready => Ok(()),
            Phase::Uninitialized => Err(Error::invalid_state("step called before reset")
                .with_operation(operation)),
            Phase::Terminal => Err(Error::invalid_state("episode has ended, call reset")
                .with_operation(operation)),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Ready => "ready",
            Phase::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

/// Outcome of one `step`.
#[derive(Debug, Clone)]
pub struct Transition<O> {
    pub observation: O,
    pub reward: f64,
    /// Goal reached or step limit hit
    pub terminated: bool,
    /// Always false for the bundled environments, the limit folds into `terminated`
    pub truncated: bool,
    pub info: Info,
}

impl<O> Transition<O> {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// A discrete-state simulated world.
///
/// Actions are small integer codes in `0..action_count()`. Each environment
/// keeps its own direction mapping; `describe()` spells it out for whoever
/// writes the policy.
pub trait Environment {
    type Observation: Serialize + Clone + fmt::Debug;

    /// Short identifier, e.g. `"grid_world"`
    fn name(&self) -> &'static str;

    fn action_count(&self) -> usize;

    /// Plain-text rules: actions, observation layout, reward, termination
    fn describe(&self) -> String;

    fn reset(&mut self) -> Result<(Self::Observation, Info)>;

    /// Apply one action. Codes outside `0..action_count()` are rejected with
    /// `InvalidAction` and leave the state untouched.
    fn step(&mut self, action: i64) -> Result<Transition<Self::Observation>>;

    /// Picture of the current state
    fn frame(&self) -> Frame;

    /// Best-effort visualization; a no-op when headless or closed.
    fn render(&mut self) -> Result<()>;

    /// Release rendering resources. Idempotent.
    fn close(&mut self);

    fn phase(&self) -> Phase;
}
