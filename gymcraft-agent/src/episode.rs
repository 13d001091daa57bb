//! Controllers and the episode loop.
//!
//! A [`Controller`] turns observations into actions. The loop resets the
//! environment and the controller, steps until the episode is done, and
//! reports the cumulative reward. Any error aborts the episode.

use crate::agent::PolicyAgent;
use crate::reward_log::RewardLog;
use gymcraft_env::Environment;
use gymcraft_vm::{
    compile, CompiledPolicy, Error, ExecutionLimits, Interpreter, LlmProvider, PolicyMemory, Result,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Anything that picks actions for an environment
#[allow(async_fn_in_trait)]
pub trait Controller {
    fn name(&self) -> &str;

    /// Called at the start of every episode
    fn reset(&mut self);

    async fn act(&mut self, observation: &Value) -> Result<i64>;

    /// Called at the end of every episode with its cumulative reward
    async fn learn(&mut self, cumulative_reward: f64) -> Result<()>;
}

impl<P: LlmProvider> Controller for PolicyAgent<P> {
    fn name(&self) -> &str {
        self.provider().name()
    }

    fn reset(&mut self) {
        PolicyAgent::reset(self)
    }

    async fn act(&mut self, observation: &Value) -> Result<i64> {
        PolicyAgent::act(self, observation).await
    }

    async fn learn(&mut self, cumulative_reward: f64) -> Result<()> {
        PolicyAgent::learn(self, cumulative_reward).await.map(|_| ())
    }
}

/// Uniformly random actions
pub struct RandomController {
    rng: StdRng,
    action_count: usize,
}

impl RandomController {
    pub fn new(action_count: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, action_count }
    }
}

impl Controller for RandomController {
    fn name(&self) -> &str {
        "random"
    }

    fn reset(&mut self) {}

    async fn act(&mut self, _observation: &Value) -> Result<i64> {
        if self.action_count == 0 {
            return Err(Error::config_invalid("no actions to choose from"));
        }
        Ok(self.rng.gen_range(0..self.action_count) as i64)
    }

    async fn learn(&mut self, _cumulative_reward: f64) -> Result<()> {
        Ok(())
    }
}

/// Runs a fixed policy module with no collaborator; every fault is fatal.
pub struct ProgramController {
    policy: CompiledPolicy,
    memory: PolicyMemory,
    limits: ExecutionLimits,
    rng: StdRng,
    action_count: usize,
}

impl ProgramController {
    pub fn new(policy: CompiledPolicy, action_count: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            policy,
            memory: PolicyMemory::new(),
            limits: ExecutionLimits::default(),
            rng,
            action_count,
        }
    }

    /// Compile `source` with `entry` as the entry point
    pub fn from_source(source: &str, entry: &str, action_count: usize, seed: Option<u64>) -> Result<Self> {
        Ok(Self::new(compile(source, entry)?, action_count, seed))
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn memory(&self) -> &PolicyMemory {
        &self.memory
    }
}

impl Controller for ProgramController {
    fn name(&self) -> &str {
        self.policy.name()
    }

    fn reset(&mut self) {
        self.memory.clear();
    }

    async fn act(&mut self, observation: &Value) -> Result<i64> {
        let output = Interpreter::new(&self.policy, self.limits)
            .invoke(observation, &self.memory, &mut self.rng)
            .map_err(|e| e.with_operation("program_controller::act"))?;
        let action = output.action_index(self.action_count)?;
        self.memory = output.memory;
        Ok(action)
    }

    async fn learn(&mut self, _cumulative_reward: f64) -> Result<()> {
        Ok(())
    }
}

/// Outcome of one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub episode: usize,
    pub total_reward: f64,
    pub steps: usize,
    /// Reached a terminal state (as opposed to being truncated)
    pub terminated: bool,
}

/// Run one episode to completion.
pub async fn run_episode<E, C>(
    env: &mut E,
    controller: &mut C,
    episode: usize,
    render: bool,
) -> Result<EpisodeReport>
where
    E: Environment,
    C: Controller,
{
    let (mut observation, _info) = env.reset()?;
    controller.reset();

    let mut total_reward = 0.0;
    let mut steps = 0;
    loop {
        if render {
            env.render()?;
        }
        let observation_value = serde_json::to_value(&observation).map_err(|e| {
            Error::serialization_failed("observation could not be encoded")
                .with_operation("run_episode")
                .set_source(e)
        })?;
        let action = controller.act(&observation_value).await?;
        let transition = env.step(action)?;

        steps += 1;
        total_reward += transition.reward;
        tracing::debug!(episode, step = steps, action, reward = transition.reward, "step");

        observation = transition.observation;
        if transition.terminated || transition.truncated {
            if render {
                env.render()?;
            }
            tracing::debug!(episode, "final state:\n{}", env.frame().to_ascii());
            return Ok(EpisodeReport {
                episode,
                total_reward,
                steps,
                terminated: transition.terminated,
            });
        }
    }
}

/// Runs episodes back to back, feeding each cumulative reward to the controller
#[derive(Debug)]
pub struct Trainer {
    episodes: usize,
    render: bool,
    reward_log: Option<RewardLog>,
}

impl Trainer {
    pub fn new(episodes: usize) -> Self {
        Self {
            episodes,
            render: false,
            reward_log: None,
        }
    }

    pub fn with_render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }

    pub fn with_reward_log(mut self, log: RewardLog) -> Self {
        self.reward_log = Some(log);
        self
    }

    pub async fn run<E, C>(&mut self, env: &mut E, controller: &mut C) -> Result<Vec<EpisodeReport>>
    where
        E: Environment,
        C: Controller,
    {
        let mut reports = Vec::with_capacity(self.episodes);
        for episode in 0..self.episodes {
            tracing::info!(episode, env = env.name(), controller = controller.name(), "episode started");
            let report = run_episode(env, controller, episode, self.render)
                .await
                .map_err(|e| e.with_context("episode", episode.to_string()))?;

            controller.learn(report.total_reward).await?;
            if let Some(log) = self.reward_log.as_mut() {
                log.record(&report)?;
            }
            tracing::info!(
                episode,
                steps = report.steps,
                total_reward = report.total_reward,
                "Episode {} ended with a cumulative reward of {}.",
                episode,
                report.total_reward
            );
            reports.push(report);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{constant, ScriptedProvider};
    use crate::agent::AgentConfig;
    use gymcraft_env::{GridConfig, GridWorld, MazeConfig, Position, SimpleMaze};
    use gymcraft_vm::ErrorKind;
    use serde_json::json;

    /// Down until the centre row, then right
    const TO_CENTRE: &str = r#"{
        "functions": {
            "policy": {
                "params": ["observation", "memory"],
                "code": [
                    {"op": "LOAD", "path": "observation.0"},
                    {"op": "PUSH", "value": 2},
                    {"op": "LT"},
                    {"op": "JUMP_UNLESS", "target": "right"},
                    {"op": "PUSH", "value": 1},
                    {"op": "RETURN"},
                    {"op": "LABEL", "name": "right"},
                    {"op": "PUSH", "value": 3},
                    {"op": "RETURN"}
                ]
            }
        }
    }"#;

    fn grid() -> GridWorld {
        GridWorld::new(GridConfig { seed: Some(1), ..Default::default() }).unwrap()
    }

    #[tokio::test]
    async fn test_random_controller_stays_in_range() {
        let mut controller = RandomController::new(4, Some(9));
        for _ in 0..100 {
            let a = controller.act(&json!(null)).await.unwrap();
            assert!((0..4).contains(&a));
        }
    }

    #[tokio::test]
    async fn test_random_episode_is_bounded() {
        let mut env = SimpleMaze::new(MazeConfig { seed: Some(5), ..Default::default() }).unwrap();
        let mut controller = RandomController::new(4, Some(5));
        let report = run_episode(&mut env, &mut controller, 0, false).await.unwrap();
        assert!(report.steps <= 100);
        assert!(report.steps >= 1);
    }

    #[tokio::test]
    async fn test_program_controller_reaches_goal_from_corner() {
        let mut env = grid();
        let mut controller = ProgramController::from_source(TO_CENTRE, "policy", 4, None).unwrap();
        env.reset_to(Position::new(0, 0)).unwrap();

        let mut observation = json!([0, 0]);
        let mut path = Vec::new();
        loop {
            let action = controller.act(&observation).await.unwrap();
            let (pos, done) = env.step(action).unwrap();
            path.push(pos);
            observation = serde_json::to_value(pos).unwrap();
            if done {
                break;
            }
        }
        assert_eq!(
            path,
            vec![Position::new(1, 0), Position::new(2, 0), Position::new(2, 1), Position::new(2, 2)]
        );
    }

    #[tokio::test]
    async fn test_program_controller_fault_is_fatal() {
        let source = r#"{"functions": {"policy": {"params": ["o", "m"], "code": [{"op": "PUSH", "value": 7}, {"op": "RETURN"}]}}}"#;
        let mut env = grid();
        let mut controller = ProgramController::from_source(source, "policy", 4, None).unwrap();
        let err = run_episode(&mut env, &mut controller, 0, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyExecution);
    }

    #[tokio::test]
    async fn test_trainer_feeds_rewards_back() {
        // Initial policy plus one (policy-free) reply per learn call
        let replies = vec![
            constant(1),
            "Keeping the policy.".to_string(),
            "Still keeping it.".to_string(),
        ];
        let config = AgentConfig { seed: Some(1), ..Default::default() };
        let mut agent = PolicyAgent::connect(ScriptedProvider::replying(replies), config, "maze")
            .await
            .unwrap();
        let mut env = SimpleMaze::new(MazeConfig { rows: 3, cols: 3, time_limit: 5, seed: Some(2), ..Default::default() })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewards.jsonl");
        let mut trainer = Trainer::new(2).with_reward_log(RewardLog::create(&path).unwrap());
        let reports = trainer.run(&mut env, &mut agent).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(agent.provider().calls(), 3);
        let feedback: Vec<_> = agent
            .messages()
            .iter()
            .filter(|m| m.content.starts_with("The episode has ended"))
            .collect();
        assert_eq!(feedback.len(), 2);

        let logged = RewardLog::read(&path).unwrap();
        assert_eq!(logged.len(), 2);
        for (logged, report) in logged.iter().zip(&reports) {
            assert_eq!(logged.episode, report.episode);
            assert_eq!(logged.steps, report.steps);
            assert!((logged.total_reward - report.total_reward).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_exhausted_policy_aborts_episode() {
        let failing = crate::agent::tests::reply(json!([{"op": "FAIL", "error": "nope"}]));
        let replies = std::iter::repeat(failing).take(6).collect();
        let mut agent = PolicyAgent::connect(ScriptedProvider::replying(replies), AgentConfig::default(), "grid")
            .await
            .unwrap();
        let mut env = grid();
        let err = Trainer::new(3).run(&mut env, &mut agent).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyExhausted);
        assert_eq!(err.context_value("episode"), Some("0"));
    }
}
