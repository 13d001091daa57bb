//! GridWorld - walk from a corner to the centre of a square grid.

use crate::contract::{Environment, Info, Phase, Transition};
use crate::render::{Cell, Frame, Palette, Renderer};
use crate::Position;
use gymcraft_error::{Error, ErrorKind, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Construction parameters for [`GridWorld`]
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Grid is `size x size`
    pub size: usize,
    /// Episode ends after this many steps
    pub max_steps: usize,
    /// Seed for the start-corner draw; `None` uses entropy
    pub seed: Option<u64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            size: 5,
            max_steps: 50,
            seed: None,
        }
    }
}

/// GridWorld action codes: 0=up, 1=down, 2=left, 3=right
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridAction {
    Up,
    Down,
    Left,
    Right,
}

impl GridAction {
    pub const COUNT: usize = 4;

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(GridAction::Up),
            1 => Some(GridAction::Down),
            2 => Some(GridAction::Left),
            3 => Some(GridAction::Right),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            GridAction::Up => 0,
            GridAction::Down => 1,
            GridAction::Left => 2,
            GridAction::Right => 3,
        }
    }

    fn delta(self) -> (isize, isize) {
        match self {
            GridAction::Up => (-1, 0),
            GridAction::Down => (1, 0),
            GridAction::Left => (0, -1),
            GridAction::Right => (0, 1),
        }
    }
}

/// A `size x size` grid with the goal fixed at the centre.
///
/// `step` reports only `(position, done)`; through the [`Environment`]
/// contract the reward is always `0.0`.
pub struct GridWorld {
    config: GridConfig,
    agent: Position,
    goal: Position,
    steps: usize,
    phase: Phase,
    rng: StdRng,
    renderer: Option<Box<dyn Renderer>>,
}

impl GridWorld {
    pub fn new(config: GridConfig) -> Result<Self> {
        if config.size == 0 {
            return Err(Error::config_invalid("grid size must be positive")
                .with_operation("grid_world::new"));
        }
        if config.max_steps == 0 {
            return Err(Error::config_invalid("max_steps must be positive")
                .with_operation("grid_world::new"));
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let centre = config.size / 2;
        Ok(Self {
            config,
            agent: Position::new(0, 0),
            goal: Position::new(centre, centre),
            steps: 0,
            phase: Phase::Uninitialized,
            rng,
            renderer: None,
        })
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn size(&self) -> usize {
        self.config.size
    }

    pub fn max_steps(&self) -> usize {
        self.config.max_steps
    }

    pub fn agent(&self) -> Position {
        self.agent
    }

    pub fn goal(&self) -> Position {
        self.goal
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Start a new episode with the agent on a random corner.
    pub fn reset(&mut self) -> Position {
        let edge = self.config.size - 1;
        let row = if self.rng.gen_bool(0.5) { 0 } else { edge };
        let col = if self.rng.gen_bool(0.5) { 0 } else { edge };
        self.start_episode(Position::new(row, col))
    }

    /// Start a new episode with the agent on a chosen cell.
    pub fn reset_to(&mut self, start: Position) -> Result<Position> {
        if !start.in_bounds(self.config.size, self.config.size) {
            return Err(Error::new(ErrorKind::OutOfBounds, format!("{} is off the grid", start))
                .with_operation("grid_world::reset_to")
                .with_context("size", self.config.size.to_string()));
        }
        Ok(self.start_episode(start))
    }

    fn start_episode(&mut self, start: Position) -> Position {
        let centre = self.config.size / 2;
        self.agent = start;
        self.goal = Position::new(centre, centre);
        self.steps = 0;
        self.phase = Phase::Ready;
        tracing::debug!(agent = %self.agent, goal = %self.goal, "grid world reset");
        self.agent
    }

    /// Move one cell. Returns the new position and whether the episode ended.
    pub fn step(&mut self, action: i64) -> Result<(Position, bool)> {
        self.phase.ensure_ready("grid_world::step")?;
        let action = GridAction::from_code(action).ok_or_else(|| {
            Error::invalid_action(action, GridAction::COUNT).with_operation("grid_world::step")
        })?;

        let size = self.config.size;
        self.agent = self.agent.offset_clamped(action.delta(), size, size);
        self.steps += 1;

        let done = self.steps >= self.config.max_steps || self.agent == self.goal;
        if done {
            self.phase = Phase::Terminal;
        }
        tracing::debug!(?action, agent = %self.agent, steps = self.steps, done, "grid world step");
        Ok((self.agent, done))
    }

    /// Agent and goal occupancy, each a flattened `size x size` channel.
    pub fn channels(&self) -> [Vec<u8>; 2] {
        let cells = self.config.size * self.config.size;
        let mut agent = vec![0; cells];
        let mut goal = vec![0; cells];
        agent[self.agent.index(self.config.size)] = 1;
        goal[self.goal.index(self.config.size)] = 1;
        [agent, goal]
    }

    pub fn frame(&self) -> Frame {
        let size = self.config.size;
        let [agent, goal] = self.channels();
        let mut frame = Frame::new(size, size, Palette::Channels);
        for row in 0..size {
            for col in 0..size {
                let pos = Position::new(row, col);
                let idx = pos.index(size);
                // The agent is painted last, matching the overlay order of the channels.
                if goal[idx] == 1 {
                    frame.set(pos, Cell::Goal);
                }
                if agent[idx] == 1 {
                    frame.set(pos, Cell::Agent);
                }
            }
        }
        frame
    }

    pub fn render(&mut self) -> Result<()> {
        if self.phase == Phase::Uninitialized {
            return Ok(());
        }
        let frame = self.frame();
        match self.renderer.as_mut() {
            Some(renderer) if renderer.is_open() => renderer.draw(&frame),
            _ => Ok(()),
        }
    }

    pub fn close(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.close();
        }
    }
}

impl Environment for GridWorld {
    type Observation = Position;

    fn name(&self) -> &'static str {
        "grid_world"
    }

    fn action_count(&self) -> usize {
        GridAction::COUNT
    }

    fn describe(&self) -> String {
        let size = self.config.size;
        format!(
            "GridWorld: a {size}x{size} grid. The agent starts on a random corner and must reach \
             the goal at the centre cell ({c}, {c}).\n\
             Observation: the agent position as [row, col].\n\
             Actions: 0 = up (row - 1), 1 = down (row + 1), 2 = left (col - 1), 3 = right (col + 1). \
             Moves into the border leave that coordinate unchanged.\n\
             Reward: always 0.\n\
             Termination: the agent reaches the goal, or {max} steps have been taken.",
            size = size,
            c = size / 2,
            max = self.config.max_steps,
        )
    }

    fn reset(&mut self) -> Result<(Position, Info)> {
        Ok((GridWorld::reset(self), Info::new()))
    }

    fn step(&mut self, action: i64) -> Result<Transition<Position>> {
        let (observation, done) = GridWorld::step(self, action)?;
        let mut info = Info::new();
        info.insert("steps".into(), self.steps.into());
        Ok(Transition {
            observation,
            reward: 0.0,
            terminated: done,
            truncated: false,
            info,
        })
    }

    fn frame(&self) -> Frame {
        GridWorld::frame(self)
    }

    fn render(&mut self) -> Result<()> {
        GridWorld::render(self)
    }

    fn close(&mut self) {
        GridWorld::close(self)
    }

    fn phase(&self) -> Phase {
        self.phase
    }
}
