//! SimpleMaze - random walls between the top-left start and the bottom-right goal.

use crate::contract::{Environment, Info, Phase, Transition};
use crate::render::{Cell, Frame, Palette, Renderer};
use crate::Position;
use gymcraft_error::{Error, ErrorKind, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Reward on the step that lands on the goal
pub const GOAL_REWARD: f64 = 1.0;

/// Reward on every other step
pub const STEP_PENALTY: f64 = -0.01;

/// Construction parameters for [`SimpleMaze`]
#[derive(Debug, Clone)]
pub struct MazeConfig {
    pub rows: usize,
    pub cols: usize,
    /// Toggle a few walls after every step
    pub dynamic: bool,
    /// Episode ends once this many steps have been taken
    pub time_limit: usize,
    /// Seed for wall placement; `None` uses entropy
    pub seed: Option<u64>,
}

impl Default for MazeConfig {
    fn default() -> Self {
        Self {
            rows: 10,
            cols: 10,
            dynamic: false,
            time_limit: 100,
            seed: None,
        }
    }
}

/// SimpleMaze action codes: 0=up, 1=right, 2=down, 3=left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MazeAction {
    Up,
    Right,
    Down,
    Left,
}

impl MazeAction {
    pub const COUNT: usize = 4;

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MazeAction::Up),
            1 => Some(MazeAction::Right),
            2 => Some(MazeAction::Down),
            3 => Some(MazeAction::Left),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            MazeAction::Up => 0,
            MazeAction::Right => 1,
            MazeAction::Down => 2,
            MazeAction::Left => 3,
        }
    }

    fn delta(self) -> (isize, isize) {
        match self {
            MazeAction::Up => (-1, 0),
            MazeAction::Right => (0, 1),
            MazeAction::Down => (1, 0),
            MazeAction::Left => (0, -1),
        }
    }
}

/// Full occupancy map plus the agent position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MazeObservation {
    /// `grid[row][col]` is 1 for a wall, 0 for free space
    pub grid: Vec<Vec<u8>>,
    pub agent: Position,
}

pub struct SimpleMaze {
    config: MazeConfig,
    walls: Vec<bool>,
    agent: Position,
    goal: Position,
    time_step: usize,
    phase: Phase,
    rng: StdRng,
    renderer: Option<Box<dyn Renderer>>,
}

impl SimpleMaze {
    pub fn new(config: MazeConfig) -> Result<Self> {
        if config.rows * config.cols < 2 {
            return Err(Error::config_invalid("maze needs at least two cells")
                .with_operation("maze::new")
                .with_context("rows", config.rows.to_string())
                .with_context("cols", config.cols.to_string()));
        }
        if config.time_limit == 0 {
            return Err(Error::config_invalid("time_limit must be positive")
                .with_operation("maze::new"));
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let goal = Position::new(config.rows - 1, config.cols - 1);
        Ok(Self {
            walls: vec![false; config.rows * config.cols],
            agent: Position::new(0, 0),
            goal,
            time_step: 0,
            phase: Phase::Uninitialized,
            rng,
            renderer: None,
            config,
        })
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn rows(&self) -> usize {
        self.config.rows
    }

    pub fn cols(&self) -> usize {
        self.config.cols
    }

    pub fn agent(&self) -> Position {
        self.agent
    }

    pub fn goal(&self) -> Position {
        self.goal
    }

    pub fn time_step(&self) -> usize {
        self.time_step
    }

    /// Out-of-bounds cells count as free; moves never reach them anyway.
    pub fn is_wall(&self, pos: Position) -> bool {
        pos.in_bounds(self.config.rows, self.config.cols) && self.walls[pos.index(self.config.cols)]
    }

    pub fn wall_count(&self) -> usize {
        self.walls.iter().filter(|&&w| w).count()
    }

    /// Draw a fresh random layout and put the agent back on the start cell.
    ///
    /// About a quarter of the cells are drawn as walls (draws may repeat), then
    /// the start and goal cells are cleared whatever the draw said.
    pub fn reset(&mut self) -> (MazeObservation, Info) {
        let (rows, cols) = (self.config.rows, self.config.cols);
        self.walls.iter_mut().for_each(|w| *w = false);
        for _ in 0..(rows * cols / 4) {
            let pos = self.random_cell();
            self.walls[pos.index(cols)] = true;
        }

        self.agent = Position::new(0, 0);
        self.goal = Position::new(rows - 1, cols - 1);
        self.walls[self.agent.index(cols)] = false;
        self.walls[self.goal.index(cols)] = false;
        self.time_step = 0;
        self.phase = Phase::Ready;

        tracing::debug!(walls = self.wall_count(), dynamic = self.config.dynamic, "maze reset");
        (self.observation(), Info::new())
    }

    pub fn observation(&self) -> MazeObservation {
        let grid = self
            .walls
            .chunks(self.config.cols)
            .map(|row| row.iter().map(|&w| u8::from(w)).collect())
            .collect();
        MazeObservation {
            grid,
            agent: self.agent,
        }
    }

    /// Place or remove a wall in the current layout.
    pub fn set_wall(&mut self, pos: Position, wall: bool) -> Result<()> {
        if self.phase == Phase::Uninitialized {
            return Err(Error::invalid_state("maze layout does not exist before reset")
                .with_operation("maze::set_wall"));
        }
        if !pos.in_bounds(self.config.rows, self.config.cols) {
            return Err(Error::new(ErrorKind::OutOfBounds, format!("{} is outside the maze", pos))
                .with_operation("maze::set_wall"));
        }
        if wall && (pos == self.agent || pos == self.goal) {
            return Err(Error::invalid_argument("agent and goal cells are never walls")
                .with_operation("maze::set_wall")
                .with_context("position", pos.to_string()));
        }
        self.walls[pos.index(self.config.cols)] = wall;
        Ok(())
    }

    /// Remove every wall from the current layout.
    pub fn clear_walls(&mut self) -> Result<()> {
        if self.phase == Phase::Uninitialized {
            return Err(Error::invalid_state("maze layout does not exist before reset")
                .with_operation("maze::clear_walls"));
        }
        self.walls.iter_mut().for_each(|w| *w = false);
        Ok(())
    }

    pub fn step(&mut self, action: i64) -> Result<Transition<MazeObservation>> {
        self.phase.ensure_ready("maze::step")?;
        let action = MazeAction::from_code(action).ok_or_else(|| {
            Error::invalid_action(action, MazeAction::COUNT).with_operation("maze::step")
        })?;

        let candidate = self
            .agent
            .offset_clamped(action.delta(), self.config.rows, self.config.cols);
        let blocked = self.is_wall(candidate);
        if !blocked {
            self.agent = candidate;
        }

        let reached_goal = self.agent == self.goal;
        let reward = if reached_goal { GOAL_REWARD } else { STEP_PENALTY };

        if self.config.dynamic {
            self.toggle_walls();
        }

        self.time_step += 1;
        let terminated = reached_goal || self.time_step >= self.config.time_limit;
        if terminated {
            self.phase = Phase::Terminal;
        }

        tracing::debug!(
            ?action,
            agent = %self.agent,
            blocked,
            reward,
            time_step = self.time_step,
            "maze step"
        );

        let mut info = Info::new();
        info.insert("time_step".into(), self.time_step.into());
        info.insert("blocked".into(), blocked.into());
        info.insert("reached_goal".into(), reached_goal.into());

        Ok(Transition {
            observation: self.observation(),
            reward,
            terminated,
            truncated: false,
            info,
        })
    }

    /// Flip `rows*cols/20` random cells, never the agent's or the goal's.
    fn toggle_walls(&mut self) {
        let cols = self.config.cols;
        for _ in 0..(self.config.rows * cols / 20) {
            let pos = self.random_cell();
            if pos != self.agent && pos != self.goal {
                let idx = pos.index(cols);
                self.walls[idx] = !self.walls[idx];
            }
        }
    }

    fn random_cell(&mut self) -> Position {
        Position::new(
            self.rng.gen_range(0..self.config.rows),
            self.rng.gen_range(0..self.config.cols),
        )
    }

    pub fn frame(&self) -> Frame {
        let mut frame = Frame::new(self.config.rows, self.config.cols, Palette::Viridis);
        for row in 0..self.config.rows {
            for col in 0..self.config.cols {
                let pos = Position::new(row, col);
                if self.is_wall(pos) {
                    frame.set(pos, Cell::Wall);
                }
            }
        }
        frame.set(self.agent, Cell::Agent);
        frame.set(self.goal, Cell::Goal);
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

impl Environment for SimpleMaze {
    type Observation = MazeObservation;

    fn name(&self) -> &'static str {
        "simple_maze"
    }

    fn action_count(&self) -> usize {
        MazeAction::COUNT
    }

    fn describe(&self) -> String {
        let (rows, cols) = (self.config.rows, self.config.cols);
        let dynamic = if self.config.dynamic {
            format!(
                "After every step about {} random cells (never the agent's or the goal's) \
                 toggle between wall and free.",
                rows * cols / 20
            )
        } else {
            "Walls do not change during an episode.".to_string()
        };
        format!(
            "SimpleMaze: a {rows}x{cols} maze. The agent starts at [0, 0] and must reach the goal \
             at [{gr}, {gc}]. About a quarter of the cells are walls; the start and goal are always free.\n\
             Observation: {{\"grid\": rows of 0/1 where 1 is a wall, \"agent\": [row, col]}}.\n\
             Actions: 0 = up (row - 1), 1 = right (col + 1), 2 = down (row + 1), 3 = left (col - 1). \
             Moves off the border or into a wall leave the agent where it is.\n\
             {dynamic}\n\
             Reward: +1 on reaching the goal, -0.01 on every other step.\n\
             Termination: the goal is reached, or {limit} steps have been taken.",
            rows = rows,
            cols = cols,
            gr = rows - 1,
            gc = cols - 1,
            dynamic = dynamic,
            limit = self.config.time_limit,
        )
    }

    fn reset(&mut self) -> Result<(MazeObservation, Info)> {
        Ok(SimpleMaze::reset(self))
    }

    fn step(&mut self, action: i64) -> Result<Transition<MazeObservation>> {
        SimpleMaze::step(self, action)
    }

    fn frame(&self) -> Frame {
        SimpleMaze::frame(self)
    }

    fn render(&mut self) -> Result<()> {
        SimpleMaze::render(self)
    }

    fn close(&mut self) {
        SimpleMaze::close(self)
    }

    fn phase(&self) -> Phase {
        self.phase
    }
}
