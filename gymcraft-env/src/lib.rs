//! # gymcraft-env
//!
//! Small discrete-state environments sharing one contract.
//!
//! ## Core Concepts
//! - **Environment**: `reset` / `step` / `render` / `close` over a typed observation
//! - **Phase**: `Uninitialized -> Ready -> Terminal`, only `reset` leaves `Terminal`
//! - **GridWorld**: square grid, reach the centre cell
//! - **SimpleMaze**: random walls, optionally toggling every step
//! - **Frame**: renderer-agnostic picture of the current state

pub mod contract;
pub mod grid_world;
pub mod maze;
pub mod position;
pub mod render;

pub use contract::{Environment, Info, Phase, Transition};
pub use grid_world::{GridAction, GridConfig, GridWorld};
pub use maze::{MazeAction, MazeConfig, MazeObservation, SimpleMaze};
pub use position::Position;
pub use render::{Cell, Frame, Palette, Renderer, TerminalRenderer};

pub use gymcraft_error::{Error, ErrorKind, ErrorStatus, Result};
