//! Grid coordinates

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(row, col)` cell. Serializes as `[row, col]` so policies see a plain pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Move by `(d_row, d_col)`, clamping each axis into `rows x cols`.
    /// Moving into a boundary is a no-op on that axis.
    pub fn offset_clamped(self, delta: (isize, isize), rows: usize, cols: usize) -> Self {
        let clamp = |value: usize, d: isize, len: usize| -> usize {
            let max = len.saturating_sub(1) as isize;
            (value as isize + d).clamp(0, max) as usize
        };
        Self {
            row: clamp(self.row, delta.0, rows),
            col: clamp(self.col, delta.1, cols),
        }
    }

    pub fn in_bounds(self, rows: usize, cols: usize) -> bool {
        self.row < rows && self.col < cols
    }

    /// Row-major index into a `rows x cols` buffer
    pub fn index(self, cols: usize) -> usize {
        self.row * cols + self.col
    }
}

impl From<[usize; 2]> for Position {
    fn from([row, col]: [usize; 2]) -> Self {
        Self { row, col }
    }
}

impl From<Position> for [usize; 2] {
    fn from(pos: Position) -> Self {
        [pos.row, pos.col]
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}
