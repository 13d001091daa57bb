//! Frames and renderers.
//!
//! Environments build a [`Frame`] describing what each cell shows; a
//! [`Renderer`] turns frames into pixels or text. Rendering is best-effort:
//! a closed or broken surface degrades to a no-op instead of failing the
//! simulation.

use crate::Position;
use crossterm::{
    cursor::{Hide, Show},
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use gymcraft_error::Result;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::{Block, Borders, Paragraph},
    Frame as TuiFrame, Terminal,
};
use std::io::{self, Stdout};
use std::time::Duration;

/// What occupies a cell in a rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Empty,
    Wall,
    Agent,
    Goal,
}

impl Cell {
    pub fn glyph(self) -> char {
        match self {
            Cell::Empty => '.',
            Cell::Wall => '#',
            Cell::Agent => 'A',
            Cell::Goal => 'G',
        }
    }
}

/// Colour scheme used by [`Frame::to_rgb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Palette {
    /// Black background, agent blue, goal green
    Channels,
    /// Viridis samples: empty 0.0, agent 0.5, goal 0.8, wall 1.0
    Viridis,
}

impl Palette {
    pub fn rgb(self, cell: Cell) -> [u8; 3] {
        match (self, cell) {
            (Palette::Channels, Cell::Agent) => [0, 0, 255],
            (Palette::Channels, Cell::Goal) => [0, 255, 0],
            (Palette::Channels, Cell::Wall) => [255, 255, 255],
            (Palette::Channels, Cell::Empty) => [0, 0, 0],
            (Palette::Viridis, Cell::Empty) => [68, 1, 84],
            (Palette::Viridis, Cell::Agent) => [33, 145, 140],
            (Palette::Viridis, Cell::Goal) => [122, 209, 81],
            (Palette::Viridis, Cell::Wall) => [253, 231, 37],
        }
    }
}

/// A rows x cols picture of an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    rows: usize,
    cols: usize,
    cells: Vec<Cell>,
    palette: Palette,
}

impl Frame {
    pub fn new(rows: usize, cols: usize, palette: Palette) -> Self {
        Self {
            rows,
            cols,
            cells: vec![Cell::Empty; rows * cols],
            palette,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Out-of-range positions are ignored.
    pub fn set(&mut self, pos: Position, cell: Cell) {
        if pos.in_bounds(self.rows, self.cols) {
            self.cells[pos.index(self.cols)] = cell;
        }
    }

    /// Row-major RGB bytes, three per cell
    pub fn to_rgb(&self) -> Vec<u8> {
        self.cells
            .iter()
            .flat_map(|&cell| self.palette.rgb(cell))
            .collect()
    }

    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity(self.rows * (self.cols * 2 + 1));
        for row in self.cells.chunks(self.cols.max(1)) {
            let line: Vec<String> = row.iter().map(|c| c.glyph().to_string()).collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out
    }
}

/// A display surface for frames.
pub trait Renderer {
    fn draw(&mut self, frame: &Frame) -> Result<()>;

    /// False once the surface was closed; drawing then does nothing.
    fn is_open(&self) -> bool;

    fn close(&mut self);
}

/// Terminal cells per grid cell, horizontally
const CELL_WIDTH: u16 = 2;

/// Draws frames in place on a terminal, one coloured block per cell.
///
/// On a real terminal (`stdout()`) the renderer owns the alternate screen and
/// listens for `q` / Esc; either closes the surface and hands the terminal
/// back. Any other backend (e.g. ratatui's `TestBackend`) is drawn headless.
pub struct TerminalRenderer<B: Backend> {
    terminal: Terminal<B>,
    open: bool,
    /// Raw mode and the alternate screen are ours to restore
    raw_mode: bool,
    delay: Duration,
    frames: usize,
}

impl TerminalRenderer<CrosstermBackend<Stdout>> {
    pub fn stdout() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, Hide)?;
        match Self::new(CrosstermBackend::new(stdout)) {
            Ok(mut renderer) => {
                renderer.raw_mode = true;
                Ok(renderer)
            }
            Err(e) => {
                let _ = disable_raw_mode();
                let _ = execute!(io::stdout(), LeaveAlternateScreen, Show);
                Err(e)
            }
        }
    }
}

impl<B: Backend> TerminalRenderer<B> {
    pub fn new(backend: B) -> Result<Self> {
        Ok(Self {
            terminal: Terminal::new(backend)?,
            open: true,
            raw_mode: false,
            delay: Duration::ZERO,
            frames: 0,
        })
    }

    /// Pause after each frame so a human can follow along
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn frames_drawn(&self) -> usize {
        self.frames
    }

    pub fn backend(&self) -> &B {
        self.terminal.backend()
    }

    /// `q` and Esc close the surface.
    pub fn handle_key(&mut self, key: KeyCode) {
        if matches!(key, KeyCode::Char('q') | KeyCode::Esc) {
            tracing::debug!("render surface closed by user");
            self.close();
        }
    }

    /// Drain pending key presses, waiting at most `timeout` for the first.
    fn pump_events(&mut self, timeout: Duration) -> Result<()> {
        let mut wait = timeout;
        while self.open && event::poll(wait)? {
            wait = Duration::ZERO;
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    self.handle_key(key.code);
                }
            }
        }
        Ok(())
    }

    fn restore(&mut self) {
        if self.raw_mode {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, Show);
            self.raw_mode = false;
        }
    }
}

impl<B: Backend> Renderer for TerminalRenderer<B> {
    fn draw(&mut self, frame: &Frame) -> Result<()> {
        if self.raw_mode {
            self.pump_events(Duration::ZERO)?;
        }
        if !self.open {
            return Ok(());
        }

        let drawn = self.frames + 1;
        if let Err(e) = self.terminal.draw(|f| draw_frame(f, frame, drawn)) {
            tracing::debug!(error = %e, "terminal surface closed");
            self.close();
            return Ok(());
        }
        self.frames = drawn;

        if !self.delay.is_zero() {
            if self.raw_mode {
                self.pump_events(self.delay)?;
            } else {
                std::thread::sleep(self.delay);
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
        self.restore();
    }
}

impl<B: Backend> Drop for TerminalRenderer<B> {
    fn drop(&mut self) {
        self.restore();
    }
}

fn draw_frame(f: &mut TuiFrame, frame: &Frame, number: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(f.area());

    let block = Block::default().borders(Borders::ALL).title(" gymcraft ");
    let inner = block.inner(chunks[0]);
    f.render_widget(block, chunks[0]);

    let buf = f.buffer_mut();
    for (index, &cell) in frame.cells.iter().enumerate() {
        let row = (index / frame.cols) as u16;
        let col = (index % frame.cols) as u16 * CELL_WIDTH;
        if row >= inner.height || col + CELL_WIDTH > inner.width {
            continue;
        }
        let [r, g, b] = frame.palette.rgb(cell);
        for dx in 0..CELL_WIDTH {
            let target = &mut buf[(inner.x + col + dx, inner.y + row)];
            let symbol = match cell {
                Cell::Agent | Cell::Goal if dx == 0 => cell.glyph(),
                _ => ' ',
            };
            target.set_char(symbol);
            target.set_fg(Color::Black);
            target.set_bg(Color::Rgb(r, g, b));
        }
    }

    let status = format!(" {}x{} | frame {} | q/Esc: close", frame.rows, frame.cols, number);
    f.render_widget(
        Paragraph::new(status).style(Style::default().bg(Color::Indexed(236))),
        chunks[1],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    #[test]
    fn test_frame_ascii() {
        let mut frame = Frame::new(2, 3, Palette::Viridis);
        frame.set(Position::new(0, 0), Cell::Agent);
        frame.set(Position::new(0, 1), Cell::Wall);
        frame.set(Position::new(1, 2), Cell::Goal);
        frame.set(Position::new(9, 9), Cell::Wall);

        assert_eq!(frame.to_ascii(), "A # .\n. . G\n");
    }

    #[test]
    fn test_frame_rgb() {
        let mut frame = Frame::new(1, 2, Palette::Channels);
        frame.set(Position::new(0, 1), Cell::Agent);
        assert_eq!(frame.to_rgb(), vec![0, 0, 0, 0, 0, 255]);
    }

    #[test]
    fn test_draws_cells_in_palette_colours() {
        let mut renderer = TerminalRenderer::new(TestBackend::new(20, 6)).unwrap();
        let mut frame = Frame::new(2, 2, Palette::Viridis);
        frame.set(Position::new(0, 1), Cell::Agent);
        frame.set(Position::new(1, 0), Cell::Wall);
        renderer.draw(&frame).unwrap();

        // Inside the border, two columns per cell
        let buf = renderer.backend().buffer();
        assert_eq!(buf[(1, 1)].bg, Color::Rgb(68, 1, 84));
        assert_eq!(buf[(3, 1)].bg, Color::Rgb(33, 145, 140));
        assert_eq!(buf[(3, 1)].symbol(), "A");
        assert_eq!(buf[(4, 1)].symbol(), " ");
        assert_eq!(buf[(1, 2)].bg, Color::Rgb(253, 231, 37));
    }

    #[test]
    fn test_redraws_in_place() {
        let mut renderer = TerminalRenderer::new(TestBackend::new(20, 6)).unwrap();
        let mut frame = Frame::new(1, 2, Palette::Channels);
        frame.set(Position::new(0, 0), Cell::Agent);
        renderer.draw(&frame).unwrap();

        let mut moved = Frame::new(1, 2, Palette::Channels);
        moved.set(Position::new(0, 1), Cell::Agent);
        renderer.draw(&moved).unwrap();

        let buf = renderer.backend().buffer();
        assert_eq!(buf[(1, 1)].bg, Color::Rgb(0, 0, 0));
        assert_eq!(buf[(3, 1)].symbol(), "A");
        assert_eq!(renderer.frames_drawn(), 2);
    }

    #[test]
    fn test_quit_key_makes_drawing_a_noop() {
        let mut renderer = TerminalRenderer::new(TestBackend::new(20, 6)).unwrap();
        let frame = Frame::new(1, 1, Palette::Channels);
        renderer.draw(&frame).unwrap();

        renderer.handle_key(KeyCode::Char('x'));
        assert!(renderer.is_open());
        renderer.handle_key(KeyCode::Esc);
        assert!(!renderer.is_open());

        renderer.draw(&frame).unwrap();
        assert_eq!(renderer.frames_drawn(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut renderer = TerminalRenderer::new(TestBackend::new(10, 4)).unwrap();
        renderer.close();
        renderer.close();
        renderer.handle_key(KeyCode::Char('q'));
        renderer.draw(&Frame::new(1, 1, Palette::Channels)).unwrap();
        assert_eq!(renderer.frames_drawn(), 0);
    }
}
