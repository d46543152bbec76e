//! In-memory screen driver for tests and capture/replay embedders.
//!
//! Wraps `ratatui::backend::TestBackend` behind a shared handle so a test
//! can keep a clone, hand the driver to the window manager, and later poke
//! the reported OS size or inspect the committed frame.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use ratatui::backend::{Backend, TestBackend};
use ratatui::buffer::Cell;

use crate::color::{MAX_COLORS, default_palette};

use super::{CellUpdate, ScreenDriver};

struct HeadlessState {
    backend: TestBackend,
    os_size: (u16, u16),
    palette: [(u16, u16, u16); MAX_COLORS],
    colors: u16,
    color_pairs: u32,
    can_change_color: bool,
    has_colors: bool,
    entered: bool,
    flushes: usize,
    beeps: usize,
    cursor: Option<(u16, u16)>,
    cursor_visible: bool,
}

#[derive(Clone)]
pub struct HeadlessDriver {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessDriver {
    pub fn new(cols: u16, rows: u16) -> Self {
        let defaults = default_palette();
        let mut palette = [(0, 0, 0); MAX_COLORS];
        for (slot, rgb) in palette.iter_mut().zip(defaults.iter()) {
            *slot = rgb.to_terminal_units();
        }
        Self {
            state: Rc::new(RefCell::new(HeadlessState {
                backend: TestBackend::new(cols, rows),
                os_size: (cols, rows),
                palette,
                colors: MAX_COLORS as u16,
                color_pairs: (MAX_COLORS * MAX_COLORS) as u32,
                can_change_color: true,
                has_colors: true,
                entered: false,
                flushes: 0,
                beeps: 0,
                cursor: None,
                cursor_visible: false,
            })),
        }
    }

    pub fn with_colors(self, colors: u16, color_pairs: u32, can_change_color: bool) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.colors = colors;
            state.color_pairs = color_pairs;
            state.can_change_color = can_change_color;
        }
        self
    }

    pub fn no_colors(self) -> Self {
        self.state.borrow_mut().has_colors = false;
        self
    }

    /// Simulate the terminal emulator resizing the window: only the size the
    /// OS would report changes, reconciliation does the rest.
    pub fn set_os_size(&self, cols: u16, rows: u16) {
        self.state.borrow_mut().os_size = (cols, rows);
    }

    pub fn flush_count(&self) -> usize {
        self.state.borrow().flushes
    }

    pub fn beep_count(&self) -> usize {
        self.state.borrow().beeps
    }

    pub fn cursor(&self) -> Option<(u16, u16)> {
        self.state.borrow().cursor
    }

    pub fn cursor_visible(&self) -> bool {
        self.state.borrow().cursor_visible
    }

    pub fn entered(&self) -> bool {
        self.state.borrow().entered
    }

    /// Symbol committed at (col, row) of the physical screen.
    pub fn symbol_at(&self, col: u16, row: u16) -> String {
        let state = self.state.borrow();
        state
            .backend
            .buffer()
            .cell((col, row))
            .map(|cell| cell.symbol().to_string())
            .unwrap_or_default()
    }

    /// Full row contents, useful for frame assertions.
    pub fn row_text(&self, row: u16) -> String {
        let state = self.state.borrow();
        let area = state.backend.buffer().area;
        (area.x..area.x + area.width)
            .map(|x| {
                state
                    .backend
                    .buffer()
                    .cell((x, row))
                    .map(|cell| cell.symbol().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn cell_at(&self, col: u16, row: u16) -> Option<Cell> {
        let state = self.state.borrow();
        state.backend.buffer().cell((col, row)).cloned()
    }
}

impl ScreenDriver for HeadlessDriver {
    fn enter(&mut self) -> io::Result<()> {
        self.state.borrow_mut().entered = true;
        Ok(())
    }

    fn exit(&mut self) -> io::Result<()> {
        self.state.borrow_mut().entered = false;
        Ok(())
    }

    fn size(&self) -> io::Result<(u16, u16)> {
        let state = self.state.borrow();
        let size = state.backend.size()?;
        Ok((size.width, size.height))
    }

    fn os_size(&self) -> io::Result<(u16, u16)> {
        Ok(self.state.borrow().os_size)
    }

    fn resize(&mut self, cols: u16, rows: u16) -> io::Result<()> {
        self.state.borrow_mut().backend.resize(cols, rows);
        Ok(())
    }

    fn flush(&mut self, updates: &[CellUpdate<'_>], cursor: Option<(u16, u16)>) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state
            .backend
            .draw(updates.iter().map(|&(x, y, cell)| (x, y, cell)))?;
        state.backend.flush()?;
        state.cursor = cursor;
        state.flushes += 1;
        Ok(())
    }

    fn beep(&mut self) -> io::Result<()> {
        self.state.borrow_mut().beeps += 1;
        Ok(())
    }

    fn set_cursor_visible(&mut self, visible: bool) -> io::Result<()> {
        self.state.borrow_mut().cursor_visible = visible;
        Ok(())
    }

    fn has_colors(&self) -> bool {
        self.state.borrow().has_colors
    }

    fn colors(&self) -> u16 {
        self.state.borrow().colors
    }

    fn color_pairs(&self) -> u32 {
        self.state.borrow().color_pairs
    }

    fn can_change_color(&self) -> bool {
        self.state.borrow().can_change_color
    }

    fn init_color(&mut self, index: u8, content: (u16, u16, u16)) -> io::Result<()> {
        self.state.borrow_mut().palette[index as usize] = content;
        Ok(())
    }

    fn color_content(&self, index: u8) -> (u16, u16, u16) {
        self.state.borrow().palette[index as usize]
    }
}
