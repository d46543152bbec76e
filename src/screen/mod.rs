//! The physical-terminal seam and the off-screen drawables behind it.
//!
//! Every window owns a [`Drawable`]: a positioned cell buffer plus a logical
//! cursor, standing in for a curses `WINDOW`. The window manager aggregates
//! drawables into its virtual screen and commits frames through a
//! [`ScreenDriver`], so the whole stack runs unchanged against a real
//! terminal or a headless capture backend.

mod console;
mod headless;

pub use console::ConsoleDriver;
pub use headless::HeadlessDriver;

use std::io;

use ratatui::buffer::{Buffer, Cell};
use ratatui::layout::Rect as BufferArea;
use ratatui::style::Style;

use crate::error::{Error, Result};
use crate::geometry::Rect;

/// One cell-level update for [`ScreenDriver::flush`]: absolute column,
/// absolute row, cell content.
pub type CellUpdate<'a> = (u16, u16, &'a Cell);

/// The process-wide physical terminal.
///
/// Drivers own terminal modes (raw, alternate screen) and the color
/// capability surface the color table consumes. `flush` receives the diff
/// between the last committed frame and the next one, so a frame is a single
/// batched write.
pub trait ScreenDriver {
    fn enter(&mut self) -> io::Result<()>;
    fn exit(&mut self) -> io::Result<()>;

    /// Current grid size as (cols, rows).
    fn size(&self) -> io::Result<(u16, u16)>;

    /// Size reported by the operating system, independent of the grid the
    /// driver currently maintains. This is what resize reconciliation polls.
    fn os_size(&self) -> io::Result<(u16, u16)>;

    /// Adopt new dimensions after a terminal resize.
    fn resize(&mut self, cols: u16, rows: u16) -> io::Result<()>;

    /// Commit one frame: apply the cell updates, then position the physical
    /// cursor.
    fn flush(&mut self, updates: &[CellUpdate<'_>], cursor: Option<(u16, u16)>) -> io::Result<()>;

    fn beep(&mut self) -> io::Result<()>;
    fn set_cursor_visible(&mut self, visible: bool) -> io::Result<()>;

    fn has_colors(&self) -> bool;
    fn colors(&self) -> u16;
    fn color_pairs(&self) -> u32;
    fn can_change_color(&self) -> bool;

    /// Redefine a mutable palette slot. Channels are in 0–1000 units.
    fn init_color(&mut self, index: u8, content: (u16, u16, u16)) -> io::Result<()>;

    /// Report the palette slot's current definition in 0–1000 units.
    fn color_content(&self, index: u8) -> (u16, u16, u16);
}

/// An off-screen cell grid positioned in screen-absolute coordinates.
pub struct Drawable {
    buf: Buffer,
    cursor: (u16, u16),
}

impl Drawable {
    pub fn new(rect: Rect) -> Self {
        Self {
            buf: Buffer::empty(rect.to_buffer_area()),
            cursor: (0, 0),
        }
    }

    /// Screen-absolute area occupied by this drawable.
    pub fn area(&self) -> BufferArea {
        self.buf.area
    }

    pub fn width(&self) -> u16 {
        self.buf.area.width
    }

    pub fn height(&self) -> u16 {
        self.buf.area.height
    }

    /// Move and/or resize. Content is not preserved; geometry changes are
    /// always followed by a repaint in the invalidation model.
    pub fn set_geometry(&mut self, rect: Rect) {
        self.buf.resize(rect.to_buffer_area());
        self.cursor = (
            self.cursor.0.min(self.width().saturating_sub(1)),
            self.cursor.1.min(self.height().saturating_sub(1)),
        );
    }

    /// Logical cursor as (col, row), local to the drawable.
    pub fn cursor(&self) -> (u16, u16) {
        self.cursor
    }

    pub fn set_cursor(&mut self, col: u16, row: u16) {
        self.cursor = (col, row);
    }

    /// Write one cell at drawable-local coordinates.
    pub fn put(&mut self, col: u16, row: u16, ch: char, style: Style) -> Result<()> {
        if col >= self.width() || row >= self.height() {
            return Err(Error::CellOutOfBounds { row, col });
        }
        let x = self.buf.area.x + col;
        let y = self.buf.area.y + row;
        let mut utf8 = [0u8; 4];
        let cell = self
            .buf
            .cell_mut((x, y))
            .ok_or(Error::CellOutOfBounds { row, col })?;
        cell.set_symbol(ch.encode_utf8(&mut utf8)).set_style(style);
        Ok(())
    }

    /// Fill the whole drawable with a space in the given style.
    pub fn fill(&mut self, style: Style) {
        for cell in &mut self.buf.content {
            cell.reset();
            cell.set_style(style);
        }
    }

    /// Draw a single-line box frame around the drawable's edge.
    pub fn draw_border(&mut self, style: Style) -> Result<()> {
        let (w, h) = (self.width(), self.height());
        if w < 2 || h < 2 {
            return Ok(());
        }
        for col in 1..w - 1 {
            self.put(col, 0, '─', style)?;
            self.put(col, h - 1, '─', style)?;
        }
        for row in 1..h - 1 {
            self.put(0, row, '│', style)?;
            self.put(w - 1, row, '│', style)?;
        }
        self.put(0, 0, '┌', style)?;
        self.put(w - 1, 0, '┐', style)?;
        self.put(0, h - 1, '└', style)?;
        self.put(w - 1, h - 1, '┘', style)?;
        Ok(())
    }

    /// Direct buffer access for paint handlers that render arbitrary
    /// content. Coordinates in the buffer are screen-absolute.
    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buf
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buf
    }

    /// Copy this drawable into an aggregate buffer where their areas
    /// overlap. Both buffers index by screen-absolute coordinates.
    pub(crate) fn blit_into(&self, dest: &mut Buffer) {
        let overlap = self.buf.area.intersection(dest.area);
        for y in overlap.y..overlap.y + overlap.height {
            for x in overlap.x..overlap.x + overlap.width {
                if let (Some(src), Some(dst)) = (self.buf.cell((x, y)), dest.cell_mut((x, y))) {
                    *dst = src.clone();
                }
            }
        }
    }
}
