//! Production screen driver on top of crossterm.

use std::io::{self, Stdout, Write};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::execute;
use ratatui::backend::{Backend, CrosstermBackend};

use crate::color::{MAX_COLORS, default_palette};

use super::{CellUpdate, ScreenDriver};

pub struct ConsoleDriver {
    backend: CrosstermBackend<Stdout>,
    // What the terminal was last told each palette slot holds, in 0-1000
    // units. Terminals cannot be queried synchronously, so reads come from
    // this shadow.
    palette: [(u16, u16, u16); MAX_COLORS],
    entered: bool,
}

impl Default for ConsoleDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleDriver {
    pub fn new() -> Self {
        let defaults = default_palette();
        let mut palette = [(0, 0, 0); MAX_COLORS];
        for (slot, rgb) in palette.iter_mut().zip(defaults.iter()) {
            *slot = rgb.to_terminal_units();
        }
        Self {
            backend: CrosstermBackend::new(io::stdout()),
            palette,
            entered: false,
        }
    }
}

impl ScreenDriver for ConsoleDriver {
    fn enter(&mut self) -> io::Result<()> {
        if self.entered {
            return Ok(());
        }
        terminal::enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen, Hide)?;
        self.entered = true;
        Ok(())
    }

    fn exit(&mut self) -> io::Result<()> {
        if !self.entered {
            return Ok(());
        }
        execute!(io::stdout(), Show, LeaveAlternateScreen)?;
        terminal::disable_raw_mode()?;
        self.entered = false;
        Ok(())
    }

    fn size(&self) -> io::Result<(u16, u16)> {
        terminal::size()
    }

    fn os_size(&self) -> io::Result<(u16, u16)> {
        let mut size: libc::winsize = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut size) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok((size.ws_col, size.ws_row))
    }

    fn resize(&mut self, _cols: u16, _rows: u16) -> io::Result<()> {
        // The emulator already resized the real screen; nothing to adopt.
        Ok(())
    }

    fn flush(&mut self, updates: &[CellUpdate<'_>], cursor: Option<(u16, u16)>) -> io::Result<()> {
        self.backend
            .draw(updates.iter().map(|&(x, y, cell)| (x, y, cell)))?;
        if let Some((col, row)) = cursor {
            execute!(io::stdout(), MoveTo(col, row))?;
        }
        Backend::flush(&mut self.backend)
    }

    fn beep(&mut self) -> io::Result<()> {
        let mut out = io::stdout();
        out.write_all(b"\x07")?;
        out.flush()
    }

    fn set_cursor_visible(&mut self, visible: bool) -> io::Result<()> {
        if visible {
            self.backend.show_cursor()
        } else {
            self.backend.hide_cursor()
        }
    }

    fn has_colors(&self) -> bool {
        match std::env::var("TERM") {
            Ok(term) => !term.is_empty() && term != "dumb",
            Err(_) => false,
        }
    }

    fn colors(&self) -> u16 {
        MAX_COLORS as u16
    }

    fn color_pairs(&self) -> u32 {
        (MAX_COLORS * MAX_COLORS) as u32
    }

    fn can_change_color(&self) -> bool {
        true
    }

    fn init_color(&mut self, index: u8, content: (u16, u16, u16)) -> io::Result<()> {
        let rgb = crate::color::Rgb::from_terminal_units(content);
        let mut out = io::stdout();
        // OSC 4: redefine one palette slot.
        write!(
            out,
            "\x1b]4;{};rgb:{:02x}/{:02x}/{:02x}\x07",
            index, rgb.r, rgb.g, rgb.b
        )?;
        out.flush()?;
        self.palette[index as usize] = content;
        Ok(())
    }

    fn color_content(&self, index: u8) -> (u16, u16, u16) {
        self.palette[index as usize]
    }
}
