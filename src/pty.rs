//! Pseudo-terminal plumbing: spawn a child on a PTY, run its output through
//! the embedded emulator, and translate the resulting screen changes into
//! adapter callbacks.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};

use crate::error::{Error, Result};
use crate::screen::{Drawable, ScreenDriver};
use crate::vterm::{DamageRect, TermAdapter, TermProp};

// Bytes of raw output retained for replay when the PTY resizes; the parser
// is rebuilt from this history because resizing reflows the grid.
const MAX_HISTORY: usize = 1024 * 1024;

/// Everything about one emulator cell that affects its rendering. Used to
/// compute damage between pump passes.
#[derive(Clone, PartialEq, Default)]
struct CellState {
    text: String,
    bold: bool,
    underline: bool,
    inverse: bool,
    fg: Option<vt100::Color>,
    bg: Option<vt100::Color>,
}

impl CellState {
    fn capture(screen: &vt100::Screen, row: u16, col: u16) -> Self {
        match screen.cell(row, col) {
            Some(cell) => Self {
                text: cell.contents(),
                bold: cell.bold(),
                underline: cell.underline(),
                inverse: cell.inverse(),
                fg: Some(cell.fgcolor()),
                bg: Some(cell.bgcolor()),
            },
            None => Self::default(),
        }
    }
}

pub struct Pty {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Option<Box<dyn Child + Send + Sync>>,
    exited: bool,
    pending: Arc<Mutex<Vec<u8>>>,
    _reader: JoinHandle<()>,
    parser: vt100::Parser,
    history: Vec<u8>,
    size: PtySize,
    snapshot: Vec<CellState>,
    snapshot_size: (u16, u16),
    bells_seen: usize,
    cursor: (u16, u16),
    cursor_hidden: bool,
}

impl Pty {
    pub fn spawn(command: CommandBuilder, size: PtySize) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system.openpty(size).map_err(wrap_err)?;
        let child = pair.slave.spawn_command(command).map_err(wrap_err)?;
        let reader = pair.master.try_clone_reader().map_err(wrap_err)?;
        let writer = pair.master.take_writer().map_err(wrap_err)?;

        let pending = Arc::new(Mutex::new(Vec::new()));
        let reader_pending = Arc::clone(&pending);
        let reader_handle = thread::spawn(move || read_loop(reader, reader_pending));

        let parser = vt100::Parser::new(size.rows, size.cols, 0);
        Ok(Self {
            master: pair.master,
            writer,
            child: Some(child),
            exited: false,
            pending,
            _reader: reader_handle,
            parser,
            history: Vec::new(),
            size,
            snapshot: Vec::new(),
            snapshot_size: (0, 0),
            bells_seen: 0,
            cursor: (0, 0),
            cursor_hidden: false,
        })
    }

    pub fn write_bytes(&mut self, input: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(input)?;
        self.writer.flush()
    }

    pub fn resize(&mut self, size: PtySize) -> Result<()> {
        if size.rows == 0 || size.cols == 0 || size == self.size {
            return Ok(());
        }
        self.master.resize(size).map_err(wrap_err)?;
        self.size = size;
        // Reflow by replaying history through a fresh parser.
        let mut parser = vt100::Parser::new(size.rows, size.cols, 0);
        parser.process(&self.history);
        self.parser = parser;
        Ok(())
    }

    pub fn screen(&self) -> &vt100::Screen {
        self.parser.screen()
    }

    pub fn size(&self) -> PtySize {
        self.size
    }

    pub fn has_exited(&mut self) -> bool {
        if self.exited {
            return true;
        }
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        match child.try_wait() {
            Ok(Some(_)) => {
                self.exited = true;
                self.child = None;
                true
            }
            Ok(None) => false,
            Err(_) => false,
        }
    }

    pub fn kill_child(&mut self) -> std::io::Result<()> {
        match self.child.as_mut() {
            Some(child) => child.kill(),
            None => Ok(()),
        }
    }

    /// Drain pending output through the emulator and fire the adapter
    /// callbacks for whatever changed. Returns whether anything changed.
    pub fn pump(
        &mut self,
        adapter: &mut TermAdapter,
        drawable: &mut Drawable,
        driver: &mut dyn ScreenDriver,
    ) -> Result<bool> {
        let bytes = {
            let mut pending = self.pending.lock().unwrap_or_else(|err| err.into_inner());
            if pending.is_empty() {
                return Ok(false);
            }
            pending.split_off(0)
        };
        self.history.extend_from_slice(&bytes);
        if self.history.len() > MAX_HISTORY {
            let cut = self.history.len() - MAX_HISTORY;
            self.history.drain(0..cut);
        }
        self.parser.process(&bytes);

        let screen = self.parser.screen();
        let (rows, cols) = screen.size();

        let mut fresh = Vec::with_capacity(rows as usize * cols as usize);
        let mut bounds: Option<DamageRect> = None;
        let resized = (rows, cols) != self.snapshot_size;
        for row in 0..rows {
            for col in 0..cols {
                let state = CellState::capture(screen, row, col);
                if !resized {
                    let index = row as usize * cols as usize + col as usize;
                    if self.snapshot.get(index) != Some(&state) {
                        let cell = DamageRect::new(row, col, row + 1, col + 1);
                        bounds = Some(match bounds {
                            Some(rect) => rect.union(&cell),
                            None => cell,
                        });
                    }
                }
                fresh.push(state);
            }
        }
        if resized {
            bounds = Some(DamageRect::new(0, 0, rows, cols));
        }
        self.snapshot = fresh;
        self.snapshot_size = (rows, cols);

        if let Some(rect) = bounds {
            adapter.damage(rect);
        }

        let bells = screen.audible_bell_count();
        if bells != self.bells_seen {
            self.bells_seen = bells;
            adapter.bell(driver)?;
        }

        let cursor = screen.cursor_position();
        let hidden = screen.hide_cursor();
        if cursor != self.cursor {
            let old = self.cursor;
            self.cursor = cursor;
            adapter.move_cursor(drawable, cursor, old, !hidden);
        }
        if hidden != self.cursor_hidden {
            self.cursor_hidden = hidden;
            adapter.set_term_prop(driver, TermProp::CursorVisible(!hidden));
        }

        Ok(true)
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, pending: Arc<Mutex<Vec<u8>>>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                pending
                    .lock()
                    .unwrap_or_else(|err| err.into_inner())
                    .extend_from_slice(&buf[..n]);
            }
        }
    }
}

fn wrap_err(err: impl std::fmt::Display) -> Error {
    Error::Io(std::io::Error::other(err.to_string()))
}

#[cfg(unix)]
pub fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(windows)]
pub fn default_shell() -> String {
    std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
}

pub fn default_shell_command() -> CommandBuilder {
    let mut cmd = CommandBuilder::new(default_shell());
    if let Ok(cwd) = std::env::current_dir() {
        cmd.cwd(cwd);
    }
    cmd
}
