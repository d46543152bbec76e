use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("terminal reports no color support")]
    NoColorSupport,

    #[error("window manager has been shut down")]
    Shutdown,

    #[error("window no longer exists")]
    DeadWindow,

    #[error("drawable is already borrowed by a paint in progress")]
    DrawableBusy,

    #[error("cell write outside the drawable at row {row}, col {col}")]
    CellOutOfBounds { row: u16, col: u16 },

    #[error("failed to install the SIGWINCH handler")]
    SignalInstall(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
