//! A hierarchical window manager for character-cell terminals.
//!
//! Windows form a tree of rectangular regions over the terminal screen.
//! Client handlers receive lifecycle and paint messages; the manager tracks
//! geometry, visibility, and invalidation, coalesces repaints at
//! message-loop idle, and commits each frame to the physical terminal in a
//! single flush. Terminal resizes arrive asynchronously through a
//! signal-safe self-pipe.
//!
//! The companion [`vterm`] subsystem projects an embedded terminal
//! emulator's screen onto a window drawable: damage accumulation, palette
//! capture with nearest-color matching, and color-pair interning.

pub mod color;
pub mod error;
pub mod geometry;
pub mod input;
pub mod message;
pub mod pty;
pub mod screen;
pub mod tracing_sub;
pub mod vterm;
pub mod window;

pub use error::{Error, Result};
pub use geometry::Rect;
pub use window::{Handler, Window, WindowManager, WindowMsg, handler};
