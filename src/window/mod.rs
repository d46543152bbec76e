//! The window tree: hierarchy, visibility, invalidation, and the paint
//! scheduler driving it.

mod manager;
mod resize;

pub use manager::{Window, WindowManager};

use std::rc::Rc;

use crate::geometry::Rect;

/// Lifecycle and paint messages delivered to window handlers.
///
/// `Created` carries a handle to the new window. `PosChanged` rectangles
/// are parent-relative, like the rectangles passed into `create` and
/// `set_pos`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowMsg {
    Created(Window),
    Destroy,
    Paint,
    PosChanged { old: Rect, new: Rect },
}

/// A window handler: arbitrary client code invoked synchronously during
/// tree mutation and painting. Handlers may re-enter the window manager.
/// The return value is reserved.
pub type Handler = Rc<dyn Fn(&Window, &WindowMsg) -> u32>;

/// Convenience wrapper for building a [`Handler`] from a closure.
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Window, &WindowMsg) -> u32 + 'static,
{
    Rc::new(f)
}
