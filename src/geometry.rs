//! Rectangle arithmetic shared by the window tree and the drawable layer.
//!
//! Rectangles are half-open: `width = right - left`, `height = bottom - top`.
//! Coordinates are signed so intermediate results of offsetting and clipping
//! can go negative before they are clamped to the cell grid.

use ratatui::layout::Rect as BufferArea;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// A rectangle at the origin with the given dimensions.
    pub const fn sized(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn set(&mut self, left: i32, top: i32, right: i32, bottom: i32) {
        self.left = left;
        self.top = top;
        self.right = right;
        self.bottom = bottom;
    }

    pub fn offset(&mut self, dx: i32, dy: i32) {
        self.left += dx;
        self.top += dy;
        self.right += dx;
        self.bottom += dy;
    }

    pub fn translated(mut self, dx: i32, dy: i32) -> Self {
        self.offset(dx, dy);
        self
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Intersection of two rectangles, or `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let rc = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if rc.is_empty() { None } else { Some(rc) }
    }

    /// Bounding box of two rectangles.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    /// Projection onto the unsigned cell grid used by drawables. The
    /// negative portion is cut off rather than shifted.
    pub fn to_buffer_area(&self) -> BufferArea {
        let left = self.left.clamp(0, u16::MAX as i32);
        let top = self.top.clamp(0, u16::MAX as i32);
        let right = self.right.clamp(left, u16::MAX as i32);
        let bottom = self.bottom.clamp(top, u16::MAX as i32);
        BufferArea {
            x: left as u16,
            y: top as u16,
            width: (right - left) as u16,
            height: (bottom - top) as u16,
        }
    }

    pub fn from_buffer_area(area: BufferArea) -> Self {
        Rect::new(
            area.x as i32,
            area.y as i32,
            area.x as i32 + area.width as i32,
            area.y as i32 + area.height as i32,
        )
    }
}
