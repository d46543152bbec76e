//! Bridges an embedded terminal emulator onto a window drawable.
//!
//! The emulator side is abstracted as a [`CellSource`]; the production
//! binding over `vt100` lives in [`source`]. The adapter accumulates damage
//! reported by the emulator, coalesces it into one bounding rectangle, and
//! projects the damaged cells onto the drawable's interior, reserving a
//! one-cell frame on every side.

mod source;

pub use source::VtScreenSource;

use ratatui::style::{Color, Modifier, Style};

use crate::color::{ColorTable, Rgb};
use crate::error::Result;
use crate::screen::{Drawable, ScreenDriver};

/// A damaged region of emulator cells, rows/cols half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DamageRect {
    pub start_row: u16,
    pub start_col: u16,
    pub end_row: u16,
    pub end_col: u16,
}

impl DamageRect {
    pub const fn new(start_row: u16, start_col: u16, end_row: u16, end_col: u16) -> Self {
        Self {
            start_row,
            start_col,
            end_row,
            end_col,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end_col == 0 && self.end_row == 0
    }

    pub fn union(&self, other: &DamageRect) -> DamageRect {
        DamageRect {
            start_row: self.start_row.min(other.start_row),
            start_col: self.start_col.min(other.start_col),
            end_row: self.end_row.max(other.end_row),
            end_col: self.end_col.max(other.end_col),
        }
    }
}

/// Terminal properties the emulator can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermProp {
    CursorVisible(bool),
    AltScreen(bool),
    Title(String),
    Mouse(u16),
    CursorBlink(bool),
    CursorShape(u16),
    Reverse(bool),
    IconName(String),
}

/// One emulator cell as the adapter consumes it. Colors are concrete RGB;
/// the source resolves indexed and default colors before they get here.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceCell {
    pub ch: Option<char>,
    pub bold: bool,
    pub underline: bool,
    pub blink: bool,
    pub reverse: bool,
    pub fg: Rgb,
    pub bg: Rgb,
}

/// Read access to an emulator screen.
pub trait CellSource {
    /// Grid dimensions as (rows, cols).
    fn size(&self) -> (u16, u16);
    fn cell(&self, row: u16, col: u16) -> SourceCell;
    /// The emulator's default palette entry for `index`.
    fn palette_color(&self, index: u8) -> Rgb;
}

pub struct TermAdapter {
    damage: DamageRect,
    colors: Option<ColorTable>,
}

impl TermAdapter {
    pub fn new(colors: Option<ColorTable>) -> Self {
        Self {
            damage: DamageRect::default(),
            colors,
        }
    }

    /// Bind against an emulator and a terminal. When the terminal has no
    /// color support the adapter still works, writing untagged cells.
    pub fn bind(source: &dyn CellSource, driver: &mut dyn ScreenDriver) -> Self {
        let colors = match ColorTable::bind(|i| source.palette_color(i), driver) {
            Ok(table) => Some(table),
            Err(err) => {
                tracing::warn!(%err, "color table unavailable, cells will be untagged");
                None
            }
        };
        Self::new(colors)
    }

    pub fn color_table(&self) -> Option<&ColorTable> {
        self.colors.as_ref()
    }

    pub fn color_table_mut(&mut self) -> Option<&mut ColorTable> {
        self.colors.as_mut()
    }

    pub fn damage_pending(&self) -> bool {
        !self.damage.is_empty()
    }

    /// Emulator damage callback. Rectangles reported between draws coalesce
    /// into one bounding rectangle.
    pub fn damage(&mut self, rect: DamageRect) {
        if self.damage.is_empty() {
            self.damage = rect;
        } else {
            self.damage = self.damage.union(&rect);
        }
    }

    /// Emulator cursor-move callback. Positions outside the drawable's
    /// interior are logged and dropped.
    pub fn move_cursor(
        &mut self,
        drawable: &mut Drawable,
        new: (u16, u16),
        _old: (u16, u16),
        _visible: bool,
    ) {
        let (row, col) = new;
        let max_row = drawable.height().saturating_sub(2);
        let max_col = drawable.width().saturating_sub(2);
        if row >= max_row || col >= max_col {
            tracing::warn!(row, col, max_row, max_col, "cursor move out of range");
            return;
        }
        drawable.set_cursor(col + 1, row + 1);
    }

    /// Emulator bell callback.
    pub fn bell(&self, driver: &mut dyn ScreenDriver) -> Result<()> {
        driver.beep()?;
        Ok(())
    }

    /// Emulator property callback. Returns whether the property was
    /// acknowledged; cursor visibility is the only one acted on.
    pub fn set_term_prop(&mut self, driver: &mut dyn ScreenDriver, prop: TermProp) -> bool {
        match prop {
            TermProp::CursorVisible(visible) => {
                tracing::info!(visible, "cursor visibility");
                if let Err(err) = driver.set_cursor_visible(visible) {
                    tracing::error!(%err, "set_cursor_visible failed");
                }
                true
            }
            TermProp::AltScreen(_) | TermProp::Title(_) | TermProp::Mouse(_) => {
                tracing::debug!(?prop, "acknowledged terminal property, not implemented");
                true
            }
            other => {
                tracing::debug!(?other, "unhandled terminal property");
                false
            }
        }
    }

    /// Redraw the accumulated damage into the drawable. Returns whether
    /// anything was drawn.
    pub fn draw(&mut self, drawable: &mut Drawable, source: &dyn CellSource) -> Result<bool> {
        if self.damage.is_empty() {
            return Ok(false);
        }
        let damage = std::mem::take(&mut self.damage);
        let saved_cursor = drawable.cursor();
        let max_row = drawable.height().saturating_sub(2);
        let max_col = drawable.width().saturating_sub(2);
        let end_row = damage.end_row.min(max_row);
        let end_col = damage.end_col.min(max_col);

        if damage.start_row == 0
            || damage.start_col == 0
            || damage.end_row >= max_row
            || damage.end_col >= max_col
        {
            drawable.draw_border(self.border_style())?;
        }

        for row in damage.start_row..end_row {
            for col in damage.start_col..end_col {
                if let Err(err) = self.draw_cell(drawable, source, row, col) {
                    tracing::error!(row, col, %err, "cell write failed");
                    return Err(err);
                }
            }
        }

        drawable.set_cursor(saved_cursor.0, saved_cursor.1);
        Ok(true)
    }

    fn draw_cell(
        &mut self,
        drawable: &mut Drawable,
        source: &dyn CellSource,
        row: u16,
        col: u16,
    ) -> Result<()> {
        let cell = source.cell(row, col);
        let mut style = Style::default();
        if cell.bold {
            style = style.add_modifier(Modifier::BOLD);
        }
        if cell.underline {
            style = style.add_modifier(Modifier::UNDERLINED);
        }
        if cell.blink {
            style = style.add_modifier(Modifier::SLOW_BLINK);
        }
        if cell.reverse {
            style = style.add_modifier(Modifier::REVERSED);
        }
        if let Some(colors) = self.colors.as_mut() {
            let fg = colors.color_id(cell.fg);
            let bg = colors.color_id(cell.bg);
            let pair = colors.pair_id(fg, bg);
            if let Some((fg, bg)) = colors.pair_components(pair) {
                style = style.fg(Color::Indexed(fg)).bg(Color::Indexed(bg));
            }
        }
        // The +1 offsets skip the frame row and column.
        drawable.put(col + 1, row + 1, cell.ch.unwrap_or(' '), style)
    }

    fn border_style(&mut self) -> Style {
        let style = Style::default().add_modifier(Modifier::BOLD);
        match self.colors.as_mut() {
            Some(colors) => {
                // Magenta on the default background, matching the frame the
                // renderer has always drawn.
                let pair = colors.pair_id(5, 0);
                match colors.pair_components(pair) {
                    Some((fg, bg)) => style.fg(Color::Indexed(fg)).bg(Color::Indexed(bg)),
                    None => style.fg(Color::Magenta),
                }
            }
            None => style.fg(Color::Magenta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::default_palette;
    use crate::geometry::Rect;
    use crate::screen::HeadlessDriver;

    struct GridSource {
        rows: u16,
        cols: u16,
        fill: char,
    }

    impl CellSource for GridSource {
        fn size(&self) -> (u16, u16) {
            (self.rows, self.cols)
        }

        fn cell(&self, _row: u16, _col: u16) -> SourceCell {
            SourceCell {
                ch: Some(self.fill),
                fg: Rgb::new(229, 229, 229),
                bg: Rgb::new(0, 0, 0),
                ..SourceCell::default()
            }
        }

        fn palette_color(&self, index: u8) -> Rgb {
            default_palette()[index as usize]
        }
    }

    fn adapter_with_colors() -> TermAdapter {
        let mut driver = HeadlessDriver::new(40, 12).with_colors(16, 256, true);
        let source = GridSource {
            rows: 10,
            cols: 38,
            fill: 'x',
        };
        TermAdapter::bind(&source, &mut driver)
    }

    #[test]
    fn damage_callbacks_coalesce_into_bounding_rect() {
        let mut adapter = TermAdapter::new(None);
        adapter.damage(DamageRect::new(0, 0, 5, 5));
        adapter.damage(DamageRect::new(3, 3, 10, 10));
        assert_eq!(adapter.damage, DamageRect::new(0, 0, 10, 10));
    }

    #[test]
    fn draw_clears_the_accumulator() {
        let mut adapter = adapter_with_colors();
        let mut drawable = Drawable::new(Rect::new(0, 0, 20, 8));
        let source = GridSource {
            rows: 6,
            cols: 18,
            fill: 'x',
        };
        adapter.damage(DamageRect::new(0, 0, 6, 18));
        assert!(adapter.draw(&mut drawable, &source).unwrap());
        assert!(!adapter.damage_pending());
        // No damage: drawing again is a no-op.
        assert!(!adapter.draw(&mut drawable, &source).unwrap());
    }

    #[test]
    fn cells_land_inside_the_frame() {
        let mut adapter = adapter_with_colors();
        let mut drawable = Drawable::new(Rect::new(0, 0, 10, 5));
        let source = GridSource {
            rows: 3,
            cols: 8,
            fill: 'z',
        };
        adapter.damage(DamageRect::new(0, 0, 3, 8));
        adapter.draw(&mut drawable, &source).unwrap();
        // Interior cell (0,0) maps to drawable (1,1).
        assert_eq!(drawable.buffer().cell((1u16, 1u16)).unwrap().symbol(), "z");
        // Frame corners intact.
        assert_eq!(drawable.buffer().cell((0u16, 0u16)).unwrap().symbol(), "┌");
        assert_eq!(drawable.buffer().cell((9u16, 4u16)).unwrap().symbol(), "┘");
    }

    #[test]
    fn interior_damage_skips_the_border() {
        let mut adapter = adapter_with_colors();
        let mut drawable = Drawable::new(Rect::new(0, 0, 12, 8));
        let source = GridSource {
            rows: 6,
            cols: 10,
            fill: 'q',
        };
        adapter.damage(DamageRect::new(2, 2, 4, 4));
        adapter.draw(&mut drawable, &source).unwrap();
        assert_eq!(drawable.buffer().cell((0u16, 0u16)).unwrap().symbol(), " ");
        assert_eq!(drawable.buffer().cell((3u16, 3u16)).unwrap().symbol(), "q");
    }

    #[test]
    fn cursor_restored_after_draw() {
        let mut adapter = adapter_with_colors();
        let mut drawable = Drawable::new(Rect::new(0, 0, 12, 8));
        drawable.set_cursor(4, 2);
        let source = GridSource {
            rows: 6,
            cols: 10,
            fill: '.',
        };
        adapter.damage(DamageRect::new(0, 0, 6, 10));
        adapter.draw(&mut drawable, &source).unwrap();
        assert_eq!(drawable.cursor(), (4, 2));
    }

    #[test]
    fn out_of_range_cursor_move_is_ignored() {
        let mut adapter = adapter_with_colors();
        let mut drawable = Drawable::new(Rect::new(0, 0, 10, 6));
        drawable.set_cursor(1, 1);
        adapter.move_cursor(&mut drawable, (10, 2), (0, 0), true);
        assert_eq!(drawable.cursor(), (1, 1));
        adapter.move_cursor(&mut drawable, (2, 3), (0, 0), true);
        assert_eq!(drawable.cursor(), (4, 3));
    }

    #[test]
    fn bell_reaches_the_driver() {
        let adapter = TermAdapter::new(None);
        let mut driver = HeadlessDriver::new(10, 4);
        adapter.bell(&mut driver).unwrap();
        adapter.bell(&mut driver).unwrap();
        assert_eq!(driver.beep_count(), 2);
    }

    #[test]
    fn cursor_visible_applies_and_known_props_are_acknowledged() {
        let mut adapter = TermAdapter::new(None);
        let mut driver = HeadlessDriver::new(10, 4);
        assert!(adapter.set_term_prop(&mut driver, TermProp::CursorVisible(true)));
        assert!(driver.cursor_visible());

        // Acknowledged but not implemented.
        assert!(adapter.set_term_prop(&mut driver, TermProp::Title("shell".into())));
        assert!(adapter.set_term_prop(&mut driver, TermProp::AltScreen(true)));
        assert!(adapter.set_term_prop(&mut driver, TermProp::Mouse(1)));

        // Unhandled.
        assert!(!adapter.set_term_prop(&mut driver, TermProp::CursorBlink(true)));
        assert!(!adapter.set_term_prop(&mut driver, TermProp::CursorShape(2)));
        assert!(!adapter.set_term_prop(&mut driver, TermProp::Reverse(false)));
        assert!(!adapter.set_term_prop(&mut driver, TermProp::IconName("sh".into())));
    }
}
