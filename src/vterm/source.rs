//! `vt100`-backed cell source.

use vt100::Screen;

use crate::color::{MAX_COLORS, Rgb, default_palette};

use super::{CellSource, SourceCell};

/// Adapts a `vt100::Screen` to the adapter's [`CellSource`] seam.
///
/// Indexed colors resolve through the xterm-256 default palette; default
/// colors resolve to the configured defaults (black unless overridden, the
/// same defaults the renderer has always assumed).
pub struct VtScreenSource<'a> {
    screen: &'a Screen,
    palette: [Rgb; MAX_COLORS],
    default_fg: Rgb,
    default_bg: Rgb,
}

impl<'a> VtScreenSource<'a> {
    pub fn new(screen: &'a Screen) -> Self {
        Self {
            screen,
            palette: default_palette(),
            default_fg: Rgb::new(0, 0, 0),
            default_bg: Rgb::new(0, 0, 0),
        }
    }

    pub fn with_defaults(mut self, fg: Rgb, bg: Rgb) -> Self {
        self.default_fg = fg;
        self.default_bg = bg;
        self
    }

    fn resolve(&self, color: vt100::Color, default: Rgb) -> Rgb {
        match color {
            vt100::Color::Default => default,
            vt100::Color::Idx(idx) => self.palette[idx as usize],
            vt100::Color::Rgb(r, g, b) => Rgb::new(r, g, b),
        }
    }
}

impl CellSource for VtScreenSource<'_> {
    fn size(&self) -> (u16, u16) {
        self.screen.size()
    }

    fn cell(&self, row: u16, col: u16) -> SourceCell {
        let Some(cell) = self.screen.cell(row, col) else {
            return SourceCell {
                fg: self.default_fg,
                bg: self.default_bg,
                ..SourceCell::default()
            };
        };
        SourceCell {
            ch: cell.contents().chars().next(),
            bold: cell.bold(),
            underline: cell.underline(),
            // vt100 does not track blink.
            blink: false,
            reverse: cell.inverse(),
            fg: self.resolve(cell.fgcolor(), self.default_fg),
            bg: self.resolve(cell.bgcolor(), self.default_bg),
        }
    }

    fn palette_color(&self, index: u8) -> Rgb {
        self.palette[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8], rows: u16, cols: u16) -> vt100::Parser {
        let mut parser = vt100::Parser::new(rows, cols, 0);
        parser.process(input);
        parser
    }

    #[test]
    fn plain_text_cells_resolve() {
        let parser = parse(b"hi", 4, 10);
        let source = VtScreenSource::new(parser.screen());
        assert_eq!(source.size(), (4, 10));
        assert_eq!(source.cell(0, 0).ch, Some('h'));
        assert_eq!(source.cell(0, 1).ch, Some('i'));
        assert_eq!(source.cell(0, 2).ch, None);
    }

    #[test]
    fn sgr_attributes_map_to_flags() {
        let parser = parse(b"\x1b[1;4;7mX", 2, 10);
        let source = VtScreenSource::new(parser.screen());
        let cell = source.cell(0, 0);
        assert!(cell.bold);
        assert!(cell.underline);
        assert!(cell.reverse);
        assert!(!cell.blink);
    }

    #[test]
    fn indexed_colors_resolve_through_palette() {
        // Red foreground (index 1), green background (index 2).
        let parser = parse(b"\x1b[31;42mX", 2, 10);
        let source = VtScreenSource::new(parser.screen());
        let cell = source.cell(0, 0);
        assert_eq!(cell.fg, default_palette()[1]);
        assert_eq!(cell.bg, default_palette()[2]);
    }

    #[test]
    fn default_colors_resolve_to_configured_defaults() {
        let parser = parse(b"X", 2, 10);
        let source =
            VtScreenSource::new(parser.screen()).with_defaults(Rgb::new(1, 2, 3), Rgb::new(4, 5, 6));
        let cell = source.cell(0, 0);
        assert_eq!(cell.fg, Rgb::new(1, 2, 3));
        assert_eq!(cell.bg, Rgb::new(4, 5, 6));
    }

    #[test]
    fn truecolor_passes_through() {
        let parser = parse(b"\x1b[38;2;10;20;30mX", 2, 10);
        let source = VtScreenSource::new(parser.screen());
        assert_eq!(source.cell(0, 0).fg, Rgb::new(10, 20, 30));
    }
}
