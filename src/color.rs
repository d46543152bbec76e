//! Palette capture, nearest-color matching, and (fg, bg) pair interning.
//!
//! The table is bound once per terminal session: it captures the emulator's
//! default palette, pushes the captured colors into the terminal's mutable
//! palette slots where supported, reads back what the terminal actually
//! stores, and eagerly interns every foreground/background combination so
//! later lookups are a table read.

use crate::error::{Error, Result};
use crate::screen::ScreenDriver;

pub const MAX_COLORS: usize = 256;

/// Size of the RGB lookup cache: 2^(5+5+5) buckets keyed by the high five
/// bits of each channel.
const RGB_CACHE_SIZE: usize = 32768;
const RGB_CACHE_EMPTY: u16 = 0xffff;
const PAIR_EMPTY: i32 = -1;

/// A color in the emulator's 8-bit-per-channel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale to the 0–1000 units the terminal palette interface uses.
    pub fn to_terminal_units(self) -> (u16, u16, u16) {
        (
            (self.r as u32 * 1000 / 255) as u16,
            (self.g as u32 * 1000 / 255) as u16,
            (self.b as u32 * 1000 / 255) as u16,
        )
    }

    pub fn from_terminal_units(content: (u16, u16, u16)) -> Self {
        Self {
            r: (content.0 as u32 * 255 / 1000).min(255) as u8,
            g: (content.1 as u32 * 255 / 1000).min(255) as u8,
            b: (content.2 as u32 * 255 / 1000).min(255) as u8,
        }
    }

    fn distance_sq(self, other: Rgb) -> u32 {
        let dr = self.r as i32 - other.r as i32;
        let dg = self.g as i32 - other.g as i32;
        let db = self.b as i32 - other.b as i32;
        (dr * dr + dg * dg + db * db) as u32
    }
}

/// Interned identifier for a (foreground, background) color combination.
/// Pair 0 is reserved for the terminal's default pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId(pub u32);

#[derive(Debug)]
pub struct ColorTable {
    ncolors: u16,
    palette: [Rgb; MAX_COLORS],
    pair_table: Box<[i32]>,
    pair_colors: Vec<(u8, u8)>,
    rgb_cache: Box<[u16]>,
}

impl ColorTable {
    /// Capture the emulator palette and intern every pair the terminal can
    /// represent. `palette` yields the emulator's default color for each
    /// palette index.
    pub fn bind<F>(palette: F, driver: &mut dyn ScreenDriver) -> Result<ColorTable>
    where
        F: Fn(u8) -> Rgb,
    {
        if !driver.has_colors() {
            return Err(Error::NoColorSupport);
        }

        let ncolors = driver
            .colors()
            .min(isqrt(driver.color_pairs()) as u16)
            .min(MAX_COLORS as u16);
        tracing::info!(
            colors = driver.colors(),
            pairs = driver.color_pairs(),
            ncolors,
            "binding color table"
        );

        let mut table = ColorTable {
            ncolors,
            palette: [Rgb::default(); MAX_COLORS],
            pair_table: vec![PAIR_EMPTY; MAX_COLORS * MAX_COLORS].into_boxed_slice(),
            pair_colors: vec![(0, 0)],
            rgb_cache: vec![RGB_CACHE_EMPTY; RGB_CACHE_SIZE].into_boxed_slice(),
        };
        // The default pair is fixed by the terminal.
        table.pair_table[0] = 0;

        for i in 0..ncolors {
            table.palette[i as usize] = palette(i as u8);
        }

        // Push the captured colors into the terminal's mutable slots, then
        // read back what the terminal now reports. Nearest-match queries must
        // be measured against colors the terminal can actually draw, and the
        // 0-1000 unit round trip quantizes them.
        if driver.can_change_color() {
            for i in 16..ncolors {
                let content = table.palette[i as usize].to_terminal_units();
                if let Err(err) = driver.init_color(i as u8, content) {
                    tracing::warn!(index = i, %err, "init_color failed");
                    break;
                }
            }
        }
        for i in 16..ncolors {
            table.palette[i as usize] = Rgb::from_terminal_units(driver.color_content(i as u8));
        }

        for bg in 0..ncolors {
            for fg in 0..ncolors {
                table.pair_id(fg as u8, bg as u8);
            }
        }

        Ok(table)
    }

    pub fn color_count(&self) -> u16 {
        self.ncolors
    }

    pub fn palette_color(&self, index: u8) -> Rgb {
        self.palette[index as usize]
    }

    /// Intern a (fg, bg) combination. Repeated queries return the same id.
    pub fn pair_id(&mut self, fg: u8, bg: u8) -> PairId {
        let slot = ((fg as usize) << 8) | bg as usize;
        if self.pair_table[slot] == PAIR_EMPTY {
            let id = self.pair_colors.len() as i32;
            self.pair_table[slot] = id;
            self.pair_colors.push((fg, bg));
        }
        PairId(self.pair_table[slot] as u32)
    }

    pub fn pair_components(&self, pair: PairId) -> Option<(u8, u8)> {
        self.pair_colors.get(pair.0 as usize).copied()
    }

    /// Map an arbitrary RGB to its nearest captured palette index. Exact
    /// matches win; otherwise minimum squared Euclidean distance. Results
    /// are cached per 5-bit-per-channel bucket.
    pub fn color_id(&mut self, color: Rgb) -> u8 {
        let bucket = rgb_bucket(color);
        if self.rgb_cache[bucket] == RGB_CACHE_EMPTY {
            let mut index = 0usize;
            let mut best = u32::MAX;
            for i in 0..self.ncolors as usize {
                if self.palette[i] == color {
                    index = i;
                    break;
                }
                let d = self.palette[i].distance_sq(color);
                if d < best {
                    best = d;
                    index = i;
                }
            }
            self.rgb_cache[bucket] = index as u16;
        }
        self.rgb_cache[bucket] as u8
    }
}

fn rgb_bucket(color: Rgb) -> usize {
    let bucket =
        ((color.r as usize >> 3) << 10) | ((color.g as usize >> 3) << 5) | (color.b as usize >> 3);
    bucket & 0x7fff
}

fn isqrt(value: u32) -> u32 {
    let mut result = 0u32;
    let mut bit = 1u32 << 30;
    let mut remainder = value;
    while bit > value {
        bit >>= 2;
    }
    while bit != 0 {
        if remainder >= result + bit {
            remainder -= result + bit;
            result = (result >> 1) + bit;
        } else {
            result >>= 1;
        }
        bit >>= 2;
    }
    result
}

/// The xterm-256 default palette: 16 ANSI entries, a 6x6x6 color cube, and
/// a 24-step gray ramp.
pub fn default_palette() -> [Rgb; MAX_COLORS] {
    const ANSI: [(u8, u8, u8); 16] = [
        (0, 0, 0),
        (205, 0, 0),
        (0, 205, 0),
        (205, 205, 0),
        (0, 0, 238),
        (205, 0, 205),
        (0, 205, 205),
        (229, 229, 229),
        (127, 127, 127),
        (255, 0, 0),
        (0, 255, 0),
        (255, 255, 0),
        (92, 92, 255),
        (255, 0, 255),
        (0, 255, 255),
        (255, 255, 255),
    ];

    let mut palette = [Rgb::default(); MAX_COLORS];
    for (i, &(r, g, b)) in ANSI.iter().enumerate() {
        palette[i] = Rgb::new(r, g, b);
    }
    for i in 16..232 {
        let idx = i - 16;
        let conv = |c: usize| [0u8, 95, 135, 175, 215, 255][c];
        palette[i] = Rgb::new(conv(idx / 36), conv(idx / 6 % 6), conv(idx % 6));
    }
    for i in 232..256 {
        let v = (8 + (i - 232) * 10) as u8;
        palette[i] = Rgb::new(v, v, v);
    }
    palette
}
