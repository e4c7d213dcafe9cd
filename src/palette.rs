use image::Rgb;
use log::info;
use rustc_hash::FxHashMap;
use std::path::Path;

use crate::error::{Result, TileError};

/// Fill for cells without a call.
pub const BACKGROUND: Rgb<u8> = Rgb([230, 230, 230]);
/// Border and grid lines.
pub const GRID: Rgb<u8> = Rgb([0, 0, 0]);

const DEFAULT_LEN: usize = 64;

/// Built-in palette: white for the default variant, a green-to-blue ramp,
/// then distinct blues so every alphabet value keeps its own color.
const DEFAULT_COLORS: [[u8; 3]; DEFAULT_LEN] = {
    let head: [[u8; 3]; 9] = [
        [255, 255, 255],
        [0, 204, 0],
        [0, 255, 0],
        [0, 255, 255],
        [0, 204, 255],
        [0, 153, 255],
        [0, 102, 255],
        [0, 51, 255],
        [0, 0, 255],
    ];
    let mut colors = [[0u8; 3]; DEFAULT_LEN];
    let mut i = 0;
    while i < head.len() {
        colors[i] = head[i];
        i += 1;
    }
    let mut green = 1u8;
    while i < DEFAULT_LEN {
        // 51 is already taken by the ramp.
        if green == 51 {
            green += 1;
        }
        colors[i] = [0, green, 255];
        green += 1;
        i += 1;
    }
    colors
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMatch {
    Background,
    Variant(usize),
    Unknown,
}

/// Ordered variant colors plus an exact-match reverse index.
#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<Rgb<u8>>,
    background: Rgb<u8>,
    lookup: FxHashMap<[u8; 3], usize>,
}

impl Default for Palette {
    fn default() -> Self {
        Palette::build(DEFAULT_COLORS.iter().map(|&c| Rgb(c)).collect())
    }
}

impl Palette {
    pub fn new(colors: Vec<Rgb<u8>>) -> Result<Self> {
        if colors.is_empty() {
            return Err(TileError::MalformedPalette {
                line: 0,
                reason: "palette has no colors".into(),
            });
        }
        Ok(Palette::build(colors))
    }

    fn build(colors: Vec<Rgb<u8>>) -> Self {
        let mut lookup = FxHashMap::default();
        for (i, c) in colors.iter().enumerate() {
            lookup.entry(c.0).or_insert(i);
        }
        Palette {
            colors,
            background: BACKGROUND,
            lookup,
        }
    }

    /// Parse one `R, G, B` triple per line. Blank lines are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut colors = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 3 {
                return Err(TileError::MalformedPalette {
                    line: line_no,
                    reason: format!("expected 'R, G, B', got '{line}'"),
                });
            }
            let mut rgb = [0u8; 3];
            for (slot, field) in rgb.iter_mut().zip(&fields) {
                *slot = field.parse().map_err(|e| TileError::MalformedPalette {
                    line: line_no,
                    reason: format!("bad channel '{field}': {e}"),
                })?;
            }
            colors.push(Rgb(rgb));
        }
        Palette::new(colors)
    }

    /// Load from `path`, or fall back to the built-in palette.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| TileError::InputNotFound {
                    path: p.to_path_buf(),
                    source,
                })?;
                let palette = Palette::parse(&text)?;
                info!("Loaded {} palette colors from {:?}", palette.len(), p);
                Ok(palette)
            }
            None => Ok(Palette::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn background(&self) -> Rgb<u8> {
        self.background
    }

    /// Indices past the end clamp to the last entry.
    pub fn color_for(&self, index: u32) -> Rgb<u8> {
        let i = (index as usize).min(self.colors.len() - 1);
        self.colors[i]
    }

    pub fn index_for(&self, color: Rgb<u8>) -> ColorMatch {
        if color == self.background {
            return ColorMatch::Background;
        }
        match self.lookup.get(&color.0) {
            Some(&i) => ColorMatch::Variant(i),
            None => ColorMatch::Unknown,
        }
    }
}
