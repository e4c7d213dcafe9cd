//! Tile rule catalog: `factor,"band.sub.pos.sub2"` lines.
//!
//! Consecutive lines sharing a tile id get ascending variant ordinals
//! starting at 0; a new id resets the counter. Ordinals depend only on
//! line order, so reordering the file changes the mapping.

use log::{debug, info};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Result, TileError};
use crate::model::CoordinateRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub tile_id: String,
    pub band: u32,
    pub pos: u32,
    pub factor: u32,
    pub variant: u32,
}

fn malformed(path: &Path, line: usize, reason: impl Into<String>) -> TileError {
    TileError::MalformedLine {
        path: path.to_path_buf(),
        line,
        reason: reason.into(),
    }
}

/// Split a dotted tile id into its band and position (both hex).
fn parse_tile_id(id: &str) -> std::result::Result<(u32, u32), String> {
    let fields: Vec<&str> = id.split('.').collect();
    if fields.len() != 4 || fields.iter().any(|f| f.is_empty()) {
        return Err(format!("tile id '{id}' must have four dot-separated fields"));
    }
    let band = u32::from_str_radix(fields[0], 16)
        .map_err(|e| format!("cannot parse band of '{id}': {e}"))?;
    let pos = u32::from_str_radix(fields[2], 16)
        .map_err(|e| format!("cannot parse position of '{id}': {e}"))?;
    Ok((band, pos))
}

/// Stream every catalog entry to `visit` without holding the catalog in memory.
/// `path` is only used for error context.
pub fn for_each<R, F>(reader: R, path: &Path, mut visit: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(RuleEntry) -> Result<()>,
{
    let mut last_id = String::new();
    let mut ordinal = 0u32;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| TileError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (factor, id) = line
            .split_once(',')
            .ok_or_else(|| malformed(path, line_no, "missing ',' between factor and tile id"))?;
        let factor: u32 = factor
            .trim()
            .parse()
            .map_err(|e| malformed(path, line_no, format!("cannot parse factor '{factor}': {e}")))?;
        let id = id.trim().trim_matches('"');
        let (band, pos) = parse_tile_id(id).map_err(|reason| malformed(path, line_no, reason))?;

        if id == last_id {
            ordinal += 1;
        } else {
            ordinal = 0;
            last_id.clear();
            last_id.push_str(id);
        }

        visit(RuleEntry {
            tile_id: id.to_string(),
            band,
            pos,
            factor,
            variant: ordinal,
        })?;
    }
    Ok(())
}

pub fn decode<R: BufRead>(reader: R, path: &Path) -> Result<Vec<RuleEntry>> {
    let mut rules = Vec::new();
    for_each(reader, path, |r| {
        rules.push(r);
        Ok(())
    })?;
    Ok(rules)
}

/// (band, pos, variant) -> factor lookup used to enrich decoded Blocks.
#[derive(Debug, Default, Clone)]
pub struct RuleBook {
    factors: FxHashMap<(u32, u32, u32), u32>,
}

impl RuleBook {
    /// Load the rules of a catalog file that fall inside `range`.
    pub fn load(path: &Path, range: &CoordinateRange) -> Result<Self> {
        let file = File::open(path).map_err(|source| TileError::InputNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loading tile rules from {:?}...", path);
        let book = Self::from_reader(BufReader::new(file), path, range)?;
        info!("Loaded {} tile rules", book.len());
        Ok(book)
    }

    pub fn from_reader<R: BufRead>(
        reader: R,
        path: &Path,
        range: &CoordinateRange,
    ) -> Result<Self> {
        let mut book = RuleBook::default();
        let mut skipped = 0usize;
        for_each(reader, path, |r| {
            if range.contains(r.band, r.pos) {
                book.insert(r.band, r.pos, r.variant, r.factor);
            } else {
                skipped += 1;
            }
            Ok(())
        })?;
        debug!("Skipped {} rules outside the window", skipped);
        Ok(book)
    }

    pub fn insert(&mut self, band: u32, pos: u32, variant: u32, factor: u32) {
        self.factors.insert((band, pos, variant), factor);
    }

    pub fn factor(&self, band: u32, pos: u32, variant: u32) -> Option<u32> {
        self.factors.get(&(band, pos, variant)).copied()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}
