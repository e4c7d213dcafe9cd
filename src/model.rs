use rustc_hash::FxHashMap;

/// One decoded call at a (band, position) tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub band: u32,
    pub pos: u32,
    pub variant: u8,
    /// Weight from the rule catalog, only set when a `RuleBook` was supplied.
    pub factor: Option<u32>,
}

/// Sparse band -> position -> Block storage for one sample.
pub type BlockMap = FxHashMap<u32, FxHashMap<u32, Block>>;

/// One sample's decoded calls.
#[derive(Debug, Clone, Default)]
pub struct Individual {
    pub name: String,
    pub blocks: BlockMap,
    /// Largest band of any accepted Block.
    pub max_band: Option<u32>,
    /// Largest position of any accepted Block, across all bands.
    pub max_pos: Option<u32>,
}

impl Individual {
    pub fn new(name: impl Into<String>) -> Self {
        Individual {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn insert(&mut self, block: Block) {
        self.max_band = Some(self.max_band.map_or(block.band, |m| m.max(block.band)));
        self.max_pos = Some(self.max_pos.map_or(block.pos, |m| m.max(block.pos)));
        self.blocks
            .entry(block.band)
            .or_default()
            .insert(block.pos, block);
    }

    pub fn get(&self, band: u32, pos: u32) -> Option<&Block> {
        self.blocks.get(&band).and_then(|row| row.get(&pos))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.values().map(|row| row.len()).sum()
    }

    /// Bands holding at least one Block, ascending.
    pub fn bands(&self) -> Vec<u32> {
        let mut bands: Vec<u32> = self.blocks.keys().copied().collect();
        bands.sort_unstable();
        bands
    }
}

/// Inclusive (band, position) window. `None` bounds are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinateRange {
    pub start_band: u32,
    pub end_band: Option<u32>,
    pub start_pos: u32,
    pub end_pos: Option<u32>,
}

impl CoordinateRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[inline]
    pub fn band_past_end(&self, band: u32) -> bool {
        self.end_band.is_some_and(|end| band > end)
    }

    #[inline]
    pub fn pos_past_end(&self, pos: u32) -> bool {
        self.end_pos.is_some_and(|end| pos > end)
    }

    #[inline]
    pub fn contains(&self, band: u32, pos: u32) -> bool {
        band >= self.start_band
            && pos >= self.start_pos
            && !self.band_past_end(band)
            && !self.pos_past_end(pos)
    }

    /// Replace unbounded ends with the observed extents. Returns `None`
    /// when the window is empty.
    pub fn resolve(&self, max_band: Option<u32>, max_pos: Option<u32>) -> Option<ResolvedRange> {
        let end_band = self.end_band.or(max_band)?;
        let end_pos = self.end_pos.or(max_pos)?;
        if end_band < self.start_band || end_pos < self.start_pos {
            return None;
        }
        Some(ResolvedRange {
            start_band: self.start_band,
            end_band,
            start_pos: self.start_pos,
            end_pos,
        })
    }
}

/// A window with both ends fixed; always non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start_band: u32,
    pub end_band: u32,
    pub start_pos: u32,
    pub end_pos: u32,
}

impl ResolvedRange {
    pub fn band_count(&self) -> u32 {
        self.end_band - self.start_band + 1
    }

    pub fn pos_count(&self) -> u32 {
        self.end_pos - self.start_pos + 1
    }
}

/// Cohort-wide maximum extents.
pub fn cohort_extent(individuals: &[Individual]) -> (Option<u32>, Option<u32>) {
    let max_band = individuals.iter().filter_map(|h| h.max_band).max();
    let max_pos = individuals.iter().filter_map(|h| h.max_pos).max();
    (max_band, max_pos)
}
