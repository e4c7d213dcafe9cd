use std::fmt;

use crate::alphabet::MAX_VARIANT;
use crate::model::{cohort_extent, Individual};

/// Cohort-wide call counts, as printed by `tilelook stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortStats {
    pub individuals: usize,
    pub blocks: usize,
    /// Block count per variant index; longer than the alphabet only when
    /// blocks were built with larger variants.
    pub variants: Vec<usize>,
    pub max_band: Option<u32>,
    pub max_pos: Option<u32>,
}

impl CohortStats {
    pub fn collect(individuals: &[Individual]) -> Self {
        let mut variants = vec![0usize; MAX_VARIANT as usize + 1];
        let mut blocks = 0;
        for human in individuals {
            for row in human.blocks.values() {
                for b in row.values() {
                    let v = b.variant as usize;
                    if v >= variants.len() {
                        variants.resize(v + 1, 0);
                    }
                    variants[v] += 1;
                    blocks += 1;
                }
            }
        }
        let (max_band, max_pos) = cohort_extent(individuals);
        CohortStats {
            individuals: individuals.len(),
            blocks,
            variants,
            max_band,
            max_pos,
        }
    }
}

impl fmt::Display for CohortStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "individuals\t{}", self.individuals)?;
        writeln!(f, "blocks\t{}", self.blocks)?;
        match (self.max_band, self.max_pos) {
            (Some(band), Some(pos)) => writeln!(f, "max band\t{band}\nmax position\t{pos}")?,
            _ => writeln!(f, "max band\t-\nmax position\t-")?,
        }
        for (variant, count) in self.variants.iter().enumerate().filter(|(_, c)| **c > 0) {
            writeln!(f, "variant {variant}\t{count}")?;
        }
        Ok(())
    }
}
