//! Rebuild an Individual from a per-sample PNG.

use image::RgbImage;
use log::info;
use std::path::Path;

use crate::alphabet::MAX_VARIANT;
use crate::canvas::{sample_geometry, CellGeometry};
use crate::error::{Result, TileError};
use crate::model::{Block, Individual, ResolvedRange};
use crate::palette::{ColorMatch, Palette};

/// Read cells of `img` laid out as `render_sample_grid` draws them.
pub fn sample_from_canvas(
    img: &RgbImage,
    name: &str,
    path: &Path,
    geometry: &CellGeometry,
    range: &ResolvedRange,
    palette: &Palette,
) -> Result<Individual> {
    let expected = geometry.dimensions();
    if img.dimensions() != expected {
        return Err(TileError::ImageSize {
            path: path.to_path_buf(),
            found: img.dimensions(),
            expected,
        });
    }

    let mut human = Individual::new(name);
    for row in 0..geometry.rows {
        for col in 0..geometry.cols {
            let (x, y) = geometry.cell_origin(row, col);
            let band = range.start_band + row;
            let pos = range.start_pos + col;
            match palette.index_for(*img.get_pixel(x, y)) {
                ColorMatch::Background => {}
                ColorMatch::Variant(i) if i <= MAX_VARIANT as usize => human.insert(Block {
                    band,
                    pos,
                    variant: i as u8,
                    factor: None,
                }),
                ColorMatch::Variant(i) => return Err(TileError::VariantOutOfRange(i as u32)),
                ColorMatch::Unknown => {
                    return Err(TileError::UnknownColor {
                        path: path.to_path_buf(),
                        band,
                        pos,
                    })
                }
            }
        }
    }
    Ok(human)
}

pub fn sample_from_image(
    path: &Path,
    cell_size: u32,
    grid_lines: bool,
    range: &ResolvedRange,
    palette: &Palette,
) -> Result<Individual> {
    let img = image::open(path)
        .map_err(|source| TileError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let human = sample_from_canvas(
        &img,
        &name,
        path,
        &sample_geometry(cell_size, range, grid_lines),
        range,
        palette,
    )?;
    info!("Recovered {} blocks from {:?}", human.block_count(), path);
    Ok(human)
}
