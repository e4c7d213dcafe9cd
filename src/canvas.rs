//! Raster construction for tile grids. No I/O happens here.

use image::{Rgb, RgbImage};

use crate::model::ResolvedRange;
use crate::palette::{BACKGROUND, GRID};

/// Pixel layout of a grid of square cells inside a 1-pixel border.
///
/// With grid lines, separators sit on every multiple of `cell_size` and
/// share pixels with the border, leaving `cell_size - 1` fill pixels per
/// cell. Without them, cells are `cell_size` wide and packed edge to edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellGeometry {
    pub cell_size: u32,
    pub grid_lines: bool,
    pub rows: u32,
    pub cols: u32,
}

impl CellGeometry {
    pub fn new(cell_size: u32, grid_lines: bool, rows: u32, cols: u32) -> Self {
        CellGeometry {
            cell_size,
            grid_lines,
            rows,
            cols,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let pad = if self.grid_lines { 1 } else { 2 };
        (self.cols * self.cell_size + pad, self.rows * self.cell_size + pad)
    }

    /// Edge length of the filled part of a cell.
    pub fn fill_size(&self) -> u32 {
        if self.grid_lines {
            self.cell_size - 1
        } else {
            self.cell_size
        }
    }

    /// Top-left fill pixel of cell (row, col).
    pub fn cell_origin(&self, row: u32, col: u32) -> (u32, u32) {
        (col * self.cell_size + 1, row * self.cell_size + 1)
    }
}

fn draw_frame(img: &mut RgbImage, geometry: &CellGeometry) {
    let (width, height) = img.dimensions();
    for x in 0..width {
        img.put_pixel(x, 0, GRID);
        img.put_pixel(x, height - 1, GRID);
    }
    for y in 0..height {
        img.put_pixel(0, y, GRID);
        img.put_pixel(width - 1, y, GRID);
    }

    if geometry.grid_lines {
        for c in 1..geometry.cols {
            let x = c * geometry.cell_size;
            for y in 0..height {
                img.put_pixel(x, y, GRID);
            }
        }
        for r in 1..geometry.rows {
            let y = r * geometry.cell_size;
            for x in 0..width {
                img.put_pixel(x, y, GRID);
            }
        }
    }
}

fn fill_cell(img: &mut RgbImage, geometry: &CellGeometry, row: u32, col: u32, color: Rgb<u8>) {
    let (x0, y0) = geometry.cell_origin(row, col);
    let size = geometry.fill_size();
    for y in y0..y0 + size {
        for x in x0..x0 + size {
            img.put_pixel(x, y, color);
        }
    }
}

/// Paint every cell for which `colorer(row, col)` returns a color; the
/// rest keep the background.
pub fn render_grid<F>(geometry: &CellGeometry, mut colorer: F) -> RgbImage
where
    F: FnMut(u32, u32) -> Option<Rgb<u8>>,
{
    let (width, height) = geometry.dimensions();
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
    draw_frame(&mut img, geometry);
    for row in 0..geometry.rows {
        for col in 0..geometry.cols {
            if let Some(color) = colorer(row, col) {
                fill_cell(&mut img, geometry, row, col, color);
            }
        }
    }
    img
}

pub fn tile_geometry(
    cell_size: u32,
    cells_per_row: u32,
    cell_count: usize,
    grid_lines: bool,
) -> CellGeometry {
    let cols = cells_per_row.max(1);
    let rows = (cell_count as u32).div_ceil(cols).max(1);
    CellGeometry::new(cell_size, grid_lines, rows, cols)
}

pub fn sample_geometry(cell_size: u32, range: &ResolvedRange, grid_lines: bool) -> CellGeometry {
    CellGeometry::new(cell_size, grid_lines, range.band_count(), range.pos_count())
}

/// Cohort view of one tile: cell k (row-major, `cells_per_row` wide)
/// belongs to the k-th individual.
pub fn render_tile_grid<F>(
    cell_size: u32,
    cells_per_row: u32,
    cell_count: usize,
    grid_lines: bool,
    colorer: F,
) -> RgbImage
where
    F: FnMut(u32, u32) -> Option<Rgb<u8>>,
{
    render_grid(&tile_geometry(cell_size, cells_per_row, cell_count, grid_lines), colorer)
}

/// Single-sample view: one row per band and one column per position of
/// `range`. The colorer gets offsets relative to the window start.
pub fn render_sample_grid<F>(
    cell_size: u32,
    range: &ResolvedRange,
    grid_lines: bool,
    colorer: F,
) -> RgbImage
where
    F: FnMut(u32, u32) -> Option<Rgb<u8>>,
{
    render_grid(&sample_geometry(cell_size, range, grid_lines), colorer)
}
