//! Piece classification module.
//! Uses `image` to crop and rescale one board cell and `imageproc` to score it
//! against every reference image drawn on the same tile color. The 64 cells
//! are classified in parallel with `rayon`.
//! Reference files are named `{kind}-{color}-{tile}.png`, e.g. `knight-white-black.png`
//! is a white knight on a dark square; empty squares are `empty-empty-{tile}.png`.

use crate::board::{BoardState, Cell, Color, PieceKind, Square};
use crate::capture::Frame;
use crate::config::ClassifierThresholds;
use crate::error::HandsFreeError;
use crate::grid::GridGeometry;
use anyhow::Result;
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::stats::root_mean_squared_error;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// Background color of a board square.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tile {
    Light,
    Dark,
}

impl Tile {
    /// Light when `col + row` is even, with 1-based coordinates.
    pub fn of(col: usize, row: usize) -> Tile {
        if (col + row) % 2 == 0 { Tile::Light } else { Tile::Dark }
    }

    fn file_suffix(self) -> &'static str {
        match self {
            Tile::Light => "white",
            Tile::Dark => "black",
        }
    }
}

struct Reference {
    cell: Cell,
    light: GrayImage,
    dark: GrayImage,
}

impl Reference {
    fn on(&self, tile: Tile) -> &GrayImage {
        match tile {
            Tile::Light => &self.light,
            Tile::Dark => &self.dark,
        }
    }
}

/// Labeled reference images, loaded once and shared read-only.
pub struct ReferenceCatalog {
    dim: u32,
    references: Vec<Reference>,
}

/// Every cell the catalog holds an image pair for.
fn reference_cells() -> impl Iterator<Item = Cell> {
    [Color::Black, Color::White]
        .into_iter()
        .flat_map(|color| PieceKind::PIECES.into_iter().map(move |kind| Cell::new(kind, color)))
        .chain(std::iter::once(Cell::EMPTY))
}

fn to_dim(image: GrayImage, dim: u32) -> GrayImage {
    if image.dimensions() == (dim, dim) {
        image
    } else {
        imageops::resize(&image, dim, dim, FilterType::CatmullRom)
    }
}

impl ReferenceCatalog {
    /// Loads all 26 reference images from `dir`.
    pub fn load(dir: &Path, dim: u32) -> Result<Self> {
        let dim = dim.max(1);
        let read = |cell: Cell, tile: Tile| -> Result<GrayImage, HandsFreeError> {
            let path = dir.join(format!("{}-{}-{}.png", cell.kind().name(), cell.color().name(), tile.file_suffix()));
            let image = image::open(&path).map_err(|source| HandsFreeError::ReferenceImage { path, source })?;
            Ok(to_dim(image.to_luma8(), dim))
        };

        let mut references = Vec::new();
        for cell in reference_cells() {
            references.push(Reference { cell, light: read(cell, Tile::Light)?, dark: read(cell, Tile::Dark)? });
        }
        debug!(count = references.len(), dir = %dir.display(), "loaded reference images");
        Ok(Self { dim, references })
    }

    /// Builds a catalog from in-memory `(cell, light tile, dark tile)` images.
    #[cfg(test)]
    pub fn from_images(dim: u32, images: Vec<(Cell, GrayImage, GrayImage)>) -> Self {
        let dim = dim.max(1);
        let references = images
            .into_iter()
            .map(|(cell, light, dark)| Reference { cell, light: to_dim(light, dim), dark: to_dim(dark, dim) })
            .collect();
        Self { dim, references }
    }

    pub fn dim(&self) -> u32 {
        self.dim
    }
}

/// Identifies the contents of board cells by nearest reference image.
pub struct PieceClassifier {
    catalog: Arc<ReferenceCatalog>,
    thresholds: ClassifierThresholds,
}

impl PieceClassifier {
    pub fn new(catalog: Arc<ReferenceCatalog>, thresholds: ClassifierThresholds) -> Self {
        Self { catalog, thresholds }
    }

    /// Classifies the cell at 1-based `(col, row)`. Anything that matches no
    /// reference closely enough is `Unknown`.
    pub fn classify(&self, frame: &Frame, grid: &GridGeometry, col: usize, row: usize) -> Cell {
        let Some(cell_image) = self.crop_cell(&frame.pixels, grid, col, row) else {
            return Cell::UNKNOWN;
        };
        let tile = Tile::of(col, row);

        let mut best: Option<(f64, Cell)> = None;
        for reference in &self.catalog.references {
            let error = root_mean_squared_error(&cell_image, reference.on(tile)).powi(2);
            trace!(col, row, candidate = %reference.cell, error, "cell difference");

            let limit = if reference.cell.is_empty() {
                self.thresholds.empty_max_error
            } else {
                self.thresholds.piece_max_error
            };
            if error < limit && best.is_none_or(|(lowest, _)| error < lowest) {
                best = Some((error, reference.cell));
            }
        }
        best.map_or(Cell::UNKNOWN, |(_, cell)| cell)
    }

    /// Classifies all 64 cells, in parallel.
    pub fn classify_board(&self, frame: &Frame, grid: &GridGeometry) -> BoardState {
        let squares: Vec<Square> = BoardState::squares().collect();
        let cells: Vec<(Square, Cell)> = squares
            .into_par_iter()
            .map(|square| {
                let (col, row) = (square.col as usize + 1, square.row as usize + 1);
                (square, self.classify(frame, grid, col, row))
            })
            .collect();

        let mut board = BoardState::unknown();
        for (square, cell) in cells {
            board.set(square, cell);
        }
        board
    }

    /// Cell image at reference size, or `None` if the cell lies outside the frame.
    fn crop_cell(&self, pixels: &GrayImage, grid: &GridGeometry, col: usize, row: usize) -> Option<GrayImage> {
        if !(1..=8).contains(&col) || !(1..=8).contains(&row) {
            return None;
        }
        let (width, height) = pixels.dimensions();
        let clamp = |v: f64, max: u32| (v.round().max(0.0) as u32).min(max);

        let mut x1 = clamp(grid.cols()[col - 1], width);
        let x2 = clamp(grid.cols()[col], width);
        let mut y1 = clamp(grid.rows()[row - 1], height);
        let y2 = clamp(grid.rows()[row], height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        let (w, h) = (x2 - x1, y2 - y1);
        if w > h {
            x1 += w - h;
        } else if h > w {
            y1 += h - w;
        }
        let side = w.min(h);
        let cropped = imageops::crop_imm(pixels, x1, y1, side, side).to_image();
        let dim = self.catalog.dim();
        Some(imageops::resize(&cropped, dim, dim, FilterType::CatmullRom))
    }
}
