//! Board grid detection.
//!
//! The default strategy looks for the board's checker pattern: along a scan
//! line through an empty-ish rank the squares show up as eight runs of equal
//! length and alternating gray level. Runs are grouped by length with a kernel
//! density estimate so that piece outlines, grid lines and page background
//! don't interrupt the alternation. Rows give the left edge and square size,
//! then one column through the left edge gives the top edge.

use crate::board::Square;
use crate::capture::Frame;
use crate::config::GridCalibration;
use image::GrayImage;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::{debug, trace};

const SQUARES: usize = 8;

/// Pixel positions of the 9 vertical and 9 horizontal grid lines.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridGeometry {
    cols: [f64; SQUARES + 1],
    rows: [f64; SQUARES + 1],
}

impl GridGeometry {
    /// Evenly spaced grid with its top-left corner at `(left, top)`. The lines
    /// are strictly increasing for any positive `square`.
    pub fn from_origin(left: f64, top: f64, square: f64) -> Self {
        Self {
            cols: std::array::from_fn(|k| left + k as f64 * square),
            rows: std::array::from_fn(|k| top + k as f64 * square),
        }
    }

    pub fn cols(&self) -> &[f64; SQUARES + 1] {
        &self.cols
    }

    pub fn rows(&self) -> &[f64; SQUARES + 1] {
        &self.rows
    }

    /// Same grid in a coordinate space `factor` times larger.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            cols: self.cols.map(|x| x * factor),
            rows: self.rows.map(|y| y * factor),
        }
    }

    /// Same grid shifted by `(dx, dy)`.
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            cols: self.cols.map(|x| x + dx),
            rows: self.rows.map(|y| y + dy),
        }
    }

    /// Pixel center of a board square.
    pub fn cell_center(&self, square: Square) -> (f64, f64) {
        let col = square.col.clamp(0, 7) as usize;
        let row = square.row.clamp(0, 7) as usize;
        (
            (self.cols[col] + self.cols[col + 1]) / 2.0,
            (self.rows[row] + self.rows[row + 1]) / 2.0,
        )
    }
}

/// A located board in both coordinate spaces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocatedGrid {
    /// Frame pixels, for cropping cells.
    pub scaled: GridGeometry,
    /// Global screen coordinates, for the mouse.
    pub screen: GridGeometry,
}

impl LocatedGrid {
    /// Pairs a grid found in `frame` with its position on screen.
    pub fn from_scaled(scaled: GridGeometry, frame: &Frame) -> Self {
        let (x, y) = frame.origin;
        Self { screen: scaled.scaled(frame.scale).translated(x, y), scaled }
    }
}

/// Strategy for finding the board in a frame.
pub trait GridLocator: Send + Sync {
    fn locate(&self, frame: &Frame) -> Option<LocatedGrid>;
}

/// A maximal span of adjacent pixels with (nearly) the same gray level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run {
    pub start: u32,
    pub len: u32,
    pub value: u8,
}

/// Run-length encodes one scan line.
pub fn runs(line: impl IntoIterator<Item = u8>, tolerance: u8) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::new();
    for (i, value) in line.into_iter().enumerate() {
        match out.last_mut() {
            Some(run) if run.value.abs_diff(value) <= tolerance => run.len += 1,
            _ => out.push(Run { start: i as u32, len: 1, value }),
        }
    }
    out
}

/// Log of a Gaussian kernel density at `at`, over a histogram of run lengths.
fn log_density(at: f64, histogram: &BTreeMap<u32, usize>, total: usize, bandwidth: f64) -> f64 {
    let terms: Vec<f64> = histogram
        .iter()
        .map(|(&len, &count)| (count as f64).ln() - 0.5 * ((at - len as f64) / bandwidth).powi(2))
        .collect();
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = terms.iter().map(|t| (t - max).exp()).sum();
    max + sum.ln() - (total as f64 * bandwidth * (2.0 * PI).sqrt()).ln()
}

/// Groups runs by length, splitting at local minima of the length density.
/// Order along the scan line is preserved inside each cluster. When several
/// clusters exist the first one (grid lines, anti-aliasing) is dropped.
fn cluster_by_length(runs: &[Run], max_len: u32, bandwidth: f64) -> Vec<Vec<Run>> {
    if runs.is_empty() || max_len < 3 {
        return Vec::new();
    }
    let mut histogram = BTreeMap::new();
    for run in runs {
        *histogram.entry(run.len).or_insert(0usize) += 1;
    }
    let density: Vec<f64> = (0..max_len)
        .map(|s| log_density(s as f64, &histogram, runs.len(), bandwidth))
        .collect();

    let mut bounds: Vec<u32> = (1..density.len() - 1)
        .filter(|&i| density[i] < density[i - 1] && density[i] < density[i + 1])
        .map(|i| i as u32)
        .collect();
    bounds.push(max_len - 1);
    trace!(?bounds, "density minima");

    let mut clusters: Vec<Vec<Run>> = vec![Vec::new(); bounds.len()];
    for run in runs {
        if let Some(k) = bounds.iter().position(|&bound| run.len < bound) {
            clusters[k].push(*run);
        }
    }
    clusters.retain(|cluster| !cluster.is_empty());
    if clusters.len() > 1 {
        clusters.remove(0);
    }
    clusters
}

/// Index of the first window of 8 runs alternating between two gray levels
/// with near-equal lengths.
fn find_checker_pattern(cluster: &[Run], tolerance: u8, length_tolerance: u32) -> Option<usize> {
    if cluster.len() < SQUARES {
        return None;
    }
    let same = |a: u8, b: u8| a.abs_diff(b) <= tolerance;
    (0..=cluster.len() - SQUARES).find(|&i| {
        let window = &cluster[i..i + SQUARES];
        let (a, b) = (window[0].value, window[1].value);
        !same(a, b)
            && window.iter().enumerate().all(|(k, run)| {
                same(run.value, if k % 2 == 0 { a } else { b })
                    && run.len.abs_diff(window[0].len) <= length_tolerance
            })
    })
}

/// Board edge and size measured along one scan line.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Pattern {
    edge: f64,
    board: f64,
}

/// Finds the board by its alternating light/dark squares.
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckerPatternLocator {
    calibration: GridCalibration,
}

impl CheckerPatternLocator {
    pub fn new(calibration: GridCalibration) -> Self {
        Self { calibration }
    }

    fn scan(&self, line: impl IntoIterator<Item = u8>, max_len: u32) -> Option<Pattern> {
        let cal = &self.calibration;
        let runs = runs(line, cal.run_tolerance);
        for cluster in cluster_by_length(&runs, max_len, cal.kde_bandwidth) {
            let Some(i) = find_checker_pattern(&cluster, cal.run_tolerance, cal.length_tolerance) else {
                continue;
            };
            let first = cluster[i];
            // the gap to the next run is the true square pitch; split the
            // difference so borders between squares are shared evenly
            let pitch = (cluster[i + 1].start - first.start) as f64;
            let offset = (pitch - first.len as f64) / 2.0;
            let span = (cluster[i + SQUARES - 1].start - first.start) as f64;
            let board = span * SQUARES as f64 / (SQUARES - 1) as f64 + cal.size_correction_px;
            if board <= SQUARES as f64 {
                continue;
            }
            debug!(start = first.start, len = first.len, board, "checker pattern");
            return Some(Pattern { edge: first.start as f64 - offset, board });
        }
        None
    }
}

fn row_pixels(image: &GrayImage, y: u32) -> impl Iterator<Item = u8> + '_ {
    (0..image.width()).map(move |x| image.get_pixel(x, y).0[0])
}

fn col_pixels(image: &GrayImage, x: u32) -> impl Iterator<Item = u8> + '_ {
    (0..image.height()).map(move |y| image.get_pixel(x, y).0[0])
}

impl GridLocator for CheckerPatternLocator {
    fn locate(&self, frame: &Frame) -> Option<LocatedGrid> {
        let image = &frame.pixels;
        let (width, height) = image.dimensions();
        let max_len = height / SQUARES as u32;

        let (left, board) = (height / 4..height * 3 / 4).find_map(|y| {
            trace!(y, "searching row for column coordinates");
            self.scan(row_pixels(image, y), max_len).map(|p| (p.edge, p.board))
        })?;

        let first_col = left.round().max(0.0) as u32;
        let last_col = ((left + board).round().max(0.0) as u32).min(width);
        let top = (first_col..last_col).find_map(|x| {
            trace!(x, "searching column for row coordinates");
            self.scan(col_pixels(image, x), max_len).map(|p| p.edge)
        })?;

        let scaled = GridGeometry::from_origin(left, top, board / SQUARES as f64);
        debug!(left, top, board, "board located");
        Some(LocatedGrid::from_scaled(scaled, frame))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const LEFT: u32 = 100;
    pub(crate) const TOP: u32 = 60;
    pub(crate) const SQUARE: u32 = 40;
    pub(crate) const LIGHT: u8 = 200;
    pub(crate) const DARK: u8 = 120;

    /// 640x480 frame: striped page background and an empty board at (100, 60).
    pub(crate) fn board_frame() -> GrayImage {
        GrayImage::from_fn(640, 480, |x, y| {
            let inside = (LEFT..LEFT + 8 * SQUARE).contains(&x) && (TOP..TOP + 8 * SQUARE).contains(&y);
            if inside {
                let col = (x - LEFT) / SQUARE;
                let row = (y - TOP) / SQUARE;
                image::Luma([if (col + row) % 2 == 0 { LIGHT } else { DARK }])
            } else {
                image::Luma([[10, 40, 70][((x / 3) % 3) as usize]])
            }
        })
    }

    /// `board_frame` with pieces drawn as flat blobs: black on the top two
    /// ranks, white on the bottom two, two pawns in the middle and two pieces
    /// touching the left edge of the a-file.
    pub(crate) fn populated_board_frame() -> GrayImage {
        let mut image = board_frame();
        let mut piece = |col: u32, row: u32, value: u8, (x0, x1): (u32, u32), (y0, y1): (u32, u32)| {
            for y in y0..y1 {
                for x in x0..x1 {
                    image.put_pixel(LEFT + col * SQUARE + x, TOP + row * SQUARE + y, image::Luma([value]));
                }
            }
        };
        for col in 0..8 {
            piece(col, 0, 30, (10, 30), (6, 34));
            piece(col, 1, 30, (12, 28), (4, 36));
            piece(col, 6, 230, (12, 28), (4, 36));
            piece(col, 7, 230, (10, 30), (6, 34));
        }
        piece(2, 2, 230, (12, 28), (4, 36));
        piece(5, 2, 30, (12, 28), (4, 36));
        piece(0, 3, 30, (0, 26), (8, 32));
        piece(0, 4, 230, (0, 26), (8, 32));
        image
    }

    fn exact() -> CheckerPatternLocator {
        CheckerPatternLocator::new(GridCalibration { size_correction_px: 0.0, ..GridCalibration::default() })
    }

    #[test]
    fn test_runs_merge_within_tolerance() {
        let line = [5u8, 5, 6, 9, 9, 9];
        assert_eq!(runs(line, 0).len(), 3);
        assert_eq!(
            runs(line, 1),
            vec![Run { start: 0, len: 3, value: 5 }, Run { start: 3, len: 3, value: 9 }]
        );
    }

    #[test]
    fn test_checker_pattern_needs_eight_alternating() {
        let run = |start, value| Run { start, len: 10, value };
        let seven: Vec<Run> = (0..7).map(|k| run(k * 10, if k % 2 == 0 { 1 } else { 2 })).collect();
        assert_eq!(find_checker_pattern(&seven, 0, 2), None);

        let mut cluster = vec![run(0, 9)];
        cluster.extend((0..8).map(|k| run(10 + k * 10, if k % 2 == 0 { 1 } else { 2 })));
        assert_eq!(find_checker_pattern(&cluster, 0, 2), Some(1));
    }

    #[test]
    fn test_clusters_separate_lines_from_squares() {
        let mut line = Vec::new();
        for k in 0..30 {
            line.extend(std::iter::repeat_n([10u8, 40, 70][k % 3], 2));
        }
        for k in 0..8 {
            line.extend(std::iter::repeat_n(if k % 2 == 0 { 200u8 } else { 120 }, 40));
        }
        let clusters = cluster_by_length(&runs(line, 0), 60, 1.0);
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].iter().all(|run| run.len == 40));
        assert_eq!(clusters[0].len(), 8);
    }

    #[test]
    fn test_locates_synthetic_board() {
        let frame = Frame::new(board_frame(), 2.0);
        let grid = exact().locate(&frame).expect("board not found");

        for k in 0..9 {
            assert!((grid.scaled.cols()[k] - (LEFT + k as u32 * SQUARE) as f64).abs() < 1e-9);
            assert!((grid.scaled.rows()[k] - (TOP + k as u32 * SQUARE) as f64).abs() < 1e-9);
            assert!((grid.screen.cols()[k] - 2.0 * grid.scaled.cols()[k]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_locates_board_with_pieces() {
        // pawns break every row scan above y=136 and every column scan left of x=130
        let frame = Frame::new(populated_board_frame(), 1.0);
        let grid = exact().locate(&frame).expect("board not found");

        for k in 0..9 {
            assert!((grid.scaled.cols()[k] - (LEFT + k as u32 * SQUARE) as f64).abs() < 1e-9);
            assert!((grid.scaled.rows()[k] - (TOP + k as u32 * SQUARE) as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn test_piece_rows_do_not_match() {
        let image = populated_board_frame();
        let max_len = image.height() / SQUARES as u32;
        assert!(exact().scan(row_pixels(&image, 120), max_len).is_none());
        assert!(exact().scan(col_pixels(&image, 100), max_len).is_none());
        assert!(exact().scan(col_pixels(&image, 129), max_len).is_none());
        let clean = exact().scan(col_pixels(&image, 130), max_len).expect("clean column");
        assert_eq!(clean.edge, TOP as f64);
    }

    #[test]
    fn test_boundaries_strictly_increasing_and_even() {
        let frame = Frame::new(board_frame(), 1.5);
        let grid = CheckerPatternLocator::default().locate(&frame).expect("board not found");
        for line in [grid.scaled.cols(), grid.scaled.rows(), grid.screen.cols(), grid.screen.rows()] {
            let size = line[1] - line[0];
            assert!(size > 0.0);
            for pair in line.windows(2) {
                assert!(pair[1] > pair[0]);
                assert!((pair[1] - pair[0] - size).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_correction_shrinks_board() {
        let frame = Frame::new(board_frame(), 1.0);
        let grid = CheckerPatternLocator::default().locate(&frame).unwrap();
        let cols = grid.scaled.cols();
        assert!((cols[8] - cols[0] - 319.0).abs() < 1e-9);
    }

    #[test]
    fn test_blank_frame_not_found() {
        let frame = Frame::new(GrayImage::from_pixel(640, 480, image::Luma([90])), 1.0);
        assert!(CheckerPatternLocator::default().locate(&frame).is_none());
    }

    #[test]
    fn test_screen_grid_on_offset_hidpi_monitor() {
        // second monitor to the right of a 1920-wide one, frame at half resolution
        let frame = Frame::new(board_frame(), 2.0).with_origin(1920.0, 100.0);
        let grid = exact().locate(&frame).expect("board not found");

        assert!((grid.scaled.cols()[0] - LEFT as f64).abs() < 1e-9);
        assert!((grid.screen.cols()[0] - (1920.0 + 2.0 * LEFT as f64)).abs() < 1e-9);
        assert!((grid.screen.rows()[0] - (100.0 + 2.0 * TOP as f64)).abs() < 1e-9);
        assert!((grid.screen.cols()[8] - grid.screen.cols()[0] - 16.0 * SQUARE as f64).abs() < 1e-9);

        let (x, y) = grid.screen.cell_center(Square::new(0, 0));
        let (ex, ey) = (1920.0 + 2.0 * (LEFT + SQUARE / 2) as f64, 100.0 + 2.0 * (TOP + SQUARE / 2) as f64);
        assert!((x - ex).abs() < 1e-9 && (y - ey).abs() < 1e-9);
    }

    #[test]
    fn test_cell_center() {
        let grid = GridGeometry::from_origin(100.0, 50.0, 10.0);
        assert_eq!(grid.cell_center(Square::new(0, 0)), (105.0, 55.0));
        assert_eq!(grid.cell_center(Square::new(7, 3)), (175.0, 85.0));
    }
}
