use std::ops::RangeInclusive;

use crate::boxes::CenterBox;
use crate::config::GridShape;

/// A cell of the output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
}

impl GridCell {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Cell containing the normalized point `(cx, cy)`.
    ///
    /// A center exactly on the right or bottom image edge (`cx == 1.0`) would
    /// floor to one past the last cell, so the index is clamped back inside
    /// the grid.
    pub fn containing(cx: f64, cy: f64, grid: GridShape) -> Self {
        Self {
            row: scaled_index(cy, grid.rows),
            col: scaled_index(cx, grid.cols),
        }
    }

    /// Center of this cell in normalized image coordinates.
    pub fn center(&self, grid: GridShape) -> (f64, f64) {
        (
            (self.col as f64 + 0.5) / grid.cols as f64,
            (self.row as f64 + 0.5) / grid.rows as f64,
        )
    }

    /// Index of the first slot of this cell, anchors of one cell are contiguous.
    pub fn first_slot(&self, grid: GridShape, num_anchors: usize) -> usize {
        (self.row * grid.cols + self.col) * num_anchors
    }

    /// Flattened prediction slot index of `(cell, anchor)`.
    ///
    /// ```text
    /// slot = row * cols * anchors + col * anchors + anchor
    /// ```
    pub fn slot(&self, grid: GridShape, num_anchors: usize, anchor: usize) -> usize {
        self.first_slot(grid, num_anchors) + anchor
    }
}

fn scaled_index(value: f64, cells: usize) -> usize {
    let max = cells.saturating_sub(1) as f64;
    (value * cells as f64).floor().clamp(0.0, max) as usize
}

/// Rectangle of grid cells covered by a box, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footprint {
    pub cols: RangeInclusive<i64>,
    pub rows: RangeInclusive<i64>,
}

impl Footprint {
    /// Cells physically under `bbox`.
    ///
    /// ```text
    /// x_min = floor(max((cx - w/2) * cols, 0))
    /// x_max = floor(min((cx + w/2) * cols, cols - 1))
    /// ```
    ///
    /// and the same for y with the box height and grid rows. A box lying
    /// completely outside the image yields an empty range.
    pub fn of(bbox: &CenterBox, grid: GridShape) -> Self {
        let b = bbox.bounds();
        Self {
            cols: edge_range(b.left, b.right, grid.cols),
            rows: edge_range(b.top, b.bottom, grid.rows),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty() || self.rows.is_empty()
    }

    /// Iterates the covered cells row by row.
    pub fn cells(&self) -> impl Iterator<Item = GridCell> + '_ {
        self.rows.clone().flat_map(move |row| {
            self.cols
                .clone()
                .map(move |col| GridCell::new(row as usize, col as usize))
        })
    }
}

fn edge_range(low: f64, high: f64, cells: usize) -> RangeInclusive<i64> {
    let first = (low * cells as f64).max(0.0).floor() as i64;
    let last = (high * cells as f64).min(cells as f64 - 1.0).floor() as i64;
    first..=last
}
