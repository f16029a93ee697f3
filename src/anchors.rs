use crate::boxes::{CenterBox, compute_iou};
use crate::config::{AnchorTemplate, GridShape};
use crate::error::Result;
use crate::grid::GridCell;

/// The anchor template chosen for a ground truth box at a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorMatch {
    pub anchor: usize,
    pub iou: f64,
}

/// Candidate box of `anchor` placed at the center of `cell`.
pub fn anchor_box(cell: GridCell, grid: GridShape, anchor: &AnchorTemplate) -> CenterBox {
    let (cx, cy) = cell.center(grid);
    CenterBox::new(cx, cy, anchor.width, anchor.height)
}

/// Selects the anchor template that best fits `gt` at `cell`.
///
/// Every template is centered on the cell and compared with `gt` by IoU.
/// The comparison is a strict `>` starting from 0, so the lowest anchor index
/// wins a tie and `None` is returned when no template overlaps the box at all.
/// `None` is not an error, the box simply produces no localization target.
pub fn best_anchor(
    gt: &CenterBox,
    cell: GridCell,
    grid: GridShape,
    anchors: &[AnchorTemplate],
) -> Result<Option<AnchorMatch>> {
    let mut best: Option<AnchorMatch> = None;

    for (i, anchor) in anchors.iter().enumerate() {
        let iou = compute_iou(gt, &anchor_box(cell, grid, anchor))?;

        if iou > best.map_or(0.0, |m| m.iou) {
            best = Some(AnchorMatch { anchor: i, iou });
        }
    }

    Ok(best)
}
