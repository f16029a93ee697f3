use tracing::trace;

use crate::anchors::best_anchor;
use crate::boxes::{CenterBox, GroundTruthBox, compute_iou};
use crate::config::TargetConfig;
use crate::error::Result;
use crate::grid::GridCell;
use crate::slots::SlotArray;

/// x, y, w, h, objectness
pub const XYWHO_LEN: usize = 5;
pub const OBJ: usize = 4;

/// Builds the x, y, w, h and objectness targets of one sample.
///
/// Every slot starts with a zero target and the scale
/// `[0, 0, 0, 0, lambda_no_obj]`, i.e. no coordinate loss and a small penalty
/// for predicting an object. Each ground truth box then, in list order:
///
/// 1. picks the grid cell containing its center,
/// 2. picks the best fitting anchor at that cell (boxes without any anchor
///    overlap are skipped),
/// 3. measures the IoU between itself and the box currently predicted at
///    that slot,
/// 4. claims the slot if that IoU beats the objectness target already stored
///    there. A claimed slot gets the box as target, the IoU as objectness
///    target, `lambda_coord` on the coordinates and 1 on objectness. All the
///    other anchors of the cell get an objectness scale of 0, they are neither
///    rewarded nor penalized.
///
/// A box that loses the comparison in step 4 is dropped. Because the
/// comparison is strict, the earlier box keeps the slot on an exact tie.
///
/// # Arguments
///
/// * `boxes` - Ground truth of the sample, padding already stripped.
/// * `predictions` - Raw predictions of the sample, `num_slots x (5 + K)`.
/// * `config` - Validated target configuration.
///
/// # Returns
///
/// `(target, scale)`, both `num_slots x 5`.
pub fn build_xywho_targets(
    boxes: &[GroundTruthBox],
    predictions: &SlotArray,
    config: &TargetConfig,
) -> Result<(SlotArray, SlotArray)> {
    let grid = config.grid();
    let num_anchors = config.num_anchors();
    let num_slots = config.num_slots();

    let mut target = SlotArray::zeros(num_slots, XYWHO_LEN);
    let mut scale = SlotArray::filled(num_slots, &[0.0, 0.0, 0.0, 0.0, config.lambda_no_obj]);

    for (i, gt) in boxes.iter().enumerate() {
        let cell = GridCell::containing(gt.bbox.cx, gt.bbox.cy, grid);

        let Some(anchor) = best_anchor(&gt.bbox, cell, grid, &config.anchors)? else {
            trace!("box {i} at {cell:?} matches no anchor");
            continue;
        };

        let slot = cell.slot(grid, num_anchors, anchor.anchor);
        let predicted = CenterBox::from_slice(predictions.row(slot));
        let actual_iou = compute_iou(&gt.bbox, &predicted)?;

        // only take the slot if it is not already held by a better fitting box
        if actual_iou <= target.row(slot)[OBJ] {
            trace!(
                "box {i} dropped, slot {slot} already holds iou {}",
                target.row(slot)[OBJ]
            );
            continue;
        }

        let b = &gt.bbox;
        target
            .row_mut(slot)
            .copy_from_slice(&[b.cx, b.cy, b.w, b.h, actual_iou]);

        let lc = config.lambda_coord;
        scale.row_mut(slot).copy_from_slice(&[lc, lc, lc, lc, 1.0]);

        let first = cell.first_slot(grid, num_anchors);
        for other in first..first + num_anchors {
            if other != slot {
                scale.row_mut(other)[OBJ] = 0.0;
            }
        }
    }

    Ok((target, scale))
}
