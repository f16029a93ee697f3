use crate::boxes::GroundTruthBox;
use crate::config::TargetConfig;
use crate::grid::Footprint;
use crate::slots::SlotArray;

/// Builds the soft class targets of one sample.
///
/// Unlike objectness, class targets do not depend on the prediction or on
/// anchor matching. Every cell under a box's footprint, for all of its
/// anchors, is pushed towards that box's class:
///
/// ```text
///   counts[slot][class]  += 1        for every box covering the slot
///   total                 = Σ counts[slot][..]
///   target[slot][class]   = counts[slot][class] / max(total, 1)
///   scale[slot][..]       = total / max(total, 1)      (1 if covered, else 0)
/// ```
///
/// Overlapping boxes of different classes therefore split the target, e.g.
/// two classes covering the same cell both get 0.5.
///
/// # Returns
///
/// `(target, scale)`, both `num_slots x num_classes`.
pub fn build_class_targets(
    boxes: &[GroundTruthBox],
    num_classes: usize,
    config: &TargetConfig,
) -> (SlotArray, SlotArray) {
    let grid = config.grid();
    let num_anchors = config.num_anchors();

    let mut target = SlotArray::zeros(config.num_slots(), num_classes);

    for gt in boxes.iter() {
        let footprint = Footprint::of(&gt.bbox, grid);

        for cell in footprint.cells() {
            let first = cell.first_slot(grid, num_anchors);
            for slot in first..first + num_anchors {
                target.row_mut(slot)[gt.class_index()] += 1.0;
            }
        }
    }

    let mut scale = SlotArray::zeros(config.num_slots(), num_classes);

    for (counts, weights) in target.rows_mut().zip(scale.rows_mut()) {
        let total: f64 = counts.iter().sum();
        let divisor = total.max(1.0);

        counts.iter_mut().for_each(|c| *c /= divisor);
        weights.fill(total / divisor);
    }

    (target, scale)
}
