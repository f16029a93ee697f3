use crate::error::{Result, TargetError};

/// Number of values describing one ground truth row: `(cx, cy, w, h, class_id)`.
pub const GT_ROW_LEN: usize = 5;

/// An axis aligned box in normalized `cx, cy, w, h` form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterBox {
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
    pub h: f64,
}

/// Box edges, `top` being the smaller y value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl CenterBox {
    pub fn new(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        Self { cx, cy, w, h }
    }

    /// Reads the first four values of a prediction or ground truth vector.
    pub fn from_slice(values: &[f64]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    /// Converts from `cx, cy, w, h` to edge form.
    ///
    /// ```text
    ///    left = cx - w/2     right  = cx + w/2
    ///    top  = cy - h/2     bottom = cy + h/2
    /// ```
    pub fn bounds(&self) -> Bounds {
        Bounds {
            left: self.cx - self.w / 2.0,
            right: self.cx + self.w / 2.0,
            top: self.cy - self.h / 2.0,
            bottom: self.cy + self.h / 2.0,
        }
    }

    /// Rejects boxes the geometry kernel cannot work with.
    pub fn check(&self) -> Result<()> {
        if !(self.cx.is_finite() && self.cy.is_finite() && self.w.is_finite() && self.h.is_finite())
        {
            return Err(TargetError::NonFiniteBox(self.cx, self.cy, self.w, self.h));
        }

        if self.w < 0.0 || self.h < 0.0 {
            return Err(TargetError::NegativeExtent {
                width: self.w,
                height: self.h,
            });
        }

        Ok(())
    }
}

// Returns the edge of `b` if it lies inside the span of `a`, else the
// edge of `a` if it lies inside the span of `b`. `None` means the spans
// do not overlap on this side.
fn inner_edge(a_edge: f64, a_span: (f64, f64), b_edge: f64, b_span: (f64, f64)) -> Option<f64> {
    if a_span.0 <= b_edge && b_edge <= a_span.1 {
        Some(b_edge)
    } else if b_span.0 <= a_edge && a_edge <= b_span.1 {
        Some(a_edge)
    } else {
        None
    }
}

/// Computes the Intersection over Union (IoU) of two boxes in `cx, cy, w, h` form.
///
/// Each of the four edges of the intersection is resolved on its own: the
/// left edge of the overlap is whichever left edge lies inside the other
/// box's horizontal span, and the same for right, top and bottom. If any edge
/// cannot be resolved the boxes do not overlap on that axis and the
/// intersection is 0.
///
/// ```text
///   ┌──────────┐
///   │  a   ┌───┼──────┐
///   │      │ ∩ │      │      IoU = ∩ / (a + b - ∩)
///   └──────┼───┘  b   │
///          └──────────┘
/// ```
///
/// # Returns
///
/// A value in `[0, 1]`. Two zero area boxes have an empty union and give 0.
///
/// # Errors
///
/// [`TargetError::NegativeExtent`] if either box has a negative width or
/// height, [`TargetError::NonFiniteBox`] for NaN or infinite coordinates.
pub fn compute_iou(a: &CenterBox, b: &CenterBox) -> Result<f64> {
    a.check()?;
    b.check()?;

    let ab = a.bounds();
    let bb = b.bounds();

    let x_span_a = (ab.left, ab.right);
    let x_span_b = (bb.left, bb.right);
    let y_span_a = (ab.top, ab.bottom);
    let y_span_b = (bb.top, bb.bottom);

    let left = inner_edge(ab.left, x_span_a, bb.left, x_span_b);
    let right = inner_edge(ab.right, x_span_a, bb.right, x_span_b);
    let top = inner_edge(ab.top, y_span_a, bb.top, y_span_b);
    let bottom = inner_edge(ab.bottom, y_span_a, bb.bottom, y_span_b);

    let intersection = match (left, right, top, bottom) {
        (Some(left), Some(right), Some(top), Some(bottom)) => {
            ((right - left) * (bottom - top)).max(0.0)
        }
        _ => 0.0,
    };

    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return Ok(0.0);
    }

    Ok((intersection / union).clamp(0.0, 1.0))
}

/// One labelled ground truth box. `class_id` is 1 based, 0 is padding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundTruthBox {
    pub bbox: CenterBox,
    pub class_id: usize,
}

impl GroundTruthBox {
    /// Index of the class channel this box trains, `class_id - 1`.
    pub fn class_index(&self) -> usize {
        self.class_id - 1
    }
}

/// Parses a padded ground truth row of `max_boxes * 5` values.
///
/// Entries are read in order up to the first padding entry (`class_id == 0`),
/// anything after it is ignored.
///
/// # Errors
///
/// A class id that is not an integer in `1..=num_classes`, or a box that
/// fails [`CenterBox::check`].
pub fn parse_ground_truth(row: &[f64], num_classes: usize) -> Result<Vec<GroundTruthBox>> {
    let mut boxes = vec![];

    for entry in row.chunks_exact(GT_ROW_LEN) {
        let class_id = entry[4];
        if class_id == 0.0 {
            break;
        }

        if class_id.fract() != 0.0 || class_id < 1.0 || class_id > num_classes as f64 {
            return Err(TargetError::InvalidClassId {
                class_id,
                num_classes,
            });
        }

        let bbox = CenterBox::from_slice(entry);
        bbox.check()?;

        boxes.push(GroundTruthBox {
            bbox,
            class_id: class_id as usize,
        });
    }

    Ok(boxes)
}
