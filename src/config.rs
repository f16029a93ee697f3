use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::TargetError;

/// A fixed anchor box shape, stored in normalized image units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorTemplate {
    pub width: f64,
    pub height: f64,
}

impl AnchorTemplate {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl From<(f64, f64)> for AnchorTemplate {
    fn from((width, height): (f64, f64)) -> Self {
        Self { width, height }
    }
}

/// Output grid dimensions of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub cols: usize,
    pub rows: usize,
}

impl GridShape {
    /// Grid of a network that downsamples a `width x height` input by `downsample`.
    ///
    /// Uses integer division, a partial trailing cell is dropped.
    pub fn from_image(
        width: usize,
        height: usize,
        downsample: usize,
    ) -> crate::error::Result<Self> {
        if downsample == 0 {
            return Err(TargetError::ZeroDownsample);
        }

        Ok(Self {
            cols: width / downsample,
            rows: height / downsample,
        })
    }

    pub fn num_cells(&self) -> usize {
        self.cols * self.rows
    }
}

/// Fixed configuration of the target builder.
///
/// Persisted as JSON through [`Config::save`] / [`Config::load`] so that a
/// training run can be resumed with the exact same target assignment.
///
/// `lambda_coord` weights the x, y, w, h channels of responsible slots and
/// `lambda_no_obj` is the objectness penalty applied to slots no object
/// claimed. `lambda_no_obj` must not exceed 1.
#[derive(Config, Debug)]
pub struct TargetConfig {
    pub grid_cols: usize,
    pub grid_rows: usize,
    pub anchors: Vec<AnchorTemplate>,
    pub max_boxes_per_image: usize,
    #[config(default = 5.0)]
    pub lambda_coord: f64,
    #[config(default = 0.5)]
    pub lambda_no_obj: f64,
}

impl TargetConfig {
    pub fn from_grid(grid: GridShape, anchors: Vec<AnchorTemplate>, max_boxes: usize) -> Self {
        Self::new(grid.cols, grid.rows, anchors, max_boxes)
    }

    pub fn grid(&self) -> GridShape {
        GridShape {
            cols: self.grid_cols,
            rows: self.grid_rows,
        }
    }

    pub fn num_anchors(&self) -> usize {
        self.anchors.len()
    }

    /// Number of prediction slots per sample (cells * anchors).
    pub fn num_slots(&self) -> usize {
        self.grid_cols * self.grid_rows * self.anchors.len()
    }

    /// Checks every invariant the target builders rely on.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.lambda_no_obj > 1.0 || self.lambda_no_obj.is_nan() {
            return Err(TargetError::NoObjWeightTooLarge(self.lambda_no_obj));
        }

        if self.grid_cols == 0 || self.grid_rows == 0 {
            return Err(TargetError::EmptyGrid {
                cols: self.grid_cols,
                rows: self.grid_rows,
            });
        }

        if self.anchors.is_empty() {
            return Err(TargetError::NoAnchors);
        }

        for anchor in self.anchors.iter() {
            if !anchor.width.is_finite() || !anchor.height.is_finite() {
                return Err(TargetError::NonFiniteBox(
                    0.0,
                    0.0,
                    anchor.width,
                    anchor.height,
                ));
            }
            if anchor.width < 0.0 || anchor.height < 0.0 {
                return Err(TargetError::NegativeExtent {
                    width: anchor.width,
                    height: anchor.height,
                });
            }
        }

        if self.max_boxes_per_image == 0 {
            return Err(TargetError::NoBoxCapacity);
        }

        Ok(())
    }
}
