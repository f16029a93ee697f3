use thiserror::Error;

/// Precondition failures raised while building training targets.
///
/// Every variant names the invariant that was violated. A failure in any
/// sample aborts the whole batch, no partial targets are ever returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TargetError {
    #[error("prediction vector too short: length {0} must be > 5 (x,y,w,h,obj,cls...)")]
    VectorTooShort(usize),

    #[error("number of prediction vectors {actual} does not match grid slots {expected}")]
    SlotCountMismatch { expected: usize, actual: usize },

    #[error("ground truth row length {actual} does not match 5 * max boxes = {expected}")]
    GroundTruthLength { expected: usize, actual: usize },

    #[error("batch size mismatch: {predictions} prediction samples, {ground_truth} ground truth samples")]
    BatchMismatch {
        predictions: usize,
        ground_truth: usize,
    },

    #[error("negative box width or height: w = {width}, h = {height}")]
    NegativeExtent { width: f64, height: f64 },

    #[error("non-finite box coordinate in ({0}, {1}, {2}, {3})")]
    NonFiniteBox(f64, f64, f64, f64),

    #[error("invalid class id {class_id}, expected an integer in 1..={num_classes}")]
    InvalidClassId { class_id: f64, num_classes: usize },

    #[error("objectness weight exceeds 1: lambda_no_obj = {0}")]
    NoObjWeightTooLarge(f64),

    #[error("no anchor templates configured")]
    NoAnchors,

    #[error("grid must have at least one row and one column, got {cols}x{rows}")]
    EmptyGrid { cols: usize, rows: usize },

    #[error("grid downsample factor must be at least 1")]
    ZeroDownsample,

    #[error("max boxes per image must be at least 1")]
    NoBoxCapacity,

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TargetError>;
