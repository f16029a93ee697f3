use burn::{
    prelude::Backend,
    tensor::{Tensor, s},
};

/// Takes the square root of the w and h channels of a prediction volume.
///
/// Used for a YOLOv1 style loss, where errors on small boxes should weigh
/// more than the same absolute error on large ones. Apply it to predictions
/// and targets alike before computing `Σ scales * (predictions - targets)²`.
///
/// # Arguments
///
/// * `volume` - Tensor of shape `[batch, num_slots, 5 + num_classes]`.
///
/// # Returns
///
/// * `Tensor<B, 3>` - Same shape, `[x, y, sqrt(w), sqrt(h), obj, classes..]`.
pub fn sqrt_wh<B: Backend>(volume: Tensor<B, 3>) -> Tensor<B, 3> {
    let xy = volume.clone().slice(s![.., .., 0..2]);
    let wh = volume.clone().slice(s![.., .., 2..4]);
    let rest = volume.slice(s![.., .., 4..]);

    Tensor::cat(vec![xy, wh.sqrt(), rest], 2)
}

/// Host version of [`sqrt_wh`] over a flat buffer of `vector_len` long rows.
pub fn sqrt_wh_rows(values: &[f64], vector_len: usize) -> Vec<f64> {
    let mut out = values.to_vec();
    for row in out.chunks_exact_mut(vector_len) {
        row[2] = row[2].sqrt();
        row[3] = row[3].sqrt();
    }
    out
}
