use std::path::Path;

use burn::{
    config::Config,
    prelude::Backend,
    tensor::{Tensor, TensorData},
};
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::boxes::{GT_ROW_LEN, parse_ground_truth};
use crate::classification::build_class_targets;
use crate::config::{AnchorTemplate, TargetConfig};
use crate::error::{Result, TargetError};
use crate::localization::{XYWHO_LEN, build_xywho_targets};
use crate::slots::SlotArray;

/// Targets and scales of a whole batch on the host.
///
/// Both buffers are contiguous `batch x num_slots x (5 + num_classes)`. Values
/// are kept in f64 and only narrowed to the backend float type when moved
/// back onto a device.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetBatch {
    pub targets: Vec<f64>,
    pub scales: Vec<f64>,
    pub shape: [usize; 3],
}

impl TargetBatch {
    pub fn batch_size(&self) -> usize {
        self.shape[0]
    }

    pub fn num_slots(&self) -> usize {
        self.shape[1]
    }

    pub fn vector_len(&self) -> usize {
        self.shape[2]
    }

    /// Target vector of one slot of one sample.
    pub fn target(&self, sample: usize, slot: usize) -> &[f64] {
        &self.targets[self.offset(sample, slot)..self.offset(sample, slot) + self.vector_len()]
    }

    /// Scale vector of one slot of one sample.
    pub fn scale(&self, sample: usize, slot: usize) -> &[f64] {
        &self.scales[self.offset(sample, slot)..self.offset(sample, slot) + self.vector_len()]
    }

    fn offset(&self, sample: usize, slot: usize) -> usize {
        (sample * self.num_slots() + slot) * self.vector_len()
    }

    /// Moves both buffers onto `device` as `[batch, slots, 5 + num_classes]` tensors
    /// of the backend float element type.
    pub fn into_tensors<B: Backend>(self, device: &B::Device) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let to_device = |values: Vec<f64>| {
            let data = TensorData::new(values, self.shape).convert::<B::FloatElem>();
            Tensor::<B, 3>::from_data(data, device)
        };
        (to_device(self.targets), to_device(self.scales))
    }
}

/// Builds target and scale vectors of a single sample.
///
/// Localization and classification targets are computed independently and
/// then joined slot by slot into `[x, y, w, h, obj, class_1 .. class_K]`.
pub fn build_sample_targets(
    predictions: &SlotArray,
    ground_truth: &[f64],
    config: &TargetConfig,
) -> Result<(SlotArray, SlotArray)> {
    let num_classes = predictions.features() - XYWHO_LEN;
    let boxes = parse_ground_truth(ground_truth, num_classes)?;

    trace!("sample with {} ground truth boxes", boxes.len());

    let (xywho_target, xywho_scale) = build_xywho_targets(&boxes, predictions, config)?;
    let (cls_target, cls_scale) = build_class_targets(&boxes, num_classes, config);

    Ok((
        SlotArray::concat(&xywho_target, &cls_target),
        SlotArray::concat(&xywho_scale, &cls_scale),
    ))
}

/// Host version of [`build_targets`] over flat row-major buffers.
///
/// # Arguments
///
/// * `predictions` - `batch x num_slots x (5 + num_classes)` raw network output.
/// * `pred_shape` - Shape of `predictions`.
/// * `ground_truth` - `batch x (5 * max_boxes_per_image)` padded boxes.
/// * `config` - Target configuration, validated before use.
///
/// # Errors
///
/// Any shape mismatch, or the first precondition failure of any sample. No
/// partial result is returned.
pub fn build_target_batch(
    predictions: &[f64],
    pred_shape: [usize; 3],
    ground_truth: &[f64],
    config: &TargetConfig,
) -> Result<TargetBatch> {
    config.validate()?;

    let [batch_size, num_slots, vector_len] = pred_shape;

    if vector_len <= XYWHO_LEN {
        return Err(TargetError::VectorTooShort(vector_len));
    }

    if num_slots != config.num_slots() {
        return Err(TargetError::SlotCountMismatch {
            expected: config.num_slots(),
            actual: num_slots,
        });
    }

    let sample_len = num_slots * vector_len;
    if predictions.len() != batch_size * sample_len {
        return Err(TargetError::TensorData(format!(
            "prediction buffer has {} values, shape {:?} needs {}",
            predictions.len(),
            pred_shape,
            batch_size * sample_len
        )));
    }

    let gt_row_len = GT_ROW_LEN * config.max_boxes_per_image;
    if ground_truth.len() % gt_row_len != 0 {
        return Err(TargetError::GroundTruthLength {
            expected: gt_row_len,
            actual: ground_truth.len(),
        });
    }

    let gt_batch = ground_truth.len() / gt_row_len;
    if gt_batch != batch_size {
        return Err(TargetError::BatchMismatch {
            predictions: batch_size,
            ground_truth: gt_batch,
        });
    }

    debug!(
        batch_size,
        num_slots,
        num_classes = vector_len - XYWHO_LEN,
        "building training targets"
    );

    // Samples are independent, the per-sample box order is kept inside each task.
    let samples = predictions
        .par_chunks_exact(sample_len)
        .zip(ground_truth.par_chunks_exact(gt_row_len))
        .map(|(pred, gt)| {
            let pred = SlotArray::from_vec(pred.to_vec(), num_slots, vector_len);
            build_sample_targets(&pred, gt, config)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut targets = Vec::with_capacity(batch_size * sample_len);
    let mut scales = Vec::with_capacity(batch_size * sample_len);

    for (target, scale) in samples.iter() {
        targets.extend_from_slice(target.as_slice());
        scales.extend_from_slice(scale.as_slice());
    }

    Ok(TargetBatch {
        targets,
        scales,
        shape: pred_shape,
    })
}

/// Computes training targets and loss scales for a batch.
///
/// # Arguments
///
/// * `predictions` - Raw detector output `[batch, num_slots, 5 + num_classes]`.
/// * `ground_truth` - Padded boxes `[batch, 5 * max_boxes_per_image]`, rows
///   `(cx, cy, w, h, class_id)` with `class_id == 0` as padding.
/// * `config` - Target configuration, validated before use.
///
/// # Returns
///
/// `(targets, scales)`, both shaped like `predictions` and placed on the same
/// device. The loss is `Σ scales * (predictions - targets)²`.
pub fn build_targets<B: Backend>(
    predictions: Tensor<B, 3>,
    ground_truth: Tensor<B, 2>,
    config: &TargetConfig,
) -> Result<(Tensor<B, 3>, Tensor<B, 3>)> {
    let device = predictions.device();
    let pred_shape = predictions.dims();
    let [gt_batch, gt_row_len] = ground_truth.dims();

    let expected_row = GT_ROW_LEN * config.max_boxes_per_image;
    if gt_row_len != expected_row {
        return Err(TargetError::GroundTruthLength {
            expected: expected_row,
            actual: gt_row_len,
        });
    }

    if gt_batch != pred_shape[0] {
        return Err(TargetError::BatchMismatch {
            predictions: pred_shape[0],
            ground_truth: gt_batch,
        });
    }

    let predictions = tensor_to_vec(predictions)?;
    let ground_truth = tensor_to_vec(ground_truth)?;

    let batch = build_target_batch(&predictions, pred_shape, &ground_truth, config)?;

    Ok(batch.into_tensors::<B>(&device))
}

// Widening to f64 is exact for both f32 and f64 backends.
fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f64>> {
    tensor
        .into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .map_err(|err| TargetError::TensorData(format!("{err:?}")))
}

/// Owns a validated [`TargetConfig`] and builds targets with it.
///
/// Setters re-validate and leave the previous configuration untouched when
/// the new value is rejected.
#[derive(Debug, Clone)]
pub struct TargetBuilder {
    config: TargetConfig,
}

impl TargetBuilder {
    pub fn new(config: TargetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Restores a builder from a configuration saved with [`Config::save`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config =
            TargetConfig::load(path).map_err(|err| TargetError::Config(err.to_string()))?;
        Self::new(config)
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.config
            .save(path)
            .map_err(|err| TargetError::Config(err.to_string()))
    }

    pub fn set_lambda_coord(&mut self, value: f64) -> Result<()> {
        self.replace(self.config.clone().with_lambda_coord(value))
    }

    pub fn set_lambda_no_obj(&mut self, value: f64) -> Result<()> {
        self.replace(self.config.clone().with_lambda_no_obj(value))
    }

    pub fn set_anchors(&mut self, anchors: Vec<AnchorTemplate>) -> Result<()> {
        let mut config = self.config.clone();
        config.anchors = anchors;
        self.replace(config)
    }

    fn replace(&mut self, config: TargetConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn build<B: Backend>(
        &self,
        predictions: Tensor<B, 3>,
        ground_truth: Tensor<B, 2>,
    ) -> Result<(Tensor<B, 3>, Tensor<B, 3>)> {
        build_targets(predictions, ground_truth, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::assert_approx_eq;
    use crate::grid::GridCell;
    use crate::localization::OBJ;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::DType;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    type B = NdArray<f32>;

    const NUM_CLASSES: usize = 3;
    const VEC_LEN: usize = 5 + NUM_CLASSES;

    // 3x3 grid, 2 anchors, 4 boxes per image
    fn config() -> TargetConfig {
        TargetConfig::new(
            3,
            3,
            vec![AnchorTemplate::new(0.1, 0.1), AnchorTemplate::new(0.3, 0.3)],
            4,
        )
    }

    fn padded(boxes: &[[f64; 5]], max_boxes: usize) -> Vec<f64> {
        let mut row: Vec<f64> = boxes.iter().flatten().copied().collect();
        row.resize(max_boxes * 5, 0.0);
        row
    }

    fn uniform_predictions(config: &TargetConfig, batch: usize, xywh: [f64; 4]) -> Vec<f64> {
        let mut slot = vec![0.0; VEC_LEN];
        slot[..4].copy_from_slice(&xywh);
        slot.repeat(batch * config.num_slots())
    }

    #[test]
    fn tensor_round_trip_keeps_shape_and_device() {
        let device = &NdArrayDevice::default();
        let config = config();

        let preds = uniform_predictions(&config, 2, [0.5, 0.5, 0.3, 0.3]);
        let predictions = Tensor::<B, 3>::from_data(
            TensorData::new(preds, [2, config.num_slots(), VEC_LEN]),
            device,
        );

        let mut gt = padded(&[[0.5, 0.5, 0.3, 0.3, 2.0]], 4);
        gt.extend(padded(&[], 4));
        let ground_truth = Tensor::<B, 2>::from_data(TensorData::new(gt, [2, 20]), device);

        let (targets, scales) = build_targets(predictions, ground_truth, &config).unwrap();

        assert_eq!(targets.dims(), [2, 18, VEC_LEN]);
        assert_eq!(scales.dims(), [2, 18, VEC_LEN]);

        let targets = targets.into_data().to_vec::<f32>().unwrap();
        let scales = scales.into_data().to_vec::<f32>().unwrap();

        // center cell (1, 1), anchor 1
        let slot = GridCell::new(1, 1).slot(config.grid(), 2, 1);
        let t = &targets[slot * VEC_LEN..(slot + 1) * VEC_LEN];
        let s = &scales[slot * VEC_LEN..(slot + 1) * VEC_LEN];

        assert_eq!(&t[..4], &[0.5, 0.5, 0.3, 0.3]);
        assert_approx_eq(&t[OBJ], &1.0, 1e-6);
        assert_eq!(&t[5..], &[0.0, 1.0, 0.0]);
        assert_eq!(s, &[5.0, 5.0, 5.0, 5.0, 1.0, 1.0, 1.0, 1.0]);

        // second sample is empty
        let second = &scales[18 * VEC_LEN..];
        for row in second.chunks_exact(VEC_LEN) {
            assert_eq!(row, &[0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0]);
        }
        assert!(targets[18 * VEC_LEN..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn f64_backend_keeps_full_precision() {
        type B64 = NdArray<f64>;

        let device = &NdArrayDevice::default();
        let config = config();
        let cx = 0.1234567890123;

        let preds = uniform_predictions(&config, 1, [cx, 0.5, 0.3, 0.3]);
        let predictions = Tensor::<B64, 3>::from_data(
            TensorData::new(preds, [1, config.num_slots(), VEC_LEN]),
            device,
        );
        let gt = padded(&[[cx, 0.5, 0.3, 0.3, 1.0]], 4);
        let ground_truth = Tensor::<B64, 2>::from_data(TensorData::new(gt, [1, 20]), device);

        let (targets, _) = build_targets(predictions, ground_truth, &config).unwrap();

        let data = targets.into_data();
        assert_eq!(data.dtype, DType::F64);
        let targets = data.to_vec::<f64>().unwrap();

        // cell (1, 0), anchor 1
        let slot = GridCell::new(1, 0).slot(config.grid(), 2, 1);
        let t = &targets[slot * VEC_LEN..(slot + 1) * VEC_LEN];
        assert_eq!(t[0], cx);
        assert_eq!(&t[1..4], &[0.5, 0.3, 0.3]);
        assert_approx_eq(&t[OBJ], &1.0, 1e-12);
    }

    #[test]
    fn exact_anchor_fit_claims_one_slot_per_cell() {
        let config = config();
        let preds = uniform_predictions(&config, 1, [0.5, 0.5, 0.3, 0.3]);
        let gt = padded(&[[0.5, 0.5, 0.3, 0.3, 1.0]], 4);

        let batch = build_target_batch(&preds, [1, 18, VEC_LEN], &gt, &config).unwrap();

        let cell = GridCell::new(1, 1);
        assert_eq!(batch.scale(0, cell.slot(config.grid(), 2, 1))[OBJ], 1.0);
        assert_eq!(batch.scale(0, cell.slot(config.grid(), 2, 0))[OBJ], 0.0);

        // class targets cover the whole footprint, x/y in [0.35, 0.65] * 3 -> cell 1 only
        assert_eq!(&batch.target(0, cell.slot(config.grid(), 2, 0))[5..], &[1.0, 0.0, 0.0]);
        assert_eq!(&batch.scale(0, cell.slot(config.grid(), 2, 0))[5..], &[1.0, 1.0, 1.0]);
        assert_eq!(&batch.scale(0, 0)[5..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn shape_preconditions() {
        let config = config();
        let gt = padded(&[], 4);

        let short = vec![0.0; 18 * 5];
        assert_eq!(
            build_target_batch(&short, [1, 18, 5], &gt, &config),
            Err(TargetError::VectorTooShort(5))
        );

        let preds = uniform_predictions(&config, 1, [0.5, 0.5, 0.3, 0.3]);
        assert_eq!(
            build_target_batch(&preds[..17 * VEC_LEN], [1, 17, VEC_LEN], &gt, &config),
            Err(TargetError::SlotCountMismatch {
                expected: 18,
                actual: 17
            })
        );

        assert_eq!(
            build_target_batch(&preds, [1, 18, VEC_LEN], &gt[..19], &config),
            Err(TargetError::GroundTruthLength {
                expected: 20,
                actual: 19
            })
        );

        let mut two = gt.clone();
        two.extend(padded(&[], 4));
        assert_eq!(
            build_target_batch(&preds, [1, 18, VEC_LEN], &two, &config),
            Err(TargetError::BatchMismatch {
                predictions: 1,
                ground_truth: 2
            })
        );
    }

    #[test]
    fn tensor_ground_truth_width_is_checked() {
        let device = &NdArrayDevice::default();
        let config = config();

        let predictions = Tensor::<B, 3>::zeros([1, 18, VEC_LEN], device);
        let ground_truth = Tensor::<B, 2>::zeros([1, 15], device);

        assert_eq!(
            build_targets(predictions, ground_truth, &config).err(),
            Some(TargetError::GroundTruthLength {
                expected: 20,
                actual: 15
            })
        );
    }

    #[test]
    fn one_bad_sample_fails_the_batch() {
        let config = config();
        let preds = uniform_predictions(&config, 2, [0.5, 0.5, 0.3, 0.3]);

        let mut gt = padded(&[[0.5, 0.5, 0.3, 0.3, 1.0]], 4);
        gt.extend(padded(&[[0.5, 0.5, -0.3, 0.3, 1.0]], 4));

        assert!(matches!(
            build_target_batch(&preds, [2, 18, VEC_LEN], &gt, &config),
            Err(TargetError::NegativeExtent { .. })
        ));
    }

    #[test]
    fn class_id_beyond_prediction_classes_is_rejected() {
        let config = config();
        let preds = uniform_predictions(&config, 1, [0.5, 0.5, 0.3, 0.3]);
        let gt = padded(&[[0.5, 0.5, 0.3, 0.3, 4.0]], 4);

        assert!(matches!(
            build_target_batch(&preds, [1, 18, VEC_LEN], &gt, &config),
            Err(TargetError::InvalidClassId { .. })
        ));
    }

    #[test]
    fn builder_setters_validate() {
        let mut builder = TargetBuilder::new(config()).unwrap();

        builder.set_lambda_coord(2.0).unwrap();
        assert_eq!(builder.config().lambda_coord, 2.0);

        builder.set_lambda_no_obj(0.2).unwrap();
        assert_eq!(
            builder.set_lambda_no_obj(1.1),
            Err(TargetError::NoObjWeightTooLarge(1.1))
        );
        assert_eq!(builder.config().lambda_no_obj, 0.2);

        assert_eq!(builder.set_anchors(vec![]), Err(TargetError::NoAnchors));
        assert_eq!(builder.config().num_anchors(), 2);

        assert!(TargetBuilder::new(config().with_lambda_no_obj(2.0)).is_err());
    }

    #[test]
    fn builder_restores_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");

        let mut builder = TargetBuilder::new(config()).unwrap();
        builder.set_lambda_no_obj(0.75).unwrap();
        builder.save(&path).unwrap();

        let restored = TargetBuilder::from_file(&path).unwrap();
        assert_eq!(restored.config().lambda_no_obj, 0.75);
        assert_eq!(restored.config().anchors, builder.config().anchors);
    }

    fn random_batch(rng: &mut StdRng, config: &TargetConfig, batch: usize) -> (Vec<f64>, Vec<f64>) {
        let preds = (0..batch * config.num_slots())
            .flat_map(|_| {
                let mut v = vec![
                    rng.random_range(0.0..1.0),
                    rng.random_range(0.0..1.0),
                    rng.random_range(0.0..0.6),
                    rng.random_range(0.0..0.6),
                ];
                v.extend((0..VEC_LEN - 4).map(|_| rng.random_range(-1.0..1.0)));
                v
            })
            .collect::<Vec<f64>>();

        let gt = (0..batch)
            .flat_map(|_| {
                let count = rng.random_range(0..=config.max_boxes_per_image);
                let boxes = (0..count)
                    .map(|_| {
                        [
                            rng.random_range(0.0..=1.0),
                            rng.random_range(0.0..=1.0),
                            rng.random_range(0.0..0.8),
                            rng.random_range(0.0..0.8),
                            rng.random_range(1..=NUM_CLASSES) as f64,
                        ]
                    })
                    .collect::<Vec<_>>();
                padded(&boxes, config.max_boxes_per_image)
            })
            .collect::<Vec<f64>>();

        (preds, gt)
    }

    #[test]
    fn random_batches_keep_invariants() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        let config = config();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..50 {
            let (preds, gt) = random_batch(&mut rng, &config, 4);
            let batch = build_target_batch(&preds, [4, 18, VEC_LEN], &gt, &config).unwrap();

            assert!(batch.targets.iter().all(|v| !v.is_nan()));
            assert!(batch.scales.iter().all(|v| !v.is_nan()));

            for sample in 0..4 {
                for slot in 0..18 {
                    let obj_scale = batch.scale(sample, slot)[OBJ];
                    assert!([0.0, 0.5, 1.0].contains(&obj_scale), "{obj_scale}");

                    let cls = &batch.target(sample, slot)[5..];
                    let sum: f64 = cls.iter().sum();
                    assert!(sum <= 1.0 + 1e-5);

                    let cls_scale = &batch.scale(sample, slot)[5..];
                    assert!(cls_scale.iter().all(|s| *s == cls_scale[0]));
                    assert!(cls_scale[0] == 0.0 || cls_scale[0] == 1.0);
                }
            }
        }
    }

    #[test]
    fn repeated_calls_are_bit_identical() {
        let config = config();
        let mut rng = StdRng::seed_from_u64(5);
        let (preds, gt) = random_batch(&mut rng, &config, 8);

        let first = build_target_batch(&preds, [8, 18, VEC_LEN], &gt, &config).unwrap();
        let second = build_target_batch(&preds, [8, 18, VEC_LEN], &gt, &config).unwrap();

        let bits = |v: &[f64]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first.targets), bits(&second.targets));
        assert_eq!(bits(&first.scales), bits(&second.scales));
    }
}
