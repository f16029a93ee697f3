pub mod anchors;
pub mod boxes;
pub mod classification;
pub mod config;
pub mod debug;
pub mod error;
pub mod grid;
pub mod localization;
pub mod slots;
pub mod targets;
pub mod tensor_ops;

pub use config::{AnchorTemplate, GridShape, TargetConfig};
pub use error::TargetError;
pub use targets::{TargetBatch, TargetBuilder, build_target_batch, build_targets};
pub use tensor_ops::sqrt_wh;
