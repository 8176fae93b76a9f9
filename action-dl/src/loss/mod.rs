//! Loss functions and the training criteria built on them.

mod ava_focal_loss;
mod bce_with_logits_loss;
mod criterion;
mod cross_entropy;
mod focal_loss;
mod reduction;
mod softmax_focal_loss;
mod uniform_loss;
mod yolo_loss;

pub use ava_focal_loss::*;
pub use bce_with_logits_loss::*;
pub use criterion::*;
pub use cross_entropy::*;
pub use focal_loss::*;
pub use reduction::*;
pub use softmax_focal_loss::*;
pub use uniform_loss::*;
pub use yolo_loss::*;
