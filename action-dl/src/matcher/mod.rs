//! Assignment of predictions to ground truth objects.

mod targets;
mod uniform;
mod yolo;

pub use targets::*;
pub use uniform::*;
pub use yolo::*;
