//! AVA frame mAP evaluation.

mod accumulator;
pub mod ava;
mod ava_evaluator;
mod model;
pub mod pascal;

pub use accumulator::*;
pub use ava::{AvaLabel, AvaTable, Category, ImageKey};
pub use ava_evaluator::*;
pub use model::*;
pub use pascal::{PascalEvaluator, PascalMetrics};
