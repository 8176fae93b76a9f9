//! Target assignment, losses and AVA evaluation for spatio-temporal action detectors.

mod common;
pub mod checkpoint;
pub mod collective;
pub mod config;
pub mod dataset;
pub mod evaluator;
pub mod loss;
pub mod matcher;
