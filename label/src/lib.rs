//! Labeled and scored bounding boxes.

use anyhow::{ensure, Result};
use bbox::{Rect, RectNum, TLBR};
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// A bounding box with a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label<R, C>
where
    R: Rect,
{
    pub rect: R,
    pub class: C,
}

impl<T> Label<TLBR<T>, usize>
where
    T: Float,
{
    /// Parse a target row laid out as `[x1, y1, x2, y2, label, ...]`.
    ///
    /// Columns after the label are ignored.
    pub fn try_from_target_row(row: &[T]) -> Result<Self> {
        ensure!(
            row.len() >= 5,
            "a target row must have at least 5 columns, but got {}",
            row.len()
        );
        let rect = TLBR::try_from_xyxy([row[0], row[1], row[2], row[3]])?;

        let class = row[4];
        ensure!(
            class >= T::zero() && class.fract() == T::zero(),
            "the class label must be a non-negative integer"
        );
        let class = class
            .to_usize()
            .ok_or_else(|| anyhow::format_err!("the class label is out of range"))?;

        Ok(Self { rect, class })
    }
}

/// A bounding box with a class and a confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel<R, C>
where
    R: Rect,
{
    pub rect: R,
    pub class: C,
    pub score: f64,
}

impl<R, C> ScoredLabel<R, C>
where
    R: Rect,
{
    pub fn label(&self) -> Label<R, C>
    where
        R: Clone,
        C: Clone,
    {
        Label {
            rect: self.rect.clone(),
            class: self.class.clone(),
        }
    }
}

impl<R, C> From<Label<R, C>> for ScoredLabel<R, C>
where
    R: Rect,
{
    /// Ground truth labels carry a unit score.
    fn from(from: Label<R, C>) -> Self {
        let Label { rect, class } = from;
        Self {
            rect,
            class,
            score: 1.0,
        }
    }
}
