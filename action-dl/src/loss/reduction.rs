use crate::common::*;
use ndarray::{Array, Dimension};

/// The reduction applied on element-wise losses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    None,
    Sum,
    Mean,
}

impl Reduction {
    /// Reduce an element-wise loss. The mean of an empty loss is zero.
    pub fn apply<D>(self, loss: Array<f64, D>) -> LossValue<D>
    where
        D: Dimension,
    {
        match self {
            Self::None => LossValue::Elementwise(loss),
            Self::Sum => LossValue::Scalar(loss.sum()),
            Self::Mean => {
                if loss.is_empty() {
                    LossValue::Scalar(0.0)
                } else {
                    LossValue::Scalar(loss.sum() / loss.len() as f64)
                }
            }
        }
    }
}

/// A loss value produced by a loss function.
#[derive(Debug, Clone, PartialEq)]
pub enum LossValue<D>
where
    D: Dimension,
{
    Elementwise(Array<f64, D>),
    Scalar(f64),
}

impl<D> LossValue<D>
where
    D: Dimension,
{
    /// The scalar value, or the sum of element-wise values.
    pub fn total(&self) -> f64 {
        match self {
            Self::Elementwise(loss) => loss.sum(),
            Self::Scalar(loss) => *loss,
        }
    }

    pub fn scalar(&self) -> Option<f64> {
        match *self {
            Self::Scalar(loss) => Some(loss),
            Self::Elementwise(_) => None,
        }
    }

    pub fn into_elementwise(self) -> Option<Array<f64, D>> {
        match self {
            Self::Elementwise(loss) => Some(loss),
            Self::Scalar(_) => None,
        }
    }
}
