use super::{
    bce_with_logits_loss::sigmoid,
    reduction::{LossValue, Reduction},
};
use crate::common::*;
use ndarray::{Ix2, Zip};

/// Focal loss initializer.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FocalLossInit<F>
where
    F: 'static + Fn(ArrayView2<f64>, ArrayView2<f64>) -> Result<Array2<f64>> + Send,
{
    /// The wrapped element-wise loss function.
    #[derivative(Debug = "ignore")]
    pub loss_fn: F,
    /// The gamma coefficient.
    pub gamma: f64,
    /// The alpha coefficient. A negative value disables class balancing.
    pub alpha: f64,
    /// The reduction method applied on output loss.
    pub reduction: Reduction,
}

impl<F> FocalLossInit<F>
where
    F: 'static + Fn(ArrayView2<f64>, ArrayView2<f64>) -> Result<Array2<f64>> + Send,
{
    pub fn default(reduction: Reduction, loss_fn: F) -> Self {
        Self {
            loss_fn,
            gamma: 2.0,
            alpha: 0.25,
            reduction,
        }
    }

    /// Build a focal loss calculator.
    pub fn build(self) -> Result<FocalLoss> {
        let Self {
            loss_fn,
            gamma,
            alpha,
            reduction,
        } = self;

        ensure!(gamma >= 0.0, "gamma must be non-negative");
        ensure!(alpha <= 1.0, "alpha must not exceed 1");

        Ok(FocalLoss {
            loss_fn: Box::new(loss_fn),
            gamma,
            alpha,
            reduction,
        })
    }
}

/// Focal loss calculator.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FocalLoss {
    #[derivative(Debug = "ignore")]
    loss_fn: Box<dyn Fn(ArrayView2<f64>, ArrayView2<f64>) -> Result<Array2<f64>> + Send>,
    gamma: f64,
    alpha: f64,
    reduction: Reduction,
}

impl FocalLoss {
    /// Compute focal loss from logits against a target in range `[0, 1]`.
    pub fn forward(&self, input: ArrayView2<f64>, target: ArrayView2<f64>) -> Result<LossValue<Ix2>> {
        ensure!(
            input.dim() == target.dim(),
            "input and target shape must be equal"
        );
        ensure!(
            target.iter().all(|&value| (0.0..=1.0).contains(&value)),
            "target values must be in range of [0.0, 1.0]"
        );

        let Self {
            ref loss_fn,
            gamma,
            alpha,
            reduction,
        } = *self;

        let mut loss = loss_fn(input, target)?;
        ensure!(
            loss.dim() == target.dim(),
            "the contained loss function must not apply reduction"
        );

        Zip::from(&mut loss)
            .and(&input)
            .and(&target)
            .for_each(|loss, &logit, &target| {
                let prob = sigmoid(logit);
                let p_t = target * prob + (1.0 - target) * (1.0 - prob);
                let modulating_factor = (1.0 - p_t).powf(gamma);
                let alpha_factor = if alpha >= 0.0 {
                    target * alpha + (1.0 - target) * (1.0 - alpha)
                } else {
                    1.0
                };
                *loss *= alpha_factor * modulating_factor;
            });

        Ok(reduction.apply(loss))
    }
}
