use super::{
    cross_entropy::log_softmax,
    reduction::{LossValue, Reduction},
};
use crate::common::*;
use ndarray::Ix1;

/// Softmax focal loss with per-class balancing weights.
#[derive(Debug)]
pub struct SoftmaxFocalLossInit {
    pub num_classes: usize,
    /// Per-class weights. Defaults to ones.
    pub alpha: Option<Array1<f64>>,
    pub gamma: f64,
    pub reduction: Reduction,
}

impl SoftmaxFocalLossInit {
    pub fn default(num_classes: usize, reduction: Reduction) -> Self {
        Self {
            num_classes,
            alpha: None,
            gamma: 2.0,
            reduction,
        }
    }

    pub fn build(self) -> Result<SoftmaxFocalLoss> {
        let Self {
            num_classes,
            alpha,
            gamma,
            reduction,
        } = self;

        ensure!(num_classes > 0, "num_classes must be positive");
        ensure!(gamma >= 0.0, "gamma must be non-negative");
        let alpha = alpha.unwrap_or_else(|| Array1::ones(num_classes));
        ensure!(
            alpha.len() == num_classes,
            "expect {} alpha values, but get {}",
            num_classes,
            alpha.len()
        );

        Ok(SoftmaxFocalLoss {
            alpha,
            gamma,
            reduction,
        })
    }
}

#[derive(Debug)]
pub struct SoftmaxFocalLoss {
    alpha: Array1<f64>,
    gamma: f64,
    reduction: Reduction,
}

impl SoftmaxFocalLoss {
    /// Compute `-alpha[t] (1 - p_t)^gamma log p_t` per row.
    pub fn forward(&self, input: ArrayView2<f64>, target: &[usize]) -> Result<LossValue<Ix1>> {
        let (batch_size, num_classes) = input.dim();
        ensure!(
            num_classes == self.alpha.len(),
            "expect {} classes, but get {}",
            self.alpha.len(),
            num_classes
        );
        ensure!(
            target.len() == batch_size,
            "expect {} targets, but get {}",
            batch_size,
            target.len()
        );
        ensure!(
            target.iter().all(|&class| class < num_classes),
            "target values must be in range of [0, {})",
            num_classes
        );

        let loss: Array1<f64> = input
            .outer_iter()
            .zip(target)
            .map(|(logits, &class)| {
                let log_p = log_softmax(logits)[class];
                let p = log_p.exp();
                -self.alpha[class] * (1.0 - p).powf(self.gamma) * log_p
            })
            .collect();

        Ok(self.reduction.apply(loss))
    }
}
