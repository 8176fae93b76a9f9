use super::reduction::{LossValue, Reduction};
use crate::common::*;
use ndarray::{Ix2, Zip};

#[derive(Debug)]
pub struct BceWithLogitsLossInit {
    pub weight: Option<Array1<f64>>,
    pub pos_weight: Option<Array1<f64>>,
    pub reduction: Reduction,
}

impl BceWithLogitsLossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self {
            weight: None,
            pos_weight: None,
            reduction,
        }
    }

    pub fn build(self) -> Result<BceWithLogitsLoss> {
        let Self {
            weight,
            pos_weight,
            reduction,
        } = self;

        if let Some(weight) = &weight {
            ensure!(
                weight.iter().all(|&value| value >= 0.0),
                "weight must be non-negative"
            );
        }
        if let Some(pos_weight) = &pos_weight {
            ensure!(
                pos_weight.iter().all(|&value| value >= 0.0),
                "pos_weight must be non-negative"
            );
        }

        Ok(BceWithLogitsLoss {
            weight,
            pos_weight,
            reduction,
        })
    }
}

/// Binary cross entropy on logits, computed without overflow for large logits.
#[derive(Debug)]
pub struct BceWithLogitsLoss {
    weight: Option<Array1<f64>>,
    pos_weight: Option<Array1<f64>>,
    reduction: Reduction,
}

impl BceWithLogitsLoss {
    /// Compute the loss on `[batch_size, num_classes]` logits and targets.
    pub fn forward(&self, input: ArrayView2<f64>, target: ArrayView2<f64>) -> Result<LossValue<Ix2>> {
        let loss = self.elementwise(input, target)?;
        Ok(self.reduction.apply(loss))
    }

    /// Compute the loss without reduction.
    pub fn elementwise(&self, input: ArrayView2<f64>, target: ArrayView2<f64>) -> Result<Array2<f64>> {
        ensure!(
            input.dim() == target.dim(),
            "input and target must have equal shape, but get {:?} and {:?}",
            input.dim(),
            target.dim()
        );
        let (_, num_classes) = input.dim();
        for weight in chain!(&self.weight, &self.pos_weight) {
            ensure!(
                weight.len() == num_classes,
                "expect {} class weights, but get {}",
                num_classes,
                weight.len()
            );
        }

        let mut loss = Array2::zeros(input.dim());
        Zip::indexed(&mut loss)
            .and(&input)
            .and(&target)
            .for_each(|(_, class), loss, &logit, &target| {
                let pos_weight = self
                    .pos_weight
                    .as_ref()
                    .map(|weight| weight[class])
                    .unwrap_or(1.0);
                let weight = self
                    .weight
                    .as_ref()
                    .map(|weight| weight[class])
                    .unwrap_or(1.0);
                *loss = weight * bce_with_logits(logit, target, pos_weight);
            });

        Ok(loss)
    }
}

/// The stable form of `-(w t log σ(x) + (1 - t) log(1 - σ(x)))`.
pub fn bce_with_logits(logit: f64, target: f64, pos_weight: f64) -> f64 {
    // log(1 + exp(-x)) = softplus(-x)
    let softplus_neg = (-logit).max(0.0) + (-logit.abs()).exp().ln_1p();
    (1.0 - target) * logit + (1.0 + (pos_weight - 1.0) * target) * softplus_neg
}

pub fn sigmoid(logit: f64) -> f64 {
    if logit >= 0.0 {
        1.0 / (1.0 + (-logit).exp())
    } else {
        let exp = logit.exp();
        exp / (1.0 + exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn matches_naive_formula() {
        for &logit in &[-3.0, -0.5, 0.0, 0.7, 4.0] {
            for &target in &[0.0, 0.3, 1.0] {
                let prob = 1.0 / (1.0 + f64::exp(-logit));
                let expect = -(target * prob.ln() + (1.0 - target) * (1.0 - prob).ln());
                assert_abs_diff_eq!(bce_with_logits(logit, target, 1.0), expect, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn large_logits_stay_finite() {
        assert!(bce_with_logits(1000.0, 0.0, 1.0).is_finite());
        assert!(bce_with_logits(-1000.0, 1.0, 1.0).is_finite());
        assert_abs_diff_eq!(bce_with_logits(1000.0, 1.0, 1.0), 0.0);
        assert_abs_diff_eq!(sigmoid(-1000.0), 0.0);
        assert_abs_diff_eq!(sigmoid(1000.0), 1.0);
    }

    #[test]
    fn class_weights_apply() -> Result<()> {
        let input = array![[0.0, 0.0]];
        let target = array![[1.0, 1.0]];
        let loss = BceWithLogitsLossInit {
            weight: Some(array![1.0, 2.0]),
            ..BceWithLogitsLossInit::default(Reduction::None)
        }
        .build()?
        .forward(input.view(), target.view())?
        .into_elementwise()
        .unwrap();
        assert_abs_diff_eq!(loss[[0, 1]], 2.0 * loss[[0, 0]], epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn shape_mismatch_is_error() -> Result<()> {
        let loss = BceWithLogitsLossInit::default(Reduction::Sum).build()?;
        let input = Array2::zeros((2, 3));
        let target = Array2::zeros((3, 2));
        assert!(loss.forward(input.view(), target.view()).is_err());
        Ok(())
    }
}
