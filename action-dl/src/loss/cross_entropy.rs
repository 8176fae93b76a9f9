use super::reduction::{LossValue, Reduction};
use crate::common::*;
use ndarray::Ix1;

/// Softmax cross entropy on `[batch_size, num_classes]` logits and sparse class targets.
#[derive(Debug)]
pub struct CrossEntropyLoss {
    reduction: Reduction,
}

impl CrossEntropyLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    pub fn forward(&self, input: ArrayView2<f64>, target: &[usize]) -> Result<LossValue<Ix1>> {
        let (batch_size, num_classes) = input.dim();
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
            .map(|(logits, &class)| -log_softmax(logits)[class])
            .collect();

        Ok(self.reduction.apply(loss))
    }
}

/// Log-probabilities of a logit vector, shifted by the maximum for stability.
pub fn log_softmax(logits: ArrayView1<f64>) -> Array1<f64> {
    let max = logits.fold(f64::NEG_INFINITY, |max, &value| max.max(value));
    let log_sum_exp = logits.mapv(|value| (value - max).exp()).sum().ln() + max;
    logits.mapv(|value| value - log_sum_exp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn uniform_logits() -> Result<()> {
        let loss_fn = CrossEntropyLoss::new(Reduction::Mean);
        let input = Array2::zeros((3, 4));
        let loss = loss_fn.forward(input.view(), &[0, 1, 3])?.total();
        assert_abs_diff_eq!(loss, 4f64.ln(), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn large_logits_stay_finite() -> Result<()> {
        let loss_fn = CrossEntropyLoss::new(Reduction::None);
        let input = array![[1000.0, -1000.0], [-1000.0, 1000.0]];
        let loss = loss_fn
            .forward(input.view(), &[0, 0])?
            .into_elementwise()
            .unwrap();
        assert_abs_diff_eq!(loss[0], 0.0);
        assert_abs_diff_eq!(loss[1], 2000.0);
        Ok(())
    }

    #[test]
    fn reject_invalid_class() {
        let loss_fn = CrossEntropyLoss::new(Reduction::Sum);
        let input = Array2::zeros((1, 2));
        assert!(loss_fn.forward(input.view(), &[2]).is_err());
        assert!(loss_fn.forward(input.view(), &[]).is_err());
    }
}
