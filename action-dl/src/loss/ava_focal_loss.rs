use super::{
    bce_with_logits_loss::sigmoid,
    reduction::{LossValue, Reduction},
};
use crate::common::*;
use ndarray::{Ix2, Zip};

const PROB_EPSILON: f64 = 1e-4;

/// Load per-class frequencies from a JSON object keyed by 1-based class ids.
pub fn load_class_ratio(path: impl AsRef<Path>, num_classes: usize) -> Result<Array1<f64>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read class ratio file '{}'", path.display()))?;
    let ratios: HashMap<String, f64> = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse class ratio file '{}'", path.display()))?;

    (1..=num_classes)
        .map(|class_id| {
            ratios.get(&class_id.to_string()).copied().ok_or_else(|| {
                format_err!(
                    "class {} is missing in class ratio file '{}'",
                    class_id,
                    path.display()
                )
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Array1::from)
}

/// Focal loss weighted by class frequencies for multi-label AVA actions.
#[derive(Debug)]
pub struct AvaFocalLossInit {
    /// The fraction of samples of each class, in range `[0, 1]`.
    pub class_ratio: Array1<f64>,
    pub gamma: f64,
    pub reduction: Reduction,
}

impl AvaFocalLossInit {
    pub fn default(class_ratio: Array1<f64>, reduction: Reduction) -> Self {
        Self {
            class_ratio,
            gamma: 2.0,
            reduction,
        }
    }

    pub fn build(self) -> Result<AvaFocalLoss> {
        let Self {
            class_ratio,
            gamma,
            reduction,
        } = self;

        ensure!(gamma >= 0.0, "gamma must be non-negative");
        ensure!(
            class_ratio.iter().all(|ratio| (0.0..=1.0).contains(ratio)),
            "class ratios must be in range [0, 1]"
        );

        Ok(AvaFocalLoss {
            class_weight: class_ratio.mapv(|ratio| 1.0 - ratio),
            gamma,
            reduction,
        })
    }
}

#[derive(Debug)]
pub struct AvaFocalLoss {
    class_weight: Array1<f64>,
    gamma: f64,
    reduction: Reduction,
}

impl AvaFocalLoss {
    /// Compute the loss on `[batch_size, num_classes]` logits and one-hot targets.
    ///
    /// Entries whose target is neither 0 nor 1 do not contribute.
    pub fn forward(&self, input: ArrayView2<f64>, target: ArrayView2<f64>) -> Result<LossValue<Ix2>> {
        ensure!(
            input.dim() == target.dim(),
            "input and target shape must be equal"
        );
        let (_, num_classes) = input.dim();
        ensure!(
            num_classes == self.class_weight.len(),
            "expect {} classes, but get {}",
            self.class_weight.len(),
            num_classes
        );

        let gamma = self.gamma;
        let mut loss = Array2::zeros(input.dim());
        Zip::indexed(&mut loss)
            .and(&input)
            .and(&target)
            .for_each(|(_, class), loss, &logit, &target| {
                let prob = sigmoid(logit).max(PROB_EPSILON).min(1.0 - PROB_EPSILON);
                let weight = self.class_weight[class];

                *loss = if target == 1.0 {
                    -(1.0 - prob).powf(gamma) * prob.ln() * weight.exp()
                } else if target == 0.0 {
                    -prob.powf(gamma) * (1.0 - prob).ln() * (1.0 - weight).exp()
                } else {
                    0.0
                };
            });

        Ok(self.reduction.apply(loss))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn weights_follow_class_ratio() -> Result<()> {
        let loss_fn = AvaFocalLossInit::default(array![0.1, 0.5], Reduction::None).build()?;
        let input = array![[0.0, 0.0]];
        let target = array![[1.0, 0.0]];
        let loss = loss_fn
            .forward(input.view(), target.view())?
            .into_elementwise()
            .unwrap();

        // p = 0.5 for both entries
        let base = 0.25 * 2f64.ln();
        assert_abs_diff_eq!(loss[[0, 0]], base * 0.9f64.exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(loss[[0, 1]], base * 0.5f64.exp(), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn saturated_logits_are_clamped() -> Result<()> {
        let loss_fn = AvaFocalLossInit::default(array![0.3], Reduction::Sum).build()?;
        let input = array![[-1000.0], [1000.0]];
        let target = array![[1.0], [0.0]];
        let loss = loss_fn.forward(input.view(), target.view())?.total();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
        Ok(())
    }

    #[test]
    fn load_ratio_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ratio.json");
        fs::write(&path, r#"{"1": 0.25, "2": 0.5, "3": 0.125}"#)?;

        let ratio = load_class_ratio(&path, 2)?;
        assert_eq!(ratio, array![0.25, 0.5]);
        assert!(load_class_ratio(&path, 4).is_err());
        Ok(())
    }
}
