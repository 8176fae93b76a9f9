use super::{
    uniform_loss::{CriterionInput, UniformCriterion, UniformCriterionInit, UniformLossOutput},
    yolo_loss::{KeyFramePrediction, YoloCriterion, YoloCriterionInit, YoloLossOutput},
};
use crate::{collective::Collective, common::*, config::CriterionConfig, matcher::FrameTargets};

/// The training criterion selected by the matcher strategy.
#[derive(Debug)]
pub enum Criterion {
    Uniform(UniformCriterion),
    Yolo(YoloCriterion),
}

/// The model output consumed by a [Criterion].
#[derive(Debug, Clone)]
pub enum CriterionPrediction {
    /// Per-frame predictions of the whole clip.
    Clip(CriterionInput),
    /// Dense predictions of the key frame.
    KeyFrame(KeyFramePrediction),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CriterionOutput {
    Uniform(UniformLossOutput),
    Yolo(YoloLossOutput),
}

impl Criterion {
    pub fn new(config: &CriterionConfig) -> Result<Self> {
        let criterion = match config {
            CriterionConfig::UniformMatcher(config) => {
                Self::Uniform(UniformCriterionInit::from(config).build()?)
            }
            CriterionConfig::YoloMatcher(config) => {
                Self::Yolo(YoloCriterionInit::from(config).build()?)
            }
        };
        Ok(criterion)
    }

    pub fn forward(
        &self,
        prediction: &CriterionPrediction,
        targets: &[FrameTargets],
        collective: &dyn Collective,
    ) -> Result<CriterionOutput> {
        let output = match (self, prediction) {
            (Self::Uniform(criterion), CriterionPrediction::Clip(input)) => {
                CriterionOutput::Uniform(criterion.forward(input, targets, collective)?)
            }
            (Self::Yolo(criterion), CriterionPrediction::KeyFrame(input)) => {
                CriterionOutput::Yolo(criterion.forward(input, targets)?)
            }
            (Self::Uniform(_), CriterionPrediction::KeyFrame(_)) => {
                bail!("the uniform matcher criterion expects clip predictions")
            }
            (Self::Yolo(_), CriterionPrediction::Clip(_)) => {
                bail!("the yolo matcher criterion expects key frame predictions")
            }
        };

        output
            .terms()
            .iter()
            .for_each(|(name, value)| debug!("{}: {:.5}", name, value));

        Ok(output)
    }
}

impl CriterionOutput {
    pub fn total_loss(&self) -> f64 {
        match self {
            Self::Uniform(output) => output.losses,
            Self::Yolo(output) => output.total_loss,
        }
    }

    /// Named loss terms in logging order.
    pub fn terms(&self) -> IndexMap<&'static str, f64> {
        match *self {
            Self::Uniform(UniformLossOutput {
                loss_labels,
                loss_bboxes,
                losses,
                num_foreground,
            }) => IndexMap::from_iter([
                ("loss_labels", loss_labels),
                ("loss_bboxes", loss_bboxes),
                ("losses", losses),
                ("num_foreground", num_foreground),
            ]),
            Self::Yolo(YoloLossOutput {
                conf_loss_obj,
                conf_loss_noobj,
                cls_loss,
                reg_loss,
                total_loss,
                num_foreground,
            }) => IndexMap::from_iter([
                ("conf_loss_obj", conf_loss_obj),
                ("conf_loss_noobj", conf_loss_noobj),
                ("cls_loss", cls_loss),
                ("reg_loss", reg_loss),
                ("total_loss", total_loss),
                ("num_foreground", num_foreground as f64),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collective::SingleProcess, loss::FramePrediction};
    use ndarray::Array3;

    #[test]
    fn dispatch_by_matcher() -> Result<()> {
        let config: CriterionConfig = json5::from_str(
            r#"{
                matcher: "uniform_matcher",
                num_classes: 2,
                topk: 1,
            }"#,
        )?;
        let criterion = Criterion::new(&config)?;
        assert!(matches!(criterion, Criterion::Uniform(_)));

        let prediction = CriterionPrediction::Clip(CriterionInput {
            frames: vec![FramePrediction {
                cls_logits: Array3::zeros((1, 1, 2)),
                boxes: ndarray::array![[[0.0, 0.0, 1.0, 1.0]]],
            }],
            anchors: ndarray::array![[0.5, 0.5, 1.0, 1.0]],
            stride: 32,
        });
        let output = criterion.forward(&prediction, &[vec![Array2::zeros((0, 6))]], &SingleProcess)?;

        let terms = output.terms();
        assert_eq!(
            terms.keys().cloned().collect::<Vec<_>>(),
            vec!["loss_labels", "loss_bboxes", "losses", "num_foreground"]
        );
        assert_eq!(terms["losses"], output.total_loss());
        Ok(())
    }

    #[test]
    fn mismatched_prediction_is_error() -> Result<()> {
        let config: CriterionConfig = json5::from_str(
            r#"{
                matcher: "yolo_matcher",
                num_classes: 2,
                img_size: 64,
                stride: 32,
                anchor_size: [[32.0, 32.0]],
            }"#,
        )?;
        let criterion = Criterion::new(&config)?;
        let prediction = CriterionPrediction::Clip(CriterionInput {
            frames: vec![],
            anchors: Array2::zeros((0, 4)),
            stride: 32,
        });
        assert!(criterion
            .forward(&prediction, &[], &SingleProcess)
            .is_err());
        Ok(())
    }
}
