//! The YOLO-style criterion applied on the key frame.

use super::{
    bce_with_logits_loss::sigmoid,
    cross_entropy::CrossEntropyLoss,
    reduction::Reduction,
};
use crate::{
    common::*,
    config::YoloCriterionConfig,
    matcher::{FrameTargets, SampleTargets, YoloMatcher, YoloMatcherInit, YoloTargets},
};
use ndarray::Array3;

/// Dense key frame predictions over `N = fmp_size² × num_anchors` slots.
#[derive(Debug, Clone)]
pub struct KeyFramePrediction {
    /// `[batch_size, N]` objectness logits.
    pub conf_logits: Array2<f64>,
    /// `[batch_size, N, num_classes]` class logits.
    pub cls_logits: Array3<f64>,
    /// `[batch_size, N, 4]` boxes in normalized x1y1x2y2.
    pub boxes: Array3<f64>,
}

#[derive(Debug, Clone)]
pub struct YoloCriterionInit {
    pub num_classes: usize,
    pub img_size: usize,
    pub stride: usize,
    pub anchor_size: Vec<(f64, f64)>,
    pub ignore_thresh: f64,
    pub loss_obj_weight: f64,
    pub loss_noobj_weight: f64,
    pub loss_cls_weight: f64,
    pub loss_reg_weight: f64,
}

impl YoloCriterionInit {
    pub fn new(
        num_classes: usize,
        img_size: usize,
        stride: usize,
        anchor_size: Vec<(f64, f64)>,
    ) -> Self {
        Self {
            num_classes,
            img_size,
            stride,
            anchor_size,
            ignore_thresh: 0.5,
            loss_obj_weight: 5.0,
            loss_noobj_weight: 1.0,
            loss_cls_weight: 1.0,
            loss_reg_weight: 1.0,
        }
    }

    pub fn build(self) -> Result<YoloCriterion> {
        let Self {
            num_classes,
            img_size,
            stride,
            anchor_size,
            ignore_thresh,
            loss_obj_weight,
            loss_noobj_weight,
            loss_cls_weight,
            loss_reg_weight,
        } = self;

        ensure!(
            [
                loss_obj_weight,
                loss_noobj_weight,
                loss_cls_weight,
                loss_reg_weight
            ]
            .iter()
            .all(|&weight| weight >= 0.0),
            "loss weights must be non-negative"
        );

        let matcher = YoloMatcherInit {
            img_size,
            stride,
            anchor_size,
            ignore_thresh,
            num_classes,
        }
        .build()?;

        Ok(YoloCriterion {
            matcher,
            loss_obj_weight,
            loss_noobj_weight,
            loss_cls_weight,
            loss_reg_weight,
            cross_entropy: CrossEntropyLoss::new(Reduction::Sum),
        })
    }
}

impl From<&YoloCriterionConfig> for YoloCriterionInit {
    fn from(config: &YoloCriterionConfig) -> Self {
        let YoloCriterionConfig {
            num_classes,
            img_size,
            stride,
            ref anchor_size,
            ignore_thresh,
            loss_obj_weight,
            loss_noobj_weight,
            loss_cls_weight,
            loss_reg_weight,
        } = *config;
        let default = Self::new(
            num_classes,
            img_size,
            stride,
            anchor_size.iter().map(|&(w, h)| (w.raw(), h.raw())).collect(),
        );

        Self {
            ignore_thresh: ignore_thresh.map_or(default.ignore_thresh, R64::raw),
            loss_obj_weight: loss_obj_weight.map_or(default.loss_obj_weight, R64::raw),
            loss_noobj_weight: loss_noobj_weight.map_or(default.loss_noobj_weight, R64::raw),
            loss_cls_weight: loss_cls_weight.map_or(default.loss_cls_weight, R64::raw),
            loss_reg_weight: loss_reg_weight.map_or(default.loss_reg_weight, R64::raw),
            ..default
        }
    }
}

#[derive(Debug)]
pub struct YoloCriterion {
    matcher: YoloMatcher,
    loss_obj_weight: f64,
    loss_noobj_weight: f64,
    loss_cls_weight: f64,
    loss_reg_weight: f64,
    cross_entropy: CrossEntropyLoss,
}

/// The key frame losses of the YOLO-style criterion, each divided by the batch size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloLossOutput {
    pub conf_loss_obj: f64,
    pub conf_loss_noobj: f64,
    pub cls_loss: f64,
    pub reg_loss: f64,
    pub total_loss: f64,
    pub num_foreground: usize,
}

impl YoloCriterion {
    pub fn matcher(&self) -> &YoloMatcher {
        &self.matcher
    }

    /// Compute the losses against the targets of the last frame in `targets`.
    pub fn forward(
        &self,
        prediction: &KeyFramePrediction,
        targets: &[FrameTargets],
    ) -> Result<YoloLossOutput> {
        let KeyFramePrediction {
            conf_logits,
            cls_logits,
            boxes,
        } = prediction;
        let key_frame_targets = targets
            .last()
            .ok_or_else(|| format_err!("the clip must have at least one frame"))?;

        let (batch_size, num_cells) = conf_logits.dim();
        let num_classes = self.matcher.num_classes();
        ensure!(
            batch_size > 0,
            "the batch must have at least one sample"
        );
        ensure!(
            num_cells == self.matcher.num_cells(),
            "expect {} prediction slots, but get {}",
            self.matcher.num_cells(),
            num_cells
        );
        ensure!(
            cls_logits.dim() == (batch_size, num_cells, num_classes),
            "expect [{}, {}, {}] class logits, but get {:?}",
            batch_size,
            num_cells,
            num_classes,
            cls_logits.dim()
        );
        ensure!(
            boxes.dim() == (batch_size, num_cells, 4),
            "expect [{}, {}, 4] boxes, but get {:?}",
            batch_size,
            num_cells,
            boxes.dim()
        );
        ensure!(
            key_frame_targets.len() == batch_size,
            "expect targets of {} batch samples, but get {}",
            batch_size,
            key_frame_targets.len()
        );

        let samples = SampleTargets::from_frame(key_frame_targets)?;
        let YoloTargets {
            conf: conf_target,
            class: class_target,
            boxes: box_target,
        } = self.matcher.build_targets(&samples)?;

        let foreground: Vec<(usize, usize)> = conf_target
            .indexed_iter()
            .filter(|(_, &conf)| conf == 1.0)
            .map(|(index, _)| index)
            .collect();
        let num_foreground = foreground.len();

        // regression and target IoU of foreground slots
        let (reg_loss, conf_loss_obj) = {
            let (giou_losses, obj_losses): (Vec<f64>, Vec<f64>) = foreground
                .iter()
                .map(|&(batch_index, cell_index)| {
                    let pred = boxes.slice(s![batch_index, cell_index, ..]);
                    let target = box_target.slice(s![batch_index, cell_index, ..]);
                    let pred = TLBR::try_from_xyxy([pred[0], pred[1], pred[2], pred[3]])
                        .with_context(|| {
                            format!(
                                "predicted box at slot {} of batch sample {} is not a valid x1y1x2y2 box",
                                cell_index, batch_index
                            )
                        })?;
                    let target =
                        TLBR::try_from_xyxy([target[0], target[1], target[2], target[3]])?;

                    let iou = pred.iou_with(&target).clamp(0.0, 1.0);
                    let prob = sigmoid(conf_logits[[batch_index, cell_index]]);

                    Ok((1.0 - pred.giou_with(&target), (prob - iou).powi(2)))
                })
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .unzip();

            (giou_losses.iter().sum::<f64>(), obj_losses.iter().sum::<f64>())
        };

        let conf_loss_noobj: f64 = izip!(conf_logits, &conf_target)
            .filter(|(_, &conf)| conf == 0.0)
            .map(|(&logit, _)| sigmoid(logit).powi(2))
            .sum();

        let cls_loss = {
            let mut input = Array2::zeros((num_foreground, num_classes));
            let mut target = Vec::with_capacity(num_foreground);
            for (row, &(batch_index, cell_index)) in foreground.iter().enumerate() {
                input
                    .row_mut(row)
                    .assign(&cls_logits.slice(s![batch_index, cell_index, ..]));
                target.push(class_target[[batch_index, cell_index]]);
            }
            self.cross_entropy.forward(input.view(), &target)?.total()
        };

        let batch_size = batch_size as f64;
        let conf_loss_obj = conf_loss_obj / batch_size;
        let conf_loss_noobj = conf_loss_noobj / batch_size;
        let cls_loss = cls_loss / batch_size;
        let reg_loss = reg_loss / batch_size;
        let total_loss = self.loss_obj_weight * conf_loss_obj
            + self.loss_noobj_weight * conf_loss_noobj
            + self.loss_cls_weight * cls_loss
            + self.loss_reg_weight * reg_loss;

        Ok(YoloLossOutput {
            conf_loss_obj,
            conf_loss_noobj,
            cls_loss,
            reg_loss,
            total_loss,
            num_foreground,
        })
    }
}
