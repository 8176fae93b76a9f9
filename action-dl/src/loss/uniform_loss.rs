//! The uniform matching criterion applied on every frame of a clip.

use super::{
    bce_with_logits_loss::{sigmoid, BceWithLogitsLossInit},
    focal_loss::{FocalLoss, FocalLossInit},
    reduction::Reduction,
};
use crate::{
    collective::Collective,
    common::*,
    config::UniformCriterionConfig,
    matcher::{FrameTargets, SampleTargets, UniformMatcher, UniformMatcherInit},
};
use bbox::pairwise_iou_argmax;
use ndarray::Array3;

pub use uniform_loss::*;
pub use uniform_loss_output::*;

/// Predictions of one frame.
#[derive(Debug, Clone)]
pub struct FramePrediction {
    /// `[batch_size, num_anchors, num_classes]` class logits.
    pub cls_logits: Array3<f64>,
    /// `[batch_size, num_anchors, 4]` boxes in normalized x1y1x2y2.
    pub boxes: Array3<f64>,
}

/// Predictions of a clip, oldest frame first.
#[derive(Debug, Clone)]
pub struct CriterionInput {
    pub frames: Vec<FramePrediction>,
    /// `[num_anchors, 4]` anchors in normalized cxcywh.
    pub anchors: Array2<f64>,
    pub stride: usize,
}

/// The training target of a prediction slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotTarget {
    Ignore,
    Background,
    Foreground(usize),
}

mod uniform_loss {
    use super::*;

    #[derive(Debug)]
    pub struct UniformCriterionInit {
        pub num_classes: usize,
        pub topk: Option<usize>,
        pub iou_t: Option<f64>,
        pub igt: Option<f64>,
        pub alpha: Option<f64>,
        pub gamma: Option<f64>,
        pub cost_class: Option<f64>,
        pub loss_cls_weight: Option<f64>,
        pub loss_reg_weight: Option<f64>,
    }

    impl UniformCriterionInit {
        pub fn new(num_classes: usize) -> Self {
            Self {
                num_classes,
                topk: None,
                iou_t: None,
                igt: None,
                alpha: None,
                gamma: None,
                cost_class: None,
                loss_cls_weight: None,
                loss_reg_weight: None,
            }
        }

        pub fn build(self) -> Result<UniformCriterion> {
            let Self {
                num_classes,
                topk,
                iou_t,
                igt,
                alpha,
                gamma,
                cost_class,
                loss_cls_weight,
                loss_reg_weight,
            } = self;

            let topk = topk.unwrap_or(4);
            let iou_t = iou_t.unwrap_or(0.15);
            let igt = igt.unwrap_or(0.7);
            let alpha = alpha.unwrap_or(0.25);
            let gamma = gamma.unwrap_or(2.0);
            let cost_class = cost_class.unwrap_or(0.0);
            let loss_cls_weight = loss_cls_weight.unwrap_or(1.0);
            let loss_reg_weight = loss_reg_weight.unwrap_or(1.0);

            ensure!(num_classes > 0, "num_classes must be positive");
            ensure!(
                (0.0..=1.0).contains(&iou_t),
                "iou_t must be in range [0, 1]"
            );
            ensure!((0.0..=1.0).contains(&igt), "igt must be in range [0, 1]");
            ensure!(
                loss_cls_weight >= 0.0,
                "loss_cls_weight must be non-negative"
            );
            ensure!(
                loss_reg_weight >= 0.0,
                "loss_reg_weight must be non-negative"
            );

            let matcher = UniformMatcherInit { topk, cost_class }.build()?;

            let focal_loss = {
                let bce_loss = BceWithLogitsLossInit::default(Reduction::None).build()?;
                FocalLossInit {
                    alpha,
                    gamma,
                    ..FocalLossInit::default(Reduction::Sum, move |input, target| {
                        bce_loss.elementwise(input, target)
                    })
                }
                .build()?
            };

            Ok(UniformCriterion {
                num_classes,
                iou_t,
                igt,
                loss_cls_weight,
                loss_reg_weight,
                matcher,
                focal_loss,
            })
        }
    }

    impl From<&UniformCriterionConfig> for UniformCriterionInit {
        fn from(config: &UniformCriterionConfig) -> Self {
            let UniformCriterionConfig {
                num_classes,
                topk,
                iou_t,
                igt,
                alpha,
                gamma,
                cost_class,
                loss_cls_weight,
                loss_reg_weight,
            } = *config;

            Self {
                num_classes,
                topk,
                iou_t: iou_t.map(R64::raw),
                igt: igt.map(R64::raw),
                alpha: alpha.map(R64::raw),
                gamma: gamma.map(R64::raw),
                cost_class: cost_class.map(R64::raw),
                loss_cls_weight: loss_cls_weight.map(R64::raw),
                loss_reg_weight: loss_reg_weight.map(R64::raw),
            }
        }
    }

    #[derive(Debug)]
    pub struct UniformCriterion {
        num_classes: usize,
        iou_t: f64,
        igt: f64,
        loss_cls_weight: f64,
        loss_reg_weight: f64,
        matcher: UniformMatcher,
        focal_loss: FocalLoss,
    }

    /// Per-frame loss sums before normalization.
    struct FrameLoss {
        cls_loss: f64,
        reg_loss: f64,
        num_foreground: f64,
    }

    impl UniformCriterion {
        pub fn num_classes(&self) -> usize {
            self.num_classes
        }

        /// Compute the clip losses.
        ///
        /// `targets` holds one entry per frame, aligned with `input.frames`.
        /// The collective is reached exactly once per frame.
        pub fn forward(
            &self,
            input: &CriterionInput,
            targets: &[FrameTargets],
            collective: &dyn Collective,
        ) -> Result<UniformLossOutput> {
            ensure!(!targets.is_empty(), "the clip must have at least one frame");
            ensure!(
                input.frames.len() == targets.len(),
                "expect predictions of {} frames, but get {}",
                targets.len(),
                input.frames.len()
            );

            let mut cls_loss = 0.0;
            let mut reg_loss = 0.0;
            let mut num_foreground = 0.0;

            for (frame_index, (frame, frame_targets)) in izip!(&input.frames, targets).enumerate() {
                let frame_loss = self
                    .forward_frame(frame, &input.anchors, frame_targets, collective)
                    .with_context(|| format!("failed to compute the loss of frame {}", frame_index))?;
                cls_loss += frame_loss.cls_loss;
                reg_loss += frame_loss.reg_loss;
                num_foreground += frame_loss.num_foreground;
            }

            let loss_labels = cls_loss / num_foreground;
            let loss_bboxes = reg_loss / num_foreground;
            let losses = self.loss_cls_weight * loss_labels + self.loss_reg_weight * loss_bboxes;

            Ok(UniformLossOutput {
                loss_labels,
                loss_bboxes,
                losses,
                num_foreground,
            })
        }

        fn forward_frame(
            &self,
            frame: &FramePrediction,
            anchors: &Array2<f64>,
            frame_targets: &[Array2<f64>],
            collective: &dyn Collective,
        ) -> Result<FrameLoss> {
            let FramePrediction { cls_logits, boxes } = frame;
            let (batch_size, num_anchors, num_classes) = cls_logits.dim();
            ensure!(
                num_classes == self.num_classes,
                "expect {} classes, but get {}",
                self.num_classes,
                num_classes
            );
            ensure!(
                boxes.dim() == (batch_size, num_anchors, 4),
                "expect [{}, {}, 4] boxes, but get {:?}",
                batch_size,
                num_anchors,
                boxes.dim()
            );
            ensure!(
                anchors.dim() == (num_anchors, 4),
                "expect [{}, 4] anchors, but get {:?}",
                num_anchors,
                anchors.dim()
            );
            ensure!(
                frame_targets.len() == batch_size,
                "expect targets of {} batch samples, but get {}",
                batch_size,
                frame_targets.len()
            );

            let samples = SampleTargets::from_frame(frame_targets)?;
            ensure!(
                samples
                    .iter()
                    .flat_map(|sample| &sample.labels)
                    .all(|&label| label < self.num_classes),
                "target labels must be less than {}",
                self.num_classes
            );

            let class_probs = (self.matcher.cost_class() > 0.0).then(|| cls_logits.mapv(sigmoid));
            let indices = self.matcher.match_batch(
                boxes.view(),
                anchors.view(),
                &samples,
                class_probs.as_ref().map(|probs| probs.view()),
            )?;

            let anchor_rects: Vec<TLBR<f64>> = anchors
                .outer_iter()
                .enumerate()
                .map(|(index, anchor)| {
                    TLBR::try_from_cxcywh([anchor[0], anchor[1], anchor[2], anchor[3]])
                        .with_context(|| format!("invalid anchor {}", index))
                })
                .try_collect()?;

            let mut slots = vec![SlotTarget::Background; batch_size * num_anchors];
            let mut reg_loss = 0.0;

            for (batch_index, sample) in samples.iter().enumerate() {
                let pred_rects: Vec<TLBR<f64>> = boxes
                    .index_axis(Axis(0), batch_index)
                    .outer_iter()
                    .enumerate()
                    .map(|(index, xyxy)| {
                        TLBR::try_from_xyxy([xyxy[0], xyxy[1], xyxy[2], xyxy[3]]).with_context(
                            || {
                                format!(
                                    "predicted box {} of batch sample {} is not a valid x1y1x2y2 box",
                                    index, batch_index
                                )
                            },
                        )
                    })
                    .try_collect()?;
                let sample_slots =
                    &mut slots[batch_index * num_anchors..(batch_index + 1) * num_anchors];

                // ignore predictions overlapping any object too much
                let max_ious = pairwise_iou_argmax(&pred_rects, &sample.boxes).max;
                izip!(sample_slots.iter_mut(), &max_ious)
                    .filter(|(_, &iou)| iou > self.igt)
                    .for_each(|(slot, _)| *slot = SlotTarget::Ignore);

                // scatter matched labels, later pairs overwrite earlier ones
                for (pred_index, target_index) in indices[batch_index].iter() {
                    let target_rect = &sample.boxes[target_index];
                    let anchor_iou = anchor_rects[pred_index].iou_with(target_rect);

                    if anchor_iou < self.iou_t {
                        sample_slots[pred_index] = SlotTarget::Ignore;
                    } else {
                        sample_slots[pred_index] =
                            SlotTarget::Foreground(sample.labels[target_index]);
                        reg_loss += 1.0 - pred_rects[pred_index].giou_with(target_rect);
                    }
                }
            }

            // normalize by the foreground count averaged over workers
            let local_foreground = slots
                .iter()
                .filter(|slot| matches!(slot, SlotTarget::Foreground(_)))
                .count();
            let num_foreground = {
                let total = collective.sum_across_workers(local_foreground as f64)?;
                (total / collective.world_size() as f64).max(1.0)
            };

            // classification on every non-ignored slot
            let cls_loss = {
                let valid_slots: Vec<(usize, usize, SlotTarget)> = slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| **slot != SlotTarget::Ignore)
                    .map(|(flat_index, &slot)| {
                        (flat_index / num_anchors, flat_index % num_anchors, slot)
                    })
                    .collect();
                let num_valid = valid_slots.len();

                let mut input = Array2::zeros((num_valid, num_classes));
                let mut target = Array2::zeros((num_valid, num_classes));
                for (row, &(batch_index, anchor_index, slot)) in valid_slots.iter().enumerate() {
                    input
                        .row_mut(row)
                        .assign(&cls_logits.slice(s![batch_index, anchor_index, ..]));
                    if let SlotTarget::Foreground(label) = slot {
                        target[[row, label]] = 1.0;
                    }
                }

                self.focal_loss
                    .forward(input.view(), target.view())?
                    .total()
            };

            Ok(FrameLoss {
                cls_loss,
                reg_loss,
                num_foreground,
            })
        }
    }
}

mod uniform_loss_output {
    /// The clip losses of the uniform criterion.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct UniformLossOutput {
        /// Classification loss normalized by the foreground total.
        pub loss_labels: f64,
        /// GIoU regression loss normalized by the foreground total.
        pub loss_bboxes: f64,
        /// The weighted sum of both losses.
        pub losses: f64,
        /// The foreground total of the clip, at least 1 per frame.
        pub num_foreground: f64,
    }
}
