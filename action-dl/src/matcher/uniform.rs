use super::targets::{MatchIndices, SampleTargets};
use crate::common::*;
use ndarray::ArrayView3;

#[derive(Debug, Clone)]
pub struct UniformMatcherInit {
    /// Number of predictions and anchors matched to every object.
    pub topk: usize,
    /// The weight of the class probability term in the prediction cost.
    pub cost_class: f64,
}

impl UniformMatcherInit {
    pub fn default(topk: usize) -> Self {
        Self {
            topk,
            cost_class: 0.0,
        }
    }

    pub fn build(self) -> Result<UniformMatcher> {
        let Self { topk, cost_class } = self;
        ensure!(topk > 0, "topk must be positive");
        ensure!(cost_class >= 0.0, "cost_class must be non-negative");
        Ok(UniformMatcher { topk, cost_class })
    }
}

/// Matches every object to its `topk` nearest predictions and `topk` nearest
/// anchors in L1 distance of center-size coordinates.
#[derive(Debug, Clone, CopyGetters)]
pub struct UniformMatcher {
    #[getset(get_copy = "pub")]
    topk: usize,
    #[getset(get_copy = "pub")]
    cost_class: f64,
}

impl UniformMatcher {
    /// Match the predictions of a batch.
    ///
    /// - `pred_boxes`: `[batch_size, num_anchors, 4]` boxes in x1y1x2y2.
    /// - `anchors`: `[num_anchors, 4]` anchors in cxcywh.
    /// - `class_probs`: optional `[batch_size, num_anchors, num_classes]` probabilities,
    ///   only consulted when `cost_class` is positive.
    ///
    /// For every rank `r < topk`, a sample's indices list the `r`-th nearest
    /// prediction of each object, then the `r`-th nearest anchor of each object.
    pub fn match_batch(
        &self,
        pred_boxes: ArrayView3<f64>,
        anchors: ArrayView2<f64>,
        targets: &[SampleTargets],
        class_probs: Option<ArrayView3<f64>>,
    ) -> Result<Vec<MatchIndices>> {
        let (batch_size, num_anchors, box_dim) = pred_boxes.dim();
        ensure!(
            box_dim == 4,
            "expect [batch_size, num_anchors, 4] predicted boxes, but get {:?}",
            pred_boxes.dim()
        );
        ensure!(
            anchors.dim() == (num_anchors, 4),
            "expect [{}, 4] anchors, but get {:?}",
            num_anchors,
            anchors.dim()
        );
        ensure!(
            targets.len() == batch_size,
            "expect targets of {} batch samples, but get {}",
            batch_size,
            targets.len()
        );
        let class_probs = class_probs.filter(|_| self.cost_class > 0.0);
        if let Some(probs) = &class_probs {
            let (b, m, num_classes) = probs.dim();
            ensure!(
                (b, m) == (batch_size, num_anchors),
                "class probabilities of shape {:?} do not match predicted boxes of shape {:?}",
                probs.dim(),
                pred_boxes.dim()
            );
            ensure!(
                targets
                    .iter()
                    .flat_map(|sample| &sample.labels)
                    .all(|&label| label < num_classes),
                "target labels must be less than {}",
                num_classes
            );
        }

        let anchors: Vec<[f64; 4]> = anchors
            .outer_iter()
            .map(|anchor| [anchor[0], anchor[1], anchor[2], anchor[3]])
            .collect();

        let indices = targets
            .iter()
            .enumerate()
            .map(|(batch_index, sample)| {
                if sample.is_empty() || num_anchors == 0 {
                    return MatchIndices::default();
                }

                let preds: Vec<[f64; 4]> = pred_boxes
                    .index_axis(Axis(0), batch_index)
                    .outer_iter()
                    .map(|xyxy| xyxy_to_cxcywh([xyxy[0], xyxy[1], xyxy[2], xyxy[3]]))
                    .collect();

                // [topk, num_targets] for both sides
                let (pred_ranks, anchor_ranks): (Vec<_>, Vec<_>) = sample
                    .iter()
                    .map(|(rect, label)| {
                        let target = rect.cxcywh();

                        let pred_costs: Vec<f64> = preds
                            .iter()
                            .enumerate()
                            .map(|(pred_index, pred)| {
                                let cost = l1_distance(pred, &target);
                                match &class_probs {
                                    Some(probs) => {
                                        cost - self.cost_class
                                            * probs[[batch_index, pred_index, label]]
                                    }
                                    None => cost,
                                }
                            })
                            .collect();
                        let anchor_costs: Vec<f64> = anchors
                            .iter()
                            .map(|anchor| l1_distance(anchor, &target))
                            .collect();

                        (
                            smallest_k(&pred_costs, self.topk),
                            smallest_k(&anchor_costs, self.topk),
                        )
                    })
                    .unzip();

                let topk = self.topk.min(num_anchors);
                let num_targets = sample.len();
                let mut pred_indices = Vec::with_capacity(topk * num_targets * 2);
                let mut target_indices = Vec::with_capacity(topk * num_targets * 2);

                for rank in 0..topk {
                    for ranks in [&pred_ranks, &anchor_ranks] {
                        for (target_index, ranked) in ranks.iter().enumerate() {
                            pred_indices.push(ranked[rank]);
                            target_indices.push(target_index);
                        }
                    }
                }

                MatchIndices {
                    pred_indices,
                    target_indices,
                }
            })
            .collect();

        Ok(indices)
    }
}

fn xyxy_to_cxcywh([x1, y1, x2, y2]: [f64; 4]) -> [f64; 4] {
    [(x1 + x2) / 2.0, (y1 + y2) / 2.0, x2 - x1, y2 - y1]
}

fn l1_distance(lhs: &[f64; 4], rhs: &[f64; 4]) -> f64 {
    izip!(lhs, rhs).map(|(lhs, rhs)| (lhs - rhs).abs()).sum()
}

/// Indices of the `k` smallest costs in increasing order, ties broken by lower index.
fn smallest_k(costs: &[f64], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..costs.len()).collect();
    indices.sort_by(|&lhs, &rhs| costs[lhs].total_cmp(&costs[rhs]).then(lhs.cmp(&rhs)));
    indices.truncate(k);
    indices
}
