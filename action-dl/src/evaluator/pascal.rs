//! Pascal VOC average precision over AVA tables.

use super::ava::{AvaLabel, Category, ImageKey};
use crate::common::*;
use bbox::pairwise_iou;

pub const MAP_METRIC: &str = "PascalBoxes_Precision/mAP@0.5IOU";
pub const PER_CATEGORY_AP_PREFIX: &str = "PascalBoxes_PerformanceByCategory/AP@0.5IOU/";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecRec {
    pub precision: f64,
    pub recall: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegralMethod {
    /// Area under the precision envelope at every recall change (VOC 2010 and later).
    Continuous,
    /// Mean of the envelope sampled at evenly spaced recall points.
    Interpolation(usize),
}

#[derive(Debug)]
pub struct ApCalculator {
    integral_method: IntegralMethod,
}

impl ApCalculator {
    pub fn new_voc() -> Self {
        Self {
            integral_method: IntegralMethod::Continuous,
        }
    }

    pub fn new(integral_method: IntegralMethod) -> Result<Self> {
        if let IntegralMethod::Interpolation(n_points) = integral_method {
            ensure!(
                n_points >= 2,
                "invalid number of interpolated points {}",
                n_points
            );
        }

        Ok(Self { integral_method })
    }

    /// Compute average precision from a precision/recall curve.
    ///
    /// The input must be ordered by non-decreasing recall. An empty curve yields 0.
    pub fn compute_by_prec_rec(&self, sorted_prec_rec: &[PrecRec]) -> f64 {
        if sorted_prec_rec.is_empty() {
            return 0.0;
        }

        // sentinels at recall 0 and 1, both with zero precision
        let mut curve: Vec<PrecRec> = iter::once(PrecRec {
            precision: 0.0,
            recall: 0.0,
        })
        .chain(sorted_prec_rec.iter().cloned())
        .chain(iter::once(PrecRec {
            precision: 0.0,
            recall: 1.0,
        }))
        .collect();

        // precision envelope, non-increasing in recall
        for index in (0..curve.len() - 1).rev() {
            curve[index].precision = curve[index].precision.max(curve[index + 1].precision);
        }

        match self.integral_method {
            IntegralMethod::Continuous => curve
                .iter()
                .tuple_windows()
                .filter(|(prev, next)| prev.recall != next.recall)
                .map(|(prev, next)| (next.recall - prev.recall) * next.precision)
                .sum(),
            IntegralMethod::Interpolation(n_points) => {
                let sum: f64 = (0..n_points)
                    .map(|index| index as f64 / (n_points - 1) as f64)
                    .map(|recall| {
                        curve
                            .iter()
                            .skip(1)
                            .find(|prec_rec| prec_rec.recall >= recall)
                            .map(|prec_rec| prec_rec.precision)
                            .unwrap_or(0.0)
                    })
                    .sum();
                sum / n_points as f64
            }
        }
    }

    /// Compute average precision from scored true/false positive flags.
    ///
    /// Returns `None` when the class has no ground truth.
    pub fn compute_by_detections(&self, detections: &[(f64, bool)], num_ground_truth: usize) -> Option<f64> {
        if num_ground_truth == 0 {
            return None;
        }
        let prec_rec = precision_recall(detections, num_ground_truth);
        Some(self.compute_by_prec_rec(&prec_rec))
    }
}

/// Precision and recall after each detection in descending score order.
fn precision_recall(detections: &[(f64, bool)], num_ground_truth: usize) -> Vec<PrecRec> {
    let mut detections = detections.to_vec();
    detections.sort_by(|(lhs, _), (rhs, _)| rhs.total_cmp(lhs));

    detections
        .into_iter()
        .scan((0, 0), |(acc_tp, acc_fp), (_score, is_tp)| {
            if is_tp {
                *acc_tp += 1;
            } else {
                *acc_fp += 1;
            }
            let tp = *acc_tp as f64;
            let fp = *acc_fp as f64;
            Some(PrecRec {
                precision: tp / (tp + fp),
                recall: tp / num_ground_truth as f64,
            })
        })
        .collect()
}

/// Per-class evaluation results.
#[derive(Debug, Clone)]
pub struct PascalMetrics {
    /// Average precision per category, NaN for categories without ground truth.
    pub per_category_ap: IndexMap<String, f64>,
    /// Mean over categories with ground truth, NaN if there is none.
    pub mean_ap: f64,
}

impl PascalMetrics {
    /// Flatten into the metric names of the AVA challenge.
    pub fn to_map(&self) -> IndexMap<String, f64> {
        iter::once((MAP_METRIC.to_string(), self.mean_ap))
            .chain(
                self.per_category_ap
                    .iter()
                    .map(|(name, &ap)| (format!("{}{}", PER_CATEGORY_AP_PREFIX, name), ap)),
            )
            .collect()
    }
}

/// Accumulates per-image true and false positives at a single IoU threshold.
#[derive(Debug)]
pub struct PascalEvaluator {
    categories: Vec<Category>,
    num_classes: usize,
    matching_iou_threshold: f64,
    ground_truth: HashMap<ImageKey, Vec<AvaLabel>>,
    num_gt_per_class: Vec<usize>,
    detected_images: HashSet<ImageKey>,
    detections_per_class: Vec<Vec<(f64, bool)>>,
    ap_calculator: ApCalculator,
}

impl PascalEvaluator {
    pub fn new(categories: Vec<Category>) -> Result<Self> {
        ensure!(!categories.is_empty(), "categories must not be empty");
        ensure!(
            categories.iter().all(|category| category.id >= 1),
            "category ids must start from 1"
        );
        let num_classes = categories
            .iter()
            .map(|category| category.id)
            .max()
            .unwrap_or(0);

        Ok(Self {
            categories,
            num_classes,
            matching_iou_threshold: 0.5,
            ground_truth: HashMap::new(),
            num_gt_per_class: vec![0; num_classes],
            detected_images: HashSet::new(),
            detections_per_class: vec![vec![]; num_classes],
            ap_calculator: ApCalculator::new_voc(),
        })
    }

    fn check_label(&self, key: &ImageKey, label: &AvaLabel) -> Result<()> {
        ensure!(
            (1..=self.num_classes).contains(&label.class),
            "the label {} of image {} is not in range [1, {}]",
            label.class,
            key,
            self.num_classes
        );
        Ok(())
    }

    /// Register the ground truth of an image. A repeated image is ignored.
    pub fn add_ground_truth(&mut self, key: &ImageKey, labels: &[AvaLabel]) -> Result<()> {
        if self.ground_truth.contains_key(key) {
            warn!("image {} is already added, ignore its ground truth", key);
            return Ok(());
        }
        labels
            .iter()
            .try_for_each(|label| self.check_label(key, label))?;

        labels
            .iter()
            .for_each(|label| self.num_gt_per_class[label.class - 1] += 1);
        self.ground_truth.insert(key.clone(), labels.to_vec());
        Ok(())
    }

    /// Match the detections of an image to its ground truth.
    ///
    /// Boxes with non-positive height or width are dropped. Detections of an
    /// image without ground truth are false positives.
    pub fn add_detections(&mut self, key: &ImageKey, detections: &[AvaLabel]) -> Result<()> {
        if !self.detected_images.insert(key.clone()) {
            warn!("image {} is already added, ignore its detections", key);
            return Ok(());
        }
        detections
            .iter()
            .try_for_each(|label| self.check_label(key, label))?;

        let empty = vec![];
        let ground_truth = match self.ground_truth.get(key) {
            Some(labels) => labels,
            None => {
                warn!("no ground truth for image {}", key);
                &empty
            }
        };

        let valid_detections: Vec<&AvaLabel> = detections
            .iter()
            .filter(|label| label.rect.h() > 0.0 && label.rect.w() > 0.0)
            .collect();

        for class in 1..=self.num_classes {
            let mut class_detections: Vec<&AvaLabel> = valid_detections
                .iter()
                .cloned()
                .filter(|label| label.class == class)
                .collect();
            if class_detections.is_empty() {
                continue;
            }
            class_detections.sort_by(|lhs, rhs| rhs.score.total_cmp(&lhs.score));

            let class_gt: Vec<TLBR<f64>> = ground_truth
                .iter()
                .filter(|label| label.class == class)
                .map(|label| label.rect)
                .collect();
            let tp_fp = self.tp_fp_of_class(&class_detections, &class_gt);
            self.detections_per_class[class - 1].extend(tp_fp);
        }

        Ok(())
    }

    /// Each detection in descending score order takes its best overlapping
    /// ground truth if the IoU reaches the threshold and it is not yet taken.
    fn tp_fp_of_class(&self, detections: &[&AvaLabel], ground_truth: &[TLBR<f64>]) -> Vec<(f64, bool)> {
        if ground_truth.is_empty() {
            return detections.iter().map(|det| (det.score, false)).collect();
        }

        let det_rects: Vec<TLBR<f64>> = detections.iter().map(|det| det.rect).collect();
        let iou = pairwise_iou(&det_rects, ground_truth);
        let mut is_gt_detected = vec![false; ground_truth.len()];

        izip!(detections, iou.outer_iter())
            .map(|(det, ious)| {
                let (gt_index, max_iou) = ious.iter().cloned().enumerate().fold(
                    (0, f64::NEG_INFINITY),
                    |(best_index, best), (index, iou)| {
                        if iou > best {
                            (index, iou)
                        } else {
                            (best_index, best)
                        }
                    },
                );

                let is_tp = max_iou >= self.matching_iou_threshold && !is_gt_detected[gt_index];
                if is_tp {
                    is_gt_detected[gt_index] = true;
                }
                (det.score, is_tp)
            })
            .collect()
    }

    pub fn evaluate(&self) -> PascalMetrics {
        let ap_per_class: Vec<f64> = izip!(&self.detections_per_class, &self.num_gt_per_class)
            .map(|(detections, &num_gt)| {
                self.ap_calculator
                    .compute_by_detections(detections, num_gt)
                    .unwrap_or(f64::NAN)
            })
            .collect();

        let per_category_ap: IndexMap<String, f64> = self
            .categories
            .iter()
            .map(|category| (category.name.clone(), ap_per_class[category.id - 1]))
            .collect();

        let valid_aps: Vec<f64> = ap_per_class
            .iter()
            .cloned()
            .filter(|ap| !ap.is_nan())
            .collect();
        let mean_ap = if valid_aps.is_empty() {
            f64::NAN
        } else {
            valid_aps.iter().sum::<f64>() / valid_aps.len() as f64
        };

        PascalMetrics {
            per_category_ap,
            mean_ap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn label(xyxy: [f64; 4], class: usize, score: f64) -> AvaLabel {
        AvaLabel {
            rect: TLBR::try_from_xyxy(xyxy).unwrap(),
            class,
            score,
        }
    }

    fn categories() -> Vec<Category> {
        vec![
            Category {
                id: 1,
                name: "bend".to_string(),
            },
            Category {
                id: 2,
                name: "crouch".to_string(),
            },
            Category {
                id: 3,
                name: "dance".to_string(),
            },
        ]
    }

    #[test]
    fn perfect_curve() -> Result<()> {
        let calculator = ApCalculator::new_voc();
        let ap = calculator.compute_by_prec_rec(&[PrecRec {
            precision: 1.0,
            recall: 1.0,
        }]);
        assert_abs_diff_eq!(ap, 1.0);
        Ok(())
    }

    #[test]
    fn voc_and_interpolated_ap() -> Result<()> {
        let prec_rec: Vec<PrecRec> = [
            (1.0, 0.125),
            (1.0, 0.250),
            (1.0, 0.375),
            (0.750, 0.375),
            (0.800, 0.500),
            (0.833, 0.625),
            (0.714, 0.625),
            (0.625, 0.625),
            (0.556, 0.625),
            (0.5, 0.625),
        ]
        .iter()
        .map(|&(precision, recall)| PrecRec { precision, recall })
        .collect();

        let continuous = ApCalculator::new_voc().compute_by_prec_rec(&prec_rec);
        assert_abs_diff_eq!(continuous, 0.375 + 0.125 * 0.833 + 0.125 * 0.833, epsilon = 1e-9);

        let interpolated =
            ApCalculator::new(IntegralMethod::Interpolation(11))?.compute_by_prec_rec(&prec_rec);
        assert_abs_diff_eq!(interpolated, 0.5908181818181819, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn duplicated_detections_are_false_positives() -> Result<()> {
        let mut evaluator = PascalEvaluator::new(categories())?;
        let key = ImageKey::new("vid", 902);

        evaluator.add_ground_truth(
            &key,
            &[
                label([0.0, 0.0, 0.5, 0.5], 1, 1.0),
                label([0.5, 0.5, 1.0, 1.0], 1, 1.0),
                label([0.0, 0.0, 1.0, 1.0], 2, 1.0),
            ],
        )?;
        evaluator.add_detections(
            &key,
            &[
                // the best detection takes the first box, the second
                // detection of the same box is a false positive
                label([0.0, 0.0, 0.5, 0.5], 1, 0.9),
                label([0.0, 0.0, 0.5, 0.5], 1, 0.8),
                label([0.5, 0.5, 1.0, 1.0], 1, 0.7),
                // a zero-width box is dropped
                label([0.2, 0.0, 0.2, 1.0], 2, 0.9),
            ],
        )?;

        let metrics = evaluator.evaluate();
        // precision 1, 1/2, 2/3 at recall 1/2, 1/2, 1
        assert_abs_diff_eq!(
            metrics.per_category_ap["bend"],
            0.5 + 0.5 * 2.0 / 3.0,
            epsilon = 1e-12
        );
        // ground truth without detections
        assert_eq!(metrics.per_category_ap["crouch"], 0.0);
        // no ground truth at all
        assert!(metrics.per_category_ap["dance"].is_nan());
        assert_abs_diff_eq!(
            metrics.mean_ap,
            (0.5 + 0.5 * 2.0 / 3.0) / 2.0,
            epsilon = 1e-12
        );

        let map = metrics.to_map();
        assert_eq!(map.len(), 4);
        assert_eq!(map.get_index(0).unwrap().0, MAP_METRIC);
        assert!(map.contains_key("PascalBoxes_PerformanceByCategory/AP@0.5IOU/dance"));
        Ok(())
    }

    #[test]
    fn detections_without_ground_truth_are_false_positives() -> Result<()> {
        let mut evaluator = PascalEvaluator::new(categories())?;
        evaluator.add_ground_truth(&ImageKey::new("vid", 902), &[label([0.0, 0.0, 0.5, 0.5], 1, 1.0)])?;

        evaluator.add_detections(&ImageKey::new("vid", 903), &[label([0.0, 0.0, 0.5, 0.5], 1, 0.9)])?;
        evaluator.add_detections(&ImageKey::new("vid", 902), &[label([0.0, 0.0, 0.5, 0.5], 1, 0.8)])?;

        // the false positive ranks first: precision 0 then 1/2 at recall 1
        let metrics = evaluator.evaluate();
        assert_abs_diff_eq!(metrics.per_category_ap["bend"], 0.5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn low_overlap_is_false_positive() -> Result<()> {
        let mut evaluator = PascalEvaluator::new(categories())?;
        let key = ImageKey::new("vid", 902);
        evaluator.add_ground_truth(&key, &[label([0.0, 0.0, 0.5, 0.5], 1, 1.0)])?;
        evaluator.add_detections(&key, &[label([0.25, 0.25, 0.75, 0.75], 1, 0.9)])?;

        assert_eq!(evaluator.evaluate().per_category_ap["bend"], 0.0);
        Ok(())
    }

    #[test]
    fn repeated_images_are_ignored() -> Result<()> {
        let mut evaluator = PascalEvaluator::new(categories())?;
        let key = ImageKey::new("vid", 902);
        evaluator.add_ground_truth(&key, &[label([0.0, 0.0, 0.5, 0.5], 1, 1.0)])?;
        evaluator.add_ground_truth(&key, &[label([0.0, 0.0, 0.5, 0.5], 1, 1.0)])?;
        evaluator.add_detections(&key, &[label([0.0, 0.0, 0.5, 0.5], 1, 0.9)])?;
        evaluator.add_detections(&key, &[label([0.0, 0.0, 0.5, 0.5], 1, 0.9)])?;

        assert_eq!(evaluator.evaluate().per_category_ap["bend"], 1.0);
        Ok(())
    }

    #[test]
    fn out_of_range_label_is_error() -> Result<()> {
        let mut evaluator = PascalEvaluator::new(categories())?;
        let key = ImageKey::new("vid", 902);
        assert!(evaluator
            .add_ground_truth(&key, &[label([0.0, 0.0, 0.5, 0.5], 4, 1.0)])
            .is_err());
        Ok(())
    }
}
