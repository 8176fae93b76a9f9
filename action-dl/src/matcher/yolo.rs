use super::targets::SampleTargets;
use crate::common::*;
use ndarray::Array3;

#[derive(Debug, Clone)]
pub struct YoloMatcherInit {
    /// The input image size in pixels.
    pub img_size: usize,
    /// The down-sampling stride of the output feature map.
    pub stride: usize,
    /// Anchor sizes as `(w, h)` pairs in pixels.
    pub anchor_size: Vec<(f64, f64)>,
    pub ignore_thresh: f64,
    pub num_classes: usize,
}

impl YoloMatcherInit {
    pub fn build(self) -> Result<YoloMatcher> {
        let Self {
            img_size,
            stride,
            anchor_size,
            ignore_thresh,
            num_classes,
        } = self;

        ensure!(stride > 0, "stride must be positive");
        ensure!(
            img_size >= stride,
            "img_size {} must not be less than stride {}",
            img_size,
            stride
        );
        ensure!(!anchor_size.is_empty(), "anchor_size must not be empty");
        ensure!(
            (0.0..=1.0).contains(&ignore_thresh),
            "ignore_thresh must be in range [0, 1]"
        );
        ensure!(num_classes > 0, "num_classes must be positive");

        let anchors: Vec<_> = anchor_size
            .into_iter()
            .map(|(w, h)| {
                ensure!(
                    w > 0.0 && h > 0.0,
                    "anchor sizes must be positive, but get ({}, {})",
                    w,
                    h
                );
                HW::try_from_wh([w, h])
            })
            .try_collect()?;

        Ok(YoloMatcher {
            img_size,
            stride,
            fmp_size: img_size / stride,
            anchors,
            ignore_thresh,
            num_classes,
        })
    }
}

/// Assigns every object to the best fitting anchor of the grid cell
/// containing its center.
#[derive(Debug, Clone, CopyGetters, Getters)]
pub struct YoloMatcher {
    #[getset(get_copy = "pub")]
    img_size: usize,
    #[getset(get_copy = "pub")]
    stride: usize,
    #[getset(get_copy = "pub")]
    fmp_size: usize,
    #[getset(get = "pub")]
    anchors: Vec<HW<f64>>,
    #[getset(get_copy = "pub")]
    ignore_thresh: f64,
    #[getset(get_copy = "pub")]
    num_classes: usize,
}

/// Dense per-cell training targets of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct YoloTargets {
    /// `[batch_size, num_cells]` confidence targets: 1 positive, 0 negative, -1 ignored.
    pub conf: Array2<f64>,
    /// `[batch_size, num_cells]` class targets, `num_classes` for background.
    pub class: Array2<usize>,
    /// `[batch_size, num_cells, 4]` normalized x1y1x2y2 box targets.
    pub boxes: Array3<f64>,
}

impl YoloMatcher {
    pub fn num_anchors(&self) -> usize {
        self.anchors.len()
    }

    /// The number of prediction slots, `fmp_size² × num_anchors`.
    pub fn num_cells(&self) -> usize {
        self.fmp_size * self.fmp_size * self.num_anchors()
    }

    pub fn flat_index(&self, row: usize, col: usize, anchor: usize) -> usize {
        (row * self.fmp_size + col) * self.num_anchors() + anchor
    }

    /// Build the targets of a batch from its key frame objects.
    ///
    /// Objects are visited in batch order, then in row order. When two
    /// objects claim the same slot, the later one wins.
    pub fn build_targets(&self, targets: &[SampleTargets]) -> Result<YoloTargets> {
        let batch_size = targets.len();
        let num_cells = self.num_cells();
        let img_size = self.img_size as f64;
        let stride = self.stride as f64;

        let mut conf = Array2::zeros((batch_size, num_cells));
        let mut class = Array2::from_elem((batch_size, num_cells), self.num_classes);
        let mut boxes = Array3::zeros((batch_size, num_cells, 4));

        for (batch_index, sample) in targets.iter().enumerate() {
            for (object_index, (rect, label)) in sample.iter().enumerate() {
                ensure!(
                    label < self.num_classes,
                    "the label {} of object {} in batch sample {} must be less than {}",
                    label,
                    object_index,
                    batch_index,
                    self.num_classes
                );

                let [x1, y1, x2, y2] = rect.xyxy();
                let (x1, y1, x2, y2) = (x1 * img_size, y1 * img_size, x2 * img_size, y2 * img_size);
                let w = x2 - x1;
                let h = y2 - y1;

                if w <= 0.0 || h <= 0.0 {
                    warn!(
                        "skip object {} in batch sample {} with non-positive size ({}, {})",
                        object_index, batch_index, w, h
                    );
                    continue;
                }

                let cx = (x1 + x2) / 2.0;
                let cy = (y1 + y2) / 2.0;
                let col = (cx / stride).floor();
                let row = (cy / stride).floor();
                let fmp_size = self.fmp_size as f64;
                if !(0.0..fmp_size).contains(&col) || !(0.0..fmp_size).contains(&row) {
                    continue;
                }
                let (row, col) = (row as usize, col as usize);

                let size = HW::try_from_wh([w, h])?;
                let ious: Vec<f64> = self
                    .anchors
                    .iter()
                    .map(|anchor| anchor.iou_with(&size))
                    .collect();
                let best_anchor = ious
                    .iter()
                    .enumerate()
                    .fold(0, |best, (index, &iou)| if iou > ious[best] { index } else { best });

                for (anchor_index, &iou) in ious.iter().enumerate() {
                    let index = self.flat_index(row, col, anchor_index);

                    if anchor_index == best_anchor {
                        conf[[batch_index, index]] = 1.0;
                        class[[batch_index, index]] = label;
                        boxes
                            .slice_mut(s![batch_index, index, ..])
                            .assign(&Array1::from(rect.xyxy().to_vec()));
                    } else if iou > self.ignore_thresh {
                        conf[[batch_index, index]] = -1.0;
                        class[[batch_index, index]] = self.num_classes;
                    }
                }
            }
        }

        Ok(YoloTargets { conf, class, boxes })
    }
}
