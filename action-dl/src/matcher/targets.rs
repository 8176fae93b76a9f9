use crate::common::*;

/// The ground truth of one frame, one `[num_objects, >= 5]` array per batch sample.
pub type FrameTargets = Vec<Array2<f64>>;

/// The parsed ground truth objects of a batch sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleTargets {
    /// Normalized boxes.
    pub boxes: Vec<TLBR<f64>>,
    /// 0-based class ids.
    pub labels: Vec<usize>,
}

impl SampleTargets {
    /// Parse rows laid out as `[x1, y1, x2, y2, label, ...]`.
    ///
    /// An array without rows yields no objects, regardless of its column count.
    pub fn from_rows(rows: &Array2<f64>) -> Result<Self> {
        if rows.nrows() == 0 {
            return Ok(Self::default());
        }

        let (boxes, labels): (Vec<_>, Vec<_>) = rows
            .outer_iter()
            .enumerate()
            .map(|(index, row)| {
                let Label { rect, class } = Label::try_from_target_row(&row.to_vec())
                    .with_context(|| format!("invalid target at row {}", index))?;
                Ok((rect, class))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();

        Ok(Self { boxes, labels })
    }

    /// Parse the targets of every sample in a frame.
    pub fn from_frame(frame: &[Array2<f64>]) -> Result<Vec<Self>> {
        frame
            .iter()
            .enumerate()
            .map(|(batch_index, rows)| {
                Self::from_rows(rows)
                    .with_context(|| format!("invalid targets of batch sample {}", batch_index))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TLBR<f64>, usize)> {
        self.boxes.iter().zip(self.labels.iter().cloned())
    }
}

/// Matched pairs of a batch sample.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchIndices {
    /// The prediction slots, indexing the `M` axis.
    pub pred_indices: Vec<usize>,
    /// The ground truth object each slot is matched to.
    pub target_indices: Vec<usize>,
}

impl MatchIndices {
    pub fn len(&self) -> usize {
        self.pred_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pred_indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.pred_indices
            .iter()
            .cloned()
            .zip(self.target_indices.iter().cloned())
    }
}
