//! Pairwise box metrics between two box sets.

use crate::{common::*, Rect, RectFloat};

/// Pairwise IoU matrix together with the best partner of every row.
#[derive(Debug, Clone)]
pub struct PairwiseIou<T> {
    /// The `[N, M]` IoU matrix.
    pub iou: Array2<T>,
    /// The maximum IoU per row. It is zero for rows without any partner.
    pub max: Array1<T>,
    /// The column achieving the maximum per row, `None` if there are no columns.
    pub argmax: Vec<Option<usize>>,
}

/// Compute the `[N, M]` IoU matrix between two box sets.
pub fn pairwise_iou<T, A, B>(lhs: &[A], rhs: &[B]) -> Array2<T>
where
    T: Float,
    A: Rect<Type = T>,
    B: Rect<Type = T>,
{
    Array2::from_shape_fn((lhs.len(), rhs.len()), |(row, col)| {
        lhs[row].iou_with(&rhs[col])
    })
}

/// Compute the `[N, M]` GIoU matrix between two box sets.
pub fn pairwise_giou<T, A, B>(lhs: &[A], rhs: &[B]) -> Array2<T>
where
    T: Float,
    A: Rect<Type = T>,
    B: Rect<Type = T>,
{
    Array2::from_shape_fn((lhs.len(), rhs.len()), |(row, col)| {
        lhs[row].giou_with(&rhs[col])
    })
}

/// Compute the IoU matrix and the best partner per row.
///
/// An empty `rhs` yields an `[N, 0]` matrix, zero maxima and no partners,
/// so callers can keep per-row bookkeeping without special cases.
pub fn pairwise_iou_argmax<T, A, B>(lhs: &[A], rhs: &[B]) -> PairwiseIou<T>
where
    T: Float,
    A: Rect<Type = T>,
    B: Rect<Type = T>,
{
    let iou = pairwise_iou(lhs, rhs);
    let (max, argmax): (Vec<T>, Vec<Option<usize>>) = iou
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .cloned()
                .enumerate()
                .fold((T::zero(), None), |(best, best_index), (index, value)| {
                    match best_index {
                        Some(_) if value <= best => (best, best_index),
                        _ => (value, Some(index)),
                    }
                })
        })
        .unzip();

    PairwiseIou {
        iou,
        max: Array1::from(max),
        argmax,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RectNum, TLBR};
    use approx::assert_abs_diff_eq;

    fn boxes(xyxy: &[[f64; 4]]) -> Vec<TLBR<f64>> {
        xyxy.iter()
            .map(|&xyxy| TLBR::try_from_xyxy(xyxy).unwrap())
            .collect()
    }

    #[test]
    fn iou_matrix_and_argmax() {
        let lhs = boxes(&[[0.0, 0.0, 2.0, 2.0], [10.0, 10.0, 11.0, 11.0]]);
        let rhs = boxes(&[[0.0, 0.0, 1.0, 2.0], [0.0, 0.0, 2.0, 2.0]]);

        let PairwiseIou { iou, max, argmax } = pairwise_iou_argmax(&lhs, &rhs);
        assert_eq!(iou.dim(), (2, 2));
        assert_abs_diff_eq!(iou[[0, 0]], 0.5);
        assert_abs_diff_eq!(iou[[0, 1]], 1.0);
        assert_abs_diff_eq!(max[0], 1.0);
        assert_eq!(argmax[0], Some(1));

        // a row without overlap still reports its first column
        assert_abs_diff_eq!(max[1], 0.0);
        assert_eq!(argmax[1], Some(0));
    }

    #[test]
    fn empty_targets_keep_row_count() {
        let lhs = boxes(&[[0.0, 0.0, 2.0, 2.0], [1.0, 1.0, 3.0, 3.0]]);
        let rhs: Vec<TLBR<f64>> = vec![];

        let PairwiseIou { iou, max, argmax } = pairwise_iou_argmax(&lhs, &rhs);
        assert_eq!(iou.dim(), (2, 0));
        assert_eq!(max.len(), 2);
        assert!(max.iter().all(|&value| value == 0.0));
        assert_eq!(argmax, vec![None, None]);
    }

    #[test]
    fn giou_matrix_diagonal() {
        let lhs = boxes(&[[0.0, 0.0, 1.0, 1.0], [0.0, 0.0, 2.0, 2.0]]);
        let giou = pairwise_giou(&lhs, &lhs);
        assert_abs_diff_eq!(giou[[0, 0]], 1.0);
        assert_abs_diff_eq!(giou[[1, 1]], 1.0);
        assert_abs_diff_eq!(giou[[0, 1]], 0.25);
    }
}
