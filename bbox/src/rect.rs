use super::TLBR;
use num_traits::Zero;
use crate::common::*;

/// The generic rectangle.
///
/// The y-axis comes first in the accessor and array conventions of this
/// trait. The `xyxy`/`cxcywh` helpers of [RectNum] provide the x-first
/// layouts used by detection heads and annotation files.
pub trait Rect {
    type Type;

    fn t(&self) -> Self::Type;
    fn l(&self) -> Self::Type;
    fn b(&self) -> Self::Type;
    fn r(&self) -> Self::Type;
    fn cy(&self) -> Self::Type;
    fn cx(&self) -> Self::Type;
    fn h(&self) -> Self::Type;
    fn w(&self) -> Self::Type;

    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_cycxhw(cycxhw: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;
}

pub trait RectNum: Rect
where
    Self::Type: Num + PartialOrd + Copy,
{
    /// Build from corners in `[x1, y1, x2, y2]` order.
    fn try_from_xyxy(xyxy: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized,
    {
        let [x1, y1, x2, y2] = xyxy;
        Self::try_from_tlbr([y1, x1, y2, x2])
    }

    /// Build from center and size in `[cx, cy, w, h]` order.
    fn try_from_cxcywh(cxcywh: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized,
    {
        let [cx, cy, w, h] = cxcywh;
        Self::try_from_cycxhw([cy, cx, h, w])
    }

    fn tlbr(&self) -> [Self::Type; 4] {
        [self.t(), self.l(), self.b(), self.r()]
    }

    fn cycxhw(&self) -> [Self::Type; 4] {
        [self.cy(), self.cx(), self.h(), self.w()]
    }

    fn xyxy(&self) -> [Self::Type; 4] {
        [self.l(), self.t(), self.r(), self.b()]
    }

    fn cxcywh(&self) -> [Self::Type; 4] {
        [self.cx(), self.cy(), self.w(), self.h()]
    }

    fn to_tlbr(&self) -> TLBR<Self::Type> {
        TLBR {
            t: self.t(),
            l: self.l(),
            b: self.b(),
            r: self.r(),
        }
    }

    fn area(&self) -> Self::Type {
        self.h() * self.w()
    }
}

pub trait RectFloat: RectNum
where
    Self::Type: Float,
{
    /// The smallest box enclosing both boxes.
    fn closure_with<R>(&self, other: &R) -> TLBR<Self::Type>
    where
        R: Rect<Type = Self::Type>,
    {
        TLBR {
            t: self.t().min(other.t()),
            l: self.l().min(other.l()),
            b: self.b().max(other.b()),
            r: self.r().max(other.r()),
        }
    }

    fn intersect_with<R>(&self, other: &R) -> Option<TLBR<Self::Type>>
    where
        R: Rect<Type = Self::Type>,
    {
        let t = self.t().max(other.t());
        let l = self.l().max(other.l());
        let b = self.b().min(other.b());
        let r = self.r().min(other.r());
        (b > t && r > l).then(|| TLBR { t, l, b, r })
    }

    fn intersection_area_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        self.intersect_with(other)
            .map(|rect| rect.area())
            .unwrap_or_else(Self::Type::zero)
    }

    /// Intersection over union. Zero when the union is empty.
    fn iou_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let zero = Self::Type::zero();
        let inter_area = self.intersection_area_with(other);
        let union_area = self.area() + other.h() * other.w() - inter_area;
        if union_area > zero {
            inter_area / union_area
        } else {
            zero
        }
    }

    /// Generalized IoU, penalizing the part of the enclosing box not
    /// covered by the union. It lies in `[-1, 1]` and never exceeds the IoU.
    fn giou_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let zero = Self::Type::zero();
        let inter_area = self.intersection_area_with(other);
        let union_area = self.area() + other.h() * other.w() - inter_area;
        let closure_area = self.closure_with(other).area();

        let iou = if union_area > zero {
            inter_area / union_area
        } else {
            zero
        };

        if closure_area > zero {
            iou - (closure_area - union_area) / closure_area
        } else {
            iou
        }
    }
}

impl<T> RectNum for T
where
    T: Rect,
    T::Type: Num + PartialOrd + Copy,
{
}

impl<T> RectFloat for T
where
    T: Rect,
    T::Type: Float,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::prelude::*;

    #[test]
    fn iou_with_itself_is_one() {
        let rect = TLBR::try_from_xyxy([10.0, 20.0, 40.0, 60.0]).unwrap();
        assert_abs_diff_eq!(rect.iou_with(&rect), 1.0);
        assert_abs_diff_eq!(rect.giou_with(&rect), 1.0);
    }

    #[test]
    fn disjoint_boxes() {
        let lhs = TLBR::try_from_xyxy([0.0, 0.0, 1.0, 1.0]).unwrap();
        let rhs = TLBR::try_from_xyxy([2.0, 0.0, 3.0, 1.0]).unwrap();
        assert_abs_diff_eq!(lhs.iou_with(&rhs), 0.0);

        // enclosing box has area 3, union has area 2
        assert_abs_diff_eq!(lhs.giou_with(&rhs), -1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_area_box_does_not_divide_by_zero() {
        let point = TLBR::try_from_xyxy([1.0, 1.0, 1.0, 1.0]).unwrap();
        let rect = TLBR::try_from_xyxy([0.0, 0.0, 2.0, 2.0]).unwrap();
        assert_abs_diff_eq!(point.iou_with(&point), 0.0);
        assert_abs_diff_eq!(point.iou_with(&rect), 0.0);
        assert!(point.giou_with(&point).is_finite());
    }

    #[test]
    fn giou_equals_iou_when_union_fills_closure() {
        // two halves of the same square
        let lhs = TLBR::try_from_xyxy([0.0, 0.0, 2.0, 2.0]).unwrap();
        let rhs = TLBR::try_from_xyxy([0.0, 0.0, 2.0, 1.0]).unwrap();
        assert_abs_diff_eq!(lhs.iou_with(&rhs), 0.5);
        assert_abs_diff_eq!(lhs.giou_with(&rhs), lhs.iou_with(&rhs));
    }

    #[test]
    fn giou_never_exceeds_iou() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut random_box = || {
            let x1: f64 = rng.gen_range(0.0..100.0);
            let y1: f64 = rng.gen_range(0.0..100.0);
            let w: f64 = rng.gen_range(0.1..50.0);
            let h: f64 = rng.gen_range(0.1..50.0);
            TLBR::try_from_xyxy([x1, y1, x1 + w, y1 + h]).unwrap()
        };

        for _ in 0..1000 {
            let lhs = random_box();
            let rhs = random_box();
            let iou = lhs.iou_with(&rhs);
            let giou = lhs.giou_with(&rhs);
            assert!(giou <= iou + 1e-12);
            assert!((-1.0..=1.0).contains(&giou));
            assert!((0.0..=1.0).contains(&iou));
        }
    }

    #[test]
    fn xyxy_cxcywh_round_trip() {
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..1000 {
            let cx: f64 = rng.gen_range(0.0..1.0);
            let cy: f64 = rng.gen_range(0.0..1.0);
            let w: f64 = rng.gen_range(1e-3..1.0);
            let h: f64 = rng.gen_range(1e-3..1.0);

            let tlbr = TLBR::try_from_cxcywh([cx, cy, w, h]).unwrap();
            let xyxy = tlbr.xyxy();
            let back = TLBR::try_from_xyxy(xyxy).unwrap().cxcywh();

            assert_abs_diff_eq!(back[0], cx, epsilon = 1e-9);
            assert_abs_diff_eq!(back[1], cy, epsilon = 1e-9);
            assert_abs_diff_eq!(back[2], w, epsilon = 1e-9);
            assert_abs_diff_eq!(back[3], h, epsilon = 1e-9);
        }
    }
}
