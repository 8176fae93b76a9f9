use crate::common::*;

/// A checked box size, e.g. an anchor size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HW<T> {
    h: T,
    w: T,
}

impl<T> HW<T>
where
    T: Num + PartialOrd + Copy,
{
    pub fn try_from_hw(hw: [T; 2]) -> Result<Self> {
        let [h, w] = hw;
        let zero = T::zero();
        ensure!(
            h >= zero && w >= zero,
            "height and width parameters must be non-negative"
        );
        Ok(Self { h, w })
    }

    /// Build from a `[w, h]` pair, the order anchor lists are written in.
    pub fn try_from_wh(wh: [T; 2]) -> Result<Self> {
        let [w, h] = wh;
        Self::try_from_hw([h, w])
    }

    pub fn area(&self) -> T {
        self.w * self.h
    }

    pub fn w(&self) -> T {
        self.w
    }

    pub fn h(&self) -> T {
        self.h
    }
}

impl<T> HW<T>
where
    T: Float,
{
    /// IoU of two sizes placed at the same center, ignoring position.
    pub fn iou_with(&self, other: &Self) -> T {
        let zero = T::zero();
        let inter_area = self.h.min(other.h) * self.w.min(other.w);
        let union_area = self.area() + other.area() - inter_area;
        if union_area > zero {
            inter_area / union_area
        } else {
            zero
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn size_area() {
        let s1 = HW::try_from_hw([3.0, 2.0]).unwrap();
        let area: f64 = s1.area();
        assert_abs_diff_eq!(area, 6.0);
    }

    #[test]
    fn size_iou() {
        let s1 = HW::try_from_wh([2.0, 4.0]).unwrap();
        let s2 = HW::try_from_wh([4.0, 2.0]).unwrap();
        // intersection 2x2, union 8 + 8 - 4
        assert_abs_diff_eq!(s1.iou_with(&s2), 4.0 / 12.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s1.iou_with(&s1), 1.0);
    }
}
