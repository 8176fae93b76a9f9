//! Safe bounding box types and geometric functions.
//!
//! Boxes are stored as checked corners in [TLBR]. The [Rect] trait gives
//! access to the x1y1x2y2 and cxcywh views used by detection heads.

mod common;

pub use rect::*;
pub mod rect;

pub use tlbr::*;
pub mod tlbr;

pub use hw::*;
pub mod hw;

pub use pairwise::*;
pub mod pairwise;

pub mod prelude {
    pub use crate::rect::{Rect, RectFloat, RectNum};
}
