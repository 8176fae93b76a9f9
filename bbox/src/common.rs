pub use anyhow::{ensure, Result};
pub use ndarray::{Array1, Array2, Axis};
pub use num_traits::{Float, Num};
pub use serde::{Deserialize, Serialize};
