//! Dataset contracts and helpers for UCF24, JHMDB21 and AVA.

mod ava;
mod kind;
mod ucf_jhmdb;

pub use ava::*;
pub use kind::*;
pub use ucf_jhmdb::*;

use crate::common::*;

/// The partition of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSplit {
    Train,
    Test,
}

/// Identifies the key frame of an AVA clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyFrameInfo {
    /// Index into the video names of the frame list.
    pub video_index: usize,
    /// The second of the key frame within the video.
    pub timestamp: i64,
}

/// A clip paired with its key frame identity and key frame targets.
#[derive(Debug, Clone)]
pub struct KeyFrameSample<K, C> {
    pub key: K,
    pub clip: C,
    /// `[num_objects, 5]` rows of `[x1, y1, x2, y2, label]`.
    pub targets: Array2<f64>,
}

/// A random access dataset of key frame samples.
pub trait KeyFrameDataset {
    type Key;
    type Clip;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sample(&self, index: usize) -> Result<KeyFrameSample<Self::Key, Self::Clip>>;
}

/// A mini-batch of samples in dataset order.
#[derive(Debug, Clone)]
pub struct KeyFrameBatch<K, C> {
    pub keys: Vec<K>,
    pub clips: Vec<C>,
    pub targets: Vec<Array2<f64>>,
}

impl<K, C> KeyFrameBatch<K, C> {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Group samples into a batch, keeping their order.
pub fn collate<K, C>(samples: impl IntoIterator<Item = KeyFrameSample<K, C>>) -> KeyFrameBatch<K, C> {
    let (keys, clips, targets) = samples
        .into_iter()
        .map(|sample| {
            let KeyFrameSample { key, clip, targets } = sample;
            (key, clip, targets)
        })
        .unzip_n_vec();

    KeyFrameBatch {
        keys,
        clips,
        targets,
    }
}
