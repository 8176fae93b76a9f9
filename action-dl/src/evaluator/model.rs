use crate::common::*;

/// How a detector consumes clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// One clip at a time in video order. The detector may keep state
    /// between consecutive clips of a video.
    Stream,
    /// Independent mini-batches of clips.
    Clip,
}

/// A key frame detection before it is attached to its video and second.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// Box corners in `[x1, y1, x2, y2]` order.
    pub xyxy: [f64; 4],
    /// One score per action class, class `i` having label id `i + 1`.
    pub class_scores: Vec<f64>,
}

/// A spatio-temporal action detector driven by the evaluator.
pub trait ActionDetector {
    type Clip;

    fn set_inference_mode(&mut self, mode: InferenceMode);

    /// Signal that the next clip starts a new video.
    fn new_video(&mut self);

    fn detect(&mut self, clip: &Self::Clip) -> Result<Vec<RawDetection>>;

    fn detect_batch(&mut self, clips: &[Self::Clip]) -> Result<Vec<Vec<RawDetection>>> {
        clips.iter().map(|clip| self.detect(clip)).collect()
    }
}
