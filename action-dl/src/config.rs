//! Configuration format of training and evaluation programs.

use crate::common::*;

pub use criterion::*;
pub use dataset::*;
pub use evaluator::*;

/// The main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub criterion: CriterionConfig,
    pub evaluator: Option<AvaEvaluatorConfig>,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config = json5::from_str(&text)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }
}

mod dataset {
    use super::*;
    use crate::dataset::DatasetKind;

    /// Dataset options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        pub kind: DatasetKind,
        pub data_root: PathBuf,
        pub img_size: NonZeroUsize,
        /// The number of frames per clip.
        pub len_clip: NonZeroUsize,
        /// The frame interval between consecutive clip frames.
        pub sampling_rate: NonZeroUsize,
    }
}

mod criterion {
    use super::*;

    /// The target assignment strategy and its loss options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "matcher", rename_all = "snake_case")]
    pub enum CriterionConfig {
        UniformMatcher(UniformCriterionConfig),
        YoloMatcher(YoloCriterionConfig),
    }

    impl CriterionConfig {
        pub fn num_classes(&self) -> usize {
            match self {
                Self::UniformMatcher(config) => config.num_classes,
                Self::YoloMatcher(config) => config.num_classes,
            }
        }
    }

    /// Options of the uniform matching criterion.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UniformCriterionConfig {
        pub num_classes: usize,
        /// Predictions and anchors matched per object. Defaults to 4.
        pub topk: Option<usize>,
        /// Matched pairs whose anchor IoU is below this value are not positive. Defaults to 0.15.
        pub iou_t: Option<R64>,
        /// Predictions whose best IoU exceeds this value are ignored. Defaults to 0.7.
        pub igt: Option<R64>,
        /// Focal loss alpha. Defaults to 0.25.
        pub alpha: Option<R64>,
        /// Focal loss gamma. Defaults to 2.0.
        pub gamma: Option<R64>,
        /// Class probability weight in the matching cost. Defaults to 0.
        pub cost_class: Option<R64>,
        /// Defaults to 1.0.
        pub loss_cls_weight: Option<R64>,
        /// Defaults to 1.0.
        pub loss_reg_weight: Option<R64>,
    }

    /// Options of the YOLO-style criterion.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct YoloCriterionConfig {
        pub num_classes: usize,
        pub img_size: usize,
        pub stride: usize,
        /// Anchor sizes as `[w, h]` pairs in pixels.
        pub anchor_size: Vec<(R64, R64)>,
        /// Defaults to 0.5.
        pub ignore_thresh: Option<R64>,
        /// Defaults to 5.0.
        pub loss_obj_weight: Option<R64>,
        /// Defaults to 1.0.
        pub loss_noobj_weight: Option<R64>,
        /// Defaults to 1.0.
        pub loss_cls_weight: Option<R64>,
        /// Defaults to 1.0.
        pub loss_reg_weight: Option<R64>,
    }
}

mod evaluator {
    use super::*;

    /// AVA frame mAP evaluation options.
    ///
    /// Annotation files are located in `data_root/annotation_dir`, frames and
    /// frame lists in `data_root`.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AvaEvaluatorConfig {
        pub data_root: PathBuf,
        pub backup_dir: PathBuf,
        pub annotation_dir: PathBuf,
        pub frames_dir: PathBuf,
        pub frame_list: PathBuf,
        pub labelmap_file: PathBuf,
        pub val_exclusion_file: PathBuf,
        pub val_gt_box_list: PathBuf,
        pub version: AvaVersion,
        /// Evaluate on every annotated second instead of every 4th. Defaults to false.
        #[serde(default)]
        pub full_test_on_val: bool,
        /// The mini-batch size of batched inference. Defaults to 8.
        pub batch_size: Option<NonZeroUsize>,
    }

    impl AvaEvaluatorConfig {
        pub fn annotation_path(&self, file: impl AsRef<Path>) -> PathBuf {
            self.data_root.join(&self.annotation_dir).join(file)
        }

        pub fn labelmap_path(&self) -> PathBuf {
            self.annotation_path(&self.labelmap_file)
        }

        pub fn exclusion_path(&self) -> PathBuf {
            self.annotation_path(&self.val_exclusion_file)
        }

        pub fn gt_box_list_path(&self) -> PathBuf {
            self.annotation_path(&self.val_gt_box_list)
        }

        pub fn frames_path(&self) -> PathBuf {
            self.data_root.join(&self.frames_dir)
        }

        pub fn frame_list_path(&self) -> PathBuf {
            self.data_root.join(&self.frame_list)
        }
    }

    /// The AVA annotation version.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum AvaVersion {
        #[serde(rename = "v2.1")]
        V2_1,
        #[serde(rename = "v2.2")]
        V2_2,
        #[serde(rename = "pose")]
        Pose,
    }

    impl AvaVersion {
        pub fn as_str(&self) -> &'static str {
            match self {
                Self::V2_1 => "v2.1",
                Self::V2_2 => "v2.2",
                Self::Pose => "pose",
            }
        }
    }

    impl fmt::Display for AvaVersion {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }
}
