use super::{
    accumulator::{DetectionAccumulator, DetectionRecord},
    ava::{read_csv, read_exclusions, read_labelmap, write_results, AvaTable, Category, ImageKey},
    model::{ActionDetector, InferenceMode},
    pascal::{PascalEvaluator, PascalMetrics},
};
use crate::{
    common::*,
    config::{AvaEvaluatorConfig, AvaVersion},
    dataset::{collate, AvaFrameLists, DatasetSplit, KeyFrameDataset, KeyFrameInfo},
};

const NUM_POSE_CLASSES: usize = 14;
const DEFAULT_BATCH_SIZE: usize = 8;
const STREAM_LOG_INTERVAL: usize = 500;
const BATCH_LOG_INTERVAL: usize = 100;

/// Frame mAP evaluation on the AVA validation set.
#[derive(Debug, Getters, CopyGetters)]
pub struct AvaEvaluator {
    #[getset(get_copy = "pub")]
    version: AvaVersion,
    #[getset(get_copy = "pub")]
    full_test_on_val: bool,
    #[getset(get_copy = "pub")]
    batch_size: usize,
    #[getset(get = "pub")]
    backup_dir: PathBuf,
    #[getset(get = "pub")]
    output_json: PathBuf,
    #[getset(get = "pub")]
    excluded_keys: HashSet<ImageKey>,
    #[getset(get = "pub")]
    categories: Vec<Category>,
    #[getset(get = "pub")]
    class_whitelist: IndexSet<usize>,
    #[getset(get = "pub")]
    full_groundtruth: AvaTable,
    #[getset(get = "pub")]
    mini_groundtruth: AvaTable,
    #[getset(get = "pub")]
    video_names: IndexSet<String>,
}

impl AvaEvaluator {
    pub fn new(config: &AvaEvaluatorConfig) -> Result<Self> {
        let version = config.version;

        let excluded_keys = read_exclusions(config.exclusion_path())?;
        let (mut categories, mut class_whitelist) = read_labelmap(config.labelmap_path())?;
        if version == AvaVersion::Pose {
            categories.truncate(NUM_POSE_CLASSES);
            class_whitelist = categories.iter().map(|category| category.id).collect();
        }

        let full_groundtruth = read_csv(config.gt_box_list_path(), Some(&class_whitelist))?;
        let mini_groundtruth = full_groundtruth.mini();
        let AvaFrameLists { video_names, .. } = AvaFrameLists::load(
            config.frames_path(),
            config.frame_list_path(),
            DatasetSplit::Test,
        )?;

        let backup_dir = config.backup_dir.join(format!("ava_{}", version));
        fs::create_dir_all(&backup_dir).with_context(|| {
            format!("failed to create backup directory '{}'", backup_dir.display())
        })?;
        let output_json = backup_dir.join("ava_detections.json");

        Ok(Self {
            version,
            full_test_on_val: config.full_test_on_val,
            batch_size: config
                .batch_size
                .map(NonZeroUsize::get)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            backup_dir,
            output_json,
            excluded_keys,
            categories,
            class_whitelist,
            full_groundtruth,
            mini_groundtruth,
            video_names,
        })
    }

    /// Run the detector clip by clip, resetting its state at every new video.
    pub fn infer_stream<D, M>(
        &self,
        dataset: &D,
        model: &mut M,
        mut accumulator: DetectionAccumulator,
    ) -> Result<DetectionAccumulator>
    where
        D: KeyFrameDataset<Key = KeyFrameInfo>,
        M: ActionDetector<Clip = D::Clip>,
    {
        model.set_inference_mode(InferenceMode::Stream);
        let num_samples = dataset.len();
        let mut prev_video = None;

        for index in 0..num_samples {
            let sample = dataset.sample(index)?;
            let key = sample.key;

            if prev_video != Some(key.video_index) {
                prev_video = Some(key.video_index);
                model.new_video();
            }

            let detections = model.detect(&sample.clip)?;
            accumulator.extend(
                detections
                    .into_iter()
                    .filter_map(|detection| DetectionRecord::new(detection, key)),
            );

            if index % STREAM_LOG_INTERVAL == 0 {
                info!("[{} / {}]", index, num_samples);
            }
        }

        Ok(accumulator)
    }

    /// Run the detector on mini-batches of independent clips.
    pub fn infer_batched<D, M>(
        &self,
        dataset: &D,
        model: &mut M,
        mut accumulator: DetectionAccumulator,
    ) -> Result<DetectionAccumulator>
    where
        D: KeyFrameDataset<Key = KeyFrameInfo>,
        M: ActionDetector<Clip = D::Clip>,
    {
        model.set_inference_mode(InferenceMode::Clip);
        let num_samples = dataset.len();
        let num_batches = (num_samples + self.batch_size - 1) / self.batch_size;

        for (batch_index, indices) in (0..num_samples)
            .chunks(self.batch_size)
            .into_iter()
            .enumerate()
        {
            let samples: Vec<_> = indices.map(|index| dataset.sample(index)).try_collect()?;
            let batch = collate(samples);

            let outputs = model.detect_batch(&batch.clips)?;
            ensure!(
                outputs.len() == batch.len(),
                "the detector returns {} outputs for a batch of {} clips",
                outputs.len(),
                batch.len()
            );

            for (&key, detections) in izip!(&batch.keys, outputs) {
                accumulator.extend(
                    detections
                        .into_iter()
                        .filter_map(|detection| DetectionRecord::new(detection, key)),
                );
            }

            if batch_index % BATCH_LOG_INTERVAL == 0 {
                info!("[{} / {}]", batch_index, num_batches);
            }
        }

        Ok(accumulator)
    }

    /// Compute the frame mAP of the accumulated detections.
    pub fn calculate_map(&self, accumulator: &DetectionAccumulator, epoch: usize) -> Result<f64> {
        let detections = accumulator.finalize(&self.video_names, &self.class_whitelist)?;
        let metrics = self.evaluate_table(&detections, epoch)?;
        Ok(metrics.mean_ap)
    }

    /// Evaluate a detection table and save the artifacts of this epoch.
    pub fn evaluate_table(&self, detections: &AvaTable, epoch: usize) -> Result<PascalMetrics> {
        let since = Instant::now();
        let groundtruth = if self.full_test_on_val {
            &self.full_groundtruth
        } else {
            &self.mini_groundtruth
        };

        info!("Evaluating with {} unique GT frames.", groundtruth.num_images());
        info!(
            "Evaluating with {} unique detection frames",
            detections.num_images()
        );

        write_results(
            detections,
            self.backup_dir.join(format!("detections_{}.csv", epoch)),
        )?;
        write_results(
            groundtruth,
            self.backup_dir.join(format!("groundtruth_{}.csv", epoch)),
        )?;

        let metrics = run_evaluation(
            &self.categories,
            groundtruth,
            detections,
            &self.excluded_keys,
        )?;

        let writer = BufWriter::new(File::create(&self.output_json).with_context(|| {
            format!("failed to create '{}'", self.output_json.display())
        })?);
        serde_json::to_writer(writer, &metrics.to_map())?;
        info!("Save eval results in {}", self.output_json.display());
        info!(
            "AVA eval done in {:.3} seconds.",
            since.elapsed().as_secs_f64()
        );

        Ok(metrics)
    }

    /// Stream inference followed by evaluation. The returned accumulator is empty.
    pub fn evaluate_frame_map_stream<D, M>(
        &self,
        dataset: &D,
        model: &mut M,
        accumulator: DetectionAccumulator,
        epoch: usize,
    ) -> Result<(f64, DetectionAccumulator)>
    where
        D: KeyFrameDataset<Key = KeyFrameInfo>,
        M: ActionDetector<Clip = D::Clip>,
    {
        let mut accumulator = self.infer_stream(dataset, model, accumulator)?;
        let map = self.calculate_map(&accumulator, epoch)?;
        info!("mAP: {}", map);
        accumulator.reset();
        Ok((map, accumulator))
    }

    /// Batched inference followed by evaluation. The returned accumulator is empty.
    pub fn evaluate_frame_map<D, M>(
        &self,
        dataset: &D,
        model: &mut M,
        accumulator: DetectionAccumulator,
        epoch: usize,
    ) -> Result<(f64, DetectionAccumulator)>
    where
        D: KeyFrameDataset<Key = KeyFrameInfo>,
        M: ActionDetector<Clip = D::Clip>,
    {
        let mut accumulator = self.infer_batched(dataset, model, accumulator)?;
        let map = self.calculate_map(&accumulator, epoch)?;
        info!("mAP: {}", map);
        accumulator.reset();
        Ok((map, accumulator))
    }
}

/// Run the Pascal VOC evaluation, skipping excluded image keys.
pub fn run_evaluation(
    categories: &[Category],
    groundtruth: &AvaTable,
    detections: &AvaTable,
    excluded_keys: &HashSet<ImageKey>,
) -> Result<PascalMetrics> {
    let mut evaluator = PascalEvaluator::new(categories.to_vec())?;

    for (key, labels) in groundtruth.iter() {
        if excluded_keys.contains(key) {
            info!(
                "Found excluded timestamp in ground truth: {}. It will be ignored.",
                key
            );
            continue;
        }
        evaluator.add_ground_truth(key, labels)?;
    }

    for (key, labels) in detections.iter() {
        if excluded_keys.contains(key) {
            info!(
                "Found excluded timestamp in detections: {}. It will be ignored.",
                key
            );
            continue;
        }
        evaluator.add_detections(key, labels)?;
    }

    Ok(evaluator.evaluate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::KeyFrameSample,
        evaluator::{ava::AvaLabel, pascal::MAP_METRIC, RawDetection},
    };
    use approx::assert_abs_diff_eq;

    struct MockDataset {
        keys: Vec<KeyFrameInfo>,
    }

    impl KeyFrameDataset for MockDataset {
        type Key = KeyFrameInfo;
        type Clip = usize;

        fn len(&self) -> usize {
            self.keys.len()
        }

        fn sample(&self, index: usize) -> Result<KeyFrameSample<KeyFrameInfo, usize>> {
            Ok(KeyFrameSample {
                key: self.keys[index],
                clip: index,
                targets: Array2::zeros((0, 5)),
            })
        }
    }

    /// Returns fixed detections per clip and records how it is driven.
    #[derive(Default)]
    struct MockDetector {
        detections: Vec<Vec<RawDetection>>,
        mode: Option<InferenceMode>,
        num_new_videos: usize,
        batch_sizes: Vec<usize>,
    }

    impl ActionDetector for MockDetector {
        type Clip = usize;

        fn set_inference_mode(&mut self, mode: InferenceMode) {
            self.mode = Some(mode);
        }

        fn new_video(&mut self) {
            self.num_new_videos += 1;
        }

        fn detect(&mut self, clip: &usize) -> Result<Vec<RawDetection>> {
            Ok(self.detections[*clip].clone())
        }

        fn detect_batch(&mut self, clips: &[usize]) -> Result<Vec<Vec<RawDetection>>> {
            self.batch_sizes.push(clips.len());
            Ok(clips
                .iter()
                .map(|&clip| self.detections[clip].clone())
                .collect())
        }
    }

    fn detector() -> MockDetector {
        let detection = |xyxy: [f64; 4], class_scores: [f64; 3]| RawDetection {
            xyxy,
            class_scores: class_scores.to_vec(),
        };

        MockDetector {
            detections: vec![
                vec![detection([0.1, 0.1, 0.5, 0.5], [0.9, 0.2, 0.0])],
                vec![detection([0.2, 0.2, 0.6, 0.6], [0.95, 0.1, 0.0])],
                vec![detection([0.3, 0.3, 0.9, 0.9], [0.3, 0.8, 0.0])],
            ],
            ..MockDetector::default()
        }
    }

    fn dataset() -> MockDataset {
        MockDataset {
            keys: vec![
                KeyFrameInfo {
                    video_index: 0,
                    timestamp: 904,
                },
                KeyFrameInfo {
                    video_index: 0,
                    timestamp: 905,
                },
                KeyFrameInfo {
                    video_index: 1,
                    timestamp: 908,
                },
            ],
        }
    }

    fn write_fixture(root: &Path) -> Result<()> {
        let annotation_dir = root.join("annotations");
        let frame_list_dir = root.join("frame_lists");
        fs::create_dir_all(&annotation_dir)?;
        fs::create_dir_all(&frame_list_dir)?;

        fs::write(
            annotation_dir.join("labelmap.pbtxt"),
            "item {\n  name: \"bend\"\n  id: 1\n}\n\
             item {\n  name: \"crouch\"\n  id: 2\n}\n\
             item {\n  name: \"dance\"\n  id: 3\n}\n",
        )?;
        fs::write(annotation_dir.join("excluded.csv"), "vidB,0910\n")?;
        fs::write(
            annotation_dir.join("val.csv"),
            "vidA,0904,0.1,0.1,0.5,0.5,1\n\
             vidA,0905,0.2,0.2,0.6,0.6,1\n\
             vidB,0908,0.3,0.3,0.9,0.9,2\n",
        )?;
        fs::write(
            frame_list_dir.join("val.csv"),
            "original_vido_id video_id frame_id path labels\n\
             vidA 0 0 vidA/vidA_000001.jpg \"\"\n\
             vidB 1 0 vidB/vidB_000001.jpg \"\"\n",
        )?;
        Ok(())
    }

    fn evaluator(root: &Path, full_test_on_val: bool) -> Result<AvaEvaluator> {
        let config: AvaEvaluatorConfig = json5::from_str(&format!(
            r#"{{
                data_root: "{}",
                backup_dir: "{}",
                annotation_dir: "annotations",
                frames_dir: "frames",
                frame_list: "frame_lists",
                labelmap_file: "labelmap.pbtxt",
                val_exclusion_file: "excluded.csv",
                val_gt_box_list: "val.csv",
                version: "v2.2",
                full_test_on_val: {},
                batch_size: 2,
            }}"#,
            root.display(),
            root.join("results").display(),
            full_test_on_val
        ))?;
        AvaEvaluator::new(&config)
    }

    #[test]
    fn construct_from_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_fixture(dir.path())?;
        let evaluator = evaluator(dir.path(), false)?;

        assert_eq!(evaluator.categories().len(), 3);
        assert_eq!(evaluator.full_groundtruth().num_images(), 3);
        assert_eq!(evaluator.mini_groundtruth().num_images(), 2);
        assert_eq!(evaluator.video_names().len(), 2);
        assert_eq!(evaluator.batch_size(), 2);
        assert!(evaluator
            .excluded_keys()
            .contains(&ImageKey::new("vidB", 910)));
        assert_eq!(
            evaluator.output_json(),
            &dir.path().join("results/ava_v2.2/ava_detections.json")
        );
        Ok(())
    }

    #[test]
    fn stream_and_batched_agree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_fixture(dir.path())?;
        let evaluator = evaluator(dir.path(), false)?;
        let dataset = dataset();

        let mut stream_model = detector();
        let (stream_map, accumulator) = evaluator.evaluate_frame_map_stream(
            &dataset,
            &mut stream_model,
            DetectionAccumulator::new(),
            1,
        )?;
        assert!(accumulator.is_empty());
        assert_eq!(stream_model.mode, Some(InferenceMode::Stream));
        assert_eq!(stream_model.num_new_videos, 2);

        let mut batch_model = detector();
        let (batch_map, accumulator) =
            evaluator.evaluate_frame_map(&dataset, &mut batch_model, accumulator, 2)?;
        assert!(accumulator.is_empty());
        assert_eq!(batch_model.mode, Some(InferenceMode::Clip));
        assert_eq!(batch_model.num_new_videos, 0);
        assert_eq!(batch_model.batch_sizes, vec![2, 1]);

        // the best class 1 detection is on a second outside the mini ground truth
        assert_abs_diff_eq!(stream_map, 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(batch_map, stream_map, epsilon = 1e-12);

        let backup_dir = evaluator.backup_dir();
        assert!(backup_dir.join("detections_1.csv").is_file());
        assert!(backup_dir.join("groundtruth_2.csv").is_file());

        let metrics: IndexMap<String, Option<f64>> =
            serde_json::from_str(&fs::read_to_string(evaluator.output_json())?)?;
        assert_abs_diff_eq!(metrics[MAP_METRIC].unwrap(), 0.75, epsilon = 1e-12);
        assert_eq!(
            metrics["PascalBoxes_PerformanceByCategory/AP@0.5IOU/dance"],
            None
        );
        Ok(())
    }

    #[test]
    fn flipped_detection_box_is_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_fixture(dir.path())?;
        let evaluator = evaluator(dir.path(), false)?;
        let dataset = dataset();

        let flipped = RawDetection {
            xyxy: [0.6, 0.1, 0.4, 0.5],
            class_scores: vec![1.0, 1.0, 1.0],
        };
        let mut stream_model = detector();
        stream_model.detections[0].push(flipped.clone());
        let mut batch_model = detector();
        batch_model.detections[0].push(flipped);

        let accumulator =
            evaluator.infer_stream(&dataset, &mut stream_model, DetectionAccumulator::new())?;
        assert_eq!(accumulator.len(), 3);
        assert_abs_diff_eq!(evaluator.calculate_map(&accumulator, 0)?, 0.75, epsilon = 1e-12);

        let (batch_map, _) = evaluator.evaluate_frame_map(
            &dataset,
            &mut batch_model,
            DetectionAccumulator::new(),
            0,
        )?;
        assert_abs_diff_eq!(batch_map, 0.75, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn full_ground_truth() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_fixture(dir.path())?;
        let evaluator = evaluator(dir.path(), true)?;

        let accumulator =
            evaluator.infer_stream(&dataset(), &mut detector(), DetectionAccumulator::new())?;
        assert_eq!(accumulator.len(), 3);
        assert_abs_diff_eq!(evaluator.calculate_map(&accumulator, 0)?, 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn excluded_keys_are_skipped() -> Result<()> {
        let categories = vec![Category {
            id: 1,
            name: "bend".to_string(),
        }];
        let label = AvaLabel {
            rect: TLBR::try_from_xyxy([0.0, 0.0, 0.5, 0.5])?,
            class: 1,
            score: 0.9,
        };

        let mut groundtruth = AvaTable::new();
        groundtruth.push(ImageKey::new("vid", 902), label.clone());
        groundtruth.push(ImageKey::new("vid", 903), label.clone());
        let mut detections = AvaTable::new();
        detections.push(ImageKey::new("vid", 902), label);

        let excluded = HashSet::from_iter([ImageKey::new("vid", 903)]);
        let metrics = run_evaluation(&categories, &groundtruth, &detections, &excluded)?;
        assert_abs_diff_eq!(metrics.mean_ap, 1.0);

        let metrics = run_evaluation(&categories, &groundtruth, &detections, &HashSet::new())?;
        assert_abs_diff_eq!(metrics.mean_ap, 0.5);
        Ok(())
    }
}
