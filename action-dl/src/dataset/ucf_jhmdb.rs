use super::{DatasetKind, DatasetSplit, KeyFrameDataset, KeyFrameSample};
use crate::common::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Training clips step back 1 or 2 frames at random.
const TRAIN_SAMPLING_RATES: [usize; 2] = [1, 2];

/// Frame ids of a clip ending at `key_frame`, oldest first.
///
/// Frame `i` steps back `i * sampling_rate` frames from the key frame. Ids
/// before the first frame repeat frame 1 and ids past `max_num` repeat
/// `max_num`.
pub fn clip_frame_ids(
    key_frame: usize,
    len_clip: usize,
    sampling_rate: usize,
    max_num: usize,
) -> Vec<usize> {
    (0..len_clip)
        .rev()
        .map(|step| {
            let id = key_frame as i64 - (step * sampling_rate) as i64;
            if id < 1 {
                1
            } else if id as usize > max_num {
                max_num
            } else {
                id as usize
            }
        })
        .collect()
}

/// A key frame entry of a split list, e.g. `labels/Basketball/v_Basketball_g08_c01/00070.txt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UcfJhmdbEntry {
    pub class_name: String,
    pub video_name: String,
    pub file_name: String,
    pub frame_index: usize,
}

impl UcfJhmdbEntry {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let components: Vec<&str> = line.split('/').collect();
        ensure!(
            components.len() >= 4,
            "expect a 'labels/class/video/frame.txt' entry, but get '{}'",
            line
        );
        let [class_name, video_name, file_name] = [1, 2, 3].map(|index| components[index]);

        let frame_index: usize = file_name
            .get(..5)
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| format_err!("invalid frame file name '{}'", file_name))?;

        Ok(Self {
            class_name: class_name.to_string(),
            video_name: video_name.to_string(),
            file_name: file_name.to_string(),
            frame_index,
        })
    }

    /// The identity string `{class}_{video}_{file}`.
    pub fn frame_id(&self) -> String {
        format!("{}_{}_{}", self.class_name, self.video_name, self.file_name)
    }

    pub fn label_path(&self, data_root: &Path) -> PathBuf {
        data_root
            .join("labels")
            .join(&self.class_name)
            .join(&self.video_name)
            .join(format!("{:05}.txt", self.frame_index))
    }

    pub fn frame_dir(&self, data_root: &Path) -> PathBuf {
        data_root
            .join("rgb-images")
            .join(&self.class_name)
            .join(&self.video_name)
    }
}

/// The frame file name of a dataset, `{:05}.jpg` for UCF24 and `{:05}.png` for JHMDB21.
pub fn frame_file_name(kind: DatasetKind, frame_id: usize) -> Result<String> {
    let name = match kind {
        DatasetKind::Ucf24 => format!("{:05}.jpg", frame_id),
        DatasetKind::Jhmdb21 => format!("{:05}.png", frame_id),
        _ => bail!("the dataset '{}' is not a UCF24 or JHMDB21 dataset", kind),
    };
    Ok(name)
}

/// Load an annotation file of `label x1 y1 x2 y2` rows with 1-based labels.
///
/// Returns `[num_objects, 5]` rows of `[x1, y1, x2, y2, label - 1]`.
pub fn load_annotation(path: impl AsRef<Path>) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read annotation file '{}'", path.display()))?;
    parse_annotation(&text)
        .with_context(|| format!("failed to parse annotation file '{}'", path.display()))
}

fn parse_annotation(text: &str) -> Result<Array2<f64>> {
    let rows: Vec<[f64; 5]> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(line_index, line)| -> Result<_> {
            let values: Vec<f64> = line
                .split_whitespace()
                .map(|token| token.parse::<f64>())
                .try_collect()
                .with_context(|| format!("invalid number at line {}", line_index + 1))?;
            ensure!(
                values.len() == 5,
                "expect 5 values at line {}, but get {}",
                line_index + 1,
                values.len()
            );
            let label = values[0];
            ensure!(
                label >= 1.0 && label.fract() == 0.0,
                "labels must be 1-based integers, but get {}",
                label
            );
            Ok([values[1], values[2], values[3], values[4], label - 1.0])
        })
        .try_collect()?;

    let num_rows = rows.len();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((num_rows, 5), flat)?)
}

/// Scale pixel boxes of target rows into normalized coordinates.
pub fn normalize_targets(targets: &Array2<f64>, width: f64, height: f64) -> Result<Array2<f64>> {
    ensure!(
        width > 0.0 && height > 0.0,
        "image size must be positive"
    );
    let mut normalized = targets.clone();
    for mut row in normalized.outer_iter_mut() {
        row[0] /= width;
        row[1] /= height;
        row[2] /= width;
        row[3] /= height;
    }
    Ok(normalized)
}

/// The frames and annotation of a UCF24 or JHMDB21 key frame.
#[derive(Debug, Clone)]
pub struct UcfJhmdbClip {
    /// Frame file paths, oldest first.
    pub frame_paths: Vec<PathBuf>,
}

/// The UCF24 or JHMDB21 dataset indexed by its split list.
///
/// Test clips use the configured sampling rate. Training clips draw theirs
/// from 1 and 2 for every sample.
#[derive(Debug, Getters, CopyGetters)]
pub struct UcfJhmdbDataset {
    #[getset(get = "pub")]
    data_root: PathBuf,
    #[getset(get_copy = "pub")]
    kind: DatasetKind,
    #[getset(get_copy = "pub")]
    split: DatasetSplit,
    #[getset(get_copy = "pub")]
    len_clip: usize,
    #[getset(get_copy = "pub")]
    sampling_rate: usize,
    #[getset(get = "pub")]
    entries: Vec<UcfJhmdbEntry>,
    rng: Mutex<StdRng>,
}

impl UcfJhmdbDataset {
    pub fn open(
        data_root: impl AsRef<Path>,
        kind: DatasetKind,
        split: DatasetSplit,
        len_clip: usize,
        sampling_rate: usize,
    ) -> Result<Self> {
        ensure!(
            matches!(kind, DatasetKind::Ucf24 | DatasetKind::Jhmdb21),
            "the dataset '{}' is not a UCF24 or JHMDB21 dataset",
            kind
        );
        ensure!(len_clip > 0, "len_clip must be positive");
        ensure!(sampling_rate > 0, "sampling_rate must be positive");

        let data_root = data_root.as_ref().to_owned();
        let list_file = data_root.join(match split {
            DatasetSplit::Train => "trainlist.txt",
            DatasetSplit::Test => "testlist.txt",
        });
        let text = fs::read_to_string(&list_file)
            .with_context(|| format!("failed to read split list '{}'", list_file.display()))?;
        let entries: Vec<_> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(UcfJhmdbEntry::parse)
            .try_collect()
            .with_context(|| format!("failed to parse split list '{}'", list_file.display()))?;

        info!(
            "loaded {} key frames of {} from '{}'",
            entries.len(),
            kind,
            list_file.display()
        );

        Ok(Self {
            data_root,
            kind,
            split,
            len_clip,
            sampling_rate,
            entries,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Reseed the generator of training sampling rates.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// The sampling rate of the next clip.
    pub fn clip_sampling_rate(&self) -> Result<usize> {
        let rate = match self.split {
            DatasetSplit::Train => {
                let mut rng = self
                    .rng
                    .lock()
                    .map_err(|_| format_err!("the sampling rate generator is poisoned"))?;
                TRAIN_SAMPLING_RATES[rng.gen_range(0..TRAIN_SAMPLING_RATES.len())]
            }
            DatasetSplit::Test => self.sampling_rate,
        };
        Ok(rate)
    }

    /// The last usable frame id of a video, derived from its frame count.
    pub fn max_frame_id(&self, num_frames: usize) -> usize {
        match self.kind {
            DatasetKind::Jhmdb21 => num_frames.saturating_sub(1),
            _ => num_frames,
        }
    }
}

impl KeyFrameDataset for UcfJhmdbDataset {
    type Key = String;
    type Clip = UcfJhmdbClip;

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn sample(&self, index: usize) -> Result<KeyFrameSample<String, UcfJhmdbClip>> {
        let entry = self.entries.get(index).ok_or_else(|| {
            format_err!(
                "index {} is out of range of {} samples",
                index,
                self.entries.len()
            )
        })?;

        let frame_dir = entry.frame_dir(&self.data_root);
        let num_frames = fs::read_dir(&frame_dir)
            .with_context(|| format!("failed to list frames in '{}'", frame_dir.display()))?
            .count();
        let max_num = self.max_frame_id(num_frames);

        let frame_paths: Vec<_> = clip_frame_ids(
            entry.frame_index,
            self.len_clip,
            self.clip_sampling_rate()?,
            max_num,
        )
        .into_iter()
        .map(|frame_id| -> Result<_> { Ok(frame_dir.join(frame_file_name(self.kind, frame_id)?)) })
        .try_collect()?;

        let targets = load_annotation(entry.label_path(&self.data_root))?;

        Ok(KeyFrameSample {
            key: entry.frame_id(),
            clip: UcfJhmdbClip { frame_paths },
            targets,
        })
    }
}
