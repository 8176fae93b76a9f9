use super::DatasetSplit;
use crate::common::*;

/// Frame paths of every video listed in an AVA frame list.
#[derive(Debug, Clone, Default)]
pub struct AvaFrameLists {
    /// Frame paths per video, indexed like `video_names`.
    pub image_paths: Vec<Vec<PathBuf>>,
    /// Video names in order of first appearance.
    pub video_names: IndexSet<String>,
}

impl AvaFrameLists {
    /// Load `train.csv` or `val.csv` from the frame list directory.
    ///
    /// Each row after the header holds 5 whitespace separated columns,
    /// `original_video_id video_id frame_id path labels`.
    pub fn load(
        frames_dir: impl AsRef<Path>,
        frame_list_dir: impl AsRef<Path>,
        split: DatasetSplit,
    ) -> Result<Self> {
        let frames_dir = frames_dir.as_ref();
        let list_file = frame_list_dir.as_ref().join(match split {
            DatasetSplit::Train => "train.csv",
            DatasetSplit::Test => "val.csv",
        });

        let reader = BufReader::new(
            File::open(&list_file)
                .with_context(|| format!("failed to open frame list '{}'", list_file.display()))?,
        );

        let mut lists = Self::default();

        for (line_index, line) in reader.lines().enumerate().skip(1) {
            let line = line?;
            let row: Vec<&str> = line.split_whitespace().collect();
            if row.is_empty() {
                continue;
            }
            ensure!(
                row.len() == 5,
                "expect 5 columns at line {} of '{}', but get {}",
                line_index + 1,
                list_file.display(),
                row.len()
            );

            let (video_index, inserted) = lists.video_names.insert_full(row[0].to_string());
            if inserted {
                lists.image_paths.push(vec![]);
            }
            lists.image_paths[video_index].push(frames_dir.join(row[3]));
        }

        info!(
            "finished loading image paths of {} videos from '{}'",
            lists.video_names.len(),
            list_file.display()
        );

        Ok(lists)
    }

    pub fn video_name(&self, video_index: usize) -> Option<&str> {
        self.video_names
            .get_index(video_index)
            .map(|name| name.as_str())
    }
}
