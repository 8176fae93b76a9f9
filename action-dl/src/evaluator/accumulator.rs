use super::{
    ava::{AvaLabel, AvaTable, ImageKey},
    model::RawDetection,
};
use crate::{common::*, dataset::KeyFrameInfo};

/// A detection attached to the key frame it was made on.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub rect: TLBR<f64>,
    pub class_scores: Vec<f64>,
    pub video_index: usize,
    pub timestamp: i64,
}

impl DetectionRecord {
    /// Attach a detection to its key frame.
    ///
    /// Returns `None` with a warning if the box corners are flipped, so a
    /// single bad box does not abort the evaluation pass.
    pub fn new(detection: RawDetection, key: KeyFrameInfo) -> Option<Self> {
        let RawDetection { xyxy, class_scores } = detection;
        let KeyFrameInfo {
            video_index,
            timestamp,
        } = key;
        let rect = match TLBR::try_from_xyxy(xyxy) {
            Ok(rect) => rect,
            Err(err) => {
                warn!(
                    "drop invalid detection box {:?} on second {} of video {}: {}",
                    xyxy, timestamp, video_index, err
                );
                return None;
            }
        };

        Some(Self {
            rect,
            class_scores,
            video_index,
            timestamp,
        })
    }
}

/// Collects detections of an inference pass until evaluation.
#[derive(Debug, Clone, Default)]
pub struct DetectionAccumulator {
    records: Vec<DetectionRecord>,
}

impl DetectionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: DetectionRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = DetectionRecord>) {
        self.records.extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DetectionRecord] {
        &self.records
    }

    /// Drop every record, keeping the allocation for the next pass.
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Reformat the records into an AVA table.
    ///
    /// Every class index `i` whose label id `i + 1` is whitelisted yields
    /// one box on the `video,second` key of its record.
    pub fn finalize(
        &self,
        video_names: &IndexSet<String>,
        class_whitelist: &IndexSet<usize>,
    ) -> Result<AvaTable> {
        let mut table = AvaTable::new();

        for record in &self.records {
            let DetectionRecord {
                rect,
                ref class_scores,
                video_index,
                timestamp,
            } = *record;
            let video_name = video_names.get_index(video_index).ok_or_else(|| {
                format_err!(
                    "the video index {} is out of range of {} videos",
                    video_index,
                    video_names.len()
                )
            })?;
            let key = ImageKey::new(video_name.as_str(), timestamp);

            class_scores
                .iter()
                .enumerate()
                .map(|(class_index, &score)| (class_index + 1, score))
                .filter(|(label, _)| class_whitelist.contains(label))
                .for_each(|(class, score)| {
                    table.push(key.clone(), AvaLabel { rect, class, score });
                });
        }

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_whitelisted_classes() -> Result<()> {
        let mut accumulator = DetectionAccumulator::new();
        accumulator.push(DetectionRecord::new(
            RawDetection {
                xyxy: [0.1, 0.2, 0.3, 0.4],
                class_scores: vec![0.9, 0.5, 0.1],
            },
            KeyFrameInfo {
                video_index: 1,
                timestamp: 902,
            },
        )
        .unwrap());

        let video_names = IndexSet::from_iter(["first".to_string(), "second".to_string()]);
        let whitelist = IndexSet::from_iter([1, 3]);
        let table = accumulator.finalize(&video_names, &whitelist)?;

        let labels = table.get(&ImageKey::new("second", 902)).unwrap();
        assert_eq!(
            labels.iter().map(|label| label.class).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(labels[1].score, 0.1);
        assert_eq!(labels[0].rect.tlbr(), [0.2, 0.1, 0.4, 0.3]);

        accumulator.reset();
        assert!(accumulator.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_video_is_error() -> Result<()> {
        let mut accumulator = DetectionAccumulator::new();
        accumulator.extend(DetectionRecord::new(
            RawDetection {
                xyxy: [0.0, 0.0, 1.0, 1.0],
                class_scores: vec![1.0],
            },
            KeyFrameInfo {
                video_index: 3,
                timestamp: 902,
            },
        ));

        let video_names = IndexSet::from_iter(["only".to_string()]);
        assert!(accumulator
            .finalize(&video_names, &IndexSet::from_iter([1]))
            .is_err());
        Ok(())
    }

    #[test]
    fn inverted_box_is_dropped() {
        let result = DetectionRecord::new(
            RawDetection {
                xyxy: [0.5, 0.0, 0.1, 1.0],
                class_scores: vec![1.0],
            },
            KeyFrameInfo {
                video_index: 0,
                timestamp: 902,
            },
        );
        assert!(result.is_none());
    }
}
