//! AVA annotation files: box lists, exclusions and label maps.

use crate::common::*;

/// A boxed action with its score.
pub type AvaLabel = ScoredLabel<TLBR<f64>, usize>;

/// Identifies an annotated second of a video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageKey {
    pub video_id: String,
    pub second: i64,
}

impl ImageKey {
    pub fn new(video_id: impl Into<String>, second: i64) -> Self {
        Self {
            video_id: video_id.into(),
            second,
        }
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{:04}", self.video_id, self.second)
    }
}

/// An action category of the label map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: usize,
    pub name: String,
}

/// Boxes grouped by image key in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvaTable {
    images: IndexMap<ImageKey, Vec<AvaLabel>>,
}

impl AvaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: ImageKey, label: AvaLabel) {
        self.images.entry(key).or_default().push(label);
    }

    /// The number of distinct image keys.
    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    pub fn num_boxes(&self) -> usize {
        self.images.values().map(|labels| labels.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, key: &ImageKey) -> Option<&[AvaLabel]> {
        self.images.get(key).map(|labels| labels.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ImageKey, &[AvaLabel])> {
        self.images
            .iter()
            .map(|(key, labels)| (key, labels.as_slice()))
    }

    /// The subset of seconds divisible by 4, used for fast evaluation during training.
    pub fn mini(&self) -> Self {
        let images = self
            .images
            .iter()
            .filter(|(key, _)| key.second % 4 == 0)
            .map(|(key, labels)| (key.clone(), labels.clone()))
            .collect();
        Self { images }
    }
}

/// Load a box list laid out as `video_id,second,x1,y1,x2,y2,label[,score]`.
///
/// Boxes whose label is not in the whitelist are dropped, as are boxes
/// with flipped corners. A missing score column defaults to 1.
pub fn read_csv(path: impl AsRef<Path>, class_whitelist: Option<&IndexSet<usize>>) -> Result<AvaTable> {
    let path = path.as_ref();
    let since = Instant::now();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open box list '{}'", path.display()))?;

    let mut table = AvaTable::new();

    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let parsed = parse_box_record(&record).with_context(|| {
            format!("invalid record at line {} of '{}'", index + 1, path.display())
        })?;
        let (key, label) = match parsed {
            Some(parsed) => parsed,
            None => {
                warn!(
                    "drop the box with flipped corners at line {} of '{}'",
                    index + 1,
                    path.display()
                );
                continue;
            }
        };

        if let Some(whitelist) = class_whitelist {
            if !whitelist.contains(&label.class) {
                continue;
            }
        }
        table.push(key, label);
    }

    info!(
        "read {} boxes of {} images from '{}' in {:.3} seconds",
        table.num_boxes(),
        table.num_images(),
        path.display(),
        since.elapsed().as_secs_f64()
    );

    Ok(table)
}

fn parse_box_record(record: &csv::StringRecord) -> Result<Option<(ImageKey, AvaLabel)>> {
    ensure!(
        matches!(record.len(), 7 | 8),
        "expect 7 or 8 columns, but get {}",
        record.len()
    );
    let field = |index: usize| record[index].trim();

    let key = ImageKey::new(field(0), field(1).parse()?);
    let [x1, y1, x2, y2]: [f64; 4] = [field(2), field(3), field(4), field(5)]
        .iter()
        .map(|text| text.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| format_err!("expect 4 box coordinates"))?;
    let class: usize = field(6).parse()?;
    let score = if record.len() == 8 {
        field(7).parse()?
    } else {
        1.0
    };
    if x2 < x1 || y2 < y1 {
        return Ok(None);
    }
    let rect = TLBR::try_from_tlbr([y1, x1, y2, x2])?;

    Ok(Some((key, AvaLabel { rect, class, score })))
}

/// Load the image keys excluded from evaluation.
pub fn read_exclusions(path: impl AsRef<Path>) -> Result<HashSet<ImageKey>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open exclusion file '{}'", path.display()))?;

    let keys: HashSet<ImageKey> = reader
        .records()
        .enumerate()
        .map(|(index, record)| -> Result<_> {
            let record = record?;
            ensure!(
                record.len() >= 2,
                "expect at least 2 columns at line {} of '{}'",
                index + 1,
                path.display()
            );
            let second = record[1].trim().parse().with_context(|| {
                format!("invalid second at line {} of '{}'", index + 1, path.display())
            })?;
            Ok(ImageKey::new(record[0].trim(), second))
        })
        .try_collect()?;

    Ok(keys)
}

/// Parse a protobuf text label map.
///
/// Returns the categories in file order and the set of their ids. An id
/// takes the most recent name above it, or an empty name if there is none.
pub fn read_labelmap(path: impl AsRef<Path>) -> Result<(Vec<Category>, IndexSet<usize>)> {
    let path = path.as_ref();
    let reader = BufReader::new(
        File::open(path)
            .with_context(|| format!("failed to open label map '{}'", path.display()))?,
    );

    let mut categories = vec![];
    let mut class_ids = IndexSet::new();
    let mut name = String::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;

        if line.starts_with("  name:") {
            let text = line.split('"').nth(1).ok_or_else(|| {
                format_err!(
                    "missing quoted name at line {} of '{}'",
                    index + 1,
                    path.display()
                )
            })?;
            name = text.to_string();
        } else if line.starts_with("  id:") || line.starts_with("  label_id:") {
            let id: usize = line
                .trim()
                .rsplit(' ')
                .next()
                .unwrap_or("")
                .parse()
                .with_context(|| {
                    format!("invalid id at line {} of '{}'", index + 1, path.display())
                })?;
            categories.push(Category {
                id,
                name: name.clone(),
            });
            class_ids.insert(id);
        }
    }

    Ok((categories, class_ids))
}

/// Write boxes as `key,x1,y1,x2,y2,label,score` lines.
pub fn write_results(table: &AvaTable, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let since = Instant::now();
    let mut writer = BufWriter::new(
        File::create(path)
            .with_context(|| format!("failed to create result file '{}'", path.display()))?,
    );

    for (key, labels) in table.iter() {
        for AvaLabel { rect, class, score } in labels {
            let [t, l, b, r] = rect.tlbr();
            writeln!(
                writer,
                "{},{:.3},{:.3},{:.3},{:.3},{},{:.4}",
                key, l, t, r, b, class, score
            )?;
        }
    }
    writer.flush()?;

    info!(
        "AVA results wrote to '{}' in {:.3} seconds",
        path.display(),
        since.elapsed().as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELMAP: &str = r#"item {
  name: "bend/bow (at the waist)"
  id: 1
}
item {
  name: "crouch/kneel"
  id: 3
}
item {
  name: "dance"
  label_id: 4
}
"#;

    #[test]
    fn image_key_format() {
        assert_eq!(ImageKey::new("1j20qq1JyX4", 902).to_string(), "1j20qq1JyX4,0902");
        assert_eq!(ImageKey::new("abc", 12345).to_string(), "abc,12345");
    }

    #[test]
    fn parse_labelmap() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("labelmap.pbtxt");
        fs::write(&path, LABELMAP)?;

        let (categories, class_ids) = read_labelmap(&path)?;
        assert_eq!(categories.len(), 3);
        assert_eq!(categories[0].name, "bend/bow (at the waist)");
        assert_eq!(categories[2].id, 4);
        assert_eq!(class_ids.iter().cloned().collect::<Vec<_>>(), vec![1, 3, 4]);
        Ok(())
    }

    #[test]
    fn id_reuses_previous_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("labelmap.pbtxt");
        fs::write(
            &path,
            "item {\n  id: 7\n}\nitem {\n  name: \"dance\"\n  id: 8\n  label_id: 9\n}\n",
        )?;

        let (categories, class_ids) = read_labelmap(&path)?;
        assert_eq!(
            categories,
            vec![
                Category {
                    id: 7,
                    name: "".to_string()
                },
                Category {
                    id: 8,
                    name: "dance".to_string()
                },
                Category {
                    id: 9,
                    name: "dance".to_string()
                },
            ]
        );
        assert_eq!(class_ids.len(), 3);
        Ok(())
    }

    #[test]
    fn read_box_list_with_whitelist() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("gt.csv");
        fs::write(
            &path,
            "vid,0902,0.1,0.2,0.5,0.6,1\n\
             vid,0902,0.1,0.2,0.5,0.6,2\n\
             vid,0903,0.0,0.0,1.0,1.0,3,0.25\n",
        )?;

        let whitelist = IndexSet::from_iter([1, 3]);
        let table = read_csv(&path, Some(&whitelist))?;
        assert_eq!(table.num_images(), 2);
        assert_eq!(table.num_boxes(), 2);

        let labels = table.get(&ImageKey::new("vid", 902)).unwrap();
        assert_eq!(labels[0].rect.tlbr(), [0.2, 0.1, 0.6, 0.5]);
        assert_eq!(labels[0].score, 1.0);
        assert_eq!(table.get(&ImageKey::new("vid", 903)).unwrap()[0].score, 0.25);

        assert_eq!(read_csv(&path, None)?.num_boxes(), 3);
        Ok(())
    }

    #[test]
    fn reject_wrong_column_count() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.csv");
        fs::write(&path, "vid,0902,0.1,0.2,0.5,0.6\n")?;
        assert!(read_csv(&path, None).is_err());
        Ok(())
    }

    #[test]
    fn skip_flipped_boxes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("detections.csv");
        fs::write(
            &path,
            "vid,0902,0.6,0.1,0.4,0.5,1,0.9\n\
             vid,0902,0.1,0.2,0.5,0.6,1,0.8\n",
        )?;

        let table = read_csv(&path, None)?;
        assert_eq!(table.num_boxes(), 1);
        assert_eq!(table.get(&ImageKey::new("vid", 902)).unwrap()[0].score, 0.8);
        Ok(())
    }

    #[test]
    fn exclusions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("excluded.csv");
        fs::write(&path, "vid,0902\nother,1000\n")?;

        let keys = read_exclusions(&path)?;
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&ImageKey::new("vid", 902)));
        Ok(())
    }

    #[test]
    fn write_then_read_results() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("detections.csv");

        let mut table = AvaTable::new();
        table.push(
            ImageKey::new("vid", 904),
            AvaLabel {
                rect: TLBR::try_from_xyxy([0.1, 0.2, 0.5, 0.6])?,
                class: 12,
                score: 0.123456,
            },
        );
        write_results(&table, &path)?;

        assert_eq!(
            fs::read_to_string(&path)?,
            "vid,0904,0.100,0.200,0.500,0.600,12,0.1235\n"
        );
        assert_eq!(read_csv(&path, None)?.num_boxes(), 1);
        Ok(())
    }

    #[test]
    fn mini_subset() {
        let mut table = AvaTable::new();
        for second in 902..=909 {
            table.push(
                ImageKey::new("vid", second),
                AvaLabel {
                    rect: TLBR::try_from_xyxy([0.0, 0.0, 1.0, 1.0]).unwrap(),
                    class: 1,
                    score: 1.0,
                },
            );
        }
        let mini = table.mini();
        assert_eq!(mini.num_images(), 2);
        assert!(mini.get(&ImageKey::new("vid", 904)).is_some());
        assert!(mini.get(&ImageKey::new("vid", 908)).is_some());
    }
}
