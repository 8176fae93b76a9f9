//! Saving and partial loading of model parameters.

use crate::common::*;
use chrono::{DateTime, Local};
use ndarray::ArrayD;
use once_cell::sync::Lazy;
use regex::Regex;

pub const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";

static CHECKPOINT_FILENAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2}\.\d{3}[+-]\d{4})_\d{6}_\d+\.\d+\.ckpt$")
        .unwrap()
});

/// Named parameters in model order.
pub type StateDict = IndexMap<String, ArrayD<f64>>;

/// Keep the checkpoint parameters the model can take.
///
/// Parameters missing from `model_shapes` or whose shape differs are dropped
/// with a warning. The model keeps its initial values for them.
pub fn filter_state_dict(
    checkpoint: StateDict,
    model_shapes: &IndexMap<String, Vec<usize>>,
) -> StateDict {
    checkpoint
        .into_iter()
        .filter(|(name, param)| match model_shapes.get(name) {
            Some(shape) if shape.as_slice() == param.shape() => true,
            Some(shape) => {
                warn!(
                    "drop parameter '{}' with shape {:?}, the model expects {:?}",
                    name,
                    param.shape(),
                    shape
                );
                false
            }
            None => {
                warn!("drop parameter '{}' absent from the model", name);
                false
            }
        })
        .collect()
}

/// Save parameters to `{time}_{step}_{loss}.ckpt` in the checkpoint directory.
pub fn save_checkpoint(
    state: &StateDict,
    checkpoint_dir: &Path,
    training_step: usize,
    loss: f64,
) -> Result<PathBuf> {
    let filename = format!(
        "{}_{:06}_{:08.5}.ckpt",
        Local::now().format(FILE_STRFTIME),
        training_step,
        loss
    );
    let path = checkpoint_dir.join(filename);
    let writer = BufWriter::new(
        File::create(&path)
            .with_context(|| format!("failed to create checkpoint '{}'", path.display()))?,
    );
    serde_json::to_writer(writer, state)?;
    Ok(path)
}

/// Load a checkpoint and keep the parameters matching the model.
pub fn load_checkpoint(
    path: impl AsRef<Path>,
    model_shapes: &IndexMap<String, Vec<usize>>,
) -> Result<StateDict> {
    let path = path.as_ref();
    info!("load checkpoint file {}", path.display());

    let reader = BufReader::new(
        File::open(path)
            .with_context(|| format!("failed to open checkpoint '{}'", path.display()))?,
    );
    let state: StateDict = serde_json::from_reader(reader)
        .with_context(|| format!("failed to parse checkpoint '{}'", path.display()))?;

    let num_params = state.len();
    let state = filter_state_dict(state, model_shapes);
    if state.len() < num_params {
        warn!(
            "{} of {} parameters in '{}' are not loaded",
            num_params - state.len(),
            num_params,
            path.display()
        );
    }
    Ok(state)
}

/// Find the most recent checkpoint under `logging_dir/*/checkpoints`.
pub fn find_recent_checkpoint(logging_dir: &Path) -> Result<Option<PathBuf>> {
    let pattern = format!("{}/*/checkpoints/*.ckpt", logging_dir.display());
    let paths: Vec<PathBuf> = glob::glob(&pattern)?.try_collect()?;

    let checkpoint_file = paths
        .into_iter()
        .filter_map(|path| {
            let file_name = path.file_name()?.to_str()?;
            let captures = CHECKPOINT_FILENAME_REGEX.captures(file_name)?;
            let datetime = DateTime::parse_from_str(captures.get(1)?.as_str(), FILE_STRFTIME).ok()?;
            Some((path, datetime))
        })
        .max_by_key(|(_path, datetime)| *datetime)
        .map(|(path, _datetime)| path);

    if checkpoint_file.is_none() {
        warn!("no checkpoint file found in '{}'", logging_dir.display());
    }
    Ok(checkpoint_file)
}
