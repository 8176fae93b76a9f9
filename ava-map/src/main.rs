use action_dl::{
    config::{Config, CriterionConfig},
    dataset::DatasetKind,
    evaluator::{ava, AvaEvaluator},
};
use anyhow::{format_err, Result};
use log::info;
use prettytable::{cell, row, Table};
use std::path::{Path, PathBuf};
use structopt::StructOpt;

#[derive(Debug, Clone, StructOpt)]
/// Inspect action detection configs and compute AVA frame mAP.
enum Args {
    Info {
        /// configuration file
        config_file: PathBuf,
    },
    Classes {
        /// dataset name, one of ucf24, jhmdb21, ava_v2.1, ava_v2.2 and ava_pose
        dataset: DatasetKind,
    },
    Eval {
        /// configuration file
        config_file: PathBuf,
        /// detections CSV file in AVA box list format
        detections_file: PathBuf,
        /// suffix of the saved detection and ground truth files
        #[structopt(long, default_value = "0")]
        epoch: usize,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Args::from_args() {
        Args::Info { config_file } => print_info(config_file)?,
        Args::Classes { dataset } => print_classes(dataset),
        Args::Eval {
            config_file,
            detections_file,
            epoch,
        } => eval(config_file, detections_file, epoch)?,
    }

    Ok(())
}

fn print_info(config_file: impl AsRef<Path>) -> Result<()> {
    let config = Config::open(config_file)?;

    {
        let mut table = Table::new();
        table.add_row(row!["dataset", config.dataset.kind]);
        table.add_row(row!["data root", config.dataset.data_root.display()]);
        table.add_row(row!["image size", config.dataset.img_size]);
        table.add_row(row!["clip length", config.dataset.len_clip]);
        table.add_row(row!["sampling rate", config.dataset.sampling_rate]);

        let matcher = match &config.criterion {
            CriterionConfig::UniformMatcher(_) => "uniform_matcher",
            CriterionConfig::YoloMatcher(_) => "yolo_matcher",
        };
        table.add_row(row!["matcher", matcher]);
        table.add_row(row!["criterion classes", config.criterion.num_classes()]);
        table.printstd();
    }

    if let Some(evaluator) = &config.evaluator {
        let evaluator = AvaEvaluator::new(evaluator)?;

        let mut table = Table::new();
        table.add_row(row!["id", "name"]);
        evaluator.categories().iter().for_each(|category| {
            table.add_row(row![category.id, category.name]);
        });
        table.printstd();

        println!(
            "{} ground truth frames, {} in the mini subset, {} videos",
            evaluator.full_groundtruth().num_images(),
            evaluator.mini_groundtruth().num_images(),
            evaluator.video_names().len()
        );
    }

    Ok(())
}

fn print_classes(dataset: DatasetKind) {
    println!("{} has {} classes", dataset, dataset.num_classes());
}

fn eval(config_file: impl AsRef<Path>, detections_file: impl AsRef<Path>, epoch: usize) -> Result<()> {
    let config = Config::open(config_file)?;
    let evaluator_config = config
        .evaluator
        .as_ref()
        .ok_or_else(|| format_err!("the config has no evaluator section"))?;
    let evaluator = AvaEvaluator::new(evaluator_config)?;

    let detections = ava::read_csv(detections_file, Some(evaluator.class_whitelist()))?;
    info!("loaded {} detections", detections.num_boxes());
    let metrics = evaluator.evaluate_table(&detections, epoch)?;

    let mut table = Table::new();
    table.add_row(row!["category", "AP@0.5IOU"]);
    metrics.per_category_ap.iter().for_each(|(name, ap)| {
        let ap = if ap.is_nan() {
            "-".to_string()
        } else {
            format!("{:.4}", ap)
        };
        table.add_row(row![name, ap]);
    });
    table.add_row(row!["mAP", format!("{:.4}", metrics.mean_ap)]);
    table.printstd();

    Ok(())
}
