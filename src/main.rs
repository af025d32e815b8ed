//! Image Classifier CLI
//!
//! `train <dataRootDir>` trains a model on a label-per-directory image tree
//! and saves it; `predict <imageFile>` classifies one image with the saved model.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};

use image_classifier::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use image_classifier::dataset::list_labels;
use image_classifier::model::{ModelArtifact, ModelParameters, TrainerParameters};
use image_classifier::training::Trainer;
use image_classifier::utils::format_duration;
use image_classifier::utils::logging::{init_logging, LogConfig, LogLevel};
use image_classifier::{Predictor, DEFAULT_MODEL_CONFIG, DEFAULT_TRAINER_CONFIG};

/// Train and run a convolutional image classifier
#[derive(Parser, Debug)]
#[command(name = "image_classifier")]
#[command(version)]
#[command(about = "Train a CNN on a label-per-directory image tree and classify images", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log level when neither verbose nor quiet (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Model parameters file (image geometry, seed)
    #[arg(long, default_value = DEFAULT_MODEL_CONFIG)]
    model_config: PathBuf,

    /// Trainer parameters file (epochs, batch size, split, ...)
    #[arg(long, default_value = DEFAULT_TRAINER_CONFIG)]
    trainer_config: PathBuf,

    /// Model directory; overrides `modelPath` from the trainer file
    #[arg(long)]
    model_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model on the images under DATA_ROOT_DIR (one subdirectory per label)
    Train {
        /// Root directory of the labeled images
        data_root_dir: PathBuf,
    },

    /// Classify one image with the saved model
    Predict {
        /// Image to classify
        image_file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help, version and usage errors all go to stdout
            print!("{}", e);
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default().with_level(LogLevel::parse(&cli.log_level))
    };
    let _ = init_logging(&log_config);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let model_params = ModelParameters::load(&cli.model_config)?;
    let mut trainer_params = TrainerParameters::load(&cli.trainer_config)?;
    if let Some(model_path) = cli.model_path {
        trainer_params.model_path = model_path;
    }

    match cli.command {
        Commands::Train { data_root_dir } => cmd_train(model_params, trainer_params, &data_root_dir),
        Commands::Predict { image_file } => cmd_predict(&trainer_params.model_path, &image_file),
    }
}

fn cmd_train(model_params: ModelParameters, trainer_params: TrainerParameters, data_root: &Path) -> Result<()> {
    let num_labels = list_labels(data_root)?.len();
    let trainer_params = trainer_params
        .with_data_path(data_root)
        .with_num_labels(num_labels);

    println!("{}", model_params);
    println!("{}", trainer_params);
    info!("Backend: {}", backend_name());

    let model_path = trainer_params.model_path.clone();
    let mut trainer = Trainer::<TrainingBackend>::new(model_params.clone(), trainer_params, default_device());
    let outcome = trainer.run()?;

    println!("{}", outcome.report);
    println!(
        "{} {} weight updates in {}",
        "Training complete:".green().bold(),
        outcome.summary.steps,
        format_duration(outcome.summary.duration.as_secs_f64())
    );
    if outcome.summary.skipped_samples > 0 {
        println!(
            "{} {} training samples could not be decoded",
            "Warning:".yellow().bold(),
            outcome.summary.skipped_samples
        );
    }

    println!("Save model....");
    let artifact = ModelArtifact::new(&model_path);
    outcome.save(&artifact, &model_params)?;
    outcome
        .partition
        .save_json(&model_path.join("partition.json"))
        .context("Failed to save the train/test partition")?;
    info!("Model saved to {}", model_path.display());

    Ok(())
}

fn cmd_predict(model_path: &Path, image_file: &Path) -> Result<()> {
    let predictor = Predictor::<DefaultBackend>::load(model_path)?;
    println!("Labels: {}", predictor.labels().join(", "));

    let prediction = predictor.predict(image_file)?;
    println!("{}", prediction);

    Ok(())
}
