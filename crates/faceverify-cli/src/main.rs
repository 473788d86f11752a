use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use faceverify_core::{
    annotate, imaging, DetectorBackend, DistanceMetric, EngineOptions, Error, FaceEngine,
    Normalization, RecognitionModel, RepresentationStore,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod output;

use config::Config;

#[derive(Parser)]
#[command(
    name = "face-verify",
    version,
    about = "Face verification and search with ONNX face models"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether two images show the same person
    Verify {
        img1: PathBuf,
        img2: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Search a directory of images for the faces in an image
    Find {
        img: PathBuf,
        db_path: PathBuf,
        /// Where to write the annotated query image
        #[arg(short, long, default_value = "find_result.jpg")]
        output: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Build or refresh the embedding cache of a database directory
    Build {
        db_path: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Face recognition model
    #[arg(short, long, value_enum, default_value_t = RecognitionModel::VggFace)]
    model: RecognitionModel,
    /// Face detector backend
    #[arg(short, long, value_enum, default_value_t = DetectorBackend::Opencv)]
    detector: DetectorBackend,
    /// Distance metric
    #[arg(long, value_enum, default_value_t = DistanceMetric::Cosine)]
    metric: DistanceMetric,
    /// Decision threshold (defaults to the model's tuned value)
    #[arg(short, long)]
    threshold: Option<f32>,
    /// Input normalization applied before recognition
    #[arg(long, value_enum, default_value_t = Normalization::Base)]
    normalization: Normalization,
    /// Embed face boxes as detected, without landmark alignment
    #[arg(long)]
    no_align: bool,
    /// Use the whole image when no face is detected instead of failing
    #[arg(long)]
    no_enforce_detection: bool,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl EngineArgs {
    fn options(&self) -> EngineOptions {
        EngineOptions {
            model: self.model,
            detector: self.detector,
            metric: self.metric,
            normalization: self.normalization,
            align: !self.no_align,
            enforce_detection: !self.no_enforce_detection,
            threshold: self.threshold,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    // Operation failures are reported, not propagated as an exit status.
    if let Err(e) = run(cli.command, &config) {
        tracing::debug!(error = ?e, "command failed");
        println!("[!] Error: {e}");
    }

    Ok(())
}

fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Verify { img1, img2, engine } => verify(&img1, &img2, &engine, config),
        Commands::Find {
            img,
            db_path,
            output,
            engine,
        } => find(&img, &db_path, &output, &engine, config),
        Commands::Build { db_path, engine } => build(&db_path, &engine, config),
    }
}

fn load_engine(args: &EngineArgs, config: &Config) -> Result<FaceEngine> {
    tracing::debug!(model_dir = %config.model_dir.display(), "loading models");
    Ok(FaceEngine::load(
        &config.model_dir,
        args.options(),
        config.detector_options(),
    )?)
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::ImageNotFound(path.display().to_string()).into());
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn verify(img1: &Path, img2: &Path, args: &EngineArgs, config: &Config) -> Result<()> {
    ensure_exists(img1)?;
    ensure_exists(img2)?;

    let mut engine = load_engine(args, config)?;
    let result = engine.verify(img1, img2)?;

    if args.json {
        print_json(&result)
    } else {
        print!("{}", output::verify_report(&result));
        Ok(())
    }
}

fn find(
    img: &Path,
    db_path: &Path,
    annotated: &Path,
    args: &EngineArgs,
    config: &Config,
) -> Result<()> {
    ensure_exists(img)?;
    let mut store = RepresentationStore::open(db_path, &args.options())?;

    store.exclude(annotated);

    let mut engine = load_engine(args, config)?;
    store.sync(&mut engine)?;

    let mut image = imaging::load_image(img)?;
    let results = engine.find(&image, &img.display().to_string(), &store)?;

    annotate::annotate(&mut image, &results)?;
    annotate::save(&image, annotated)?;

    if args.json {
        print_json(&results)
    } else {
        print!("{}", output::find_report(&results, annotated));
        Ok(())
    }
}

fn build(db_path: &Path, args: &EngineArgs, config: &Config) -> Result<()> {
    let mut store = RepresentationStore::open(db_path, &args.options())?;
    let mut engine = load_engine(args, config)?;
    let report = store.sync(&mut engine)?;

    if args.json {
        print_json(&report)
    } else {
        print!("{}", output::build_report(&report, store.file_path()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_engine_args_defaults() {
        let cli = Cli::parse_from(["face-verify", "verify", "a.jpg", "b.jpg"]);
        let Commands::Verify { engine, .. } = cli.command else {
            panic!("expected verify");
        };
        assert_eq!(engine.options(), EngineOptions::default());
        assert!(!engine.json);
    }

    #[test]
    fn test_engine_args_flags() {
        let cli = Cli::parse_from([
            "face-verify",
            "find",
            "q.jpg",
            "db",
            "--model",
            "ArcFace",
            "--detector",
            "retinaface",
            "--metric",
            "euclidean_l2",
            "--threshold",
            "1.1",
            "--no-align",
            "--no-enforce-detection",
        ]);
        let Commands::Find { output, engine, .. } = cli.command else {
            panic!("expected find");
        };
        assert_eq!(output, PathBuf::from("find_result.jpg"));
        let options = engine.options();
        assert_eq!(options.model, RecognitionModel::ArcFace);
        assert_eq!(options.detector, DetectorBackend::Retinaface);
        assert_eq!(options.metric, DistanceMetric::EuclideanL2);
        assert_eq!(options.threshold, Some(1.1));
        assert!(!options.align);
        assert!(!options.enforce_detection);
    }
}
