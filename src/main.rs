//! flowscore entrypoint: train a bundle from the window store, score one record from stdin,
//! inspect a bundle, or verify a portable export against it.

use clap::{Parser, Subcommand};
use flowscore::{
    config::AppConfig,
    error::AnomalyError,
    features::FeatureSchema,
    logging::StructuredLogger,
    model::{verify_score_model, IsolationForest, PortableScorer},
    pipeline::{InferencePipeline, ScoreOutput, TrainingPipeline},
    storage::{RowSource, WindowStore},
};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "flowscore", version, about = "Network window anomaly scoring")]
struct Cli {
    /// JSON config file (defaults to $FLOWSCORE_CONFIG_PATH or ./config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fit normalizer, detector and calibrator on stored windows and publish a bundle
    Train {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Score one JSON record read from stdin; prints {"score": x} or {"error": msg}
    Score { bundle: Option<PathBuf> },
    /// Print bundle metadata
    Inspect { bundle: Option<PathBuf> },
    /// Check a portable ONNX export against the bundle's calibrated training scores
    VerifyExport {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        bundle: Option<PathBuf>,
        #[arg(long)]
        onnx: Option<PathBuf>,
        #[arg(long)]
        tolerance: Option<f64>,
    },
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn train(config: &AppConfig, db: PathBuf, out: PathBuf) -> Result<(), BoxError> {
    let store = WindowStore::open(&db)?;
    let pipeline = TrainingPipeline::new(config.training.clone());
    let report = pipeline.run(&store, &out, None)?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn score(bundle: PathBuf) -> ScoreOutput {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        return ScoreOutput::Error(format!("cannot read stdin: {}", e));
    }
    match InferencePipeline::<IsolationForest>::load(&bundle, None) {
        Ok(pipeline) => pipeline.score_json(&input),
        Err(e) => ScoreOutput::Error(e.to_string()),
    }
}

fn inspect(bundle: PathBuf) -> Result<(), BoxError> {
    let pipeline: InferencePipeline = InferencePipeline::load(&bundle, None)?;
    let b = pipeline.bundle();
    let summary = serde_json::json!({
        "format_version": b.format_version(),
        "bundle_id": b.bundle_id(),
        "trained_at": b.trained_at(),
        "training_rows": b.training_rows(),
        "cont_cols": b.schema().continuous,
        "extra_cols": b.schema().derived,
        "medians": b.normalization().medians,
        "iqrs": b.normalization().iqrs,
        "score_min": b.bounds().score_min,
        "score_max": b.bounds().score_max,
        "degenerate_calibration": b.bounds().is_degenerate(),
        "trees": b.detector().params().n_estimators,
        "outlier_offset": b.detector().offset(),
        "checksum": b.checksum(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn verify_export(db: PathBuf, bundle: PathBuf, onnx: PathBuf, tolerance: f64) -> Result<(), BoxError> {
    let pipeline: InferencePipeline = InferencePipeline::load(&bundle, Some(&FeatureSchema::network()))?;
    let store = WindowStore::open(&db)?;
    let rows = store.load_rows(pipeline.schema())?;
    let (features, calibrated) = pipeline.score_rows(&rows)?;
    let scorer = PortableScorer::load(&onnx, pipeline.schema().width()).map_err(AnomalyError::from)?;
    let report = verify_score_model(&scorer, features.view(), calibrated.view(), tolerance)?;
    info!(mae = report.mean_absolute_error, rows = report.holdout_rows, "portable export verified");
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("FLOWSCORE_CONFIG_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let config = AppConfig::load(&config_path);

    StructuredLogger::init(config.log.json, &config.log.level);

    let result = match cli.command {
        Command::Train { db, out } => train(
            &config,
            db.unwrap_or_else(|| config.db_path.clone()),
            out.unwrap_or_else(|| config.bundle_path.clone()),
        ),
        Command::Score { bundle } => {
            let output = score(bundle.unwrap_or_else(|| config.bundle_path.clone()));
            let failed = output.is_error();
            if let Err(e) = StructuredLogger::emit_json(&output, &mut std::io::stdout()) {
                error!(error = %e, "cannot write score");
                return ExitCode::FAILURE;
            }
            return if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
        Command::Inspect { bundle } => inspect(bundle.unwrap_or_else(|| config.bundle_path.clone())),
        Command::VerifyExport {
            db,
            bundle,
            onnx,
            tolerance,
        } => verify_export(
            db.unwrap_or_else(|| config.db_path.clone()),
            bundle.unwrap_or_else(|| config.bundle_path.clone()),
            onnx.unwrap_or_else(|| config.portable_model_path.clone()),
            tolerance.unwrap_or(config.training.distillation.tolerance),
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "flowscore failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
