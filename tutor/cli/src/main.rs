use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, Local, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;
use tokio::runtime::Runtime;
use tutor_engine::{
    runner::{self, LoopExit},
    ConfigOverrides, DatasetLoader, LossSample, Normalizer, Prediction, RawPoint, Session,
    TrainingLoop, TutorConfig, TutorTelemetry, WeightVector,
};

#[derive(Parser, Debug)]
#[command(name = "tutor", version, about = "Interactive pass predictor (logistic regression)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trains tick by tick, printing the loss trace as it is recorded.
    Train(TrainArgs),
    /// Trains without delay and prints the prediction for one student as JSON.
    Predict {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        study_hours: f64,
        #[arg(long)]
        attendance: f64,
        #[arg(long)]
        iterations: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Prints dataset statistics and normalization parameters as JSON.
    Inspect {
        #[arg(long)]
        data: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct TrainArgs {
    /// CSV with a `studyHours,attendance,passed` header; falls back to the config.
    #[arg(long)]
    data: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    iterations: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    tick_ms: Option<u64>,
    /// Writes a dated JSON-lines log under this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[arg(long)]
    log_level: Option<LogLevel>,
    #[arg(long)]
    event_log: Option<PathBuf>,
    /// Query point as `hours,attendance`.
    #[arg(long, value_parser = parse_point)]
    query: Option<RawPoint>,
}

#[derive(Debug, Serialize)]
struct TrainReport {
    finished_at: String,
    exit: String,
    ticks: usize,
    iteration: usize,
    total_iterations: usize,
    loss: Option<f64>,
    weights: WeightVector,
    formula: String,
    history: Vec<LossSample>,
    prediction: Option<Prediction>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => handle_train(args),
        Commands::Predict {
            data,
            study_hours,
            attendance,
            iterations,
            seed,
        } => handle_predict(&data, RawPoint::new(study_hours, attendance), iterations, seed),
        Commands::Inspect { data } => handle_inspect(&data),
    }
}

fn handle_train(args: TrainArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => TutorConfig::load(path)?,
        None => TutorConfig::default(),
    };
    let log_path = args.log_dir.as_deref().map(compute_log_path).transpose()?;
    let config = base.merge_overrides(ConfigOverrides {
        total_iterations: args.iterations,
        tick_delay_ms: args.tick_ms,
        seed: args.seed,
        dataset: args.data,
        log_path,
        event_log: args.event_log,
        min_level: args.log_level,
    })?;
    let data_path = config
        .dataset
        .path
        .clone()
        .ok_or_else(|| anyhow!("no dataset: pass --data or set [dataset].path"))?;
    let dataset = DatasetLoader::from_path(&data_path)
        .with_context(|| format!("loading {}", data_path.display()))?;

    let mut telemetry = TutorTelemetry::builder("tutor").min_level(config.logging.min_level);
    if let Some(path) = &config.logging.log_path {
        telemetry = telemetry.log_path(path);
    }
    if let Some(path) = &config.logging.event_log {
        telemetry = telemetry.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }

    let runtime = Runtime::new()?;
    let report = runtime.block_on(async {
        let telemetry = telemetry.build()?;
        let mut session = Session::builder()
            .settings(&config.training)
            .telemetry(telemetry.clone())
            .build()?;
        session.load_dataset(dataset)?;
        if let Some(point) = args.query {
            session.set_query(point);
        }
        session.start()?;
        println!(
            "training on {} samples for {} iterations (Ctrl-C to stop)",
            session.standardized().len(),
            config.training.total_iterations
        );

        let shared = runner::shared(session);
        let stopper = Arc::clone(&shared);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stopper.lock().stop();
            }
        });

        let summary = TrainingLoop::from_settings(Arc::clone(&shared), &config.training)
            .run_observed(|outcome| {
                if outcome.recorded {
                    println!("iteration {:>5}  loss {:.6}", outcome.iteration, outcome.loss);
                }
            })
            .await;
        telemetry.flush().await?;

        let session = shared.lock();
        let run = session.run_state();
        let weights = session.weights();
        Ok::<_, anyhow::Error>(TrainReport {
            finished_at: Utc::now().to_rfc3339(),
            exit: match &summary.exit {
                LoopExit::Completed => "completed".into(),
                LoopExit::Stopped => "stopped".into(),
                LoopExit::Aborted(err) => format!("aborted: {err}"),
            },
            ticks: summary.ticks,
            iteration: run.current_iteration,
            total_iterations: run.total_iterations,
            loss: session.current_loss(),
            weights,
            formula: weights.to_string(),
            history: session.history().to_vec(),
            prediction: session.last_prediction(),
        })
    })?;

    println!("{}", report.formula);
    if let Some(prediction) = &report.prediction {
        println!(
            "P(pass | {} h, {}%) = {:.4} -> {}",
            prediction.point.study_hours,
            prediction.point.attendance,
            prediction.probability,
            verdict(prediction)
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_predict(
    data: &Path,
    point: RawPoint,
    iterations: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    let dataset = DatasetLoader::from_path(data)
        .with_context(|| format!("loading {}", data.display()))?;
    let mut builder = Session::builder();
    if let Some(total) = iterations {
        builder = builder.total_iterations(total);
    }
    if let Some(seed) = seed {
        builder = builder.seed(seed);
    }
    let mut session = builder.build()?;
    session.load_dataset(dataset)?;
    session.start()?;
    while session.tick()?.is_some() {}

    let prediction = session.predict(point)?;
    let weights = session.weights();
    let output = json!({
        "study_hours": point.study_hours,
        "attendance": point.attendance,
        "probability": prediction.probability,
        "passed": prediction.passed,
        "verdict": verdict(&prediction),
        "weights": weights,
        "formula": weights.to_string(),
        "loss": session.current_loss(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn handle_inspect(data: &Path) -> Result<()> {
    let dataset = DatasetLoader::from_path(data)
        .with_context(|| format!("loading {}", data.display()))?;
    let summary = dataset
        .summary()
        .ok_or_else(|| anyhow!("{} holds no samples", data.display()))?;
    let normalization = Normalizer::fit(&dataset)?;
    let output = json!({
        "path": data,
        "summary": summary,
        "failed": summary.failed(),
        "normalization": normalization,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

const fn verdict(prediction: &Prediction) -> &'static str {
    if prediction.passed {
        "pass"
    } else {
        "fail"
    }
}

fn parse_point(raw: &str) -> Result<RawPoint, String> {
    let (hours, attendance) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected `hours,attendance`, got `{raw}`"))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|err| format!("`{}`: {err}", value.trim()))
    };
    Ok(RawPoint::new(parse(hours)?, parse(attendance)?))
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!("tutor-{}.log.jsonl", now.format("%Y%m%d-%H%M%S"))))
}
