//! Session orchestration: owns the dataset, normalization, model and run state,
//! and is the only place where they change.

use chrono::{DateTime, Utc};
use rand::{rngs::SmallRng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::{
    config::TrainingSettings,
    dataset::{Dataset, RawPoint, Sample},
    error::{EngineError, Result},
    model::{LogisticModel, TrainingMatrix, WeightVector},
    normalizer::{NormalizationParams, Normalizer, StandardizedSample},
    telemetry::{events, TutorTelemetry},
    trainer::{
        LossSample, StartKind, StepOutcome, Trainer, TrainerState, TrainingRunState,
        DEFAULT_TOTAL_ITERATIONS,
    },
};

/// Probabilities strictly above this are a "pass" verdict.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Model output for a raw query point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// The queried point.
    pub point: RawPoint,
    /// Probability of passing, in `[0, 1]`.
    pub probability: f64,
    /// `probability > 0.5`.
    pub passed: bool,
}

/// Owned, read-only view of everything a renderer needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Raw samples in source order.
    pub samples: Vec<Sample>,
    /// Normalization parameters, once data is loaded.
    pub normalization: Option<NormalizationParams>,
    /// Current weights.
    pub weights: WeightVector,
    /// Loss trace.
    pub history: Vec<LossSample>,
    /// Run counters.
    pub run_state: TrainingRunState,
    /// Prediction for the stored query point, if any.
    pub prediction: Option<Prediction>,
}

#[derive(Debug, Clone)]
struct LoadedData {
    dataset: Dataset,
    params: NormalizationParams,
    standardized: Vec<StandardizedSample>,
    matrix: TrainingMatrix,
}

/// Builder for [`Session`].
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    seed: Option<u64>,
    total_iterations: usize,
    telemetry: Option<TutorTelemetry>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            seed: None,
            total_iterations: DEFAULT_TOTAL_ITERATIONS,
            telemetry: None,
        }
    }
}

impl SessionBuilder {
    /// Seeds weight initialization.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Iteration budget.
    #[must_use]
    pub const fn total_iterations(mut self, total_iterations: usize) -> Self {
        self.total_iterations = total_iterations;
        self
    }

    /// Applies the `[training]` settings.
    #[must_use]
    pub const fn settings(mut self, settings: &TrainingSettings) -> Self {
        self.total_iterations = settings.total_iterations;
        self.seed = settings.seed;
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TutorTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds an idle session with random initial weights.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidIterations`] when the budget is zero.
    pub fn build(self) -> Result<Session> {
        let trainer = Trainer::new(self.total_iterations)?;
        let mut rng = self
            .seed
            .map_or_else(SmallRng::from_entropy, SmallRng::seed_from_u64);
        let model = LogisticModel::random(&mut rng);
        Ok(Session {
            data: None,
            model,
            trainer,
            rng,
            query: None,
            telemetry: self.telemetry,
        })
    }
}

/// Interactive training session.
#[derive(Debug)]
pub struct Session {
    data: Option<LoadedData>,
    model: LogisticModel,
    trainer: Trainer,
    rng: SmallRng,
    query: Option<RawPoint>,
    telemetry: Option<TutorTelemetry>,
}

impl Session {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Replaces the dataset, refits normalization, and resets the run.
    /// On error the previous state is kept.
    ///
    /// # Errors
    ///
    /// [`EngineError::EmptyDataset`] for zero samples,
    /// [`EngineError::TrainingActive`] while running.
    pub fn load_dataset(&mut self, dataset: Dataset) -> Result<()> {
        if self.trainer.is_running() {
            return Err(EngineError::TrainingActive("the dataset"));
        }
        let params = Normalizer::fit(&dataset)?;
        let standardized = Normalizer::standardize(&dataset, &params);
        let matrix = TrainingMatrix::from_samples(&standardized);
        let samples = dataset.len();
        self.data = Some(LoadedData {
            dataset,
            params,
            standardized,
            matrix,
        });
        self.trainer.reset(&mut self.model, &mut self.rng);
        self.log(
            LogLevel::Info,
            "session.dataset_loaded",
            json!({ "samples": samples }),
        );
        self.event(
            events::DATASET_LOADED,
            json!({ "samples": samples, "normalization": params }),
        );
        Ok(())
    }

    /// Convenience over [`Session::load_dataset`].
    ///
    /// # Errors
    ///
    /// Same as [`Session::load_dataset`].
    pub fn load_samples(&mut self, samples: Vec<Sample>) -> Result<()> {
        self.load_dataset(Dataset::from_samples(samples))
    }

    /// Enters `Running`, restarting a completed run.
    ///
    /// # Errors
    ///
    /// [`EngineError::DatasetNotLoaded`] before any dataset was loaded.
    pub fn start(&mut self) -> Result<StartKind> {
        if self.data.is_none() {
            return Err(EngineError::DatasetNotLoaded);
        }
        let kind = self.trainer.start(&mut self.model, &mut self.rng);
        if kind != StartKind::AlreadyRunning {
            let run = self.trainer.run_state();
            self.log(
                LogLevel::Info,
                "trainer.started",
                json!({ "kind": kind, "iteration": run.current_iteration, "total": run.total_iterations }),
            );
            self.event(
                events::TRAINING_STARTED,
                json!({ "kind": kind, "total_iterations": run.total_iterations, "reset": kind == StartKind::Restarted }),
            );
        }
        Ok(kind)
    }

    /// Pauses a running session. Returns whether anything changed.
    pub fn stop(&mut self) -> bool {
        let stopped = self.trainer.stop();
        if stopped {
            let iteration = self.trainer.current_iteration();
            self.log(
                LogLevel::Info,
                "trainer.paused",
                json!({ "iteration": iteration }),
            );
            self.event(events::TRAINING_PAUSED, json!({ "iteration": iteration }));
        }
        stopped
    }

    /// Start when idle or paused, pause when running. Returns the new state.
    ///
    /// # Errors
    ///
    /// [`EngineError::DatasetNotLoaded`] when starting without data.
    pub fn start_or_toggle_training(&mut self) -> Result<TrainerState> {
        if self.trainer.is_running() {
            self.stop();
        } else {
            self.start()?;
        }
        Ok(self.trainer.state())
    }

    /// Clears history, zeroes the counter, redraws weights and goes idle.
    pub fn reset(&mut self) {
        self.trainer.reset(&mut self.model, &mut self.rng);
        self.log(LogLevel::Info, "trainer.reset", json!({}));
        self.event(events::TRAINING_RESET, json!({}));
    }

    /// Changes the iteration budget.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidIterations`] for zero,
    /// [`EngineError::TrainingActive`] while running.
    pub fn set_total_iterations(&mut self, total_iterations: usize) -> Result<()> {
        self.trainer.set_total_iterations(total_iterations)
    }

    /// Runs exactly one step if the session is running; `Ok(None)` otherwise.
    /// Any error ends the run, keeping the last good weights and history.
    ///
    /// # Errors
    ///
    /// The step failure, after the run has been aborted.
    pub fn tick(&mut self) -> Result<Option<StepOutcome>> {
        if !self.trainer.is_running() {
            return Ok(None);
        }
        let result = match &self.data {
            Some(data) => self.trainer.step(&mut self.model, &data.matrix),
            None => {
                self.trainer.abort();
                Err(EngineError::DatasetNotLoaded)
            }
        };
        match result {
            Ok(outcome) => {
                self.report_step(&outcome);
                Ok(Some(outcome))
            }
            Err(err) => {
                self.trainer.abort();
                let iteration = self.trainer.current_iteration();
                self.log(
                    LogLevel::Error,
                    "trainer.aborted",
                    json!({ "iteration": iteration, "error": err.to_string() }),
                );
                self.event(
                    events::TRAINING_ABORTED,
                    json!({ "iteration": iteration, "error": err.to_string() }),
                );
                Err(err)
            }
        }
    }

    /// Probability of passing for a raw point under the current weights.
    ///
    /// # Errors
    ///
    /// [`EngineError::DatasetNotLoaded`] when no normalization exists yet.
    pub fn predict(&self, point: RawPoint) -> Result<Prediction> {
        let data = self.data.as_ref().ok_or(EngineError::DatasetNotLoaded)?;
        let probability = self.model.hypothesis(data.params.to_standardized(point));
        Ok(Prediction {
            point,
            probability,
            passed: probability > DECISION_THRESHOLD,
        })
    }

    /// Stores the query point shown alongside the data.
    pub fn set_query(&mut self, point: RawPoint) {
        self.query = Some(point);
    }

    /// Forgets the query point.
    pub fn clear_query(&mut self) {
        self.query = None;
    }

    /// Prediction for the stored query point under the current weights.
    #[must_use]
    pub fn last_prediction(&self) -> Option<Prediction> {
        self.query.and_then(|point| self.predict(point).ok())
    }

    /// Current weights.
    #[must_use]
    pub const fn weights(&self) -> WeightVector {
        self.model.weights()
    }

    /// Loss trace of the current run.
    #[must_use]
    pub fn history(&self) -> &[LossSample] {
        self.trainer.history()
    }

    /// Run counters.
    #[must_use]
    pub fn run_state(&self) -> TrainingRunState {
        self.trainer.run_state()
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TrainerState {
        self.trainer.state()
    }

    /// Whether ticks currently step.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.trainer.is_running()
    }

    /// Loaded raw dataset.
    #[must_use]
    pub fn dataset(&self) -> Option<&Dataset> {
        self.data.as_ref().map(|data| &data.dataset)
    }

    /// Normalization derived from the loaded dataset.
    #[must_use]
    pub fn normalization(&self) -> Option<&NormalizationParams> {
        self.data.as_ref().map(|data| &data.params)
    }

    /// Standardized samples; empty before loading.
    #[must_use]
    pub fn standardized(&self) -> &[StandardizedSample] {
        self.data
            .as_ref()
            .map(|data| data.standardized.as_slice())
            .unwrap_or_default()
    }

    /// Loss of the current weights over the loaded data.
    #[must_use]
    pub fn current_loss(&self) -> Option<f64> {
        self.data.as_ref().map(|data| self.model.loss(&data.matrix))
    }

    /// Owned snapshot for renderers.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            taken_at: Utc::now(),
            samples: self
                .data
                .as_ref()
                .map(|data| data.dataset.samples.clone())
                .unwrap_or_default(),
            normalization: self.normalization().copied(),
            weights: self.weights(),
            history: self.history().to_vec(),
            run_state: self.run_state(),
            prediction: self.last_prediction(),
        }
    }

    /// Telemetry handle, if attached.
    #[must_use]
    pub const fn telemetry(&self) -> Option<&TutorTelemetry> {
        self.telemetry.as_ref()
    }

    fn report_step(&self, outcome: &StepOutcome) {
        self.log(
            LogLevel::Debug,
            "trainer.step",
            json!({ "iteration": outcome.iteration, "loss": outcome.loss }),
        );
        self.event(
            events::TRAINING_TICK,
            json!({
                "iteration": outcome.iteration,
                "loss": outcome.loss,
                "weights": outcome.weights.as_array(),
            }),
        );
        if outcome.recorded {
            self.event(
                events::LOSS_SAMPLE,
                json!({ "iteration": outcome.iteration, "loss": outcome.loss }),
            );
        }
        if outcome.finished {
            let total = self.trainer.total_iterations();
            self.log(
                LogLevel::Info,
                "trainer.completed",
                json!({ "iterations": total, "loss": outcome.loss }),
            );
            self.event(
                events::TRAINING_COMPLETED,
                json!({
                    "iterations": total,
                    "loss": outcome.loss,
                    "weights": outcome.weights.as_array(),
                }),
            );
        }
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            let _ = telemetry.log(level, message, metadata);
        }
    }

    fn event(&self, event_type: &str, payload: Value) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            let _ = telemetry.event(event_type, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_event_bus::MemoryEventBus;
    use shared_logging::MemoryLogger;
    use std::sync::Arc;

    fn four_points() -> Vec<Sample> {
        vec![
            Sample::new(1.0, 10.0, false),
            Sample::new(2.0, 20.0, false),
            Sample::new(9.0, 90.0, true),
            Sample::new(10.0, 100.0, true),
        ]
    }

    fn session(total: usize) -> Session {
        Session::builder()
            .seed(17)
            .total_iterations(total)
            .build()
            .unwrap()
    }

    fn drain(session: &mut Session) -> usize {
        let mut ticks = 0;
        while session.tick().unwrap().is_some() {
            ticks += 1;
        }
        ticks
    }

    #[test]
    fn four_point_scenario_reduces_loss() {
        let mut session = session(100);
        session.load_samples(four_points()).unwrap();
        session.start().unwrap();
        assert_eq!(drain(&mut session), 100);
        let history = session.history();
        assert_eq!(history.first().unwrap().iteration, 0);
        assert_eq!(history.last().unwrap().iteration, 99);
        assert!(history.last().unwrap().loss < history.first().unwrap().loss);
        assert_eq!(session.state(), TrainerState::Idle);
    }

    #[test]
    fn predictions_agree_with_labels_after_training() {
        let dataset = Dataset::separable(60, 9);
        let mut session = session(400);
        session.load_dataset(dataset.clone()).unwrap();
        session.start().unwrap();
        drain(&mut session);
        assert!(session.current_loss().unwrap() < 0.3);
        let extremes = [
            dataset
                .samples
                .iter()
                .max_by(|a, b| {
                    (a.study_hours / 50.0 + a.attendance / 100.0)
                        .total_cmp(&(b.study_hours / 50.0 + b.attendance / 100.0))
                })
                .unwrap(),
            dataset
                .samples
                .iter()
                .min_by(|a, b| {
                    (a.study_hours / 50.0 + a.attendance / 100.0)
                        .total_cmp(&(b.study_hours / 50.0 + b.attendance / 100.0))
                })
                .unwrap(),
        ];
        for sample in extremes {
            let prediction = session.predict(sample.features()).unwrap();
            assert_eq!(prediction.passed, sample.passed);
        }
    }

    #[test]
    fn four_point_predictions_match_training_labels() {
        let mut session = session(100);
        session.load_samples(four_points()).unwrap();
        session.start().unwrap();
        drain(&mut session);
        for sample in four_points() {
            let prediction = session.predict(sample.features()).unwrap();
            assert_eq!(prediction.passed, sample.passed);
            assert!(prediction.probability > 0.0 && prediction.probability < 1.0);
        }
    }

    #[test]
    fn empty_dataset_is_rejected_and_state_kept() {
        let mut session = session(10);
        session.load_samples(four_points()).unwrap();
        let weights = session.weights();
        let err = session.load_dataset(Dataset::default()).unwrap_err();
        assert!(matches!(err, EngineError::EmptyDataset));
        assert_eq!(session.dataset().unwrap().len(), 4);
        assert_eq!(session.weights(), weights);
    }

    #[test]
    fn nothing_runs_without_data() {
        let mut session = session(10);
        assert!(matches!(
            session.start(),
            Err(EngineError::DatasetNotLoaded)
        ));
        assert!(matches!(
            session.predict(RawPoint::new(10.0, 80.0)),
            Err(EngineError::DatasetNotLoaded)
        ));
        assert!(session.tick().unwrap().is_none());
        assert!(session.standardized().is_empty());
        assert!(session.current_loss().is_none());
    }

    #[test]
    fn toggle_pauses_and_resumes() {
        let mut session = session(50);
        session.load_samples(four_points()).unwrap();
        assert_eq!(
            session.start_or_toggle_training().unwrap(),
            TrainerState::Running
        );
        for _ in 0..5 {
            session.tick().unwrap();
        }
        assert_eq!(
            session.start_or_toggle_training().unwrap(),
            TrainerState::Paused
        );
        let weights = session.weights();
        assert!(session.tick().unwrap().is_none());
        assert_eq!(session.weights(), weights);
        assert_eq!(session.run_state().current_iteration, 5);

        session.start_or_toggle_training().unwrap();
        let outcome = session.tick().unwrap().unwrap();
        assert_eq!(outcome.iteration, 5);
    }

    #[test]
    fn restart_after_completion_clears_history_and_redraws_weights() {
        let mut session = session(25);
        session.load_samples(four_points()).unwrap();
        session.start().unwrap();
        drain(&mut session);
        let trained = session.weights();
        assert_eq!(
            session
                .history()
                .iter()
                .map(|s| s.iteration)
                .collect::<Vec<_>>(),
            vec![0, 10, 20, 24]
        );

        assert_eq!(session.start().unwrap(), StartKind::Restarted);
        assert!(session.history().is_empty());
        assert_eq!(session.run_state().current_iteration, 0);
        assert_ne!(session.weights(), trained);
    }

    #[test]
    fn budget_and_dataset_are_locked_while_running() {
        let mut session = session(20);
        session.load_samples(four_points()).unwrap();
        session.start().unwrap();
        assert!(matches!(
            session.set_total_iterations(5),
            Err(EngineError::TrainingActive(_))
        ));
        assert!(matches!(
            session.load_samples(four_points()),
            Err(EngineError::TrainingActive(_))
        ));
        session.stop();
        session.set_total_iterations(5).unwrap();
        assert_eq!(session.run_state().total_iterations, 5);
    }

    #[test]
    fn predict_is_pure_and_tracks_latest_weights() {
        let mut session = session(30);
        session.load_samples(four_points()).unwrap();
        let point = RawPoint::new(9.5, 95.0);
        let before = session.predict(point).unwrap();
        assert_eq!(session.predict(point).unwrap(), before);
        session.start().unwrap();
        session.tick().unwrap();
        let after = session.predict(point).unwrap();
        assert!(after.probability > before.probability);
    }

    #[test]
    fn snapshot_carries_render_inputs() {
        let mut session = session(15);
        session.load_samples(four_points()).unwrap();
        session.set_query(RawPoint::new(3.0, 30.0));
        session.start().unwrap();
        drain(&mut session);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.samples.len(), 4);
        assert_eq!(snapshot.history.len(), 3);
        assert_eq!(snapshot.weights, session.weights());
        assert!(!snapshot.run_state.running);
        let prediction = snapshot.prediction.unwrap();
        assert!((prediction.point.study_hours - 3.0).abs() < f64::EPSILON);
        assert!(serde_json::to_string(&snapshot).is_ok());

        session.clear_query();
        assert!(session.last_prediction().is_none());
    }

    #[test]
    fn failed_step_aborts_and_keeps_last_good_state() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let sink = Arc::new(MemoryLogger::new());
        let telemetry = TutorTelemetry::builder("abort-test")
            .log_sink(sink.clone())
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let mut session = Session::builder()
            .seed(5)
            .total_iterations(10)
            .telemetry(telemetry)
            .build()
            .unwrap();
        let mut samples = four_points();
        samples[0].study_hours = f64::NAN;
        session.load_samples(samples).unwrap();
        let weights = session.weights();
        session.start().unwrap();

        let err = session.tick().unwrap_err();
        assert!(matches!(err, EngineError::NumericInstability { iteration: 0, .. }));
        assert_eq!(session.state(), TrainerState::Idle);
        assert_eq!(session.weights(), weights);
        assert!(session.history().is_empty());
        assert!(session.tick().unwrap().is_none());
        assert_eq!(bus.events_of_type(events::TRAINING_ABORTED).len(), 1);

        let records = sink.records();
        let aborted = records.last().unwrap();
        assert_eq!(aborted.message, "trainer.aborted");
        assert_eq!(aborted.level, LogLevel::Error);
        assert_eq!(aborted.module, "abort-test");
        assert_eq!(aborted.metadata["iteration"].as_u64(), Some(0));
        assert!(aborted.metadata["error"]
            .as_str()
            .unwrap()
            .contains("numeric instability"));
    }

    #[test]
    fn same_seed_same_run() {
        let run = || {
            let mut session = session(40);
            session.load_samples(four_points()).unwrap();
            session.start().unwrap();
            drain(&mut session);
            (session.weights(), session.history().to_vec())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn telemetry_sees_lifecycle() {
        let bus = Arc::new(MemoryEventBus::new(64));
        let sink = Arc::new(MemoryLogger::new());
        let telemetry = TutorTelemetry::builder("session-test")
            .log_sink(sink.clone())
            .min_level(LogLevel::Info)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let mut session = Session::builder()
            .seed(3)
            .total_iterations(12)
            .telemetry(telemetry)
            .build()
            .unwrap();
        session.load_samples(four_points()).unwrap();
        session.start().unwrap();
        drain(&mut session);

        assert_eq!(bus.events_of_type(events::DATASET_LOADED).len(), 1);
        assert_eq!(bus.events_of_type(events::TRAINING_TICK).len(), 12);
        assert_eq!(bus.events_of_type(events::LOSS_SAMPLE).len(), 3);
        assert_eq!(bus.events_of_type(events::TRAINING_COMPLETED).len(), 1);
        assert_eq!(
            sink.messages(),
            vec![
                "session.dataset_loaded",
                "trainer.started",
                "trainer.completed"
            ]
        );
    }
}
