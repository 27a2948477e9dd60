use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineError, Result},
    model::{loss, LogisticModel, TrainingMatrix, WeightVector, LEARNING_RATE},
};

/// A loss sample is recorded every `HISTORY_INTERVAL` iterations (plus the last one).
pub const HISTORY_INTERVAL: usize = 10;
/// Iteration budget used when none is configured.
pub const DEFAULT_TOTAL_ITERATIONS: usize = 200;

/// Lifecycle of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainerState {
    /// Not started, finished, or aborted.
    Idle,
    /// Stepping on every tick.
    Running,
    /// Stopped mid-run; resumable.
    Paused,
}

/// Loss observed after a given iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossSample {
    /// Zero-based iteration index.
    pub iteration: usize,
    /// Cross-entropy after that iteration's update.
    pub loss: f64,
}

/// Progress counters of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRunState {
    /// Steps completed.
    pub current_iteration: usize,
    /// Step budget.
    pub total_iterations: usize,
    /// Whether the trainer is stepping.
    pub running: bool,
    /// Full lifecycle state.
    pub state: TrainerState,
}

/// What `start` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartKind {
    /// New run from iteration zero.
    Fresh,
    /// Continued a paused or aborted run.
    Resumed,
    /// Previous run was complete; history and weights were reset first.
    Restarted,
    /// Already running; nothing changed.
    AlreadyRunning,
}

/// Result of one committed step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Index of the iteration just performed.
    pub iteration: usize,
    /// Loss under the new weights.
    pub loss: f64,
    /// Weights after the update.
    pub weights: WeightVector,
    /// Whether a history sample was appended.
    pub recorded: bool,
    /// Whether the run reached its budget.
    pub finished: bool,
}

/// Batch gradient-descent driver. One `step` is one epoch over the full dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Trainer {
    state: TrainerState,
    current_iteration: usize,
    total_iterations: usize,
    history: Vec<LossSample>,
}

impl Default for Trainer {
    fn default() -> Self {
        Self {
            state: TrainerState::Idle,
            current_iteration: 0,
            total_iterations: DEFAULT_TOTAL_ITERATIONS,
            history: Vec::new(),
        }
    }
}

impl Trainer {
    /// Idle trainer at iteration zero.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidIterations`] when `total_iterations` is zero.
    pub fn new(total_iterations: usize) -> Result<Self> {
        if total_iterations == 0 {
            return Err(EngineError::InvalidIterations(total_iterations));
        }
        Ok(Self {
            total_iterations,
            ..Self::default()
        })
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TrainerState {
        self.state
    }

    /// Whether the trainer is stepping.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == TrainerState::Running
    }

    /// Whether the iteration budget is used up.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.current_iteration >= self.total_iterations
    }

    /// Steps completed in this run.
    #[must_use]
    pub const fn current_iteration(&self) -> usize {
        self.current_iteration
    }

    /// Step budget.
    #[must_use]
    pub const fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    /// Recorded loss samples, in iteration order.
    #[must_use]
    pub fn history(&self) -> &[LossSample] {
        &self.history
    }

    /// Counters snapshot.
    #[must_use]
    pub fn run_state(&self) -> TrainingRunState {
        TrainingRunState {
            current_iteration: self.current_iteration,
            total_iterations: self.total_iterations,
            running: self.is_running(),
            state: self.state,
        }
    }

    /// Changes the budget. Refused while running.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidIterations`] for zero,
    /// [`EngineError::TrainingActive`] while running.
    pub fn set_total_iterations(&mut self, total_iterations: usize) -> Result<()> {
        if total_iterations == 0 {
            return Err(EngineError::InvalidIterations(total_iterations));
        }
        if self.is_running() {
            return Err(EngineError::TrainingActive("total iterations"));
        }
        self.total_iterations = total_iterations;
        Ok(())
    }

    /// Enters `Running`. A completed run is reset first: history cleared,
    /// iteration zeroed, weights redrawn from `rng`.
    pub fn start<R: Rng + ?Sized>(&mut self, model: &mut LogisticModel, rng: &mut R) -> StartKind {
        if self.is_running() {
            return StartKind::AlreadyRunning;
        }
        let kind = if self.is_complete() {
            self.clear(model, rng);
            StartKind::Restarted
        } else if self.current_iteration == 0 {
            StartKind::Fresh
        } else {
            StartKind::Resumed
        };
        self.state = TrainerState::Running;
        kind
    }

    /// `Running` -> `Paused`. Returns whether the state changed.
    pub fn stop(&mut self) -> bool {
        if self.is_running() {
            self.state = TrainerState::Paused;
            true
        } else {
            false
        }
    }

    /// Back to `Idle` at iteration zero with empty history and fresh weights.
    pub fn reset<R: Rng + ?Sized>(&mut self, model: &mut LogisticModel, rng: &mut R) {
        self.clear(model, rng);
        self.state = TrainerState::Idle;
    }

    /// Ends the current run without touching weights or history.
    pub fn abort(&mut self) {
        self.state = TrainerState::Idle;
    }

    /// Performs one epoch. The step either commits entirely (weights, loss,
    /// history, counter) or leaves everything as it was and ends the run.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotRunning`] outside `Running`;
    /// [`EngineError::NumericInstability`] when the update or its loss is non-finite;
    /// [`EngineError::Internal`] on an empty matrix or exhausted budget.
    pub fn step(&mut self, model: &mut LogisticModel, data: &TrainingMatrix) -> Result<StepOutcome> {
        if !self.is_running() {
            return Err(EngineError::NotRunning(self.state));
        }
        if data.is_empty() {
            self.abort();
            return Err(EngineError::Internal("training matrix has no rows".into()));
        }
        if self.is_complete() {
            self.abort();
            return Err(EngineError::Internal(format!(
                "iteration {} exceeds budget {}",
                self.current_iteration, self.total_iterations
            )));
        }

        let iteration = self.current_iteration;
        let next = model.gradient_step(data, LEARNING_RATE);
        if !next.is_finite() {
            self.abort();
            return Err(EngineError::NumericInstability {
                iteration,
                detail: format!("update produced non-finite weights {:?}", next.as_array()),
            });
        }
        let loss = loss(&next, data);
        if !loss.is_finite() {
            self.abort();
            return Err(EngineError::NumericInstability {
                iteration,
                detail: format!("loss evaluated to {loss}"),
            });
        }

        model.set_weights(next);
        let recorded =
            iteration % HISTORY_INTERVAL == 0 || iteration == self.total_iterations - 1;
        if recorded {
            self.history.push(LossSample { iteration, loss });
        }
        self.current_iteration += 1;
        let finished = self.is_complete();
        if finished {
            self.state = TrainerState::Idle;
        }
        Ok(StepOutcome {
            iteration,
            loss,
            weights: next,
            recorded,
            finished,
        })
    }

    fn clear<R: Rng + ?Sized>(&mut self, model: &mut LogisticModel, rng: &mut R) {
        self.history.clear();
        self.current_iteration = 0;
        model.reinitialize(rng);
    }
}
