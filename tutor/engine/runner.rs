use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::sleep;

use crate::{config::TrainingSettings, error::EngineError, session::Session, trainer::StepOutcome};

/// Session shared between the tick loop and whoever drives it.
pub type SharedSession = Arc<Mutex<Session>>;

/// Wraps a session for use with [`TrainingLoop`].
#[must_use]
pub fn shared(session: Session) -> SharedSession {
    Arc::new(Mutex::new(session))
}

/// Why a loop returned.
#[derive(Debug)]
pub enum LoopExit {
    /// The run used its whole budget.
    Completed,
    /// The session was not running when the loop woke up.
    Stopped,
    /// A step failed; the session is idle again.
    Aborted(EngineError),
}

/// Result of one [`TrainingLoop`] run.
#[derive(Debug)]
pub struct LoopSummary {
    /// Steps committed by this loop.
    pub ticks: usize,
    /// Exit reason.
    pub exit: LoopExit,
}

/// Drives a session one step per tick until it stops, completes, or fails.
///
/// The lock is held for a single step only; other tasks use the session
/// between ticks.
#[derive(Debug, Clone)]
pub struct TrainingLoop {
    session: SharedSession,
    tick_delay: Duration,
}

impl TrainingLoop {
    /// Creates a loop ticking every `tick_delay`.
    #[must_use]
    pub const fn new(session: SharedSession, tick_delay: Duration) -> Self {
        Self {
            session,
            tick_delay,
        }
    }

    /// Creates a loop using the configured delay.
    #[must_use]
    pub const fn from_settings(session: SharedSession, settings: &TrainingSettings) -> Self {
        Self::new(session, settings.tick_delay())
    }

    /// The driven session.
    #[must_use]
    pub const fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Delay between ticks.
    #[must_use]
    pub const fn tick_delay(&self) -> Duration {
        self.tick_delay
    }

    /// Runs until the session leaves `Running`.
    pub async fn run(&self) -> LoopSummary {
        self.run_observed(|_| {}).await
    }

    /// Like [`TrainingLoop::run`], calling `observer` after every committed
    /// step with the lock released.
    pub async fn run_observed<F>(&self, mut observer: F) -> LoopSummary
    where
        F: FnMut(&StepOutcome),
    {
        let mut ticks = 0;
        loop {
            if self.tick_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                sleep(self.tick_delay).await;
            }
            let result = {
                let mut session = self.session.lock();
                session.tick()
            };
            let exit = match result {
                Ok(Some(outcome)) => {
                    ticks += 1;
                    observer(&outcome);
                    if outcome.finished {
                        LoopExit::Completed
                    } else {
                        continue;
                    }
                }
                Ok(None) => LoopExit::Stopped,
                Err(err) => LoopExit::Aborted(err),
            };
            return LoopSummary { ticks, exit };
        }
    }
}
