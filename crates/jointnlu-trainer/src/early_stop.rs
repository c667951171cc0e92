//! Patience-based early stopping on a higher-is-better validation score.

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// New best score; the caller should checkpoint.
    Improved,
    /// No improvement, patience left.
    Wait,
    /// Patience exhausted.
    Stop,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    counter: usize,
    stopped: bool,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            counter: 0,
            stopped: false,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Feed one validation score. Only a strictly higher score counts as
    /// an improvement.
    pub fn update(&mut self, score: f64) -> StopDecision {
        match self.best {
            Some(best) if score <= best => {
                self.counter += 1;
                info!(
                    counter = self.counter,
                    patience = self.patience,
                    best,
                    score,
                    "no improvement"
                );
                if self.counter >= self.patience {
                    self.stopped = true;
                    StopDecision::Stop
                } else {
                    StopDecision::Wait
                }
            }
            previous => {
                info!(?previous, score, "validation score improved");
                self.best = Some(score);
                self.counter = 0;
                StopDecision::Improved
            }
        }
    }
}
