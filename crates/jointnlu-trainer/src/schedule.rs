//! Learning-rate schedule: linear warmup, then linear decay to zero.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearWarmup {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
}

impl LinearWarmup {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
        }
    }

    /// Number of optimizer steps a run of `epochs` over `train_size`
    /// examples is planned for.
    pub fn planned_steps(train_size: usize, batch_size: usize, epochs: usize) -> usize {
        (train_size as f64 / batch_size as f64 * epochs as f64) as usize
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Learning rate for the update made at `step` (0-based).
    pub fn rate(&self, step: usize) -> f64 {
        self.base_lr * self.factor(step)
    }

    fn factor(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return step as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        (remaining / span).max(0.0)
    }
}
