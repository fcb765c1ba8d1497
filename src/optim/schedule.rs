use std::f64::consts::PI;

/// Cosine annealing from `base_lr` down to `min_lr` over `t_max` epochs,
/// then back up (the schedule is periodic like the usual closed form).
#[derive(Debug, Clone, Copy)]
pub struct CosineAnnealing {
    pub base_lr: f64,
    pub min_lr: f64,
    pub t_max: usize,
}

impl CosineAnnealing {
    /// Half-period used by the train command.
    pub const DEFAULT_T_MAX: usize = 200;

    pub fn new(base_lr: f64, t_max: usize) -> Self {
        CosineAnnealing { base_lr, min_lr: 0.0, t_max: t_max.max(1) }
    }

    /// Learning rate for the given 0-based epoch.
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let phase = PI * epoch as f64 / self.t_max as f64;
        self.min_lr + 0.5 * (self.base_lr - self.min_lr) * (1.0 + phase.cos())
    }
}
