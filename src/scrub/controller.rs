use std::sync::atomic::Ordering as AtomicOrdering;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::data::dataset::Dataset;
use crate::error::{PerturbError, Result, ScrubError};
use crate::network::network::Network;
use crate::scrub::config::ScrubConfig;
use crate::scrub::ordering::{Ordering, OrderingCursor};
use crate::scrub::perturb::{PerturbContext, Perturbation, Perturber};
use crate::scrub::record::{unix_time, RoundLog, RoundRecord};
use crate::train::epoch::{run_epoch, EpochMode, EpochResult};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// `n_removals` accepted removals reached.
    Completed,
    /// The ordering ran out of candidates first.
    OrderingExhausted,
    /// The stop flag was raised between rounds.
    Stopped,
    /// `max_consecutive_failures` rounds failed in a row.
    TooManyFailures,
}

#[derive(Debug, Clone)]
pub struct ScrubOutcome {
    /// The last accepted model.
    pub network: Network,
    pub removed_count: usize,
    /// Bookkeeping set that later residual sets exclude, in insertion order.
    pub scrubbed: Vec<usize>,
    /// Indices of accepted rounds only.
    pub forgotten: Vec<usize>,
    pub rounds: Vec<RoundRecord>,
    /// Size of `full` minus `scrubbed`.
    pub residual_size: usize,
    pub end: RunEnd,
}

/// Result of the inner FOCI loop of one round.
struct InnerPass {
    network: Network,
    first: Perturbation,
    last: Perturbation,
    iterations: usize,
}

/// Drives repeated removal rounds over a trained model.
///
/// The controller owns the live model for the whole run. Each round draws a
/// candidate batch from the ordering, perturbs a copy of the model until the
/// FOCI value drops to `cheap_foci_thresh` (or the iteration cap), and keeps
/// the result only when validation accuracy does not fall by more than
/// `val_gap_skip`. Every round appends exactly one record.
pub struct ScrubController<P: Perturber> {
    config: ScrubConfig,
    perturber: P,
    log: Option<RoundLog>,
}

impl<P: Perturber> ScrubController<P> {
    pub fn new(config: ScrubConfig, perturber: P) -> Result<Self> {
        config.validate()?;
        Ok(ScrubController { config, perturber, log: None })
    }

    /// Also appends every round record to `log`.
    pub fn with_log(mut self, log: RoundLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn config(&self) -> &ScrubConfig {
        &self.config
    }

    /// Scrubs samples of `full` (the trained set) in `ordering` order.
    ///
    /// Too many consecutive failures return `ScrubError::TooManyFailures`
    /// carrying the partial outcome.
    pub fn run(
        &mut self,
        network: Network,
        full: &Dataset,
        val: &Dataset,
        ordering: Ordering,
    ) -> Result<ScrubOutcome> {
        self.config.perturb.check_param_count(network.param_count())?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.perturb.seed);
        let mut current = network;
        let before = self.evaluate(&mut current, val, &mut rng);
        let (val_acc_before, val_loss_before) = (before.accuracy, before.mean_loss);
        let mut prev_val_acc = val_acc_before;
        info!(
            val_acc = val_acc_before,
            val_loss = val_loss_before,
            params = current.param_count(),
            previously_removed = self.config.previously_removed,
            "scrub start"
        );

        let mut cursor = OrderingCursor::new(ordering);
        let mut scrubbed: Vec<usize> = Vec::new();
        let mut forgotten: Vec<usize> = Vec::new();
        let mut rounds: Vec<RoundRecord> = Vec::new();
        let mut removed_count = 0usize;
        let mut consecutive_failures = 0usize;
        let mut end = RunEnd::Completed;

        while removed_count < self.config.n_removals {
            if self.stop_requested() {
                info!(removed_count, "stop requested; ending scrub run");
                end = RunEnd::Stopped;
                break;
            }

            let batch = self.next_batch(&mut cursor, full, removed_count);
            if batch.is_empty() {
                warn!(
                    removed_count,
                    target = self.config.n_removals,
                    "ordering exhausted before reaching n_removals"
                );
                end = RunEnd::OrderingExhausted;
                break;
            }
            let forget = full.subset(&batch)?;

            let mut tentative = scrubbed.clone();
            tentative.extend_from_slice(&batch);
            let residual = full.exclude(&tentative);
            if self.config.keep_reverted_in_scrubbed {
                scrubbed = tentative;
            }
            info!(
                round = rounds.len(),
                removed_count,
                candidates = ?batch,
                residual = residual.len(),
                "scrub round"
            );

            let snapshot_digest = current.digest();
            // Removals from earlier runs on this checkpoint count towards k.
            let removed_so_far = self.config.previously_removed + removed_count + batch.len();
            let ctx = PerturbContext { removed_so_far, iteration: 0 };
            let pass = self.inner_loop(&current, &forget, ctx);

            let mut record =
                self.blank_record(val_acc_before, val_loss_before, &batch, removed_count);
            let mut failure: Option<PerturbError> = None;

            match pass {
                Ok(pass) => {
                    let mut candidate = pass.network;
                    let after = self.evaluate(&mut candidate, val, &mut rng);
                    record.foci_value = Some(pass.last.stop_metric);
                    record.foci_iters = pass.iterations;
                    record.sample_loss_before = Some(pass.first.sample_loss_before);
                    record.sample_gradnorm_before = Some(pass.first.gradnorm_before);
                    record.sample_loss_after = Some(pass.last.sample_loss_after);
                    record.sample_gradnorm_after = Some(pass.last.gradnorm_after);
                    record.val_acc_after = after.accuracy;
                    record.val_loss_after = after.mean_loss;

                    if prev_val_acc - after.accuracy > self.config.val_gap_skip {
                        warn!(
                            prev_val_acc,
                            val_acc = after.accuracy,
                            candidates = ?batch,
                            "validation drop too large; reverting"
                        );
                        record.bad_sample = true;
                    } else {
                        current = candidate;
                        prev_val_acc = after.accuracy;
                        removed_count += batch.len();
                        forgotten.extend_from_slice(&batch);
                        if !self.config.keep_reverted_in_scrubbed {
                            scrubbed.extend_from_slice(&batch);
                        }
                    }
                    consecutive_failures = 0;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        candidates = ?batch,
                        "perturbation failed; reverting round"
                    );
                    let after = self.evaluate(&mut current, val, &mut rng);
                    record.val_acc_after = after.accuracy;
                    record.val_loss_after = after.mean_loss;
                    record.failed = true;
                    consecutive_failures += 1;
                    failure = Some(err);
                }
            }

            if record.bad_sample || record.failed {
                debug_assert_eq!(current.digest(), snapshot_digest);
            }

            let resid = run_epoch(
                &mut current,
                &residual,
                self.config.perturb.loss,
                self.config.eval_batch_size,
                EpochMode::GradNorm,
                &mut rng,
            );
            record.residual_loss_after = resid.mean_loss;
            record.residual_acc_after = resid.accuracy;
            record.residual_gradnorm_after = resid.mean_gradnorm.unwrap_or(0.0);
            record.residual_size = residual.len();
            record.model_digest = current.digest();
            record.time = unix_time();
            debug!(residual_gradnorm = record.residual_gradnorm_after, "residual diagnostics");

            if let Some(log) = self.log.as_mut() {
                log.append(&record)?;
            }
            rounds.push(record);

            if let Some(last) = failure {
                if consecutive_failures >= self.config.max_consecutive_failures {
                    let residual_size = full.exclude(&scrubbed).len();
                    let partial = ScrubOutcome {
                        network: current,
                        removed_count,
                        scrubbed,
                        forgotten,
                        rounds,
                        residual_size,
                        end: RunEnd::TooManyFailures,
                    };
                    return Err(ScrubError::TooManyFailures {
                        count: consecutive_failures,
                        last,
                        partial: Box::new(partial),
                    });
                }
            }
        }

        let residual_size = full.exclude(&scrubbed).len();
        info!(removed_count, rounds = rounds.len(), residual_size, "scrub finished");
        Ok(ScrubOutcome {
            network: current,
            removed_count,
            scrubbed,
            forgotten,
            rounds,
            residual_size,
            end,
        })
    }

    /// Runs perturbation passes from `start` until the FOCI value is at or
    /// below the threshold or `max_foci_iters` passes have run.
    fn inner_loop(
        &mut self,
        start: &Network,
        forget: &Dataset,
        mut ctx: PerturbContext,
    ) -> std::result::Result<InnerPass, PerturbError> {
        let first = self.perturber.perturb(start, forget, &ctx)?;
        let mut network = first.network.clone();
        let mut last = first.clone();
        let mut iterations = 1;

        while last.stop_metric > self.config.cheap_foci_thresh {
            if iterations >= self.config.max_foci_iters {
                warn!(foci_value = last.stop_metric, iterations, "FOCI loop hit its iteration cap");
                break;
            }
            ctx.iteration = iterations;
            last = self.perturber.perturb(&network, forget, &ctx)?;
            network = last.network.clone();
            iterations += 1;
        }

        Ok(InnerPass { network, first, last, iterations })
    }

    /// Next candidate batch: one index, or in batch mode up to
    /// `scrub_batch_size` indices (never more than the removals still
    /// needed) optionally restricted to `removal_class`. Indices outside the
    /// trained set are skipped.
    fn next_batch(
        &self,
        cursor: &mut OrderingCursor,
        full: &Dataset,
        removed_count: usize,
    ) -> Vec<usize> {
        let wanted = match self.config.scrub_batch_size {
            Some(size) => size.min(self.config.n_removals - removed_count),
            None => 1,
        };
        let class_filter = self.config.scrub_batch_size.and(self.config.removal_class);

        let mut batch = Vec::with_capacity(wanted);
        while batch.len() < wanted {
            let Some(idx) = cursor.next() else { break };
            match full.label_of(idx) {
                None => debug!(index = idx, "candidate not in the trained set; skipping"),
                Some(label) if class_filter.map_or(true, |c| c == label) => batch.push(idx),
                Some(_) => {}
            }
        }
        batch
    }

    fn evaluate(&self, network: &mut Network, data: &Dataset, rng: &mut ChaCha8Rng) -> EpochResult {
        let batch_size = self.config.eval_batch_size;
        run_epoch(network, data, self.config.perturb.loss, batch_size, EpochMode::Eval, rng)
    }

    fn stop_requested(&self) -> bool {
        self.config.stop_flag.as_ref().map_or(false, |f| f.load(AtomicOrdering::Relaxed))
    }

    fn blank_record(
        &self,
        val_acc_before: f64,
        val_loss_before: f64,
        batch: &[usize],
        removed_count: usize,
    ) -> RoundRecord {
        let labels = &self.config.labels;
        let p = &self.config.perturb;
        RoundRecord {
            dataset: labels.dataset.clone(),
            model: labels.model.clone(),
            train_epochs: labels.train_epochs,
            selection_type: p.selection.to_string(),
            order: p.order.to_string(),
            hess_type: p.hess_type.to_string(),
            approx_type: p.approx_type.to_string(),
            run: labels.run,
            orig_trainset_size: p.orig_trainset_size,
            delta: p.delta,
            epsilon: p.epsilon,
            l2_reg: p.l2_reg,
            val_acc_before,
            val_loss_before,
            scrub_list: batch.to_vec(),
            n_removals: removed_count,
            foci_value: None,
            foci_iters: 0,
            bad_sample: false,
            failed: false,
            time: 0.0,
            val_acc_after: 0.0,
            val_loss_after: 0.0,
            sample_loss_before: None,
            sample_loss_after: None,
            sample_gradnorm_before: None,
            sample_gradnorm_after: None,
            residual_loss_after: 0.0,
            residual_acc_after: 0.0,
            residual_gradnorm_after: 0.0,
            residual_size: 0,
            model_digest: String::new(),
        }
    }
}
