//! Controller behaviour against a perturber whose effect on validation
//! accuracy is known exactly.
//!
//! The model is a 1-input, 2-class softmax layer with weights `[1, 0]` and
//! biases `[0, t]`: it predicts class 0 exactly when `x > t`. The validation
//! set holds `x_i = (i + 0.5) / 100` for `i` in `0..100`, all labelled 0, so
//! accuracy is the fraction of points above `t`.

use std::collections::{HashSet, VecDeque};

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use ferrite_scrub::error::PerturbError;
use ferrite_scrub::scrub::{
    Ordering, PerturbConfig, PerturbContext, Perturbation, Perturber, RoundLog, RunEnd, ScrubConfig,
    ScrubController, ScrubOutcome,
};
use ferrite_scrub::{ActivationFunction, Dataset, Network};

fn threshold_network(t: f64) -> Network {
    let mut net = Network::new(vec![(2, 1, ActivationFunction::Softmax)], &mut ChaCha8Rng::seed_from_u64(0));
    net.set_params(&[1.0, 0.0, 0.0, t]);
    net
}

fn validation() -> Dataset {
    let inputs = (0..100).map(|i| vec![(i as f64 + 0.5) / 100.0]).collect();
    Dataset::new(inputs, vec![0; 100], 2)
}

fn training() -> Dataset {
    let inputs = (0..100).map(|i| vec![i as f64 / 100.0]).collect();
    let labels = (0..100).map(|i| i % 2).collect();
    Dataset::new(inputs, labels, 2)
}

/// Moves the decision threshold to the next scripted value each call.
struct ThresholdScript {
    thresholds: VecDeque<f64>,
    calls: usize,
}

impl ThresholdScript {
    fn new(thresholds: &[f64]) -> Self {
        ThresholdScript { thresholds: thresholds.iter().copied().collect(), calls: 0 }
    }
}

impl Perturber for ThresholdScript {
    fn perturb(
        &mut self,
        network: &Network,
        _forget: &Dataset,
        _ctx: &PerturbContext,
    ) -> Result<Perturbation, PerturbError> {
        self.calls += 1;
        let t = self.thresholds.pop_front().unwrap_or(0.0);
        Ok(Perturbation {
            stop_metric: 0.0,
            network: threshold_network(t),
            sample_loss_before: 0.0,
            sample_loss_after: 0.0,
            gradnorm_before: 0.0,
            gradnorm_after: 0.0,
            selected: network.param_count(),
            noise_sigma: 0.0,
        })
    }
}

const SCRIPT: [f64; 4] = [0.02, 0.12, 0.03, 0.04];

fn run_scenario(keep_reverted: bool, log: Option<RoundLog>) -> ScrubOutcome {
    let script = ThresholdScript::new(&SCRIPT);
    let mut ctl = ScrubController::new(scenario_config(keep_reverted), script).unwrap();
    if let Some(log) = log {
        ctl = ctl.with_log(log);
    }
    ctl.run(threshold_network(0.0), &training(), &validation(), Ordering::generate(100, 11))
        .unwrap()
}

fn scenario_config(keep_reverted: bool) -> ScrubConfig {
    let mut cfg = ScrubConfig::new(PerturbConfig::new(100), 3);
    cfg.scrub_batch_size = Some(1);
    cfg.val_gap_skip = 0.05;
    cfg.keep_reverted_in_scrubbed = keep_reverted;
    cfg
}

#[test]
fn accept_revert_accept_reaches_three_removals() {
    let start_digest = threshold_network(0.0).digest();
    let out = run_scenario(false, None);

    assert_eq!(out.end, RunEnd::Completed);
    assert_eq!(out.removed_count, 3);
    assert_eq!(out.rounds.len(), 4);
    assert_eq!(out.residual_size, 97);

    let accepted: Vec<bool> = out.rounds.iter().map(|r| !r.bad_sample).collect();
    assert_eq!(accepted, vec![true, false, true, true]);
    assert_eq!(out.rounds.iter().map(|r| r.n_removals).collect::<Vec<_>>(), vec![0, 1, 1, 2]);

    assert!((out.rounds[0].val_acc_after - 0.98).abs() < 1e-12);
    assert!((out.rounds[1].val_acc_after - 0.88).abs() < 1e-12);
    assert!((out.rounds[2].val_acc_after - 0.97).abs() < 1e-12);

    // The reverted round left the round-1 model in place, bit for bit.
    assert_eq!(out.rounds[1].model_digest, out.rounds[0].model_digest);
    assert_ne!(out.rounds[0].model_digest, start_digest);
    assert_eq!(out.network.digest(), threshold_network(0.04).digest());
    assert_eq!(out.forgotten.len(), 3);
    assert_eq!(out.scrubbed, out.forgotten);
}

#[test]
fn reverted_candidates_stay_scrubbed_by_default() {
    let out = run_scenario(true, None);

    assert_eq!(out.removed_count, 3);
    assert_eq!(out.scrubbed.len(), 4);
    assert!(out.scrubbed.contains(&out.rounds[1].scrub_list[0]));
    assert!(!out.forgotten.contains(&out.rounds[1].scrub_list[0]));
    assert_eq!(out.residual_size, 96);
    // Later residual sets exclude the reverted candidate too.
    assert_eq!(out.rounds[2].residual_size, 97);
}

#[test]
fn every_round_is_logged_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rounds.csv");
    let out = run_scenario(false, Some(RoundLog::open(&path).unwrap()));

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 1 + out.rounds.len());
    let bad_column = text.lines().next().unwrap().split(',').position(|h| h == "bad_sample").unwrap();
    let flags: Vec<&str> = text.lines().skip(1).map(|l| l.split(',').nth(bad_column).unwrap()).collect();
    assert_eq!(flags, vec!["0", "1", "0", "0"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn round_invariants_hold_for_any_script(
        thresholds in proptest::collection::vec(0.0f64..0.3, 1..12),
        n_removals in 1usize..6,
        batch in 1usize..3,
        keep in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let mut cfg = ScrubConfig::new(PerturbConfig::new(100), n_removals);
        cfg.scrub_batch_size = Some(batch);
        cfg.keep_reverted_in_scrubbed = keep;
        let mut ctl = ScrubController::new(cfg, ThresholdScript::new(&thresholds)).unwrap();
        let start = threshold_network(0.0);
        let mut previous_digest = start.digest();
        let out = ctl.run(start, &training(), &validation(), Ordering::generate(100, seed)).unwrap();

        let mut removed = 0;
        let mut seen = HashSet::new();
        for record in &out.rounds {
            prop_assert_eq!(record.n_removals, removed);
            prop_assert!(record.scrub_list.iter().all(|i| seen.insert(*i)));
            if record.bad_sample {
                prop_assert_eq!(&record.model_digest, &previous_digest);
            } else {
                removed += record.scrub_list.len();
            }
            previous_digest = record.model_digest.clone();
        }
        prop_assert_eq!(removed, out.removed_count);

        let unique: HashSet<usize> = out.scrubbed.iter().copied().collect();
        prop_assert_eq!(unique.len(), out.scrubbed.len());
        if !keep {
            prop_assert_eq!(out.residual_size, 100 - out.removed_count);
        }
        if out.end == RunEnd::Completed {
            prop_assert!(out.removed_count >= n_removals);
        }
    }
}
