use ferrite_scrub::artifacts::{artifact_stem, ordering_path, scrubbed_checkpoint_path, Checkpoint};
use ferrite_scrub::data::{DatasetName, DatasetSource};
use ferrite_scrub::network::{Architecture, TrainingRecipe};
use ferrite_scrub::optim::OptimizerKind;
use ferrite_scrub::scrub::{
    scrub_model, ApproxType, FociType, HessType, PerturbConfig, RunEnd, ScrubConfig, ScrubJob,
    SelectionType,
};
use ferrite_scrub::train::{train_model, TrainOptions};
use ferrite_scrub::ScrubError;

fn recipe() -> TrainingRecipe {
    TrainingRecipe {
        dataset: DatasetName::Blobs,
        architecture: Architecture::Logistic,
        epochs: 6,
        learning_rate: 0.1,
        weight_decay: 5e-4,
        batch_size: 16,
        optimizer: OptimizerKind::Sgd,
        data_augment: false,
    }
}

fn source() -> DatasetSource {
    DatasetSource::blobs(200, 100, 2)
}

fn scrub_config(selection: SelectionType, hess: HessType, approx: ApproxType) -> ScrubConfig {
    let mut perturb = PerturbConfig::new(1);
    perturb.selection = selection;
    perturb.hess_type = hess;
    perturb.approx_type = approx;
    perturb.foci_type = FociType::Cheap;
    perturb.epsilon = f64::INFINITY;
    perturb.n_perturbations = 40;
    perturb.foci_candidates = 8;
    perturb.n_select = 4;
    perturb.seed = 1;
    let mut cfg = ScrubConfig::new(perturb, 3);
    cfg.max_foci_iters = 2;
    cfg.labels.run = 1;
    cfg
}

#[test]
fn train_then_scrub_round_trips_through_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = TrainOptions::new(recipe(), source(), dir.path());
    opts.train_seed = 3;
    opts.used_training_size = Some(150);
    let trained = train_model(&opts).unwrap();

    let stem = artifact_stem(dir.path(), &recipe());
    let outfile = dir.path().join("results.csv");
    let job = ScrubJob {
        checkpoint_path: trained.checkpoint_path.clone(),
        source: source(),
        config: scrub_config(SelectionType::Foci, HessType::Sekhari, ApproxType::FiniteDifference),
        ordering_path: Some(ordering_path(&stem)),
        outfile: Some(outfile.clone()),
        updated_model_path: scrubbed_checkpoint_path(&stem),
        orig_trainset_size: None,
    };
    let report = scrub_model(job).unwrap();
    let outcome = &report.outcome;

    assert_eq!(outcome.end, RunEnd::Completed);
    assert_eq!(outcome.removed_count, 3);
    assert!(outcome.rounds.len() >= 3);

    // Candidates come from the training ordering, restricted to the trained set.
    let trained_set = &trained.checkpoint.metadata.trained_indices;
    assert!(outcome.forgotten.iter().all(|i| trained_set.contains(i)));

    let log = std::fs::read_to_string(&outfile).unwrap();
    assert_eq!(log.lines().count(), 1 + outcome.rounds.len());
    assert!(log.starts_with("dataset,model,train_epochs,selectionType"));
    assert!(log.lines().nth(1).unwrap().starts_with("blobs,logistic,6,FOCI,"));

    let saved = Checkpoint::load(&scrubbed_checkpoint_path(&stem)).unwrap();
    assert_eq!(saved.metadata.scrubbed_indices, outcome.forgotten);
    assert_eq!(saved.network.digest(), outcome.network.digest());
    assert_ne!(saved.network.digest(), trained.checkpoint.network.digest());
}

#[test]
fn every_hessian_variant_completes_a_round() {
    let dir = tempfile::tempdir().unwrap();
    let opts = TrainOptions::new(recipe(), source(), dir.path());
    let trained = train_model(&opts).unwrap();

    for (selection, hess, approx) in [
        (SelectionType::Full, HessType::Sekhari, ApproxType::Fisher),
        (SelectionType::One, HessType::ConditionalRisk, ApproxType::FiniteDifference),
        (SelectionType::Random, HessType::ConditionalRisk, ApproxType::Fisher),
    ] {
        let mut config = scrub_config(selection, hess, approx);
        config.n_removals = 1;
        config.val_gap_skip = 1.0;
        let job = ScrubJob {
            checkpoint_path: trained.checkpoint_path.clone(),
            source: source(),
            config,
            ordering_path: None,
            outfile: None,
            updated_model_path: dir.path().join(format!("{selection}_{hess}_{approx}.json")),
            orig_trainset_size: Some(200),
        };
        let report = scrub_model(job).unwrap();
        assert_eq!(report.outcome.removed_count, 1, "{selection} {hess} {approx}");
        assert!(!report.outcome.rounds[0].failed);
    }
}

#[test]
fn missing_checkpoint_is_a_fatal_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let job = ScrubJob {
        checkpoint_path: dir.path().join("nope.json"),
        source: source(),
        config: scrub_config(SelectionType::One, HessType::Sekhari, ApproxType::Fisher),
        ordering_path: None,
        outfile: None,
        updated_model_path: dir.path().join("out.json"),
        orig_trainset_size: None,
    };
    assert!(matches!(scrub_model(job), Err(ScrubError::Io { .. })));
}

#[test]
fn full_selection_on_a_large_network_is_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let mut recipe = recipe();
    recipe.architecture = Architecture::Mlp;
    recipe.epochs = 1;
    let trained = train_model(&TrainOptions::new(recipe, source(), dir.path())).unwrap();

    let mut config = scrub_config(SelectionType::Full, HessType::Sekhari, ApproxType::Fisher);
    config.perturb.max_hessian_dim = 100;
    let job = ScrubJob {
        checkpoint_path: trained.checkpoint_path,
        source: source(),
        config,
        ordering_path: None,
        outfile: None,
        updated_model_path: dir.path().join("out.json"),
        orig_trainset_size: None,
    };
    assert!(matches!(scrub_model(job), Err(ScrubError::Config(_))));
}

#[test]
fn scrubbing_again_counts_earlier_removals() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = TrainOptions::new(recipe(), source(), dir.path());
    opts.used_training_size = Some(150);
    let trained = train_model(&opts).unwrap();
    let stem = artifact_stem(dir.path(), &recipe());

    let job = |checkpoint_path, updated_model_path| {
        let mut config = scrub_config(SelectionType::One, HessType::Sekhari, ApproxType::Fisher);
        config.val_gap_skip = 1.0;
        ScrubJob {
            checkpoint_path,
            source: source(),
            config,
            ordering_path: Some(ordering_path(&stem)),
            outfile: None,
            updated_model_path,
            orig_trainset_size: None,
        }
    };

    let first_path = dir.path().join("first.json");
    let first = scrub_model(job(trained.checkpoint_path.clone(), first_path.clone())).unwrap();
    assert_eq!(first.config.previously_removed, 0);
    assert_eq!(first.outcome.removed_count, 3);

    let second = scrub_model(job(first_path, dir.path().join("second.json"))).unwrap();
    assert_eq!(second.config.previously_removed, 3);
    assert_eq!(second.config.perturb.orig_trainset_size, 150);
    assert_eq!(second.outcome.removed_count, 3);

    let scrubbed = &second.checkpoint.metadata.scrubbed_indices;
    assert_eq!(scrubbed.len(), 6);
    assert!(first.outcome.forgotten.iter().all(|i| !second.outcome.forgotten.contains(i)));
}

#[test]
fn model_is_saved_before_too_many_failures_surface() {
    let dir = tempfile::tempdir().unwrap();
    let trained = train_model(&TrainOptions::new(recipe(), source(), dir.path())).unwrap();

    // A vanishing epsilon and regulariser push the noise scale to infinity,
    // so every pass yields non-finite parameters.
    let mut config = scrub_config(SelectionType::One, HessType::Sekhari, ApproxType::Fisher);
    config.perturb.epsilon = 1e-300;
    config.perturb.l2_reg = 1e-300;
    config.max_consecutive_failures = 2;
    let saved = dir.path().join("partial.json");
    let job = ScrubJob {
        checkpoint_path: trained.checkpoint_path.clone(),
        source: source(),
        config,
        ordering_path: None,
        outfile: None,
        updated_model_path: saved.clone(),
        orig_trainset_size: None,
    };

    let err = scrub_model(job).unwrap_err();
    let ScrubError::TooManyFailures { count, partial, .. } = err else {
        panic!("expected TooManyFailures");
    };
    assert_eq!(count, 2);
    assert_eq!(partial.end, RunEnd::TooManyFailures);
    assert_eq!(partial.removed_count, 0);
    assert!(partial.rounds.iter().all(|r| r.failed));

    let reloaded = Checkpoint::load(&saved).unwrap();
    assert_eq!(reloaded.network.digest(), trained.checkpoint.network.digest());
    assert!(reloaded.metadata.scrubbed_indices.is_empty());
}
