use std::path::PathBuf;

use tracing::{info, warn};

use crate::artifacts::{load_ordering, Checkpoint};
use crate::data::provider::{get_datasets, DatasetSource};
use crate::error::{Result, ScrubError};
use crate::scrub::config::{RunLabels, ScrubConfig};
use crate::scrub::controller::{ScrubController, ScrubOutcome};
use crate::scrub::ordering::Ordering;
use crate::scrub::perturb::InfluencePerturber;
use crate::scrub::record::RoundLog;

/// Inputs of the scrub command.
#[derive(Debug, Clone)]
pub struct ScrubJob {
    pub checkpoint_path: PathBuf,
    pub source: DatasetSource,
    pub config: ScrubConfig,
    /// Persisted training ordering to replay; when missing or unreadable the
    /// ordering is drawn from the `run` seed instead.
    pub ordering_path: Option<PathBuf>,
    /// Round log to append to.
    pub outfile: Option<PathBuf>,
    /// Where the scrubbed checkpoint is written.
    pub updated_model_path: PathBuf,
    /// Size used in the `1/(n - k)` scaling; defaults to the trained set size.
    pub orig_trainset_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ScrubReport {
    pub outcome: ScrubOutcome,
    /// The configuration the run used, after checkpoint-derived defaults.
    pub config: ScrubConfig,
    pub checkpoint: Checkpoint,
    pub saved_to: PathBuf,
}

/// Loads a trained checkpoint, scrubs it and saves the result.
///
/// When the run ends with too many consecutive failures the last accepted
/// model is still saved before the error is returned.
pub fn scrub_model(job: ScrubJob) -> Result<ScrubReport> {
    let mut checkpoint = Checkpoint::load(&job.checkpoint_path)?;
    let metadata = &checkpoint.metadata;

    let (full, val) = get_datasets(&job.source, true, None, None, false)?;
    if full.len() != metadata.orig_trainset_size {
        return Err(ScrubError::Artifact {
            path: job.checkpoint_path.display().to_string(),
            message: format!(
                "checkpoint was trained on a collection of {} samples but the dataset has {}",
                metadata.orig_trainset_size,
                full.len()
            ),
        });
    }
    let val = val.unwrap_or_else(|| full.include(&[]));
    let trained = full.include(&metadata.trained_indices).exclude(&metadata.scrubbed_indices);

    let mut config = job.config;
    config.perturb.orig_trainset_size =
        job.orig_trainset_size.unwrap_or(metadata.trained_indices.len());
    config.previously_removed = metadata.scrubbed_indices.len();
    config.labels = RunLabels {
        dataset: metadata.recipe.dataset.to_string(),
        model: metadata.recipe.architecture.to_string(),
        train_epochs: metadata.recipe.epochs,
        run: config.labels.run,
    };

    let ordering = match job.ordering_path.as_deref() {
        Some(path) if path.exists() => {
            info!(ordering = %path.display(), "replaying training ordering");
            load_ordering(path)?
        }
        Some(path) => {
            warn!(
                ordering = %path.display(),
                "ordering artifact missing; drawing a fresh permutation"
            );
            Ordering::generate(full.len(), config.labels.run)
        }
        None => Ordering::generate(full.len(), config.labels.run),
    };
    if ordering.len() != full.len() {
        return Err(ScrubError::Artifact {
            path: job.ordering_path.map(|p| p.display().to_string()).unwrap_or_default(),
            message: format!(
                "ordering covers {} samples, dataset has {}",
                ordering.len(),
                full.len()
            ),
        });
    }

    info!(
        trained = trained.len(),
        val = val.len(),
        n_removals = config.n_removals,
        hess_type = %config.perturb.hess_type,
        approx_type = %config.perturb.approx_type,
        selection = %config.perturb.selection,
        "scrubbing"
    );

    let perturber = InfluencePerturber::new(config.perturb.clone());
    let mut controller = ScrubController::new(config.clone(), perturber)?;
    if let Some(outfile) = job.outfile {
        controller = controller.with_log(RoundLog::open(outfile)?);
    }

    let network = checkpoint.network.clone();
    let (outcome, failure) = match controller.run(network, &trained, &val, ordering) {
        Ok(outcome) => (outcome, None),
        Err(ScrubError::TooManyFailures { count, last, partial }) => (*partial, Some((count, last))),
        Err(err) => return Err(err),
    };

    checkpoint.network = outcome.network.clone();
    checkpoint.metadata.scrubbed_indices.extend_from_slice(&outcome.forgotten);
    checkpoint.save(&job.updated_model_path)?;
    info!(
        path = %job.updated_model_path.display(),
        removed = outcome.removed_count,
        "saved scrubbed model"
    );

    if let Some((count, last)) = failure {
        warn!(count, error = %last, "scrub run aborted after consecutive failures");
        return Err(ScrubError::TooManyFailures { count, last, partial: Box::new(outcome) });
    }
    Ok(ScrubReport { outcome, config, checkpoint, saved_to: job.updated_model_path })
}
