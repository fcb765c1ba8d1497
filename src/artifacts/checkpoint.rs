use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrubError};
use crate::network::metadata::ModelMetadata;
use crate::network::network::Network;
use crate::scrub::ordering::Ordering;

/// A trained (or scrubbed) model together with the annotations needed to
/// rebuild its datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub metadata: ModelMetadata,
    pub network: Network,
}

impl Checkpoint {
    /// Writes pretty-printed JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    /// Loads a checkpoint and checks the weights against the recorded spec.
    pub fn load(path: &Path) -> Result<Checkpoint> {
        let mut checkpoint: Checkpoint = read_json(path)?;
        if !checkpoint.metadata.spec.matches(&checkpoint.network) {
            return Err(ScrubError::Artifact {
                path: path.display().to_string(),
                message: format!(
                    "weights do not match a {} network for {} inputs / {} classes",
                    checkpoint.metadata.spec.architecture,
                    checkpoint.metadata.spec.input_size,
                    checkpoint.metadata.spec.n_classes
                ),
            });
        }
        checkpoint.network.reset_activations();
        Ok(checkpoint)
    }
}

pub fn save_ordering(path: &Path, ordering: &Ordering) -> Result<()> {
    write_json(path, ordering)
}

pub fn load_ordering(path: &Path) -> Result<Ordering> {
    let ordering: Ordering = read_json(path)?;
    ordering.validate().map_err(|message| ScrubError::Artifact {
        path: path.display().to_string(),
        message,
    })?;
    Ok(ordering)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ScrubError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| ScrubError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| {
        if e.is_io() {
            ScrubError::io(path, e.into())
        } else {
            ScrubError::Artifact { path: path.display().to_string(), message: e.to_string() }
        }
    })?;
    writer.flush().map_err(|e| ScrubError::io(path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| ScrubError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| ScrubError::Artifact {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::DatasetName;
    use crate::network::metadata::TrainingRecipe;
    use crate::network::spec::{Architecture, NetworkSpec};
    use crate::optim::OptimizerKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn checkpoint() -> Checkpoint {
        let spec = NetworkSpec::new(Architecture::Mlp, 8, 4);
        Checkpoint {
            network: spec.build(&mut ChaCha8Rng::seed_from_u64(1)),
            metadata: ModelMetadata {
                recipe: TrainingRecipe {
                    dataset: DatasetName::Blobs,
                    architecture: Architecture::Mlp,
                    epochs: 1,
                    learning_rate: 0.1,
                    weight_decay: 0.0,
                    batch_size: 8,
                    optimizer: OptimizerKind::Sgd,
                    data_augment: false,
                },
                spec,
                train_seed: 0,
                orig_trainset_size: 10,
                trained_indices: (0..10).collect(),
                scrubbed_indices: vec![],
                description: None,
            },
        }
    }

    #[test]
    fn save_then_load_restores_the_weights_bit_for_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");
        let original = checkpoint();
        original.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.network.digest(), original.network.digest());
        assert_eq!(loaded.metadata.trained_indices.len(), 10);
    }

    #[test]
    fn missing_checkpoint_is_an_io_error() {
        let err = Checkpoint::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ScrubError::Io { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_is_an_io_error() {
        // Every write to /dev/full fails with ENOSPC.
        let err = checkpoint().save(Path::new("/dev/full")).unwrap_err();
        assert!(matches!(err, ScrubError::Io { .. }), "{err}");

        let err = save_ordering(Path::new("/dev/full"), &Ordering::generate(4, 0)).unwrap_err();
        assert!(matches!(err, ScrubError::Io { .. }), "{err}");
    }

    #[test]
    fn mismatched_spec_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut bad = checkpoint();
        bad.metadata.spec = NetworkSpec::new(Architecture::Logistic, 8, 4);
        bad.save(&path).unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(ScrubError::Artifact { .. })));
    }
}
