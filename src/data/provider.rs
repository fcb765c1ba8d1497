use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::csv::parse_csv;
use crate::data::dataset::Dataset;
use crate::data::idx::load_idx_split;
use crate::data::image_folder::load_image_folder;
use crate::data::synthetic::blobs;
use crate::error::{ConfigError, DataError};

/// Side length image-folder samples are resized to.
const IMAGE_SIDE: u32 = 28;

/// Registry of the dataset sources the provider understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetName {
    /// Seeded synthetic Gaussian blobs; needs no files.
    Blobs,
    /// `<data_dir>/mnist/{train,t10k}-{images-idx3,labels-idx1}-ubyte`
    Mnist,
    /// Same layout as `Mnist` under `<data_dir>/fashion_mnist/`.
    FashionMnist,
    /// `<data_dir>/train.csv` and `<data_dir>/val.csv`, class index last.
    Csv,
    /// `<data_dir>/{train,val}/<class>/*.png`
    ImageFolder,
}

impl DatasetName {
    pub const NAMES: [&'static str; 5] = ["blobs", "mnist", "fashion_mnist", "csv", "image_folder"];

    pub fn name(self) -> &'static str {
        match self {
            DatasetName::Blobs => "blobs",
            DatasetName::Mnist => "mnist",
            DatasetName::FashionMnist => "fashion_mnist",
            DatasetName::Csv => "csv",
            DatasetName::ImageFolder => "image_folder",
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blobs" => Ok(DatasetName::Blobs),
            "mnist" => Ok(DatasetName::Mnist),
            "fashion_mnist" => Ok(DatasetName::FashionMnist),
            "csv" => Ok(DatasetName::Csv),
            "image_folder" => Ok(DatasetName::ImageFolder),
            other => Err(ConfigError::unknown("dataset", other, &DatasetName::NAMES)),
        }
    }
}

/// Where and how to load a dataset.
#[derive(Debug, Clone)]
pub struct DatasetSource {
    pub name: DatasetName,
    pub data_dir: PathBuf,
    /// Seed for synthetic sources.
    pub seed: u64,
    /// `(train, val)` sizes for synthetic sources.
    pub synthetic_sizes: (usize, usize),
}

impl DatasetSource {
    pub fn new(name: DatasetName, data_dir: impl Into<PathBuf>) -> Self {
        DatasetSource { name, data_dir: data_dir.into(), seed: 0, synthetic_sizes: (1000, 200) }
    }

    pub fn blobs(n_train: usize, n_val: usize, seed: u64) -> Self {
        DatasetSource { name: DatasetName::Blobs, data_dir: PathBuf::new(), seed, synthetic_sizes: (n_train, n_val) }
    }

    /// Loads the complete, unfiltered train and validation collections.
    pub fn load(&self) -> Result<(Dataset, Dataset), DataError> {
        match self.name {
            DatasetName::Blobs => {
                let (n_train, n_val) = self.synthetic_sizes;
                Ok(blobs(n_train, n_val, self.seed))
            }
            DatasetName::Mnist | DatasetName::FashionMnist => {
                let dir = self.data_dir.join(self.name.name());
                Ok((load_idx_split(&dir, "train", 10)?, load_idx_split(&dir, "t10k", 10)?))
            }
            DatasetName::Csv => {
                let (train_x, train_y) = read_csv(&self.data_dir.join("train.csv"))?;
                let (val_x, val_y) = read_csv(&self.data_dir.join("val.csv"))?;
                let n_classes = train_y.iter().chain(&val_y).max().map_or(0, |m| m + 1);
                Ok((Dataset::new(train_x, train_y, n_classes), Dataset::new(val_x, val_y, n_classes)))
            }
            DatasetName::ImageFolder => {
                let mut train = load_image_folder(&self.data_dir.join("train"), IMAGE_SIDE, IMAGE_SIDE, 0)?;
                let val = load_image_folder(&self.data_dir.join("val"), IMAGE_SIDE, IMAGE_SIDE, train.n_classes)?;
                train.n_classes = val.n_classes;
                Ok((train, val))
            }
        }
    }
}

/// Dataset provider.
///
/// Returns the training collection restricted to `include` (when given) and
/// without `exclude`, plus the validation set when `val_also` is set. Row
/// order is the ascending original index order of the full collection, so
/// identical arguments always give identical datasets.
pub fn get_datasets(
    source: &DatasetSource,
    val_also: bool,
    include: Option<&[usize]>,
    exclude: Option<&[usize]>,
    data_augment: bool,
) -> Result<(Dataset, Option<Dataset>), DataError> {
    let (full, val) = source.load()?;
    let mut train = match include {
        Some(keep) => full.include(keep),
        None => full,
    };
    if let Some(drop) = exclude {
        train = train.exclude(drop);
    }
    Ok((train.with_augment(data_augment), val_also.then_some(val)))
}

fn read_csv(path: &Path) -> Result<(Vec<Vec<f64>>, Vec<usize>), DataError> {
    let bytes = std::fs::read(path)?;
    parse_csv(&bytes, &path.display().to_string())
}
