pub mod augment;
pub mod csv;
pub mod dataset;
pub mod idx;
pub mod image_folder;
pub mod provider;
pub mod synthetic;

pub use dataset::{Dataset, ImageShape};
pub use provider::{get_datasets, DatasetName, DatasetSource};
