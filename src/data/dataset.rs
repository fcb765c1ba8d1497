use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Layout of an image sample flattened into a feature row (channel-major).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

/// A fixed, index-addressable collection of labelled samples.
///
/// Every row remembers the index it had in the original collection, so subsets
/// built by inclusion/exclusion can still be addressed by original index.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub inputs: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    /// `indices[row]` is the original index of that row.
    pub indices: Vec<usize>,
    pub n_classes: usize,
    pub shape: Option<ImageShape>,
    /// Apply training-time augmentation when iterated in training mode.
    pub augment: bool,
    rows_by_index: HashMap<usize, usize>,
}

impl Dataset {
    /// Wraps a full collection; original indices are `0..len`.
    pub fn new(inputs: Vec<Vec<f64>>, labels: Vec<usize>, n_classes: usize) -> Dataset {
        let indices = (0..inputs.len()).collect();
        Dataset::from_parts(inputs, labels, indices, n_classes, None)
    }

    pub fn from_parts(
        inputs: Vec<Vec<f64>>,
        labels: Vec<usize>,
        indices: Vec<usize>,
        n_classes: usize,
        shape: Option<ImageShape>,
    ) -> Dataset {
        assert_eq!(inputs.len(), labels.len(), "inputs and labels must have equal length");
        assert_eq!(inputs.len(), indices.len(), "inputs and indices must have equal length");
        let rows_by_index = indices.iter().enumerate().map(|(row, &idx)| (idx, row)).collect();
        Dataset { inputs, labels, indices, n_classes, shape, augment: false, rows_by_index }
    }

    pub fn with_shape(mut self, shape: Option<ImageShape>) -> Dataset {
        self.shape = shape;
        self
    }

    pub fn with_augment(mut self, augment: bool) -> Dataset {
        self.augment = augment;
        self
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn input_size(&self) -> usize {
        self.inputs.first().map_or(0, |row| row.len())
    }

    pub fn contains(&self, original_index: usize) -> bool {
        self.rows_by_index.contains_key(&original_index)
    }

    /// Class label of the sample with the given original index.
    pub fn label_of(&self, original_index: usize) -> Option<usize> {
        self.rows_by_index.get(&original_index).map(|&row| self.labels[row])
    }

    /// One-hot target vector for a row.
    pub fn target(&self, row: usize) -> Vec<f64> {
        let mut one_hot = vec![0.0; self.n_classes];
        one_hot[self.labels[row]] = 1.0;
        one_hot
    }

    /// Rows for the given original indices, in argument order.
    pub fn subset(&self, original_indices: &[usize]) -> Result<Dataset, DataError> {
        let rows = original_indices.iter()
            .map(|idx| {
                self.rows_by_index.get(idx).copied().ok_or(DataError::IndexOutOfRange {
                    index: *idx,
                    size: self.len(),
                })
            })
            .collect::<Result<Vec<usize>, DataError>>()?;
        Ok(self.select_rows(&rows))
    }

    /// Keeps only samples whose original index is in `keep`; order is stable.
    pub fn include(&self, keep: &[usize]) -> Dataset {
        let keep: HashSet<usize> = keep.iter().copied().collect();
        let rows: Vec<usize> = (0..self.len()).filter(|&r| keep.contains(&self.indices[r])).collect();
        self.select_rows(&rows)
    }

    /// Drops samples whose original index is in `drop`; order is stable.
    pub fn exclude(&self, drop: &[usize]) -> Dataset {
        let drop: HashSet<usize> = drop.iter().copied().collect();
        let rows: Vec<usize> = (0..self.len()).filter(|&r| !drop.contains(&self.indices[r])).collect();
        self.select_rows(&rows)
    }

    /// Rows by position, in argument order.
    pub fn select_rows(&self, rows: &[usize]) -> Dataset {
        Dataset::from_parts(
            rows.iter().map(|&r| self.inputs[r].clone()).collect(),
            rows.iter().map(|&r| self.labels[r]).collect(),
            rows.iter().map(|&r| self.indices[r]).collect(),
            self.n_classes,
            self.shape,
        )
        .with_augment(self.augment)
    }
}
