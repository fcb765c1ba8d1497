use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::data::csv::escape_field;
use crate::error::{Result, ScrubError};

/// One attempted scrub round, accepted or reverted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundRecord {
    pub dataset: String,
    pub model: String,
    pub train_epochs: usize,
    pub selection_type: String,
    pub order: String,
    pub hess_type: String,
    pub approx_type: String,
    pub run: u64,
    pub orig_trainset_size: usize,
    pub delta: f64,
    pub epsilon: f64,
    pub l2_reg: f64,
    pub val_acc_before: f64,
    pub val_loss_before: f64,
    /// Original indices targeted this round.
    pub scrub_list: Vec<usize>,
    /// Accepted removals before this round.
    pub n_removals: usize,
    pub foci_value: Option<f64>,
    pub foci_iters: usize,
    pub bad_sample: bool,
    /// The perturbation failed numerically; the round was reverted.
    pub failed: bool,
    /// Unix time, seconds.
    pub time: f64,
    pub val_acc_after: f64,
    pub val_loss_after: f64,
    pub sample_loss_before: Option<f64>,
    pub sample_loss_after: Option<f64>,
    pub sample_gradnorm_before: Option<f64>,
    pub sample_gradnorm_after: Option<f64>,
    pub residual_loss_after: f64,
    pub residual_acc_after: f64,
    pub residual_gradnorm_after: f64,
    pub residual_size: usize,
    /// Digest of the model in force after the round.
    pub model_digest: String,
}

impl RoundRecord {
    pub const HEADER: &'static [&'static str] = &[
        "dataset",
        "model",
        "train_epochs",
        "selectionType",
        "order",
        "HessType",
        "approxType",
        "run",
        "orig_trainset_size",
        "delta",
        "epsilon",
        "l2_reg",
        "val_acc_before",
        "val_loss_before",
        "scrub_list",
        "n_removals",
        "foci_value",
        "foci_iters",
        "bad_sample",
        "failed",
        "time",
        "val_acc_after",
        "val_loss_after",
        "sample_loss_before",
        "sample_loss_after",
        "sample_gradnorm_before",
        "sample_gradnorm_after",
        "residual_loss_after",
        "residual_acc_after",
        "residual_gradnorm_after",
        "residual_size",
        "model_digest",
    ];

    /// Cells in `HEADER` order, unescaped.
    pub fn to_row(&self) -> Vec<String> {
        let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        let flag = |b: bool| u8::from(b).to_string();
        let scrub_list = self.scrub_list.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        vec![
            self.dataset.clone(),
            self.model.clone(),
            self.train_epochs.to_string(),
            self.selection_type.clone(),
            self.order.clone(),
            self.hess_type.clone(),
            self.approx_type.clone(),
            self.run.to_string(),
            self.orig_trainset_size.to_string(),
            self.delta.to_string(),
            self.epsilon.to_string(),
            self.l2_reg.to_string(),
            self.val_acc_before.to_string(),
            self.val_loss_before.to_string(),
            scrub_list,
            self.n_removals.to_string(),
            opt(self.foci_value),
            self.foci_iters.to_string(),
            flag(self.bad_sample),
            flag(self.failed),
            format!("{:.3}", self.time),
            self.val_acc_after.to_string(),
            self.val_loss_after.to_string(),
            opt(self.sample_loss_before),
            opt(self.sample_loss_after),
            opt(self.sample_gradnorm_before),
            opt(self.sample_gradnorm_after),
            self.residual_loss_after.to_string(),
            self.residual_acc_after.to_string(),
            self.residual_gradnorm_after.to_string(),
            self.residual_size.to_string(),
            self.model_digest.clone(),
        ]
    }
}

pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Append-only CSV of round records. The header is written only when the file
/// is new (or empty); existing rows are never rewritten.
#[derive(Debug)]
pub struct RoundLog {
    path: PathBuf,
}

impl RoundLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<RoundLog> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ScrubError::io(parent, e))?;
        }
        let is_new = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ScrubError::io(&path, e))?;
        if is_new {
            writeln!(file, "{}", RoundRecord::HEADER.join(",")).map_err(|e| ScrubError::io(&path, e))?;
        }
        Ok(RoundLog { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row and flushes it to disk.
    pub fn append(&mut self, record: &RoundRecord) -> Result<()> {
        let line = record.to_row().iter().map(|cell| escape_field(cell)).collect::<Vec<_>>().join(",");
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| ScrubError::io(&self.path, e))?;
        writeln!(file, "{line}").map_err(|e| ScrubError::io(&self.path, e))?;
        file.flush().map_err(|e| ScrubError::io(&self.path, e))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::csv::parse_csv_row;

    pub(crate) fn sample_record() -> RoundRecord {
        RoundRecord {
            dataset: "blobs".into(),
            model: "logistic".into(),
            train_epochs: 5,
            selection_type: "FOCI".into(),
            order: "BP".into(),
            hess_type: "Sekhari".into(),
            approx_type: "FD".into(),
            run: 1,
            orig_trainset_size: 100,
            delta: 0.01,
            epsilon: 0.1,
            l2_reg: 0.001,
            val_acc_before: 0.98,
            val_loss_before: 0.1,
            scrub_list: vec![4, 17],
            n_removals: 0,
            foci_value: Some(0.02),
            foci_iters: 1,
            bad_sample: false,
            failed: false,
            time: 1.5,
            val_acc_after: 0.97,
            val_loss_after: 0.11,
            sample_loss_before: Some(0.05),
            sample_loss_after: Some(0.4),
            sample_gradnorm_before: Some(0.2),
            sample_gradnorm_after: None,
            residual_loss_after: 0.1,
            residual_acc_after: 0.99,
            residual_gradnorm_after: 0.01,
            residual_size: 98,
            model_digest: "ab".into(),
        }
    }

    #[test]
    fn row_matches_header_width() {
        let row = sample_record().to_row();
        assert_eq!(row.len(), RoundRecord::HEADER.len());
        assert_eq!(row[14], "4 17");
        assert_eq!(row[26], "");
    }

    #[test]
    fn header_is_written_once_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("scrub.csv");

        let mut log = RoundLog::open(&path).unwrap();
        log.append(&sample_record()).unwrap();
        let mut log = RoundLog::open(&path).unwrap();
        log.append(&sample_record()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.iter().filter(|l| l.starts_with("dataset,")).count(), 1);
        assert_eq!(parse_csv_row(lines[1]).len(), RoundRecord::HEADER.len());
    }
}
