//! CODEC dependence coefficients and FOCI feature selection
//! (Azadkia & Chatterjee), used to pick the parameters whose perturbation
//! the forget-batch loss actually depends on.
//!
//! Nearest neighbours are Euclidean, exclude the point itself, and break ties
//! by lowest index, so every statistic here is deterministic.

use crate::scrub::config::FociType;

/// Outcome of a FOCI run over candidate columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FociSelection {
    /// Selected column positions, in selection order.
    pub selected: Vec<usize>,
    /// Strongest dependence left among unselected columns; 0 when selection
    /// stopped on its own.
    pub remaining_signal: f64,
}

/// `R_i = #{j : y_j <= y_i}`
fn ranks_le(y: &[f64]) -> Vec<usize> {
    let sorted = sorted_copy(y);
    y.iter().map(|&yi| sorted.partition_point(|&v| v <= yi)).collect()
}

/// `L_i = #{j : y_j >= y_i}`
fn ranks_ge(y: &[f64]) -> Vec<usize> {
    let sorted = sorted_copy(y);
    y.iter().map(|&yi| sorted.len() - sorted.partition_point(|&v| v < yi)).collect()
}

fn sorted_copy(y: &[f64]) -> Vec<f64> {
    let mut sorted = y.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Row-wise nearest neighbour over the given feature columns.
fn nearest_neighbours(columns: &[&[f64]], n: usize) -> Vec<usize> {
    (0..n)
        .map(|i| {
            let mut best = usize::MAX;
            let mut best_dist = f64::INFINITY;
            for j in 0..n {
                if j == i {
                    continue;
                }
                let dist: f64 = columns.iter().map(|c| (c[i] - c[j]).powi(2)).sum();
                if dist < best_dist {
                    best_dist = dist;
                    best = j;
                }
            }
            best
        })
        .collect()
}

/// Unconditional coefficient `T_n(Y, Z)`; near 0 under independence, 1 when
/// `Y` is a measurable function of `Z`.
pub fn codec(y: &[f64], z: &[&[f64]]) -> f64 {
    let n = y.len();
    if n < 2 || z.is_empty() {
        return 0.0;
    }
    let r = ranks_le(y);
    let l = ranks_ge(y);
    let m = nearest_neighbours(z, n);
    let nf = n as f64;
    let num: f64 = (0..n)
        .map(|i| nf * r[i].min(r[m[i]]) as f64 - (l[i] as f64).powi(2))
        .sum();
    let den: f64 = l.iter().map(|&li| li as f64 * (nf - li as f64)).sum();
    if den <= 0.0 { 0.0 } else { num / den }
}

/// Conditional coefficient `T_n(Y, Z | X)`.
pub fn codec_conditional(y: &[f64], z: &[&[f64]], x: &[&[f64]]) -> f64 {
    if x.is_empty() {
        return codec(y, z);
    }
    let n = y.len();
    if n < 2 || z.is_empty() {
        return 0.0;
    }
    let r = ranks_le(y);
    let joint: Vec<&[f64]> = x.iter().chain(z.iter()).copied().collect();
    let nx = nearest_neighbours(x, n);
    let nxz = nearest_neighbours(&joint, n);
    let num: f64 = (0..n)
        .map(|i| r[i].min(r[nxz[i]]) as f64 - r[i].min(r[nx[i]]) as f64)
        .sum();
    let den: f64 = (0..n)
        .map(|i| r[i] as f64 - r[i].min(r[nx[i]]) as f64)
        .sum();
    if den <= 0.0 { 0.0 } else { num / den }
}

/// FOCI objective `Q_n(Y, X_S)`.
fn foci_q(y: &[f64], x: &[&[f64]], r: &[usize], l: &[usize]) -> f64 {
    let n = y.len();
    if x.is_empty() {
        return 0.0;
    }
    let m = nearest_neighbours(x, n);
    let nf = n as f64;
    (0..n)
        .map(|i| r[i].min(r[m[i]]) as f64 - (l[i] as f64).powi(2) / nf)
        .sum::<f64>() / (nf * nf)
}

/// Selects up to `max_select` of `columns` that `y` depends on.
pub fn foci(y: &[f64], columns: &[Vec<f64>], max_select: usize, kind: FociType) -> FociSelection {
    match kind {
        FociType::Full => foci_full(y, columns, max_select),
        FociType::Cheap => foci_cheap(y, columns, max_select),
    }
}

fn foci_full(y: &[f64], columns: &[Vec<f64>], max_select: usize) -> FociSelection {
    let r = ranks_le(y);
    let l = ranks_ge(y);
    let mut selected: Vec<usize> = Vec::new();
    let mut current_q = 0.0;

    loop {
        let chosen: Vec<&[f64]> = selected.iter().map(|&j| columns[j].as_slice()).collect();
        let unselected: Vec<usize> = (0..columns.len()).filter(|j| !selected.contains(j)).collect();
        if unselected.is_empty() {
            return FociSelection { selected, remaining_signal: 0.0 };
        }

        if selected.len() >= max_select {
            let remaining = unselected.iter()
                .map(|&j| codec_conditional(y, &[columns[j].as_slice()], &chosen))
                .fold(0.0, f64::max);
            return FociSelection { selected, remaining_signal: remaining };
        }

        let mut best: Option<(usize, f64)> = None;
        for &j in &unselected {
            let mut trial = chosen.clone();
            trial.push(columns[j].as_slice());
            let q = foci_q(y, &trial, &r, &l);
            if best.map_or(true, |(_, bq)| q > bq) {
                best = Some((j, q));
            }
        }

        match best {
            Some((j, q)) if q > current_q => {
                selected.push(j);
                current_q = q;
            }
            _ => return FociSelection { selected, remaining_signal: 0.0 },
        }
    }
}

fn foci_cheap(y: &[f64], columns: &[Vec<f64>], max_select: usize) -> FociSelection {
    let mut scored: Vec<(usize, f64)> = columns.iter()
        .enumerate()
        .map(|(j, col)| (j, codec(y, &[col.as_slice()])))
        .filter(|(_, t)| *t > 0.0)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let remaining_signal = scored.get(max_select).map_or(0.0, |&(_, t)| t);
    let selected = scored.into_iter().take(max_select).map(|(j, _)| j).collect();
    FociSelection { selected, remaining_signal }
}
