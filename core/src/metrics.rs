/// Clustering quality scores against ground-truth labels.
///
/// NMI uses arithmetic-mean normalisation and natural logs. Accuracy is the
/// best one-to-one matching of predicted to true labels (Hungarian algorithm
/// on the count matrix). Purity credits each predicted cluster with its
/// majority class.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// NMI / purity / accuracy for one labelling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterScores {
    pub nmi: f64,
    pub purity: f64,
    pub accuracy: f64,
}

/// Contingency table over the distinct values of each labelling:
/// rows = true classes, columns = predicted clusters.
fn contingency(labels_true: &[usize], labels_pred: &[usize]) -> Vec<Vec<usize>> {
    let index = |labels: &[usize]| -> BTreeMap<usize, usize> {
        let distinct: BTreeSet<usize> = labels.iter().copied().collect();
        distinct.into_iter().enumerate().map(|(i, l)| (l, i)).collect()
    };
    let rows = index(labels_true);
    let cols = index(labels_pred);
    let mut table = vec![vec![0usize; cols.len()]; rows.len()];
    for (t, p) in labels_true.iter().zip(labels_pred) {
        table[rows[t]][cols[p]] += 1;
    }
    table
}

fn entropy(counts: impl Iterator<Item = usize>, n: f64) -> f64 {
    counts
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

/// Normalised mutual information (arithmetic normalisation).
///
/// Both labellings trivial (one class, one cluster) scores 1; zero mutual
/// information otherwise scores 0.
pub fn nmi(labels_true: &[usize], labels_pred: &[usize]) -> f64 {
    debug_assert_eq!(labels_true.len(), labels_pred.len());
    let table = contingency(labels_true, labels_pred);
    let n_rows = table.len();
    let n_cols = table.first().map_or(0, |r| r.len());
    if n_rows == n_cols && n_rows <= 1 {
        return 1.0;
    }
    let n = labels_true.len() as f64;
    let row_sums: Vec<usize> = table.iter().map(|r| r.iter().sum()).collect();
    let col_sums: Vec<usize> = (0..n_cols).map(|j| table.iter().map(|r| r[j]).sum()).collect();

    let mut mi = 0.0f64;
    for (i, row) in table.iter().enumerate() {
        for (j, &c) in row.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let c = c as f64;
            mi += c / n * (c * n / (row_sums[i] as f64 * col_sums[j] as f64)).ln();
        }
    }
    if mi.abs() < 1e-15 {
        return 0.0;
    }
    let h_true = entropy(row_sums.iter().copied(), n);
    let h_pred = entropy(col_sums.iter().copied(), n);
    let normalizer = ((h_true + h_pred) / 2.0).max(f64::EPSILON);
    mi / normalizer
}

/// Fraction of samples that match the majority class of their cluster.
pub fn purity(labels_true: &[usize], labels_pred: &[usize]) -> f64 {
    if labels_true.is_empty() {
        return 0.0;
    }
    let table = contingency(labels_true, labels_pred);
    let n_cols = table.first().map_or(0, |r| r.len());
    let hits: usize = (0..n_cols)
        .map(|j| table.iter().map(|r| r[j]).max().unwrap_or(0))
        .sum();
    hits as f64 / labels_true.len() as f64
}

/// Best-matching accuracy: labels are mapped one-to-one by maximum overlap.
pub fn accuracy(labels_true: &[usize], labels_pred: &[usize]) -> f64 {
    if labels_true.is_empty() {
        return 0.0;
    }
    let size = labels_true.iter().chain(labels_pred).copied().max().unwrap_or(0) + 1;
    let mut counts = vec![vec![0i64; size]; size];
    for (&t, &p) in labels_true.iter().zip(labels_pred) {
        counts[p][t] += 1;
    }
    let max = counts.iter().flatten().copied().max().unwrap_or(0);
    let cost: Vec<Vec<i64>> = counts.iter().map(|r| r.iter().map(|&c| max - c).collect()).collect();
    let assignment = hungarian(&cost);
    let matched: i64 = assignment.iter().enumerate().map(|(p, &t)| counts[p][t]).sum();
    matched as f64 / labels_true.len() as f64
}

/// Minimum-cost perfect matching on a square cost matrix. Returns, for each
/// row, the column it is assigned to. O(n³) with row/column potentials.
pub fn hungarian(cost: &[Vec<i64>]) -> Vec<usize> {
    let n = cost.len();
    if n == 0 {
        return Vec::new();
    }
    const INF: i64 = i64::MAX / 4;
    // 1-indexed; p[j] = row matched to column j (0 = none)
    let mut u = vec![0i64; n + 1];
    let mut v = vec![0i64; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];
    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![INF; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = INF;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }
    let mut assignment = vec![0usize; n];
    for j in 1..=n {
        if p[j] > 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

/// All three scores at once.
pub fn cluster_eval(labels_true: &[usize], labels_pred: &[usize]) -> ClusterScores {
    ClusterScores {
        nmi: nmi(labels_true, labels_pred),
        purity: purity(labels_true, labels_pred),
        accuracy: accuracy(labels_true, labels_pred),
    }
}
