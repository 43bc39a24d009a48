/// Seeded Lloyd k-means over the rows of a row-major [n, d] matrix.
///
/// Each call re-initialises from its own seed, so repeated calls on the same
/// data give the same labels. Convergence: stop when the squared total center
/// shift (Σ_c ‖c_new − c_old‖)² drops below `tol`, or after `max_iter`
/// iterations. A cluster that loses all its members is re-seeded from a
/// random sample.

use serde::{Deserialize, Serialize};

use crate::config::ClusteringConfig;
use crate::error::{SdccError, SdccResult};
use crate::tensor::SimpleRng;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    #[default]
    Euclidean,
    /// 1 − cosine similarity.
    Cosine,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KMeansInit {
    /// D²-weighted seeding.
    #[default]
    PlusPlus,
    /// Distinct uniformly random samples.
    Random,
}

#[derive(Clone, Debug)]
pub struct KMeans {
    pub n_clusters: usize,
    pub distance: Distance,
    pub init: KMeansInit,
    pub seed: u64,
    pub tol: f32,
    pub max_iter: usize,
}

#[derive(Clone, Debug)]
pub struct KMeansResult {
    pub labels: Vec<usize>,
    /// [n_clusters, d]
    pub centers: Vec<f32>,
    pub iterations: usize,
}

impl KMeans {
    pub fn new(n_clusters: usize, seed: u64) -> Self {
        KMeans::from_config(n_clusters, &ClusteringConfig::default(), seed)
    }

    pub fn from_config(n_clusters: usize, cfg: &ClusteringConfig, seed: u64) -> Self {
        KMeans {
            n_clusters,
            distance: cfg.distance,
            init: cfg.init,
            seed,
            tol: cfg.tol,
            max_iter: cfg.max_iter,
        }
    }

    pub fn fit(&self, x: &[f32], n: usize, d: usize) -> SdccResult<KMeansResult> {
        let k = self.n_clusters;
        if n == 0 || d == 0 {
            return Err(SdccError::EmptyInput("k-means"));
        }
        if x.len() != n * d {
            return Err(SdccError::ShapeMismatch { what: "k-means input", expected: n * d, found: x.len() });
        }
        if k == 0 || k > n {
            return Err(SdccError::InvalidConfig(format!(
                "k-means needs 1 ≤ n_clusters ≤ n_samples, got {k} clusters for {n} samples"
            )));
        }

        let data = match self.distance {
            Distance::Euclidean => x.to_vec(),
            Distance::Cosine => normalize_rows(x, n, d),
        };
        let mut rng = SimpleRng::new(self.seed);
        let mut centers = match self.init {
            KMeansInit::PlusPlus => self.init_plus_plus(&data, n, d, &mut rng),
            KMeansInit::Random => init_random(&data, n, d, k, &mut rng),
        };

        let mut labels = vec![0usize; n];
        let mut iterations = 0;
        while iterations < self.max_iter {
            iterations += 1;
            for i in 0..n {
                labels[i] = self.nearest(&data[i * d..(i + 1) * d], &centers, d);
            }

            let mut next = vec![0.0f32; k * d];
            let mut counts = vec![0usize; k];
            for i in 0..n {
                let c = labels[i];
                counts[c] += 1;
                for p in 0..d {
                    next[c * d + p] += data[i * d + p];
                }
            }
            for c in 0..k {
                if counts[c] == 0 {
                    let s = rng.below(n);
                    next[c * d..(c + 1) * d].copy_from_slice(&data[s * d..(s + 1) * d]);
                } else {
                    let inv = 1.0 / counts[c] as f32;
                    for p in 0..d {
                        next[c * d + p] *= inv;
                    }
                }
            }

            let shift: f32 = (0..k)
                .map(|c| sq_euclidean(&next[c * d..(c + 1) * d], &centers[c * d..(c + 1) * d]).sqrt())
                .sum();
            centers = next;
            if shift * shift < self.tol {
                break;
            }
        }
        // final assignment against the converged centers
        for i in 0..n {
            labels[i] = self.nearest(&data[i * d..(i + 1) * d], &centers, d);
        }

        log::debug!("k-means: {k} clusters, {iterations} iterations");
        Ok(KMeansResult { labels, centers, iterations })
    }

    fn dist(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.distance {
            Distance::Euclidean => sq_euclidean(a, b),
            Distance::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
                if nb == 0.0 { 1.0 } else { 1.0 - dot / nb }
            }
        }
    }

    /// Index of the closest center; ties go to the lowest index.
    fn nearest(&self, row: &[f32], centers: &[f32], d: usize) -> usize {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for c in 0..self.n_clusters {
            let dist = self.dist(row, &centers[c * d..(c + 1) * d]);
            if dist < best_dist {
                best_dist = dist;
                best = c;
            }
        }
        best
    }

    fn init_plus_plus(&self, data: &[f32], n: usize, d: usize, rng: &mut SimpleRng) -> Vec<f32> {
        let k = self.n_clusters;
        let mut centers = Vec::with_capacity(k * d);
        let first = rng.below(n);
        centers.extend_from_slice(&data[first * d..(first + 1) * d]);

        let mut closest: Vec<f32> = (0..n)
            .map(|i| self.dist(&data[i * d..(i + 1) * d], &centers[0..d]).max(0.0))
            .collect();
        for c in 1..k {
            let total: f64 = closest.iter().map(|&v| v as f64).sum();
            let pick = if total > 0.0 {
                let target = rng.unit() * total;
                let mut acc = 0.0f64;
                let mut chosen = n - 1;
                for (i, &w) in closest.iter().enumerate() {
                    acc += w as f64;
                    if acc > target {
                        chosen = i;
                        break;
                    }
                }
                chosen
            } else {
                rng.below(n)
            };
            centers.extend_from_slice(&data[pick * d..(pick + 1) * d]);
            let new_center = &centers[c * d..(c + 1) * d];
            for i in 0..n {
                let dist = self.dist(&data[i * d..(i + 1) * d], new_center).max(0.0);
                if dist < closest[i] {
                    closest[i] = dist;
                }
            }
        }
        centers
    }
}

/// `k` distinct samples chosen uniformly (partial Fisher–Yates).
fn init_random(data: &[f32], n: usize, d: usize, k: usize, rng: &mut SimpleRng) -> Vec<f32> {
    let mut idx: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = i + rng.below(n - i);
        idx.swap(i, j);
    }
    let mut centers = Vec::with_capacity(k * d);
    for &s in &idx[..k] {
        centers.extend_from_slice(&data[s * d..(s + 1) * d]);
    }
    centers
}

fn sq_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn normalize_rows(x: &[f32], n: usize, d: usize) -> Vec<f32> {
    let mut out = x.to_vec();
    for i in 0..n {
        let row = &mut out[i * d..(i + 1) * d];
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in row.iter_mut() {
                *v /= norm;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_blobs() -> (Vec<f32>, Vec<usize>) {
        let mut rng = SimpleRng::new(5);
        let centers = [(0.0f32, 0.0f32), (10.0, 0.0), (0.0, 10.0)];
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (c, &(cx, cy)) in centers.iter().enumerate() {
            for _ in 0..10 {
                x.push(cx + 0.3 * rng.normal());
                x.push(cy + 0.3 * rng.normal());
                y.push(c);
            }
        }
        (x, y)
    }

    /// Same partition up to relabelling.
    fn same_partition(a: &[usize], b: &[usize]) -> bool {
        let mut map = std::collections::HashMap::new();
        for (&p, &q) in a.iter().zip(b) {
            if *map.entry(p).or_insert(q) != q {
                return false;
            }
        }
        let mut seen: Vec<usize> = map.values().copied().collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len() == map.len()
    }

    #[test]
    fn test_recovers_separated_blobs() {
        let (x, y) = three_blobs();
        for init in [KMeansInit::PlusPlus, KMeansInit::Random] {
            let km = KMeans { init, ..KMeans::new(3, 0) };
            let res = km.fit(&x, 30, 2).unwrap();
            if init == KMeansInit::PlusPlus {
                assert!(same_partition(&res.labels, &y), "labels {:?}", res.labels);
            }
            assert_eq!(res.centers.len(), 6);
            assert!(res.labels.iter().all(|&l| l < 3));
        }
    }

    #[test]
    fn test_same_seed_same_labels() {
        let (x, _) = three_blobs();
        let a = KMeans::new(3, 7).fit(&x, 30, 2).unwrap();
        let b = KMeans::new(3, 7).fit(&x, 30, 2).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.centers, b.centers);
    }

    #[test]
    fn test_cosine_distance_groups_by_direction() {
        // two directions, different magnitudes
        let x = vec![1.0, 0.0, 5.0, 0.1, 0.2, 0.0, 0.0, 1.0, 0.1, 3.0, 0.0, 0.4f32];
        let km = KMeans { distance: Distance::Cosine, ..KMeans::new(2, 1) };
        let res = km.fit(&x, 6, 2).unwrap();
        assert!(same_partition(&res.labels, &[0, 0, 0, 1, 1, 1]), "labels {:?}", res.labels);
    }

    #[test]
    fn test_identical_points_finite() {
        let x = vec![2.0f32; 10];
        let res = KMeans::new(3, 0).fit(&x, 5, 2).unwrap();
        assert!(res.centers.iter().all(|v| v.is_finite()));
        assert!(res.labels.iter().all(|&l| l < 3));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(KMeans::new(3, 0).fit(&[], 0, 2), Err(SdccError::EmptyInput(_))));
        assert!(matches!(KMeans::new(4, 0).fit(&[0.0; 6], 3, 2), Err(SdccError::InvalidConfig(_))));
        assert!(matches!(KMeans::new(2, 0).fit(&[0.0; 5], 3, 2), Err(SdccError::ShapeMismatch { .. })));
    }
}
