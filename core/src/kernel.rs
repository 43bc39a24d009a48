/// Pairwise distances and the Gaussian kernel used by the separability loss.
///
/// Distances are squared Euclidean and clamped at zero (the expansion
/// ‖x‖² − 2x·y + ‖y‖² can dip slightly negative). The bandwidth is taken from
/// the data each call and is a constant for backward purposes.

/// Floor for the kernel bandwidth σ².
pub const MIN_SIGMA2: f32 = 1e-9;

/// Squared Euclidean distances between rows of X[n,d] and Y[m,d] → [n,m].
/// Raw expansion, not clamped.
pub fn cdist_sq(x: &[f32], y: &[f32], n: usize, m: usize, d: usize) -> Vec<f32> {
    debug_assert_eq!(x.len(), n * d);
    debug_assert_eq!(y.len(), m * d);

    let x2: Vec<f32> = (0..n).map(|i| x[i * d..(i + 1) * d].iter().map(|v| v * v).sum()).collect();
    let y2: Vec<f32> = (0..m).map(|j| y[j * d..(j + 1) * d].iter().map(|v| v * v).sum()).collect();
    let mut out = vec![0.0f32; n * m];
    for i in 0..n {
        let xi = &x[i * d..(i + 1) * d];
        for j in 0..m {
            let yj = &y[j * d..(j + 1) * d];
            let mut dot = 0.0f32;
            for p in 0..d {
                dot += xi[p] * yj[p];
            }
            out[i * m + j] = x2[i] - 2.0 * dot + y2[j];
        }
    }
    out
}

/// Median with torch semantics: the lower of the two middle values for even
/// lengths. NaNs sort last. Returns 0 for an empty slice.
pub fn lower_median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted[(sorted.len() - 1) / 2]
}

/// Gaussian kernel over the rows of a hidden representation, plus what
/// backward needs.
#[derive(Clone, Debug)]
pub struct GaussianKernel {
    /// Kernel matrix: [n, n]
    pub k: Vec<f32>,
    pub n: usize,
    /// Bandwidth σ² actually used (after the floor).
    pub sigma2: f32,
    /// Unclamped squared distances: [n, n]
    dist_raw: Vec<f32>,
}

impl GaussianKernel {
    /// σ² = rel_sigma × median(pairwise squared distances), floored at [`MIN_SIGMA2`].
    pub fn from_hidden(x: &[f32], n: usize, d: usize, rel_sigma: f32) -> Self {
        let dist_raw = cdist_sq(x, x, n, n, d);
        let dist: Vec<f32> = dist_raw.iter().map(|&v| v.max(0.0)).collect();
        let sigma2 = rel_sigma * lower_median(&dist);
        Self::from_distances(dist_raw, n, sigma2)
    }

    /// Kernel with an explicit bandwidth (still floored).
    pub fn with_bandwidth(x: &[f32], n: usize, d: usize, sigma2: f32) -> Self {
        Self::from_distances(cdist_sq(x, x, n, n, d), n, sigma2)
    }

    fn from_distances(dist_raw: Vec<f32>, n: usize, sigma2: f32) -> Self {
        // NaN bandwidth also lands on the floor.
        let sigma2 = if sigma2 >= MIN_SIGMA2 { sigma2 } else { MIN_SIGMA2 };
        let k = dist_raw.iter()
            .map(|&v| (-v.max(0.0) / (2.0 * sigma2)).exp())
            .collect();
        GaussianKernel { k, n, sigma2, dist_raw }
    }

    /// Map ∂L/∂K [n,n] back to ∂L/∂X [n,d], holding σ² fixed.
    pub fn backward(&self, x: &[f32], d: usize, d_k: &[f32]) -> Vec<f32> {
        let n = self.n;
        debug_assert_eq!(x.len(), n * d);
        debug_assert_eq!(d_k.len(), n * n);

        // K = exp(-relu(D) / 2σ²)
        let inv = 1.0 / (2.0 * self.sigma2);
        let mut d_dist = vec![0.0f32; n * n];
        for idx in 0..n * n {
            if self.dist_raw[idx] > 0.0 {
                d_dist[idx] = -self.k[idx] * inv * d_k[idx];
            }
        }

        // D_ab = ‖x_a‖² − 2 x_a·x_b + ‖x_b‖²  ⇒  ∂/∂x_a = Σ_b (dD_ab + dD_ba) · 2(x_a − x_b)
        let mut d_x = vec![0.0f32; n * d];
        for a in 0..n {
            for b in 0..n {
                if a == b {
                    continue;
                }
                let g = 2.0 * (d_dist[a * n + b] + d_dist[b * n + a]);
                if g == 0.0 {
                    continue;
                }
                for p in 0..d {
                    d_x[a * d + p] += g * (x[a * d + p] - x[b * d + p]);
                }
            }
        }
        d_x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdist_sq_known_values() {
        let x = [0.0, 0.0, 3.0, 4.0f32];
        let d = cdist_sq(&x, &x, 2, 2, 2);
        assert_eq!(d, vec![0.0, 25.0, 25.0, 0.0]);
    }

    #[test]
    fn test_lower_median_even_and_odd() {
        assert_eq!(lower_median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(lower_median(&[4.0, 1.0, 3.0, 2.0]), 2.0);
        assert_eq!(lower_median(&[]), 0.0);
    }

    #[test]
    fn test_kernel_diagonal_is_one_and_symmetric() {
        let x = [0.0, 1.0, 2.0, 0.5, -1.0, 3.0f32];
        let kern = GaussianKernel::from_hidden(&x, 3, 2, 0.15);
        for i in 0..3 {
            assert!((kern.k[i * 3 + i] - 1.0).abs() < 1e-6);
            for j in 0..3 {
                assert!((kern.k[i * 3 + j] - kern.k[j * 3 + i]).abs() < 1e-7);
                assert!(kern.k[i * 3 + j] > 0.0 && kern.k[i * 3 + j] <= 1.0);
            }
        }
    }

    #[test]
    fn test_zero_distances_use_floor_bandwidth() {
        let x = [1.0f32; 8];
        let kern = GaussianKernel::from_hidden(&x, 4, 2, 0.15);
        assert_eq!(kern.sigma2, MIN_SIGMA2);
        assert!(kern.k.iter().all(|v| v.is_finite()));
        assert!(kern.k.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let n = 4;
        let d = 3;
        let x: Vec<f32> = (0..n * d).map(|i| ((i * 7 % 5) as f32 - 2.0) * 0.4).collect();
        let sigma2 = 1.3f32;
        // L = Σ w_ab K_ab with an asymmetric weight pattern
        let w: Vec<f32> = (0..n * n).map(|i| (i % 3) as f32 - 0.7).collect();
        let loss = |x: &[f32]| -> f32 {
            let kern = GaussianKernel::with_bandwidth(x, n, d, sigma2);
            kern.k.iter().zip(w.iter()).map(|(a, b)| a * b).sum()
        };
        let kern = GaussianKernel::with_bandwidth(&x, n, d, sigma2);
        let analytical = kern.backward(&x, d, &w);
        let eps = 1e-2;
        for idx in 0..n * d {
            let mut xp = x.clone();
            xp[idx] += eps;
            let mut xm = x.clone();
            xm[idx] -= eps;
            let numerical = (loss(&xp) - loss(&xm)) / (2.0 * eps);
            assert!((analytical[idx] - numerical).abs() < 5e-3 + 2e-2 * numerical.abs(),
                "x[{idx}]: analytical={}, numerical={numerical}", analytical[idx]);
        }
    }
}
