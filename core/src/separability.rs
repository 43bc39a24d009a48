/// Cauchy–Schwarz cluster-separability loss.
///
/// Operates on a hidden representation H [N, D], a hard assignment (one-hot
/// A [N, k] built from cluster labels) and the Gaussian kernel K of H:
///
///   loss = d_cs(A, K) + 2/(N(N−1)) Σ_{i<j} (AAᵗ)_ij + d_cs(M, K)
///   M    = exp(−cdist²(A, I_k))
///
/// with d_cs(A, K) = 2/(k(k−1)) Σ_{i<j} G'_ij / sqrt(D'_ij), G = AᵗKA,
/// G' = max(G, 1e-9), D = diag(G) diag(G)ᵗ, D' = max(D, 1e-18).
///
/// A and M are constants; only K depends on H. The middle term is a constant
/// of the labelling and carries no gradient.

use crate::kernel::{cdist_sq, GaussianKernel};
use crate::tensor::matmul_f32;

/// Floor applied to cluster-similarity entries.
pub const SIMILARITY_EPSILON: f32 = 1e-9;
/// Floor applied to the product of cluster self-similarities.
pub const NORMALIZER_EPSILON: f32 = 1e-18;

/// One-hot encode `labels` into [N, n_class]. Always `n_class` columns.
pub fn one_hot(labels: &[usize], n_class: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; labels.len() * n_class];
    for (i, &l) in labels.iter().enumerate() {
        debug_assert!(l < n_class, "label {l} out of range for {n_class} classes");
        if l < n_class {
            out[i * n_class + l] = 1.0;
        }
    }
    out
}

/// 2/(k(k−1)), or 0 when there are fewer than two clusters.
fn pair_factor(k: usize) -> f32 {
    if k < 2 { 0.0 } else { 2.0 / (k * (k - 1)) as f32 }
}

/// G = Aᵗ K A for A [n,k], K [n,n] → [k,k].
fn cluster_similarity(a: &[f32], n: usize, k: usize, kmat: &[f32]) -> Vec<f32> {
    let mut ka = vec![0.0f32; n * k];
    matmul_f32(kmat, a, &mut ka, n, n, k);
    let mut g = vec![0.0f32; k * k];
    for i in 0..k {
        for j in 0..k {
            let mut s = 0.0f32;
            for p in 0..n {
                s += a[p * k + i] * ka[p * k + j];
            }
            g[i * k + j] = s;
        }
    }
    g
}

/// Cauchy–Schwarz divergence between the columns of A [n,k] under kernel K [n,n].
pub fn cs_divergence(a: &[f32], n: usize, k: usize, kmat: &[f32]) -> f32 {
    let c = pair_factor(k);
    if c == 0.0 {
        return 0.0;
    }
    let g = cluster_similarity(a, n, k, kmat);
    let mut sum = 0.0f32;
    for i in 0..k {
        for j in (i + 1)..k {
            let nom = g[i * k + j].max(SIMILARITY_EPSILON);
            let dsq = (g[i * k + i] * g[j * k + j]).max(NORMALIZER_EPSILON);
            sum += nom / dsq.sqrt();
        }
    }
    c * sum
}

/// ∂ cs_divergence / ∂K → [n,n]. Clamped entries pass no gradient.
pub fn cs_divergence_backward(a: &[f32], n: usize, k: usize, kmat: &[f32]) -> Vec<f32> {
    let c = pair_factor(k);
    let mut d_k = vec![0.0f32; n * n];
    if c == 0.0 {
        return d_k;
    }
    let g = cluster_similarity(a, n, k, kmat);

    let mut d_g = vec![0.0f32; k * k];
    for i in 0..k {
        for j in (i + 1)..k {
            let gij = g[i * k + j];
            let nom = gij.max(SIMILARITY_EPSILON);
            let raw = g[i * k + i] * g[j * k + j];
            let dsq = raw.max(NORMALIZER_EPSILON);
            if gij >= SIMILARITY_EPSILON {
                d_g[i * k + j] += c / dsq.sqrt();
            }
            if raw >= NORMALIZER_EPSILON {
                // ∂(nom · D^(-1/2))/∂D
                let d_dsq = c * nom * -0.5 / (dsq * dsq.sqrt());
                d_g[i * k + i] += d_dsq * g[j * k + j];
                d_g[j * k + j] += d_dsq * g[i * k + i];
            }
        }
    }

    // G = AᵗKA ⇒ dK = A dG Aᵗ
    let mut a_dg = vec![0.0f32; n * k];
    matmul_f32(a, &d_g, &mut a_dg, n, k, k);
    for p in 0..n {
        for q in 0..n {
            let mut s = 0.0f32;
            for j in 0..k {
                s += a_dg[p * k + j] * a[q * k + j];
            }
            d_k[p * n + q] = s;
        }
    }
    d_k
}

/// exp(−cdist²(A, I_k)): soft affinity of each assignment row to each cluster vertex.
pub fn vertex_affinity(a: &[f32], n: usize, k: usize) -> Vec<f32> {
    let mut eye = vec![0.0f32; k * k];
    for i in 0..k {
        eye[i * k + i] = 1.0;
    }
    cdist_sq(a, &eye, n, k, k).into_iter().map(|v| (-v.max(0.0)).exp()).collect()
}

/// 2/(N(N−1)) Σ_{i<j} (AAᵗ)_ij: the fraction of sample pairs sharing a cluster.
fn same_cluster_pairs(a: &[f32], n: usize, k: usize) -> f32 {
    if n < 2 {
        return 0.0;
    }
    let mut sum = 0.0f32;
    for p in 0..n {
        for q in (p + 1)..n {
            for j in 0..k {
                sum += a[p * k + j] * a[q * k + j];
            }
        }
    }
    2.0 / (n * (n - 1)) as f32 * sum
}

/// Loss configuration.
#[derive(Clone, Copy, Debug)]
pub struct ClusterSeparability {
    pub rel_sigma: f32,
}

impl Default for ClusterSeparability {
    fn default() -> Self {
        ClusterSeparability { rel_sigma: 0.15 }
    }
}

/// Forward result plus the cache backward needs.
#[derive(Clone, Debug)]
pub struct SeparabilityOutput {
    pub loss: f32,
    /// (cluster divergence, same-cluster pairs, vertex divergence)
    pub terms: [f32; 3],
    pub kernel: GaussianKernel,
    assign: Vec<f32>,
    affinity: Vec<f32>,
    n_class: usize,
}

impl ClusterSeparability {
    pub fn new(rel_sigma: f32) -> Self {
        ClusterSeparability { rel_sigma }
    }

    /// Loss for hidden [n, d] under cluster `labels` (values < `n_class`).
    pub fn forward(&self, hidden: &[f32], n: usize, d: usize, labels: &[usize], n_class: usize) -> SeparabilityOutput {
        let kernel = GaussianKernel::from_hidden(hidden, n, d, self.rel_sigma);
        evaluate(kernel, labels, n_class)
    }

    /// Same as [`forward`](Self::forward) with an explicit kernel bandwidth σ².
    pub fn forward_with_bandwidth(
        &self, hidden: &[f32], n: usize, d: usize, labels: &[usize], n_class: usize, sigma2: f32,
    ) -> SeparabilityOutput {
        let kernel = GaussianKernel::with_bandwidth(hidden, n, d, sigma2);
        evaluate(kernel, labels, n_class)
    }
}

fn evaluate(kernel: GaussianKernel, labels: &[usize], n_class: usize) -> SeparabilityOutput {
    let n = kernel.n;
    debug_assert_eq!(labels.len(), n);
    let assign = one_hot(labels, n_class);
    let affinity = vertex_affinity(&assign, n, n_class);

    let t1 = cs_divergence(&assign, n, n_class, &kernel.k);
    let t2 = same_cluster_pairs(&assign, n, n_class);
    let t3 = cs_divergence(&affinity, n, n_class, &kernel.k);

    SeparabilityOutput {
        loss: t1 + t2 + t3,
        terms: [t1, t2, t3],
        kernel,
        assign,
        affinity,
        n_class,
    }
}

impl SeparabilityOutput {
    /// ∂loss/∂hidden [n, d].
    pub fn backward(&self, hidden: &[f32], d: usize) -> Vec<f32> {
        let n = self.kernel.n;
        let mut d_k = cs_divergence_backward(&self.assign, n, self.n_class, &self.kernel.k);
        let d_k3 = cs_divergence_backward(&self.affinity, n, self.n_class, &self.kernel.k);
        for (a, b) in d_k.iter_mut().zip(d_k3.iter()) {
            *a += b;
        }
        self.kernel.backward(hidden, d, &d_k)
    }
}
