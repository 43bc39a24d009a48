/// Dense building blocks with explicit forward caches and hand-written backward.
///
/// Inputs are row-major [rows, width]. Each layer owns its parameters as flat
/// `Vec<f32>` buffers; gradients live in a second instance of the same type
/// (see `zeros_like`), so the optimizer can walk params and grads in lockstep.

use serde::{Deserialize, Serialize};

use crate::tensor::{gelu_f32, gelu_prime_f32, matmul_acc_f32, matmul_f32, transposed, SimpleRng};

/// LayerNorm epsilon.
pub const LN_EPS: f32 = 1e-5;

// ── Linear ───────────────────────────────────────────────────────────

/// y = x Wᵗ + b with W stored [d_out, d_in].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    pub w: Vec<f32>,
    pub b: Vec<f32>,
    pub d_in: usize,
    pub d_out: usize,
}

impl Linear {
    /// Uniform ±1/sqrt(d_in) for both weights and bias.
    pub fn init(d_in: usize, d_out: usize, rng: &mut SimpleRng) -> Self {
        let scale = 1.0 / (d_in.max(1) as f32).sqrt();
        let mut w = vec![0.0f32; d_out * d_in];
        rng.fill_uniform(&mut w, scale);
        let mut b = vec![0.0f32; d_out];
        rng.fill_uniform(&mut b, scale);
        Linear { w, b, d_in, d_out }
    }

    pub fn zeros_like(&self) -> Self {
        Linear {
            w: vec![0.0; self.w.len()],
            b: vec![0.0; self.b.len()],
            d_in: self.d_in,
            d_out: self.d_out,
        }
    }

    pub fn forward(&self, x: &[f32], rows: usize) -> Vec<f32> {
        debug_assert_eq!(x.len(), rows * self.d_in);
        let wt = transposed(&self.w, self.d_out, self.d_in);
        let mut y = vec![0.0f32; rows * self.d_out];
        matmul_f32(x, &wt, &mut y, rows, self.d_in, self.d_out);
        for r in 0..rows {
            for (o, &bias) in y[r * self.d_out..(r + 1) * self.d_out].iter_mut().zip(&self.b) {
                *o += bias;
            }
        }
        y
    }

    /// Accumulates dW, db into `grads`; returns dx [rows, d_in].
    pub fn backward(&self, x: &[f32], rows: usize, d_y: &[f32], grads: &mut Linear) -> Vec<f32> {
        debug_assert_eq!(d_y.len(), rows * self.d_out);
        // dW += d_yᵗ @ x
        let d_yt = transposed(d_y, rows, self.d_out);
        matmul_acc_f32(&d_yt, x, &mut grads.w, self.d_out, rows, self.d_in);
        for r in 0..rows {
            for o in 0..self.d_out {
                grads.b[o] += d_y[r * self.d_out + o];
            }
        }
        // dx = d_y @ W
        let mut d_x = vec![0.0f32; rows * self.d_in];
        matmul_f32(d_y, &self.w, &mut d_x, rows, self.d_out, self.d_in);
        d_x
    }

    pub fn buffers(&self) -> Vec<&[f32]> {
        vec![self.w.as_slice(), self.b.as_slice()]
    }

    pub fn buffers_mut(&mut self) -> Vec<&mut [f32]> {
        vec![self.w.as_mut_slice(), self.b.as_mut_slice()]
    }
}

// ── LayerNorm ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerNorm {
    pub gamma: Vec<f32>,
    pub beta: Vec<f32>,
}

/// Per-row normalised input and inverse std.
#[derive(Clone, Debug)]
pub struct LayerNormCache {
    x_hat: Vec<f32>,
    inv_std: Vec<f32>,
}

impl LayerNorm {
    pub fn new(dim: usize) -> Self {
        LayerNorm { gamma: vec![1.0; dim], beta: vec![0.0; dim] }
    }

    pub fn zeros_like(&self) -> Self {
        LayerNorm { gamma: vec![0.0; self.gamma.len()], beta: vec![0.0; self.beta.len()] }
    }

    pub fn dim(&self) -> usize {
        self.gamma.len()
    }

    pub fn forward(&self, x: &[f32], rows: usize) -> (Vec<f32>, LayerNormCache) {
        let d = self.dim();
        let mut y = vec![0.0f32; rows * d];
        let mut x_hat = vec![0.0f32; rows * d];
        let mut inv_std = vec![0.0f32; rows];
        for r in 0..rows {
            let row = &x[r * d..(r + 1) * d];
            let mean = row.iter().sum::<f32>() / d as f32;
            let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / d as f32;
            let is = 1.0 / (var + LN_EPS).sqrt();
            inv_std[r] = is;
            for c in 0..d {
                let xh = (row[c] - mean) * is;
                x_hat[r * d + c] = xh;
                y[r * d + c] = xh * self.gamma[c] + self.beta[c];
            }
        }
        (y, LayerNormCache { x_hat, inv_std })
    }

    pub fn backward(&self, cache: &LayerNormCache, d_y: &[f32], grads: &mut LayerNorm) -> Vec<f32> {
        let d = self.dim();
        let rows = cache.inv_std.len();
        let mut d_x = vec![0.0f32; rows * d];
        let mut d_xhat = vec![0.0f32; d];
        for r in 0..rows {
            let base = r * d;
            let mut sum = 0.0f32;
            let mut sum_xhat = 0.0f32;
            for c in 0..d {
                let g = d_y[base + c];
                let xh = cache.x_hat[base + c];
                grads.gamma[c] += g * xh;
                grads.beta[c] += g;
                d_xhat[c] = g * self.gamma[c];
                sum += d_xhat[c];
                sum_xhat += d_xhat[c] * xh;
            }
            let scale = cache.inv_std[r] / d as f32;
            for c in 0..d {
                d_x[base + c] = scale * (d as f32 * d_xhat[c] - sum - cache.x_hat[base + c] * sum_xhat);
            }
        }
        d_x
    }

    pub fn buffers(&self) -> Vec<&[f32]> {
        vec![self.gamma.as_slice(), self.beta.as_slice()]
    }

    pub fn buffers_mut(&mut self) -> Vec<&mut [f32]> {
        vec![self.gamma.as_mut_slice(), self.beta.as_mut_slice()]
    }
}

// ── Residual MLP block ───────────────────────────────────────────────

/// x + fc2(GELU(fc1(LayerNorm(x)))), width-preserving.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MlpBlock {
    pub norm: LayerNorm,
    pub fc1: Linear,
    pub fc2: Linear,
}

#[derive(Clone, Debug)]
pub struct MlpBlockCache {
    norm: LayerNormCache,
    normed: Vec<f32>,
    pre_act: Vec<f32>,
    act: Vec<f32>,
    rows: usize,
}

impl MlpBlock {
    pub fn init(width: usize, rng: &mut SimpleRng) -> Self {
        MlpBlock {
            norm: LayerNorm::new(width),
            fc1: Linear::init(width, width, rng),
            fc2: Linear::init(width, width, rng),
        }
    }

    pub fn zeros_like(&self) -> Self {
        MlpBlock {
            norm: self.norm.zeros_like(),
            fc1: self.fc1.zeros_like(),
            fc2: self.fc2.zeros_like(),
        }
    }

    pub fn forward(&self, x: &[f32], rows: usize) -> (Vec<f32>, MlpBlockCache) {
        let (normed, norm) = self.norm.forward(x, rows);
        let pre_act = self.fc1.forward(&normed, rows);
        let act: Vec<f32> = pre_act.iter().map(|&v| gelu_f32(v)).collect();
        let mut y = self.fc2.forward(&act, rows);
        for (o, &xi) in y.iter_mut().zip(x) {
            *o += xi;
        }
        (y, MlpBlockCache { norm, normed, pre_act, act, rows })
    }

    pub fn backward(&self, cache: &MlpBlockCache, d_y: &[f32], grads: &mut MlpBlock) -> Vec<f32> {
        let rows = cache.rows;
        let d_act = self.fc2.backward(&cache.act, rows, d_y, &mut grads.fc2);
        let d_pre: Vec<f32> = d_act.iter().zip(&cache.pre_act)
            .map(|(&g, &z)| g * gelu_prime_f32(z))
            .collect();
        let d_normed = self.fc1.backward(&cache.normed, rows, &d_pre, &mut grads.fc1);
        let mut d_x = self.norm.backward(&cache.norm, &d_normed, &mut grads.norm);
        for (dx, &g) in d_x.iter_mut().zip(d_y) {
            *dx += g; // residual
        }
        d_x
    }

    pub fn buffers(&self) -> Vec<&[f32]> {
        let mut out = self.norm.buffers();
        out.extend(self.fc1.buffers());
        out.extend(self.fc2.buffers());
        out
    }

    pub fn buffers_mut(&mut self) -> Vec<&mut [f32]> {
        let mut out = self.norm.buffers_mut();
        out.extend(self.fc1.buffers_mut());
        out.extend(self.fc2.buffers_mut());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rows: usize, cols: usize, seed: u64) -> Vec<f32> {
        let mut rng = SimpleRng::new(seed);
        (0..rows * cols).map(|_| rng.normal()).collect()
    }

    /// L = Σ w ⊙ y for a fixed random weighting, so d_y = w.
    fn weighted_sum(y: &[f32], w: &[f32]) -> f32 {
        y.iter().zip(w).map(|(a, b)| a * b).sum()
    }

    #[test]
    fn test_linear_known_values() {
        let lin = Linear { w: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], b: vec![0.5, -0.5], d_in: 3, d_out: 2 };
        let y = lin.forward(&[1.0, 0.0, -1.0], 1);
        assert_eq!(y, vec![1.0 - 3.0 + 0.5, 4.0 - 6.0 - 0.5]);
    }

    #[test]
    fn test_linear_init_range() {
        let mut rng = SimpleRng::new(3);
        let lin = Linear::init(16, 4, &mut rng);
        let bound = 0.25 + 1e-6;
        assert!(lin.w.iter().chain(&lin.b).all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_linear_backward_fd() {
        let mut rng = SimpleRng::new(11);
        let lin = Linear::init(4, 3, &mut rng);
        let x = sample(5, 4, 12);
        let w = sample(5, 3, 13);
        let mut grads = lin.zeros_like();
        let d_x = lin.backward(&x, 5, &w, &mut grads);
        let eps = 1e-2f32;
        for idx in 0..x.len() {
            let mut xp = x.clone();
            xp[idx] += eps;
            let mut xm = x.clone();
            xm[idx] -= eps;
            let num = (weighted_sum(&lin.forward(&xp, 5), &w) - weighted_sum(&lin.forward(&xm, 5), &w)) / (2.0 * eps);
            assert!((d_x[idx] - num).abs() < 1e-2 + 1e-2 * num.abs(), "x[{idx}]: {} vs {num}", d_x[idx]);
        }
        for idx in 0..lin.w.len() {
            let mut lp = lin.clone();
            lp.w[idx] += eps;
            let mut lm = lin.clone();
            lm.w[idx] -= eps;
            let num = (weighted_sum(&lp.forward(&x, 5), &w) - weighted_sum(&lm.forward(&x, 5), &w)) / (2.0 * eps);
            assert!((grads.w[idx] - num).abs() < 1e-2 + 1e-2 * num.abs(), "w[{idx}]: {} vs {num}", grads.w[idx]);
        }
    }

    #[test]
    fn test_layer_norm_output_statistics() {
        let ln = LayerNorm::new(6);
        let x = sample(3, 6, 5);
        let (y, _) = ln.forward(&x, 3);
        for r in 0..3 {
            let row = &y[r * 6..(r + 1) * 6];
            let mean = row.iter().sum::<f32>() / 6.0;
            let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / 6.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_layer_norm_backward_fd() {
        let mut ln = LayerNorm::new(4);
        ln.gamma = vec![1.0, 0.5, -0.7, 2.0];
        ln.beta = vec![0.1, 0.0, 0.2, -0.3];
        let x = sample(3, 4, 21);
        let w = sample(3, 4, 22);
        let (_, cache) = ln.forward(&x, 3);
        let mut grads = ln.zeros_like();
        let d_x = ln.backward(&cache, &w, &mut grads);
        let eps = 1e-2f32;
        for idx in 0..x.len() {
            let mut xp = x.clone();
            xp[idx] += eps;
            let mut xm = x.clone();
            xm[idx] -= eps;
            let num = (weighted_sum(&ln.forward(&xp, 3).0, &w) - weighted_sum(&ln.forward(&xm, 3).0, &w)) / (2.0 * eps);
            assert!((d_x[idx] - num).abs() < 2e-2 + 2e-2 * num.abs(), "x[{idx}]: {} vs {num}", d_x[idx]);
        }
    }

    #[test]
    fn test_block_backward_fd() {
        let mut rng = SimpleRng::new(31);
        let blk = MlpBlock::init(5, &mut rng);
        let x = sample(4, 5, 32);
        let w = sample(4, 5, 33);
        let (_, cache) = blk.forward(&x, 4);
        let mut grads = blk.zeros_like();
        let d_x = blk.backward(&cache, &w, &mut grads);
        let eps = 1e-2f32;
        for idx in 0..x.len() {
            let mut xp = x.clone();
            xp[idx] += eps;
            let mut xm = x.clone();
            xm[idx] -= eps;
            let num = (weighted_sum(&blk.forward(&xp, 4).0, &w) - weighted_sum(&blk.forward(&xm, 4).0, &w)) / (2.0 * eps);
            assert!((d_x[idx] - num).abs() < 2e-2 + 2e-2 * num.abs(), "x[{idx}]: {} vs {num}", d_x[idx]);
        }
        for idx in 0..blk.fc1.w.len() {
            let mut bp = blk.clone();
            bp.fc1.w[idx] += eps;
            let mut bm = blk.clone();
            bm.fc1.w[idx] -= eps;
            let num = (weighted_sum(&bp.forward(&x, 4).0, &w) - weighted_sum(&bm.forward(&x, 4).0, &w)) / (2.0 * eps);
            assert!((grads.fc1.w[idx] - num).abs() < 2e-2 + 2e-2 * num.abs(),
                "fc1.w[{idx}]: {} vs {num}", grads.fc1.w[idx]);
        }
    }

    #[test]
    fn test_buffers_cover_every_parameter() {
        let mut rng = SimpleRng::new(1);
        let mut blk = MlpBlock::init(3, &mut rng);
        let total: usize = blk.buffers().iter().map(|b| b.len()).sum();
        assert_eq!(total, 3 + 3 + 9 + 3 + 9 + 3);
        assert_eq!(blk.buffers_mut().len(), 6);
    }
}
