/// Adam optimizer over flat parameter buffers.
///
/// L2 weight decay is coupled: it is folded into the gradient before the
/// moment updates (g ← g + λθ), not applied to the parameters directly.
/// One step per epoch for every buffer; a single shared step counter drives
/// bias correction.

/// Adam hyperparameters.
#[derive(Clone, Debug, PartialEq)]
pub struct AdamConfig {
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub weight_decay: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        AdamConfig {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

/// Moment buffers for one flat parameter buffer.
#[derive(Clone, Debug)]
struct MomentBuf {
    m: Vec<f32>,
    v: Vec<f32>,
}

impl MomentBuf {
    fn zeros(n: usize) -> Self {
        MomentBuf { m: vec![0.0; n], v: vec![0.0; n] }
    }
}

#[derive(Clone, Debug)]
pub struct Adam {
    pub config: AdamConfig,
    bufs: Vec<MomentBuf>,
    step: u32,
}

/// Core Adam step on a single (params, grads, m, v) group.
#[inline]
fn adam_step_buf(
    params: &mut [f32],
    grads: &[f32],
    buf: &mut MomentBuf,
    lr: f32,
    c: &AdamConfig,
    bc1_inv: f32,
    bc2_inv: f32,
) {
    debug_assert_eq!(params.len(), grads.len());
    for i in 0..params.len() {
        let g = grads[i] + c.weight_decay * params[i];
        buf.m[i] = c.beta1 * buf.m[i] + (1.0 - c.beta1) * g;
        buf.v[i] = c.beta2 * buf.v[i] + (1.0 - c.beta2) * g * g;
        let m_hat = buf.m[i] * bc1_inv;
        let v_hat = buf.v[i] * bc2_inv;
        params[i] -= lr * m_hat / (v_hat.sqrt() + c.eps);
    }
}

impl Adam {
    /// One moment buffer per entry of `sizes`, in the order buffers will be
    /// passed to [`step`](Self::step).
    pub fn new(sizes: &[usize], config: AdamConfig) -> Self {
        Adam {
            config,
            bufs: sizes.iter().map(|&n| MomentBuf::zeros(n)).collect(),
            step: 0,
        }
    }

    pub fn step_count(&self) -> u32 {
        self.step
    }

    pub fn step(&mut self, params: Vec<&mut [f32]>, grads: Vec<&[f32]>, lr: f32) {
        debug_assert_eq!(params.len(), self.bufs.len());
        debug_assert_eq!(grads.len(), self.bufs.len());
        self.step += 1;
        let t = self.step as f32;
        let c = &self.config;
        let bc1_inv = 1.0 / (1.0 - c.beta1.powf(t));
        let bc2_inv = 1.0 / (1.0 - c.beta2.powf(t));
        for ((p, g), buf) in params.into_iter().zip(grads).zip(self.bufs.iter_mut()) {
            adam_step_buf(p, g, buf, lr, c, bc1_inv, bc2_inv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_moves_by_lr() {
        // bias-corrected first step is lr · sign(g) (up to eps)
        let mut p = vec![1.0f32, -2.0, 0.5];
        let g = vec![0.3f32, -4.0, 0.0];
        let mut opt = Adam::new(&[3], AdamConfig::default());
        opt.step(vec![p.as_mut_slice()], vec![g.as_slice()], 0.1);
        assert!((p[0] - 0.9).abs() < 1e-5);
        assert!((p[1] + 1.9).abs() < 1e-5);
        assert_eq!(p[2], 0.5);
        assert_eq!(opt.step_count(), 1);
    }

    #[test]
    fn test_weight_decay_shrinks_without_gradient() {
        let mut p = vec![2.0f32];
        let g = vec![0.0f32];
        let cfg = AdamConfig { weight_decay: 0.1, ..AdamConfig::default() };
        let mut opt = Adam::new(&[1], cfg);
        for _ in 0..5 {
            opt.step(vec![p.as_mut_slice()], vec![g.as_slice()], 0.01);
        }
        assert!(p[0] < 2.0 && p[0] > 1.9);
    }

    #[test]
    fn test_minimises_quadratic() {
        let mut p = vec![3.0f32, -5.0];
        let mut opt = Adam::new(&[2], AdamConfig::default());
        for _ in 0..2000 {
            let g: Vec<f32> = p.iter().map(|x| 2.0 * x).collect();
            opt.step(vec![p.as_mut_slice()], vec![g.as_slice()], 0.05);
        }
        assert!(p.iter().all(|x| x.abs() < 5e-2), "p = {p:?}");
    }
}
