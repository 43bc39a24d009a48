/// Learned convex combination of the old-model and new-model streams.
///
/// One raw weight per stream, initialised to 1/n and softmax-normalised at
/// every use. The same probabilities mix the fused features, the correlation
/// losses and the reconstruction losses.

use serde::{Deserialize, Serialize};

use crate::tensor::softmax_f32;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusionGate {
    pub weights: Vec<f32>,
}

impl FusionGate {
    pub fn new(n_streams: usize) -> Self {
        let w = 1.0 / n_streams.max(1) as f32;
        FusionGate { weights: vec![w; n_streams] }
    }

    pub fn zeros_like(&self) -> Self {
        FusionGate { weights: vec![0.0; self.weights.len()] }
    }

    pub fn n_streams(&self) -> usize {
        self.weights.len()
    }

    /// softmax(weights)
    pub fn probs(&self) -> Vec<f32> {
        let n = self.weights.len();
        let mut p = vec![0.0f32; n];
        softmax_f32(&self.weights, &mut p, 1, n);
        p
    }

    pub fn combine_scalars(&self, values: &[f32]) -> f32 {
        debug_assert_eq!(values.len(), self.weights.len());
        self.probs().iter().zip(values).map(|(p, v)| p * v).sum()
    }

    /// Σ pᵢ · inputᵢ over equally-shaped buffers.
    pub fn combine(&self, inputs: &[&[f32]]) -> Vec<f32> {
        debug_assert_eq!(inputs.len(), self.weights.len());
        let probs = self.probs();
        let len = inputs.first().map_or(0, |x| x.len());
        let mut out = vec![0.0f32; len];
        for (p, x) in probs.iter().zip(inputs) {
            debug_assert_eq!(x.len(), len);
            for (o, &v) in out.iter_mut().zip(x.iter()) {
                *o += p * v;
            }
        }
        out
    }

    /// Map ∂L/∂p to ∂L/∂weights through the softmax Jacobian:
    /// dwⱼ = pⱼ (dpⱼ − Σᵢ pᵢ dpᵢ).
    pub fn backward(&self, d_probs: &[f32]) -> Vec<f32> {
        let probs = self.probs();
        let dot: f32 = probs.iter().zip(d_probs).map(|(p, d)| p * d).sum();
        probs.iter().zip(d_probs).map(|(p, d)| p * (d - dot)).collect()
    }

    pub fn buffers(&self) -> Vec<&[f32]> {
        vec![self.weights.as_slice()]
    }

    pub fn buffers_mut(&mut self) -> Vec<&mut [f32]> {
        vec![self.weights.as_mut_slice()]
    }
}
