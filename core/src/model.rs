/// DCC model: one shared encoder/decoder pair plus a correlation solver over a
/// fixed number of views, and the JSON model bundle.
///
/// Every view is consumed transposed, [d_v, N]: the encoder maps each feature
/// row from sample space (width N) to `out_dim`, the decoder maps back. The
/// correlation solver runs over the per-view encoder outputs [d_v, out_dim];
/// its projections W_v [d_v, dim] then fuse the raw views as Σ W_vᵗ x_v [dim, N].
///
/// Projections are constants for backward, so the fused representation
/// carries no parameter gradient.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::autoencoder::{reconstruction_grads, reconstruction_loss, Decoder, DecoderPass, Encoder, EncoderPass};
use crate::config::SdccConfig;
use crate::correlation::{CorrelationOutput, CorrelationSolver};
use crate::error::{SdccError, SdccResult};
use crate::gate::FusionGate;
use crate::tensor::{axpy_f32, matmul_acc_f32, transposed, SimpleRng};

/// Trainable parameters of one model instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DccParams {
    pub encoder: Encoder,
    pub decoder: Decoder,
}

impl DccParams {
    /// Encoder N → hidden → out_dim, decoder out_dim → hidden → N.
    pub fn init(n_samples: usize, hidden: usize, out_dim: usize, seed: u64) -> Self {
        let mut rng = SimpleRng::new(seed);
        let encoder = Encoder::init(n_samples, hidden, out_dim, &mut rng);
        let decoder = Decoder::init(out_dim, hidden, n_samples, &mut rng);
        DccParams { encoder, decoder }
    }

    pub fn zeros_like(&self) -> Self {
        DccParams {
            encoder: self.encoder.zeros_like(),
            decoder: self.decoder.zeros_like(),
        }
    }

    pub fn buffers(&self) -> Vec<&[f32]> {
        let mut out = self.encoder.buffers();
        out.extend(self.decoder.buffers());
        out
    }

    pub fn buffers_mut(&mut self) -> Vec<&mut [f32]> {
        let mut out = self.encoder.buffers_mut();
        out.extend(self.decoder.buffers_mut());
        out
    }

    pub fn buffer_sizes(&self) -> Vec<usize> {
        self.buffers().iter().map(|b| b.len()).collect()
    }

    pub fn num_params(&self) -> usize {
        self.buffer_sizes().iter().sum()
    }
}

/// One model instance ("old" over V-1 views or "new" over V views).
#[derive(Clone, Debug)]
pub struct DccModel {
    pub params: DccParams,
    pub solver: CorrelationSolver,
    pub n_view: usize,
    pub n_samples: usize,
}

/// Everything one forward pass produces.
#[derive(Clone, Debug)]
pub struct ModelPass {
    pub correlation: CorrelationOutput,
    /// Σ over views of the crossed reconstruction loss.
    pub rec_loss: f32,
    /// Σ W_vᵗ x_v: [dim, N]
    pub fused: Vec<f32>,
    pub dim: usize,
    enc: Vec<EncoderPass>,
    dec: Vec<DecoderPass>,
}

impl ModelPass {
    pub fn correlation_loss(&self) -> f32 {
        self.correlation.loss
    }

    /// Encoder outputs per view, [d_v, out_dim].
    pub fn embeddings(&self) -> Vec<&[f32]> {
        self.enc.iter().map(|e| e.out.as_slice()).collect()
    }
}

impl DccModel {
    pub fn new(cfg: &SdccConfig, n_samples: usize, n_view: usize, cca_dim: usize, seed: u64) -> Self {
        DccModel {
            params: DccParams::init(n_samples, cfg.n_fea, cfg.out_dim, seed),
            solver: CorrelationSolver::new(cca_dim, cfg.correlation_r(), cfg.solver),
            n_view,
            n_samples,
        }
    }

    /// Rebuild a model around saved parameters.
    pub fn from_params(cfg: &SdccConfig, params: DccParams, n_view: usize, cca_dim: usize) -> Self {
        let n_samples = params.decoder.emb_out.d_out;
        DccModel {
            params,
            solver: CorrelationSolver::new(cca_dim, cfg.correlation_r(), cfg.solver),
            n_view,
            n_samples,
        }
    }

    fn check_views(&self, views: &[&[f32]], dims: &[usize]) -> SdccResult<()> {
        if views.len() < self.n_view || dims.len() < self.n_view {
            return Err(SdccError::ShapeMismatch {
                what: "model view count", expected: self.n_view, found: views.len().min(dims.len()),
            });
        }
        for v in 0..self.n_view {
            if views[v].len() != dims[v] * self.n_samples {
                return Err(SdccError::ShapeMismatch {
                    what: "transposed view buffer", expected: dims[v] * self.n_samples, found: views[v].len(),
                });
            }
        }
        Ok(())
    }

    /// Forward over the first `n_view` transposed views.
    pub fn forward(&self, views: &[&[f32]], dims: &[usize]) -> SdccResult<ModelPass> {
        self.check_views(views, dims)?;
        let n = self.n_samples;
        let out_dim = self.params.encoder.out_size();

        let mut enc = Vec::with_capacity(self.n_view);
        let mut dec = Vec::with_capacity(self.n_view);
        let mut rec_loss = 0.0f32;
        for v in 0..self.n_view {
            let ep = self.params.encoder.forward(views[v], dims[v]);
            let dp = self.params.decoder.forward(&ep.out, dims[v]);
            rec_loss += reconstruction_loss(views[v], &ep, &dp);
            enc.push(ep);
            dec.push(dp);
        }

        let outs: Vec<&[f32]> = enc.iter().map(|e| e.out.as_slice()).collect();
        let correlation = self.solver.solve(&outs, &dims[..self.n_view], out_dim)?;

        let dim = correlation.dim;
        let mut fused = vec![0.0f32; dim * n];
        for v in 0..self.n_view {
            let wt = transposed(&correlation.projections[v], dims[v], dim);
            matmul_acc_f32(&wt, views[v], &mut fused, dim, dims[v], n);
        }

        Ok(ModelPass { correlation, rec_loss, fused, dim, enc, dec })
    }

    /// Parameter gradients of `corr_scale · correlation_loss + rec_scale · rec_loss`.
    pub fn backward(&self, pass: &ModelPass, views: &[&[f32]], corr_scale: f32, rec_scale: f32) -> DccParams {
        let mut grads = self.params.zeros_like();
        for v in 0..self.n_view {
            let rg = reconstruction_grads(views[v], &pass.enc[v], &pass.dec[v], rec_scale);
            let mut d_out = self.params.decoder.backward(&pass.dec[v], &rg.d_rec, &rg.d_dec_hidden, &mut grads.decoder);
            axpy_f32(corr_scale, &pass.correlation.grads[v], &mut d_out);
            self.params.encoder.backward(&pass.enc[v], &d_out, &rg.d_enc_hidden, &mut grads.encoder);
        }
        grads
    }
}

// ── Model bundle ─────────────────────────────────────────────────────

/// Serialisable snapshot of both models, the gate and the configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub config: SdccConfig,
    pub old: DccParams,
    pub new: DccParams,
    pub gate: FusionGate,
}

/// `{model_dir}/sdcc_model_{dataset}.json`
pub fn bundle_path(cfg: &SdccConfig) -> PathBuf {
    cfg.model_dir.join(format!("sdcc_model_{}.json", cfg.dataset))
}

/// Write the bundle as JSON, creating the parent directory if needed.
pub fn save_bundle(path: &Path, bundle: &ModelBundle) -> SdccResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string(bundle)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_bundle(path: &Path) -> SdccResult<ModelBundle> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
