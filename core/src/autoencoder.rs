/// Encoder / decoder networks and the crossed multi-level reconstruction loss.
///
/// Both networks are Linear → 3 residual blocks → Linear and run row-wise over
/// a transposed view [d_v, width]: each feature row is one "sample" for the
/// dense layers.
///
/// Encoder exposes h1 (after the input embedding), h2 (after block 1) and
/// h3 (after block 2). Decoder exposes g1, g2, g3 (after blocks 1..3).
/// The reconstruction pairs them crossed: (h1, g3), (h2, g2), (h3, g1).

use serde::{Deserialize, Serialize};

use crate::layers::{Linear, MlpBlock, MlpBlockCache};
use crate::tensor::{add_assign_f32, mse_f32, mse_grad_f32, SimpleRng};

// ── Encoder ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Encoder {
    pub emb_in: Linear,
    pub blocks: Vec<MlpBlock>,
    pub emb_out: Linear,
}

/// Activations of one encoder pass.
#[derive(Clone, Debug)]
pub struct EncoderPass {
    pub out: Vec<f32>,
    /// h1, h2, h3
    pub hidden: [Vec<f32>; 3],
    /// Output of block 3 (input of `emb_out`).
    top: Vec<f32>,
    caches: Vec<MlpBlockCache>,
    input: Vec<f32>,
    pub rows: usize,
}

impl Encoder {
    pub fn init(in_size: usize, hidden_size: usize, out_size: usize, rng: &mut SimpleRng) -> Self {
        let emb_in = Linear::init(in_size, hidden_size, rng);
        let blocks = (0..3).map(|_| MlpBlock::init(hidden_size, rng)).collect();
        let emb_out = Linear::init(hidden_size, out_size, rng);
        Encoder { emb_in, blocks, emb_out }
    }

    pub fn zeros_like(&self) -> Self {
        Encoder {
            emb_in: self.emb_in.zeros_like(),
            blocks: self.blocks.iter().map(|b| b.zeros_like()).collect(),
            emb_out: self.emb_out.zeros_like(),
        }
    }

    pub fn out_size(&self) -> usize {
        self.emb_out.d_out
    }

    pub fn forward(&self, x: &[f32], rows: usize) -> EncoderPass {
        let h1 = self.emb_in.forward(x, rows);
        let (h2, c1) = self.blocks[0].forward(&h1, rows);
        let (h3, c2) = self.blocks[1].forward(&h2, rows);
        let (top, c3) = self.blocks[2].forward(&h3, rows);
        let out = self.emb_out.forward(&top, rows);
        EncoderPass {
            out,
            hidden: [h1, h2, h3],
            top,
            caches: vec![c1, c2, c3],
            input: x.to_vec(),
            rows,
        }
    }

    /// Accumulate parameter grads from ∂L/∂out and optional ∂L/∂h_i.
    pub fn backward(&self, pass: &EncoderPass, d_out: &[f32], d_hidden: &[Vec<f32>; 3], grads: &mut Encoder) {
        let rows = pass.rows;
        let d_top = self.emb_out.backward(&pass.top, rows, d_out, &mut grads.emb_out);
        let mut d_h3 = self.blocks[2].backward(&pass.caches[2], &d_top, &mut grads.blocks[2]);
        add_assign_f32(&mut d_h3, &d_hidden[2]);
        let mut d_h2 = self.blocks[1].backward(&pass.caches[1], &d_h3, &mut grads.blocks[1]);
        add_assign_f32(&mut d_h2, &d_hidden[1]);
        let mut d_h1 = self.blocks[0].backward(&pass.caches[0], &d_h2, &mut grads.blocks[0]);
        add_assign_f32(&mut d_h1, &d_hidden[0]);
        // input is data; its gradient is discarded
        let _ = self.emb_in.backward(&pass.input, rows, &d_h1, &mut grads.emb_in);
    }

    pub fn buffers(&self) -> Vec<&[f32]> {
        let mut out = self.emb_in.buffers();
        for b in &self.blocks {
            out.extend(b.buffers());
        }
        out.extend(self.emb_out.buffers());
        out
    }

    pub fn buffers_mut(&mut self) -> Vec<&mut [f32]> {
        let mut out = self.emb_in.buffers_mut();
        for b in self.blocks.iter_mut() {
            out.extend(b.buffers_mut());
        }
        out.extend(self.emb_out.buffers_mut());
        out
    }
}

// ── Decoder ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decoder {
    pub emb_in: Linear,
    pub blocks: Vec<MlpBlock>,
    pub emb_out: Linear,
}

#[derive(Clone, Debug)]
pub struct DecoderPass {
    pub rec: Vec<f32>,
    /// g1, g2, g3
    pub hidden: [Vec<f32>; 3],
    caches: Vec<MlpBlockCache>,
    input: Vec<f32>,
    pub rows: usize,
}

impl Decoder {
    pub fn init(in_size: usize, hidden_size: usize, out_size: usize, rng: &mut SimpleRng) -> Self {
        let emb_in = Linear::init(in_size, hidden_size, rng);
        let blocks = (0..3).map(|_| MlpBlock::init(hidden_size, rng)).collect();
        let emb_out = Linear::init(hidden_size, out_size, rng);
        Decoder { emb_in, blocks, emb_out }
    }

    pub fn zeros_like(&self) -> Self {
        Decoder {
            emb_in: self.emb_in.zeros_like(),
            blocks: self.blocks.iter().map(|b| b.zeros_like()).collect(),
            emb_out: self.emb_out.zeros_like(),
        }
    }

    pub fn forward(&self, z: &[f32], rows: usize) -> DecoderPass {
        let embedded = self.emb_in.forward(z, rows);
        let (g1, c1) = self.blocks[0].forward(&embedded, rows);
        let (g2, c2) = self.blocks[1].forward(&g1, rows);
        let (g3, c3) = self.blocks[2].forward(&g2, rows);
        let rec = self.emb_out.forward(&g3, rows);
        DecoderPass {
            rec,
            hidden: [g1, g2, g3],
            caches: vec![c1, c2, c3],
            input: z.to_vec(),
            rows,
        }
    }

    /// Accumulate parameter grads; returns ∂L/∂z.
    pub fn backward(&self, pass: &DecoderPass, d_rec: &[f32], d_hidden: &[Vec<f32>; 3], grads: &mut Decoder) -> Vec<f32> {
        let rows = pass.rows;
        let mut d_g3 = self.emb_out.backward(&pass.hidden[2], rows, d_rec, &mut grads.emb_out);
        add_assign_f32(&mut d_g3, &d_hidden[2]);
        let mut d_g2 = self.blocks[2].backward(&pass.caches[2], &d_g3, &mut grads.blocks[2]);
        add_assign_f32(&mut d_g2, &d_hidden[1]);
        let mut d_g1 = self.blocks[1].backward(&pass.caches[1], &d_g2, &mut grads.blocks[1]);
        add_assign_f32(&mut d_g1, &d_hidden[0]);
        let d_emb = self.blocks[0].backward(&pass.caches[0], &d_g1, &mut grads.blocks[0]);
        self.emb_in.backward(&pass.input, rows, &d_emb, &mut grads.emb_in)
    }

    pub fn buffers(&self) -> Vec<&[f32]> {
        let mut out = self.emb_in.buffers();
        for b in &self.blocks {
            out.extend(b.buffers());
        }
        out.extend(self.emb_out.buffers());
        out
    }

    pub fn buffers_mut(&mut self) -> Vec<&mut [f32]> {
        let mut out = self.emb_in.buffers_mut();
        for b in self.blocks.iter_mut() {
            out.extend(b.buffers_mut());
        }
        out.extend(self.emb_out.buffers_mut());
        out
    }
}

// ── Reconstruction ───────────────────────────────────────────────────

/// MSE(x, rec) + MSE(h1, g3) + MSE(h2, g2) + MSE(h3, g1) for one view.
pub fn reconstruction_loss(x: &[f32], enc: &EncoderPass, dec: &DecoderPass) -> f32 {
    mse_f32(x, &dec.rec)
        + mse_f32(&enc.hidden[0], &dec.hidden[2])
        + mse_f32(&enc.hidden[1], &dec.hidden[1])
        + mse_f32(&enc.hidden[2], &dec.hidden[0])
}

/// Gradients of `scale · reconstruction_loss` with respect to both networks'
/// activations.
#[derive(Clone, Debug)]
pub struct ReconstructionGrads {
    pub d_rec: Vec<f32>,
    /// ∂/∂(h1, h2, h3)
    pub d_enc_hidden: [Vec<f32>; 3],
    /// ∂/∂(g1, g2, g3)
    pub d_dec_hidden: [Vec<f32>; 3],
}

pub fn reconstruction_grads(x: &[f32], enc: &EncoderPass, dec: &DecoderPass, scale: f32) -> ReconstructionGrads {
    let scaled = |mut g: Vec<f32>| {
        for v in g.iter_mut() {
            *v *= scale;
        }
        g
    };
    let d_rec = scaled(mse_grad_f32(&dec.rec, x));
    // (enc level i) pairs with (dec level 2 - i)
    let d_enc_hidden = [
        scaled(mse_grad_f32(&enc.hidden[0], &dec.hidden[2])),
        scaled(mse_grad_f32(&enc.hidden[1], &dec.hidden[1])),
        scaled(mse_grad_f32(&enc.hidden[2], &dec.hidden[0])),
    ];
    let d_dec_hidden = [
        scaled(mse_grad_f32(&dec.hidden[0], &enc.hidden[2])),
        scaled(mse_grad_f32(&dec.hidden[1], &enc.hidden[1])),
        scaled(mse_grad_f32(&dec.hidden[2], &enc.hidden[0])),
    ];
    ReconstructionGrads { d_rec, d_enc_hidden, d_dec_hidden }
}
