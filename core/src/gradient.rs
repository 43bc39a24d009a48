/// Gradient orchestration and verification for a DCC model.
///
/// Provides:
/// - `compute_gradients`: loss and parameter gradients for a weighted
///   correlation + reconstruction objective
/// - `fd_single`: central finite differences for one weight element
/// - `check_weight_gradient`: sampled analytical-vs-numerical comparison

use crate::model::{DccModel, DccParams};

/// Weighted objective `corr_scale · correlation + rec_scale · reconstruction`
/// and its parameter gradients.
#[allow(dead_code)]
pub fn compute_gradients(
    model: &DccModel,
    views: &[&[f32]],
    dims: &[usize],
    corr_scale: f32,
    rec_scale: f32,
) -> crate::error::SdccResult<(f32, DccParams)> {
    let pass = model.forward(views, dims)?;
    let loss = corr_scale * pass.correlation_loss() + rec_scale * pass.rec_loss;
    let grads = model.backward(&pass, views, corr_scale, rec_scale);
    Ok((loss, grads))
}

#[allow(dead_code)]
fn objective(model: &DccModel, views: &[&[f32]], dims: &[usize], corr_scale: f32, rec_scale: f32) -> f32 {
    match model.forward(views, dims) {
        Ok(pass) => corr_scale * pass.correlation_loss() + rec_scale * pass.rec_loss,
        Err(_) => f32::NAN,
    }
}

/// Central difference (f(x+eps) − f(x−eps)) / 2eps for one weight element.
#[allow(dead_code)]
pub fn fd_single(
    model: &DccModel,
    views: &[&[f32]],
    dims: &[usize],
    scales: (f32, f32),
    get_weight: impl Fn(&DccParams) -> &Vec<f32>,
    set_weight: impl Fn(&mut DccParams, usize, f32),
    idx: usize,
    eps: f32,
) -> f32 {
    let orig = get_weight(&model.params)[idx];

    let mut m_plus = model.clone();
    set_weight(&mut m_plus.params, idx, orig + eps);
    let loss_plus = objective(&m_plus, views, dims, scales.0, scales.1);

    let mut m_minus = model.clone();
    set_weight(&mut m_minus.params, idx, orig - eps);
    let loss_minus = objective(&m_minus, views, dims, scales.0, scales.1);

    (loss_plus - loss_minus) / (2.0 * eps)
}

/// Check gradient for a specific weight buffer.
/// Returns (num_checked, num_passed, max_relative_error).
///
/// Relative error uses denominator max(|a|, |b|); entries where both are
/// below `abs_threshold` pass automatically (below FD resolution).
#[allow(dead_code)]
pub fn check_weight_gradient(
    model: &DccModel,
    views: &[&[f32]],
    dims: &[usize],
    scales: (f32, f32),
    grads: &DccParams,
    name: &str,
    get_weight: impl Fn(&DccParams) -> &Vec<f32>,
    set_weight: impl Fn(&mut DccParams, usize, f32),
    num_samples: usize,
    eps: f32,
    tol: f32,
) -> (usize, usize, f32) {
    let grad_vec = get_weight(grads);
    let n = grad_vec.len();
    let abs_threshold = 5e-4;

    let step = if n > num_samples { n / num_samples } else { 1 };
    let mut checked = 0;
    let mut passed = 0;
    let mut max_rel_err = 0.0f32;

    for idx in (0..n).step_by(step).take(num_samples) {
        let analytical = grad_vec[idx];
        let numerical = fd_single(model, views, dims, scales, &get_weight, &set_weight, idx, eps);

        let abs_diff = (analytical - numerical).abs();
        let denom = analytical.abs().max(numerical.abs());
        checked += 1;

        if denom < abs_threshold {
            passed += 1;
            continue;
        }

        let rel_err = abs_diff / denom;
        if rel_err > max_rel_err {
            max_rel_err = rel_err;
        }
        if rel_err < tol {
            passed += 1;
        } else {
            eprintln!(
                "  FAIL {name}[{idx}]: analytical={analytical:.6e}, numerical={numerical:.6e}, \
                 rel_err={rel_err:.4e}"
            );
        }
    }

    (checked, passed, max_rel_err)
}
