/// Generalised multi-view canonical correlation.
///
/// Given per-view representations H_v [d_v, m] (rows are features, columns are
/// the m shared coordinates), the solver returns:
///   - a scalar loss (negated correlation, to be minimised),
///   - per-view projection matrices W_v [d_v, dim] (whitening × canonical directions),
///   - ∂loss/∂H_v [d_v, m] for the hand-written backward pass.
///
/// Projections are recomputed every forward pass and are constants for
/// backward. Two strategies:
///   - closed form (exactly two views): eigen-whitening + SVD, DCCA gradient.
///   - power iteration (any view count): block-whitened cross-covariance,
///     deflation, a fixed number of Gauss–Seidel sweeps.
///
/// All numerics run in f64 through nalgebra; inputs and outputs are f32.

use nalgebra::{DMatrix, DVector, SymmetricEigen, SVD};
use serde::{Deserialize, Serialize};

use crate::error::{SdccError, SdccResult};

/// Eigenvalues and singular values at or below this are treated as zero.
pub const EIGEN_EPSILON: f64 = 1e-9;

/// Power-iteration sweeps per component. There is no convergence check.
pub const POWER_SWEEPS: usize = 15;

/// Component whose bilinear correlation becomes the iterative loss.
/// Falls back to component 0 when only one component is solved.
pub const LOSS_COMPONENT: usize = 1;

/// Which solver path to take.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationStrategy {
    /// Closed form for exactly two views, power iteration otherwise.
    #[default]
    Auto,
    ClosedForm,
    Iterative,
}

impl CorrelationStrategy {
    /// Concrete strategy for a given view count.
    pub fn resolve(self, n_views: usize) -> CorrelationStrategy {
        match self {
            CorrelationStrategy::Auto if n_views == 2 => CorrelationStrategy::ClosedForm,
            CorrelationStrategy::Auto => CorrelationStrategy::Iterative,
            other => other,
        }
    }
}

/// Solver result for one forward pass.
#[derive(Clone, Debug)]
pub struct CorrelationOutput {
    /// Negated correlation.
    pub loss: f32,
    /// Per-view projections, row-major [d_v, dim].
    pub projections: Vec<Vec<f32>>,
    /// Per-view ∂loss/∂H_v, row-major [d_v, m].
    pub grads: Vec<Vec<f32>>,
    pub dim: usize,
}

/// Solver hyperparameters, owned by each model instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSolver {
    pub dim: usize,
    pub r: f32,
    pub strategy: CorrelationStrategy,
}

impl CorrelationSolver {
    pub fn new(dim: usize, r: f32, strategy: CorrelationStrategy) -> Self {
        CorrelationSolver { dim, r, strategy }
    }

    /// Solve over `views` (each [dims[v], m]).
    pub fn solve(&self, views: &[&[f32]], dims: &[usize], m: usize) -> SdccResult<CorrelationOutput> {
        if views.is_empty() {
            return Err(SdccError::EmptyInput("correlation solver"));
        }
        if dims.len() != views.len() {
            return Err(SdccError::ShapeMismatch {
                what: "correlation view dims", expected: views.len(), found: dims.len(),
            });
        }
        for (h, &d) in views.iter().zip(dims) {
            if h.len() != d * m {
                return Err(SdccError::ShapeMismatch {
                    what: "correlation view buffer", expected: d * m, found: h.len(),
                });
            }
        }
        let narrowest = dims.iter().copied().min().unwrap_or(0);
        if self.dim == 0 || self.dim > narrowest {
            return Err(SdccError::ShapeMismatch {
                what: "correlation subspace dim", expected: narrowest, found: self.dim,
            });
        }

        if views.iter().any(|h| h.iter().any(|v| !v.is_finite())) {
            log::warn!("non-finite input to correlation solver; skipping decomposition");
            return Ok(CorrelationOutput {
                loss: f32::NAN,
                projections: dims.iter().map(|&d| vec![0.0; d * self.dim]).collect(),
                grads: dims.iter().map(|&d| vec![0.0; d * m]).collect(),
                dim: self.dim,
            });
        }

        match self.strategy.resolve(views.len()) {
            CorrelationStrategy::ClosedForm => {
                if views.len() != 2 {
                    return Err(SdccError::InvalidConfig(format!(
                        "closed-form correlation needs exactly 2 views, got {}", views.len()
                    )));
                }
                closed_form(views[0], dims[0], views[1], dims[1], m, self.dim, self.r)
            }
            _ => Ok(power_iteration(views, dims, m, self.dim, self.r)),
        }
    }
}

// ── nalgebra bridging ────────────────────────────────────────────────

fn to_matrix(h: &[f32], rows: usize, cols: usize) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |i, j| h[i * cols + j] as f64)
}

fn to_row_major(mat: &DMatrix<f64>) -> Vec<f32> {
    let (rows, cols) = mat.shape();
    let mut out = Vec::with_capacity(rows * cols);
    for i in 0..rows {
        for j in 0..cols {
            out.push(mat[(i, j)] as f32);
        }
    }
    out
}

/// Inverse square root of a symmetric PSD matrix, dropping eigenpairs with
/// eigenvalue ≤ [`EIGEN_EPSILON`].
fn inverse_sqrt(s: &DMatrix<f64>) -> DMatrix<f64> {
    let n = s.nrows();
    let eig = SymmetricEigen::new(s.clone());
    let mut out = DMatrix::zeros(n, n);
    for (idx, &lambda) in eig.eigenvalues.iter().enumerate() {
        if lambda > EIGEN_EPSILON {
            let v = eig.eigenvectors.column(idx).into_owned();
            out += (&v * v.transpose()) * lambda.powf(-0.5);
        }
    }
    out
}

/// H Hᵗ + r I
fn regularized_gram(h: &DMatrix<f64>, r: f64) -> DMatrix<f64> {
    let d = h.nrows();
    h * h.transpose() + DMatrix::identity(d, d) * r
}

// ── Two-view closed form ─────────────────────────────────────────────

/// Closed-form two-view correlation over H1 [d1, m], H2 [d2, m].
///
/// T = Σ11^(-1/2) Σ12 Σ22^(-1/2); corr = sum of the top `dim` singular values
/// of T (each floored at [`EIGEN_EPSILON`]). Gradient (loss = −corr):
///   ∂corr/∂H1 = 2Δ11 H1 + Δ12 H2,   ∂corr/∂H2 = 2Δ22 H2 + Δ12ᵗ H1
///   Δ12 = Σ11^(-1/2) U_k V_kᵗ Σ22^(-1/2)
///   Δ11 = -½ Σ11^(-1/2) U_k D_k U_kᵗ Σ11^(-1/2)   (Δ22 likewise with V_k)
pub fn closed_form(
    h1: &[f32], d1: usize,
    h2: &[f32], d2: usize,
    m: usize, dim: usize, r: f32,
) -> SdccResult<CorrelationOutput> {
    let h1m = to_matrix(h1, d1, m);
    let h2m = to_matrix(h2, d2, m);
    let r = r as f64;

    let s12 = &h1m * h2m.transpose();
    let s11 = regularized_gram(&h1m, r);
    let s22 = regularized_gram(&h2m, r);
    let r11 = inverse_sqrt(&s11);
    let r22 = inverse_sqrt(&s22);

    let t = &r11 * &s12 * &r22;
    let svd = SVD::new(t, true, true);
    let u = svd.u.ok_or(SdccError::EmptyInput("closed-form svd (u)"))?;
    let v_t = svd.v_t.ok_or(SdccError::EmptyInput("closed-form svd (v)"))?;
    let sv = svd.singular_values;
    if dim > sv.len() {
        return Err(SdccError::ShapeMismatch {
            what: "closed-form singular values", expected: dim, found: sv.len(),
        });
    }

    // Descending order; nalgebra does not promise one.
    let mut order: Vec<usize> = (0..sv.len()).collect();
    order.sort_by(|&a, &b| sv[b].total_cmp(&sv[a]));
    let top = &order[..dim];

    let mut u_k = DMatrix::zeros(d1, dim);
    let mut v_k = DMatrix::zeros(d2, dim);
    let mut d_k = DMatrix::zeros(dim, dim);
    let mut corr = 0.0f64;
    for (c, &idx) in top.iter().enumerate() {
        u_k.set_column(c, &u.column(idx));
        v_k.set_column(c, &v_t.row(idx).transpose());
        let s = sv[idx].max(EIGEN_EPSILON);
        d_k[(c, c)] = s;
        corr += s;
    }

    let w1 = &r11 * &u_k;
    let w2 = &r22 * &v_k;

    let delta12 = &w1 * w2.transpose();
    let delta11 = (&w1 * &d_k * w1.transpose()) * -0.5;
    let delta22 = (&w2 * &d_k * w2.transpose()) * -0.5;
    let g1 = (&delta11 * &h1m) * 2.0 + &delta12 * &h2m;
    let g2 = (&delta22 * &h2m) * 2.0 + delta12.transpose() * &h1m;

    Ok(CorrelationOutput {
        loss: -corr as f32,
        projections: vec![to_row_major(&w1), to_row_major(&w2)],
        grads: vec![to_row_major(&(-g1)), to_row_major(&(-g2))],
        dim,
    })
}

// ── Multi-view power iteration ───────────────────────────────────────

fn offsets(dims: &[usize]) -> Vec<usize> {
    let mut acc = 0;
    dims.iter().map(|&d| { let s = acc; acc += d; s }).collect()
}

/// Iterative multi-view correlation over any number of views.
///
/// A is the block matrix of R_i (H_i H_jᵗ) R_j with R_i = (H_i H_iᵗ + rI)^(-1/2).
/// Component vectors start as normalised all-ones. Component k deflates with
/// S = A − W Wᵗ A (W = previous components, stacked per view) and then runs
/// [`POWER_SWEEPS`] sweeps; within a sweep view i's vector becomes the
/// normalised Σ_j S_ij v_j, reading views already updated in the same sweep.
/// A zero-norm update leaves the vector as it was.
pub fn power_iteration(
    views: &[&[f32]],
    dims: &[usize],
    m: usize,
    dim: usize,
    r: f32,
) -> CorrelationOutput {
    let v = views.len();
    let r = r as f64;
    let xs: Vec<DMatrix<f64>> = views.iter().zip(dims).map(|(h, &d)| to_matrix(h, d, m)).collect();
    let roots: Vec<DMatrix<f64>> = xs.iter().map(|x| inverse_sqrt(&regularized_gram(x, r))).collect();
    let starts = offsets(dims);
    let d_sum: usize = dims.iter().sum();

    let mut a = DMatrix::zeros(d_sum, d_sum);
    for i in 0..v {
        for j in 0..v {
            let block = &roots[i] * (&xs[i] * xs[j].transpose()) * &roots[j];
            a.view_mut((starts[i], starts[j]), (dims[i], dims[j])).copy_from(&block);
        }
    }

    let mut comps: Vec<DMatrix<f64>> = dims.iter()
        .map(|&d| DMatrix::from_element(d, dim, 1.0 / (d as f64).sqrt()))
        .collect();

    for k in 0..dim {
        let s = if k == 0 {
            a.clone()
        } else {
            let mut w = DMatrix::zeros(d_sum, v * k);
            for i in 0..v {
                for j in 0..k {
                    w.view_mut((starts[i], i * k + j), (dims[i], 1))
                        .copy_from(&comps[i].column(j));
                }
            }
            &a - &w * (w.transpose() * &a)
        };

        for _ in 0..POWER_SWEEPS {
            for i in 0..v {
                let mut y = DVector::zeros(dims[i]);
                for j in 0..v {
                    y += s.view((starts[i], starts[j]), (dims[i], dims[j])) * comps[j].column(k);
                }
                let lam = y.norm();
                if lam != 0.0 {
                    comps[i].set_column(k, &(y / lam));
                }
            }
        }
    }

    let projections: Vec<Vec<f32>> = roots.iter().zip(&comps)
        .map(|(root, comp)| to_row_major(&(root * comp)))
        .collect();
    let component = if dim > LOSS_COMPONENT { LOSS_COMPONENT } else { 0 };
    let (corr, grads) = bilinear_correlation(views, dims, m, &projections, dim, component);

    CorrelationOutput { loss: -corr.abs(), projections, grads, dim }
}

/// corr = Σ_ij W_i[:,c]ᵗ H_i H_jᵗ W_j[:,c] with the projections held constant.
///
/// Writing P = Σ_j H_jᵗ W_j[:,c] gives corr = P·P, so the returned gradient of
/// −|corr| with respect to H_i is −sign(corr) · 2 W_i[:,c] Pᵗ.
pub fn bilinear_correlation(
    views: &[&[f32]],
    dims: &[usize],
    m: usize,
    projections: &[Vec<f32>],
    dim: usize,
    component: usize,
) -> (f32, Vec<Vec<f32>>) {
    let columns: Vec<Vec<f32>> = projections.iter().zip(dims)
        .map(|(w, &d)| (0..d).map(|p| w[p * dim + component]).collect())
        .collect();

    let mut p_vec = vec![0.0f64; m];
    for ((h, &d), a) in views.iter().zip(dims).zip(&columns) {
        for row in 0..d {
            let coef = a[row] as f64;
            if coef == 0.0 {
                continue;
            }
            for q in 0..m {
                p_vec[q] += coef * h[row * m + q] as f64;
            }
        }
    }
    let corr: f64 = p_vec.iter().map(|x| x * x).sum();

    let sign = if corr > 0.0 { 1.0 } else if corr < 0.0 { -1.0 } else { 0.0 };
    let grads = dims.iter().zip(&columns)
        .map(|(&d, a)| {
            let mut g = vec![0.0f32; d * m];
            for row in 0..d {
                for q in 0..m {
                    g[row * m + q] = (-sign * 2.0 * a[row] as f64 * p_vec[q]) as f32;
                }
            }
            g
        })
        .collect();

    (corr as f32, grads)
}

/// Per-component canonical correlations W1[:,k]ᵗ (H1 H2ᵗ) W2[:,k] for two views.
pub fn canonical_correlations(
    h1: &[f32], d1: usize,
    h2: &[f32], d2: usize,
    m: usize,
    w1: &[f32], w2: &[f32], dim: usize,
) -> Vec<f32> {
    let s12 = to_matrix(h1, d1, m) * to_matrix(h2, d2, m).transpose();
    let w1m = to_matrix(w1, d1, dim);
    let w2m = to_matrix(w2, d2, dim);
    let rho = w1m.transpose() * s12 * w2m;
    (0..dim).map(|k| rho[(k, k)] as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::SimpleRng;

    fn random_views(dims: &[usize], m: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = SimpleRng::new(seed);
        dims.iter().map(|&d| (0..d * m).map(|_| rng.normal()).collect()).collect()
    }

    #[test]
    fn test_strategy_resolution() {
        assert_eq!(CorrelationStrategy::Auto.resolve(2), CorrelationStrategy::ClosedForm);
        assert_eq!(CorrelationStrategy::Auto.resolve(1), CorrelationStrategy::Iterative);
        assert_eq!(CorrelationStrategy::Auto.resolve(5), CorrelationStrategy::Iterative);
        assert_eq!(CorrelationStrategy::Iterative.resolve(2), CorrelationStrategy::Iterative);
    }

    #[test]
    fn test_inverse_sqrt_of_diagonal() {
        let s = DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 9.0, 0.0]));
        let r = inverse_sqrt(&s);
        assert!((r[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((r[(1, 1)] - 1.0 / 3.0).abs() < 1e-12);
        // zero eigenvalue discarded rather than inverted
        assert_eq!(r[(2, 2)], 0.0);
    }

    #[test]
    fn test_closed_form_whitening() {
        let (d1, d2, m) = (4, 3, 40);
        let hs = random_views(&[d1, d2], m, 5);
        let r = 1e-2f32;
        let out = closed_form(&hs[0], d1, &hs[1], d2, m, 2, r).unwrap();
        for (v, &d) in [d1, d2].iter().enumerate() {
            let h = to_matrix(&hs[v], d, m);
            let sigma = regularized_gram(&h, r as f64);
            let w = to_matrix(&out.projections[v], d, 2);
            let ident = w.transpose() * sigma * w;
            for i in 0..2 {
                for j in 0..2 {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert!((ident[(i, j)] - expected).abs() < 1e-3,
                        "view {v}: WᵗΣW[{i},{j}] = {}", ident[(i, j)]);
                }
            }
        }
        assert!(out.loss < 0.0);
    }

    #[test]
    fn test_closed_form_singular_values_bounded() {
        let hs = random_views(&[3, 3], 25, 8);
        let out = closed_form(&hs[0], 3, &hs[1], 3, 25, 3, 1e-3).unwrap();
        // each canonical correlation is ≤ 1
        assert!(-out.loss <= 3.0 + 1e-4);
        let rho = canonical_correlations(&hs[0], 3, &hs[1], 3, 25,
            &out.projections[0], &out.projections[1], 3);
        let total: f32 = rho.iter().sum();
        assert!((total + out.loss).abs() < 1e-3, "rho={rho:?} loss={}", out.loss);
    }

    #[test]
    fn test_closed_form_gradient_finite_differences() {
        let (d1, d2, m, dim, r) = (3, 3, 12, 2, 0.1f32);
        let hs = random_views(&[d1, d2], m, 21);
        let out = closed_form(&hs[0], d1, &hs[1], d2, m, dim, r).unwrap();
        let eps = 1e-3f32;
        for v in 0..2 {
            for idx in (0..hs[v].len()).step_by(5) {
                let mut plus = hs.clone();
                plus[v][idx] += eps;
                let mut minus = hs.clone();
                minus[v][idx] -= eps;
                let lp = closed_form(&plus[0], d1, &plus[1], d2, m, dim, r).unwrap().loss;
                let lm = closed_form(&minus[0], d1, &minus[1], d2, m, dim, r).unwrap().loss;
                let numerical = (lp - lm) / (2.0 * eps);
                let analytical = out.grads[v][idx];
                assert!((analytical - numerical).abs() < 5e-3 + 5e-2 * numerical.abs(),
                    "view {v} idx {idx}: analytical={analytical}, numerical={numerical}");
            }
        }
    }

    #[test]
    fn test_bilinear_gradient_finite_differences() {
        let dims = [3, 2, 4];
        let m = 5;
        let hs = random_views(&dims, m, 3);
        let ws = random_views(&dims, 2, 4);
        let views: Vec<&[f32]> = hs.iter().map(|h| h.as_slice()).collect();
        let (_corr, grads) = bilinear_correlation(&views, &dims, m, &ws, 2, 1);
        let eps = 1e-2f32;
        for v in 0..dims.len() {
            for idx in 0..hs[v].len() {
                let eval = |delta: f32| {
                    let mut hh = hs.clone();
                    hh[v][idx] += delta;
                    let vv: Vec<&[f32]> = hh.iter().map(|h| h.as_slice()).collect();
                    -bilinear_correlation(&vv, &dims, m, &ws, 2, 1).0.abs()
                };
                let numerical = (eval(eps) - eval(-eps)) / (2.0 * eps);
                let analytical = grads[v][idx];
                assert!((analytical - numerical).abs() < 1e-2 + 1e-2 * numerical.abs(),
                    "view {v} idx {idx}: analytical={analytical}, numerical={numerical}");
            }
        }
    }

    #[test]
    fn test_power_iteration_zero_input_stays_finite() {
        let dims = [2, 3];
        let m = 4;
        let zeros: Vec<Vec<f32>> = dims.iter().map(|&d| vec![0.0; d * m]).collect();
        let views: Vec<&[f32]> = zeros.iter().map(|h| h.as_slice()).collect();
        let out = power_iteration(&views, &dims, m, 2, 1e-2);
        assert_eq!(out.loss, 0.0);
        for w in &out.projections {
            assert!(w.iter().all(|x| x.is_finite()));
        }
        for g in &out.grads {
            assert!(g.iter().all(|&x| x == 0.0));
        }
    }

    #[test]
    fn test_power_iteration_single_view() {
        let hs = random_views(&[4], 10, 77);
        let views: Vec<&[f32]> = hs.iter().map(|h| h.as_slice()).collect();
        let out = power_iteration(&views, &[4], 10, 2, 1e-2);
        assert!(out.loss.is_finite());
        assert!(out.loss <= 0.0);
        assert_eq!(out.projections[0].len(), 4 * 2);
    }

    #[test]
    fn test_solver_rejects_oversized_dim() {
        let hs = random_views(&[2, 3], 6, 1);
        let views: Vec<&[f32]> = hs.iter().map(|h| h.as_slice()).collect();
        let solver = CorrelationSolver::new(3, 1e-2, CorrelationStrategy::Auto);
        let err = solver.solve(&views, &[2, 3], 6).unwrap_err();
        assert!(matches!(err, SdccError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_solver_non_finite_input_yields_nan_loss() {
        let mut hs = random_views(&[2, 2], 5, 6);
        hs[1][3] = f32::NAN;
        let views: Vec<&[f32]> = hs.iter().map(|h| h.as_slice()).collect();
        let out = CorrelationSolver::new(1, 1e-2, CorrelationStrategy::Auto).solve(&views, &[2, 2], 5).unwrap();
        assert!(out.loss.is_nan());
        assert!(out.grads.iter().flatten().all(|&g| g == 0.0));
    }

    #[test]
    fn test_solver_closed_form_needs_two_views() {
        let hs = random_views(&[2, 2, 2], 6, 1);
        let views: Vec<&[f32]> = hs.iter().map(|h| h.as_slice()).collect();
        let solver = CorrelationSolver::new(1, 1e-2, CorrelationStrategy::ClosedForm);
        assert!(matches!(solver.solve(&views, &[2, 2, 2], 6), Err(SdccError::InvalidConfig(_))));
    }
}
