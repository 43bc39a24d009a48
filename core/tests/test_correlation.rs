/// Correlation solver integration tests.
///
/// Cross-checks the two solver paths on data with planted shared latents,
/// and exercises the dispatch through `CorrelationSolver`.

use sdcc_core::correlation::{
    canonical_correlations, closed_form, power_iteration, CorrelationSolver, CorrelationStrategy,
};
use sdcc_core::tensor::SimpleRng;

/// Views [d_v, m]: row r < `noise.len()` of every view carries shared
/// latent r plus `noise[r]`-scaled noise; the remaining rows are independent
/// noise.
fn planted_views(dims: &[usize], m: usize, noise: &[f32], seed: u64) -> Vec<Vec<f32>> {
    let mut rng = SimpleRng::new(seed);
    let latents: Vec<Vec<f32>> = noise.iter().map(|_| (0..m).map(|_| rng.normal()).collect()).collect();
    dims.iter()
        .map(|&d| {
            let mut h = Vec::with_capacity(d * m);
            for row in 0..d {
                for q in 0..m {
                    let eps = rng.normal();
                    h.push(match noise.get(row) {
                        Some(&scale) => latents[row][q] + scale * eps,
                        None => eps,
                    });
                }
            }
            h
        })
        .collect()
}

fn shared_latent_views(dims: &[usize], m: usize, seed: u64) -> Vec<Vec<f32>> {
    planted_views(dims, m, &[0.05], seed)
}

// ── Closed form vs power iteration ──────────────────────────────────

#[test]
fn test_iterative_matches_closed_form_top_component() {
    let (d1, d2, m) = (4, 3, 200);
    let hs = shared_latent_views(&[d1, d2], m, 11);
    let r = 1e-6;

    let exact = closed_form(&hs[0], d1, &hs[1], d2, m, 1, r).unwrap();
    let sigma1 = -exact.loss;
    assert!(sigma1 > 0.9 && sigma1 <= 1.0 + 1e-3, "top canonical correlation {sigma1}");

    // One component: the loss is the bilinear form over the whitened block
    // matrix, whose diagonal blocks are ≈ I. With unit directions that is
    // 1 + 1 + 2σ₁.
    let iter = power_iteration(&[&hs[0], &hs[1]], &[d1, d2], m, 1, r);
    let corr = -iter.loss;
    let recovered = (corr - 2.0) / 2.0;
    assert!((recovered - sigma1).abs() < 1e-2, "iterative {recovered} vs closed form {sigma1}");
}

#[test]
fn test_iterative_matches_closed_form_second_component() {
    // Two latents: a tight one (σ₁ ≈ 1) and a noisy one (σ₂ well below 1).
    let (d1, d2, m) = (4, 3, 200);
    let hs = planted_views(&[d1, d2], m, &[0.05, 0.6], 21);
    let r = 1e-6;

    let sigma1 = -closed_form(&hs[0], d1, &hs[1], d2, m, 1, r).unwrap().loss;
    let sigma2 = -closed_form(&hs[0], d1, &hs[1], d2, m, 2, r).unwrap().loss - sigma1;
    assert!(sigma1 > 0.9, "σ₁ = {sigma1}");
    assert!(sigma2 > 0.3 && sigma2 < sigma1 - 0.05, "σ₂ = {sigma2}, σ₁ = {sigma1}");

    // With two components the loss comes from the deflated second direction.
    let iter = power_iteration(&[&hs[0], &hs[1]], &[d1, d2], m, 2, r);
    let recovered = (-iter.loss - 2.0) / 2.0;
    assert!((recovered - sigma2).abs() < 2e-2, "iterative {recovered} vs closed form σ₂ {sigma2}");
}

#[test]
fn test_iterative_directions_align_with_closed_form() {
    let (d1, d2, m) = (4, 3, 200);
    let hs = shared_latent_views(&[d1, d2], m, 12);
    let r = 1e-6;
    let exact = closed_form(&hs[0], d1, &hs[1], d2, m, 1, r).unwrap();
    let iter = power_iteration(&[&hs[0], &hs[1]], &[d1, d2], m, 1, r);

    let rho_exact = canonical_correlations(&hs[0], d1, &hs[1], d2, m, &exact.projections[0], &exact.projections[1], 1);
    let rho_iter = canonical_correlations(&hs[0], d1, &hs[1], d2, m, &iter.projections[0], &iter.projections[1], 1);
    assert!((rho_exact[0] - rho_iter[0]).abs() < 1e-2, "{rho_exact:?} vs {rho_iter:?}");
}

// ── Dispatch ────────────────────────────────────────────────────────

#[test]
fn test_auto_dispatch_many_views() {
    let dims = [4, 3, 5];
    let m = 60;
    let hs = shared_latent_views(&dims, m, 3);
    let refs: Vec<&[f32]> = hs.iter().map(|h| h.as_slice()).collect();
    let solver = CorrelationSolver::new(2, 1e-3, CorrelationStrategy::Auto);
    let out = solver.solve(&refs, &dims, m).unwrap();

    assert!(out.loss.is_finite() && out.loss <= 0.0);
    assert_eq!(out.projections.len(), 3);
    for (v, &d) in dims.iter().enumerate() {
        assert_eq!(out.projections[v].len(), d * 2);
        assert_eq!(out.grads[v].len(), d * m);
        assert!(out.grads[v].iter().all(|g| g.is_finite()));
    }
}

#[test]
fn test_forced_closed_form_rejects_three_views() {
    let dims = [3, 3, 3];
    let m = 20;
    let hs = shared_latent_views(&dims, m, 4);
    let refs: Vec<&[f32]> = hs.iter().map(|h| h.as_slice()).collect();
    let solver = CorrelationSolver::new(1, 1e-3, CorrelationStrategy::ClosedForm);
    assert!(solver.solve(&refs, &dims, m).is_err());
}

#[test]
fn test_forced_iterative_on_two_views() {
    let dims = [3, 3];
    let m = 50;
    let hs = shared_latent_views(&dims, m, 5);
    let refs: Vec<&[f32]> = hs.iter().map(|h| h.as_slice()).collect();
    let auto = CorrelationSolver::new(1, 1e-4, CorrelationStrategy::Auto).solve(&refs, &dims, m).unwrap();
    let iter = CorrelationSolver::new(1, 1e-4, CorrelationStrategy::Iterative).solve(&refs, &dims, m).unwrap();
    // different objectives: σ₁ for the closed form, 2 + 2σ₁ for the bilinear form
    assert!(iter.loss < auto.loss);
}
