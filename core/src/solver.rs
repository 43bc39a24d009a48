/// Training orchestrator: the epoch loop over the old/new model pair.
///
/// Per epoch, in order:
///   Forward:    both models on the transposed views; gate-mix fused
///                features, correlation losses and reconstruction losses.
///   Cluster:    k-means on fusedᵗ; total = λ·corr + λ2·rec + separability;
///                backward and one Adam step over old, new and gate params.
///   Score:      NMI / purity / accuracy against ground truth.
///   UpdateBest: strictly greater NMI replaces the best snapshot.
///
/// Everything in one epoch comes from the same forward pass. A non-finite
/// total loss aborts the run before the step is applied.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::adam::{Adam, AdamConfig};
use crate::config::SdccConfig;
use crate::dataset::{DatasetCatalog, MultiViewDataset};
use crate::error::{SdccError, SdccResult};
use crate::gate::FusionGate;
use crate::kmeans::KMeans;
use crate::metrics::{cluster_eval, ClusterScores};
use crate::model::{bundle_path, load_bundle, save_bundle, DccModel, ModelBundle, ModelPass};
use crate::separability::ClusterSeparability;
use crate::tensor::{frobenius_dot_f32, transposed};
use crate::tracker::ExperimentTracker;

/// Where the orchestrator is in its state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Initialized,
    Forward,
    Cluster,
    Score,
    UpdateBest,
    Done,
}

/// Best-so-far snapshot, selected by NMI.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BestScores {
    pub nmi: f64,
    pub accuracy: f64,
    pub purity: f64,
    /// 1-indexed; equals the configured epoch count until an epoch improves.
    pub epoch: usize,
}

impl BestScores {
    pub fn initial(ep_num: usize) -> Self {
        BestScores { nmi: 0.0, accuracy: 0.0, purity: 0.0, epoch: ep_num }
    }

    /// Replace the snapshot when `scores.nmi` is strictly greater.
    pub fn update(&mut self, epoch: usize, scores: &ClusterScores) -> bool {
        if scores.nmi > self.nmi {
            *self = BestScores {
                nmi: scores.nmi,
                accuracy: scores.accuracy,
                purity: scores.purity,
                epoch,
            };
            true
        } else {
            false
        }
    }
}

/// A fit that stopped early, with the best snapshot reached before it did.
#[derive(Debug, thiserror::Error)]
#[error("fit aborted during {stage:?}: {source}")]
pub struct FitError {
    pub partial: BestScores,
    pub stage: Stage,
    #[source]
    pub source: SdccError,
}

/// Result of one training epoch.
#[derive(Clone, Debug)]
pub struct EpochReport {
    pub epoch: usize,
    pub loss: f32,
    pub scores: ClusterScores,
    pub labels: Vec<usize>,
}

pub struct Solver {
    cfg: SdccConfig,
    old: DccModel,
    new: DccModel,
    gate: FusionGate,
    optimizer: Adam,
    separability: ClusterSeparability,
    views: Vec<Vec<f32>>,
    dims: Vec<usize>,
    labels: Vec<usize>,
    n_class: usize,
    n_samples: usize,
    stage: Stage,
    best: BestScores,
}

impl Solver {
    /// Fresh models: the old one over the first V-1 views (seed), the new one
    /// over all V views (seed + 1).
    pub fn new(cfg: SdccConfig, data: &MultiViewDataset) -> SdccResult<Self> {
        cfg.validate()?;
        Self::check_dataset(&cfg, data)?;
        let n = data.n_samples();
        let cca_dim = cfg.cca_dim(data.dims());
        let old = DccModel::new(&cfg, n, cfg.n_view - 1, cca_dim, cfg.seed);
        let new = DccModel::new(&cfg, n, cfg.n_view, cca_dim, cfg.seed.wrapping_add(1));
        Ok(Self::assemble(cfg, data, old, new, FusionGate::new(2)))
    }

    /// Models rebuilt from a saved bundle. `cfg` governs everything except the
    /// parameters themselves.
    pub fn from_bundle(cfg: SdccConfig, bundle: ModelBundle, data: &MultiViewDataset) -> SdccResult<Self> {
        cfg.validate()?;
        Self::check_dataset(&cfg, data)?;
        let n = data.n_samples();
        for params in [&bundle.old, &bundle.new] {
            let width = params.encoder.emb_in.d_in;
            if width != n {
                return Err(SdccError::ShapeMismatch { what: "bundle sample width", expected: n, found: width });
            }
        }
        if bundle.gate.n_streams() != 2 {
            return Err(SdccError::ShapeMismatch { what: "bundle gate streams", expected: 2, found: bundle.gate.n_streams() });
        }
        let cca_dim = cfg.cca_dim(data.dims());
        let old = DccModel::from_params(&cfg, bundle.old, cfg.n_view - 1, cca_dim);
        let new = DccModel::from_params(&cfg, bundle.new, cfg.n_view, cca_dim);
        Ok(Self::assemble(cfg, data, old, new, bundle.gate))
    }

    fn check_dataset(cfg: &SdccConfig, data: &MultiViewDataset) -> SdccResult<()> {
        if data.n_view() != cfg.n_view {
            return Err(SdccError::ShapeMismatch { what: "dataset views", expected: cfg.n_view, found: data.n_view() });
        }
        if data.n_class() > data.n_samples() {
            return Err(SdccError::InvalidConfig(format!(
                "{} classes for {} samples", data.n_class(), data.n_samples()
            )));
        }
        Ok(())
    }

    fn assemble(cfg: SdccConfig, data: &MultiViewDataset, old: DccModel, new: DccModel, gate: FusionGate) -> Self {
        let mut sizes = old.params.buffer_sizes();
        sizes.extend(new.params.buffer_sizes());
        sizes.extend(gate.buffers().iter().map(|b| b.len()));
        let optimizer = Adam::new(&sizes, AdamConfig { weight_decay: cfg.reg_par, ..AdamConfig::default() });
        log::debug!(
            "solver: {} params per model, cca dim {}, strategies old={:?} new={:?}",
            old.params.num_params(),
            old.solver.dim,
            old.solver.strategy.resolve(old.n_view),
            new.solver.strategy.resolve(new.n_view),
        );
        Solver {
            separability: ClusterSeparability::new(cfg.rel_sigma),
            best: BestScores::initial(cfg.ep_num),
            views: data.transposed_views(),
            dims: data.dims().to_vec(),
            labels: data.labels().to_vec(),
            n_class: data.n_class(),
            n_samples: data.n_samples(),
            stage: Stage::Initialized,
            cfg,
            old,
            new,
            gate,
            optimizer,
        }
    }

    pub fn config(&self) -> &SdccConfig {
        &self.cfg
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn best(&self) -> BestScores {
        self.best
    }

    pub fn gate(&self) -> &FusionGate {
        &self.gate
    }

    fn enter(&mut self, stage: Stage) {
        log::trace!("stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    pub fn bundle(&self) -> ModelBundle {
        ModelBundle {
            config: self.cfg.clone(),
            old: self.old.params.clone(),
            new: self.new.params.clone(),
            gate: self.gate.clone(),
        }
    }

    fn forward(&self) -> SdccResult<(ModelPass, ModelPass)> {
        let refs: Vec<&[f32]> = self.views.iter().map(|v| v.as_slice()).collect();
        let old = self.old.forward(&refs, &self.dims)?;
        let new = self.new.forward(&refs, &self.dims)?;
        Ok((old, new))
    }

    /// Gate-mixed fusedᵗ [N, dim] and its k-means labels.
    fn cluster(&self, old: &ModelPass, new: &ModelPass) -> SdccResult<(Vec<f32>, Vec<usize>)> {
        let fused = self.gate.combine(&[&old.fused, &new.fused]);
        let hidden = transposed(&fused, old.dim, self.n_samples);
        let km = KMeans::from_config(self.n_class, &self.cfg.clustering, self.cfg.seed);
        let labels = km.fit(&hidden, self.n_samples, old.dim)?.labels;
        Ok((hidden, labels))
    }

    /// One full epoch: forward, cluster, backward, step, score.
    pub fn train_epoch(&mut self, epoch: usize) -> SdccResult<EpochReport> {
        let (lmbda, lmbda2) = (self.cfg.lmbda, self.cfg.lmbda2);

        self.enter(Stage::Forward);
        let (old_pass, new_pass) = self.forward()?;
        let corr = [old_pass.correlation_loss(), new_pass.correlation_loss()];
        let rec = [old_pass.rec_loss, new_pass.rec_loss];
        let corr_loss = self.gate.combine_scalars(&corr);
        let rec_loss = self.gate.combine_scalars(&rec);

        self.enter(Stage::Cluster);
        let (hidden, pred) = self.cluster(&old_pass, &new_pass)?;
        let dim = old_pass.dim;
        let sep = self.separability.forward(&hidden, self.n_samples, dim, &pred, self.n_class);
        let loss = lmbda * corr_loss + lmbda2 * rec_loss + sep.loss;
        if !loss.is_finite() {
            return Err(SdccError::NonFiniteLoss { epoch });
        }

        // fused = Σ pᵢ Fᵢ carries no parameter gradient; only the gate sees it.
        let d_hidden = sep.backward(&hidden, dim);
        let d_fused = transposed(&d_hidden, self.n_samples, dim);
        let probs = self.gate.probs();
        let d_probs: Vec<f32> = [&old_pass, &new_pass].iter().enumerate()
            .map(|(i, pass)| lmbda * corr[i] + lmbda2 * rec[i] + frobenius_dot_f32(&d_fused, &pass.fused))
            .collect();
        let gate_grads = self.gate.backward(&d_probs);

        let refs: Vec<&[f32]> = self.views.iter().map(|v| v.as_slice()).collect();
        let old_grads = self.old.backward(&old_pass, &refs, lmbda * probs[0], lmbda2 * probs[0]);
        let new_grads = self.new.backward(&new_pass, &refs, lmbda * probs[1], lmbda2 * probs[1]);

        let mut params = self.old.params.buffers_mut();
        params.extend(self.new.params.buffers_mut());
        params.extend(self.gate.buffers_mut());
        let mut grads = old_grads.buffers();
        grads.extend(new_grads.buffers());
        grads.push(gate_grads.as_slice());
        self.optimizer.step(params, grads, self.cfg.lr);

        self.enter(Stage::Score);
        let scores = cluster_eval(&self.labels, &pred);

        Ok(EpochReport { epoch, loss, scores, labels: pred })
    }

    /// Run `ep_num` epochs. On failure the error carries the best snapshot
    /// reached so far.
    pub fn fit(&mut self, tracker: &mut dyn ExperimentTracker) -> Result<BestScores, FitError> {
        tracker.start(&self.cfg);
        self.best = BestScores::initial(self.cfg.ep_num);
        let ep_num = self.cfg.ep_num;
        for epoch in 1..=ep_num {
            let started = Instant::now();
            let report = match self.train_epoch(epoch) {
                Ok(r) => r,
                Err(source) => return Err(FitError { partial: self.best, stage: self.stage, source }),
            };

            self.enter(Stage::UpdateBest);
            self.best.update(epoch, &report.scores);

            let s = &report.scores;
            log::info!(
                "Epoch {epoch}/{ep_num} - time: {:.2} - training_loss: {:.4} nmi: {:.4} acc: {:.4} pur: {:.4}",
                started.elapsed().as_secs_f64(), report.loss, s.nmi, s.accuracy, s.purity,
            );
            tracker.log("Train Loss", report.loss as f64, epoch);
            tracker.log("ep_nmi", s.nmi, epoch);
            tracker.log("ep_acc", s.accuracy, epoch);
            tracker.log("ep_pur", s.purity, epoch);
            tracker.log("best_nmi", self.best.nmi, epoch);
        }
        self.enter(Stage::Done);
        Ok(self.best)
    }

    /// Forward + cluster + score with no parameter update.
    pub fn evaluate(&mut self) -> SdccResult<ClusterScores> {
        self.enter(Stage::Forward);
        let (old_pass, new_pass) = self.forward()?;
        self.enter(Stage::Cluster);
        let (_, pred) = self.cluster(&old_pass, &new_pass)?;
        self.enter(Stage::Score);
        let scores = cluster_eval(&self.labels, &pred);
        self.enter(Stage::Done);
        Ok(scores)
    }

    /// Train (or, with `load_model`, evaluate once) under the configured
    /// failure policy, then record the summary.
    ///
    /// Debug mode propagates a fit failure. Otherwise the failure is logged
    /// and the partial best snapshot is returned.
    pub fn run(&mut self, tracker: &mut dyn ExperimentTracker) -> SdccResult<BestScores> {
        let best = if self.cfg.load_model {
            tracker.start(&self.cfg);
            let s = self.evaluate()?;
            BestScores { nmi: s.nmi, accuracy: s.accuracy, purity: s.purity, epoch: 0 }
        } else {
            match self.fit(tracker) {
                Ok(best) => best,
                Err(e) if self.cfg.debug => return Err(e.source),
                Err(e) => {
                    log::error!("{e}; reporting best scores so far");
                    e.partial
                }
            }
        };

        let step = self.cfg.ep_num + 1;
        tracker.log("NMI", best.nmi, step);
        tracker.log("Purity", best.purity, step);
        tracker.log("Accuracy", best.accuracy, step);
        tracker.log("Best_epoch", best.epoch as f64, step);
        Ok(best)
    }
}

/// Resolve the dataset, build (or load) the models, run, and save if asked.
pub fn run_experiment(
    cfg: &SdccConfig,
    catalog: &DatasetCatalog,
    tracker: &mut dyn ExperimentTracker,
) -> SdccResult<BestScores> {
    cfg.validate()?;
    let data = catalog.load(&cfg.dataset, cfg.n_view, cfg.dpca)?;
    let path = bundle_path(cfg);
    let mut solver = if cfg.load_model {
        log::info!("loading model bundle from {}", path.display());
        Solver::from_bundle(cfg.clone(), load_bundle(&path)?, &data)?
    } else {
        Solver::new(cfg.clone(), &data)?
    };
    let best = solver.run(tracker)?;
    if cfg.save_model {
        save_bundle(&path, &solver.bundle())?;
        log::info!("saved model bundle to {}", path.display());
    }
    Ok(best)
}

/// `Combined: best epoch: E best NMI score: X Purity score: Y Accuracy score: Z`
pub fn summary_line(best: &BestScores) -> String {
    format!(
        "Combined: best epoch: {} best NMI score: {} Purity score: {} Accuracy score: {}",
        best.epoch, best.nmi, best.purity, best.accuracy
    )
}
