/// Experiment configuration.
///
/// Field names match the keys the experiment tracker records, so a config
/// file and a tracker dump can be diffed directly. Every field has a serde
/// default; missing optional keys fall back silently.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationStrategy;
use crate::error::{SdccError, SdccResult};
use crate::kmeans::{Distance, KMeansInit};

/// Regularisation used by the correlation solver when the config omits `r`.
pub const DEFAULT_CORRELATION_R: f32 = 1e-8;

/// Clustering sub-configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub distance: Distance,
    pub init: KMeansInit,
    pub tol: f32,
    pub max_iter: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        ClusteringConfig {
            distance: Distance::Euclidean,
            init: KMeansInit::PlusPlus,
            tol: 1e-4,
            max_iter: 300,
        }
    }
}

/// Full experiment configuration; immutable once the solver is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdccConfig {
    /// Number of views V; the "old" model sees the first V-1.
    pub n_view: usize,
    pub lr: f32,
    /// Adam weight decay.
    pub reg_par: f32,
    /// Hidden width of the encoder/decoder blocks.
    pub n_fea: usize,
    /// Recorded for the tracker; the networks carry no dropout layers.
    pub drop_prob: f32,
    /// Requested correlated subspace size (capped by the smallest view width).
    pub dim: usize,
    /// Encoder output width.
    pub out_dim: usize,
    pub ep_num: usize,
    /// Weight of the correlation loss.
    pub lmbda: f32,
    /// Weight of the reconstruction loss.
    pub lmbda2: f32,
    /// Correlation solver regularisation; `None` means [`DEFAULT_CORRELATION_R`].
    /// An absent key deserializes to `None`, not to the reference value.
    #[serde(default)]
    pub r: Option<f32>,
    pub dataset: String,
    /// Keep only the first `dpca` features of every view.
    pub dpca: Option<usize>,
    /// Relative kernel bandwidth for the separability loss.
    pub rel_sigma: f32,
    pub solver: CorrelationStrategy,
    pub clustering: ClusteringConfig,
    /// Seed for parameter init (old model uses `seed`, new model `seed + 1`)
    /// and for k-means.
    pub seed: u64,
    /// Debug mode propagates fit failures instead of reporting the partial best.
    pub debug: bool,
    pub save_model: bool,
    pub load_model: bool,
    pub model_dir: PathBuf,
}

impl Default for SdccConfig {
    /// Caltech-5V reference experiment.
    fn default() -> Self {
        SdccConfig {
            n_view: 5,
            lr: 0.001,
            reg_par: 0.001,
            n_fea: 512,
            drop_prob: 0.1,
            dim: 24,
            out_dim: 44,
            ep_num: 80,
            lmbda: 1e-6,
            lmbda2: 1e-5,
            r: Some(1e-2),
            dataset: "Caltech-5V".to_string(),
            dpca: None,
            rel_sigma: 0.15,
            solver: CorrelationStrategy::Auto,
            clustering: ClusteringConfig::default(),
            seed: 0,
            debug: false,
            save_model: false,
            load_model: false,
            model_dir: PathBuf::from("./model"),
        }
    }
}

impl SdccConfig {
    /// Parse a JSON document; absent keys take their defaults.
    pub fn from_json_str(json: &str) -> SdccResult<Self> {
        let cfg: SdccConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> SdccResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> SdccResult<()> {
        if self.n_view < 2 {
            return Err(SdccError::InvalidConfig(format!(
                "n_view must be at least 2 (old model uses n_view - 1), got {}", self.n_view
            )));
        }
        if self.dim == 0 || self.out_dim == 0 || self.n_fea == 0 {
            return Err(SdccError::InvalidConfig(
                "dim, out_dim and n_fea must be non-zero".to_string(),
            ));
        }
        if !(self.rel_sigma > 0.0) {
            return Err(SdccError::InvalidConfig(format!(
                "rel_sigma must be positive, got {}", self.rel_sigma
            )));
        }
        Ok(())
    }

    /// Correlation regularisation with the fallback applied.
    pub fn correlation_r(&self) -> f32 {
        self.r.unwrap_or(DEFAULT_CORRELATION_R)
    }

    /// Subspace size actually used: `min(dim, smallest view width)`.
    pub fn cca_dim(&self, view_dims: &[usize]) -> usize {
        let narrowest = view_dims.iter().copied().min().unwrap_or(self.dim);
        self.dim.min(narrowest)
    }

    /// Flat key/value view handed to the experiment tracker at startup.
    pub fn tracked_values(&self) -> Vec<(&'static str, String)> {
        vec![
            ("n_view", self.n_view.to_string()),
            ("lr", self.lr.to_string()),
            ("reg_par", self.reg_par.to_string()),
            ("n_fea", self.n_fea.to_string()),
            ("drop_prob", self.drop_prob.to_string()),
            ("dim", self.dim.to_string()),
            ("out_dim", self.out_dim.to_string()),
            ("ep_num", self.ep_num.to_string()),
            ("lmbda", self.lmbda.to_string()),
            ("lmbda2", self.lmbda2.to_string()),
            ("r", self.correlation_r().to_string()),
            ("dataset", self.dataset.clone()),
        ]
    }
}
