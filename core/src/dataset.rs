/// Multi-view datasets and the named catalog that resolves them.
///
/// A dataset is V aligned views stored samples × features (row-major
/// [N, d_v]) plus one label per sample. Loaders plug in through
/// [`DatasetSource`]; the catalog picks a loader by identifier prefix, so
/// "Caltech-5V" and "Caltech-3V" resolve to the same source.

use crate::error::{SdccError, SdccResult};
use crate::tensor::{transposed, SimpleRng};

#[derive(Clone, Debug)]
pub struct MultiViewDataset {
    views: Vec<Vec<f32>>,
    dims: Vec<usize>,
    labels: Vec<usize>,
    n_samples: usize,
    n_class: usize,
}

impl MultiViewDataset {
    /// Validate alignment and normalise labels.
    ///
    /// Labels whose minimum is 1 are shifted to start at 0. The class count is
    /// max label + 1 after the shift.
    pub fn new(views: Vec<Vec<f32>>, dims: Vec<usize>, labels: Vec<usize>) -> SdccResult<Self> {
        if views.is_empty() {
            return Err(SdccError::EmptyInput("dataset views"));
        }
        if dims.len() != views.len() {
            return Err(SdccError::ShapeMismatch { what: "dataset view dims", expected: views.len(), found: dims.len() });
        }
        let n_samples = labels.len();
        if n_samples == 0 {
            return Err(SdccError::EmptyInput("dataset labels"));
        }
        for (x, &d) in views.iter().zip(&dims) {
            if d == 0 {
                return Err(SdccError::EmptyInput("dataset view features"));
            }
            if x.len() != n_samples * d {
                return Err(SdccError::ShapeMismatch { what: "dataset view samples", expected: n_samples, found: x.len() / d });
            }
        }

        let min = labels.iter().copied().min().unwrap_or(0);
        let labels: Vec<usize> = if min == 1 { labels.into_iter().map(|l| l - 1).collect() } else { labels };
        let n_class = labels.iter().copied().max().unwrap_or(0) + 1;

        Ok(MultiViewDataset { views, dims, labels, n_samples, n_class })
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_view(&self) -> usize {
        self.views.len()
    }

    pub fn n_class(&self) -> usize {
        self.n_class
    }

    /// Per-view feature widths.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// View `v` as stored, [N, d_v].
    pub fn view(&self, v: usize) -> &[f32] {
        &self.views[v]
    }

    /// Every view transposed to [d_v, N], the layout the models consume.
    pub fn transposed_views(&self) -> Vec<Vec<f32>> {
        self.views.iter().zip(&self.dims)
            .map(|(x, &d)| transposed(x, self.n_samples, d))
            .collect()
    }

    /// Keep only the first `n` views.
    pub fn take_views(mut self, n: usize) -> SdccResult<Self> {
        if n == 0 || n > self.views.len() {
            return Err(SdccError::InvalidConfig(format!(
                "requested {n} views, dataset has {}", self.views.len()
            )));
        }
        self.views.truncate(n);
        self.dims.truncate(n);
        Ok(self)
    }

    /// Keep the first `min(dpca, d_v)` features of every view.
    pub fn truncate_features(mut self, dpca: usize) -> Self {
        let n = self.n_samples;
        for (x, d) in self.views.iter_mut().zip(self.dims.iter_mut()) {
            let keep = dpca.min(*d);
            if keep == *d {
                continue;
            }
            let mut out = Vec::with_capacity(n * keep);
            for r in 0..n {
                out.extend_from_slice(&x[r * *d..r * *d + keep]);
            }
            *x = out;
            *d = keep;
        }
        self
    }
}

// ── Sources and catalog ──────────────────────────────────────────────

/// A loader for one family of datasets.
pub trait DatasetSource {
    /// Load `name` with at least `n_view` views.
    fn load(&self, name: &str, n_view: usize) -> SdccResult<MultiViewDataset>;
}

/// Identifier-prefix → loader registry.
#[derive(Default)]
pub struct DatasetCatalog {
    entries: Vec<(String, Box<dyn DatasetSource>)>,
}

impl DatasetCatalog {
    pub fn new() -> Self {
        DatasetCatalog::default()
    }

    pub fn register(&mut self, prefix: impl Into<String>, source: Box<dyn DatasetSource>) {
        self.entries.push((prefix.into(), source));
    }

    pub fn with(mut self, prefix: impl Into<String>, source: Box<dyn DatasetSource>) -> Self {
        self.register(prefix, source);
        self
    }

    /// First registered source whose prefix matches `name`.
    pub fn resolve(&self, name: &str) -> SdccResult<&dyn DatasetSource> {
        self.entries.iter()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
            .map(|(_, source)| source.as_ref())
            .ok_or_else(|| SdccError::UnknownDataset(name.to_string()))
    }

    /// Load, keep the first `n_view` views and apply the optional feature cut.
    pub fn load(&self, name: &str, n_view: usize, dpca: Option<usize>) -> SdccResult<MultiViewDataset> {
        let data = self.resolve(name)?.load(name, n_view)?.take_views(n_view)?;
        let data = match dpca {
            Some(k) => data.truncate_features(k),
            None => data,
        };
        log::info!(
            "loaded {name}: {} samples, {} classes, view dims {:?}",
            data.n_samples(), data.n_class(), data.dims()
        );
        Ok(data)
    }
}

// ── Synthetic source ─────────────────────────────────────────────────

/// Seeded Gaussian blobs: every view places each class at its own random
/// center and scatters samples around it. Samples are grouped by class.
#[derive(Clone, Debug)]
pub struct SyntheticBlobs {
    pub n_class: usize,
    pub per_class: usize,
    /// Feature width of each available view.
    pub view_dims: Vec<usize>,
    /// Scale of the class centers.
    pub separation: f32,
    /// Per-sample noise std.
    pub noise: f32,
    pub seed: u64,
    /// Emit labels starting at 1 instead of 0.
    pub one_indexed: bool,
}

impl Default for SyntheticBlobs {
    fn default() -> Self {
        SyntheticBlobs {
            n_class: 3,
            per_class: 20,
            view_dims: vec![6, 8, 10],
            separation: 5.0,
            noise: 0.1,
            seed: 0,
            one_indexed: false,
        }
    }
}

impl SyntheticBlobs {
    pub fn generate(&self, n_view: usize) -> SdccResult<MultiViewDataset> {
        if n_view > self.view_dims.len() {
            return Err(SdccError::InvalidConfig(format!(
                "synthetic source has {} views, {n_view} requested", self.view_dims.len()
            )));
        }
        let n = self.n_class * self.per_class;
        let mut rng = SimpleRng::new(self.seed);
        let mut views = Vec::with_capacity(self.view_dims.len());
        for &d in &self.view_dims {
            let centers: Vec<f32> = (0..self.n_class * d).map(|_| self.separation * rng.normal()).collect();
            let mut x = Vec::with_capacity(n * d);
            for c in 0..self.n_class {
                for _ in 0..self.per_class {
                    for p in 0..d {
                        x.push(centers[c * d + p] + self.noise * rng.normal());
                    }
                }
            }
            views.push(x);
        }
        let offset = usize::from(self.one_indexed);
        let labels = (0..n).map(|i| i / self.per_class.max(1) + offset).collect();
        MultiViewDataset::new(views, self.view_dims.clone(), labels)
    }
}

impl DatasetSource for SyntheticBlobs {
    fn load(&self, _name: &str, n_view: usize) -> SdccResult<MultiViewDataset> {
        self.generate(n_view)
    }
}
