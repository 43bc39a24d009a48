pub mod error;
pub mod config;
pub mod tensor;
pub mod kernel;
pub mod layers;
pub mod autoencoder;
pub mod correlation;
pub mod separability;
pub mod gate;
pub mod adam;
pub mod model;
pub mod kmeans;
pub mod metrics;
pub mod dataset;
pub mod tracker;
pub mod solver;
#[cfg(feature = "internal")]
pub mod gradient;
#[cfg(not(feature = "internal"))]
pub(crate) mod gradient;
