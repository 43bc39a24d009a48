//! `sdcc [CONFIG.json]`
//!
//! Runs one experiment and prints the combined summary line. Without a
//! config file, runs a small demo on the synthetic blob source.

use std::path::PathBuf;

use anyhow::Context;
use log::info;

use sdcc_core::config::SdccConfig;
use sdcc_core::dataset::{DatasetCatalog, SyntheticBlobs};
use sdcc_core::solver::{run_experiment, summary_line};
use sdcc_core::tracker::LogTracker;

fn demo_config() -> SdccConfig {
    SdccConfig {
        dataset: "Synthetic-3V".to_string(),
        n_view: 3,
        n_fea: 32,
        out_dim: 8,
        dim: 3,
        ep_num: 20,
        lmbda: 1e-3,
        lmbda2: 1e-3,
        ..SdccConfig::default()
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let cfg = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => SdccConfig::from_path(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            info!("no config given, running the synthetic demo");
            demo_config()
        }
    };

    let catalog = DatasetCatalog::new().with("Synthetic", Box::new(SyntheticBlobs::default()));
    let mut tracker = LogTracker;
    let best = run_experiment(&cfg, &catalog, &mut tracker)
        .with_context(|| format!("experiment on {} failed", cfg.dataset))?;

    println!("{}", summary_line(&best));
    Ok(())
}
