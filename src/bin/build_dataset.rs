//! Build the training set from recorded landmark sessions.
//!
//! Reads every `*.jsonl` file in `[dataset] raw_dir` (sorted by name),
//! normalizes each sample and writes `X.npy`, `y.npy` and the class map.
//!
//! Usage: build_dataset [config.toml]

use anyhow::{bail, Result};

use sign_gesture::config::{Config, CONFIG_PATH};
use sign_gesture::dataset::{list_recordings, DatasetBuilder};
use sign_gesture::log;
use sign_gesture::logging::open_log_file;

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)?;
    let (logfile, _log_path) = open_log_file(&config.logging.dir, "build_dataset")?;

    log!(logfile, "Loading raw data from {}", config.dataset.raw_dir.display());
    let files = list_recordings(&config.dataset.raw_dir)?;
    if files.is_empty() {
        bail!("no recordings found in {}", config.dataset.raw_dir.display());
    }

    let mut builder = DatasetBuilder::new();
    for path in &files {
        let count = builder.add_file(path)?;
        log!(logfile, "Processed {} ({} samples)", path.display(), count);
    }

    let dataset = builder.finish()?;
    let paths = dataset.write(&config.dataset.out_dir, &config.dataset.classes)?;

    log!(logfile, "Saved {}", paths.features.display());
    log!(logfile, "Saved {}", paths.labels.display());
    log!(logfile, "Saved {}", paths.classes.display());
    log!(logfile, "Dataset size: {:?} {:?}", dataset.features.dim(), dataset.labels.dim());
    for (id, label) in dataset.classes.labels().iter().enumerate() {
        log!(logfile, "  {}: {}", id, label);
    }

    Ok(())
}
