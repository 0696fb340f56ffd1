use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::annotation::load_annotations;
use crate::config::Config;
use crate::example::create_example;
use crate::shard::{write_sharded, ShardSummary};

/// Convert the whole dataset described by `config`.
///
/// Setup problems (missing dataset, unreadable annotations, no output
/// directory, zero shards) are returned as errors; annotations that fail on
/// their own are skipped and counted in the summary.
pub fn run(config: &Config) -> Result<ShardSummary> {
    if !config.pix3d_dir.is_dir() {
        bail!("Pix3D directory {} does not exist", config.pix3d_dir.display());
    }
    if config.num_shards == 0 {
        bail!("number of shards must be at least 1");
    }

    let annotations = load_annotations(config.annotation_path())?;
    info!("Loaded {} annotations", annotations.len());

    if let Some(dir) = Path::new(&config.output_file_prefix).parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        }
    }

    info!(
        "Writing {} shards to {}-*-of-{:05}.tfrecord",
        config.num_shards, config.output_file_prefix, config.num_shards
    );

    let root = config.pix3d_dir.as_path();
    let summary = write_sharded(
        &config.output_file_prefix,
        &annotations,
        config.num_shards,
        config.workers,
        |annotation| create_example(annotation, root),
    )?;

    if summary.skipped > 0 {
        warn!("{} annotations were skipped", summary.skipped);
    }
    info!("Finished writing {} examples", summary.written);

    Ok(summary)
}
