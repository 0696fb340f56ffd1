//! Round-robin sharding of examples over TFRecord files.

use std::iter::Sum;
use std::ops::Add;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use tfrec::{Example, RecordWriter};

/// Progress is reported once per this many annotations.
const LOG_EVERY: usize = 100;

/// `{prefix}-{index:05}-of-{count:05}.tfrecord`
pub fn shard_path(prefix: &str, index: usize, count: usize) -> PathBuf {
    PathBuf::from(format!("{prefix}-{index:05}-of-{count:05}.tfrecord"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardSummary {
    pub written: usize,
    pub skipped: usize,
}

impl Add for ShardSummary {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            written: self.written + rhs.written,
            skipped: self.skipped + rhs.skipped,
        }
    }
}

impl Sum for ShardSummary {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Write `items[i]` to shard `i % num_shards`.
///
/// An item whose example cannot be built is logged and counted as skipped;
/// failing to write a shard file aborts the whole call. With `workers > 1`
/// the shards are written on a pool of that many threads, otherwise one
/// after another on the calling thread. Shard contents do not depend on
/// `workers`.
pub fn write_sharded<A, E, F>(
    prefix: &str,
    items: &[A],
    num_shards: usize,
    workers: usize,
    make_example: F,
) -> Result<ShardSummary>
where
    A: Sync,
    F: Fn(&A) -> Result<Example, E> + Sync,
    E: std::error::Error + Send + Sync + 'static,
{
    if num_shards == 0 {
        bail!("number of shards must be at least 1");
    }

    let write = |shard: usize| write_shard(prefix, items, shard, num_shards, &make_example);

    let summaries: Vec<ShardSummary> = if workers > 1 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("shard-writer-{i}"))
            .build()
            .context("failed to build shard writer pool")?
            .install(|| (0..num_shards).into_par_iter().map(write).collect::<Result<_>>())?
    } else {
        (0..num_shards).map(write).collect::<Result<_>>()?
    };

    Ok(summaries.into_iter().sum())
}

fn write_shard<A, E, F>(
    prefix: &str,
    items: &[A],
    shard: usize,
    num_shards: usize,
    make_example: &F,
) -> Result<ShardSummary>
where
    F: Fn(&A) -> Result<Example, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    let path = shard_path(prefix, shard, num_shards);
    let mut writer = RecordWriter::create(&path)
        .with_context(|| format!("failed to create shard {}", path.display()))?;
    let mut summary = ShardSummary::default();

    for (index, item) in items.iter().enumerate().skip(shard).step_by(num_shards) {
        if (index + 1) % LOG_EVERY == 0 {
            info!("On image {} of {}", index + 1, items.len());
        }

        // Encode fully before touching the file so a bad item leaves no partial record.
        match make_example(item) {
            Ok(example) => {
                writer
                    .write_example(&example)
                    .with_context(|| format!("failed to write shard {}", path.display()))?;
                summary.written += 1;
            }
            Err(err) => {
                warn!("Skipping annotation {index}: {:#}", anyhow::Error::new(err));
                summary.skipped += 1;
            }
        }
    }

    writer
        .finish()
        .with_context(|| format!("failed to flush shard {}", path.display()))?;

    debug!(
        "{}: {} written, {} skipped",
        path.display(),
        summary.written,
        summary.skipped
    );

    Ok(summary)
}
