use clap::Parser;
use std::path::PathBuf;

/// `pix3d2tfrec` - Convert the Pix3D dataset into sharded TFRecord files.
///
/// Each annotation in the Pix3D JSON becomes one `tf.train.Example` holding
/// the image, its object mask, the object's mesh and voxel grid, and the
/// camera pose. Examples are dealt round-robin over `--num-shards` files.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Root of the Pix3D dataset.
    ///
    /// All paths inside the annotation file are resolved against it.
    #[arg(long, env = "PIX3D_DIR")]
    pub pix3d_dir: PathBuf,

    /// Annotation file, relative to `--pix3d-dir` unless absolute.
    #[arg(long, env = "PIX3D_JSON_FILE", default_value = "pix3d.json")]
    pub pix3d_json_file: PathBuf,

    /// Output path prefix; shards are written as
    /// `{prefix}-{index:05}-of-{count:05}.tfrecord`.
    #[arg(long, env = "PIX3D_OUTPUT_FILE_PREFIX", default_value = "/tmp/train")]
    pub output_file_prefix: String,

    /// Number of output shards.
    #[arg(long, env = "PIX3D_NUM_SHARDS", default_value_t = 32)]
    pub num_shards: usize,

    /// Threads used to write shards concurrently. `1` writes them in order on
    /// the main thread.
    #[arg(long, env = "PIX3D_WORKERS", default_value_t = 1)]
    pub workers: usize,
}

impl Config {
    pub fn annotation_path(&self) -> PathBuf {
        self.pix3d_dir.join(&self.pix3d_json_file)
    }
}
