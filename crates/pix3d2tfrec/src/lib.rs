//! Pix3D → TFRecord conversion.
//!
//! Every Pix3D annotation is turned into one `tf.train.Example` that
//! bundles the photo, the object mask, the object's mesh (`.obj`) and voxel
//! grid (`.mat`), the camera pose and intrinsics, the normalized bounding box
//! and the class label. Examples are spread round-robin over a fixed number
//! of shard files; see [`convert::run`].

pub mod annotation;
pub mod config;
pub mod convert;
pub mod error;
pub mod example;
pub mod mask;
pub mod mat;
pub mod mesh;
pub mod shard;
pub mod voxel;

pub use annotation::{load_annotations, Annotation, Category, PIX3D_CATEGORIES};
pub use config::Config;
pub use error::ConvertError;
pub use example::{create_example, Pix3dExample};
pub use shard::{shard_path, write_sharded, ShardSummary};
