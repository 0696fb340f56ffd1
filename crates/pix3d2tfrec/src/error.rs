use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tfrec::EncodeError;

use crate::mask::MaskError;
use crate::mesh::MeshError;
use crate::voxel::VoxelError;

/// Why one annotation could not be turned into an example.
///
/// None of these stop a run: the shard writer logs them and moves on.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{kind} file not found: {}", path.display())]
    MissingFile { kind: &'static str, path: PathBuf },

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse mesh {}", path.display())]
    Mesh {
        path: PathBuf,
        #[source]
        source: MeshError,
    },

    #[error("failed to decode voxels {}", path.display())]
    Voxel {
        path: PathBuf,
        #[source]
        source: VoxelError,
    },

    #[error("annotation has neither a mask file nor a segmentation")]
    NoMask,

    #[error("failed to decode segmentation")]
    Mask(#[from] MaskError),

    #[error("failed to encode example")]
    Encode(#[from] EncodeError),

    #[error("unknown category {0:?}")]
    UnknownCategory(String),

    #[error("invalid image size {height}x{width}")]
    ImageSize { height: u32, width: u32 },
}

/// Read a whole file, reporting a missing one as [`ConvertError::MissingFile`].
pub fn read_file(kind: &'static str, path: &Path) -> Result<Vec<u8>, ConvertError> {
    std::fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ConvertError::MissingFile {
            kind,
            path: path.to_owned(),
        },
        _ => ConvertError::Io {
            path: path.to_owned(),
            source,
        },
    })
}
