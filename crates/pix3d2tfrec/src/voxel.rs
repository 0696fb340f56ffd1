//! Occupancy grids from Pix3D `voxel.mat` files.

use thiserror::Error;

use crate::mat::{MatError, MatFile};

/// Variable holding the occupancy grid inside a Pix3D voxel file.
pub const VOXEL_KEY: &str = "voxel";

#[derive(Debug, Error)]
pub enum VoxelError {
    #[error(transparent)]
    Mat(#[from] MatError),

    #[error("no `{0}` variable in MAT file")]
    MissingKey(String),

    #[error("voxel grid must have rank 3, found rank {0}")]
    Rank(usize),
}

/// Dense rank-3 grid in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid3 {
    shape: [usize; 3],
    data: Vec<f64>,
}

impl Grid3 {
    /// Wrap MATLAB column-major data (`v[i, j, k]` at `i + d0 * (j + d1 * k)`).
    pub fn from_column_major(shape: [usize; 3], column_major: &[f64]) -> Self {
        let [d0, d1, d2] = shape;
        let mut data = Vec::with_capacity(column_major.len());

        for i in 0..d0 {
            for j in 0..d1 {
                for k in 0..d2 {
                    data.push(column_major[i + d0 * (j + d1 * k)]);
                }
            }
        }

        Self { shape, data }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        let [_, d1, d2] = self.shape;
        self.data[(i * d1 + j) * d2 + k]
    }

    /// Rotate by 270° in the plane of axes 1 and 2, i.e.
    /// `numpy.rot90(v, k=3, axes=(1, 2))`: `out[i, j, k] = v[i, d1 - 1 - k, j]`.
    pub fn rot270_yz(&self) -> Self {
        let [d0, d1, d2] = self.shape;
        let shape = [d0, d2, d1];
        let mut data = Vec::with_capacity(self.data.len());

        for i in 0..d0 {
            for j in 0..d2 {
                for k in 0..d1 {
                    data.push(self.get(i, d1 - 1 - k, j));
                }
            }
        }

        Self { shape, data }
    }

    /// Coordinates of every cell with a value above zero, row-major.
    pub fn occupied(&self) -> Vec<[i64; 3]> {
        let [d0, d1, d2] = self.shape;
        let mut out = Vec::new();

        for i in 0..d0 {
            for j in 0..d1 {
                for k in 0..d2 {
                    if self.get(i, j, k) > 0.0 {
                        out.push([i as i64, j as i64, k as i64]);
                    }
                }
            }
        }

        out
    }
}

/// Occupied cells of the reoriented grid together with its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    pub indices: Vec<[i64; 3]>,
    pub shape: [usize; 3],
}

pub fn decode_voxels(mat: &MatFile) -> Result<VoxelGrid, VoxelError> {
    let array = mat
        .get(VOXEL_KEY)
        .ok_or_else(|| VoxelError::MissingKey(VOXEL_KEY.to_owned()))?;

    let shape: [usize; 3] = array
        .dims
        .as_slice()
        .try_into()
        .map_err(|_| VoxelError::Rank(array.rank()))?;

    // The rotation aligns the grid with the mesh and camera frame.
    let grid = Grid3::from_column_major(shape, &array.real).rot270_yz();

    Ok(VoxelGrid {
        indices: grid.occupied(),
        shape: grid.shape(),
    })
}
