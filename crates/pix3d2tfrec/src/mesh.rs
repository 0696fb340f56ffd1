//! Wavefront OBJ vertices and faces.

use std::io::{self, BufRead, BufReader, Read};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("line {line}: invalid vertex coordinate {token:?}")]
    InvalidCoordinate { line: usize, token: String },

    #[error("line {line}: vertex needs at least 3 coordinates, found {found}")]
    ShortVertex { line: usize, found: usize },

    #[error("line {line}: invalid face index {token:?}")]
    InvalidIndex { line: usize, token: String },

    #[error("line {line}: face without vertices")]
    EmptyFace { line: usize },
}

/// Vertex positions and faces in file order.
///
/// Face indices are kept exactly as written in the file (OBJ is 1-based).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<Vec<i64>>,
}

/// Read `v` and `f` records from an OBJ file (or any `Read` source).
pub fn parse_obj<R: Read>(reader: R) -> Result<Mesh, MeshError> {
    let mut mesh = Mesh::default();

    for (index, line_result) in BufReader::new(reader).lines().enumerate() {
        let line = line_result?;
        let line_no = index + 1;

        // Records are told apart by their two-character prefix, so "vt"/"vn"
        // never match.
        if let Some(rest) = line.strip_prefix("v ") {
            let mut coords = [0f64; 3];
            let mut found = 0usize;

            for token in rest.split_whitespace() {
                let value: f64 = token.parse().map_err(|_| MeshError::InvalidCoordinate {
                    line: line_no,
                    token: token.to_owned(),
                })?;

                // An optional fourth (w) component is parsed but not kept.
                if found < 3 {
                    coords[found] = value;
                }
                found += 1;
            }

            if found < 3 {
                return Err(MeshError::ShortVertex { line: line_no, found });
            }

            mesh.vertices.push(coords);
        } else if let Some(rest) = line.strip_prefix("f ") {
            // Groups look like `v`, `v/vt`, `v//vn` or `v/vt/vn`.
            let face = rest
                .split_whitespace()
                .map(|group| {
                    let vertex = group.split('/').next().unwrap_or(group);
                    vertex.parse::<i64>().map_err(|_| MeshError::InvalidIndex {
                        line: line_no,
                        token: group.to_owned(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            if face.is_empty() {
                return Err(MeshError::EmptyFace { line: line_no });
            }

            mesh.faces.push(face);
        }
    }

    Ok(mesh)
}
