//! The Pix3D master annotation file (`pix3d.json`).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConvertError;
use crate::mask::CocoSegmentation;

/// Pix3D class names; the label of a name is its position plus one.
pub const PIX3D_CATEGORIES: [&str; 9] = [
    "bed", "bookcase", "chair", "desk", "misc", "sofa", "table", "tool", "wardrobe",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Category {
    Id(i64),
    Name(String),
}

impl Category {
    pub fn label(&self) -> Result<i64, ConvertError> {
        match self {
            Category::Id(id) => Ok(*id),
            Category::Name(name) => PIX3D_CATEGORIES
                .iter()
                .position(|c| c == name)
                .map(|i| i as i64 + 1)
                .ok_or_else(|| ConvertError::UnknownCategory(name.clone())),
        }
    }
}

/// One image instance. Paths are relative to the dataset root.
#[derive(Debug, Clone, Deserialize)]
pub struct Annotation {
    pub img: String,
    pub category: Category,
    /// `[height, width]` in pixels.
    pub img_size: [u32; 2],

    /// Rasterized mask; unused when `segmentation` is given.
    #[serde(default)]
    pub mask: Option<String>,
    pub model: String,
    pub voxel: String,

    pub rot_mat: [[f64; 3]; 3],
    pub trans_mat: [f64; 3],
    pub focal_length: f64,
    /// `[xmin, ymin, xmax, ymax]` in pixels.
    pub bbox: [f64; 4],

    #[serde(default)]
    pub segmentation: Option<CocoSegmentation>,
    #[serde(default)]
    pub iscrowd: bool,

    // Carried along from the source file but not written out.
    #[serde(default, rename = "2d_keypoints")]
    pub keypoints_2d: Option<serde_json::Value>,
    #[serde(default, rename = "3d_keypoints")]
    pub keypoints_3d: Option<serde_json::Value>,
    #[serde(default)]
    pub img_source: Option<String>,
    #[serde(default)]
    pub model_raw: Option<String>,
    #[serde(default)]
    pub model_source: Option<String>,
    #[serde(default)]
    pub cam_position: Option<[f64; 3]>,
    #[serde(default)]
    pub inplane_rotation: Option<f64>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub occluded: bool,
    #[serde(default)]
    pub slightly_occluded: bool,

    /// Position in the annotation file.
    #[serde(skip)]
    pub image_id: u64,
}

impl Annotation {
    pub fn height(&self) -> u32 {
        self.img_size[0]
    }

    pub fn width(&self) -> u32 {
        self.img_size[1]
    }
}

/// Parse the annotation array and number the records in file order.
pub fn parse_annotations(json: &str) -> Result<Vec<Annotation>> {
    let annotations: Vec<Annotation> =
        serde_json::from_str(json).context("annotation file is not a Pix3D record array")?;
    Ok(number(annotations))
}

pub fn load_annotations<P: AsRef<Path>>(path: P) -> Result<Vec<Annotation>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open annotation file {}", path.display()))?;

    let annotations: Vec<Annotation> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse annotation file {}", path.display()))?;

    Ok(number(annotations))
}

fn number(mut annotations: Vec<Annotation>) -> Vec<Annotation> {
    for (id, annotation) in annotations.iter_mut().enumerate() {
        annotation.image_id = id as u64;
    }
    annotations
}
