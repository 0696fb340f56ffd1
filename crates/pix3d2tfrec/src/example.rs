//! Assembling one `tf.train.Example` per Pix3D annotation.

use std::collections::BTreeMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use tfrec::{to_feature, EncodeError, Example, Tensor, TensorData, Value};

use crate::annotation::Annotation;
use crate::error::{read_file, ConvertError};
use crate::mask::coco_segmentation_to_mask_png;
use crate::mat::MatFile;
use crate::mesh::{parse_obj, Mesh};
use crate::voxel::{decode_voxels, VoxelError, VoxelGrid};

/// Feature keys as they appear in the written records.
pub mod fields {
    pub const IMAGE_ENCODED: &str = "image/encoded";
    pub const IMAGE_HEIGHT: &str = "image/height";
    pub const IMAGE_WIDTH: &str = "image/width";
    pub const IMAGE_FILENAME: &str = "image/filename";
    pub const IMAGE_SOURCE_ID: &str = "image/source_id";
    pub const IMAGE_FORMAT: &str = "image/format";
    pub const IMAGE_KEY_SHA256: &str = "image/key/sha256";
    pub const OBJECT_MASK: &str = "image/object/mask";
    pub const OBJECT_BBOX_XMIN: &str = "image/object/bbox/xmin";
    pub const OBJECT_BBOX_YMIN: &str = "image/object/bbox/ymin";
    pub const OBJECT_BBOX_XMAX: &str = "image/object/bbox/xmax";
    pub const OBJECT_BBOX_YMAX: &str = "image/object/bbox/ymax";
    pub const OBJECT_CLASS_LABEL: &str = "image/object/class/label";
    pub const OBJECT_IS_CROWD: &str = "image/object/is_crowd";
    pub const MODEL_VERTICES: &str = "model/vertices";
    pub const MODEL_FACES: &str = "model/faces";
    pub const MODEL_VOXEL_INDICES: &str = "model/voxel_indices";
    pub const MODEL_VOXEL_SHAPE: &str = "model/voxel_shape";
    pub const CAMERA_ROT_MAT: &str = "camera/rot_mat";
    pub const CAMERA_TRANS_MAT: &str = "camera/trans_mat";
    // Downstream readers expect this spelling.
    pub const CAMERA_INTRINSIC_MAT: &str = "camera/intrinstic_mat";
}

/// Bounding box with every coordinate divided by the matching image side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBbox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl NormalizedBbox {
    /// `bbox` is `[xmin, ymin, xmax, ymax]` in pixels. Ordering is not checked.
    pub fn from_pixels(bbox: [f64; 4], width: u32, height: u32) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        Self {
            xmin: bbox[0] / w,
            ymin: bbox[1] / h,
            xmax: bbox[2] / w,
            ymax: bbox[3] / h,
        }
    }

    pub fn to_pixels(self, width: u32, height: u32) -> [f64; 4] {
        let (w, h) = (f64::from(width), f64::from(height));
        [self.xmin * w, self.ymin * h, self.xmax * w, self.ymax * h]
    }
}

/// `[f * (w / 32), w / 2, h / 2]`: focal length in pixels, then the
/// principal point. Focal lengths are given for a 32 mm sensor width.
pub fn intrinsics(focal_length: f64, width: u32, height: u32) -> [f64; 3] {
    let (w, h) = (f64::from(width), f64::from(height));
    [focal_length * (w / 32.0), w / 2.0, h / 2.0]
}

/// `jpg` when the file name says so, `png` otherwise.
pub fn image_format(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    if lower.contains("jpg") || lower.contains("jpeg") {
        "jpg"
    } else {
        "png"
    }
}

/// Every field of one Pix3D example.
#[derive(Debug, Clone, PartialEq)]
pub struct Pix3dExample {
    pub image: Vec<u8>,
    pub height: u32,
    pub width: u32,
    pub filename: String,
    pub source_id: String,
    pub format: &'static str,
    pub sha256: String,
    pub mask: Vec<u8>,
    pub mesh: Mesh,
    pub voxels: VoxelGrid,
    pub rot_mat: [[f64; 3]; 3],
    pub trans_mat: [f64; 3],
    pub intrinsics: [f64; 3],
    pub bbox: NormalizedBbox,
    pub label: i64,
}

impl Pix3dExample {
    /// Encode every field; the feature type is inferred from the value.
    pub fn to_example(&self) -> Result<Example, EncodeError> {
        // A nested list has no element type once it is empty.
        let faces: Value = if self.mesh.faces.is_empty() {
            Tensor::new(vec![0, 3], TensorData::I32(Vec::new()))?.into()
        } else {
            self.mesh
                .faces
                .iter()
                .map(|face| Value::list(face.iter().copied()))
                .collect()
        };
        let rot_mat: Value = self
            .rot_mat
            .iter()
            .map(|row| Value::list(row.iter().copied()))
            .collect();
        let voxel_shape: Value = self.voxels.shape.iter().map(|&d| d as i64).collect();

        let values: [(&str, Value); 21] = [
            (fields::IMAGE_ENCODED, Value::bytes(self.image.clone())),
            (fields::IMAGE_HEIGHT, self.height.into()),
            (fields::IMAGE_WIDTH, self.width.into()),
            (fields::IMAGE_FILENAME, self.filename.as_str().into()),
            (fields::IMAGE_SOURCE_ID, self.source_id.as_str().into()),
            (fields::IMAGE_FORMAT, self.format.into()),
            (fields::IMAGE_KEY_SHA256, self.sha256.as_str().into()),
            (fields::OBJECT_MASK, Value::bytes(self.mask.clone())),
            (fields::MODEL_VERTICES, Tensor::from_rows(self.mesh.vertices.as_slice()).into()),
            (fields::MODEL_FACES, faces),
            (fields::MODEL_VOXEL_INDICES, Tensor::from_rows(self.voxels.indices.as_slice()).into()),
            (fields::MODEL_VOXEL_SHAPE, voxel_shape),
            (fields::CAMERA_ROT_MAT, rot_mat),
            (fields::CAMERA_TRANS_MAT, Value::list(self.trans_mat)),
            (fields::CAMERA_INTRINSIC_MAT, Value::list(self.intrinsics)),
            (fields::OBJECT_BBOX_XMIN, Value::list([self.bbox.xmin])),
            (fields::OBJECT_BBOX_YMIN, Value::list([self.bbox.ymin])),
            (fields::OBJECT_BBOX_XMAX, Value::list([self.bbox.xmax])),
            (fields::OBJECT_BBOX_YMAX, Value::list([self.bbox.ymax])),
            (fields::OBJECT_CLASS_LABEL, self.label.into()),
            (fields::OBJECT_IS_CROWD, Value::list([0i64])),
        ];

        let mut features = BTreeMap::new();
        for (name, value) in &values {
            features.insert((*name).to_owned(), to_feature(value, None)?);
        }

        Ok(Example::from_features(features))
    }
}

/// Gather and decode everything one annotation points at.
pub fn create_example(annotation: &Annotation, root: &Path) -> Result<Example, ConvertError> {
    let (height, width) = (annotation.height(), annotation.width());
    if height == 0 || width == 0 {
        return Err(ConvertError::ImageSize { height, width });
    }

    let label = annotation.category.label()?;

    let image = read_file("image", &root.join(&annotation.img))?;
    let sha256 = hex::encode(Sha256::digest(&image));

    let mask = match (&annotation.segmentation, &annotation.mask) {
        (Some(segmentation), _) => {
            coco_segmentation_to_mask_png(segmentation, height, width, annotation.iscrowd)?
        }
        (None, Some(mask)) => read_file("mask", &root.join(mask))?,
        (None, None) => return Err(ConvertError::NoMask),
    };

    let model_path = root.join(&annotation.model);
    let mesh = parse_obj(read_file("model", &model_path)?.as_slice())
        .map_err(|source| ConvertError::Mesh {
            path: model_path.clone(),
            source,
        })?;

    let voxel_path = root.join(&annotation.voxel);
    let voxel_bytes = read_file("voxel", &voxel_path)?;
    let voxels = MatFile::parse(&voxel_bytes)
        .map_err(VoxelError::from)
        .and_then(|mat| decode_voxels(&mat))
        .map_err(|source| ConvertError::Voxel {
            path: voxel_path.clone(),
            source,
        })?;

    let example = Pix3dExample {
        image,
        height,
        width,
        format: image_format(&annotation.img),
        filename: annotation.img.clone(),
        source_id: annotation.image_id.to_string(),
        sha256,
        mask,
        mesh,
        voxels,
        rot_mat: annotation.rot_mat,
        trans_mat: annotation.trans_mat,
        intrinsics: intrinsics(annotation.focal_length, width, height),
        bbox: NormalizedBbox::from_pixels(annotation.bbox, width, height),
        label,
    };

    Ok(example.to_example()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfrec::{parse_tensor, DataType};

    fn sample() -> Pix3dExample {
        Pix3dExample {
            image: vec![0xff, 0xd8, 0xff],
            height: 4,
            width: 8,
            filename: "img/chair/0001.jpg".into(),
            source_id: "7".into(),
            format: "jpg",
            sha256: "ab".repeat(32),
            mask: vec![1, 2, 3],
            mesh: Mesh {
                vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                faces: vec![vec![1, 2, 3], vec![1, 3, 4]],
            },
            voxels: VoxelGrid {
                indices: vec![[0, 0, 2], [1, 3, 0]],
                shape: [2, 4, 3],
            },
            rot_mat: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            trans_mat: [0.1, 0.2, 1.5],
            intrinsics: intrinsics(35.0, 8, 4),
            bbox: NormalizedBbox::from_pixels([1.0, 1.0, 7.0, 3.0], 8, 4),
            label: 3,
        }
    }

    fn tensor(example: &Example, name: &str, dtype: DataType) -> Tensor {
        let blob = &example.get(name).unwrap().bytes_list().unwrap()[0];
        parse_tensor(blob, dtype).unwrap()
    }

    #[test]
    fn intrinsics_scale_focal_length_by_sensor_width() {
        assert_eq!(intrinsics(36.0, 1512, 2016), [1701.0, 756.0, 1008.0]);
        assert_eq!(intrinsics(36.0, 2016, 1512), [2268.0, 1008.0, 756.0]);
        assert_eq!(intrinsics(32.0, 640, 480), [640.0, 320.0, 240.0]);
    }

    #[test]
    fn bbox_divides_by_matching_side_and_round_trips() {
        let bbox = NormalizedBbox::from_pixels([10.0, 20.0, 110.0, 220.0], 200, 400);
        assert_eq!(
            bbox,
            NormalizedBbox {
                xmin: 0.05,
                ymin: 0.05,
                xmax: 0.55,
                ymax: 0.55
            }
        );

        let back = bbox.to_pixels(200, 400);
        for (a, b) in back.iter().zip([10.0, 20.0, 110.0, 220.0]) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn format_follows_the_file_name() {
        assert_eq!(image_format("img/bed/0001.jpg"), "jpg");
        assert_eq!(image_format("img/bed/0001.JPEG"), "jpg");
        assert_eq!(image_format("img/bed/0001.png"), "png");
    }

    #[test]
    fn every_field_is_written_with_its_encoding() {
        let example = sample().to_example().unwrap();
        assert_eq!(example.len(), 21);

        assert_eq!(example.get(fields::IMAGE_HEIGHT).unwrap().int64_list(), Some(&[4][..]));
        assert_eq!(example.get(fields::IMAGE_WIDTH).unwrap().int64_list(), Some(&[8][..]));
        assert_eq!(
            example.get(fields::IMAGE_SOURCE_ID).unwrap().bytes_list(),
            Some(&[b"7".to_vec()][..])
        );
        assert_eq!(
            example.get(fields::IMAGE_FORMAT).unwrap().bytes_list(),
            Some(&[b"jpg".to_vec()][..])
        );
        assert_eq!(
            example.get(fields::OBJECT_CLASS_LABEL).unwrap().int64_list(),
            Some(&[3][..])
        );
        assert_eq!(
            example.get(fields::OBJECT_IS_CROWD).unwrap().int64_list(),
            Some(&[0][..])
        );
        assert_eq!(
            example.get(fields::MODEL_VOXEL_SHAPE).unwrap().int64_list(),
            Some(&[2, 4, 3][..])
        );
        assert_eq!(
            example.get(fields::CAMERA_INTRINSIC_MAT).unwrap().float_list(),
            Some(&[8.75f32, 4.0, 2.0][..])
        );
        assert_eq!(
            example.get(fields::OBJECT_BBOX_XMAX).unwrap().float_list(),
            Some(&[0.875f32][..])
        );
        assert_eq!(
            example.get(fields::CAMERA_TRANS_MAT).unwrap().float_list().map(<[f32]>::len),
            Some(3)
        );
    }

    #[test]
    fn mesh_without_faces_still_writes_typed_arrays() {
        let mut example = sample();
        example.mesh = Mesh::default();
        let example = example.to_example().unwrap();

        let faces = tensor(&example, fields::MODEL_FACES, DataType::Int32);
        assert_eq!(faces.shape(), &[0, 3]);
        assert!(faces.is_empty());

        let vertices = tensor(&example, fields::MODEL_VERTICES, DataType::Double);
        assert_eq!(vertices.shape(), &[0, 3]);
    }

    #[test]
    fn array_fields_decode_with_their_dtypes() {
        let example = sample().to_example().unwrap();

        let vertices = tensor(&example, fields::MODEL_VERTICES, DataType::Double);
        assert_eq!(vertices.shape(), &[4, 3]);

        let faces = tensor(&example, fields::MODEL_FACES, DataType::Int32);
        assert_eq!(faces.shape(), &[2, 3]);
        assert_eq!(faces.data(), &TensorData::I32(vec![1, 2, 3, 1, 3, 4]));

        let voxels = tensor(&example, fields::MODEL_VOXEL_INDICES, DataType::Int64);
        assert_eq!(voxels.shape(), &[2, 3]);
        assert_eq!(voxels.data(), &TensorData::I64(vec![0, 0, 2, 1, 3, 0]));

        let rot = tensor(&example, fields::CAMERA_ROT_MAT, DataType::Float);
        assert_eq!(rot.shape(), &[3, 3]);
        assert_eq!(
            rot.data(),
            &TensorData::F32(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
        );
    }
}
