//! Dense tensors and their `TensorProto` serialization.
//!
//! `Tensor::serialize` produces the same bytes as `tf.io.serialize_tensor`
//! for numeric tensors: dtype, shape and a little-endian `tensor_content`.

use prost::Message;
use thiserror::Error;

use crate::proto::{tensor_shape_proto::Dim, DataType, TensorProto, TensorShapeProto};

#[derive(Debug, Error)]
pub enum TensorError {
    #[error("shape {shape:?} holds {expected} elements but {actual} were given")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("tensor has dtype {found}, expected {expected}")]
    DtypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("unsupported tensor dtype {0}")]
    UnsupportedDtype(i32),

    #[error("negative, unknown or overflowing dimension in tensor shape")]
    BadShape,

    #[error("tensor content of {len} bytes is not a multiple of {width}")]
    TruncatedContent { len: usize, width: usize },

    #[error("malformed TensorProto")]
    Decode(#[from] prost::DecodeError),
}

/// Element storage, one variant per supported dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::F32(_) => DataType::Float,
            TensorData::F64(_) => DataType::Double,
            TensorData::I32(_) => DataType::Int32,
            TensorData::I64(_) => DataType::Int64,
            TensorData::U8(_) => DataType::Uint8,
        }
    }

    /// Flatten integer elements to `i64`; `None` for floating-point data.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match self {
            TensorData::I32(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            TensorData::I64(v) => Some(v.clone()),
            TensorData::U8(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            TensorData::F32(_) | TensorData::F64(_) => None,
        }
    }

    /// Flatten every element to `f32`, the precision of a `FloatList`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            TensorData::F32(v) => v.clone(),
            TensorData::F64(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::I32(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::I64(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::U8(v) => v.iter().map(|&x| f32::from(x)).collect(),
        }
    }

    fn content_bytes(&self) -> Vec<u8> {
        match self {
            TensorData::F32(v) => le_bytes(v),
            TensorData::F64(v) => le_bytes(v),
            TensorData::I32(v) => le_bytes(v),
            TensorData::I64(v) => le_bytes(v),
            TensorData::U8(v) => v.clone(),
        }
    }
}

/// Scalar types that can back a [`Tensor`].
pub trait Element: bytemuck::Pod {
    const DTYPE: DataType;
    const WIDTH: usize;

    fn into_data(values: Vec<Self>) -> TensorData;
    fn to_le(self, out: &mut Vec<u8>);
    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DataType = $dtype;
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn into_data(values: Vec<Self>) -> TensorData {
                TensorData::$variant(values)
            }

            #[inline]
            fn to_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn from_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

impl_element!(f32, DataType::Float, F32);
impl_element!(f64, DataType::Double, F64);
impl_element!(i32, DataType::Int32, I32);
impl_element!(i64, DataType::Int64, I64);
impl_element!(u8, DataType::Uint8, U8);

fn le_bytes<T: Element>(values: &[T]) -> Vec<u8> {
    #[cfg(target_endian = "little")]
    {
        // In-memory layout already matches the wire layout.
        bytemuck::cast_slice::<T, u8>(values).to_vec()
    }

    #[cfg(not(target_endian = "little"))]
    {
        let mut out = Vec::with_capacity(values.len() * T::WIDTH);
        for &v in values {
            v.to_le(&mut out);
        }
        out
    }
}

fn from_le_bytes<T: Element>(bytes: &[u8]) -> Result<Vec<T>, TensorError> {
    if bytes.len() % T::WIDTH != 0 {
        return Err(TensorError::TruncatedContent {
            len: bytes.len(),
            width: T::WIDTH,
        });
    }

    // prost hands us an arbitrarily aligned buffer, so decode element-wise.
    Ok(bytes.chunks_exact(T::WIDTH).map(T::from_le).collect())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self, TensorError> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or(TensorError::BadShape)?;
        if expected != data.len() {
            return Err(TensorError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self { shape, data })
    }

    /// Build a rank-1 tensor.
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        Self {
            shape: vec![values.len()],
            data: T::into_data(values),
        }
    }

    /// Build a `(rows.len(), N)` matrix from fixed-width rows.
    pub fn from_rows<T: Element, const N: usize>(rows: &[[T; N]]) -> Self {
        let values: Vec<T> = rows.iter().flat_map(|row| row.iter().copied()).collect();
        Self {
            shape: vec![rows.len(), N],
            data: T::into_data(values),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_proto(&self) -> TensorProto {
        TensorProto {
            dtype: self.dtype() as i32,
            tensor_shape: Some(TensorShapeProto {
                dim: self
                    .shape
                    .iter()
                    .map(|&size| Dim {
                        size: size as i64,
                        name: String::new(),
                    })
                    .collect(),
                unknown_rank: false,
            }),
            tensor_content: self.data.content_bytes(),
            ..Default::default()
        }
    }

    pub fn from_proto(proto: &TensorProto) -> Result<Self, TensorError> {
        let dtype =
            DataType::try_from(proto.dtype).map_err(|_| TensorError::UnsupportedDtype(proto.dtype))?;

        let shape_proto = proto.tensor_shape.as_ref();
        if shape_proto.map_or(false, |s| s.unknown_rank) {
            return Err(TensorError::BadShape);
        }

        let shape = shape_proto
            .map(|s| {
                s.dim
                    .iter()
                    .map(|d| usize::try_from(d.size).map_err(|_| TensorError::BadShape))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        // Small tensors may carry their values in the typed repeated fields
        // instead of `tensor_content`.
        let content = &proto.tensor_content;
        let packed = !content.is_empty();
        let data = match dtype {
            DataType::Float if packed => TensorData::F32(from_le_bytes(content)?),
            DataType::Float => TensorData::F32(proto.float_val.clone()),
            DataType::Double if packed => TensorData::F64(from_le_bytes(content)?),
            DataType::Double => TensorData::F64(proto.double_val.clone()),
            DataType::Int32 if packed => TensorData::I32(from_le_bytes(content)?),
            DataType::Int32 => TensorData::I32(proto.int_val.clone()),
            DataType::Int64 if packed => TensorData::I64(from_le_bytes(content)?),
            DataType::Int64 => TensorData::I64(proto.int64_val.clone()),
            DataType::Uint8 if packed => TensorData::U8(content.clone()),
            DataType::Uint8 => TensorData::U8(proto.int_val.iter().map(|&v| v as u8).collect()),
            DataType::Invalid => return Err(TensorError::UnsupportedDtype(proto.dtype)),
        };

        Self::new(shape, data)
    }

    /// Serialize as a `TensorProto`, the blob stored inside a bytes feature.
    pub fn serialize(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }
}

/// Inverse of [`Tensor::serialize`], checking the element type like
/// `tf.io.parse_tensor(bytes, out_type)`.
pub fn parse_tensor(bytes: &[u8], out_type: DataType) -> Result<Tensor, TensorError> {
    let proto = TensorProto::decode(bytes)?;
    let tensor = Tensor::from_proto(&proto)?;

    if tensor.dtype() != out_type {
        return Err(TensorError::DtypeMismatch {
            expected: out_type.name(),
            found: tensor.dtype().name(),
        });
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float32_matrix_survives_serialization_bit_exact() {
        let rows = [[0.781_394_16f32, 0.000_955_393_5, -0.624_037_06], [0.1, -0.2, 1e-30]];
        let tensor = Tensor::from_rows(&rows);

        let parsed = parse_tensor(&tensor.serialize(), DataType::Float).unwrap();
        assert_eq!(parsed.shape(), &[2, 3]);

        let TensorData::F32(values) = parsed.data() else {
            panic!("expected f32 data");
        };
        let expected: Vec<u32> = rows.iter().flatten().map(|v| v.to_bits()).collect();
        let actual: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn content_is_little_endian() {
        let tensor = Tensor::from_vec(vec![1i32, -2]);
        let proto = tensor.to_proto();

        assert_eq!(proto.dtype, DataType::Int32 as i32);
        assert_eq!(proto.tensor_content, vec![1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn wrong_out_type_is_rejected() {
        let tensor = Tensor::from_rows(&[[1i64, 2, 3]]);
        let err = parse_tensor(&tensor.serialize(), DataType::Int32).unwrap_err();
        assert!(matches!(err, TensorError::DtypeMismatch { .. }));
    }

    #[test]
    fn shape_must_match_element_count() {
        let err = Tensor::new(vec![2, 2], TensorData::F64(vec![1.0; 3])).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { expected: 4, actual: 3, .. }));
    }

    #[test]
    fn empty_matrix_keeps_its_column_count() {
        let rows: [[f64; 3]; 0] = [];
        let tensor = Tensor::from_rows(&rows);

        let parsed = parse_tensor(&tensor.serialize(), DataType::Double).unwrap();
        assert_eq!(parsed.shape(), &[0, 3]);
        assert!(parsed.is_empty());
    }

    #[test]
    fn typed_value_fields_are_accepted() {
        let proto = TensorProto {
            dtype: DataType::Int64 as i32,
            tensor_shape: Some(TensorShapeProto {
                dim: vec![Dim { size: 3, name: String::new() }],
                unknown_rank: false,
            }),
            int64_val: vec![7, 8, 9],
            ..Default::default()
        };

        let tensor = Tensor::from_proto(&proto).unwrap();
        assert_eq!(tensor.data(), &TensorData::I64(vec![7, 8, 9]));
    }

    #[test]
    fn overflowing_shape_is_rejected() {
        let huge = Dim { size: i64::MAX, name: String::new() };
        let proto = TensorProto {
            dtype: DataType::Uint8 as i32,
            tensor_shape: Some(TensorShapeProto {
                dim: vec![huge.clone(), huge.clone(), huge],
                unknown_rank: false,
            }),
            tensor_content: vec![1],
            ..Default::default()
        };

        let bytes = proto.encode_to_vec();
        assert!(matches!(
            parse_tensor(&bytes, DataType::Uint8),
            Err(TensorError::BadShape)
        ));
    }
}
