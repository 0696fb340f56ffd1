//! Value → `tf.train.Feature` encoding.
//!
//! [`Value`] is the closed set of shapes a field can take. Without an explicit
//! [`FeatureType`], [`infer_type`] picks one by looking at the value (or at
//! the first element of a list) in this order:
//!
//! | value                          | type         | stored as                 |
//! |--------------------------------|--------------|---------------------------|
//! | list of bytes                  | `bytes_list` | bytes list                |
//! | list of ints                   | `int64_list` | int64 list                |
//! | list of floats                 | `float_list` | float list (f32)          |
//! | bytes                          | `bytes`      | one-element bytes list    |
//! | int                            | `int64`      | one-element int64 list    |
//! | float                          | `float`      | one-element float list    |
//! | string                         | `str`        | UTF-8, one-element bytes  |
//! | list of lists                  | `2d_list`    | serialized tensor blob    |
//! | array                          | `ndarray`    | serialized tensor blob    |
//! | none, or an empty list         | `none`       | feature without a kind    |
//!
//! Anything else (lists of strings, of arrays, of nones, mixed lists) is an
//! [`EncodeError`]; values are never coerced to make them fit.

use std::fmt;

use thiserror::Error;

use crate::proto::Feature;
use crate::tensor::{Tensor, TensorData, TensorError};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<Value>),
    Array(Tensor),
}

impl Value {
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(bytes.into())
    }

    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Array(_) => "ndarray",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Tensor> for Value {
    fn from(v: Tensor) -> Self {
        Value::Array(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Value::list(iter)
    }
}

/// The encoding a value is written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureType {
    BytesList,
    Int64List,
    FloatList,
    Bytes,
    Int64,
    Float,
    Str,
    Nested,
    Ndarray,
    None,
}

impl FeatureType {
    pub fn name(self) -> &'static str {
        match self {
            FeatureType::BytesList => "bytes_list",
            FeatureType::Int64List => "int64_list",
            FeatureType::FloatList => "float_list",
            FeatureType::Bytes => "bytes",
            FeatureType::Int64 => "int64",
            FeatureType::Float => "float",
            FeatureType::Str => "str",
            FeatureType::Nested => "2d_list",
            FeatureType::Ndarray => "ndarray",
            FeatureType::None => "none",
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot convert a list of {0} to a feature")]
    UnsupportedList(&'static str),

    #[error("cannot encode a {found} value as `{expected}`")]
    TypeMismatch {
        expected: FeatureType,
        found: &'static str,
    },

    #[error("list element {index} is a {found}, expected {expected}")]
    MixedList {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("nested list is ragged or mixed at depth {depth}")]
    Ragged { depth: usize },

    #[error("nested list of {0} cannot form a tensor")]
    UnsupportedLeaf(&'static str),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Pick the feature type for `value`, looking only at the first element of a
/// list. An empty list carries no element type and resolves to `none`.
pub fn infer_type(value: &Value) -> Result<FeatureType, EncodeError> {
    let ty = match value {
        Value::List(items) => match items.first() {
            None => FeatureType::None,
            Some(Value::Bytes(_)) => FeatureType::BytesList,
            Some(Value::Int(_)) => FeatureType::Int64List,
            Some(Value::Float(_)) => FeatureType::FloatList,
            Some(Value::List(_)) => FeatureType::Nested,
            Some(other) => return Err(EncodeError::UnsupportedList(other.kind_name())),
        },
        Value::Bytes(_) => FeatureType::Bytes,
        Value::Int(_) => FeatureType::Int64,
        Value::Float(_) => FeatureType::Float,
        Value::Str(_) => FeatureType::Str,
        Value::Array(_) => FeatureType::Ndarray,
        Value::None => FeatureType::None,
    };

    Ok(ty)
}

/// Encode `value` as a feature, inferring the type unless `value_type` forces one.
pub fn to_feature(value: &Value, value_type: Option<FeatureType>) -> Result<Feature, EncodeError> {
    let ty = match value_type {
        Some(ty) => ty,
        None => infer_type(value)?,
    };

    let mismatch = || EncodeError::TypeMismatch {
        expected: ty,
        found: value.kind_name(),
    };

    let feature = match (ty, value) {
        (FeatureType::Int64, Value::Int(v)) => Feature::from_int64_list(vec![*v]),

        (FeatureType::Int64List, Value::List(items)) => {
            Feature::from_int64_list(collect_list(items, "int", |item| match item {
                Value::Int(v) => Some(*v),
                _ => None,
            })?)
        }
        (FeatureType::Int64List, Value::Array(t)) => {
            Feature::from_int64_list(t.data().to_i64_vec().ok_or_else(mismatch)?)
        }

        (FeatureType::Float, Value::Float(v)) => Feature::from_float_list(vec![*v as f32]),
        (FeatureType::Float, Value::Int(v)) => Feature::from_float_list(vec![*v as f32]),

        (FeatureType::FloatList, Value::List(items)) => {
            Feature::from_float_list(collect_list(items, "float", |item| match item {
                Value::Float(v) => Some(*v as f32),
                Value::Int(v) => Some(*v as f32),
                _ => None,
            })?)
        }
        (FeatureType::FloatList, Value::Array(t)) => Feature::from_float_list(t.data().to_f32_vec()),

        (FeatureType::Bytes, Value::Bytes(b)) => Feature::from_bytes_list(vec![b.clone()]),

        (FeatureType::BytesList, Value::List(items)) => {
            Feature::from_bytes_list(collect_list(items, "bytes", |item| match item {
                Value::Bytes(b) => Some(b.clone()),
                _ => None,
            })?)
        }

        (FeatureType::Str, Value::Str(s)) => Feature::from_bytes_list(vec![s.as_bytes().to_vec()]),

        (FeatureType::Nested | FeatureType::Ndarray, Value::List(items)) => {
            let tensor = nested_tensor(items)?;
            Feature::from_bytes_list(vec![tensor.serialize()])
        }
        (FeatureType::Nested | FeatureType::Ndarray, Value::Array(t)) => {
            Feature::from_bytes_list(vec![t.serialize()])
        }

        (FeatureType::None, Value::None) => Feature::empty(),
        (FeatureType::None, Value::List(items)) if items.is_empty() => Feature::empty(),

        _ => return Err(mismatch()),
    };

    Ok(feature)
}

fn collect_list<T>(
    items: &[Value],
    expected: &'static str,
    pick: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<T>, EncodeError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            pick(item).ok_or(EncodeError::MixedList {
                index,
                expected,
                found: item.kind_name(),
            })
        })
        .collect()
}

/// Convert a rectangular nested list into a tensor. Integers become `int32`
/// unless a value needs 64 bits; floats become `float32`.
fn nested_tensor(items: &[Value]) -> Result<Tensor, EncodeError> {
    let mut shape = vec![items.len()];
    let mut probe = items.first();
    while let Some(Value::List(inner)) = probe {
        shape.push(inner.len());
        probe = inner.first();
    }

    let mut leaves = Vec::with_capacity(shape.iter().product());
    flatten_into(items, &shape, 0, &mut leaves)?;

    let data = match leaves.first() {
        // Empty along some axis: no element type to go by.
        None => TensorData::F32(Vec::new()),
        Some(Value::Float(_)) => TensorData::F32(
            leaves
                .iter()
                .map(|v| match v {
                    Value::Float(x) => Ok(*x as f32),
                    _ => Err(EncodeError::Ragged { depth: shape.len() }),
                })
                .collect::<Result<_, _>>()?,
        ),
        Some(Value::Int(_)) => {
            let ints = leaves
                .iter()
                .map(|v| match v {
                    Value::Int(x) => Ok(*x),
                    _ => Err(EncodeError::Ragged { depth: shape.len() }),
                })
                .collect::<Result<Vec<i64>, _>>()?;

            if ints.iter().all(|&x| i32::try_from(x).is_ok()) {
                TensorData::I32(ints.into_iter().map(|x| x as i32).collect())
            } else {
                TensorData::I64(ints)
            }
        }
        Some(other) => return Err(EncodeError::UnsupportedLeaf(other.kind_name())),
    };

    Ok(Tensor::new(shape, data)?)
}

fn flatten_into<'a>(
    items: &'a [Value],
    shape: &[usize],
    depth: usize,
    out: &mut Vec<&'a Value>,
) -> Result<(), EncodeError> {
    if items.len() != shape[depth] {
        return Err(EncodeError::Ragged { depth });
    }

    let leaf_level = depth + 1 == shape.len();
    for item in items {
        match item {
            Value::List(inner) if !leaf_level => flatten_into(inner, shape, depth + 1, out)?,
            Value::List(_) => return Err(EncodeError::Ragged { depth: depth + 1 }),
            _ if leaf_level => out.push(item),
            _ => return Err(EncodeError::Ragged { depth }),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::DataType;
    use crate::tensor::parse_tensor;

    fn floats(rows: &[[f64; 3]]) -> Value {
        rows.iter().map(|row| row.iter().copied().collect::<Value>()).collect()
    }

    #[test]
    fn inference_follows_precedence() {
        let cases = [
            (Value::list([Value::bytes(*b"a")]), FeatureType::BytesList),
            (Value::list([1i64, 2]), FeatureType::Int64List),
            (Value::list([1.5f64]), FeatureType::FloatList),
            (Value::bytes(*b"png"), FeatureType::Bytes),
            (Value::Int(3), FeatureType::Int64),
            (Value::Float(0.5), FeatureType::Float),
            (Value::from("chair"), FeatureType::Str),
            (floats(&[[1.0, 2.0, 3.0]]), FeatureType::Nested),
            (Value::from(Tensor::from_vec(vec![1u8])), FeatureType::Ndarray),
            (Value::None, FeatureType::None),
            (Value::List(Vec::new()), FeatureType::None),
        ];

        for (value, expected) in cases {
            assert_eq!(infer_type(&value).unwrap(), expected, "{value:?}");
        }
    }

    #[test]
    fn unsupported_lists_are_rejected() {
        for value in [
            Value::list(["a", "b"]),
            Value::list([Value::None]),
            Value::list([Tensor::from_vec(vec![1i64])]),
        ] {
            assert!(matches!(
                to_feature(&value, None),
                Err(EncodeError::UnsupportedList(_))
            ));
        }
    }

    #[test]
    fn first_element_decides_and_the_rest_must_agree() {
        let value = Value::list([Value::Int(1), Value::Float(2.0)]);
        let err = to_feature(&value, None).unwrap_err();
        assert!(matches!(err, EncodeError::MixedList { index: 1, .. }));
    }

    #[test]
    fn scalars_become_single_element_lists() {
        assert_eq!(to_feature(&Value::Int(7), None).unwrap().int64_list(), Some(&[7][..]));
        assert_eq!(
            to_feature(&Value::Float(0.25), None).unwrap().float_list(),
            Some(&[0.25f32][..])
        );
        assert_eq!(
            to_feature(&Value::from("bed"), None).unwrap().bytes_list(),
            Some(&[b"bed".to_vec()][..])
        );
    }

    #[test]
    fn string_round_trips_through_utf8() {
        let original = "pix3d/img/chair/0001.png";
        let feature = to_feature(&Value::from(original), None).unwrap();
        let stored = &feature.bytes_list().unwrap()[0];
        assert_eq!(std::str::from_utf8(stored).unwrap(), original);
    }

    #[test]
    fn int_list_round_trips() {
        let original = vec![128i64, 128, 128];
        let feature = to_feature(&Value::list(original.clone()), None).unwrap();
        assert_eq!(feature.int64_list().unwrap(), original.as_slice());
    }

    #[test]
    fn nested_floats_become_float32_matrix() {
        let rows = [
            [0.7813941591465821, 0.00095539348511137, -0.6240370624208909],
            [0.17456672296585038, 0.9597407704535225, 0.2200547949085482],
            [0.5991240499968018, -0.2808856364297893, 0.749769052417384],
        ];
        let feature = to_feature(&floats(&rows), None).unwrap();

        let tensor = parse_tensor(&feature.bytes_list().unwrap()[0], DataType::Float).unwrap();
        assert_eq!(tensor.shape(), &[3, 3]);

        let expected: Vec<f32> = rows.iter().flatten().map(|&v| v as f32).collect();
        assert_eq!(tensor.data(), &TensorData::F32(expected));
    }

    #[test]
    fn nested_ints_become_int32_unless_too_wide() {
        let faces: Value = [[1i64, 2, 3], [3, 4, 1]]
            .iter()
            .map(|f| f.iter().copied().collect::<Value>())
            .collect();
        let feature = to_feature(&faces, None).unwrap();
        let tensor = parse_tensor(&feature.bytes_list().unwrap()[0], DataType::Int32).unwrap();
        assert_eq!(tensor.shape(), &[2, 3]);
        assert_eq!(tensor.data(), &TensorData::I32(vec![1, 2, 3, 3, 4, 1]));

        let wide = Value::list([Value::list([i64::from(i32::MAX) + 1])]);
        let feature = to_feature(&wide, None).unwrap();
        assert!(parse_tensor(&feature.bytes_list().unwrap()[0], DataType::Int64).is_ok());
    }

    #[test]
    fn ragged_nested_list_is_an_error() {
        let ragged = Value::list([Value::list([1i64, 2, 3]), Value::list([1i64, 2])]);
        assert!(matches!(
            to_feature(&ragged, None),
            Err(EncodeError::Ragged { depth: 1 })
        ));
    }

    #[test]
    fn arrays_keep_their_dtype() {
        let tensor = Tensor::from_rows(&[[-0.25f64, 0.5, 1.0]]);
        let feature = to_feature(&Value::from(tensor.clone()), None).unwrap();
        let parsed = parse_tensor(&feature.bytes_list().unwrap()[0], DataType::Double).unwrap();
        assert_eq!(parsed, tensor);
    }

    #[test]
    fn explicit_type_must_match_value() {
        let err = to_feature(&Value::from("7"), Some(FeatureType::Int64)).unwrap_err();
        assert!(matches!(err, EncodeError::TypeMismatch { expected: FeatureType::Int64, .. }));

        let err = to_feature(&Value::list([1.5f64]), Some(FeatureType::Int64List)).unwrap_err();
        assert!(matches!(err, EncodeError::MixedList { .. }));
    }

    #[test]
    fn explicit_float_list_widens_ints() {
        let feature = to_feature(&Value::list([1i64, 2]), Some(FeatureType::FloatList)).unwrap();
        assert_eq!(feature.float_list(), Some(&[1.0f32, 2.0][..]));
    }

    #[test]
    fn none_has_no_kind() {
        assert_eq!(to_feature(&Value::None, None).unwrap(), Feature::empty());
        assert_eq!(to_feature(&Value::List(Vec::new()), None).unwrap(), Feature::empty());
    }
}
