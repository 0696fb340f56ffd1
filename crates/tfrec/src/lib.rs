//! TFREC: TFRecord container files holding `tf.train.Example` protobufs.
//!
//! - `record`: the on-disk framing, one record after another.
//! - `proto`: `Example`, `Feature` and `TensorProto` messages (prost derive).
//! - `tensor`: dense tensors and their serialized `TensorProto` blobs,
//!   compatible with `tf.io.serialize_tensor` / `tf.io.parse_tensor`.
//! - `feature`: the value → `Feature` encoder with type inference.
//!
//! Record layout (little-endian):
//!   00  : u64     length
//!   08  : u32     masked crc32c of the 8 length bytes
//!   0C  : [u8]    data (length bytes)
//!   ..  : u32     masked crc32c of data
//!
//! Masked crc: `((crc >> 15) | (crc << 17)) + 0xa282ead8` (wrapping).

pub mod feature;
pub mod proto;
pub mod record;
pub mod tensor;

pub use feature::{infer_type, to_feature, EncodeError, FeatureType, Value};
pub use proto::{DataType, Example, Feature, Features};
pub use record::{parse_records, read_examples, read_records, RecordWriter};
pub use tensor::{parse_tensor, Element, Tensor, TensorData, TensorError};
