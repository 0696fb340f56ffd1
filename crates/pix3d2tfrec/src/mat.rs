//! Reader for MATLAB level-5 `.mat` files, numeric arrays only.
//!
//! File layout:
//!   000 : [u8;116] descriptive text
//!   074 : [u8;8]   subsystem data offset
//!   07C : u16      version (0x0100)
//!   07E : [u8;2]   endian indicator, b"IM" = little-endian, b"MI" = big-endian
//!   080 : data elements, each `u32 type | u32 nbytes | payload | pad to 8`
//!
//! Small elements pack `nbytes << 16 | type` into the first word and carry up
//! to four payload bytes in the second. `miCOMPRESSED` payloads are a zlib
//! stream holding further elements. Array data stays in MATLAB's column-major
//! order.

use log::debug;
use thiserror::Error;

const HEADER_LEN: usize = 128;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MI_UTF8: u32 = 16;

/// Numeric array classes, `mxDOUBLE_CLASS` (6) through `mxUINT64_CLASS` (15).
const NUMERIC_CLASSES: std::ops::RangeInclusive<u8> = 6..=15;

#[derive(Debug, Error)]
pub enum MatError {
    #[error("not a level-5 MAT file: {0}")]
    BadHeader(&'static str),

    #[error("truncated MAT data")]
    Truncated,

    #[error("malformed matrix element: {0}")]
    Malformed(&'static str),

    #[error("unsupported MAT data type {0}")]
    UnsupportedType(u32),

    #[error("failed to inflate compressed element: {0}")]
    Inflate(String),
}

/// One named numeric array. `real` is column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct MatArray {
    pub name: String,
    pub dims: Vec<usize>,
    pub class: u8,
    pub real: Vec<f64>,
}

impl MatArray {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatFile {
    pub arrays: Vec<MatArray>,
}

impl MatFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, MatError> {
        if bytes.len() < HEADER_LEN {
            return Err(MatError::BadHeader("shorter than the 128-byte header"));
        }

        if bytes.starts_with(b"\x89HDF") || bytes[HEADER_LEN..].starts_with(b"\x89HDF") {
            return Err(MatError::BadHeader("v7.3 (HDF5) files are not supported"));
        }

        let big_endian = match &bytes[126..128] {
            b"IM" => false,
            b"MI" => true,
            _ => return Err(MatError::BadHeader("missing endian indicator")),
        };

        let mut arrays = Vec::new();
        read_elements(
            &mut Reader {
                buf: &bytes[HEADER_LEN..],
                big_endian,
            },
            &mut arrays,
        )?;

        Ok(Self { arrays })
    }

    pub fn get(&self, name: &str) -> Option<&MatArray> {
        self.arrays.iter().find(|a| a.name == name)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    big_endian: bool,
}

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MatError> {
        if self.buf.len() < n {
            return Err(MatError::Truncated);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, MatError> {
        let b: [u8; 4] = self.take(4)?.try_into().map_err(|_| MatError::Truncated)?;
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    /// Next element as `(type, payload)`, consuming its padding.
    fn element(&mut self) -> Result<(u32, &'a [u8]), MatError> {
        let first = self.u32()?;

        if first >> 16 != 0 {
            // Small element: payload lives in the remaining 4 bytes of the tag.
            let ty = first & 0xffff;
            let len = (first >> 16) as usize;
            if len > 4 {
                return Err(MatError::Malformed("small element longer than 4 bytes"));
            }
            let slot = self.take(4)?;
            return Ok((ty, &slot[..len]));
        }

        let ty = first;
        let len = self.u32()? as usize;
        let payload = self.take(len)?;

        // Compressed elements are not padded.
        if ty != MI_COMPRESSED {
            let pad = (8 - len % 8) % 8;
            let pad = pad.min(self.buf.len());
            self.take(pad)?;
        }

        Ok((ty, payload))
    }
}

fn read_elements(reader: &mut Reader<'_>, arrays: &mut Vec<MatArray>) -> Result<(), MatError> {
    while !reader.is_empty() {
        let (ty, payload) = reader.element()?;

        match ty {
            MI_COMPRESSED => {
                let inflated = miniz_oxide::inflate::decompress_to_vec_zlib(payload)
                    .map_err(|e| MatError::Inflate(format!("{:?}", e.status)))?;
                read_elements(
                    &mut Reader {
                        buf: &inflated,
                        big_endian: reader.big_endian,
                    },
                    arrays,
                )?;
            }
            MI_MATRIX => {
                let mut sub = Reader {
                    buf: payload,
                    big_endian: reader.big_endian,
                };
                if let Some(array) = read_matrix(&mut sub)? {
                    arrays.push(array);
                }
            }
            other => debug!("skipping top-level MAT element of type {other}"),
        }
    }

    Ok(())
}

fn read_matrix(reader: &mut Reader<'_>) -> Result<Option<MatArray>, MatError> {
    // An empty matrix element stands for `[]` with no further sub-elements.
    if reader.is_empty() {
        return Ok(None);
    }

    let (flags_ty, flags) = reader.element()?;
    if flags_ty != MI_UINT32 || flags.len() < 4 {
        return Err(MatError::Malformed("array flags"));
    }
    let flags_word = decode_numeric(MI_UINT32, &flags[..4], reader.big_endian)?[0] as u32;
    let class = (flags_word & 0xff) as u8;

    let (dims_ty, dims_raw) = reader.element()?;
    if dims_ty != MI_INT32 {
        return Err(MatError::Malformed("dimensions"));
    }
    let dims = decode_numeric(MI_INT32, dims_raw, reader.big_endian)?
        .into_iter()
        .map(|d| {
            if d < 0.0 {
                Err(MatError::Malformed("negative dimension"))
            } else {
                Ok(d as usize)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (name_ty, name_raw) = reader.element()?;
    if name_ty != MI_INT8 && name_ty != MI_UTF8 {
        return Err(MatError::Malformed("array name"));
    }
    let name = String::from_utf8_lossy(name_raw).into_owned();

    if !NUMERIC_CLASSES.contains(&class) {
        debug!("skipping non-numeric MAT array {name:?} (class {class})");
        return Ok(None);
    }

    let (real_ty, real_raw) = reader.element()?;
    let real = decode_numeric(real_ty, real_raw, reader.big_endian)?;

    let expected = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or(MatError::Malformed("dimensions overflow"))?;
    if real.len() != expected {
        return Err(MatError::Malformed("element count does not match dimensions"));
    }

    Ok(Some(MatArray {
        name,
        dims,
        class,
        real,
    }))
}

macro_rules! decode_as {
    ($raw:expr, $ty:ty, $big:expr) => {{
        const W: usize = std::mem::size_of::<$ty>();
        if $raw.len() % W != 0 {
            return Err(MatError::Malformed("payload length is not a multiple of the element size"));
        }
        $raw.chunks_exact(W)
            .map(|c| {
                let mut b = [0u8; W];
                b.copy_from_slice(c);
                let v = if $big { <$ty>::from_be_bytes(b) } else { <$ty>::from_le_bytes(b) };
                v as f64
            })
            .collect::<Vec<f64>>()
    }};
}

/// Decode a numeric payload of MAT data type `ty` into `f64`s.
fn decode_numeric(ty: u32, raw: &[u8], big_endian: bool) -> Result<Vec<f64>, MatError> {
    let values = match ty {
        MI_INT8 => decode_as!(raw, i8, big_endian),
        MI_UINT8 => decode_as!(raw, u8, big_endian),
        MI_INT16 => decode_as!(raw, i16, big_endian),
        MI_UINT16 => decode_as!(raw, u16, big_endian),
        MI_INT32 => decode_as!(raw, i32, big_endian),
        MI_UINT32 => decode_as!(raw, u32, big_endian),
        MI_SINGLE => decode_as!(raw, f32, big_endian),
        MI_DOUBLE => decode_as!(raw, f64, big_endian),
        MI_INT64 => decode_as!(raw, i64, big_endian),
        MI_UINT64 => decode_as!(raw, u64, big_endian),
        other => return Err(MatError::UnsupportedType(other)),
    };

    Ok(values)
}
