//! TFRecord framing: `u64 len | u32 crc(len) | data | u32 crc(data)`.

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;

use log::debug;
use prost::Message;

use crate::proto::Example;

const MASK_DELTA: u32 = 0xa282_ead8;

#[inline]
pub fn masked_crc32c(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Sequential writer of framed records.
pub struct RecordWriter<W: Write> {
    inner: W,
    count: usize,
}

impl RecordWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn write_record(&mut self, data: &[u8]) -> io::Result<()> {
        let len = (data.len() as u64).to_le_bytes();

        self.inner.write_all(&len)?;
        self.inner.write_all(&masked_crc32c(&len).to_le_bytes())?;
        self.inner.write_all(data)?;
        self.inner.write_all(&masked_crc32c(data).to_le_bytes())?;

        self.count += 1;
        Ok(())
    }

    pub fn write_example(&mut self, example: &Example) -> io::Result<()> {
        self.write_record(&example.encode_to_vec())
    }

    /// Number of records written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    if buf.len() < n {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated record"));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Split a whole TFRecord file into its payloads, verifying both checksums.
pub fn parse_records(mut p: &[u8]) -> io::Result<Vec<Vec<u8>>> {
    let mut records = Vec::new();

    while !p.is_empty() {
        let len_bytes = take(&mut p, 8)?;
        if le_u32(&mut p)? != masked_crc32c(len_bytes) {
            return Err(bad("record length checksum mismatch"));
        }

        let mut raw = [0u8; 8];
        raw.copy_from_slice(len_bytes);
        let len = usize::try_from(u64::from_le_bytes(raw))
            .map_err(|_| bad("record length overflows usize"))?;

        let data = take(&mut p, len)?;
        if le_u32(&mut p)? != masked_crc32c(data) {
            return Err(bad("record data checksum mismatch"));
        }

        records.push(data.to_vec());
    }

    Ok(records)
}

pub fn read_records<P: AsRef<Path>>(path: P) -> io::Result<Vec<Vec<u8>>> {
    let path = path.as_ref();
    let records = parse_records(&std::fs::read(path)?)?;
    debug!("{}: {} records", path.display(), records.len());
    Ok(records)
}

pub fn read_examples<P: AsRef<Path>>(path: P) -> io::Result<Vec<Example>> {
    read_records(path)?
        .iter()
        .map(|record| {
            Example::from_bytes(record).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::proto::Feature;

    #[test]
    fn masked_crc_matches_reference_value() {
        // crc32c("") == 0, so the masked value is the mask delta itself.
        assert_eq!(masked_crc32c(b""), MASK_DELTA);
        // crc32c("123456789") == 0xe3069283
        let crc = 0xe306_9283u32;
        assert_eq!(
            masked_crc32c(b"123456789"),
            ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
        );
    }

    #[test]
    fn records_are_framed_and_recovered_in_order() {
        let mut writer = RecordWriter::new(Vec::new());
        writer.write_record(b"first").unwrap();
        writer.write_record(b"").unwrap();
        writer.write_record(&[7u8; 300]).unwrap();
        assert_eq!(writer.count(), 3);

        let bytes = writer.finish().unwrap();
        assert_eq!(bytes.len(), 3 * 16 + 5 + 300);

        let records = parse_records(&bytes).unwrap();
        assert_eq!(records, vec![b"first".to_vec(), Vec::new(), vec![7u8; 300]]);
    }

    #[test]
    fn corrupted_payload_is_detected() {
        let mut writer = RecordWriter::new(Vec::new());
        writer.write_record(b"payload").unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes[12] ^= 0xff;

        let err = parse_records(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_file_is_detected() {
        let mut writer = RecordWriter::new(Vec::new());
        writer.write_record(b"payload").unwrap();
        let bytes = writer.finish().unwrap();

        let err = parse_records(&bytes[..bytes.len() - 2]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn examples_round_trip() {
        let mut features = BTreeMap::new();
        features.insert("image/height".to_owned(), Feature::from_int64_list(vec![480]));
        features.insert("image/format".to_owned(), Feature::from_bytes_list(vec![b"png".to_vec()]));
        let example = Example::from_features(features);

        let mut writer = RecordWriter::new(Vec::new());
        writer.write_example(&example).unwrap();
        let bytes = writer.finish().unwrap();

        let records = parse_records(&bytes).unwrap();
        let decoded = Example::from_bytes(&records[0]).unwrap();
        assert_eq!(decoded, example);
        assert_eq!(decoded.get("image/height").unwrap().int64_list(), Some(&[480][..]));
    }
}
