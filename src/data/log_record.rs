use bytes::{Buf, BufMut, BytesMut};
use prost::encoding::{decode_varint, encode_varint};

use crate::errors::{Errors, Result};

/// checksum, timestamp, expiry, key_size, val_size; all u32 little endian.
pub const HEADER_SIZE: usize = 20;

/// Reserved expiry marking a record as a deletion.
pub const TOMBSTONE_EXPIRY: u32 = u32::MAX;

/// Expiry value of a record that never expires.
pub const NO_EXPIRY: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
  pub checksum: u32,
  pub timestamp: u32,
  pub expiry: u32,
  pub key_size: u32,
  pub val_size: u32,
}

impl RecordHeader {
  pub fn encode(&self) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    let mut dst = &mut buf[..];
    dst.put_u32_le(self.checksum);
    dst.put_u32_le(self.timestamp);
    dst.put_u32_le(self.expiry);
    dst.put_u32_le(self.key_size);
    dst.put_u32_le(self.val_size);
    buf
  }

  /// Size of the whole record this header starts.
  pub fn record_size(&self) -> u64 {
    HEADER_SIZE as u64 + self.key_size as u64 + self.val_size as u64
  }

  pub fn is_tombstone(&self) -> bool {
    self.expiry == TOMBSTONE_EXPIRY
  }
}

/// Parses the fixed header at the front of `bytes` and returns it together
/// with whatever follows it.
pub fn decode(bytes: &[u8]) -> Result<(RecordHeader, &[u8])> {
  if bytes.len() < HEADER_SIZE {
    return Err(Errors::MalformedRecord);
  }
  let mut src = &bytes[..HEADER_SIZE];
  let header = RecordHeader {
    checksum: src.get_u32_le(),
    timestamp: src.get_u32_le(),
    expiry: src.get_u32_le(),
    key_size: src.get_u32_le(),
    val_size: src.get_u32_le(),
  };
  Ok((header, &bytes[HEADER_SIZE..]))
}

/// Recomputes the checksum of a decoded record and compares it to the header.
pub fn verify(header: &RecordHeader, key: &[u8], value: &[u8]) -> bool {
  key.len() == header.key_size as usize
    && value.len() == header.val_size as usize
    && checksum(header.timestamp, header.expiry, key, value) == header.checksum
}

// covers every header field after the checksum itself, then key and value
fn checksum(timestamp: u32, expiry: u32, key: &[u8], value: &[u8]) -> u32 {
  let mut hasher = crc32fast::Hasher::new();
  hasher.update(&timestamp.to_le_bytes());
  hasher.update(&expiry.to_le_bytes());
  hasher.update(&(key.len() as u32).to_le_bytes());
  hasher.update(&(value.len() as u32).to_le_bytes());
  hasher.update(key);
  hasher.update(value);
  hasher.finalize()
}

/// A single write persisted to a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
  pub key: Vec<u8>,
  pub value: Vec<u8>,
  pub timestamp: u32,
  pub expiry: u32,
}

impl LogRecord {
  pub fn tombstone(key: Vec<u8>, timestamp: u32) -> Self {
    LogRecord {
      key,
      value: Vec::new(),
      timestamp,
      expiry: TOMBSTONE_EXPIRY,
    }
  }

  pub fn is_tombstone(&self) -> bool {
    self.expiry == TOMBSTONE_EXPIRY
  }

  pub fn is_expired(&self, now: u32) -> bool {
    !self.is_tombstone() && self.expiry != NO_EXPIRY && self.expiry <= now
  }

  pub fn encoded_len(&self) -> usize {
    HEADER_SIZE + self.key.len() + self.value.len()
  }

  pub fn header(&self) -> Result<RecordHeader> {
    let key_size = u32::try_from(self.key.len()).map_err(|_| Errors::KeyTooLarge)?;
    let val_size = u32::try_from(self.value.len()).map_err(|_| Errors::ValueTooLarge)?;
    Ok(RecordHeader {
      checksum: checksum(self.timestamp, self.expiry, &self.key, &self.value),
      timestamp: self.timestamp,
      expiry: self.expiry,
      key_size,
      val_size,
    })
  }

  /// Serializes header, key and value back to back with no padding.
  pub fn encode(&self) -> Result<Vec<u8>> {
    let header = self.header()?;
    let mut buf = BytesMut::with_capacity(self.encoded_len());
    buf.put_slice(&header.encode());
    buf.put_slice(&self.key);
    buf.put_slice(&self.value);
    Ok(buf.to_vec())
  }
}

/// A record read back from a data file together with its on-disk size.
#[derive(Debug)]
pub struct ReadLogRecord {
  pub record: LogRecord,
  pub size: u64,
}

/// Location of the newest record for a key, held by the key directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordPos {
  pub file_id: u32,
  /// Start offset of the record in its file.
  pub offset: u64,
  pub size: u32,
  pub timestamp: u32,
  pub expiry: u32,
}

impl LogRecordPos {
  pub fn is_expired(&self, now: u32) -> bool {
    self.expiry != NO_EXPIRY && self.expiry != TOMBSTONE_EXPIRY && self.expiry <= now
  }

  pub fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_varint(self.file_id as u64, &mut buf);
    encode_varint(self.offset, &mut buf);
    encode_varint(self.size as u64, &mut buf);
    encode_varint(self.timestamp as u64, &mut buf);
    encode_varint(self.expiry as u64, &mut buf);
    buf.to_vec()
  }
}

/// Decodes a position written by [`LogRecordPos::encode`], advancing `buf`.
pub fn decode_log_record_pos<B: Buf>(buf: &mut B) -> Result<LogRecordPos> {
  let mut next = |max: u64| -> Result<u64> {
    match decode_varint(&mut *buf) {
      Ok(v) if v <= max => Ok(v),
      _ => Err(Errors::InvalidHintsFile),
    }
  };
  Ok(LogRecordPos {
    file_id: next(u32::MAX as u64)? as u32,
    offset: next(u64::MAX)?,
    size: next(u32::MAX as u64)? as u32,
    timestamp: next(u32::MAX as u64)? as u32,
    expiry: next(u32::MAX as u64)? as u32,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(key: &[u8], value: &[u8]) -> LogRecord {
    LogRecord {
      key: key.to_vec(),
      value: value.to_vec(),
      timestamp: 1_700_000_000,
      expiry: NO_EXPIRY,
    }
  }

  #[test]
  fn test_log_record_encode_layout() {
    let rec = record(b"name", b"barrelkv");
    let enc = rec.encode().unwrap();
    assert_eq!(enc.len(), HEADER_SIZE + 4 + 8);

    assert_eq!(&enc[4..8], &1_700_000_000u32.to_le_bytes());
    assert_eq!(&enc[8..12], &0u32.to_le_bytes());
    assert_eq!(&enc[12..16], &4u32.to_le_bytes());
    assert_eq!(&enc[16..20], &8u32.to_le_bytes());
    assert_eq!(&enc[20..24], b"name");
    assert_eq!(&enc[24..], b"barrelkv");

    // deterministic
    assert_eq!(enc, rec.encode().unwrap());
  }

  #[test]
  fn test_log_record_decode_verify() {
    let rec = record(b"name", b"barrelkv");
    let enc = rec.encode().unwrap();

    let (header, rest) = decode(&enc).unwrap();
    assert_eq!(header.record_size(), enc.len() as u64);
    assert!(!header.is_tombstone());
    assert!(verify(&header, &rest[..4], &rest[4..]));

    // flip a value byte
    let mut bad = enc.clone();
    *bad.last_mut().unwrap() ^= 0xff;
    let (header, rest) = decode(&bad).unwrap();
    assert!(!verify(&header, &rest[..4], &rest[4..]));

    // flip a key byte
    let mut bad = enc.clone();
    bad[HEADER_SIZE] ^= 0x01;
    let (header, rest) = decode(&bad).unwrap();
    assert!(!verify(&header, &rest[..4], &rest[4..]));

    // flip the expiry
    let mut bad = enc;
    bad[8] = 1;
    let (header, rest) = decode(&bad).unwrap();
    assert!(!verify(&header, &rest[..4], &rest[4..]));
  }

  #[test]
  fn test_log_record_decode_short_header() {
    assert_eq!(decode(&[0u8; 19]).err(), Some(Errors::MalformedRecord));
    assert_eq!(decode(&[0u8; 0]).err(), Some(Errors::MalformedRecord));
  }

  #[test]
  fn test_log_record_empty_value_and_tombstone() {
    let rec = record(b"k", b"");
    let enc = rec.encode().unwrap();
    let (header, rest) = decode(&enc).unwrap();
    assert_eq!(header.val_size, 0);
    assert!(!header.is_tombstone());
    assert!(verify(&header, rest, b""));

    let del = LogRecord::tombstone(b"k".to_vec(), 5);
    assert!(del.is_tombstone());
    assert!(!del.is_expired(u32::MAX));
    let (header, _) = decode(&del.encode().unwrap()).unwrap();
    assert!(header.is_tombstone());
  }

  #[test]
  fn test_log_record_expiry() {
    let mut rec = record(b"k", b"v");
    assert!(!rec.is_expired(u32::MAX - 1));
    rec.expiry = 100;
    assert!(!rec.is_expired(99));
    assert!(rec.is_expired(100));
  }

  #[test]
  fn test_log_record_pos_encode_decode() {
    let pos = LogRecordPos {
      file_id: 3,
      offset: 1 << 40,
      size: 1234,
      timestamp: 1_700_000_000,
      expiry: TOMBSTONE_EXPIRY - 1,
    };
    let enc = pos.encode();
    let mut src = &enc[..];
    assert_eq!(decode_log_record_pos(&mut src).unwrap(), pos);
    assert!(src.is_empty());

    let mut short = &enc[..2];
    assert_eq!(decode_log_record_pos(&mut short), Err(Errors::InvalidHintsFile));
  }
}
