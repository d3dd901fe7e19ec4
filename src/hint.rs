//! Hints snapshots: a serialized copy of the key directory that lets `open`
//! skip scanning the data files it covers.
//!
//! Layout, all integers little endian:
//!
//! ```text
//! magic "BKVH" | version u32 | covered file id u32 | covered offset u64 | count u64
//! count x ( key_len varint | key | LogRecordPos varints )
//! crc32 of everything above
//! ```
//!
//! The covered position is the end of the active file at the time the snapshot
//! was taken; records appended after it still have to be replayed. A snapshot is
//! only ever a cache: any decode failure makes the caller fall back to a full scan.

use std::{
  fs::{self, File},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use bytes::{Buf, BufMut, BytesMut};
use log::{error, info};
use prost::encoding::{decode_varint, encode_varint};

use crate::{
  data::{
    data_file::HINT_FILE_NAME,
    log_record::{decode_log_record_pos, LogRecordPos},
  },
  errors::{Errors, Result},
};

const HINTS_MAGIC: &[u8; 4] = b"BKVH";
const HINTS_VERSION: u32 = 1;
const HINTS_PREFIX_SIZE: usize = 4 + 4 + 4 + 8 + 8;
const HINTS_TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintsSnapshot {
  pub covered_file_id: u32,
  pub covered_offset: u64,
  pub entries: Vec<(Vec<u8>, LogRecordPos)>,
}

pub fn hints_file_path<P>(dir_path: P) -> PathBuf
where
  P: AsRef<Path>,
{
  dir_path.as_ref().join(HINT_FILE_NAME)
}

pub fn encode_hints(snapshot: &HintsSnapshot) -> Vec<u8> {
  let mut buf = BytesMut::with_capacity(HINTS_PREFIX_SIZE + snapshot.entries.len() * 32);
  buf.put_slice(HINTS_MAGIC);
  buf.put_u32_le(HINTS_VERSION);
  buf.put_u32_le(snapshot.covered_file_id);
  buf.put_u64_le(snapshot.covered_offset);
  buf.put_u64_le(snapshot.entries.len() as u64);

  for (key, pos) in snapshot.entries.iter() {
    encode_varint(key.len() as u64, &mut buf);
    buf.put_slice(key);
    buf.put_slice(&pos.encode());
  }

  let crc = crc32fast::hash(&buf);
  buf.put_u32_le(crc);
  buf.to_vec()
}

pub fn decode_hints(data: &[u8]) -> Result<HintsSnapshot> {
  if data.len() < HINTS_PREFIX_SIZE + 4 {
    return Err(Errors::InvalidHintsFile);
  }
  let (body, mut crc_buf) = data.split_at(data.len() - 4);
  if crc32fast::hash(body) != crc_buf.get_u32_le() {
    return Err(Errors::InvalidHintsFile);
  }

  let mut src = body;
  if &src[..4] != HINTS_MAGIC {
    return Err(Errors::InvalidHintsFile);
  }
  src.advance(4);
  if src.get_u32_le() != HINTS_VERSION {
    return Err(Errors::InvalidHintsFile);
  }
  let covered_file_id = src.get_u32_le();
  let covered_offset = src.get_u64_le();
  let count = src.get_u64_le();

  let mut entries = Vec::with_capacity(count.min(1 << 20) as usize);
  for _ in 0..count {
    let key_len = decode_varint(&mut src).map_err(|_| Errors::InvalidHintsFile)? as usize;
    if key_len > src.remaining() {
      return Err(Errors::InvalidHintsFile);
    }
    let key = src[..key_len].to_vec();
    src.advance(key_len);
    let pos = decode_log_record_pos(&mut src)?;
    entries.push((key, pos));
  }
  if src.has_remaining() {
    return Err(Errors::InvalidHintsFile);
  }

  Ok(HintsSnapshot {
    covered_file_id,
    covered_offset,
    entries,
  })
}

/// Writes a snapshot into `dir_path`, replacing any previous one atomically.
pub fn write_hints<P>(dir_path: P, snapshot: &HintsSnapshot) -> Result<()>
where
  P: AsRef<Path>,
{
  let path = hints_file_path(&dir_path);
  let mut tmp_name = path.clone().into_os_string();
  tmp_name.push(HINTS_TMP_SUFFIX);
  let tmp_path = PathBuf::from(tmp_name);

  let data = encode_hints(snapshot);
  let written = File::create(&tmp_path).and_then(|file| {
    let mut writer = BufWriter::new(file);
    writer.write_all(&data)?;
    writer.flush()?;
    writer.get_ref().sync_all()
  });
  if let Err(e) = written {
    error!("failed to write hints file {:?}: {}", tmp_path, e);
    let _ = fs::remove_file(&tmp_path);
    return Err(Errors::FailedToWriteToDataFile);
  }

  if let Err(e) = fs::rename(&tmp_path, &path) {
    error!("failed to install hints file {:?}: {}", path, e);
    return Err(Errors::FailedToRenameDatabaseFile);
  }

  info!(
    "wrote hints file with {} keys covering file {} up to {}",
    snapshot.entries.len(),
    snapshot.covered_file_id,
    snapshot.covered_offset
  );
  Ok(())
}

/// Loads the snapshot in `dir_path`. `Ok(None)` when there is none.
pub fn load_hints<P>(dir_path: P) -> Result<Option<HintsSnapshot>>
where
  P: AsRef<Path>,
{
  let path = hints_file_path(&dir_path);
  if !path.is_file() {
    return Ok(None);
  }
  let data = match fs::read(&path) {
    Ok(data) => data,
    Err(e) => {
      error!("failed to read hints file {:?}: {}", path, e);
      return Err(Errors::FailedToReadFromDataFile);
    }
  };
  decode_hints(&data).map(Some)
}

pub fn remove_hints<P>(dir_path: P) -> Result<()>
where
  P: AsRef<Path>,
{
  let path = hints_file_path(&dir_path);
  if !path.exists() {
    return Ok(());
  }
  if let Err(e) = fs::remove_file(&path) {
    error!("failed to remove hints file {:?}: {}", path, e);
    return Err(Errors::FailedToRemoveDataFile);
  }
  Ok(())
}
