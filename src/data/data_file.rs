use std::{
  fs,
  path::{Path, PathBuf},
  sync::atomic::{AtomicBool, Ordering},
};

use log::{debug, error};
use parking_lot::RwLock;

use crate::{
  errors::{Errors, Result},
  fio::{new_io_manager, IOManager},
  option::IOManagerType,
};

use super::log_record::{self, LogRecord, ReadLogRecord, RecordHeader, HEADER_SIZE};

pub const DATA_FILE_NAME_SUFFIX: &str = ".db";
pub const HINT_FILE_NAME: &str = "hints.dat";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";

/// One append-only data file: appends go through the write handle, reads are
/// positioned and never consult the write offset.
pub struct DataFile {
  file_id: u32,
  path: PathBuf,
  write_off: RwLock<u64>,
  io_manager: Box<dyn IOManager>,
  // removed from disk when the last reference goes away
  obsolete: AtomicBool,
}

impl DataFile {
  pub fn new<P>(dir_path: P, file_id: u32, io_type: IOManagerType) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let path = get_data_file_name(&dir_path, file_id);
    let io_manager = new_io_manager(&path, io_type)?;
    let write_off = io_manager.size();

    Ok(DataFile {
      file_id,
      path,
      write_off: RwLock::new(write_off),
      io_manager,
      obsolete: AtomicBool::new(false),
    })
  }

  pub fn get_file_id(&self) -> u32 {
    self.file_id
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn get_write_off(&self) -> u64 {
    *self.write_off.read()
  }

  /// Appends `buf` and returns the offset the write began at.
  pub fn append(&self, buf: &[u8]) -> Result<u64> {
    let mut write_off = self.write_off.write();
    let start = *write_off;
    let n_bytes = self.io_manager.write(buf)?;
    *write_off += n_bytes as u64;
    Ok(start)
  }

  pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    self.io_manager.read(&mut buf, offset)?;
    Ok(buf)
  }

  /// Reads only the record header at `offset`.
  pub fn read_header(&self, offset: u64) -> Result<RecordHeader> {
    let size = self.io_manager.size();
    if offset >= size {
      return Err(Errors::ReadDataFileEOF);
    }
    if offset + HEADER_SIZE as u64 > size {
      return Err(Errors::TruncatedRecord);
    }
    let buf = self.read_at(offset, HEADER_SIZE)?;
    let (header, _) = log_record::decode(&buf)?;
    Ok(header)
  }

  /// Reads and verifies the record starting at `offset` when its size is not
  /// known up front, as during a sequential scan.
  pub fn read_log_record(&self, offset: u64) -> Result<ReadLogRecord> {
    let header = self.read_header(offset)?;
    let size = header.record_size();
    if offset + size > self.io_manager.size() {
      return Err(Errors::TruncatedRecord);
    }

    let body = self.read_at(
      offset + HEADER_SIZE as u64,
      header.key_size as usize + header.val_size as usize,
    )?;
    let record = into_log_record(&header, body)?;
    Ok(ReadLogRecord { record, size })
  }

  /// Reads and verifies a record whose location came from the key directory.
  pub fn read_log_record_sized(&self, offset: u64, size: u32) -> Result<LogRecord> {
    if (size as usize) < HEADER_SIZE {
      return Err(Errors::MalformedRecord);
    }
    let buf = match self.read_at(offset, size as usize) {
      Ok(buf) => buf,
      Err(Errors::ReadDataFileEOF) => return Err(Errors::TruncatedRecord),
      Err(e) => return Err(e),
    };
    let (header, rest) = log_record::decode(&buf)?;
    if header.record_size() != size as u64 {
      return Err(Errors::CorruptRecord);
    }
    into_log_record(&header, rest.to_vec())
  }

  pub fn sync(&self) -> Result<()> {
    self.io_manager.sync()
  }

  /// Drops the write handle once this file is no longer the active one.
  pub fn seal(&self) -> Result<()> {
    self.io_manager.seal()
  }

  /// Cuts an incomplete trailing record off the file.
  pub fn truncate(&self, len: u64) -> Result<()> {
    let mut write_off = self.write_off.write();
    self.io_manager.truncate(len)?;
    *write_off = len;
    Ok(())
  }

  pub fn set_io_manager<P>(&mut self, dir_path: P, io_type: IOManagerType) -> Result<()>
  where
    P: AsRef<Path>,
  {
    self.io_manager = new_io_manager(get_data_file_name(dir_path, self.file_id), io_type)?;
    Ok(())
  }

  /// Deletes the file from disk once the last reference to it is dropped.
  pub fn mark_obsolete(&self) {
    self.obsolete.store(true, Ordering::SeqCst);
  }
}

impl Drop for DataFile {
  fn drop(&mut self) {
    if !self.obsolete.load(Ordering::SeqCst) {
      return;
    }
    match fs::remove_file(&self.path) {
      Ok(()) => debug!("removed obsolete data file {:?}", self.path),
      Err(e) => error!("failed to remove obsolete data file {:?}: {}", self.path, e),
    }
  }
}

fn into_log_record(header: &RecordHeader, mut body: Vec<u8>) -> Result<LogRecord> {
  let key_size = header.key_size as usize;
  if body.len() != key_size + header.val_size as usize {
    return Err(Errors::TruncatedRecord);
  }
  let value = body.split_off(key_size);
  if !log_record::verify(header, &body, &value) {
    return Err(Errors::CorruptRecord);
  }
  Ok(LogRecord {
    key: body,
    value,
    timestamp: header.timestamp,
    expiry: header.expiry,
  })
}

pub fn get_data_file_name<P>(dir_path: P, file_id: u32) -> PathBuf
where
  P: AsRef<Path>,
{
  let name = std::format!("{:06}{}", file_id, DATA_FILE_NAME_SUFFIX);
  dir_path.as_ref().join(name)
}

/// Parses the id out of a data file name such as `000042.db`.
pub fn parse_data_file_id(file_name: &str) -> Option<u32> {
  file_name
    .strip_suffix(DATA_FILE_NAME_SUFFIX)
    .and_then(|stem| stem.parse::<u32>().ok())
}
