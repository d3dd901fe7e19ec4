use std::{
  fs::{File, OpenOptions},
  io::{ErrorKind, Write},
  os::unix::fs::FileExt,
  path::Path,
};

use log::error;
use parking_lot::Mutex;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Standard file I/O with a dedicated append handle and an independent read handle.
pub struct FileIO {
  reader: File,
  writer: Mutex<Option<File>>,
}

impl FileIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let writer = match OpenOptions::new()
      .create(true)
      .append(true)
      .open(file_name.as_ref())
    {
      Ok(file) => file,
      Err(e) => {
        error!("failed to open data file {:?} for append: {}", file_name.as_ref(), e);
        return Err(Errors::FailedToOpenDataFile);
      }
    };

    let reader = match OpenOptions::new().read(true).open(file_name.as_ref()) {
      Ok(file) => file,
      Err(e) => {
        error!("failed to open data file {:?} for read: {}", file_name.as_ref(), e);
        return Err(Errors::FailedToOpenDataFile);
      }
    };

    Ok(FileIO {
      reader,
      writer: Mutex::new(Some(writer)),
    })
  }
}

impl IOManager for FileIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    match self.reader.read_exact_at(buf, offset) {
      Ok(()) => Ok(buf.len()),
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Errors::ReadDataFileEOF),
      Err(e) => {
        error!("read from data file error: {}", e);
        Err(Errors::FailedToReadFromDataFile)
      }
    }
  }

  fn write(&self, buf: &[u8]) -> Result<usize> {
    let mut guard = self.writer.lock();
    let Some(writer) = guard.as_mut() else {
      return Err(Errors::DataFileIsReadOnly);
    };
    if let Err(e) = writer.write_all(buf) {
      error!("write to data file error: {}", e);
      return Err(Errors::FailedToWriteToDataFile);
    }
    Ok(buf.len())
  }

  fn sync(&self) -> Result<()> {
    let guard = self.writer.lock();
    if let Some(writer) = guard.as_ref() {
      if let Err(e) = writer.sync_all() {
        error!("failed to sync data file: {}", e);
        return Err(Errors::FailedToSyncDataFile);
      }
    }
    Ok(())
  }

  fn size(&self) -> u64 {
    match self.reader.metadata() {
      Ok(meta) => meta.len(),
      Err(e) => {
        error!("failed to stat data file: {}", e);
        0
      }
    }
  }

  fn truncate(&self, len: u64) -> Result<()> {
    let guard = self.writer.lock();
    let Some(writer) = guard.as_ref() else {
      return Err(Errors::DataFileIsReadOnly);
    };
    if let Err(e) = writer.set_len(len) {
      error!("failed to truncate data file: {}", e);
      return Err(Errors::FailedToWriteToDataFile);
    }
    Ok(())
  }

  fn seal(&self) -> Result<()> {
    let mut guard = self.writer.lock();
    if let Some(writer) = guard.take() {
      if let Err(e) = writer.sync_all() {
        error!("failed to sync data file while sealing: {}", e);
        *guard = Some(writer);
        return Err(Errors::FailedToSyncDataFile);
      }
    }
    Ok(())
  }
}
