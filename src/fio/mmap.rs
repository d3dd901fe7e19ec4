use std::{fs::OpenOptions, path::Path};

use log::error;
use memmap2::Mmap;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Read-only memory map of a data file, used to speed up the startup scan.
pub struct MMapIO {
  // empty files are not mapped
  map: Option<Mmap>,
}

impl MMapIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let file = match OpenOptions::new().read(true).open(file_name.as_ref()) {
      Ok(file) => file,
      Err(e) => {
        error!("failed to open data file {:?}: {}", file_name.as_ref(), e);
        return Err(Errors::FailedToOpenDataFile);
      }
    };

    let len = match file.metadata() {
      Ok(meta) => meta.len(),
      Err(e) => {
        error!("failed to stat data file {:?}: {}", file_name.as_ref(), e);
        return Err(Errors::FailedToOpenDataFile);
      }
    };
    if len == 0 {
      return Ok(MMapIO { map: None });
    }

    // the file is never written through this mapping and data files are only
    // appended to, so mapped bytes stay stable
    match unsafe { Mmap::map(&file) } {
      Ok(map) => Ok(MMapIO { map: Some(map) }),
      Err(e) => {
        error!("failed to map data file {:?}: {}", file_name.as_ref(), e);
        Err(Errors::FailedToOpenDataFile)
      }
    }
  }
}

impl IOManager for MMapIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mapped: &[u8] = self.map.as_deref().unwrap_or(&[]);
    let Some(src) = usize::try_from(offset)
      .ok()
      .and_then(|start| mapped.get(start..start.checked_add(buf.len())?))
    else {
      return Err(Errors::ReadDataFileEOF);
    };
    buf.copy_from_slice(src);
    Ok(src.len())
  }

  fn write(&self, _buf: &[u8]) -> Result<usize> {
    Err(Errors::DataFileIsReadOnly)
  }

  fn sync(&self) -> Result<()> {
    Ok(())
  }

  fn size(&self) -> u64 {
    self.map.as_ref().map_or(0, |m| m.len() as u64)
  }

  fn truncate(&self, _len: u64) -> Result<()> {
    Err(Errors::DataFileIsReadOnly)
  }

  fn seal(&self) -> Result<()> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use crate::fio::file_io::FileIO;

  use super::*;

  #[test]
  fn test_mmap_positioned_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000001.db");

    std::fs::write(&path, b"").unwrap();
    let empty = MMapIO::new(&path).unwrap();
    assert_eq!(empty.size(), 0);
    let mut one = [0u8; 1];
    assert_eq!(empty.read(&mut one, 0), Err(Errors::ReadDataFileEOF));

    let fio = FileIO::new(&path).unwrap();
    for chunk in [&b"barrel"[..], b"-", b"record-bytes"] {
      fio.write(chunk).unwrap();
    }
    fio.sync().unwrap();

    let mapped = MMapIO::new(&path).unwrap();
    assert_eq!(mapped.size(), 19);

    let mut word = [0u8; 6];
    assert_eq!(mapped.read(&mut word, 7).unwrap(), 6);
    assert_eq!(&word, b"record");

    // reads never run past the mapping
    let mut tail = [0u8; 4];
    assert_eq!(mapped.read(&mut tail, 16), Err(Errors::ReadDataFileEOF));
    assert_eq!(mapped.read(&mut tail, u64::MAX), Err(Errors::ReadDataFileEOF));
  }

  #[test]
  fn test_mmap_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mmap-test.data");
    std::fs::write(&path, b"abc").unwrap();

    let mmap_io = MMapIO::new(&path).unwrap();
    assert_eq!(mmap_io.write(b"d"), Err(Errors::DataFileIsReadOnly));
    assert_eq!(mmap_io.truncate(0), Err(Errors::DataFileIsReadOnly));
    assert!(MMapIO::new(dir.path().join("missing.data")).is_err());
  }
}
