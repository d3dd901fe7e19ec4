pub mod file_io;
pub mod mmap;

use std::path::Path;

use crate::{errors::Result, option::IOManagerType};

use self::{file_io::FileIO, mmap::MMapIO};

/// Abstract I/O management interface for different I/O implementations.
pub trait IOManager: Sync + Send {
  /// Positioned read filling `buf` from `offset`, independent of any write position.
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

  /// Appends `buf` to the end of the file.
  fn write(&self, buf: &[u8]) -> Result<usize>;

  fn sync(&self) -> Result<()>;

  fn size(&self) -> u64;

  /// Cuts the file back to `len` bytes, dropping a partially written tail.
  fn truncate(&self, len: u64) -> Result<()>;

  /// Closes the write handle. Reads keep working.
  fn seal(&self) -> Result<()>;
}

pub fn new_io_manager<P>(filename: P, io_type: IOManagerType) -> Result<Box<dyn IOManager>>
where
  P: AsRef<Path>,
{
  match io_type {
    IOManagerType::StandardFileIO => Ok(Box::new(FileIO::new(filename)?)),
    IOManagerType::MemoryMap => Ok(Box::new(MMapIO::new(filename)?)),
  }
}
