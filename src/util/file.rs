use std::path::Path;

use log::warn;

/// Total bytes used by everything under `dir_path`, 0 when it can not be read.
pub fn dir_disk_size<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  match fs_extra::dir::get_size(dir_path.as_ref()) {
    Ok(size) => size,
    Err(e) => {
      warn!("failed to get size of {:?}: {}", dir_path.as_ref(), e);
      0
    }
  }
}

/// Free bytes on the filesystem holding `dir_path`.
pub fn available_disk_space<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  match fs2::available_space(dir_path.as_ref()) {
    Ok(size) => size,
    Err(e) => {
      warn!("failed to get available space of {:?}: {}", dir_path.as_ref(), e);
      0
    }
  }
}
