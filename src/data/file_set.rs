use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use log::info;

use crate::{errors::Result, option::IOManagerType};

use super::data_file::DataFile;

/// The data files of one engine: exactly one active file taking appends and
/// any number of immutable stale files, addressed by id.
///
/// Files are handed out as `Arc`s, so a reader holding one keeps reading even
/// after rotation or compaction has replaced it in the set.
pub struct FileSet {
  dir_path: PathBuf,
  active: Arc<DataFile>,
  stale: BTreeMap<u32, Arc<DataFile>>,
}

impl FileSet {
  pub fn new<P>(dir_path: P, active: DataFile, stale: Vec<DataFile>) -> Self
  where
    P: AsRef<Path>,
  {
    FileSet {
      dir_path: dir_path.as_ref().to_path_buf(),
      active: Arc::new(active),
      stale: stale
        .into_iter()
        .map(|f| (f.get_file_id(), Arc::new(f)))
        .collect(),
    }
  }

  pub fn current_writer(&self) -> Arc<DataFile> {
    self.active.clone()
  }

  pub fn get(&self, file_id: u32) -> Option<Arc<DataFile>> {
    if self.active.get_file_id() == file_id {
      return Some(self.active.clone());
    }
    self.stale.get(&file_id).cloned()
  }

  /// All files, oldest first; the active file is last.
  pub fn all_files(&self) -> Vec<Arc<DataFile>> {
    let mut files: Vec<_> = self.stale.values().cloned().collect();
    files.push(self.active.clone());
    files
  }

  pub fn file_num(&self) -> usize {
    self.stale.len() + 1
  }

  pub fn total_size(&self) -> u64 {
    self.stale.values().map(|f| f.get_write_off()).sum::<u64>() + self.active.get_write_off()
  }

  pub fn next_file_id(&self) -> u32 {
    self.active.get_file_id() + 1
  }

  pub fn is_empty(&self) -> bool {
    self.stale.is_empty() && self.active.get_write_off() == 0
  }

  /// Demotes the active file to stale and opens the next id as the new active file.
  pub fn rotate(&mut self) -> Result<Arc<DataFile>> {
    self.active.sync()?;

    let next = DataFile::new(
      &self.dir_path,
      self.next_file_id(),
      IOManagerType::StandardFileIO,
    )?;
    let old = std::mem::replace(&mut self.active, Arc::new(next));
    old.seal()?;
    info!(
      "rotated data file {} -> {}",
      old.get_file_id(),
      self.active.get_file_id()
    );
    self.stale.insert(old.get_file_id(), old);

    Ok(self.active.clone())
  }

  /// Replaces every tracked file with `active` and `stale`. Files that are not
  /// part of the new set are marked obsolete and disappear from disk once the
  /// last reader lets go of them.
  pub fn swap(&mut self, active: DataFile, stale: Vec<DataFile>) {
    let replacement = FileSet::new(&self.dir_path, active, stale);
    let previous = std::mem::replace(self, replacement);

    for old in previous.all_files() {
      if self.get(old.get_file_id()).is_none() {
        old.mark_obsolete();
      }
    }
  }
}
