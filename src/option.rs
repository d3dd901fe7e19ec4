use lazy_static::lazy_static;
use std::{path::PathBuf, time::Duration};

lazy_static! {
  pub static ref DEFAULT_DIR_PATH: PathBuf = std::env::temp_dir().join("barrelkv");
}

#[derive(Debug, Clone)]
pub struct Options {
  pub dir_path: PathBuf,

  /// Size in bytes the active data file may reach before it is rotated.
  pub data_file_size: u64,

  pub sync_writes: bool,

  /// Sync the active file once this many bytes are unsynced, 0 disables it.
  pub bytes_per_sync: usize,

  pub index_type: IndexType,

  pub mmap_at_startup: bool,

  /// Reclaimable/total ratio the periodic cycle waits for before compacting.
  pub file_merge_threshold: f32,

  /// Period of the background compaction and expiry sweep, `None` disables it.
  pub compaction_interval: Option<Duration>,

  /// TTL applied by `put` when the caller gives none.
  pub default_ttl: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexType {
  BTree,

  SkipList,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      dir_path: DEFAULT_DIR_PATH.clone(),
      data_file_size: 256 * 1024 * 1024, // 256MB
      sync_writes: false,
      bytes_per_sync: 0,
      index_type: IndexType::BTree,
      mmap_at_startup: true,
      file_merge_threshold: 0.5,
      compaction_interval: Some(Duration::from_secs(600)),
      default_ttl: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOManagerType {
  StandardFileIO,

  MemoryMap,
}
