use std::{
  collections::HashMap,
  fs,
  io::Write,
  path::{Path, PathBuf},
  sync::{atomic::Ordering, Arc},
};

use derive_more::Display;
use log::{debug, error, info, warn};

use crate::{
  data::{
    data_file::{
      get_data_file_name, parse_data_file_id, DataFile, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME,
    },
    log_record::{self, LogRecord, LogRecordPos, NO_EXPIRY},
  },
  db::EngineCore,
  errors::{Errors, Result},
  hint::{self, HintsSnapshot},
  index::new_indexer,
  option::IOManagerType,
  util,
};

const MERGE_DIR_NAME: &str = "merge";
const MERGE_FIN_KEY: &[u8] = "merge.finished".as_bytes();

/// Phase of the compactor. Anything but `Idle` means a cycle is running.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum CompactionState {
  Idle,
  CollectingLiveKeys,
  Rewriting,
  Swapping,
  Purging,
}

/// Outcome of one finished compaction cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionStats {
  pub live_keys: usize,
  pub dropped_keys: usize,
  pub bytes_before: u64,
  pub bytes_after: u64,
}

// puts the compactor back to idle however the cycle ends
struct CycleGuard<'a> {
  core: &'a EngineCore,
}

impl CycleGuard<'_> {
  fn enter(&self, state: CompactionState) {
    debug!("compaction entering {}", state);
    *self.core.compaction_state.lock() = state;
  }
}

impl Drop for CycleGuard<'_> {
  fn drop(&mut self) {
    *self.core.compaction_state.lock() = CompactionState::Idle;
  }
}

impl EngineCore {
  /// Rewrites every live record into a fresh set of data files and swaps it in.
  ///
  /// Holds the engine lock for the whole cycle. Until the merge-finished marker
  /// is written the original files and key directory are untouched, so any
  /// failure before that leaves only the staging directory behind.
  pub(crate) fn compact(&self) -> Result<Option<CompactionStats>> {
    let guard = {
      let mut state = self.compaction_state.lock();
      if *state != CompactionState::Idle {
        debug!("compaction already running ({}), skipping", *state);
        return Ok(None);
      }
      *state = CompactionState::CollectingLiveKeys;
      CycleGuard { core: self }
    };

    let _engine_guard = self.engine_lock.lock();
    self.check_open()?;
    if self.files.read().is_empty() {
      return Ok(None);
    }

    let now = util::time::now_secs();
    let (live, dropped_keys) = {
      let index = self.index.read();
      let total = index.len();
      let live: Vec<(Vec<u8>, LogRecordPos)> = index
        .snapshot()
        .into_iter()
        .filter(|(_, pos)| !pos.is_expired(now))
        .collect();
      let dropped = total - live.len();
      (live, dropped)
    };

    let dir_path = self.options.dir_path.clone();
    let live_size: u64 = live.iter().map(|(_, pos)| pos.size as u64).sum();
    if live_size >= util::file::available_disk_space(&dir_path) {
      return Err(Errors::MergeNoEnoughSpace);
    }

    guard.enter(CompactionState::Rewriting);
    let (old_files, first_file_id, bytes_before) = {
      let files = self.files.read();
      let old_files: HashMap<u32, Arc<DataFile>> = files
        .all_files()
        .into_iter()
        .map(|f| (f.get_file_id(), f))
        .collect();
      (old_files, files.next_file_id(), files.total_size())
    };

    let merge_path = get_merge_path(&dir_path)?;
    if merge_path.is_dir() {
      remove_merge_dir(&merge_path)?;
    }
    if let Err(e) = fs::create_dir_all(&merge_path) {
      error!("fail to create merge path {}", e);
      return Err(Errors::FailedToCreateDatabaseDir);
    }

    let mut writer = DataFile::new(&merge_path, first_file_id, IOManagerType::StandardFileIO)?;
    let mut finished_ids = Vec::new();
    let new_index = new_indexer(&self.options.index_type);

    let mut live_keys = 0;
    for (key, pos) in live {
      let Some(data_file) = old_files.get(&pos.file_id) else {
        warn!("data file {} of a live key is missing, dropping key", pos.file_id);
        continue;
      };
      let record = match data_file.read_log_record_sized(pos.offset, pos.size) {
        Ok(record) => record,
        Err(e @ (Errors::CorruptRecord | Errors::TruncatedRecord | Errors::MalformedRecord)) => {
          warn!(
            "dropping unreadable record in file {} at {}: {}",
            pos.file_id, pos.offset, e
          );
          continue;
        }
        Err(e) => return Err(e),
      };
      if record.key != key || record.is_tombstone() || record.is_expired(now) {
        continue;
      }

      let enc_record = record.encode()?;
      let write_off = writer.get_write_off();
      if write_off > 0 && write_off + enc_record.len() as u64 > self.options.data_file_size {
        writer.sync()?;
        let next_id = writer.get_file_id() + 1;
        finished_ids.push(writer.get_file_id());
        writer = DataFile::new(&merge_path, next_id, IOManagerType::StandardFileIO)?;
      }

      let offset = writer.append(&enc_record)?;
      new_index.put(
        key,
        LogRecordPos {
          file_id: writer.get_file_id(),
          offset,
          size: enc_record.len() as u32,
          timestamp: record.timestamp,
          expiry: record.expiry,
        },
      );
      live_keys += 1;
    }
    writer.sync()?;
    let active_file_id = writer.get_file_id();
    let bytes_after = finished_ids
      .iter()
      .map(|id| file_size(&get_data_file_name(&merge_path, *id)))
      .sum::<u64>()
      + writer.get_write_off();
    let snapshot = HintsSnapshot {
      covered_file_id: active_file_id,
      covered_offset: writer.get_write_off(),
      entries: new_index.snapshot(),
    };
    drop(writer);

    hint::write_hints(&merge_path, &snapshot)?;
    write_merge_fin_file(&merge_path, first_file_id)?;

    // the new file set is committed from here on: a crash is finished by open
    guard.enter(CompactionState::Swapping);
    let (active, stale) =
      match install_merge_files(&merge_path, &dir_path, active_file_id, &finished_ids) {
        Ok(files) => files,
        Err(e) => {
          abort_install(&merge_path, &dir_path, first_file_id);
          return Err(e);
        }
      };
    {
      let mut files = self.files.write();
      let mut index = self.index.write();
      files.swap(active, stale);
      *index = new_index;
    }
    self.reclaim_size.store(0, Ordering::SeqCst);

    guard.enter(CompactionState::Purging);
    // old files are obsolete now; each is deleted once its last reader is gone
    drop(old_files);
    remove_merge_dir(&merge_path)?;

    let stats = CompactionStats {
      live_keys,
      dropped_keys,
      bytes_before,
      bytes_after,
    };
    info!(
      "compaction finished: {} live keys, {} dropped, {} -> {} bytes",
      stats.live_keys, stats.dropped_keys, stats.bytes_before, stats.bytes_after
    );
    Ok(Some(stats))
  }
}

fn file_size(path: &Path) -> u64 {
  fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// The staging directory sits next to the data directory: `<dir>-merge`.
fn get_merge_path<P>(dir_path: P) -> Result<PathBuf>
where
  P: AsRef<Path>,
{
  let dir_path = dir_path.as_ref();
  let (Some(file_name), Some(parent)) = (dir_path.file_name(), dir_path.parent()) else {
    error!("can not derive a merge path from {:?}", dir_path);
    return Err(Errors::DataDirectoryCorrupted);
  };
  let mut merge_name = file_name.to_os_string();
  merge_name.push("-");
  merge_name.push(MERGE_DIR_NAME);
  Ok(parent.join(merge_name))
}

fn remove_merge_dir(merge_path: &Path) -> Result<()> {
  if let Err(e) = fs::remove_dir_all(merge_path) {
    error!("failed to remove merge dir {:?}: {}", merge_path, e);
    return Err(Errors::FailedToRemoveDataFile);
  }
  Ok(())
}

fn write_merge_fin_file(merge_path: &Path, first_file_id: u32) -> Result<()> {
  let record = LogRecord {
    key: MERGE_FIN_KEY.to_vec(),
    value: first_file_id.to_string().into_bytes(),
    timestamp: util::time::now_secs(),
    expiry: NO_EXPIRY,
  };
  let enc_record = record.encode()?;
  let path = merge_path.join(MERGE_FINISHED_FILE_NAME);
  let written = fs::File::create(&path).and_then(|mut file| {
    file.write_all(&enc_record)?;
    file.sync_all()
  });
  if let Err(e) = written {
    error!("failed to write merge finished file: {}", e);
    return Err(Errors::FailedToWriteToDataFile);
  }
  Ok(())
}

/// Returns the first id of the compacted files if the marker is present and intact.
fn read_merge_fin_file(merge_path: &Path) -> Option<u32> {
  let data = fs::read(merge_path.join(MERGE_FINISHED_FILE_NAME)).ok()?;
  let (header, rest) = log_record::decode(&data).ok()?;
  let key_size = header.key_size as usize;
  if rest.len() != key_size + header.val_size as usize {
    return None;
  }
  let (key, value) = rest.split_at(key_size);
  if key != MERGE_FIN_KEY || !log_record::verify(&header, key, value) {
    return None;
  }
  std::str::from_utf8(value).ok()?.parse::<u32>().ok()
}

/// Moves the compacted data files and the hints file into the data directory.
/// Files already moved by an earlier attempt are skipped.
fn move_merge_files(merge_path: &Path, dir_path: &Path) -> Result<()> {
  let dir = match fs::read_dir(merge_path) {
    Ok(dir) => dir,
    Err(e) => {
      error!("fail to read merge dir: {}", e);
      return Err(Errors::FailedToReadDatabaseDir);
    }
  };

  for entry in dir.flatten() {
    let file_os_str = entry.file_name();
    let Some(file_name) = file_os_str.to_str() else {
      continue;
    };
    if parse_data_file_id(file_name).is_none() && file_name != HINT_FILE_NAME {
      continue;
    }

    let src_path = merge_path.join(file_name);
    let dst_path = dir_path.join(file_name);
    if let Err(e) = fs::rename(&src_path, &dst_path) {
      error!("failed to move {:?} to {:?}: {}", src_path, dst_path, e);
      return Err(Errors::FailedToRenameDatabaseFile);
    }
  }
  Ok(())
}

/// Moves the compacted files into place and reopens them from there.
fn install_merge_files(
  merge_path: &Path,
  dir_path: &Path,
  active_file_id: u32,
  stale_ids: &[u32],
) -> Result<(DataFile, Vec<DataFile>)> {
  move_merge_files(merge_path, dir_path)?;

  let active = DataFile::new(dir_path, active_file_id, IOManagerType::StandardFileIO)?;
  let mut stale = Vec::with_capacity(stale_ids.len());
  for file_id in stale_ids {
    let data_file = DataFile::new(dir_path, *file_id, IOManagerType::StandardFileIO)?;
    data_file.seal()?;
    stale.push(data_file);
  }
  Ok((active, stale))
}

/// Undoes a failed install so the running engine and the directory agree again:
/// compacted files never linger next to the files still in use.
fn abort_install(merge_path: &Path, dir_path: &Path, first_file_id: u32) {
  warn!("aborting compaction install, removing compacted files");
  if let Ok(dir) = fs::read_dir(dir_path) {
    for entry in dir.flatten() {
      let file_os_str = entry.file_name();
      let Some(file_id) = file_os_str.to_str().and_then(parse_data_file_id) else {
        continue;
      };
      if file_id >= first_file_id {
        let path = get_data_file_name(dir_path, file_id);
        if let Err(e) = fs::remove_file(&path) {
          warn!("failed to remove compacted data file {:?}: {}", path, e);
        }
      }
    }
  }
  if let Err(e) = hint::remove_hints(dir_path) {
    error!("failed to remove hints file after aborted compaction: {}", e);
  }
  if let Err(e) = fs::remove_dir_all(merge_path) {
    warn!("failed to remove merge dir {:?}: {}", merge_path, e);
  }
}

/// Completes or discards a compaction interrupted by a crash. Runs at open,
/// before any data file is loaded.
pub(crate) fn load_merge_files<P>(dir_path: P) -> Result<()>
where
  P: AsRef<Path>,
{
  let merge_path = get_merge_path(&dir_path)?;
  if !merge_path.is_dir() {
    return Ok(());
  }

  let Some(first_file_id) = read_merge_fin_file(&merge_path) else {
    info!("discarding unfinished compaction output in {:?}", merge_path);
    return remove_merge_dir(&merge_path);
  };

  info!("finishing interrupted compaction from {:?}", merge_path);
  let dir = match fs::read_dir(dir_path.as_ref()) {
    Ok(dir) => dir,
    Err(e) => {
      error!("fail to read database dir: {}", e);
      return Err(Errors::FailedToReadDatabaseDir);
    }
  };
  for entry in dir.flatten() {
    let file_os_str = entry.file_name();
    let Some(file_id) = file_os_str.to_str().and_then(parse_data_file_id) else {
      continue;
    };
    if file_id < first_file_id {
      let path = get_data_file_name(&dir_path, file_id);
      if let Err(e) = fs::remove_file(&path) {
        error!("failed to remove compacted data file {:?}: {}", path, e);
        return Err(Errors::FailedToRemoveDataFile);
      }
    }
  }

  move_merge_files(&merge_path, dir_path.as_ref())?;
  remove_merge_dir(&merge_path)
}
