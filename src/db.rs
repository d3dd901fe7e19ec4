use std::{
  collections::HashMap,
  fs::{self, File, OpenOptions},
  path::Path,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
  time::Duration,
};

use bytes::Bytes;
use fs2::FileExt;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
  data::{
    data_file::{parse_data_file_id, DataFile},
    file_set::FileSet,
    log_record::{LogRecord, LogRecordPos, ReadLogRecord, HEADER_SIZE, NO_EXPIRY},
  },
  errors::{Errors, Result},
  hint::{self, HintsSnapshot},
  index::{new_indexer, Indexer},
  merge::{self, CompactionState, CompactionStats},
  option::{IOManagerType, Options},
  scheduler::Scheduler,
  util,
};

pub(crate) const FILE_LOCK_NAME: &str = "flock";

/// Bitcask storage engine instance.
///
/// Writes, deletes and compaction are serialized by the engine lock. Reads only
/// take the file set and key directory locks long enough to resolve a location,
/// then read from disk without holding any lock.
pub struct Engine {
  pub(crate) core: Arc<EngineCore>,
  scheduler: Mutex<Option<Scheduler>>,
}

pub(crate) struct EngineCore {
  pub(crate) options: Arc<Options>,
  // lock order: engine_lock, files, index
  pub(crate) files: RwLock<FileSet>,
  pub(crate) index: RwLock<Box<dyn Indexer>>,
  pub(crate) engine_lock: Mutex<()>,
  pub(crate) compaction_state: Mutex<CompactionState>,
  pub(crate) reclaim_size: AtomicU64,
  bytes_write: AtomicUsize,
  lock_file: File,
  loaded_from_hints: bool,
  closed: AtomicBool,
}

/// Statistics of a running engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
  /// Number of keys in the key directory, expired ones not yet swept included.
  pub key_num: usize,
  pub data_file_num: usize,
  /// Bytes compaction could reclaim.
  pub reclaimable_size: u64,
  pub disk_size: u64,
  /// Whether the key directory was rebuilt from a hints snapshot at open.
  pub loaded_from_hints: bool,
}

impl Engine {
  /// Opens the engine in `opts.dir_path`, recovering whatever a previous run left.
  pub fn open(opts: Options) -> Result<Self> {
    check_options(&opts)?;

    let mut options = opts;
    if !options.dir_path.is_dir() {
      if let Err(e) = fs::create_dir_all(&options.dir_path) {
        error!("create database directory err: {}", e);
        return Err(Errors::FailedToCreateDatabaseDir);
      }
    }
    // the merge directory is named after the last path component
    let dir_path = match fs::canonicalize(&options.dir_path) {
      Ok(path) => path,
      Err(e) => {
        error!("failed to resolve database directory: {}", e);
        return Err(Errors::FailedToReadDatabaseDir);
      }
    };
    options.dir_path = dir_path.clone();

    let lock_file = match OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(dir_path.join(FILE_LOCK_NAME))
    {
      Ok(file) => file,
      Err(e) => {
        error!("failed to open lock file: {}", e);
        return Err(Errors::FailedToOpenDataFile);
      }
    };
    if lock_file.try_lock_exclusive().is_err() {
      return Err(Errors::DatabaseIsUsing);
    }

    // finish or discard a compaction interrupted by a crash
    merge::load_merge_files(&dir_path)?;

    let io_type = if options.mmap_at_startup {
      IOManagerType::MemoryMap
    } else {
      IOManagerType::StandardFileIO
    };
    let mut data_files = load_data_files(&dir_path, io_type)?;

    let index = new_indexer(&options.index_type);
    let resume = load_index_from_hints(&dir_path, &data_files, index.as_ref());
    let loaded_from_hints = resume.is_some();
    let valid_end = load_index_from_data_files(&data_files, index.as_ref(), resume)?;

    for data_file in data_files.iter_mut() {
      if io_type == IOManagerType::MemoryMap {
        data_file.set_io_manager(&dir_path, IOManagerType::StandardFileIO)?;
      }
    }

    let active_file = match data_files.pop() {
      Some(active) => {
        if let Some(end) = valid_end {
          warn!(
            "truncating incomplete tail of data file {} from {} to {}",
            active.get_file_id(),
            active.get_write_off(),
            end
          );
          active.truncate(end)?;
        }
        active
      }
      None => DataFile::new(&dir_path, 1, IOManagerType::StandardFileIO)?,
    };
    for stale in data_files.iter() {
      stale.seal()?;
    }

    let files = FileSet::new(&dir_path, active_file, data_files);
    let live_size: u64 = index.snapshot().iter().map(|(_, pos)| pos.size as u64).sum();
    let reclaim_size = files.total_size().saturating_sub(live_size);

    info!(
      "opened engine at {:?}: {} keys, {} data files, hints used: {}",
      dir_path,
      index.len(),
      files.file_num(),
      loaded_from_hints
    );

    let core = Arc::new(EngineCore {
      options: Arc::new(options),
      files: RwLock::new(files),
      index: RwLock::new(index),
      engine_lock: Mutex::new(()),
      compaction_state: Mutex::new(CompactionState::Idle),
      reclaim_size: AtomicU64::new(reclaim_size),
      bytes_write: AtomicUsize::new(0),
      lock_file,
      loaded_from_hints,
      closed: AtomicBool::new(false),
    });

    let scheduler = match core.options.compaction_interval {
      Some(interval) => Some(Scheduler::start(Arc::downgrade(&core), interval)?),
      None => None,
    };

    Ok(Engine {
      core,
      scheduler: Mutex::new(scheduler),
    })
  }

  /// Stores a key/value pair, expiring after the configured default TTL if any.
  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    let expiry = self
      .core
      .options
      .default_ttl
      .map_or(NO_EXPIRY, util::time::expiry_after);
    self.core.put(&key, &value, expiry)
  }

  /// Stores a key/value pair that reads as expired once `ttl` has elapsed.
  pub fn put_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> Result<()> {
    self.core.put(&key, &value, util::time::expiry_after(ttl))
  }

  /// Returns the value of `key`, `KeyNotFound` if it is absent or deleted and
  /// `KeyExpired` if its TTL has passed.
  pub fn get(&self, key: Bytes) -> Result<Bytes> {
    self.core.get(&key)
  }

  pub fn delete(&self, key: Bytes) -> Result<()> {
    self.core.delete(&key)
  }

  /// Keys that are neither deleted nor expired, in key order.
  pub fn list_keys(&self) -> Result<Vec<Bytes>> {
    self.core.index.read().list_keys(util::time::now_secs())
  }

  /// Visits every readable, unexpired key/value pair until `f` returns false.
  pub fn fold<F>(&self, mut f: F) -> Result<()>
  where
    F: FnMut(Bytes, Bytes) -> bool,
  {
    let entries = self.core.index.read().snapshot();
    for (key, _) in entries {
      match self.core.get(&key) {
        Ok(value) => {
          if !f(Bytes::from(key), value) {
            break;
          }
        }
        Err(Errors::KeyNotFound) | Err(Errors::KeyExpired) | Err(Errors::CorruptRecord) => continue,
        Err(e) => return Err(e),
      }
    }
    Ok(())
  }

  /// Flushes the active data file to stable storage.
  pub fn sync(&self) -> Result<()> {
    let active = self.core.files.read().current_writer();
    active.sync()
  }

  pub fn stat(&self) -> Result<Stat> {
    let (key_num, data_file_num) = {
      let files = self.core.files.read();
      let index = self.core.index.read();
      (index.len(), files.file_num())
    };
    Ok(Stat {
      key_num,
      data_file_num,
      reclaimable_size: self.core.reclaim_size.load(Ordering::SeqCst),
      disk_size: util::file::dir_disk_size(&self.core.options.dir_path),
      loaded_from_hints: self.core.loaded_from_hints,
    })
  }

  /// Runs a compaction cycle right away regardless of how much is reclaimable.
  /// Returns `None` when nothing was done because a cycle is already running
  /// or there is no data.
  pub fn compact_now(&self) -> Result<Option<CompactionStats>> {
    self.core.compact()
  }

  /// Removes expired keys from the key directory and returns how many there were.
  pub fn sweep_expired(&self) -> usize {
    self.core.sweep_expired()
  }

  pub fn compaction_state(&self) -> CompactionState {
    *self.core.compaction_state.lock()
  }

  /// Stops the background cycle, syncs, writes a hints snapshot and releases
  /// the directory lock. Called on drop as well.
  pub fn close(&self) -> Result<()> {
    if let Some(mut scheduler) = self.scheduler.lock().take() {
      scheduler.stop();
    }
    self.core.close()
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      error!("error whilst closing engine: {}", e);
    }
  }
}

impl EngineCore {
  pub(crate) fn put(&self, key: &[u8], value: &[u8], expiry: u32) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let record = LogRecord {
      key: key.to_vec(),
      value: value.to_vec(),
      timestamp: util::time::now_secs(),
      expiry,
    };

    let _guard = self.engine_lock.lock();
    self.check_open()?;
    let pos = self.append_log_record(&record)?;
    if let Some(old) = self.index.read().put(record.key, pos) {
      self.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
    }
    Ok(())
  }

  pub(crate) fn get(&self, key: &[u8]) -> Result<Bytes> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let (pos, data_file) = {
      let files = self.files.read();
      let index = self.index.read();
      let pos = index.get(key).ok_or(Errors::KeyNotFound)?;
      let data_file = files.get(pos.file_id).ok_or(Errors::DataFileNotFound)?;
      (pos, data_file)
    };

    let record = match data_file.read_log_record_sized(pos.offset, pos.size) {
      Ok(record) => record,
      Err(e @ (Errors::CorruptRecord | Errors::TruncatedRecord | Errors::MalformedRecord)) => {
        warn!(
          "unreadable record in file {} at {}: {}",
          pos.file_id, pos.offset, e
        );
        return Err(Errors::CorruptRecord);
      }
      Err(e) => return Err(e),
    };
    if record.key != key {
      warn!("key directory points at another key in file {} at {}", pos.file_id, pos.offset);
      return Err(Errors::CorruptRecord);
    }
    if record.is_tombstone() {
      return Err(Errors::KeyNotFound);
    }
    if record.is_expired(util::time::now_secs()) {
      return Err(Errors::KeyExpired);
    }
    Ok(record.value.into())
  }

  pub(crate) fn delete(&self, key: &[u8]) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let _guard = self.engine_lock.lock();
    self.check_open()?;
    if self.index.read().get(key).is_none() {
      return Err(Errors::KeyNotFound);
    }

    let record = LogRecord::tombstone(key.to_vec(), util::time::now_secs());
    let pos = self.append_log_record(&record)?;
    // the tombstone itself is garbage for compaction
    self.reclaim_size.fetch_add(pos.size as u64, Ordering::SeqCst);
    if let Some(old) = self.index.read().delete(key) {
      self.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
    }
    Ok(())
  }

  /// Appends to the active file, rotating first if the record would overflow
  /// it. The caller holds the engine lock.
  pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<LogRecordPos> {
    let enc_record = record.encode()?;
    let record_len = u32::try_from(enc_record.len()).map_err(|_| Errors::ValueTooLarge)?;

    let mut active_file = self.files.read().current_writer();
    let write_off = active_file.get_write_off();
    if write_off > 0 && write_off + record_len as u64 > self.options.data_file_size {
      active_file = self.files.write().rotate()?;
    }

    let offset = active_file.append(&enc_record)?;

    let previous = self
      .bytes_write
      .fetch_add(enc_record.len(), Ordering::SeqCst);
    let need_sync = self.options.sync_writes
      || (self.options.bytes_per_sync > 0
        && previous + enc_record.len() >= self.options.bytes_per_sync);
    if need_sync {
      active_file.sync()?;
      self.bytes_write.store(0, Ordering::SeqCst);
    }

    Ok(LogRecordPos {
      file_id: active_file.get_file_id(),
      offset,
      size: record_len,
      timestamp: record.timestamp,
      expiry: record.expiry,
    })
  }

  /// Writers call this under the engine lock; once `close` has released the
  /// directory lock nothing may be appended any more.
  pub(crate) fn check_open(&self) -> Result<()> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(Errors::EngineClosed);
    }
    Ok(())
  }

  pub(crate) fn sweep_expired(&self) -> usize {
    let _guard = self.engine_lock.lock();
    let removed = self.index.read().remove_expired(util::time::now_secs());
    for (_, pos) in removed.iter() {
      self.reclaim_size.fetch_add(pos.size as u64, Ordering::SeqCst);
    }
    if !removed.is_empty() {
      info!("expiry sweep removed {} keys", removed.len());
    }
    removed.len()
  }

  /// Writes a hints snapshot of the current key directory. The caller holds
  /// the engine lock so the snapshot and the covered position agree.
  pub(crate) fn write_hints_locked(&self) -> Result<()> {
    let files = self.files.read();
    let index = self.index.read();
    let active = files.current_writer();
    let snapshot = HintsSnapshot {
      covered_file_id: active.get_file_id(),
      covered_offset: active.get_write_off(),
      entries: index.snapshot(),
    };
    hint::write_hints(&self.options.dir_path, &snapshot)
  }

  fn close(&self) -> Result<()> {
    if self.closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }

    {
      let _guard = self.engine_lock.lock();
      let active = self.files.read().current_writer();
      active.sync()?;
      self.write_hints_locked()?;
    }

    if let Err(e) = FileExt::unlock(&self.lock_file) {
      error!("failed to unlock the database directory: {}", e);
    }
    debug!("closed engine at {:?}", self.options.dir_path);
    Ok(())
  }
}

fn check_options(opts: &Options) -> Result<()> {
  let dir_path = opts.dir_path.to_str();
  if dir_path.is_none() || dir_path.is_some_and(|p| p.is_empty()) {
    return Err(Errors::DirPathIsEmpty);
  }

  if opts.data_file_size <= HEADER_SIZE as u64 {
    return Err(Errors::DataFileSizeTooSmall);
  }

  if !(0.0..=1.0).contains(&opts.file_merge_threshold) {
    return Err(Errors::InvalidMergeRatio);
  }

  Ok(())
}

/// Opens every data file in `dir_path`, oldest first.
fn load_data_files<P>(dir_path: P, io_type: IOManagerType) -> Result<Vec<DataFile>>
where
  P: AsRef<Path>,
{
  let dir = match fs::read_dir(&dir_path) {
    Ok(dir) => dir,
    Err(e) => {
      error!("failed to read database dir: {}", e);
      return Err(Errors::FailedToReadDatabaseDir);
    }
  };

  let mut file_ids = Vec::new();
  for entry in dir.flatten() {
    let file_os_str = entry.file_name();
    let Some(file_name) = file_os_str.to_str() else {
      continue;
    };
    if let Some(file_id) = parse_data_file_id(file_name) {
      file_ids.push(file_id);
    }
  }
  file_ids.sort_unstable();

  let mut data_files = Vec::with_capacity(file_ids.len());
  for file_id in file_ids {
    data_files.push(DataFile::new(&dir_path, file_id, io_type)?);
  }
  Ok(data_files)
}

/// Fills `index` from the hints snapshot if there is a usable one and returns
/// the position scanning has to resume from.
fn load_index_from_hints<P>(
  dir_path: P,
  data_files: &[DataFile],
  index: &dyn Indexer,
) -> Option<(u32, u64)>
where
  P: AsRef<Path>,
{
  let snapshot = match hint::load_hints(&dir_path) {
    Ok(Some(snapshot)) => snapshot,
    Ok(None) => return None,
    Err(e) => {
      warn!("ignoring hints file, falling back to a full scan: {}", e);
      return None;
    }
  };

  let sizes: HashMap<u32, u64> = data_files
    .iter()
    .map(|f| (f.get_file_id(), f.get_write_off()))
    .collect();

  let covered_ok = sizes
    .get(&snapshot.covered_file_id)
    .is_some_and(|len| *len >= snapshot.covered_offset);
  let entries_ok = snapshot.entries.iter().all(|(_, pos)| {
    pos.file_id <= snapshot.covered_file_id
      && sizes.get(&pos.file_id).is_some_and(|len| {
        pos
          .offset
          .checked_add(pos.size as u64)
          .is_some_and(|end| end <= *len)
      })
  });
  if !covered_ok || !entries_ok {
    warn!("hints file does not match the data files, falling back to a full scan");
    return None;
  }

  for (key, pos) in snapshot.entries {
    index.put(key, pos);
  }
  Some((snapshot.covered_file_id, snapshot.covered_offset))
}

/// Replays records into `index`, from `resume` onwards if given. Returns where
/// the valid data of the newest file ends when only an incomplete record or
/// undecodable bytes follow it.
fn load_index_from_data_files(
  data_files: &[DataFile],
  index: &dyn Indexer,
  resume: Option<(u32, u64)>,
) -> Result<Option<u64>> {
  let last_file_id = data_files.last().map(|f| f.get_file_id());

  let mut valid_end = None;
  for data_file in data_files.iter() {
    let file_id = data_file.get_file_id();
    let start = match resume {
      Some((covered_id, _)) if file_id < covered_id => continue,
      Some((covered_id, covered_offset)) if file_id == covered_id => covered_offset,
      _ => 0,
    };

    let end = replay_data_file(data_file, start, index)?;
    if Some(file_id) == last_file_id && end < data_file.get_write_off() {
      valid_end = Some(end);
    }
  }
  Ok(valid_end)
}

fn replay_data_file(data_file: &DataFile, start: u64, index: &dyn Indexer) -> Result<u64> {
  let file_id = data_file.get_file_id();
  let mut offset = start;
  loop {
    let ReadLogRecord { record, size } = match data_file.read_log_record(offset) {
      Ok(result) => result,
      Err(Errors::ReadDataFileEOF) => break,
      Err(e @ (Errors::TruncatedRecord | Errors::CorruptRecord)) => {
        // a complete record with a bad checksum is skipped by its own size as
        // long as a valid record or the end of the file follows it
        if e == Errors::CorruptRecord {
          let next = offset + data_file.read_header(offset)?.record_size();
          if next == data_file.get_write_off() || data_file.read_log_record(next).is_ok() {
            warn!(
              "skipping corrupt record in data file {} at {} ({} bytes)",
              file_id,
              offset,
              next - offset
            );
            offset = next;
            continue;
          }
        }

        match next_valid_record(data_file, offset + 1) {
          Some(next) => {
            warn!(
              "skipping {} damaged bytes in data file {} at {}",
              next - offset,
              file_id,
              offset
            );
            offset = next;
            continue;
          }
          None => {
            warn!("incomplete record in data file {} at {}", file_id, offset);
            break;
          }
        }
      }
      Err(e) => return Err(e),
    };

    if record.is_tombstone() {
      index.delete(&record.key);
    } else {
      let pos = LogRecordPos {
        file_id,
        offset,
        size: size as u32,
        timestamp: record.timestamp,
        expiry: record.expiry,
      };
      index.put(record.key, pos);
    }
    offset += size;
  }
  Ok(offset)
}

/// First offset at or after `from` holding a record that decodes and verifies.
fn next_valid_record(data_file: &DataFile, from: u64) -> Option<u64> {
  let end = data_file.get_write_off();
  let last_start = end.checked_sub(HEADER_SIZE as u64)?;
  (from..=last_start).find(|off| data_file.read_log_record(*off).is_ok())
}
