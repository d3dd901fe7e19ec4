use crossbeam_skiplist::SkipMap;

use crate::data::log_record::LogRecordPos;

use super::Indexer;

/// Lock-free concurrent skip list.
pub struct SkipList {
  skl: SkipMap<Vec<u8>, LogRecordPos>,
}

impl SkipList {
  pub fn new() -> Self {
    Self {
      skl: SkipMap::new(),
    }
  }
}

impl Default for SkipList {
  fn default() -> Self {
    Self::new()
  }
}

impl Indexer for SkipList {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    let old = self.skl.get(&key).map(|entry| *entry.value());
    self.skl.insert(key, pos);
    old
  }

  fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
    self.skl.get(key).map(|entry| *entry.value())
  }

  fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
    self.skl.remove(key).map(|entry| *entry.value())
  }

  fn len(&self) -> usize {
    self.skl.len()
  }

  fn for_each(&self, f: &mut dyn FnMut(&[u8], &LogRecordPos) -> bool) {
    for entry in self.skl.iter() {
      if !f(entry.key(), entry.value()) {
        break;
      }
    }
  }
}
