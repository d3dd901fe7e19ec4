use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::data::log_record::LogRecordPos;

use super::Indexer;

/// BTreeMap behind a reader-writer lock.
pub struct BTree {
  tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BTree {
  pub fn new() -> Self {
    Self {
      tree: RwLock::new(BTreeMap::new()),
    }
  }
}

impl Default for BTree {
  fn default() -> Self {
    Self::new()
  }
}

impl Indexer for BTree {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    let mut write_guard = self.tree.write();
    write_guard.insert(key, pos)
  }

  fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
    let read_guard = self.tree.read();
    read_guard.get(key).copied()
  }

  fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
    let mut write_guard = self.tree.write();
    write_guard.remove(key)
  }

  fn len(&self) -> usize {
    self.tree.read().len()
  }

  fn for_each(&self, f: &mut dyn FnMut(&[u8], &LogRecordPos) -> bool) {
    // the read guard is held for the whole walk
    let read_guard = self.tree.read();
    for (key, pos) in read_guard.iter() {
      if !f(key, pos) {
        break;
      }
    }
  }
}
