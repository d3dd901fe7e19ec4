pub mod btree;
pub mod skiplist;

use bytes::Bytes;

use crate::{data::log_record::LogRecordPos, errors::Result, option::IndexType};

/// The key directory: maps every live key to the location of its newest record.
pub trait Indexer: Sync + Send {
  /// Stores the position of a key, returning the one it replaces.
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos>;

  /// Retrieves a key's position from the index.
  fn get(&self, key: &[u8]) -> Option<LogRecordPos>;

  /// Deletes a key's position from the index.
  fn delete(&self, key: &[u8]) -> Option<LogRecordPos>;

  fn len(&self) -> usize;

  /// Visits entries in key order until `f` returns false. Callers needing a
  /// point-in-time view must keep writers out while iterating.
  fn for_each(&self, f: &mut dyn FnMut(&[u8], &LogRecordPos) -> bool);

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Keys whose entries have not expired at `now`, in key order.
  fn list_keys(&self, now: u32) -> Result<Vec<Bytes>> {
    let mut keys = Vec::new();
    self.for_each(&mut |key, pos| {
      if !pos.is_expired(now) {
        keys.push(Bytes::copy_from_slice(key));
      }
      true
    });
    Ok(keys)
  }

  /// Copies every entry out of the index.
  fn snapshot(&self) -> Vec<(Vec<u8>, LogRecordPos)> {
    let mut entries = Vec::with_capacity(self.len());
    self.for_each(&mut |key, pos| {
      entries.push((key.to_vec(), *pos));
      true
    });
    entries
  }

  /// Drops every entry whose expiry has passed and returns what was removed.
  fn remove_expired(&self, now: u32) -> Vec<(Vec<u8>, LogRecordPos)> {
    let mut expired = Vec::new();
    self.for_each(&mut |key, pos| {
      if pos.is_expired(now) {
        expired.push(key.to_vec());
      }
      true
    });

    expired
      .into_iter()
      .filter_map(|key| self.delete(&key).map(|pos| (key, pos)))
      .collect()
  }
}

/// Creates a new indexer based on the specified index type.
pub fn new_indexer(index_type: &IndexType) -> Box<dyn Indexer> {
  match *index_type {
    IndexType::BTree => Box::new(btree::BTree::new()),
    IndexType::SkipList => Box::new(skiplist::SkipList::new()),
  }
}
