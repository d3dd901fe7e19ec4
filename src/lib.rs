//! BarrelKV: a log-structured key-value storage engine in the Bitcask family.
//!
//! Every write is appended to the active data file and its location recorded in
//! an in-memory key directory, so a read costs one positioned read. A periodic
//! background cycle drops expired keys and compacts the data files, rewriting
//! only live records and publishing a hints snapshot that makes the next start
//! skip the full scan.
//!
//! # Basic Usage
//!
//! ```
//! use bytes::Bytes;
//! use barrelkv::{db::Engine, option::Options};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut opts = Options::default();
//! opts.dir_path = dir.path().join("barrel");
//! let engine = Engine::open(opts).expect("failed to open barrelkv engine");
//!
//! let key = Bytes::from("hello");
//! engine.put(key.clone(), Bytes::from("world")).expect("failed to put");
//! assert_eq!(engine.get(key.clone()).expect("failed to get"), Bytes::from("world"));
//!
//! engine.delete(key).expect("failed to delete");
//! ```

mod data;

mod fio;
mod hint;
mod index;
mod scheduler;

pub mod db;
pub mod errors;
pub mod merge;
pub mod option;
pub mod util;
