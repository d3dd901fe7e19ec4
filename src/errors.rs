use std::result;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Errors {
  #[error("failed to read from data file")]
  FailedToReadFromDataFile,

  #[error("failed to write to data file")]
  FailedToWriteToDataFile,

  #[error("failed to sync data file")]
  FailedToSyncDataFile,

  #[error("failed to open data file")]
  FailedToOpenDataFile,

  #[error("failed to remove data file")]
  FailedToRemoveDataFile,

  #[error("data file is read only")]
  DataFileIsReadOnly,

  #[error("the key is empty")]
  KeyIsEmpty,

  #[error("the key is larger than the record format allows")]
  KeyTooLarge,

  #[error("the value is larger than the record format allows")]
  ValueTooLarge,

  #[error("key is not found in database")]
  KeyNotFound,

  #[error("key has expired")]
  KeyExpired,

  #[error("data file is not found in database")]
  DataFileNotFound,

  #[error("database dir path can not be empty")]
  DirPathIsEmpty,

  #[error("database data file size must be greater than the record header")]
  DataFileSizeTooSmall,

  #[error("failed to create the database directory")]
  FailedToCreateDatabaseDir,

  #[error("failed to read the database directory")]
  FailedToReadDatabaseDir,

  #[error("failed to rename file in the database directory")]
  FailedToRenameDatabaseFile,

  #[error("the database directory maybe corrupted")]
  DataDirectoryCorrupted,

  #[error("read data file eof")]
  ReadDataFileEOF,

  #[error("record header is malformed")]
  MalformedRecord,

  #[error("record is truncated")]
  TruncatedRecord,

  #[error("record checksum mismatch")]
  CorruptRecord,

  #[error("hints file is invalid")]
  InvalidHintsFile,

  #[error("the database directory is used by another process")]
  DatabaseIsUsing,

  #[error("invalid merge threshold, must between 0 and 1")]
  InvalidMergeRatio,

  #[error("disk space is not enough for merge")]
  MergeNoEnoughSpace,

  #[error("failed to start the background compaction task")]
  FailedToStartBackgroundTask,

  #[error("the engine is closed")]
  EngineClosed,
}

pub type Result<T> = result::Result<T, Errors>;
