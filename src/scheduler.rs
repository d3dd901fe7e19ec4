use std::{
  sync::{atomic::Ordering, Arc, Weak},
  thread::{self, JoinHandle},
  time::Duration,
};

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::{
  db::EngineCore,
  errors::{Errors, Result},
};

/// Background thread running the expiry sweep and compaction every interval.
pub(crate) struct Scheduler {
  shutdown: Arc<(Mutex<bool>, Condvar)>,
  handle: Option<JoinHandle<()>>,
}

impl Scheduler {
  pub(crate) fn start(core: Weak<EngineCore>, interval: Duration) -> Result<Self> {
    let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
    let signal = shutdown.clone();

    let spawned = thread::Builder::new()
      .name("barrelkv-compaction".to_string())
      .spawn(move || {
        let (stopped, cvar) = &*signal;
        loop {
          {
            let mut stopped = stopped.lock();
            if !*stopped {
              cvar.wait_for(&mut stopped, interval);
            }
            if *stopped {
              break;
            }
          }

          let Some(core) = core.upgrade() else {
            break;
          };
          core.run_background_cycle();
        }
        debug!("background cycle stopped");
      });

    match spawned {
      Ok(handle) => {
        info!("background cycle started, every {:?}", interval);
        Ok(Scheduler {
          shutdown,
          handle: Some(handle),
        })
      }
      Err(e) => {
        error!("failed to spawn background thread: {}", e);
        Err(Errors::FailedToStartBackgroundTask)
      }
    }
  }

  /// Signals the thread and waits for a running cycle to finish.
  pub(crate) fn stop(&mut self) {
    let (stopped, cvar) = &*self.shutdown;
    *stopped.lock() = true;
    cvar.notify_all();

    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        error!("background thread panicked");
      }
    }
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    self.stop();
  }
}

impl EngineCore {
  /// One periodic cycle: sweep expired keys, then compact if enough of the
  /// data files is reclaimable. Failures are logged and retried next cycle.
  pub(crate) fn run_background_cycle(&self) {
    self.sweep_expired();

    let total_size = self.files.read().total_size();
    if total_size == 0 {
      return;
    }
    let reclaim_size = self.reclaim_size.load(Ordering::SeqCst);
    let ratio = reclaim_size as f32 / total_size as f32;
    if ratio < self.options.file_merge_threshold {
      debug!(
        "skipping compaction, {} of {} bytes reclaimable",
        reclaim_size, total_size
      );
      return;
    }

    if let Err(e) = self.compact() {
      warn!("compaction failed, retrying next cycle: {}", e);
    }
  }
}
