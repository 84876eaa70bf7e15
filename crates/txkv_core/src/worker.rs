//! Periodic background threads.

use crate::error::CoreResult;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// A named thread that runs a task every `interval` until stopped.
///
/// Stopping is prompt: the thread sleeps on a condition variable, not in
/// `thread::sleep`. Dropping the worker stops and joins it.
#[derive(Debug)]
pub(crate) struct BackgroundWorker {
    name: String,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    /// Spawns the thread. The first tick happens one interval after spawn.
    pub(crate) fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> CoreResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut stopped = thread_signal.stopped.lock();
                while !*stopped {
                    thread_signal.wake.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    tick();
                    stopped = thread_signal.stopped.lock();
                }
            })?;
        tracing::debug!(worker = name, ?interval, "background worker started");
        Ok(Self {
            name: name.to_string(),
            signal,
            handle: Some(handle),
        })
    }

    /// Signals the thread to stop and waits for it.
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if handle.thread().id() == std::thread::current().id() {
            // Dropped from its own tick; the loop exits on its next check.
            return;
        }
        if handle.join().is_err() {
            tracing::warn!(worker = %self.name, "background worker panicked");
        } else {
            tracing::debug!(worker = %self.name, "background worker stopped");
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut worker = BackgroundWorker::spawn("test-ticker", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let start = Instant::now();
        while ticks.load(Ordering::SeqCst) < 3 && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(5));
        }
        worker.stop();
        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 3);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn stop_is_prompt_with_long_interval() {
        let start = Instant::now();
        let worker = BackgroundWorker::spawn("test-idle", Duration::from_secs(3600), || {}).unwrap();
        drop(worker);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
