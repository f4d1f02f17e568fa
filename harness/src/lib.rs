//! Deterministic synchronization harness for asynchronous flows.
//!
//! Completion handlers normally run on arbitrary worker threads, which makes
//! asynchronous failure and completion impossible to observe without races
//! or sleep-based polling. A [`SignalHarness`] gives a single rendezvous
//! point: a dedicated serial worker thread with a FIFO work queue, a signal
//! counter any thread can advance, and a captured-error slot that turns an
//! asynchronous failure into a synchronous observation.
//!
//! ```no_run
//! use graphwire_harness::SignalHarness;
//!
//! let harness = SignalHarness::new();
//! let signaller = harness.clone();
//! std::thread::spawn(move || {
//!     // ... do work ...
//!     signaller.signal();
//! });
//! harness.wait_for_signals(1)?;
//! harness.quit();
//! harness.join();
//! # Ok::<(), graphwire_harness::HarnessError>(())
//! ```
//!
//! The harness is composition, not thread subclassing: the worker thread is
//! an implementation detail and never part of the public API.

use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use graphwire_types::{CompletionContext, Work};
use thiserror::Error;

/// Default patience for [`SignalHarness::wait_for_signals`].
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A wait that ran out of patience. Distinct from a captured error: the
/// underlying operation may still be in flight.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("timed out after {waited:?} waiting for {expected} signals ({received} received)")]
    Timeout {
        waited: Duration,
        expected: u64,
        received: u64,
    },
}

enum Command {
    Run(Work),
    Quit,
}

struct SignalCell {
    /// Cumulative signal count; never decreases.
    signals: u64,
    /// First captured error wins; later captures are ignored.
    error: Option<anyhow::Error>,
}

struct Shared {
    cell: Mutex<SignalCell>,
    cond: Condvar,
}

/// A dedicated worker execution context with blocking wait-for-N-signals
/// semantics. Cheap to clone; all clones share the same worker, counter and
/// error slot.
#[derive(Clone)]
pub struct SignalHarness {
    sender: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for SignalHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHarness {
    /// Spawn the harness worker thread. The owner is responsible for
    /// [`quit`](Self::quit) and [`join`](Self::join) at teardown.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Command>();
        let worker = std::thread::Builder::new()
            .name("graphwire-harness".to_string())
            .spawn(move || {
                // Strict FIFO: one channel, one thread.
                while let Ok(command) = receiver.recv() {
                    match command {
                        Command::Run(work) => work(),
                        Command::Quit => break,
                    }
                }
                tracing::debug!("harness worker stopped");
            })
            .expect("harness worker thread must spawn");

        Self {
            sender,
            shared: Arc::new(Shared {
                cell: Mutex::new(SignalCell {
                    signals: 0,
                    error: None,
                }),
                cond: Condvar::new(),
            }),
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Enqueue work for the harness's own thread. FIFO order is preserved.
    /// Work posted after [`quit`](Self::quit) is dropped.
    pub fn post(&self, work: impl FnOnce() + Send + 'static) {
        if self.sender.send(Command::Run(Box::new(work))).is_err() {
            tracing::warn!("work posted to a stopped harness; dropped");
        }
    }

    /// Record one completed asynchronous event. Callable from any thread.
    pub fn signal(&self) {
        let mut cell = self.lock_cell();
        cell.signals += 1;
        drop(cell);
        self.shared.cond.notify_all();
    }

    /// Record a failure observed on some other thread. The first captured
    /// error wins; later calls are ignored.
    pub fn set_error(&self, error: impl Into<anyhow::Error>) {
        let mut cell = self.lock_cell();
        if cell.error.is_none() {
            cell.error = Some(error.into());
        } else {
            tracing::debug!("harness already holds an error; ignoring later capture");
        }
        drop(cell);
        // Waiters re-check so a captured error can't be missed at teardown.
        self.shared.cond.notify_all();
    }

    /// Take the captured error, if any, as a `Result`.
    pub fn assert_success(&self) -> anyhow::Result<()> {
        match self.lock_cell().error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Block until the counter advances by `expected` signals from this
    /// call's baseline, bounded by [`DEFAULT_WAIT_TIMEOUT`].
    pub fn wait_for_signals(&self, expected: u64) -> Result<(), HarnessError> {
        self.wait_for_signals_timeout(expected, DEFAULT_WAIT_TIMEOUT)
    }

    /// Block until the counter advances by `expected` signals from this
    /// call's baseline, or the per-call timeout elapses. The timeout bounds
    /// only this wait's patience, never the underlying operation.
    pub fn wait_for_signals_timeout(
        &self,
        expected: u64,
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        let started = Instant::now();
        let mut cell = self.lock_cell();
        let baseline = cell.signals;
        let target = baseline + expected;

        while cell.signals < target {
            let remaining = timeout.checked_sub(started.elapsed()).unwrap_or_default();
            if remaining.is_zero() {
                return Err(HarnessError::Timeout {
                    waited: started.elapsed(),
                    expected,
                    received: cell.signals - baseline,
                });
            }
            let (next, wait_result) = self
                .shared
                .cond
                .wait_timeout(cell, remaining)
                .expect("harness signal lock poisoned");
            cell = next;
            if wait_result.timed_out() && cell.signals < target {
                return Err(HarnessError::Timeout {
                    waited: started.elapsed(),
                    expected,
                    received: cell.signals - baseline,
                });
            }
        }
        Ok(())
    }

    /// Wait for `expected` signals, then surface any captured error instead
    /// of returning normally - the synchronous observation point for
    /// asynchronous failures. A captured error is reported even when the
    /// signal target was reached.
    pub fn wait_for_signals_and_assert_success(&self, expected: u64) -> anyhow::Result<()> {
        self.wait_for_signals(expected)?;
        self.assert_success()
    }

    /// Current cumulative signal count.
    #[must_use]
    pub fn signal_count(&self) -> u64 {
        self.lock_cell().signals
    }

    /// Ask the worker to stop after draining the work already queued.
    pub fn quit(&self) {
        // The queue is FIFO, so everything posted before this marker still runs.
        let _ = self.sender.send(Command::Quit);
    }

    /// Block until the worker thread has fully terminated. Idempotent: the
    /// handle is consumed exactly once, and later calls observe the thread
    /// already confirmed terminated.
    pub fn join(&self) {
        let handle = self
            .worker
            .lock()
            .expect("harness worker lock poisoned")
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.join()
        {
            tracing::warn!("harness worker panicked: {e:?}");
        }
    }

    fn lock_cell(&self) -> std::sync::MutexGuard<'_, SignalCell> {
        self.shared
            .cell
            .lock()
            .expect("harness signal lock poisoned")
    }
}

impl CompletionContext for SignalHarness {
    fn post(&self, work: Work) {
        SignalHarness::post(self, work);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn posted_work_runs_in_fifo_order() {
        let harness = SignalHarness::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let order = Arc::clone(&order);
            let signaller = harness.clone();
            harness.post(move || {
                order.lock().unwrap().push(i);
                signaller.signal();
            });
        }
        harness.wait_for_signals(10).unwrap();
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
        harness.quit();
        harness.join();
    }

    #[test]
    fn signals_sum_across_threads() {
        let harness = SignalHarness::new();
        let fired = Arc::new(AtomicU64::new(0));
        let mut threads = Vec::new();
        for _ in 0..4 {
            let signaller = harness.clone();
            let fired = Arc::clone(&fired);
            threads.push(std::thread::spawn(move || {
                for _ in 0..5 {
                    fired.fetch_add(1, Ordering::SeqCst);
                    signaller.signal();
                }
            }));
        }
        harness.wait_for_signals(20).unwrap();
        // The wait must not have returned before all 20 signals were sent.
        assert_eq!(fired.load(Ordering::SeqCst), 20);
        for thread in threads {
            thread.join().unwrap();
        }
        harness.quit();
        harness.join();
    }

    #[test]
    fn wait_times_out_when_signals_are_missing() {
        let harness = SignalHarness::new();
        harness.signal();
        let err = harness
            .wait_for_signals_timeout(2, Duration::from_millis(50))
            .unwrap_err();
        let HarnessError::Timeout {
            expected, received, ..
        } = err;
        assert_eq!(expected, 2);
        // The baseline is taken at the call, so the earlier signal does not count.
        assert_eq!(received, 0);
        harness.quit();
        harness.join();
    }

    #[test]
    fn wait_baseline_is_per_call() {
        let harness = SignalHarness::new();
        let signaller = harness.clone();
        std::thread::spawn(move || {
            signaller.signal();
            signaller.signal();
        });
        harness.wait_for_signals(2).unwrap();
        // A second wait needs fresh signals.
        assert!(
            harness
                .wait_for_signals_timeout(1, Duration::from_millis(50))
                .is_err()
        );
        harness.quit();
        harness.join();
    }

    #[test]
    fn captured_error_surfaces_after_wait() {
        let harness = SignalHarness::new();
        let signaller = harness.clone();
        std::thread::spawn(move || {
            signaller.set_error(anyhow::anyhow!("worker exploded"));
            signaller.signal();
        });
        let err = harness.wait_for_signals_and_assert_success(1).unwrap_err();
        assert!(err.to_string().contains("worker exploded"));
        harness.quit();
        harness.join();
    }

    #[test]
    fn first_captured_error_wins() {
        let harness = SignalHarness::new();
        harness.set_error(anyhow::anyhow!("first"));
        harness.set_error(anyhow::anyhow!("second"));
        let err = harness.assert_success().unwrap_err();
        assert_eq!(err.to_string(), "first");
        // The slot is drained by assert_success.
        assert!(harness.assert_success().is_ok());
        harness.quit();
        harness.join();
    }

    #[test]
    fn quit_drains_queued_work_before_stopping() {
        let harness = SignalHarness::new();
        let ran = Arc::new(AtomicU64::new(0));
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            harness.post(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        harness.quit();
        harness.join();
        assert_eq!(ran.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn join_is_idempotent() {
        let harness = SignalHarness::new();
        harness.quit();
        harness.join();
        harness.join();
    }

    #[test]
    fn post_after_quit_is_dropped_not_panicking() {
        let harness = SignalHarness::new();
        harness.quit();
        harness.join();
        harness.post(|| {});
    }
}
