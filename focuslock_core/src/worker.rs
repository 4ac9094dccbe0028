//! Background autofocus loop.
//!
//! `AutofocusWorker` owns a controller behind a mutex and drives its step
//! function from one dedicated thread at the controller's loop rate. A
//! failed step is stored for `last_error()` and ends the loop; nothing is
//! retried. The thread is stopped and joined when the worker is dropped.
use crossbeam_channel as xch;
use focuslock_traits::{Camera, Clock, MonotonicClock, Stage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::calibration::FocusCalibration;
use crate::controller::AutofocusController;
use crate::error::{FocusError, Result};
use crate::sample::AutofocusSample;
use crate::util;

/// Bounded wait used by `stop(true)` and `Drop`.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

type Observer = Box<dyn FnMut(&AutofocusSample) + Send>;

struct Shared<C, S, K> {
    controller: AutofocusController<C, S, K>,
    observer: Option<Observer>,
    telemetry: Option<xch::Sender<AutofocusSample>>,
}

pub struct AutofocusWorker<C, S, K = MonotonicClock> {
    shared: Arc<Mutex<Shared<C, S, K>>>,
    stop: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<eyre::Report>>>,
    handle: Option<JoinHandle<()>>,
    clock: K,
    join_timeout: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Signal the loop and optionally wait for it, up to `timeout`.
fn shutdown(stop: &AtomicBool, handle: &mut Option<JoinHandle<()>>, wait: bool, timeout: Duration) {
    stop.store(true, Ordering::Release);
    if !wait {
        return;
    }
    let Some(h) = handle.take() else {
        return;
    };
    let deadline = Instant::now() + timeout;
    while !h.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(?timeout, "autofocus worker did not stop in time");
            *handle = Some(h);
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    match h.join() {
        Ok(()) => tracing::trace!("autofocus worker joined"),
        Err(e) => tracing::warn!(?e, "autofocus worker panicked"),
    }
}

impl<C, S> AutofocusWorker<C, S, MonotonicClock>
where
    C: Camera + Send + 'static,
    S: Stage + Send + 'static,
{
    pub fn new(controller: AutofocusController<C, S, MonotonicClock>) -> Self {
        Self::with_clock(controller, MonotonicClock::new())
    }
}

impl<C, S, K> AutofocusWorker<C, S, K>
where
    C: Camera + Send + 'static,
    S: Stage + Send + 'static,
    K: Clock + Clone + Send + 'static,
{
    /// Worker pacing its loop with `clock` (normally the controller's own).
    pub fn with_clock(controller: AutofocusController<C, S, K>, clock: K) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                controller,
                observer: None,
                telemetry: None,
            })),
            stop: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(Mutex::new(None)),
            handle: None,
            clock,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Callback invoked with every sample, on the worker thread.
    pub fn with_observer<F>(self, observer: F) -> Self
    where
        F: FnMut(&AutofocusSample) + Send + 'static,
    {
        lock(&self.shared).observer = Some(Box::new(observer));
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Bounded sample feed. When the consumer falls behind, new samples are dropped.
    pub fn subscribe(&self, capacity: usize) -> xch::Receiver<AutofocusSample> {
        let (tx, rx) = xch::bounded(capacity.max(1));
        lock(&self.shared).telemetry = Some(tx);
        rx
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the loop thread. No-op while a loop is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if let Some(Err(e)) = self.handle.take().map(JoinHandle::join) {
            tracing::warn!(?e, "previous autofocus worker thread panicked");
        }
        self.stop.store(false, Ordering::Release);
        *lock(&self.last_error) = None;

        let shared = Arc::clone(&self.shared);
        let stop = Arc::clone(&self.stop);
        let last_error = Arc::clone(&self.last_error);
        let clock = self.clock.clone();
        let loop_hz = lock(&self.shared).controller.loop_hz();

        let handle = std::thread::Builder::new()
            .name("autofocus".into())
            .spawn(move || run_loop(&shared, &stop, &last_error, &clock, loop_hz))
            .map_err(|e| eyre::eyre!("spawn autofocus worker: {e}"))?;
        self.handle = Some(handle);
        tracing::info!(loop_hz, "autofocus worker started");
        Ok(())
    }

    /// Ask the loop to end. With `wait`, block until it exits or the join timeout passes.
    pub fn stop(&mut self, wait: bool) {
        shutdown(&self.stop, &mut self.handle, wait, self.join_timeout);
        tracing::info!(wait, "autofocus worker stop requested");
    }

    /// Rendered error that ended the last run, if any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).as_ref().map(|e| format!("{e:#}"))
    }

    /// Device error kind behind `last_error`, when it came from the camera or stage.
    pub fn last_error_kind(&self) -> Option<FocusError> {
        lock(&self.last_error)
            .as_ref()
            .and_then(|e| e.downcast_ref::<FocusError>().cloned())
    }

    pub fn take_last_error(&self) -> Option<eyre::Report> {
        lock(&self.last_error).take()
    }

    /// Swap the calibration between two steps.
    pub fn set_calibration(&self, calibration: FocusCalibration) {
        lock(&self.shared).controller.set_calibration(calibration);
    }

    /// Run `f` with the controller while no step is in progress.
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut AutofocusController<C, S, K>) -> R) -> R {
        f(&mut lock(&self.shared).controller)
    }
}

fn run_loop<C, S, K>(
    shared: &Mutex<Shared<C, S, K>>,
    stop: &AtomicBool,
    last_error: &Mutex<Option<eyre::Report>>,
    clock: &K,
    loop_hz: f64,
) where
    C: Camera,
    S: Stage,
    K: Clock,
{
    let period = util::period(loop_hz);
    let dt_s = 1.0 / loop_hz;
    let mut dropped: u64 = 0;
    while !stop.load(Ordering::Acquire) {
        let t0 = clock.now();
        {
            let mut guard = lock(shared);
            let state = &mut *guard;
            match state.controller.run_step(Some(dt_s)) {
                Ok(sample) => {
                    if let Some(observer) = state.observer.as_mut() {
                        observer(&sample);
                    }
                    if let Some(tx) = state.telemetry.as_ref() {
                        match tx.try_send(sample) {
                            Ok(()) => {}
                            Err(xch::TrySendError::Full(_)) => {
                                dropped += 1;
                                tracing::trace!(dropped, "telemetry consumer behind, sample dropped");
                            }
                            Err(xch::TrySendError::Disconnected(_)) => {
                                tracing::debug!("telemetry consumer disconnected");
                                state.telemetry = None;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %format!("{e:#}"), "autofocus step failed, worker stopping");
                    *lock(last_error) = Some(e);
                    stop.store(true, Ordering::Release);
                    return;
                }
            }
        }
        let rest = util::residual(period, clock.now().saturating_duration_since(t0));
        if !rest.is_zero() && !stop.load(Ordering::Acquire) {
            clock.sleep(rest);
        }
    }
    tracing::debug!("autofocus worker loop exiting");
}

impl<C, S, K> Drop for AutofocusWorker<C, S, K> {
    fn drop(&mut self) {
        shutdown(&self.stop, &mut self.handle, true, self.join_timeout);
    }
}
