//! Background acquisition loop with reconnect and backoff

use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::backoff::BackoffScheduler;
use super::state::SharedFrameState;
use crate::transport::{StreamHandle, Transport};

/// Signals from the engine to the loop.
///
/// Reconnect is a generation counter, stop is a flag owned by each run; both
/// wake a backoff sleep early through the condvar.
pub(crate) struct LoopControl {
    generation: AtomicU64,
    target: RwLock<String>,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

/// Why an interruptible sleep returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Elapsed,
    Stopped,
    Reconnect,
}

impl LoopControl {
    pub(crate) fn new(target: String) -> Self {
        Self {
            generation: AtomicU64::new(0),
            target: RwLock::new(target),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    pub(crate) fn target(&self) -> String {
        self.target.read().clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn request_stop(&self, stop: &AtomicBool) {
        stop.store(true, Ordering::SeqCst);
        self.notify();
    }

    /// Swaps the target (if given) and bumps the generation
    pub(crate) fn request_reconnect(&self, new_target: Option<String>) {
        if let Some(target) = new_target {
            *self.target.write() = target;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify();
    }

    fn notify(&self) {
        // Taking the lock orders the flag store before a sleeper's check-then-wait
        let _guard = self.wake_lock.lock();
        self.wake.notify_all();
    }

    /// Sleeps up to `delay`, returning early on stop or a generation change
    pub(crate) fn sleep(&self, delay: Duration, seen_generation: u64, stop: &AtomicBool) -> Wake {
        let deadline = Instant::now() + delay;
        let mut guard = self.wake_lock.lock();

        loop {
            if stop.load(Ordering::SeqCst) {
                return Wake::Stopped;
            }
            if self.generation() != seen_generation {
                return Wake::Reconnect;
            }
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                return Wake::Elapsed;
            }
        }
    }
}

/// Data shared by the engine, the loop and readers
pub(crate) struct Shared {
    pub(crate) state: SharedFrameState,
    pub(crate) control: LoopControl,
}

/// Why the loop left the connected state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Open,
    Read,
    /// Operator asked for a reconnect; not counted as a failure
    Reconnect,
}

enum LoopState {
    Disconnected,
    Connecting,
    Connected(Box<dyn StreamHandle>),
    Failed(Failure),
    Stopped,
}

impl LoopState {
    fn name(&self) -> &'static str {
        match self {
            LoopState::Disconnected => "disconnected",
            LoopState::Connecting => "connecting",
            LoopState::Connected(_) => "connected",
            LoopState::Failed(_) => "failed",
            LoopState::Stopped => "stopped",
        }
    }
}

/// The acquisition state machine.
///
/// `Disconnected -> Connecting -> Connected -> (Failed -> Connecting)`, with
/// `Stopped` reachable from everywhere. Retries never give up.
pub(crate) struct CaptureLoop {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    backoff: BackoffScheduler,
    seen_generation: u64,
    /// Target of the open session, or of the last attempt
    session_target: String,
    /// Whether the open session has published its first frame
    announced: bool,
    frames: u64,
}

impl CaptureLoop {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        shared: Arc<Shared>,
        stop: Arc<AtomicBool>,
        backoff: BackoffScheduler,
    ) -> Self {
        let seen_generation = shared.control.generation();
        let session_target = shared.control.target();
        Self {
            transport,
            shared,
            stop,
            backoff,
            seen_generation,
            session_target,
            announced: false,
            frames: 0,
        }
    }

    pub(crate) fn run(mut self) {
        info!(url = %self.shared.control.target(), "Capture loop started");

        let mut state = LoopState::Disconnected;
        loop {
            state = self.step(state);
            if matches!(state, LoopState::Stopped) {
                break;
            }
        }

        info!(frames = self.frames, "Capture loop stopped");
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn step(&mut self, state: LoopState) -> LoopState {
        if self.is_stopped() {
            return self.halt(state);
        }

        match state {
            LoopState::Disconnected => LoopState::Connecting,
            LoopState::Connecting => self.connect(),
            LoopState::Connected(handle) => self.read(handle),
            LoopState::Failed(failure) => self.recover(failure),
            LoopState::Stopped => LoopState::Stopped,
        }
    }

    fn halt(&mut self, state: LoopState) -> LoopState {
        debug!(state = state.name(), "Stop observed");
        if let LoopState::Connected(handle) = state {
            handle.release();
        }
        LoopState::Stopped
    }

    fn connect(&mut self) -> LoopState {
        let control = &self.shared.control;
        self.seen_generation = control.generation();
        let target = control.target();
        self.session_target = target.clone();
        self.announced = false;

        match self.transport.open(&target) {
            Ok(handle) => {
                if self.is_stopped() {
                    handle.release();
                    return LoopState::Stopped;
                }
                debug!(url = %target, "Session opened, waiting for first frame");
                LoopState::Connected(handle)
            }
            Err(_) if self.is_stopped() => LoopState::Stopped,
            Err(e) => {
                let attempts = self.shared.state.mark_failed(&target, e.to_string(), true);
                warn!(
                    url = %target,
                    attempt = attempts,
                    retry_in = %format!("{:.1}s", self.backoff.current()),
                    error = %e,
                    "Stream open failed"
                );
                LoopState::Failed(Failure::Open)
            }
        }
    }

    fn read(&mut self, mut handle: Box<dyn StreamHandle>) -> LoopState {
        if self.shared.control.generation() != self.seen_generation {
            handle.release();
            let target = self.shared.control.target();
            self.shared.state.mark_reconnecting(&target);
            info!(url = %target, "Dropping session for reconnect");
            return LoopState::Failed(Failure::Reconnect);
        }

        match handle.read() {
            Ok(frame) => {
                // A read can outlast stop(); nothing is written after it
                if self.is_stopped() {
                    handle.release();
                    return LoopState::Stopped;
                }
                if self.announced {
                    self.shared.state.write_frame(frame);
                } else {
                    // Connected only once the first frame is in hand
                    self.backoff.reset();
                    self.shared.state.mark_connected(&self.session_target, frame);
                    self.announced = true;
                    info!(url = %self.session_target, "Stream connected");
                }
                self.frames += 1;
                if self.frames % 300 == 0 {
                    let status = self.shared.state.read_status();
                    debug!(
                        frames = self.frames,
                        fps = %format!("{:.1}", status.fps),
                        resolution = %format!("{}x{}", status.width, status.height),
                        "Capture progress"
                    );
                }
                LoopState::Connected(handle)
            }
            Err(e) => {
                handle.release();
                if self.is_stopped() {
                    return LoopState::Stopped;
                }
                if !self.announced {
                    // No frame ever arrived: a failed attempt, not a dropped session
                    let state = &self.shared.state;
                    let attempts = state.mark_failed(&self.session_target, e.to_string(), true);
                    warn!(
                        url = %self.session_target,
                        attempt = attempts,
                        error = %e,
                        "Stream produced no frame"
                    );
                    return LoopState::Failed(Failure::Open);
                }
                self.shared
                    .state
                    .mark_failed(&self.session_target, e.to_string(), false);
                warn!(error = %e, "Frame read failed, reconnecting");
                LoopState::Failed(Failure::Read)
            }
        }
    }

    fn recover(&mut self, failure: Failure) -> LoopState {
        if failure == Failure::Reconnect {
            self.backoff.reset();
            return LoopState::Connecting;
        }

        let delay = self.backoff.current_duration();
        match self
            .shared
            .control
            .sleep(delay, self.seen_generation, &self.stop)
        {
            Wake::Elapsed => {
                self.backoff.next_delay();
                LoopState::Connecting
            }
            Wake::Reconnect => {
                let target = self.shared.control.target();
                self.shared.state.mark_reconnecting(&target);
                info!(url = %target, "Reconnect requested during backoff");
                self.backoff.reset();
                LoopState::Connecting
            }
            Wake::Stopped => LoopState::Stopped,
        }
    }
}
