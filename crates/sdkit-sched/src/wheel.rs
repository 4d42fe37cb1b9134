//! Hashed-wheel timer.
//!
//! A fixed ring of slots is advanced by one worker thread every tick. A
//! timeout scheduled `d` into the future lands in slot
//! `deadline_tick mod wheel_size` with a round counter telling the worker
//! how many full revolutions to skip before firing it. Timeouts are never
//! early: a task runs on the first tick boundary at or after its deadline.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SchedError, SchedResult};

/// Timer sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Tick length in milliseconds.
    pub tick_ms: u64,
    /// Number of slots; rounded up to a power of two.
    pub wheel_size: usize,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            wheel_size: 512,
        }
    }
}

impl TimerConfig {
    /// Checks that tick and wheel size are non-zero.
    pub fn validate(&self) -> SchedResult<()> {
        if self.tick_ms == 0 {
            return Err(SchedError::InvalidArgument("tick_ms must be > 0".into()));
        }
        if self.wheel_size == 0 {
            return Err(SchedError::InvalidArgument("wheel_size must be > 0".into()));
        }
        Ok(())
    }

    /// Tick length as a duration.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const EXPIRED: u8 = 2;

type TimerTask = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    rounds: u64,
    state: Arc<AtomicU8>,
    task: TimerTask,
}

struct Wheel {
    slots: Box<[Mutex<VecDeque<Entry>>]>,
    mask: u64,
    tick: Duration,
    origin: Instant,
    /// Last tick whose slot has been swept. Ticks are numbered from 1.
    processed: AtomicU64,
    pending: Arc<AtomicUsize>,
    stopped: AtomicBool,
    shutdown: Mutex<bool>,
    wakeup: Condvar,
}

impl Wheel {
    fn slot(&self, tick: u64) -> &Mutex<VecDeque<Entry>> {
        &self.slots[(tick & self.mask) as usize]
    }

    fn deadline_tick(&self, delay: Duration) -> SchedResult<u64> {
        let too_far =
            || SchedError::InvalidArgument(format!("delay {:?} exceeds the timer range", delay));
        let due = self.origin.elapsed().checked_add(delay).ok_or_else(too_far)?;
        let tick_ns = self.tick.as_nanos().max(1);
        let ticks = u64::try_from(due.as_nanos().div_ceil(tick_ns)).map_err(|_| too_far())?;
        Ok(ticks.max(1))
    }

    /// Sleeps until tick `n` starts. Returns false on shutdown.
    fn wait_for_tick(&self, n: u64) -> bool {
        let offset = (self.tick.as_nanos() as u64).saturating_mul(n);
        let target = self.origin + Duration::from_nanos(offset);
        let mut shutdown = self.shutdown.lock();
        loop {
            if *shutdown {
                return false;
            }
            let now = Instant::now();
            if now >= target {
                return true;
            }
            self.wakeup.wait_for(&mut shutdown, target - now);
        }
    }

    fn sweep(&self, n: u64) -> Vec<Entry> {
        let mut slot = self.slot(n).lock();
        self.processed.store(n, Ordering::Release);
        let mut due = Vec::new();
        let mut keep = VecDeque::with_capacity(slot.len());
        for mut entry in slot.drain(..) {
            if entry.state.load(Ordering::Acquire) == CANCELLED {
                continue;
            }
            if entry.rounds == 0 {
                due.push(entry);
            } else {
                entry.rounds -= 1;
                keep.push_back(entry);
            }
        }
        *slot = keep;
        due
    }

    fn run(&self) {
        let mut tick = self.processed.load(Ordering::Acquire);
        while self.wait_for_tick(tick + 1) {
            tick += 1;
            for entry in self.sweep(tick) {
                if entry
                    .state
                    .compare_exchange(PENDING, EXPIRED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                self.pending.fetch_sub(1, Ordering::AcqRel);
                if catch_unwind(AssertUnwindSafe(entry.task)).is_err() {
                    warn!(tick, "timer task panicked");
                }
            }
        }
        debug!(tick, "timer worker exiting");
    }
}

/// A scheduled timeout.
#[derive(Debug, Clone)]
pub struct TimeoutHandle {
    state: Arc<AtomicU8>,
    pending: Arc<AtomicUsize>,
    deadline_tick: u64,
}

impl TimeoutHandle {
    /// Prevents the task from running. Returns false when it already ran
    /// or was already cancelled.
    pub fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        won
    }

    /// True once [`TimeoutHandle::cancel`] succeeded or the timer stopped
    /// before the task ran.
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// True once the task has been handed to the worker to run.
    pub fn is_expired(&self) -> bool {
        self.state.load(Ordering::Acquire) == EXPIRED
    }

    /// Tick on which the task is due.
    pub fn deadline_tick(&self) -> u64 {
        self.deadline_tick
    }
}

/// A tick-driven timer with O(1) scheduling and cancellation.
///
/// Tasks run on the timer's worker thread, in scheduling order within a
/// tick; long-running tasks delay the ticks behind them. A task must not
/// call [`HashedWheelTimer::stop`] on its own timer.
pub struct HashedWheelTimer {
    wheel: Arc<Wheel>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HashedWheelTimer {
    /// Starts the worker thread.
    pub fn start(config: TimerConfig) -> SchedResult<Self> {
        config.validate()?;
        let wheel_size = config.wheel_size.next_power_of_two();
        let slots = (0..wheel_size)
            .map(|_| Mutex::new(VecDeque::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let wheel = Arc::new(Wheel {
            slots,
            mask: wheel_size as u64 - 1,
            tick: config.tick(),
            origin: Instant::now(),
            processed: AtomicU64::new(0),
            pending: Arc::new(AtomicUsize::new(0)),
            stopped: AtomicBool::new(false),
            shutdown: Mutex::new(false),
            wakeup: Condvar::new(),
        });
        let worker_wheel = Arc::clone(&wheel);
        let worker = std::thread::Builder::new()
            .name("sdkit-wheel-timer".into())
            .spawn(move || worker_wheel.run())
            .map_err(|e| SchedError::Internal(format!("failed to spawn timer worker: {}", e)))?;
        debug!(tick_ms = config.tick_ms, wheel_size, "timer started");
        Ok(Self {
            wheel,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Runs `task` once `delay` has elapsed, rounded up to the next tick.
    ///
    /// Fails with `InvalidArgument` when the deadline cannot be expressed
    /// as a tick number, and with `Stopped` after [`HashedWheelTimer::stop`].
    pub fn schedule<F>(&self, delay: Duration, task: F) -> SchedResult<TimeoutHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let wheel = &self.wheel;
        if wheel.stopped.load(Ordering::SeqCst) {
            return Err(SchedError::Stopped);
        }
        let deadline = wheel.deadline_tick(delay)?;
        let state = Arc::new(AtomicU8::new(PENDING));
        let mut task: Option<TimerTask> = Some(Box::new(task));
        loop {
            let target = deadline.max(wheel.processed.load(Ordering::Acquire) + 1);
            let mut slot = wheel.slot(target).lock();
            if wheel.stopped.load(Ordering::SeqCst) {
                return Err(SchedError::Stopped);
            }
            // The worker sweeps a slot while holding its lock, so once we hold
            // it `processed` cannot move past `target`.
            let processed = wheel.processed.load(Ordering::Acquire);
            if processed >= target {
                continue;
            }
            let Some(task) = task.take() else {
                return Err(SchedError::Internal("timer task consumed twice".into()));
            };
            let rounds = (target - processed - 1) >> wheel.mask.count_ones();
            slot.push_back(Entry {
                rounds,
                state: Arc::clone(&state),
                task,
            });
            wheel.pending.fetch_add(1, Ordering::AcqRel);
            return Ok(TimeoutHandle {
                state,
                pending: Arc::clone(&wheel.pending),
                deadline_tick: target,
            });
        }
    }

    /// Number of scheduled tasks that have neither run nor been cancelled.
    pub fn pending(&self) -> usize {
        self.wheel.pending.load(Ordering::Acquire)
    }

    /// Stops the worker and cancels everything still scheduled. Returns the
    /// number of tasks that will now never run. Idempotent.
    pub fn stop(&self) -> usize {
        let wheel = &self.wheel;
        wheel.stopped.store(true, Ordering::SeqCst);
        {
            let mut shutdown = wheel.shutdown.lock();
            *shutdown = true;
            wheel.wakeup.notify_all();
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("timer worker panicked");
            }
        }
        let mut cancelled = 0;
        for slot in wheel.slots.iter() {
            for entry in slot.lock().drain(..) {
                if entry
                    .state
                    .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    wheel.pending.fetch_sub(1, Ordering::AcqRel);
                    cancelled += 1;
                }
            }
        }
        if cancelled > 0 {
            debug!(cancelled, "timer stopped with outstanding tasks");
        }
        cancelled
    }
}

impl Drop for HashedWheelTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn fast(wheel_size: usize) -> TimerConfig {
        TimerConfig {
            tick_ms: 5,
            wheel_size,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(TimerConfig::default().validate().is_ok());
        assert!(TimerConfig { tick_ms: 0, wheel_size: 8 }.validate().is_err());
        assert!(TimerConfig { tick_ms: 1, wheel_size: 0 }.validate().is_err());
        assert!(HashedWheelTimer::start(TimerConfig { tick_ms: 0, wheel_size: 8 }).is_err());
    }

    #[test]
    fn test_out_of_range_delay_is_rejected() {
        let timer = HashedWheelTimer::start(TimerConfig {
            tick_ms: 1,
            wheel_size: 8,
        })
        .unwrap();
        for delay in [Duration::MAX, Duration::from_secs(u64::MAX / 2)] {
            let err = timer.schedule(delay, || {}).unwrap_err();
            assert!(matches!(err, SchedError::InvalidArgument(_)), "{:?}", delay);
        }
        assert_eq!(timer.pending(), 0);

        let year = timer
            .schedule(Duration::from_secs(365 * 24 * 3600), || {})
            .unwrap();
        assert!(year.deadline_tick() >= 365 * 24 * 3600 * 1000);
        assert_eq!(timer.stop(), 1);
        assert!(year.is_cancelled());
    }

    #[test]
    fn test_task_fires_not_early() {
        let timer = HashedWheelTimer::start(fast(8)).unwrap();
        let (tx, rx) = mpsc::channel();
        let scheduled = Instant::now();
        timer
            .schedule(Duration::from_millis(30), move || {
                tx.send(Instant::now()).unwrap();
            })
            .unwrap();
        let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired.duration_since(scheduled) >= Duration::from_millis(30));
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_delay_beyond_one_revolution() {
        // 4 slots of 5ms: 60ms needs several rounds
        let timer = HashedWheelTimer::start(fast(4)).unwrap();
        let (tx, rx) = mpsc::channel();
        let scheduled = Instant::now();
        let handle = timer
            .schedule(Duration::from_millis(60), move || {
                tx.send(Instant::now()).unwrap();
            })
            .unwrap();
        let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired.duration_since(scheduled) >= Duration::from_millis(60));
        assert!(handle.is_expired());
    }

    #[test]
    fn test_same_tick_runs_in_schedule_order() {
        let timer = HashedWheelTimer::start(TimerConfig {
            tick_ms: 50,
            wheel_size: 8,
        })
        .unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            timer
                .schedule(Duration::from_millis(1), move || tx.send(i).unwrap())
                .unwrap();
        }
        let order: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cancel_prevents_run() {
        let timer = HashedWheelTimer::start(fast(8)).unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = timer
            .schedule(Duration::from_millis(20), move || tx.send(()).unwrap())
            .unwrap();
        assert_eq!(timer.pending(), 1);
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());
        assert_eq!(timer.pending(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_stop_reports_outstanding_and_rejects_new_work() {
        let timer = HashedWheelTimer::start(fast(8)).unwrap();
        let handles: Vec<_> = (0..3)
            .map(|_| timer.schedule(Duration::from_secs(60), || {}).unwrap())
            .collect();
        let cancelled = timer
            .schedule(Duration::from_secs(60), || {})
            .unwrap();
        assert!(cancelled.cancel());
        assert_eq!(timer.stop(), 3);
        assert!(handles.iter().all(|h| h.is_cancelled()));
        assert_eq!(timer.stop(), 0);
        assert!(matches!(
            timer.schedule(Duration::from_millis(1), || {}),
            Err(SchedError::Stopped)
        ));
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let timer = HashedWheelTimer::start(fast(8)).unwrap();
        let (tx, rx) = mpsc::channel();
        timer
            .schedule(Duration::from_millis(1), || panic!("task failure"))
            .unwrap();
        timer
            .schedule(Duration::from_millis(20), move || tx.send(()).unwrap())
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
