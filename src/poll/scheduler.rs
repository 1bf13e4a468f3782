//! Poll scheduler: a restartable repeating timer with an in-flight guard.
//!
//! State machine: `Idle` (no timer) ⇄ `Polling` (timer task alive). The
//! owner starts it when there is something to poll and stops it when there
//! is not. Stopping is cooperative: the timer task stops waiting for ticks,
//! but a tick that is already running finishes and applies its results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shortest period a timer is allowed to run at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// `interval` raised to [`MIN_INTERVAL`]; tokio timers panic on a zero period.
pub fn clamp_interval(stream: &str, interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        warn!(stream, "Poll interval below minimum, using {MIN_INTERVAL:?}");
        MIN_INTERVAL
    } else {
        interval
    }
}

/// Work performed on every tick.
#[async_trait]
pub trait PollTask: Send + Sync + 'static {
    async fn tick(&self);
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
}

/// Poller timing.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Stream name used in logs.
    pub name: &'static str,
    pub interval: Duration,
}

/// Held while a fetch is outstanding. Dropping it clears the flag.
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Repeating timer for one poll stream.
pub struct Poller {
    config: PollerConfig,
    /// Shared by every loop this poller ever spawns, so a restarted loop
    /// cannot overlap a fetch still running from the previous one.
    in_flight: Arc<AtomicBool>,
    running: Mutex<Option<RunningLoop>>,
}

impl Poller {
    pub fn new(mut config: PollerConfig) -> Self {
        config.interval = clamp_interval(config.name, config.interval);
        Self {
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PollerState {
        match self.lock_running().as_ref() {
            Some(running) if !running.handle.is_finished() => PollerState::Polling,
            _ => PollerState::Idle,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.state() == PollerState::Polling
    }

    /// A fetch for this stream is outstanding.
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the in-flight slot, or `None` if a fetch is already running.
    pub fn try_acquire(&self) -> Option<InFlightGuard> {
        acquire(&self.in_flight)
    }

    /// Idle → Polling. The first tick fires one interval after start.
    /// Returns `false` if already polling.
    ///
    /// The loop holds `task` weakly and ends on its own once the task is
    /// dropped.
    pub fn start(&self, task: Weak<dyn PollTask>) -> bool {
        let mut running = self.lock_running();
        if matches!(running.as_ref(), Some(r) if !r.handle.is_finished()) {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let in_flight = Arc::clone(&self.in_flight);
        let config = self.config.clone();
        let first_tick = tokio::time::Instant::now() + config.interval;
        let handle = tokio::spawn(run_loop(config, first_tick, task, in_flight, stop_rx));

        info!(
            stream = self.config.name,
            interval_ms = self.config.interval.as_millis() as u64,
            "Poller started"
        );
        *running = Some(RunningLoop { stop_tx, handle });
        true
    }

    /// Polling → Idle. Pending ticks are cancelled; an outstanding fetch is
    /// left to finish. Returns `false` if already idle.
    pub fn stop(&self) -> bool {
        let Some(running) = self.lock_running().take() else {
            return false;
        };
        let _ = running.stop_tx.send(true);
        info!(stream = self.config.name, "Poller stopped");
        !running.handle.is_finished()
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<RunningLoop>> {
        // A poisoned lock only means a panic elsewhere; the Option is still valid.
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn acquire(flag: &Arc<AtomicBool>) -> Option<InFlightGuard> {
    flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .ok()
        .map(|_| InFlightGuard {
            flag: Arc::clone(flag),
        })
}

async fn run_loop(
    config: PollerConfig,
    first_tick: tokio::time::Instant,
    task: Weak<dyn PollTask>,
    in_flight: Arc<AtomicBool>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval_at(first_tick, config.interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = stop_rx.changed() => break,
        }

        if *stop_rx.borrow() {
            break;
        }

        let Some(task) = task.upgrade() else {
            debug!(stream = config.name, "Poll target dropped, ending loop");
            break;
        };

        match acquire(&in_flight) {
            Some(_guard) => task.tick().await,
            None => debug!(stream = config.name, "Previous fetch still outstanding, skipping tick"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Counts ticks; each tick takes `work` of (virtual) time.
    struct CountingTask {
        ticks: AtomicUsize,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
        work: Duration,
    }

    impl CountingTask {
        fn new(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                ticks: AtomicUsize::new(0),
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
                work,
            })
        }

        fn ticks(&self) -> usize {
            self.ticks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PollTask for CountingTask {
        async fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn poller(interval_ms: u64) -> Poller {
        Poller::new(PollerConfig {
            name: "test",
            interval: Duration::from_millis(interval_ms),
        })
    }

    fn weak(task: &Arc<CountingTask>) -> Weak<dyn PollTask> {
        let task: Arc<dyn PollTask> = task.clone();
        Arc::downgrade(&task)
    }

    /// Let spawned tasks run without moving the paused clock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_fixed_interval_until_stopped() {
        let task = CountingTask::new(Duration::ZERO);
        let poller = poller(3000);

        assert_eq!(poller.state(), PollerState::Idle);
        assert!(poller.start(weak(&task)));
        assert!(!poller.start(weak(&task)));
        assert_eq!(poller.state(), PollerState::Polling);

        settle().await;
        assert_eq!(task.ticks(), 0);

        tokio::time::advance(Duration::from_millis(3000)).await;
        settle().await;
        assert_eq!(task.ticks(), 1);

        tokio::time::advance(Duration::from_millis(3000)).await;
        settle().await;
        assert_eq!(task.ticks(), 2);

        poller.stop();
        assert_eq!(poller.state(), PollerState::Idle);
        tokio::time::advance(Duration::from_millis(30_000)).await;
        settle().await;
        assert_eq!(task.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_never_overlaps() {
        // Each tick takes 7s against a 3s interval.
        let task = CountingTask::new(Duration::from_secs(7));
        let poller = poller(3000);
        poller.start(weak(&task));

        for _ in 0..20 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
        assert!(task.ticks() >= 2);
        assert_eq!(task.max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_does_not_overlap_outstanding_fetch() {
        let task = CountingTask::new(Duration::from_secs(10));
        let poller = poller(1000);

        poller.start(weak(&task));
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert!(poller.in_flight());

        poller.stop();
        poller.start(weak(&task));
        // The new loop's first tick finds the slot taken.
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(task.ticks(), 1);
        assert_eq!(task.max_concurrent.load(Ordering::SeqCst), 1);

        // The stopped loop's fetch completes; then the new loop takes over.
        tokio::time::advance(Duration::from_secs(9)).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(task.ticks(), 2);
        assert_eq!(task.max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_outstanding_fetch_finish() {
        let task = CountingTask::new(Duration::from_secs(5));
        let poller = poller(1000);
        poller.start(weak(&task));
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(task.concurrent.load(Ordering::SeqCst), 1);

        poller.stop();
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        // Tick ran to completion instead of being aborted.
        assert_eq!(task.concurrent.load(Ordering::SeqCst), 0);
        assert!(!poller.in_flight());
        assert_eq!(task.ticks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ends_when_task_dropped() {
        let task = CountingTask::new(Duration::ZERO);
        let poller = poller(1000);
        poller.start(weak(&task));
        drop(task);
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_minimum() {
        let task = CountingTask::new(Duration::ZERO);
        let poller = poller(0);
        assert!(poller.start(weak(&task)));

        tokio::time::advance(MIN_INTERVAL).await;
        settle().await;
        assert_eq!(poller.state(), PollerState::Polling);
        assert_eq!(task.ticks(), 1);
        poller.stop();
    }

    #[test]
    fn guard_releases_on_drop() {
        let poller = poller(1000);
        let guard = poller.try_acquire().unwrap();
        assert!(poller.in_flight());
        assert!(poller.try_acquire().is_none());
        drop(guard);
        assert!(poller.try_acquire().is_some());
    }
}
