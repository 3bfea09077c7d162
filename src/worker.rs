/*!
One processing thread of a worker pool.

Each [`WorkerThread`] owns an OS thread that pulls work from its manager's
input queues (high priority always first), runs the transform, and publishes
non-empty outputs to the matching result queue. A companion timer thread
wakes once a second to compute the processing rate and log the canonical
rate line.

The thread holds only an `Arc` of the manager's shared state (queues and
gates), never the manager itself; ownership flows strictly downward and
destruction is top-down.
*/

use crate::manager::ManagerShared;
use crate::queue::Priority;
use crate::transform::Transform;
use log::{debug, info};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Tick between queue checks; bounds idle CPU and shutdown latency.
pub const WORKER_TICK: Duration = Duration::from_millis(10);
/// Period of the rate accounting timer.
const RATE_INTERVAL: Duration = Duration::from_secs(1);
/// The timer sleeps in slices so a stop is observed promptly.
const RATE_SLICE: Duration = Duration::from_millis(100);

/// Observable states of a worker thread, as reported to monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 1,
    WaitingForData = 2,
    WaitingForProcessing = 4,
    Processing = 8,
    Terminated = 16,
}

impl WorkerState {
    fn from_u8(v: u8) -> WorkerState {
        match v {
            2 => WorkerState::WaitingForData,
            4 => WorkerState::WaitingForProcessing,
            8 => WorkerState::Processing,
            16 => WorkerState::Terminated,
            _ => WorkerState::Starting,
        }
    }
}

/// Counters shared between the worker, its rate timer and monitoring.
pub struct WorkerStats {
    state: AtomicU8,
    /// Items processed since the last timer tick.
    current: AtomicU64,
    /// Items processed over the thread's lifetime, folded in by the timer.
    total: AtomicU64,
    rate_bits: AtomicU64,
}

impl WorkerStats {
    fn new() -> WorkerStats {
        WorkerStats {
            state: AtomicU8::new(WorkerState::Starting as u8),
            current: AtomicU64::new(0),
            total: AtomicU64::new(0),
            rate_bits: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Events per second over the last timer interval.
    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    /// Lifetime count, including items not yet folded in by the timer.
    pub fn total_processed(&self) -> u64 {
        self.total.load(Ordering::Relaxed) + self.current.load(Ordering::Relaxed)
    }
}

pub struct WorkerThread {
    id: usize,
    globalname: String,
    stats: Arc<WorkerStats>,
    stop: Arc<AtomicBool>,
    config_tx: mpsc::Sender<Value>,
    handle: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Start the processing thread and its rate timer.
    pub fn spawn(
        id: usize,
        globalname: String,
        shared: Arc<ManagerShared>,
        transform: Box<dyn Transform>,
    ) -> WorkerThread {
        let stats = Arc::new(WorkerStats::new());
        let stop = Arc::new(AtomicBool::new(false));
        let (config_tx, config_rx) = mpsc::channel();

        let run_name = globalname.clone();
        let run_stats = Arc::clone(&stats);
        let run_stop = Arc::clone(&stop);
        let run_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            run_worker(run_name, run_shared, run_stats, run_stop, config_rx, transform)
        });

        let timer_name = globalname.clone();
        let timer_stats = Arc::clone(&stats);
        let timer_stop = Arc::clone(&stop);
        let timer = thread::spawn(move || run_rate_timer(timer_name, shared, timer_stats, timer_stop));

        info!("{globalname} started");
        WorkerThread {
            id,
            globalname,
            stats,
            stop,
            config_tx,
            handle: Some(handle),
            timer: Some(timer),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Hand a broadcast configuration message to this worker's transform.
    /// It is applied at the top of the worker loop.
    pub fn configure(&self, cfg: Value) {
        let _ = self.config_tx.send(cfg);
    }

    /// Ask the thread to stop and wait for it.
    ///
    /// The caller must have stopped the input queues first, otherwise a
    /// worker blocked on `get` only notices at its next wakeup.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
        self.stats.set_state(WorkerState::Terminated);
        info!("{} terminated", self.globalname);
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run_worker(
    name: String,
    shared: Arc<ManagerShared>,
    stats: Arc<WorkerStats>,
    stop: Arc<AtomicBool>,
    config_rx: mpsc::Receiver<Value>,
    mut transform: Box<dyn Transform>,
) {
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(WORKER_TICK);

        while let Ok(cfg) = config_rx.try_recv() {
            transform.configure(&cfg);
        }

        if !shared.processing() {
            stats.set_state(WorkerState::WaitingForProcessing);
            continue;
        }

        // High priority drains first whenever a worker picks work. The
        // emptiness probe and the blocking get can race with a sibling
        // worker; losing the race just means blocking until the next item
        // or the shutdown notification.
        let (item, priority) = if !shared.hp_in.is_empty() {
            match shared.hp_in.get() {
                Ok(item) => (item, Priority::High),
                Err(_) => break,
            }
        } else if !shared.lp_in.is_empty() {
            match shared.lp_in.get() {
                Ok(item) => (item, Priority::Low),
                Err(_) => break,
            }
        } else {
            stats.set_state(WorkerState::WaitingForData);
            continue;
        };

        stats.set_state(WorkerState::Processing);
        let result = transform.process(&item, priority);
        if !result.is_empty() {
            match priority {
                Priority::High => shared.hp_out.push(result),
                Priority::Low => shared.lp_out.push(result),
            }
        }
        stats.current.fetch_add(1, Ordering::Relaxed);
    }
    stats.set_state(WorkerState::Terminated);
    debug!("{name}: worker loop exited");
}

fn run_rate_timer(
    name: String,
    shared: Arc<ManagerShared>,
    stats: Arc<WorkerStats>,
    stop: Arc<AtomicBool>,
) {
    let mut last = Instant::now();
    'outer: loop {
        let mut slept = Duration::ZERO;
        while slept < RATE_INTERVAL {
            if stop.load(Ordering::Relaxed) {
                break 'outer;
            }
            thread::sleep(RATE_SLICE);
            slept += RATE_SLICE;
        }
        let elapsed = last.elapsed().as_secs_f64();
        last = Instant::now();
        let current = stats.current.swap(0, Ordering::Relaxed);
        let total = stats.total.fetch_add(current, Ordering::Relaxed) + current;
        let rate = if elapsed > 0.0 { current as f64 / elapsed } else { 0.0 };
        stats.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
        info!(
            "{} Rate Hz {:.1} Current {} Total {} Queues {} {}",
            name,
            rate,
            current,
            total,
            shared.lp_in.len(),
            shared.hp_in.len()
        );
    }
}
