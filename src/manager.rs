/*!
A worker manager: four queues, a pool of worker threads, and the two gates
the supervisor flips to steer them.

The manager owns its workers; the workers only see [`ManagerShared`], the
set of queues and atomic gates, so there is no reference cycle anywhere in
the tree. The supervisor owns the managers and tears everything down from
the top.
*/

use crate::config::ManagerConfig;
use crate::queue::{ByteQueue, OverflowPolicy, WorkQueue};
use crate::transform::TransformFactory;
use crate::worker::WorkerThread;
use log::{info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long a non-fast stop waits for the queues to drain before giving up.
/// Joins stay bounded even when nothing is consuming any more.
const STOP_DRAIN_MAX: Duration = Duration::from_millis(500);
const STOP_DRAIN_TICK: Duration = Duration::from_millis(50);

/// Queues and gates shared by the manager, its workers, and the
/// supervisor's listener and publisher threads.
pub struct ManagerShared {
    pub name: String,
    pub globalname: String,
    pub lp_in: ByteQueue,
    pub hp_in: ByteQueue,
    pub lp_out: ByteQueue,
    pub hp_out: ByteQueue,
    processing: AtomicBool,
    stop_data: AtomicBool,
}

impl ManagerShared {
    fn new(name: &str, globalname: &str, policy: OverflowPolicy) -> ManagerShared {
        ManagerShared {
            name: name.to_owned(),
            globalname: globalname.to_owned(),
            lp_in: WorkQueue::with_policy(policy),
            hp_in: WorkQueue::with_policy(policy),
            lp_out: WorkQueue::with_policy(policy),
            hp_out: WorkQueue::with_policy(policy),
            processing: AtomicBool::new(false),
            stop_data: AtomicBool::new(true),
        }
    }

    /// Whether workers may dequeue and process.
    pub fn processing(&self) -> bool {
        self.processing.load(Ordering::Relaxed)
    }

    /// Whether data listeners must refrain from enqueuing.
    pub fn stop_data(&self) -> bool {
        self.stop_data.load(Ordering::Relaxed)
    }

    pub fn all_queues_empty(&self) -> bool {
        self.lp_in.is_empty()
            && self.hp_in.is_empty()
            && self.lp_out.is_empty()
            && self.hp_out.is_empty()
    }

    pub fn input_queues_empty(&self) -> bool {
        self.lp_in.is_empty() && self.hp_in.is_empty()
    }
}

pub struct WorkerManager {
    pub cfg: ManagerConfig,
    shared: Arc<ManagerShared>,
    workers: Vec<WorkerThread>,
    supervisor_name: String,
}

impl WorkerManager {
    pub fn new(
        supervisor_name: &str,
        cfg: ManagerConfig,
        policy: OverflowPolicy,
    ) -> WorkerManager {
        let globalname = format!("WorkerManager-{}-{}", supervisor_name, cfg.name);
        let shared = Arc::new(ManagerShared::new(&cfg.name, &globalname, policy));
        info!("{globalname} created");
        WorkerManager {
            cfg,
            shared,
            workers: Vec::new(),
            supervisor_name: supervisor_name.to_owned(),
        }
    }

    pub fn shared(&self) -> Arc<ManagerShared> {
        Arc::clone(&self.shared)
    }

    pub fn globalname(&self) -> &str {
        &self.shared.globalname
    }

    pub fn workers(&self) -> &[WorkerThread] {
        &self.workers
    }

    /// Construct `n` worker threads, one transform instance each.
    pub fn start_worker_threads(&mut self, n: usize, factory: &TransformFactory) {
        info!("{}: starting {} worker threads", self.shared.globalname, n);
        for i in 0..n {
            let name = format!(
                "WorkerThread-{}-{}-{}-{}",
                self.supervisor_name, self.cfg.name, self.cfg.worker_name, i
            );
            let worker = WorkerThread::spawn(i, name, self.shared(), factory());
            self.workers.push(worker);
        }
    }

    /// Broadcast a configuration message to every worker's transform.
    pub fn configure(&self, cfg: &Value) {
        info!("{}: broadcasting configuration", self.shared.globalname);
        for worker in &self.workers {
            worker.configure(cfg.clone());
        }
    }

    pub fn set_processing(&self, on: bool) {
        self.shared.processing.store(on, Ordering::Relaxed);
        info!("{}: processing={}", self.shared.globalname, on as u8);
    }

    pub fn set_stop_data(&self, on: bool) {
        self.shared.stop_data.store(on, Ordering::Relaxed);
        info!("{}: stopdata={}", self.shared.globalname, on);
    }

    /// Drain all four queues. Only the `reset` command calls this.
    pub fn clean_queues(&self) {
        let n = self.shared.lp_in.clear()
            + self.shared.hp_in.clear()
            + self.shared.lp_out.clear()
            + self.shared.hp_out.clear();
        info!("{}: dropped {} queued items", self.shared.globalname, n);
    }

    /// Stop the pool and join every thread.
    ///
    /// A fast stop wakes all queue waiters immediately and joins without
    /// draining. A non-fast stop first waits for the queues to empty, but
    /// only up to a deadline: once processing is off nothing will drain
    /// them, and a shutdown must never hang on a backlog.
    pub fn stop(&mut self, fast: bool) {
        if !fast {
            let deadline = Instant::now() + STOP_DRAIN_MAX;
            while !self.shared.all_queues_empty() {
                if Instant::now() >= deadline {
                    warn!(
                        "{}: queues still hold {} {} {} {} items, joining anyway",
                        self.shared.globalname,
                        self.shared.lp_in.len(),
                        self.shared.hp_in.len(),
                        self.shared.lp_out.len(),
                        self.shared.hp_out.len()
                    );
                    break;
                }
                thread::sleep(STOP_DRAIN_TICK);
            }
        }
        self.shared.lp_in.notify_all();
        self.shared.hp_in.notify_all();
        self.shared.lp_out.notify_all();
        self.shared.hp_out.notify_all();
        for worker in &mut self.workers {
            worker.stop();
        }
        info!("{}: all workers joined", self.shared.globalname);
    }
}
