use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{ExecutorState, Task, TaskExecutor};
use crate::config::ExecutorConfig;
use crate::error::BridgeError;

struct WorkQueue {
    tasks: VecDeque<Task>,
    running: usize,
    live_workers: usize,
}

struct Shared {
    state: AtomicU8,
    /// Dispatch gate: workers read `state` and dequeue while holding it.
    gate: Mutex<WorkQueue>,
    available: Condvar,
    drained: Condvar,
}

impl Shared {
    fn state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ExecutorState, to: ExecutorState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Wake every worker. Taking the gate first means a worker that has just
    /// read the old state is already parked on `available` and sees the signal.
    fn wake_all(&self) {
        let _queue = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.available.notify_all();
    }
}

/// Fixed-size thread pool that can halt dispatch without dropping work.
///
/// ## Example
///
/// ```
/// use msgbridge::{ExecutorConfig, PausableExecutor, TaskExecutor};
/// use std::sync::mpsc::channel;
/// use std::time::Duration;
///
/// let executor = PausableExecutor::new_paused(ExecutorConfig::default()).unwrap();
/// let (tx, rx) = channel();
/// executor.submit(Box::new(move || tx.send(7).unwrap())).unwrap();
///
/// // Nothing runs while paused.
/// assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
///
/// executor.resume().unwrap();
/// assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
///
/// executor.shutdown();
/// assert!(executor.await_termination(Duration::from_secs(1)).unwrap());
/// ```
pub struct PausableExecutor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PausableExecutor {
    /// Start a pool that dispatches immediately.
    pub fn new(config: ExecutorConfig) -> Result<Self, BridgeError> {
        Self::with_state(config, ExecutorState::Running)
    }

    /// Start a pool that queues work until `resume()` is called.
    pub fn new_paused(config: ExecutorConfig) -> Result<Self, BridgeError> {
        Self::with_state(config, ExecutorState::Paused)
    }

    fn with_state(config: ExecutorConfig, initial: ExecutorState) -> Result<Self, BridgeError> {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(initial as u8),
            gate: Mutex::new(WorkQueue {
                tasks: VecDeque::new(),
                running: 0,
                live_workers: 0,
            }),
            available: Condvar::new(),
            drained: Condvar::new(),
        });
        let executor = Self {
            shared,
            workers: Mutex::new(Vec::new()),
        };

        for index in 0..config.workers.max(1) {
            executor.spawn_worker(format!("{}-{}", config.thread_name, index))?;
        }
        debug!(workers = config.workers.max(1), state = %initial, "executor started");
        Ok(executor)
    }

    fn spawn_worker(&self, name: String) -> Result<(), BridgeError> {
        self.shared
            .gate
            .lock()
            .map_err(|_| BridgeError::LockPoisoned("worker spawn"))?
            .live_workers += 1;

        let shared = Arc::clone(&self.shared);
        match thread::Builder::new().name(name).spawn(move || work(shared)) {
            Ok(handle) => {
                self.workers
                    .lock()
                    .map_err(|_| BridgeError::LockPoisoned("worker spawn"))?
                    .push(handle);
                Ok(())
            }
            Err(e) => {
                self.shared
                    .gate
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .live_workers -= 1;
                self.shutdown();
                Err(BridgeError::WorkerSpawn(e.to_string()))
            }
        }
    }

    /// Number of tasks waiting to start.
    pub fn queued(&self) -> usize {
        self.shared
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .len()
    }

    /// Number of tasks currently executing.
    pub fn running(&self) -> usize {
        self.shared
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }

    fn reap_workers(&self) {
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn work(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                let state = shared.state();
                if state != ExecutorState::Paused {
                    if let Some(task) = queue.tasks.pop_front() {
                        queue.running += 1;
                        break task;
                    }
                    if state == ExecutorState::ShutDown {
                        queue.live_workers -= 1;
                        shared.drained.notify_all();
                        return;
                    }
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!("executor task panicked");
        }

        let mut queue = shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
        queue.running -= 1;
    }
}

impl TaskExecutor for PausableExecutor {
    fn submit(&self, task: Task) -> Result<(), BridgeError> {
        let mut queue = self
            .shared
            .gate
            .lock()
            .map_err(|_| BridgeError::LockPoisoned("submit"))?;
        let state = self.shared.state();
        if state == ExecutorState::ShutDown {
            return Err(BridgeError::Rejected("executor is shut down"));
        }
        queue.tasks.push_back(task);
        if state == ExecutorState::Running {
            self.shared.available.notify_one();
        }
        Ok(())
    }

    fn pause(&self) -> Result<(), BridgeError> {
        if !self
            .shared
            .transition(ExecutorState::Running, ExecutorState::Paused)
        {
            // Already paused or being paused by another caller. Pass through
            // the gate so no worker is left between state check and dequeue.
            drop(self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner));
            return Ok(());
        }
        // Once we hold the gate, no worker can be between its state check and
        // its dequeue, so nothing starts after this returns.
        match self.shared.gate.lock() {
            Ok(_queue) => {
                debug!("executor paused");
                Ok(())
            }
            Err(poisoned) => {
                self.shared
                    .transition(ExecutorState::Paused, ExecutorState::Running);
                self.shared.gate.clear_poison();
                drop(poisoned);
                self.shared.available.notify_all();
                warn!("dispatch gate poisoned during pause, still running");
                Err(BridgeError::InterruptedDuringPause(
                    "dispatch gate poisoned".into(),
                ))
            }
        }
    }

    fn resume(&self) -> Result<(), BridgeError> {
        if self
            .shared
            .transition(ExecutorState::Paused, ExecutorState::Running)
        {
            self.shared.wake_all();
            debug!("executor resumed");
        }
        Ok(())
    }

    fn shutdown(&self) {
        let previous = self
            .shared
            .state
            .swap(ExecutorState::ShutDown as u8, Ordering::AcqRel);
        if ExecutorState::from_u8(previous) != ExecutorState::ShutDown {
            debug!("executor shutting down");
        }
        self.shared.wake_all();
    }

    fn await_termination(&self, timeout: Duration) -> Result<bool, BridgeError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self
            .shared
            .gate
            .lock()
            .map_err(|_| BridgeError::LockPoisoned("await termination"))?;
        while queue.live_workers > 0 {
            let Some(deadline) = deadline else {
                queue = self
                    .shared
                    .drained
                    .wait(queue)
                    .map_err(|_| BridgeError::LockPoisoned("await termination"))?;
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                let abandoned = queue.tasks.len();
                queue.tasks.clear();
                self.shared.available.notify_all();
                warn!(
                    abandoned,
                    running = queue.running,
                    "executor did not terminate in time"
                );
                return Ok(false);
            }
            queue = self
                .shared
                .drained
                .wait_timeout(queue, deadline - now)
                .map_err(|_| BridgeError::LockPoisoned("await termination"))?
                .0;
        }
        drop(queue);
        self.reap_workers();
        Ok(true)
    }

    fn state(&self) -> ExecutorState {
        self.shared.state()
    }
}

impl Drop for PausableExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
