//! Recording doubles: an executor and broker wrappers that log every
//! lifecycle and acknowledgment call into one shared, ordered log.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use msgbridge::{
    BridgeError, Broker, BrokerConnection, BrokerError, Channel, Connection, ConnectionConfig,
    DeliveryHandler, DeliveryTag, ExecutorConfig, ExecutorState, InMemoryBroker,
    PausableExecutor, Session, Task, TaskExecutor,
};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn push(log: &CallLog, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

pub fn count(log: &CallLog, prefix: &str) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .count()
}

pub fn position(log: &CallLog, prefix: &str) -> Option<usize> {
    log.lock().unwrap().iter().position(|e| e.starts_with(prefix))
}

/// `PausableExecutor` that logs lifecycle calls and, on each transition,
/// whether the watched sessions had already moved.
pub struct RecordingExecutor {
    inner: PausableExecutor,
    log: CallLog,
    watched: Mutex<Vec<Arc<Session>>>,
    fail_pause: AtomicBool,
}

impl RecordingExecutor {
    pub fn new(log: CallLog, workers: usize) -> Self {
        Self {
            inner: PausableExecutor::new_paused(ExecutorConfig {
                workers,
                thread_name: "recording-worker".to_string(),
            })
            .unwrap(),
            log,
            watched: Mutex::new(Vec::new()),
            fail_pause: AtomicBool::new(false),
        }
    }

    pub fn watch(&self, session: Arc<Session>) {
        self.watched.lock().unwrap().push(session);
    }

    pub fn fail_next_pause(&self, fail: bool) {
        self.fail_pause.store(fail, Ordering::SeqCst);
    }

    fn paused_sessions(&self) -> usize {
        self.watched
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_paused())
            .count()
    }
}

impl TaskExecutor for RecordingExecutor {
    fn submit(&self, task: Task) -> Result<(), BridgeError> {
        self.inner.submit(task)
    }

    fn pause(&self) -> Result<(), BridgeError> {
        push(
            &self.log,
            format!("executor.pause sessions_paused={}", self.paused_sessions()),
        );
        if self.fail_pause.load(Ordering::SeqCst) {
            return Err(BridgeError::InterruptedDuringPause("interrupted".into()));
        }
        self.inner.pause()
    }

    fn resume(&self) -> Result<(), BridgeError> {
        let watched = self.watched.lock().unwrap().len();
        let running = watched - self.paused_sessions();
        push(&self.log, format!("executor.resume sessions_running={}", running));
        self.inner.resume()
    }

    fn shutdown(&self) {
        push(&self.log, "executor.shutdown");
        self.inner.shutdown()
    }

    fn await_termination(&self, timeout: Duration) -> Result<bool, BridgeError> {
        push(&self.log, "executor.await");
        self.inner.await_termination(timeout)
    }

    fn state(&self) -> ExecutorState {
        self.inner.state()
    }
}

pub struct RecordingBroker {
    pub inner: InMemoryBroker,
    pub log: CallLog,
}

impl Broker for RecordingBroker {
    fn connect(
        &self,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        Ok(Arc::new(RecordingConnection {
            inner: self.inner.connect(executor)?,
            log: Arc::clone(&self.log),
        }))
    }
}

struct RecordingConnection {
    inner: Arc<dyn BrokerConnection>,
    log: CallLog,
}

impl BrokerConnection for RecordingConnection {
    fn create_channel(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        Ok(Arc::new(RecordingChannel {
            inner: self.inner.create_channel()?,
            log: Arc::clone(&self.log),
        }))
    }

    fn close(&self) -> Result<(), BrokerError> {
        push(&self.log, "broker.close");
        self.inner.close()
    }
}

struct RecordingChannel {
    inner: Arc<dyn Channel>,
    log: CallLog,
}

impl Channel for RecordingChannel {
    fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), BrokerError> {
        push(&self.log, format!("channel.consume {}", consumer_tag));
        self.inner.basic_consume(queue, consumer_tag, handler)
    }

    fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        push(&self.log, format!("channel.cancel {}", consumer_tag));
        self.inner.basic_cancel(consumer_tag)
    }

    fn basic_ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        push(&self.log, format!("channel.ack {}", tag));
        self.inner.basic_ack(tag)
    }

    fn basic_nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        push(&self.log, format!("channel.nack {} requeue={}", tag, requeue));
        self.inner.basic_nack(tag, requeue)
    }

    fn close(&self) -> Result<(), BrokerError> {
        push(&self.log, "channel.close");
        self.inner.close()
    }
}

/// A connection wired to recording doubles over an in-memory broker.
pub struct Harness {
    pub connection: Connection,
    pub executor: Arc<RecordingExecutor>,
    pub broker: InMemoryBroker,
    pub log: CallLog,
}

impl Harness {
    pub fn new(workers: usize) -> Self {
        Self::with_grace(workers, Duration::from_secs(2))
    }

    pub fn with_grace(workers: usize, grace: Duration) -> Self {
        init_tracing();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let broker = InMemoryBroker::new();
        let executor = Arc::new(RecordingExecutor::new(Arc::clone(&log), workers));
        let recording = RecordingBroker {
            inner: broker.clone(),
            log: Arc::clone(&log),
        };
        let handle = recording
            .connect(Arc::clone(&executor) as Arc<dyn TaskExecutor>)
            .unwrap();
        let connection = Connection::new(
            handle,
            Arc::clone(&executor) as Arc<dyn TaskExecutor>,
            &ConnectionConfig::default().with_close_grace(grace),
        );
        Self {
            connection,
            executor,
            broker,
            log,
        }
    }

    /// Create a session and let the executor observe it.
    pub fn session(&self) -> Arc<Session> {
        let session = self.connection.create_session().unwrap();
        self.executor.watch(Arc::clone(&session));
        session
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

/// Poll `condition` for up to a second.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
