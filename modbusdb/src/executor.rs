//! Single-concurrency priority queue, per-transaction timeout, and per-unit
//! backoff.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use modbusdb_driver::Driver;
use tokio::sync::{oneshot, Mutex, Notify};

use crate::datamap::Select;
use crate::error::Error;
use crate::events::{Event, EventBus};
use crate::stats::{ResponseOutcome, UnitStats};
use crate::transaction::{Priority, Transaction, TransactionData, TransactionId, TransactionSnapshot};
use crate::wire::{self, WriteValues};

struct QueuedTask {
    priority: Priority,
    sequence: u64,
    select: Select,
    values: Option<WriteValues>,
    timeout: Duration,
    reply: oneshot::Sender<Result<RequestOutcome, Error>>,
}

/// What one enqueued request resolves to: the finished transaction's
/// snapshot and its read/write result. Driver failures, timeouts, and
/// per-unit backoff shortcuts are all carried in `result` rather than
/// rejecting the caller outright, so a batch call (`mget`/`mset`) can record
/// every transaction and merge only the successful ones into its payload.
#[derive(Debug)]
pub struct RequestOutcome {
    pub snapshot: TransactionSnapshot,
    pub result: Result<TransactionData, Error>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedTask {}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; within a priority, lower sequence (older) first.
        self.priority.cmp(&other.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    driver: Arc<dyn Driver>,
    queue: Mutex<BinaryHeap<QueuedTask>>,
    notify: Notify,
    next_sequence: AtomicU16,
    next_id: AtomicU16,
    destroyed: AtomicBool,
    units: Mutex<HashMap<u8, UnitStats>>,
    events: EventBus,
}

/// Owns the concurrency-1 worker. Cloning an [`Executor`] shares the same
/// queue and worker; there is exactly one worker task per distinct queue.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    pub fn new(driver: Arc<dyn Driver>, events: EventBus) -> Self {
        let inner = Arc::new(Inner {
            driver,
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_sequence: AtomicU16::new(0),
            next_id: AtomicU16::new(0),
            destroyed: AtomicBool::new(false),
            units: Mutex::new(HashMap::new()),
            events,
        });
        tokio::spawn(Self::run_worker(inner.clone()));
        Executor { inner }
    }

    /// Enqueues a read or write [`Select`] at the given priority and awaits
    /// its outcome. Returns `Err` only for a failure the caller must treat
    /// as fatal to the whole operation (the instance was already destroyed
    /// when this call was made, or the select failed construction into a
    /// `Transaction`); every other failure — driver error, timeout, backoff
    /// shortcut, or a dequeue-time destroy — comes back inside
    /// `Ok(RequestOutcome)` with the failure recorded on `result`.
    pub async fn request(
        &self,
        select: Select,
        values: Option<WriteValues>,
        priority: Priority,
        timeout: Duration,
    ) -> Result<RequestOutcome, Error> {
        if self.inner.destroyed.load(AtomicOrdering::SeqCst) {
            return Err(Error::Aborted);
        }

        let (reply, recv) = oneshot::channel();
        let sequence = self.inner.next_sequence.fetch_add(1, AtomicOrdering::SeqCst) as u64;
        let task = QueuedTask { priority, sequence, select, values, timeout, reply };

        {
            let mut queue = self.inner.queue.lock().await;
            queue.push(task);
        }
        self.inner.notify.notify_one();

        recv.await.unwrap_or(Err(Error::Aborted))
    }

    pub fn destroy(&self) {
        self.inner.destroyed.store(true, AtomicOrdering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    async fn run_worker(inner: Arc<Inner>) {
        loop {
            let task = loop {
                let mut queue = inner.queue.lock().await;
                if let Some(task) = queue.pop() {
                    break task;
                }
                drop(queue);
                inner.notify.notified().await;
            };

            Self::run_task(&inner, task).await;
        }
    }

    #[tracing::instrument(name = "modbusdb_task", skip(inner, task), fields(unit = task.select.unit, priority = ?task.priority))]
    async fn run_task(inner: &Arc<Inner>, task: QueuedTask) {
        let QueuedTask { priority, select, values, timeout, reply, .. } = task;

        let id = TransactionId(inner.next_id.fetch_add(1, AtomicOrdering::SeqCst) % 1024);
        let method = select.method;
        let mut transaction = match Transaction::new(id, select.clone(), priority, timeout) {
            Ok(t) => t,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };

        if inner.destroyed.load(AtomicOrdering::SeqCst) {
            transaction.finish(Err(&Error::Aborted));
            let snapshot = transaction.snapshot();
            let _ = reply.send(Ok(RequestOutcome { snapshot, result: Err(Error::Aborted) }));
            return;
        }

        // Per-unit backoff: LOW priority only, bypassed by NORMAL/HIGH so a
        // user-initiated read/write still reaches a backed-off unit.
        if priority == Priority::Low {
            let units = inner.units.lock().await;
            let in_backoff = units.get(&select.unit).is_some_and(|stats| stats.is_in_backoff(timeout));
            drop(units);
            if in_backoff {
                tracing::debug!(unit = select.unit, "skipping request, unit in backoff");
                transaction.finish(Err(&Error::UnitBackoff));
                let snapshot = transaction.snapshot();
                let _ = reply.send(Ok(RequestOutcome { snapshot, result: Err(Error::UnitBackoff) }));
                return;
            }
        }

        inner.events.emit(Event::Request(transaction.snapshot()));

        let driver = inner.driver.clone();
        let outcome = tokio::time::timeout(timeout, async {
            match method {
                crate::datamap::Method::Read => wire::read(&select, driver.as_ref()).await,
                crate::datamap::Method::Write => {
                    let values = values.clone().unwrap_or_default();
                    wire::write(&select, &values, driver.as_ref()).await
                }
            }
        })
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::trace!(unit = select.unit, ?timeout, "request timed out");
                Err(Error::Timeout)
            }
        };

        transaction.finish(result.as_ref());

        {
            let mut units = inner.units.lock().await;
            let stats = units.entry(select.unit).or_default();
            let duration = transaction.duration();
            stats.record(&match &result {
                Ok(_) => ResponseOutcome::Success(duration),
                Err(e) if e.is_timeout() => ResponseOutcome::Timeout,
                Err(_) => ResponseOutcome::Error(duration),
            });
        }

        let snapshot = transaction.snapshot();
        inner.events.emit(Event::Response(snapshot.clone()));
        if let Some(data) = &snapshot.data {
            if !data.is_empty() {
                inner.events.emit(Event::Data(data.clone()));
            }
        }

        let _ = reply.send(Ok(RequestOutcome { snapshot, result }));
    }
}
