//! Delayed-task scheduler.
//!
//! A min-heap ordered by execution time plus an id index. Cancellation only
//! removes the index entry; stale heap entries are discarded when popped.
//! A background tokio task polls at a fixed interval and hands each due
//! callback to the blocking pool, so a slow or failing callback never holds
//! up the loop or other tasks.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::GameConfig;
use crate::error::SchedulerError;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::model::MatchId;

/// Finished (executed or canceled) task states kept for `task_state`.
pub const FINISHED_HISTORY: usize = 1024;

pub type TaskFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Scheduled,
    Executed,
    Canceled,
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    execute_at: DateTime<Utc>,
    seq: u64,
    task_id: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.execute_at
            .cmp(&other.execute_at)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Pending {
    seq: u64,
    execute_at: DateTime<Utc>,
    callback: TaskFn,
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    index: HashMap<String, Pending>,
    finished: HashMap<String, (u64, TaskState)>,
    finished_order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl Inner {
    fn mark_finished(&mut self, task_id: String, seq: u64, state: TaskState) {
        self.finished.insert(task_id.clone(), (seq, state));
        self.finished_order.push_back((task_id, seq));
        while self.finished_order.len() > FINISHED_HISTORY {
            let Some((old_id, old_seq)) = self.finished_order.pop_front() else {
                break;
            };
            // a rescheduled id may have finished again under a newer seq
            if self.finished.get(&old_id).is_some_and(|(s, _)| *s == old_seq) {
                self.finished.remove(&old_id);
            }
        }
    }
}

fn runtime() -> Result<Handle, SchedulerError> {
    Handle::try_current().map_err(|_| SchedulerError::NoRuntime)
}

struct Worker {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

pub struct TaskScheduler {
    inner: Arc<Mutex<Inner>>,
    worker: Mutex<Option<Worker>>,
    poll_interval: Duration,
}

impl TaskScheduler {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            worker: Mutex::new(None),
            poll_interval,
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(Duration::from_millis(config.scheduler_poll_ms))
    }

    // callbacks never run under this lock
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn schedule(
        &self,
        task_id: impl Into<String>,
        execute_at: DateTime<Utc>,
        callback: impl FnOnce() -> anyhow::Result<()> + Send + 'static,
    ) -> Result<(), SchedulerError> {
        let task_id = task_id.into();
        let mut inner = self.lock();
        if inner.index.contains_key(&task_id) {
            return Err(SchedulerError::DuplicateTask(task_id));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Reverse(HeapEntry { execute_at, seq, task_id: task_id.clone() }));
        inner.finished.remove(&task_id);
        inner.index.insert(
            task_id.clone(),
            Pending { seq, execute_at, callback: Box::new(callback) },
        );
        drop(inner);

        log(
            Level::Info,
            Domain::Scheduler,
            "task_scheduled",
            obj(&[
                ("task_id", v_str(&task_id)),
                ("execute_at", v_str(&execute_at.to_rfc3339())),
            ]),
        );
        Ok(())
    }

    /// `true` if the task was pending and is now canceled.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(pending) = inner.index.remove(task_id) else {
            return false;
        };
        inner.mark_finished(task_id.to_string(), pending.seq, TaskState::Canceled);
        drop(inner);

        log(
            Level::Info,
            Domain::Scheduler,
            "task_canceled",
            obj(&[
                ("task_id", v_str(task_id)),
                ("was_scheduled_for", v_str(&pending.execute_at.to_rfc3339())),
            ]),
        );
        true
    }

    pub fn is_scheduled(&self, task_id: &str) -> bool {
        self.lock().index.contains_key(task_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().index.len()
    }

    pub fn task_state(&self, task_id: &str) -> Option<TaskState> {
        let inner = self.lock();
        if inner.index.contains_key(task_id) {
            return Some(TaskState::Scheduled);
        }
        inner.finished.get(task_id).map(|(_, state)| *state)
    }

    /// Pop every task due at `now` and dispatch it. Returns one handle per
    /// dispatched task; each resolves once its callback has finished.
    ///
    /// Must be called from within a tokio runtime; otherwise nothing is
    /// popped and `SchedulerError::NoRuntime` is returned.
    pub fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<()>>, SchedulerError> {
        let rt = runtime()?;
        let due = take_due(&self.inner, now);
        Ok(due.into_iter().map(|(id, cb)| dispatch(&rt, id, cb)).collect())
    }

    /// Start the poll loop on the current tokio runtime. No-op if already
    /// running; `SchedulerError::NoRuntime` outside a runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let rt = runtime()?;
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return Ok(());
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let poll = self.poll_interval.max(Duration::from_millis(1));

        let loop_rt = rt.clone();
        let handle = rt.spawn(async move {
            let mut ticker = interval(poll);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for (id, cb) in take_due(&inner, Utc::now()) {
                            dispatch(&loop_rt, id, cb);
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        *worker = Some(Worker { handle, stop_tx });

        log(
            Level::Info,
            Domain::Scheduler,
            "scheduler_started",
            obj(&[("poll_ms", json!(poll.as_millis() as u64))]),
        );
        Ok(())
    }

    /// Stop the poll loop and wait for it to exit. Pending tasks stay
    /// queued; callbacks already dispatched run to completion.
    pub async fn stop(&self) {
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(worker) = worker else {
            return;
        };
        let _ = worker.stop_tx.send(true);
        if let Err(err) = worker.handle.await {
            log(
                Level::Error,
                Domain::Scheduler,
                "scheduler_loop_error",
                obj(&[("error", v_str(&err.to_string()))]),
            );
        }
        log(Level::Info, Domain::Scheduler, "scheduler_stopped", obj(&[]));
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Schedule a match start. The starter gets the match id and reports
    /// whether it actually started the match.
    pub fn schedule_match_start<F>(
        &self,
        match_id: MatchId,
        execute_at: DateTime<Utc>,
        starter: F,
    ) -> Result<String, SchedulerError>
    where
        F: FnOnce(MatchId) -> anyhow::Result<bool> + Send + 'static,
    {
        let task_id = match_start_task_id(match_id, execute_at);
        self.schedule(task_id.clone(), execute_at, move || {
            let started = starter(match_id)?;
            log(
                Level::Info,
                Domain::Scheduler,
                "scheduled_match_start",
                obj(&[("match_id", json!(match_id)), ("started", json!(started))]),
            );
            Ok(())
        })?;
        Ok(task_id)
    }
}

pub fn match_start_task_id(match_id: MatchId, execute_at: DateTime<Utc>) -> String {
    format!("match_start_{}_{}", match_id, execute_at.timestamp())
}

fn take_due(inner: &Mutex<Inner>, now: DateTime<Utc>) -> Vec<(String, TaskFn)> {
    let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
    let mut due = Vec::new();
    while inner.heap.peek().is_some_and(|Reverse(e)| e.execute_at <= now) {
        let Some(Reverse(entry)) = inner.heap.pop() else {
            break;
        };
        // canceled, or superseded by a later schedule under the same id
        let live = inner
            .index
            .get(&entry.task_id)
            .is_some_and(|p| p.seq == entry.seq);
        if !live {
            continue;
        }
        if let Some(pending) = inner.index.remove(&entry.task_id) {
            inner.mark_finished(entry.task_id.clone(), entry.seq, TaskState::Executed);
            due.push((entry.task_id, pending.callback));
        }
    }
    due
}

fn dispatch(rt: &Handle, task_id: String, callback: TaskFn) -> JoinHandle<()> {
    log(
        Level::Info,
        Domain::Scheduler,
        "executing_task",
        obj(&[("task_id", v_str(&task_id))]),
    );
    let blocking = rt.clone();
    rt.spawn(async move {
        match blocking.spawn_blocking(callback).await {
            Ok(Ok(())) => log(
                Level::Debug,
                Domain::Scheduler,
                "task_completed",
                obj(&[("task_id", v_str(&task_id))]),
            ),
            Ok(Err(err)) => log(
                Level::Error,
                Domain::Scheduler,
                "task_execution_failed",
                obj(&[("task_id", v_str(&task_id)), ("error", v_str(&format!("{:#}", err)))]),
            ),
            Err(join_err) => log(
                Level::Error,
                Domain::Scheduler,
                "task_panicked",
                obj(&[("task_id", v_str(&task_id)), ("error", v_str(&join_err.to_string()))]),
            ),
        }
    })
}
