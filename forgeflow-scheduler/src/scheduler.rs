//! The priority-queue worker pool: one FIFO per priority
//! level, workflow-aware pausing/throttling of low-urgency work, and a
//! bounded pool of long-lived cooperative workers.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::error::SchedulerError;
use crate::task::{CallableRegistry, Priority, Task, TaskOutcome};

const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;
const DEFAULT_WORKER_COUNT: usize = 2;
const DEFAULT_SETTLE_DELAY_MS: u64 = 5_000;
const DEFAULT_BACKGROUND_THROTTLE_MS: u64 = 1_000;
/// While workflows are active, LOW-priority tasks still run, but at a
/// fraction of normal concurrency ("LOW tasks continue at
/// reduced concurrency").
const REDUCED_LOW_CONCURRENCY: usize = 1;

pub struct SchedulerConfig {
    pub max_queue_size: usize,
    pub worker_count: usize,
    pub settle_delay_ms: u64,
    pub background_throttle_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            background_throttle_ms: DEFAULT_BACKGROUND_THROTTLE_MS,
        }
    }
}

struct Queues {
    by_priority: [VecDeque<Task>; 5],
}

impl Queues {
    fn new() -> Self {
        Self { by_priority: std::array::from_fn(|_| VecDeque::new()) }
    }

    fn len(&self) -> usize {
        self.by_priority.iter().map(VecDeque::len).sum()
    }

    fn push(&mut self, task: Task) {
        self.by_priority[priority_index(task.priority)].push_back(task);
    }
}

fn priority_index(priority: Priority) -> usize {
    Priority::ALL.iter().position(|p| *p == priority).expect("Priority::ALL covers every variant")
}

pub struct Scheduler {
    queues: Mutex<Queues>,
    notify: Notify,
    active_workflows: RwLock<HashSet<String>>,
    /// Timestamp (monotonic) at which the active-workflows set last became
    /// empty, used to enforce `settle_delay_ms` before BACKGROUND resumes.
    settled_since: Mutex<Option<Instant>>,
    last_background_dispatch: Mutex<Option<Instant>>,
    low_inflight: AtomicUsize,
    config: SchedulerConfig,
    callables: Arc<CallableRegistry>,
    shutdown: AtomicBool,
    skipped_background_runs: AtomicUsize,
}

impl Scheduler {
    pub fn new(callables: Arc<CallableRegistry>, config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(Queues::new()),
            notify: Notify::new(),
            active_workflows: RwLock::new(HashSet::new()),
            settled_since: Mutex::new(Some(Instant::now())),
            last_background_dispatch: Mutex::new(None),
            low_inflight: AtomicUsize::new(0),
            config,
            callables,
            shutdown: AtomicBool::new(false),
            skipped_background_runs: AtomicUsize::new(0),
        })
    }

    pub fn submit(&self, task: Task) -> Result<(), SchedulerError> {
        let mut queues = self.queues.lock();
        if queues.len() >= self.config.max_queue_size {
            return Err(SchedulerError::QueueFull { max_size: self.config.max_queue_size });
        }
        queues.push(task);
        drop(queues);
        self.notify.notify_one();
        Ok(())
    }

    pub fn mark_workflow_begin(&self, workflow_id: impl Into<String>) {
        let mut active = self.active_workflows.write();
        active.insert(workflow_id.into());
        *self.settled_since.lock() = None;
    }

    pub fn mark_workflow_end(&self, workflow_id: &str) {
        let mut active = self.active_workflows.write();
        active.remove(workflow_id);
        if active.is_empty() {
            *self.settled_since.lock() = Some(Instant::now());
            drop(active);
            self.notify.notify_waiters();
        }
    }

    pub fn skipped_background_runs(&self) -> usize {
        self.skipped_background_runs.load(Ordering::Relaxed)
    }

    fn workflows_active(&self) -> bool {
        !self.active_workflows.read().is_empty()
    }

    fn background_settled(&self) -> bool {
        match *self.settled_since.lock() {
            None => false,
            Some(since) => since.elapsed() >= Duration::from_millis(self.config.settle_delay_ms),
        }
    }

    fn background_throttle_elapsed(&self) -> bool {
        match *self.last_background_dispatch.lock() {
            None => true,
            Some(last) => last.elapsed() >= Duration::from_millis(self.config.background_throttle_ms),
        }
    }

    /// Pop the next task this worker is allowed to run right now, applying
    /// workflow-awareness and the background throttle. Returns `None` when
    /// nothing is currently eligible (caller should wait on `notify`).
    fn try_dequeue(&self) -> Option<Task> {
        let active = self.workflows_active();
        let mut queues = self.queues.lock();

        for priority in Priority::ALL {
            if active && priority == Priority::Background {
                if !queues.by_priority[priority_index(priority)].is_empty() {
                    self.skipped_background_runs.fetch_add(1, Ordering::Relaxed);
                }
                continue;
            }
            if priority == Priority::Background && !self.background_settled() {
                continue;
            }
            if priority == Priority::Background && !self.background_throttle_elapsed() {
                continue;
            }
            if active && priority == Priority::Low && self.low_inflight.load(Ordering::SeqCst) >= REDUCED_LOW_CONCURRENCY {
                continue;
            }

            if let Some(task) = queues.by_priority[priority_index(priority)].pop_front() {
                if priority == Priority::Background {
                    *self.last_background_dispatch.lock() = Some(Instant::now());
                }
                if priority == Priority::Low {
                    self.low_inflight.fetch_add(1, Ordering::SeqCst);
                }
                return Some(task);
            }
        }
        None
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Spawn the worker pool. Each worker cooperatively pulls a task,
    /// invokes its callable through the registry, and reports a
    /// `TaskOutcome` on `report`.
    pub fn run_workers(self: &Arc<Self>, report: tokio::sync::mpsc::UnboundedSender<TaskOutcome>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.worker_count)
            .map(|_| {
                let scheduler = Arc::clone(self);
                let report = report.clone();
                tokio::spawn(async move { scheduler.worker_loop(report).await })
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, report: tokio::sync::mpsc::UnboundedSender<TaskOutcome>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let Some(task) = self.try_dequeue() else {
                tokio::select! {
                    _ = self.notify.notified() => continue,
                    _ = tokio::time::sleep(Duration::from_millis(200)) => continue,
                }
            };

            let was_low = task.priority == Priority::Low;
            let outcome = self.execute(task).await;
            if was_low {
                self.low_inflight.fetch_sub(1, Ordering::SeqCst);
            }
            let _ = report.send(outcome);
        }
    }

    async fn execute(&self, task: Task) -> TaskOutcome {
        let started = Instant::now();
        let task_id = task.task_id.clone();
        let outcome = async {
            let callable = self.callables.resolve(&task.callable_reference)?;
            callable.call(task.payload).await
        }
        .await;

        match outcome {
            Ok(result) => TaskOutcome { task_id, succeeded: true, result: Some(result), error: None, duration_ms: started.elapsed().as_millis() as u64 },
            Err(err) => TaskOutcome { task_id, succeeded: false, result: None, error: Some(err.to_string()), duration_ms: started.elapsed().as_millis() as u64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ScheduledCallable;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingCallable(Arc<AtomicU32>);
    #[async_trait]
    impl ScheduledCallable for CountingCallable {
        async fn call(&self, _payload: serde_json::Value) -> Result<serde_json::Value, SchedulerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn submit_rejects_when_queue_full() {
        let callables = Arc::new(CallableRegistry::new());
        let scheduler = Scheduler::new(callables, SchedulerConfig { max_queue_size: 1, ..SchedulerConfig::default() });
        assert!(scheduler.submit(Task::new(Priority::Normal, "noop", serde_json::Value::Null)).is_ok());
        assert!(matches!(scheduler.submit(Task::new(Priority::Normal, "noop", serde_json::Value::Null)), Err(SchedulerError::QueueFull { .. })));
    }

    #[test]
    fn try_dequeue_prefers_higher_priority() {
        let callables = Arc::new(CallableRegistry::new());
        let scheduler = Scheduler::new(callables, SchedulerConfig::default());
        scheduler.submit(Task::new(Priority::Low, "noop", serde_json::Value::Null)).unwrap();
        scheduler.submit(Task::new(Priority::Critical, "noop", serde_json::Value::Null)).unwrap();
        let first = scheduler.try_dequeue().unwrap();
        assert_eq!(first.priority, Priority::Critical);
    }

    #[test]
    fn background_tasks_paused_while_workflows_active() {
        let callables = Arc::new(CallableRegistry::new());
        let scheduler = Scheduler::new(callables, SchedulerConfig::default());
        scheduler.mark_workflow_begin("wf-1");
        scheduler.submit(Task::new(Priority::Background, "noop", serde_json::Value::Null)).unwrap();
        assert!(scheduler.try_dequeue().is_none());
        assert_eq!(scheduler.skipped_background_runs(), 1);
    }

    #[tokio::test]
    async fn worker_executes_submitted_task() {
        let counter = Arc::new(AtomicU32::new(0));
        let callables = Arc::new(CallableRegistry::new());
        callables.register("count", Arc::new(CountingCallable(Arc::clone(&counter))));
        let scheduler = Scheduler::new(callables, SchedulerConfig::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handles = scheduler.run_workers(tx);

        scheduler.submit(Task::new(Priority::Normal, "count", serde_json::Value::Null)).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(outcome.succeeded);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        scheduler.shutdown();
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
    }
}
