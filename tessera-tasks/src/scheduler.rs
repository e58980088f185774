use std::{
    any::Any,
    fmt,
    num::NonZero,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    thread::available_parallelism,
    time::Instant,
};

use color_eyre::eyre::{Context, Result};
use flume::{Receiver, Sender};
use hashbrown::HashMap;
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tessera_common::metrics::{METRICS, TASK_CANCELLED, TASK_FAILED, TASK_SUCCEEDED};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    context::TaskContext,
    error::TaskError,
    task::{BackgroundTask, TaskId, TaskKind, TaskState},
};

type SuccessFn<T> = Box<dyn FnOnce(T) + Send>;
type ErrorFn = Box<dyn FnOnce(TaskError) + Send>;
type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;
type CancelledFn = Box<dyn FnOnce(&str) + Send>;
type Finisher = Box<dyn FnOnce(WorkerOutcome) + Send>;

/// Handlers run on the thread draining scheduler events, exactly one of `on_success`,
/// `on_error` and `on_cancelled` per task.
pub struct TaskCallbacks<T> {
    on_success: Option<SuccessFn<T>>,
    on_error: Option<ErrorFn>,
    on_progress: Option<ProgressFn>,
    on_cancelled: Option<CancelledFn>,
}

impl<T> Default for TaskCallbacks<T> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_progress: None,
            on_cancelled: None,
        }
    }
}

impl<T> TaskCallbacks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, f: impl FnOnce(T) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(TaskError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl FnMut(u64, u64) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Receives the task's snapshot id.
    pub fn on_cancelled(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_cancelled = Some(Box::new(f));
        self
    }
}

pub(crate) enum WorkerOutcome {
    Succeeded(Box<dyn Any + Send>),
    Cancelled,
    Failed(TaskError),
}

impl WorkerOutcome {
    fn state(&self) -> TaskState {
        match self {
            WorkerOutcome::Succeeded(_) => TaskState::Succeeded,
            WorkerOutcome::Cancelled => TaskState::Cancelled,
            WorkerOutcome::Failed(_) => TaskState::Failed,
        }
    }
}

impl fmt::Debug for WorkerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerOutcome::Succeeded(_) => write!(f, "Succeeded"),
            WorkerOutcome::Cancelled => write!(f, "Cancelled"),
            WorkerOutcome::Failed(e) => write!(f, "Failed({e})"),
        }
    }
}

#[derive(Debug)]
pub(crate) enum TaskEvent {
    Progress { id: TaskId, current: u64, total: u64 },
    Finished { id: TaskId, outcome: WorkerOutcome },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Cancelled,
    Failed(TaskError),
}

impl TaskOutcome {
    fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Succeeded => TASK_SUCCEEDED,
            TaskOutcome::Cancelled => TASK_CANCELLED,
            TaskOutcome::Failed(_) => TASK_FAILED,
        }
    }
}

impl From<&WorkerOutcome> for TaskOutcome {
    fn from(outcome: &WorkerOutcome) -> Self {
        match outcome {
            WorkerOutcome::Succeeded(_) => TaskOutcome::Succeeded,
            WorkerOutcome::Cancelled => TaskOutcome::Cancelled,
            WorkerOutcome::Failed(e) => TaskOutcome::Failed(e.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub outcome: TaskOutcome,
}

/// Refers to a submitted task. The state is shared with the worker running it.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    kind: TaskKind,
    cancel: CancellationToken,
    state: Arc<Mutex<TaskState>>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

struct TaskEntry {
    handle: TaskHandle,
    finisher: Option<Finisher>,
    on_progress: Option<ProgressFn>,
}

/// Runs task bodies on a worker pool, completion handlers on whichever thread drains events
/// (`process_events`, `wait_idle`, `wait_for`).
pub struct TaskScheduler {
    pool: ThreadPool,
    events_tx: Sender<TaskEvent>,
    events_rx: Receiver<TaskEvent>,
    entries: Mutex<HashMap<TaskId, TaskEntry>>,
    exclusive: Mutex<HashMap<String, TaskHandle>>,
}

fn task_thread_pool(workers: usize) -> Result<ThreadPool> {
    let num_threads = if workers == 0 {
        available_parallelism().map(NonZero::get).unwrap_or(1)
    } else {
        workers
    };

    ThreadPoolBuilder::new()
        .thread_name(|i| format!("task-worker-{i}"))
        .num_threads(num_threads)
        .build()
        .context("create task worker pool")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn execute<T: BackgroundTask>(
    task: &mut T,
    ctx: &TaskContext,
    state: &Mutex<TaskState>,
) -> WorkerOutcome {
    *state.lock() = TaskState::Running;

    METRICS.alive_workers.inc();
    let _guard = scopeguard::guard((), |_| {
        METRICS.alive_workers.dec();
    });

    let start = Instant::now();
    let result = if ctx.is_cancelled() {
        Err(TaskError::Cancelled)
    } else {
        catch_unwind(AssertUnwindSafe(|| task.run(ctx))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!("Task body panicked: {message}");
            Err(TaskError::Execution(format!("task panicked: {message}")))
        })
    };

    // Decided under the state lock, so a `cancel` that returned true always ends as Cancelled.
    let outcome = {
        let mut state = state.lock();
        let outcome = match result {
            _ if ctx.is_cancelled() => WorkerOutcome::Cancelled,
            Ok(output) => WorkerOutcome::Succeeded(Box::new(output)),
            Err(TaskError::Cancelled) => WorkerOutcome::Cancelled,
            Err(e) => WorkerOutcome::Failed(e),
        };
        *state = outcome.state();
        outcome
    };

    if matches!(outcome, WorkerOutcome::Succeeded(_)) {
        ctx.finish_progress();
    } else if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.cleanup())) {
        error!("Task cleanup panicked: {}", panic_message(payload.as_ref()));
    }

    let kind = task.kind().as_str();
    let label = TaskOutcome::from(&outcome).label();
    METRICS
        .task_duration
        .with_label_values(&[kind])
        .observe(start.elapsed().as_secs_f64());
    METRICS.tasks_total.with_label_values(&[kind, label]).inc();

    match &outcome {
        WorkerOutcome::Failed(e) => warn!(elapsed = ?start.elapsed(), "Task failed: {e}"),
        _ => info!(elapsed = ?start.elapsed(), outcome = label, "Task finished"),
    }

    outcome
}

impl TaskScheduler {
    /// `workers == 0` sizes the pool to the available parallelism.
    pub fn new(workers: usize) -> Result<Self> {
        let (events_tx, events_rx) = flume::unbounded();
        Ok(Self {
            pool: task_thread_pool(workers)?,
            events_tx,
            events_rx,
            entries: Mutex::new(HashMap::new()),
            exclusive: Mutex::new(HashMap::new()),
        })
    }

    pub fn submit<T: BackgroundTask>(
        &self,
        mut task: T,
        callbacks: TaskCallbacks<T::Output>,
    ) -> TaskHandle {
        let id = TaskId::new();
        let kind = task.kind();
        let snapshot_id = task.snapshot_id();
        let handle = TaskHandle {
            id,
            kind,
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(TaskState::Created)),
        };

        let TaskCallbacks {
            on_success,
            on_error,
            on_progress,
            on_cancelled,
        } = callbacks;

        let finisher_snapshot_id = snapshot_id.clone();
        let finisher: Finisher = Box::new(move |outcome| match outcome {
            WorkerOutcome::Succeeded(payload) => match payload.downcast::<T::Output>() {
                Ok(output) => {
                    if let Some(f) = on_success {
                        f(*output);
                    }
                }
                Err(_) => error!("Task payload has an unexpected type"),
            },
            WorkerOutcome::Cancelled => {
                if let Some(f) = on_cancelled {
                    f(&finisher_snapshot_id);
                }
            }
            WorkerOutcome::Failed(e) => {
                if let Some(f) = on_error {
                    f(e);
                }
            }
        });

        self.entries.lock().insert(
            id,
            TaskEntry {
                handle: handle.clone(),
                finisher: Some(finisher),
                on_progress,
            },
        );

        let ctx = TaskContext::new(id, handle.cancel.clone(), self.events_tx.clone());
        let state = handle.state.clone();
        let events_tx = self.events_tx.clone();

        info!(task_id = %id, %kind, snapshot_id, "Submitting task");
        self.pool.spawn(move || {
            let span = info_span!("task", task_id = %id, kind = kind.as_str());
            let _enter = span.enter();

            let outcome = execute(&mut task, &ctx, &state);
            if let Err(e) = events_tx.send(TaskEvent::Finished { id, outcome }) {
                debug!("Scheduler is gone, dropping task outcome: {e:?}");
            }
        });

        handle
    }

    /// Submit, first cancelling whatever live task was last submitted under `key`.
    pub fn submit_exclusive<T: BackgroundTask>(
        &self,
        key: impl Into<String>,
        task: T,
        callbacks: TaskCallbacks<T::Output>,
    ) -> TaskHandle {
        let key = key.into();
        let mut exclusive = self.exclusive.lock();
        if let Some(previous) = exclusive.get(&key)
            && self.cancel(previous)
        {
            info!(key, previous = %previous.id(), "Cancelled previous task for key");
        }

        let handle = self.submit(task, callbacks);
        exclusive.insert(key, handle.clone());
        handle
    }

    /// Request cooperative cancellation. False when the task already reached a terminal state.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        let state = handle.state.lock();
        if state.is_terminal() {
            return false;
        }
        handle.cancel.cancel();
        debug!(task_id = %handle.id, "Cancellation requested");
        true
    }

    pub fn is_cancelled(&self, handle: &TaskHandle) -> bool {
        handle.cancel.is_cancelled()
    }

    /// Cancel every task whose completion has not been processed yet.
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<TaskHandle> = self
            .entries
            .lock()
            .values()
            .map(|e| e.handle.clone())
            .collect();
        handles.iter().filter(|h| self.cancel(h)).count()
    }

    /// Tasks whose completion handlers have not run yet.
    pub fn live_tasks(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_idle(&self) -> bool {
        self.live_tasks() == 0
    }

    fn handle_event(&self, event: TaskEvent) -> Option<FinishedTask> {
        match event {
            TaskEvent::Progress { id, current, total } => {
                let Some(mut on_progress) = self
                    .entries
                    .lock()
                    .get_mut(&id)
                    .and_then(|e| e.on_progress.take())
                else {
                    return None;
                };

                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| on_progress(current, total))) {
                    error!(task_id = %id, "Progress handler panicked: {}", panic_message(payload.as_ref()));
                }

                if let Some(entry) = self.entries.lock().get_mut(&id) {
                    entry.on_progress = Some(on_progress);
                }
                None
            }
            TaskEvent::Finished { id, outcome } => {
                let entry = self.entries.lock().remove(&id)?;
                self.exclusive.lock().retain(|_, h| h.id != id);

                let finished = FinishedTask {
                    id,
                    kind: entry.handle.kind,
                    outcome: TaskOutcome::from(&outcome),
                };

                if let Some(finisher) = entry.finisher
                    && let Err(payload) = catch_unwind(AssertUnwindSafe(|| finisher(outcome)))
                {
                    error!(task_id = %id, "Completion handler panicked: {}", panic_message(payload.as_ref()));
                }
                Some(finished)
            }
        }
    }

    /// Run handlers for every event already delivered, without blocking.
    pub fn process_events(&self) -> Vec<FinishedTask> {
        let events: Vec<TaskEvent> = self.events_rx.try_iter().collect();
        events
            .into_iter()
            .filter_map(|event| self.handle_event(event))
            .collect()
    }

    pub async fn wait_idle(&self) -> Vec<FinishedTask> {
        let mut finished = self.process_events();
        while !self.is_idle() {
            let Ok(event) = self.events_rx.recv_async().await else {
                break;
            };
            finished.extend(self.handle_event(event));
        }
        finished
    }

    pub fn wait_idle_blocking(&self) -> Vec<FinishedTask> {
        let mut finished = self.process_events();
        while !self.is_idle() {
            let Ok(event) = self.events_rx.recv() else {
                break;
            };
            finished.extend(self.handle_event(event));
        }
        finished
    }

    /// Drive events until `handle`'s completion handler ran, returning its terminal state.
    pub async fn wait_for(&self, handle: &TaskHandle) -> TaskState {
        self.process_events();
        while self.entries.lock().contains_key(&handle.id) {
            let Ok(event) = self.events_rx.recv_async().await else {
                break;
            };
            self.handle_event(event);
        }
        handle.state()
    }
}
