use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use flume::Sender;
use tokio_util::sync::CancellationToken;

use crate::{TaskId, error::TaskError, scheduler::TaskEvent};

const PROGRESS_SCALE: u64 = 10_000;

/// Handed to a task body: the cancellation token and a monotonic progress reporter.
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    cancel: CancellationToken,
    events: Option<Sender<TaskEvent>>,
    /// Progress in 1/10000ths, only ever increases.
    progress: Arc<AtomicU64>,
    last_total: Arc<AtomicU64>,
}

impl TaskContext {
    pub(crate) fn new(id: TaskId, cancel: CancellationToken, events: Sender<TaskEvent>) -> Self {
        Self {
            id,
            cancel,
            events: Some(events),
            progress: Arc::new(AtomicU64::new(0)),
            last_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A context not attached to any scheduler, for running a task body inline.
    pub fn detached(cancel: CancellationToken) -> Self {
        Self {
            id: TaskId::new(),
            cancel,
            events: None,
            progress: Arc::new(AtomicU64::new(0)),
            last_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Fraction done in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.progress.load(Ordering::Relaxed) as f64 / PROGRESS_SCALE as f64
    }

    /// Report `current` out of `total`. Reports that would move progress backwards are dropped.
    pub fn set_progress(&self, current: u64, total: u64) {
        self.last_total.store(total, Ordering::Relaxed);
        let scaled = if total == 0 {
            PROGRESS_SCALE
        } else {
            (current.min(total) as u128 * PROGRESS_SCALE as u128 / total as u128) as u64
        };

        let previous = self.progress.fetch_max(scaled, Ordering::AcqRel);
        if scaled <= previous {
            return;
        }

        if let Some(events) = &self.events {
            let _ = events.send(TaskEvent::Progress {
                id: self.id,
                current: current.min(total),
                total,
            });
        }
    }

    /// Move progress to done, against the last reported total. No-op when already there.
    pub fn finish_progress(&self) {
        match self.last_total.load(Ordering::Relaxed) {
            0 => self.set_progress(1, 1),
            total => self.set_progress(total, total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_moves_backwards() {
        let (tx, rx) = flume::unbounded();
        let ctx = TaskContext::new(TaskId::new(), CancellationToken::new(), tx);

        ctx.set_progress(5, 10);
        ctx.set_progress(3, 10);
        ctx.set_progress(5, 10);
        ctx.set_progress(10, 10);

        assert_eq!(ctx.progress(), 1.0);
        let reported: Vec<_> = rx
            .try_iter()
            .map(|e| match e {
                TaskEvent::Progress { current, .. } => current,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(reported, vec![5, 10]);
    }

    #[test]
    fn finish_progress_completes_against_last_total() {
        let (tx, rx) = flume::unbounded();
        let ctx = TaskContext::new(TaskId::new(), CancellationToken::new(), tx);

        ctx.set_progress(2, 10);
        ctx.finish_progress();
        ctx.finish_progress();

        assert_eq!(ctx.progress(), 1.0);
        let reported: Vec<_> = rx
            .try_iter()
            .map(|e| match e {
                TaskEvent::Progress { current, total, .. } => (current, total),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(reported, vec![(2, 10), (10, 10)]);
    }

    #[test]
    fn finish_progress_without_reports() {
        let ctx = TaskContext::detached(CancellationToken::new());
        ctx.finish_progress();
        assert_eq!(ctx.progress(), 1.0);
    }

    #[test]
    fn check_cancelled() {
        let cancel = CancellationToken::new();
        let ctx = TaskContext::detached(cancel.clone());
        assert_eq!(ctx.check_cancelled(), Ok(()));
        cancel.cancel();
        assert_eq!(ctx.check_cancelled(), Err(TaskError::Cancelled));
    }
}
