use color_eyre::eyre::{Context, Result, bail};
use tessera_tasks::{BackgroundTask, TaskCallbacks, TaskError, TaskScheduler};
use tokio::{signal, sync::mpsc};
use tracing::{debug, info};

enum Completion<T> {
    Succeeded(T),
    Failed(TaskError),
    Cancelled,
}

/// Submit `task` and drive the scheduler until it finishes. Ctrl+C cancels it.
pub async fn run_task<T: BackgroundTask>(scheduler: &TaskScheduler, task: T) -> Result<T::Output> {
    let kind = task.kind();
    let (tx, mut rx) = mpsc::unbounded_channel::<Completion<T::Output>>();
    let (error_tx, cancelled_tx) = (tx.clone(), tx.clone());

    let callbacks = TaskCallbacks::new()
        .on_success(move |output| {
            let _ = tx.send(Completion::Succeeded(output));
        })
        .on_error(move |e| {
            let _ = error_tx.send(Completion::Failed(e));
        })
        .on_cancelled(move |snapshot_id| {
            debug!(snapshot_id, "Task cancelled");
            let _ = cancelled_tx.send(Completion::Cancelled);
        })
        .on_progress(|current, total| debug!(current, total, "Progress"));

    let handle = scheduler.submit(task, callbacks);
    tokio::select! {
        _ = scheduler.wait_for(&handle) => {}
        result = signal::ctrl_c() => {
            result.context("listen for Ctrl+C")?;
            info!("Ctrl+C received, cancelling {kind} task");
            scheduler.cancel(&handle);
            scheduler.wait_for(&handle).await;
        }
    }

    match rx.try_recv() {
        Ok(Completion::Succeeded(output)) => Ok(output),
        Ok(Completion::Failed(e)) => Err(e).with_context(|| format!("{kind} task failed")),
        Ok(Completion::Cancelled) => bail!("{kind} task cancelled"),
        Err(e) => bail!("{kind} task finished without a result: {e}"),
    }
}
