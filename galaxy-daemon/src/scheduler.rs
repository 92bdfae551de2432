use std::sync::Arc;

use tokio::sync::mpsc;

use galaxy_sync::{CancelFlag, SyncError, TaskHandle, TaskId, TaskRequest, TaskScheduler};

use crate::table::TaskTable;

/// A task handed from the scheduler to the dispatcher.
#[derive(Debug)]
pub struct QueuedTask {
    pub id: TaskId,
    pub request: TaskRequest,
    pub cancel: CancelFlag,
}

/// [`TaskScheduler`] backed by the worker's task table and dispatch queue.
///
/// `enqueue` never blocks, so handlers running on blocking threads can
/// schedule follow-up tasks.
#[derive(Clone)]
pub struct QueueScheduler {
    table: Arc<TaskTable>,
    tx: mpsc::UnboundedSender<QueuedTask>,
}

impl QueueScheduler {
    pub fn new(table: Arc<TaskTable>) -> (Self, mpsc::UnboundedReceiver<QueuedTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { table, tx }, rx)
    }
}

impl TaskScheduler for QueueScheduler {
    fn enqueue(&self, request: TaskRequest) -> Result<TaskHandle, SyncError> {
        let (id, cancel) = self.table.insert(&request);
        let name = request.kind.name();
        self.tx
            .send(QueuedTask {
                id,
                request,
                cancel,
            })
            .map_err(|_| {
                let err = SyncError::Enqueue("worker queue closed".to_string());
                self.table.fail(id, err.to_string());
                err
            })?;
        tracing::debug!(task = %id, name, "task enqueued");
        Ok(TaskHandle { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_core::types::RepositoryName;

    use crate::table::TaskState;

    #[test]
    fn enqueue_records_waiting_task_and_queues_it() {
        let table = Arc::new(TaskTable::new());
        let (scheduler, mut rx) = QueueScheduler::new(table.clone());
        let handle = scheduler
            .enqueue(TaskRequest::curate_all(RepositoryName::from("published")))
            .unwrap();

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.id, handle.id);
        assert_eq!(table.get(handle.id).unwrap().state, TaskState::Waiting);
    }

    #[test]
    fn closed_queue_fails_enqueue() {
        let table = Arc::new(TaskTable::new());
        let (scheduler, rx) = QueueScheduler::new(table.clone());
        drop(rx);
        let err = scheduler
            .enqueue(TaskRequest::curate_all(RepositoryName::from("published")))
            .unwrap_err();
        assert!(matches!(err, SyncError::Enqueue(_)));
        assert_eq!(table.counts().get(&TaskState::Failed), Some(&1));
    }
}
