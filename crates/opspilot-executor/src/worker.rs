//! Sequential execution worker. One queue, one loop: the scheduler and the
//! gateway enqueue pending tasks; the worker drains them one at a time so at
//! most one engine invocation is in flight.

use std::sync::Arc;

use tokio::sync::mpsc;

use opspilot_core::types::Task;

use crate::Executor;

/// Depth of the pending-task queue between producers and the worker.
pub const QUEUE_DEPTH: usize = 64;

pub fn task_queue() -> (mpsc::Sender<Task>, mpsc::Receiver<Task>) {
    mpsc::channel(QUEUE_DEPTH)
}

/// Spawn the single execution worker. Runs until all senders drop.
pub fn spawn_worker(
    executor: Arc<Executor>,
    mut queue: mpsc::Receiver<Task>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Execution worker started");
        while let Some(task) = queue.recv().await {
            if let Err(e) = executor.run(&task.id).await {
                tracing::error!("Task {} did not run: {e}", task.id);
            }
        }
        tracing::info!("Execution worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opspilot_core::error::Result;
    use opspilot_core::traits::ReasoningEngine;
    use opspilot_core::types::{CreatedBy, TaskStatus};
    use opspilot_core::StatusHub;
    use opspilot_dispatch::Dispatcher;
    use opspilot_store::TaskStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Engine that records the peak number of concurrent invocations.
    struct SlowEngine {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ReasoningEngine for SlowEngine {
        fn name(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _: &str, _: Option<&str>, _: bool) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("done".to_string())
        }
    }

    #[tokio::test]
    async fn test_worker_runs_tasks_sequentially() {
        let engine = Arc::new(SlowEngine {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let executor = Arc::new(Executor::new(
            engine.clone(),
            store.clone(),
            Dispatcher::new(),
            Arc::new(StatusHub::new()),
            10,
        ));

        let (tx, rx) = task_queue();
        let handle = spawn_worker(executor, rx);

        let mut ids = Vec::new();
        for i in 0..4 {
            let task = Task::immediate(&format!("t{i}"), "note", CreatedBy::User);
            store.save(&task).unwrap();
            ids.push(task.id.clone());
            tx.send(task).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(engine.peak.load(Ordering::SeqCst), 1);
        for id in ids {
            let task = store.get(&id).unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
        }
    }
}
