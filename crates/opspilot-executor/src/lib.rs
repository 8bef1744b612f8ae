//! # OpsPilot Executor
//!
//! The task state machine driver: `pending → running → {completed | failed |
//! needs_review}`. Decides whether the reasoning engine must be invoked,
//! assembles bounded context for recurring runs, gates delivery on a
//! validated deliverable, and aggregates per-channel dispatch results.
//!
//! Delivery never runs on an unvalidated response.

pub mod deliverable;
pub mod prompt;
pub mod worker;

use std::sync::Arc;

use chrono::Utc;

use opspilot_core::error::{OpsPilotError, Result};
use opspilot_core::traits::ReasoningEngine;
use opspilot_core::types::{DeliveryStatus, Task, TaskStatus, WorkItem, WorkItemStatus};
use opspilot_core::StatusHub;
use opspilot_dispatch::Dispatcher;
use opspilot_store::TaskStore;

use deliverable::Deliverable;

/// Drives one task run at a time through the lifecycle state machine.
pub struct Executor {
    engine: Arc<dyn ReasoningEngine>,
    store: Arc<TaskStore>,
    dispatcher: Dispatcher,
    hub: Arc<StatusHub>,
    /// How many prior runs of a recurrence feed the prompt context.
    history_window: usize,
}

impl Executor {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        store: Arc<TaskStore>,
        dispatcher: Dispatcher,
        hub: Arc<StatusHub>,
        history_window: usize,
    ) -> Self {
        Self {
            engine,
            store,
            dispatcher,
            hub,
            history_window,
        }
    }

    /// Execute one pending task to a terminal (or needs_review) state.
    /// Every failure mode is recorded on the task itself — this returns Err
    /// only for store-level problems or an invalid starting state.
    pub async fn run(&self, task_id: &str) -> Result<Task> {
        let mut task = self
            .store
            .get(task_id)?
            .ok_or_else(|| OpsPilotError::TaskNotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Pending {
            return Err(OpsPilotError::InvalidTransition(format!(
                "task {task_id} is {}, not pending",
                task.status.as_str()
            )));
        }

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        self.store.save(&task)?;
        self.hub.publish(&task.id, TaskStatus::Running);
        tracing::info!("Running task '{}' ({})", task.title, task.id);

        // Every action pre-composed: deliver verbatim, no reasoning call.
        if task.fully_precomposed() {
            mark_work_done(&mut task);
            return self.dispatch_and_finish(task).await;
        }

        let history = match &task.recurrence_id {
            Some(rid) => self.store.recent_history(rid, self.history_window)?,
            None => Vec::new(),
        };
        if !history.is_empty() {
            tracing::debug!(
                "Task {} continues recurrence {:?} with {} prior run(s)",
                task.id,
                task.recurrence_id,
                history.len()
            );
        }

        let prompt = prompt::build_prompt(&task, &history);
        let continuity = task.session_id.is_some();
        let response = match self
            .engine
            .invoke(&prompt, task.session_id.as_deref(), continuity)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                task.work.push(WorkItem {
                    description: format!("Reasoning failure: {e}"),
                    status: WorkItemStatus::Failed,
                });
                return self.finish(task, TaskStatus::Failed);
            }
        };

        mark_work_done(&mut task);

        // Informational tasks succeed once the work is recorded.
        if task.is_informational() {
            task.work.push(WorkItem::done(&response));
            return self.finish(task, TaskStatus::Completed);
        }

        match deliverable::extract_and_validate(&response) {
            Err(e) => {
                tracing::warn!("Task {} deliverable rejected: {e}", task.id);
                for action in task
                    .delivery
                    .iter_mut()
                    .filter(|a| a.status == DeliveryStatus::Pending)
                {
                    action.status = DeliveryStatus::NeedsReview;
                }
                task.work.push(WorkItem {
                    description: format!("Unvalidated response: {response}"),
                    status: WorkItemStatus::Failed,
                });
                if let Err(e) = self
                    .hub
                    .raise_attention(&task.id, &task.title, "needs_review")
                {
                    tracing::warn!("Attention item not recorded for {}: {e}", task.id);
                }
                self.finish(task, TaskStatus::NeedsReview)
            }
            Ok(Deliverable::None) => {
                // Deliberate no-op, distinct from malformed output.
                task.work
                    .push(WorkItem::done("No deliverable produced (explicit no-op)"));
                for action in task
                    .delivery
                    .iter_mut()
                    .filter(|a| a.status == DeliveryStatus::Pending)
                {
                    action.status = DeliveryStatus::Completed;
                }
                self.finish(task, TaskStatus::Completed)
            }
            Ok(Deliverable::Content(text)) => {
                for action in task.delivery.iter_mut() {
                    if action.content.is_none() {
                        action.content = Some(text.clone());
                    }
                }
                self.dispatch_and_finish(task).await
            }
        }
    }

    /// Send pending actions and aggregate: all completed → completed; any
    /// failed → failed, without rolling back delivered siblings.
    async fn dispatch_and_finish(&self, mut task: Task) -> Result<Task> {
        let all_ok = self.dispatcher.dispatch(&mut task.delivery).await;
        let status = if all_ok {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.finish(task, status)
    }

    fn finish(&self, mut task: Task, status: TaskStatus) -> Result<Task> {
        task.status = status;
        if status == TaskStatus::Completed {
            task.completed_at = Some(Utc::now());
        }
        self.store.save(&task)?;
        self.hub.publish(&task.id, status);
        tracing::info!("Task {} finished: {}", task.id, status.as_str());
        Ok(task)
    }
}

fn mark_work_done(task: &mut Task) {
    for item in task
        .work
        .iter_mut()
        .filter(|w| w.status == WorkItemStatus::Pending)
    {
        item.status = WorkItemStatus::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deliverable::{DELIVERABLE_CLOSE, DELIVERABLE_OPEN, NO_DELIVERABLE};
    use opspilot_core::traits::DeliveryChannel;
    use opspilot_core::types::{CreatedBy, DeliveryAction};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted engine fake — records invocations and prompts.
    struct FakeEngine {
        response: Mutex<String>,
        fail: bool,
        calls: AtomicUsize,
        last_prompt: Mutex<String>,
    }

    impl FakeEngine {
        fn replying(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(response.to_string()),
                fail: false,
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(String::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(String::new()),
                fail: true,
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(String::new()),
            })
        }
    }

    #[async_trait]
    impl ReasoningEngine for FakeEngine {
        fn name(&self) -> &str {
            "fake"
        }

        async fn invoke(
            &self,
            prompt: &str,
            _session_id: Option<&str>,
            _continuity: bool,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = prompt.to_string();
            if self.fail {
                return Err(OpsPilotError::Provider("engine down".into()));
            }
            Ok(self.response.lock().unwrap().clone())
        }
    }

    /// Channel fake that records sends and can be told to fail.
    struct FakeChannel {
        name: String,
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl FakeChannel {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                sent: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn sends(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryChannel for FakeChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, recipient: &str, content: &str) -> Result<()> {
            if self.fail {
                return Err(OpsPilotError::Channel("down".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), content.to_string()));
            Ok(())
        }
    }

    fn framed(content: &str) -> String {
        format!("internal musings\n{DELIVERABLE_OPEN}\n{content}\n{DELIVERABLE_CLOSE}\ndone")
    }

    fn executor_with(
        engine: Arc<FakeEngine>,
        channels: Vec<Arc<FakeChannel>>,
    ) -> (Executor, Arc<TaskStore>) {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let mut dispatcher = Dispatcher::new();
        for channel in channels {
            dispatcher.register(channel);
        }
        let executor = Executor::new(
            engine,
            store.clone(),
            dispatcher,
            Arc::new(StatusHub::new()),
            10,
        );
        (executor, store)
    }

    #[tokio::test]
    async fn test_precomposed_skips_engine_and_delivers_verbatim() {
        let engine = FakeEngine::replying("should never be used");
        let chat = FakeChannel::new("chat", false);
        let (executor, store) = executor_with(engine.clone(), vec![chat.clone()]);

        let mut task = Task::immediate("reminder", "irrelevant", CreatedBy::User);
        task.delivery.push(DeliveryAction::with_content(
            "chat",
            Some("x"),
            "Don't forget to call mom",
        ));
        store.save(&task).unwrap();

        let done = executor.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            chat.sends(),
            vec![("x".to_string(), "Don't forget to call mom".to_string())]
        );
    }

    #[tokio::test]
    async fn test_engine_path_delivers_exactly_once() {
        let engine = FakeEngine::replying(&framed("Three great beaches near Lisbon"));
        let chat = FakeChannel::new("chat", false);
        let (executor, store) = executor_with(engine.clone(), vec![chat.clone()]);

        let mut task = Task::immediate("beaches", "Research beaches", CreatedBy::User);
        task.work.push(WorkItem::pending("Research beaches"));
        task.delivery.push(DeliveryAction::new("chat", Some("x")));
        store.save(&task).unwrap();

        let done = executor.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        let sends = chat.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].1, "Three great beaches near Lisbon");
        assert!(!sends[0].1.contains(DELIVERABLE_OPEN));
        assert_eq!(done.work[0].status, WorkItemStatus::Done);
    }

    #[tokio::test]
    async fn test_validation_failure_means_zero_sends() {
        let engine = FakeEngine::replying("rambling with no delimiters at all");
        let chat = FakeChannel::new("chat", false);
        let (executor, store) = executor_with(engine, vec![chat.clone()]);

        let mut task = Task::immediate("t", "i", CreatedBy::User);
        task.delivery.push(DeliveryAction::new("chat", Some("x")));
        store.save(&task).unwrap();

        let done = executor.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::NeedsReview);
        assert!(chat.sends().is_empty());
        assert_eq!(done.delivery[0].status, DeliveryStatus::NeedsReview);
        // Raw response persisted as the work record.
        assert!(done
            .work
            .iter()
            .any(|w| w.description.contains("rambling")));
    }

    #[tokio::test]
    async fn test_sentinel_completes_with_zero_sends() {
        let engine = FakeEngine::replying(&framed(NO_DELIVERABLE));
        let chat = FakeChannel::new("chat", false);
        let (executor, store) = executor_with(engine, vec![chat.clone()]);

        let mut task = Task::immediate("t", "i", CreatedBy::User);
        task.delivery.push(DeliveryAction::new("chat", Some("x")));
        store.save(&task).unwrap();

        let done = executor.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(chat.sends().is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_fails_task() {
        let engine = FakeEngine::failing();
        let chat = FakeChannel::new("chat", false);
        let (executor, store) = executor_with(engine, vec![chat.clone()]);

        let mut task = Task::immediate("t", "i", CreatedBy::User);
        task.delivery.push(DeliveryAction::new("chat", Some("x")));
        store.save(&task).unwrap();

        let done = executor.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(chat.sends().is_empty());
        assert!(done
            .work
            .iter()
            .any(|w| w.description.contains("Reasoning failure")));
    }

    #[tokio::test]
    async fn test_informational_task_completes_without_dispatch() {
        let engine = FakeEngine::replying("notes recorded");
        let (executor, store) = executor_with(engine.clone(), vec![]);

        let task = Task::immediate("note", "Record findings", CreatedBy::Agent);
        store.save(&task).unwrap();

        let done = executor.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert!(done.work.iter().any(|w| w.description == "notes recorded"));
    }

    #[tokio::test]
    async fn test_partial_delivery_failure_is_not_rolled_back() {
        let engine = FakeEngine::replying(&framed("update"));
        let chat = FakeChannel::new("chat", false);
        let mail = FakeChannel::new("mail", true);
        let (executor, store) = executor_with(engine, vec![chat.clone(), mail]);

        let mut task = Task::immediate("t", "i", CreatedBy::User);
        task.delivery.push(DeliveryAction::new("chat", Some("x")));
        task.delivery.push(DeliveryAction::new("mail", Some("a@b.c")));
        store.save(&task).unwrap();

        let done = executor.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.delivery[0].status, DeliveryStatus::Completed);
        assert_eq!(done.delivery[1].status, DeliveryStatus::Failed);
        assert_eq!(chat.sends().len(), 1);
    }

    #[tokio::test]
    async fn test_recurrence_prompt_includes_prior_outcome() {
        let engine = FakeEngine::replying(&framed("Second week summary"));
        let chat = FakeChannel::new("chat", false);
        let (executor, store) = executor_with(engine.clone(), vec![chat]);

        // First occurrence, already completed with a delivered outcome.
        let mut first = Task::immediate("weekly", "Summarize", CreatedBy::Scheduler);
        first.recurrence_id = Some("R1".into());
        first.session_id = Some("S1".into());
        first.status = TaskStatus::Completed;
        first.occurrence_date = Some("2026-08-24".into());
        first.created_at = Utc::now() - chrono::Duration::days(7);
        let mut action = DeliveryAction::with_content("chat", Some("x"), "Beach A was best");
        action.status = DeliveryStatus::Completed;
        first.delivery.push(action);
        store.save(&first).unwrap();

        // Second occurrence shares the recurrence and session.
        let mut second = Task::immediate("weekly", "Summarize", CreatedBy::Scheduler);
        second.recurrence_id = Some("R1".into());
        second.session_id = Some("S1".into());
        second.occurrence_date = Some("2026-08-31".into());
        second.delivery.push(DeliveryAction::new("chat", Some("x")));
        store.save(&second).unwrap();

        executor.run(&second.id).await.unwrap();
        let prompt = engine.last_prompt.lock().unwrap().clone();
        assert!(prompt.contains("Beach A was best"));
        assert!(prompt.contains("[Prior occurrences]"));
    }

    #[tokio::test]
    async fn test_run_rejects_non_pending_task() {
        let engine = FakeEngine::replying("x");
        let (executor, store) = executor_with(engine, vec![]);

        let mut task = Task::immediate("t", "i", CreatedBy::User);
        task.status = TaskStatus::Completed;
        store.save(&task).unwrap();

        assert!(executor.run(&task.id).await.is_err());
    }

    #[tokio::test]
    async fn test_leaked_marker_inside_deliverable_routes_to_review() {
        let engine = FakeEngine::replying(&framed(&format!(
            "text with {DELIVERABLE_CLOSE} inside"
        )));
        let chat = FakeChannel::new("chat", false);
        let (executor, store) = executor_with(engine, vec![chat.clone()]);

        let mut task = Task::immediate("t", "i", CreatedBy::User);
        task.delivery.push(DeliveryAction::new("chat", Some("x")));
        store.save(&task).unwrap();

        // The extractor stops at the first close marker, leaving "text with"
        // — still a valid deliverable. A close marker glued directly after
        // the open marker instead yields an empty extraction → review.
        let done = executor.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        let engine2 = FakeEngine::replying(&format!("{DELIVERABLE_OPEN}{DELIVERABLE_CLOSE}"));
        let chat2 = FakeChannel::new("chat", false);
        let (executor2, store2) = executor_with(engine2, vec![chat2.clone()]);
        let mut task2 = Task::immediate("t", "i", CreatedBy::User);
        task2.delivery.push(DeliveryAction::new("chat", Some("x")));
        store2.save(&task2).unwrap();
        let done2 = executor2.run(&task2.id).await.unwrap();
        assert_eq!(done2.status, TaskStatus::NeedsReview);
        assert!(chat2.sends().is_empty());
    }
}
