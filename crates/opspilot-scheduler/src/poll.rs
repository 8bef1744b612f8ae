//! Poll engine — checks the trigger source, fires events exactly once.
//!
//! Durability ordering: the ledger write happens before task creation, so a
//! crash between the two at worst loses one occurrence instead of firing it
//! twice.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;

use opspilot_core::config::SchedulerConfig;
use opspilot_core::error::Result;
use opspilot_core::traits::TriggerSource;
use opspilot_core::types::{Task, TaskStatus, TaskType, TriggerEvent};
use opspilot_core::StatusHub;
use opspilot_store::{TaskFilter, TaskStore, TriggerLedger};

/// The scheduler — turns fireable trigger events into pending tasks.
pub struct Scheduler {
    source: Arc<dyn TriggerSource>,
    ledger: Arc<TriggerLedger>,
    store: Arc<TaskStore>,
    hub: Arc<StatusHub>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn TriggerSource>,
        ledger: Arc<TriggerLedger>,
        store: Arc<TaskStore>,
        hub: Arc<StatusHub>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            ledger,
            store,
            hub,
            config,
        }
    }

    /// One poll cycle. Returns the tasks created this cycle. A failure
    /// evaluating one event is logged and skipped; the cycle continues.
    pub async fn poll_once(&self) -> Vec<Task> {
        let lookahead = Duration::minutes(self.config.lookahead_minutes as i64);
        let events = match self.source.upcoming(lookahead).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Trigger source poll failed: {e}");
                return Vec::new();
            }
        };

        let now = Utc::now();
        let mut created = Vec::new();
        for event in events.iter().filter(|e| e.fire_at <= now) {
            match self.fire_event(event) {
                Ok(Some(task)) => {
                    tracing::info!("Task created: '{}' ({})", task.title, task.id);
                    created.push(task);
                }
                Ok(None) => {
                    tracing::debug!("Already fired, skipping: {}@{}", event.uid, event.occurrence);
                }
                Err(e) => {
                    tracing::warn!("Failed to fire event {}@{}: {e}", event.uid, event.occurrence);
                }
            }
        }
        created
    }

    /// Fire one event: ledger write first, then task creation. Returns None
    /// when the occurrence had already fired.
    fn fire_event(&self, event: &TriggerEvent) -> Result<Option<Task>> {
        if !self.ledger.mark_fired(&event.uid, &event.occurrence)? {
            return Ok(None);
        }

        let mut task = Task::scheduled(event);
        if event.recurring {
            let recurrence_id = recurrence_id_for(&event.uid);
            // Subsequent occurrences continue the first occurrence's session.
            if let Some(first) = self.store.first_of_recurrence(&recurrence_id)? {
                task.session_id = first.session_id.clone();
            }
            task.recurrence_id = Some(recurrence_id);
        }
        self.store.save(&task)?;
        self.hub.publish(&task.id, TaskStatus::Pending);
        Ok(Some(task))
    }

    /// Pending scheduled tasks whose due time has passed. Covers both tasks
    /// fired from the trigger source this cycle and scheduled tasks created
    /// through the API, which no trigger event will ever fire.
    pub fn due_pending(&self) -> Result<Vec<Task>> {
        let pending = self.store.list(&TaskFilter {
            status: Some(TaskStatus::Pending),
            task_type: Some(TaskType::Scheduled),
            ..Default::default()
        })?;
        let now = Utc::now();
        Ok(pending
            .into_iter()
            .filter(|t| t.scheduled_for.is_some_and(|at| at <= now))
            .collect())
    }
}

/// Recurrence id derived from the event UID.
fn recurrence_id_for(event_uid: &str) -> String {
    format!("rec-{event_uid}")
}

/// Spawn the scheduler loop. Each cycle is short and timer-driven; created
/// tasks are queued for the (sequential) executor worker, so a long-running
/// execution never delays the next poll.
pub async fn spawn_scheduler(scheduler: Arc<Scheduler>, queue: mpsc::Sender<Task>) {
    let interval_secs = scheduler.config.poll_interval_secs;
    tracing::info!(
        "Scheduler started (poll every {}s, look-ahead {}m)",
        interval_secs,
        scheduler.config.lookahead_minutes
    );

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        scheduler.poll_once().await;
        let due = match scheduler.due_pending() {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!("Due-task scan failed: {e}");
                continue;
            }
        };
        for task in due {
            if queue.send(task).await.is_err() {
                tracing::error!("Executor queue closed, stopping scheduler");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opspilot_core::error::OpsPilotError;
    use opspilot_core::types::CreatedBy;
    use std::sync::Mutex;

    /// Trigger source backed by a mutable event list.
    struct StaticSource {
        events: Mutex<Vec<TriggerEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl TriggerSource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        async fn upcoming(&self, _lookahead: Duration) -> Result<Vec<TriggerEvent>> {
            if self.fail {
                return Err(OpsPilotError::Other("source down".into()));
            }
            Ok(self.events.lock().unwrap().clone())
        }
    }

    fn event(uid: &str, occurrence: &str, recurring: bool) -> TriggerEvent {
        TriggerEvent {
            uid: uid.into(),
            title: format!("event {uid}"),
            instructions: "do the thing".into(),
            fire_at: Utc::now() - Duration::seconds(5),
            occurrence: occurrence.into(),
            recurring,
            delivery: Vec::new(),
        }
    }

    fn scheduler_with(events: Vec<TriggerEvent>) -> (Scheduler, Arc<TaskStore>, Arc<TriggerLedger>) {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let ledger = Arc::new(TriggerLedger::open_in_memory().unwrap());
        let scheduler = Scheduler::new(
            Arc::new(StaticSource {
                events: Mutex::new(events),
                fail: false,
            }),
            ledger.clone(),
            store.clone(),
            Arc::new(StatusHub::new()),
            SchedulerConfig::default(),
        );
        (scheduler, store, ledger)
    }

    #[tokio::test]
    async fn test_fires_once_across_replays() {
        let (scheduler, store, _) = scheduler_with(vec![event("ev1", "occ1", false)]);

        let first = scheduler.poll_once().await;
        assert_eq!(first.len(), 1);

        // Replaying the same poll (as after a restart with the ledger intact)
        // must not create a duplicate task.
        let second = scheduler.poll_once().await;
        assert!(second.is_empty());
        assert_eq!(store.list(&TaskFilter::default()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_written_before_task() {
        let (scheduler, _, ledger) = scheduler_with(vec![event("ev1", "occ1", false)]);
        scheduler.poll_once().await;
        assert!(ledger.has_fired("ev1", "occ1").unwrap());
    }

    #[tokio::test]
    async fn test_recurring_occurrences_share_session() {
        let (scheduler, store, _) = scheduler_with(vec![event("rec-ev", "occ1", true)]);
        let first = scheduler.poll_once().await;
        assert_eq!(first.len(), 1);
        let first_session = first[0].session_id.clone();
        assert!(first_session.is_some());
        assert_eq!(first[0].recurrence_id.as_deref(), Some("rec-rec-ev"));

        // Second occurrence of the same event.
        let (scheduler2, _, _) = {
            let ledger = Arc::new(TriggerLedger::open_in_memory().unwrap());
            let s = Scheduler::new(
                Arc::new(StaticSource {
                    events: Mutex::new(vec![event("rec-ev", "occ2", true)]),
                    fail: false,
                }),
                ledger.clone(),
                store.clone(),
                Arc::new(StatusHub::new()),
                SchedulerConfig::default(),
            );
            (s, store.clone(), ledger)
        };
        let second = scheduler2.poll_once().await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].session_id, first_session);
        assert_eq!(second[0].recurrence_id, first[0].recurrence_id);
    }

    #[tokio::test]
    async fn test_future_events_not_fired() {
        let mut ev = event("ev1", "occ1", false);
        ev.fire_at = Utc::now() + Duration::minutes(3);
        let (scheduler, store, _) = scheduler_with(vec![ev]);
        assert!(scheduler.poll_once().await.is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_source_failure_yields_empty_cycle() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let scheduler = Scheduler::new(
            Arc::new(StaticSource {
                events: Mutex::new(vec![]),
                fail: true,
            }),
            Arc::new(TriggerLedger::open_in_memory().unwrap()),
            store.clone(),
            Arc::new(StatusHub::new()),
            SchedulerConfig::default(),
        );
        assert!(scheduler.poll_once().await.is_empty());
    }

    #[tokio::test]
    async fn test_one_bad_event_does_not_abort_cycle() {
        // Two events with the same uid/occurrence: the second is a ledger
        // no-op, and the distinct third event still fires.
        let (scheduler, store, _) = scheduler_with(vec![
            event("ev1", "occ1", false),
            event("ev1", "occ1", false),
            event("ev2", "occ1", false),
        ]);
        let created = scheduler.poll_once().await;
        assert_eq!(created.len(), 2);
        assert_eq!(store.list(&TaskFilter::default()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_due_pending_includes_api_created_scheduled_tasks() {
        let (scheduler, store, _) = scheduler_with(vec![]);

        let mut due = Task::immediate("due", "i", CreatedBy::User);
        due.task_type = TaskType::Scheduled;
        due.scheduled_for = Some(Utc::now() - Duration::minutes(1));
        store.save(&due).unwrap();

        let mut future = Task::immediate("future", "i", CreatedBy::User);
        future.task_type = TaskType::Scheduled;
        future.scheduled_for = Some(Utc::now() + Duration::minutes(30));
        store.save(&future).unwrap();

        // Immediate tasks are queued at creation, not by the poll cycle.
        store
            .save(&Task::immediate("now", "i", CreatedBy::User))
            .unwrap();

        let found = scheduler.due_pending().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[tokio::test]
    async fn test_fired_events_show_up_as_due_pending() {
        let (scheduler, _, _) = scheduler_with(vec![event("ev1", "occ1", false)]);
        scheduler.poll_once().await;
        let due = scheduler.due_pending().unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].source_ref.as_deref(), Some("ev1"));
    }

    #[tokio::test]
    async fn test_event_delivery_carried_onto_task() {
        let mut ev = event("ev1", "occ1", false);
        ev.delivery
            .push(opspilot_core::types::DeliveryAction::new("chat", Some("x")));
        let (scheduler, _, _) = scheduler_with(vec![ev]);
        let created = scheduler.poll_once().await;
        assert_eq!(created[0].delivery.len(), 1);
        assert_eq!(created[0].delivery[0].channel, "chat");
    }
}
