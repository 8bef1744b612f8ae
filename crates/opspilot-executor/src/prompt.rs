//! Prompt assembly — task instructions, bounded recurrence context, channel
//! constraints, and the delimiter contract.

use opspilot_core::types::{DeliveryStatus, Task};

use crate::deliverable::{DELIVERABLE_CLOSE, DELIVERABLE_OPEN, NO_DELIVERABLE};

/// Per-run summary cap when serializing prior occurrences.
const RUN_SUMMARY_MAX: usize = 400;

/// Build the full prompt for one task run.
pub fn build_prompt(task: &Task, history: &[Task]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&task.instructions);
    prompt.push('\n');

    if !task.work.is_empty() {
        prompt.push_str("\nWork to perform:\n");
        for item in &task.work {
            prompt.push_str(&format!("- {}\n", item.description));
        }
    }

    if !history.is_empty() {
        prompt.push_str("\n[Prior occurrences]\n");
        for run in history {
            prompt.push_str(&summarize_run(run));
            prompt.push('\n');
        }
        prompt.push_str("[End of prior occurrences]\n");
    }

    let channels = task.allowed_channels();
    if !channels.is_empty() {
        prompt.push_str(&format!(
            "\nAllowed delivery channels: {}.\n",
            channels.join(", ")
        ));
        prompt.push_str(&format!(
            "Place the final user-facing output between {DELIVERABLE_OPEN} and \
             {DELIVERABLE_CLOSE} on their own lines. Everything outside the markers is \
             internal and will never be shown to anyone. If nothing should be sent, put \
             exactly {NO_DELIVERABLE} between the markers. Never put working notes or \
             reasoning inside the markers.\n"
        ));
    }

    prompt
}

/// One bounded line per prior run: occurrence, outcome, and what was
/// delivered (or the work log for informational runs).
fn summarize_run(run: &Task) -> String {
    let occurrence = run.occurrence_date.as_deref().unwrap_or("?");
    let delivered: Vec<&str> = run
        .delivery
        .iter()
        .filter(|a| a.status == DeliveryStatus::Completed)
        .filter_map(|a| a.content.as_deref())
        .collect();

    let outcome = if !delivered.is_empty() {
        delivered.join(" | ")
    } else {
        run.work
            .iter()
            .map(|w| w.description.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    };

    let mut line = format!("- {} ({}): {}", occurrence, run.status.as_str(), outcome);
    if line.len() > RUN_SUMMARY_MAX {
        line.truncate(RUN_SUMMARY_MAX);
        line.push_str("...");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use opspilot_core::types::{CreatedBy, DeliveryAction, TaskStatus, WorkItem};

    #[test]
    fn test_prompt_contains_instructions_and_channels() {
        let mut task = Task::immediate("beaches", "Research beaches near Lisbon", CreatedBy::User);
        task.delivery.push(DeliveryAction::new("chat", Some("x")));
        let prompt = build_prompt(&task, &[]);
        assert!(prompt.contains("Research beaches near Lisbon"));
        assert!(prompt.contains("Allowed delivery channels: chat."));
        assert!(prompt.contains(DELIVERABLE_OPEN));
        assert!(prompt.contains(NO_DELIVERABLE));
    }

    #[test]
    fn test_informational_prompt_has_no_delimiter_contract() {
        let task = Task::immediate("note", "Record findings", CreatedBy::Agent);
        let prompt = build_prompt(&task, &[]);
        assert!(!prompt.contains(DELIVERABLE_OPEN));
    }

    #[test]
    fn test_history_serialized_with_prior_outcomes() {
        let task = Task::immediate("weekly", "Summarize the week", CreatedBy::Scheduler);

        let mut prior = Task::immediate("weekly", "Summarize the week", CreatedBy::Scheduler);
        prior.status = TaskStatus::Completed;
        prior.occurrence_date = Some("2026-08-24".into());
        let mut action = DeliveryAction::with_content("chat", Some("x"), "Beach A was best");
        action.status = DeliveryStatus::Completed;
        prior.delivery.push(action);

        let prompt = build_prompt(&task, &[prior]);
        assert!(prompt.contains("[Prior occurrences]"));
        assert!(prompt.contains("Beach A was best"));
        assert!(prompt.contains("2026-08-24"));
    }

    #[test]
    fn test_run_summary_is_bounded() {
        let mut prior = Task::immediate("t", "i", CreatedBy::Scheduler);
        prior.work.push(WorkItem::done(&"x".repeat(2000)));
        let line = summarize_run(&prior);
        assert!(line.len() <= RUN_SUMMARY_MAX + 3);
    }
}
