//! Tests for deadline reminders.

use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use hrflow::engine::types::*;
use hrflow::notify::{Notification, NotificationChannel};
use hrflow::reminder::ReminderScheduler;
use hrflow::storage::InstanceStore;
use hrflow::storage::memory_store::MemoryStore;

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<Notification>>,
    refuse: Option<String>,
}

impl RecordingChannel {
    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, n: &Notification) -> anyhow::Result<()> {
        if self.refuse.as_deref() == Some(n.recipient.as_str()) {
            bail!("mailbox full");
        }
        self.sent.lock().unwrap().push(n.clone());
        Ok(())
    }
}

fn row(user: &str, deadline: Option<DateTime<Utc>>, actions: Vec<ApprovalAction>) -> PendingApproval {
    let mut business_data = serde_json::Map::new();
    business_data.insert("title".into(), "Task assignment: Audit".into());
    PendingApproval {
        id: format!("row-{}", user),
        instance_id: "i1".into(),
        workflow_id: "wf".into(),
        node_id: "review".into(),
        node_name: "Manager review".into(),
        assigned_to: user.to_string(),
        business_id: "t-1".into(),
        business_type: "task_assignment".into(),
        business_data,
        priority: "normal".into(),
        deadline,
        can_delegate: false,
        required_actions: actions,
        created_at: Utc::now(),
    }
}

fn actionable() -> Vec<ApprovalAction> {
    vec![ApprovalAction::Approve, ApprovalAction::Reject]
}

async fn scheduler_with(
    rows: Vec<PendingApproval>,
    channel: Arc<RecordingChannel>,
) -> ReminderScheduler {
    let store = Arc::new(MemoryStore::new());
    for r in &rows {
        store.add_pending(r).await.unwrap();
    }
    ReminderScheduler::new(store, channel)
}

#[tokio::test]
async fn sends_reminders_falling_inside_the_window() {
    let now = Utc::now();
    let channel = Arc::new(RecordingChannel::default());
    let scheduler = scheduler_with(
        vec![
            // Hour-before reminder lands 10 minutes ago.
            row("1", Some(now + Duration::minutes(50)), actionable()),
            // Nothing due for days.
            row("2", Some(now + Duration::days(3)), actionable()),
            // No deadline at all.
            row("3", None, actionable()),
            // Watchers never get reminders.
            row("4", Some(now + Duration::minutes(50)), vec![ApprovalAction::View]),
        ],
        channel.clone(),
    )
    .await;

    let run = scheduler
        .run_due(now - Duration::minutes(15), now)
        .await
        .unwrap();
    assert_eq!(run.sent, 1);
    assert_eq!(run.failed, 0);

    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "1");
    assert_eq!(sent[0].kind, "reminder");
    assert_eq!(sent[0].subject, "Reminder: Task assignment: Audit");
    assert!(sent[0].body.contains("due in 1 hour"));
    assert_eq!(sent[0].instance_id.as_deref(), Some("i1"));
}

#[tokio::test]
async fn overdue_reminder_fires_an_hour_after_deadline() {
    let now = Utc::now();
    let channel = Arc::new(RecordingChannel::default());
    let scheduler = scheduler_with(
        vec![row("1", Some(now - Duration::minutes(61)), actionable())],
        channel.clone(),
    )
    .await;

    let run = scheduler
        .run_due(now - Duration::minutes(5), now)
        .await
        .unwrap();
    assert_eq!(run.sent, 1);
    assert!(channel.sent()[0].body.contains("overdue"));
}

#[tokio::test]
async fn failed_deliveries_are_counted() {
    let now = Utc::now();
    let channel = Arc::new(RecordingChannel {
        refuse: Some("2".into()),
        ..Default::default()
    });
    let deadline = Some(now + Duration::hours(24) - Duration::minutes(1));
    let scheduler = scheduler_with(
        vec![row("1", deadline, actionable()), row("2", deadline, actionable())],
        channel.clone(),
    )
    .await;

    let run = scheduler
        .run_due(now - Duration::minutes(5), now)
        .await
        .unwrap();
    assert_eq!(run.sent, 1);
    assert_eq!(run.failed, 1);
}

#[tokio::test]
async fn tick_windows_do_not_overlap() {
    let now = Utc::now();
    let channel = Arc::new(RecordingChannel::default());
    let scheduler = scheduler_with(
        vec![row("1", Some(now + Duration::hours(4) + Duration::minutes(2)), actionable())],
        channel.clone(),
    )
    .await;

    // First tick only opens the window.
    let first = scheduler.tick(now).await.unwrap();
    assert_eq!(first.sent, 0);
    assert!(first.window_start.is_none());

    // The four-hours-before reminder comes due two minutes later.
    let second = scheduler.tick(now + Duration::minutes(3)).await.unwrap();
    assert_eq!(second.sent, 1);
    assert_eq!(second.window_start, Some(now));

    let third = scheduler.tick(now + Duration::minutes(6)).await.unwrap();
    assert_eq!(third.sent, 0);

    // A tick that does not move forward sends nothing.
    let stale = scheduler.tick(now + Duration::minutes(6)).await.unwrap();
    assert_eq!(stale.sent, 0);

    assert_eq!(channel.sent().len(), 1);
}
