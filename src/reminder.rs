//! Deadline reminders for pending approvals.
//!
//! Nothing here schedules itself; a caller (the CLI `reminders` command or
//! `POST /reminders/run`) invokes [`ReminderScheduler::tick`] periodically.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::engine::types::PendingApproval;
use crate::error::WorkflowResult;
use crate::notify::{Notification, NotificationChannel, send_best_effort};
use crate::storage::InstanceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    DayBefore,
    FourHoursBefore,
    HourBefore,
    Overtime,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 4] = [
        ReminderKind::DayBefore,
        ReminderKind::FourHoursBefore,
        ReminderKind::HourBefore,
        ReminderKind::Overtime,
    ];

    /// Offset from the deadline at which this reminder fires.
    pub fn offset(&self) -> Duration {
        match self {
            ReminderKind::DayBefore => Duration::hours(-24),
            ReminderKind::FourHoursBefore => Duration::hours(-4),
            ReminderKind::HourBefore => Duration::hours(-1),
            ReminderKind::Overtime => Duration::hours(1),
        }
    }

    fn phrase(&self) -> &'static str {
        match self {
            ReminderKind::DayBefore => "is due in 24 hours",
            ReminderKind::FourHoursBefore => "is due in 4 hours",
            ReminderKind::HourBefore => "is due in 1 hour",
            ReminderKind::Overtime => "is overdue",
        }
    }
}

/// Reminder instants for a deadline, in firing order.
pub fn reminder_times(deadline: DateTime<Utc>) -> Vec<(ReminderKind, DateTime<Utc>)> {
    ReminderKind::ALL
        .iter()
        .map(|kind| (*kind, deadline + kind.offset()))
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReminderRun {
    pub sent: usize,
    pub failed: usize,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

pub struct ReminderScheduler {
    store: Arc<dyn InstanceStore>,
    channel: Arc<dyn NotificationChannel>,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn InstanceStore>, channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            store,
            channel,
            last_tick: Mutex::new(None),
        }
    }

    /// Send every reminder whose instant falls in `(since, now]`.
    pub async fn run_due(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<ReminderRun> {
        let mut run = ReminderRun {
            window_start: Some(since),
            window_end: Some(now),
            ..Default::default()
        };

        for approval in self.store.list_pending().await? {
            if !approval.is_actionable() {
                continue;
            }
            let Some(deadline) = approval.deadline else {
                continue;
            };
            for (kind, at) in reminder_times(deadline) {
                if at <= since || at > now {
                    continue;
                }
                let notification = reminder_notification(&approval, kind);
                if send_best_effort(self.channel.as_ref(), &notification).await {
                    run.sent += 1;
                } else {
                    run.failed += 1;
                }
            }
        }

        info!(sent = run.sent, failed = run.failed, "Reminder run finished");
        Ok(run)
    }

    /// Run reminders due since the previous tick. The first tick only
    /// records `now`, so a fresh scheduler never replays old reminders.
    pub async fn tick(&self, now: DateTime<Utc>) -> WorkflowResult<ReminderRun> {
        let mut last = self.last_tick.lock().await;
        let run = match *last {
            Some(since) if since < now => self.run_due(since, now).await?,
            Some(_) => ReminderRun::default(),
            None => {
                debug!("First reminder tick; recording start of window");
                ReminderRun {
                    window_end: Some(now),
                    ..Default::default()
                }
            }
        };
        *last = Some(now);
        Ok(run)
    }
}

fn reminder_notification(approval: &PendingApproval, kind: ReminderKind) -> Notification {
    let title = approval
        .business_data
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or(approval.node_name.as_str());
    Notification {
        recipient: approval.assigned_to.clone(),
        kind: "reminder".to_string(),
        subject: format!("Reminder: {}", title),
        body: format!("Approval '{}' {}", approval.node_name, kind.phrase()),
        instance_id: Some(approval.instance_id.clone()),
        node_id: Some(approval.node_id.clone()),
    }
}
