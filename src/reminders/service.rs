use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::{schedule_reminders, ScheduledReminder};
use crate::db::{models::MeterReading, Store, REMINDERS_KEY};

pub struct ReminderService {
    store: Store,
    interval: Duration,
}

impl ReminderService {
    pub fn new(store: Store, interval_days: i64) -> Self {
        Self {
            store,
            interval: Duration::try_days(interval_days).unwrap_or(Duration::MAX),
        }
    }

    /// Recompute reminders from `readings` and persist them.
    pub async fn reschedule(&self, readings: &[MeterReading], now: DateTime<Utc>) -> Result<Vec<ScheduledReminder>> {
        let reminders = schedule_reminders(readings, self.interval, now);
        self.store
            .save(REMINDERS_KEY, &reminders)
            .await
            .context("failed to persist scheduled reminders")?;

        let overdue = reminders.iter().filter(|r| r.overdue).count();
        info!(count = reminders.len(), overdue, "Reminders rescheduled");
        Ok(reminders)
    }

    /// The last persisted schedule, empty if none.
    pub async fn scheduled(&self) -> Result<Vec<ScheduledReminder>> {
        Ok(self
            .store
            .load::<Vec<ScheduledReminder>>(REMINDERS_KEY)
            .await?
            .unwrap_or_default())
    }
}
