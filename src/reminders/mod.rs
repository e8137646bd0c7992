//! Meter reading reminders: one per meter, due a fixed interval after the
//! meter's latest reading.

mod service;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::MeterReading;

pub use service::ReminderService;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReminder {
    pub meter_id: String,
    pub meter_name: String,
    pub last_reading_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub overdue: bool,
}

/// Reminders for every meter in `readings`, earliest due first.
pub fn schedule_reminders(
    readings: &[MeterReading],
    interval: Duration,
    now: DateTime<Utc>,
) -> Vec<ScheduledReminder> {
    let mut latest: HashMap<&str, &MeterReading> = HashMap::new();
    for reading in readings {
        latest
            .entry(reading.meter_id.as_str())
            .and_modify(|current| {
                if reading.timestamp > current.timestamp {
                    *current = reading;
                }
            })
            .or_insert(reading);
    }

    let mut reminders: Vec<ScheduledReminder> = latest
        .into_values()
        .map(|reading| {
            // Saturate instead of overflowing on absurd intervals.
            let due_at = reading
                .timestamp
                .checked_add_signed(interval)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            ScheduledReminder {
                meter_id: reading.meter_id.clone(),
                meter_name: reading.meter_name.clone(),
                last_reading_at: reading.timestamp,
                due_at,
                overdue: due_at <= now,
            }
        })
        .collect();
    reminders.sort_by(|a, b| a.due_at.cmp(&b.due_at).then_with(|| a.meter_id.cmp(&b.meter_id)));
    reminders
}
