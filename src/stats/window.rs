use std::{fmt, str::FromStr};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Statistics period. Every period is a trailing window ending at "now":
/// daily = 24 h, weekly = 7 d, monthly = 30 d, yearly = 365 d.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::Daily, Period::Weekly, Period::Monthly, Period::Yearly];

    pub fn days(self) -> i64 {
        match self {
            Period::Daily => 1,
            Period::Weekly => 7,
            Period::Monthly => 30,
            Period::Yearly => 365,
        }
    }

    pub fn window(self, now: DateTime<Utc>) -> Window {
        Window {
            start: now - Duration::days(self.days()),
            end: now,
        }
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(anyhow::anyhow!("unknown period: {other:?}")),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::Yearly => "yearly",
        })
    }
}

/// Half-open time window `(start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// A reading at `at` counts toward this window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at > self.start && at <= self.end
    }

    /// A reading at `at` can serve as the baseline for this window.
    pub fn is_before(&self, at: DateTime<Utc>) -> bool {
        at <= self.start
    }

    pub fn seconds(&self) -> f64 {
        (self.end - self.start).num_seconds().max(0) as f64
    }

    /// Length of the intersection with `[from, to)` in seconds; `to = None` is open ended.
    pub fn overlap_seconds(&self, from: DateTime<Utc>, to: Option<DateTime<Utc>>) -> f64 {
        let start = self.start.max(from);
        let end = to.map_or(self.end, |to| self.end.min(to));
        (end - start).num_seconds().max(0) as f64
    }
}
