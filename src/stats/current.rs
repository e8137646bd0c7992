use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{MeterReading, ReadingType};

/// Instantaneous view built from the latest reading per metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentEnergyData {
    pub solar_production: f64,
    pub consumption: f64,
    /// No reading type carries battery state, so this stays at 0.
    pub battery_level: f64,
    pub battery_charging: bool,
    pub grid_feed_in: f64,
    pub grid_consumption: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Metric {
    SolarProduction,
    Consumption,
    GridFeedIn,
    GridConsumption,
}

/// Which reading types feed each metric.
const METRIC_SOURCES: [(Metric, &[ReadingType]); 4] = [
    (Metric::SolarProduction, &[ReadingType::Solar]),
    (Metric::Consumption, &[ReadingType::Electricity]),
    (Metric::GridFeedIn, &[ReadingType::GridFeedIn, ReadingType::SolarPvFeedIn]),
    (Metric::GridConsumption, &[ReadingType::Electricity]),
];

/// Latest known value of every metric. Metrics without readings default to 0;
/// empty input yields an all-zero snapshot stamped with `now`.
pub fn calculate_current_energy_data(readings: &[MeterReading], now: DateTime<Utc>) -> CurrentEnergyData {
    let mut latest: HashMap<Metric, &MeterReading> = HashMap::new();

    for r in readings {
        for (metric, sources) in METRIC_SOURCES {
            if !sources.contains(&r.reading_type) {
                continue;
            }
            let newer = latest.get(&metric).map_or(true, |cur| r.timestamp > cur.timestamp);
            if newer {
                latest.insert(metric, r);
            }
        }
    }

    let value = |metric: Metric| latest.get(&metric).map_or(0.0, |r| r.reading);
    let timestamp = latest.values().map(|r| r.timestamp).max().unwrap_or(now);

    CurrentEnergyData {
        solar_production: value(Metric::SolarProduction),
        consumption: value(Metric::Consumption),
        battery_level: 0.0,
        battery_charging: false,
        grid_feed_in: value(Metric::GridFeedIn),
        grid_consumption: value(Metric::GridConsumption),
        timestamp,
    }
}
