use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::window::Window;
use crate::db::models::{CalculationType, Device, MeterReading, ReadingType};

/// Reduces one meter's time-ordered readings to the amount for a window.
pub type Reducer = fn(&[&MeterReading], &Window) -> f64;

/// Strategy table. Adding a calculation type means adding one arm here.
pub fn reducer_for(calculation: CalculationType) -> Reducer {
    match calculation {
        CalculationType::Sum => reduce_sum,
        CalculationType::Difference => reduce_difference,
    }
}

/// Every reading inside the window is an independent amount.
fn reduce_sum(readings: &[&MeterReading], window: &Window) -> f64 {
    readings
        .iter()
        .filter(|r| window.contains(r.timestamp))
        .map(|r| r.reading)
        .sum::<f64>()
        .max(0.0)
}

/// Readings are counter values: last in window minus the last reading before
/// the window, or minus the first in-window reading when there is no earlier one.
fn reduce_difference(readings: &[&MeterReading], window: &Window) -> f64 {
    let mut baseline = None;
    let mut first = None;
    let mut last = None;

    for r in readings {
        if window.is_before(r.timestamp) {
            baseline = Some(r.reading);
        } else if window.contains(r.timestamp) {
            first.get_or_insert(r.reading);
            last = Some(r.reading);
        }
    }

    match (baseline.or(first), last) {
        // Meter rollback or replacement clamps to zero.
        (Some(base), Some(last)) => (last - base).max(0.0),
        _ => 0.0,
    }
}

/// Period amount attributed to one meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterTotal {
    pub meter_id: String,
    pub meter_name: String,
    #[serde(rename = "type")]
    pub reading_type: ReadingType,
    pub calculation: CalculationType,
    pub total: f64,
}

/// Group readings per `(meter_id, type)`, sort each group by timestamp and
/// reduce it with the strategy of the owning device.
pub fn meter_totals(readings: &[MeterReading], devices: &[Device], window: &Window) -> Vec<MeterTotal> {
    let devices: HashMap<&str, &Device> = devices.iter().map(|d| (d.id.as_str(), d)).collect();

    let mut groups: BTreeMap<(&str, ReadingType), Vec<&MeterReading>> = BTreeMap::new();
    for r in readings {
        groups.entry((r.meter_id.as_str(), r.reading_type)).or_default().push(r);
    }

    groups
        .into_iter()
        .map(|((meter_id, reading_type), mut series)| {
            series.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            // Non-empty by construction.
            let latest = series[series.len() - 1];
            let calculation = devices
                .get(latest.device_id.as_str())
                .map_or(CalculationType::Difference, |d| d.calculation_type());
            let total = reducer_for(calculation)(&series, window);

            MeterTotal {
                meter_id: meter_id.to_owned(),
                meter_name: latest.meter_name.clone(),
                reading_type,
                calculation,
                total,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::*;
    use crate::{
        db::models::{DeviceStatus, DeviceType},
        stats::window::Period,
    };

    fn now() -> DateTime<Utc> {
        "2024-06-30T12:00:00Z".parse().unwrap()
    }

    fn reading(meter_id: &str, device_id: &str, value: f64, hours_ago: i64) -> MeterReading {
        MeterReading {
            id: format!("{meter_id}-{hours_ago}"),
            device_id: device_id.to_owned(),
            meter_id: meter_id.to_owned(),
            meter_name: format!("Meter {meter_id}"),
            reading: value,
            timestamp: now() - Duration::hours(hours_ago),
            reading_type: ReadingType::Electricity,
            unit: "kWh".into(),
            notes: None,
        }
    }

    fn device(id: &str, calculation_type: CalculationType) -> Device {
        Device {
            id: id.to_owned(),
            name: id.to_owned(),
            device_type: DeviceType::SmartMeter,
            status: DeviceStatus::Online,
            last_update: None,
            data: serde_json::Value::Null,
            calculation_type: Some(calculation_type),
        }
    }

    fn total(readings: &[MeterReading], devices: &[Device]) -> f64 {
        let window = Period::Weekly.window(now());
        meter_totals(readings, devices, &window).iter().map(|t| t.total).sum()
    }

    #[test]
    fn sum_adds_in_window_readings() {
        let readings = vec![reading("m", "d", 5.0, 30), reading("m", "d", 3.0, 20), reading("m", "d", 7.0, 10)];
        assert_eq!(total(&readings, &[device("d", CalculationType::Sum)]), 15.0);
    }

    #[test]
    fn sum_ignores_readings_outside_window() {
        let readings = vec![reading("m", "d", 100.0, 24 * 8), reading("m", "d", 4.0, 1)];
        assert_eq!(total(&readings, &[device("d", CalculationType::Sum)]), 4.0);
    }

    #[test]
    fn difference_without_prior_uses_first_in_window() {
        let readings = vec![reading("m", "d", 100.0, 30), reading("m", "d", 120.0, 20), reading("m", "d", 135.0, 10)];
        assert_eq!(total(&readings, &[device("d", CalculationType::Difference)]), 35.0);
    }

    #[test]
    fn difference_with_prior_uses_baseline() {
        let readings = vec![reading("m", "d", 90.0, 24 * 10), reading("m", "d", 135.0, 5)];
        assert_eq!(total(&readings, &[device("d", CalculationType::Difference)]), 45.0);
    }

    #[test]
    fn difference_sorts_unordered_input() {
        let readings = vec![reading("m", "d", 135.0, 10), reading("m", "d", 100.0, 30), reading("m", "d", 120.0, 20)];
        assert_eq!(total(&readings, &[device("d", CalculationType::Difference)]), 35.0);
    }

    #[test]
    fn negative_delta_clamps_to_zero() {
        let readings = vec![reading("m", "d", 135.0, 30), reading("m", "d", 40.0, 10)];
        assert_eq!(total(&readings, &[device("d", CalculationType::Difference)]), 0.0);
    }

    #[test]
    fn single_reading_meter_yields_zero() {
        let readings = vec![reading("m", "d", 5000.0, 3)];
        assert_eq!(total(&readings, &[]), 0.0);
    }

    #[test]
    fn unknown_device_defaults_to_difference() {
        let readings = vec![reading("m", "ghost", 10.0, 30), reading("m", "ghost", 12.5, 2)];
        let window = Period::Weekly.window(now());
        let totals = meter_totals(&readings, &[], &window);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].calculation, CalculationType::Difference);
        assert_eq!(totals[0].total, 2.5);
    }

    #[test]
    fn meters_are_reduced_independently() {
        let readings = vec![
            reading("a", "d", 10.0, 30),
            reading("a", "d", 20.0, 2),
            reading("b", "d", 500.0, 30),
            reading("b", "d", 501.0, 2),
        ];
        let window = Period::Weekly.window(now());
        let totals = meter_totals(&readings, &[device("d", CalculationType::Difference)], &window);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].meter_id, "a");
        assert_eq!(totals[0].total, 10.0);
        assert_eq!(totals[1].total, 1.0);
    }
}
