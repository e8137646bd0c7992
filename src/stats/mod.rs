//! Energy statistics derived from raw meter readings.
//!
//! Everything here is pure and synchronous: the same readings, metadata and
//! `now` always produce the same result, and no input makes it fail. Missing
//! data reduces to zeros.

pub mod costs;
pub mod current;
pub mod reduce;
pub mod sustainability;
pub mod window;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::{
    costs::{calculate_detailed_costs, DetailedCosts, UtilityCost},
    current::{calculate_current_energy_data, CurrentEnergyData},
    reduce::MeterTotal,
    sustainability::{evaluate_goals, GoalProgress, SustainabilityMetrics},
    window::{Period, Window},
};
use crate::db::models::{Device, EnergyData, EnergyProvider, MeterReading, ReadingType, Utility};

/// kg CO2 avoided per kWh of self-produced electricity.
pub const GRID_EMISSION_FACTOR: f64 = 0.401;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyStats {
    pub period: Period,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Grid electricity consumption, kWh.
    pub consumption: f64,
    /// Solar production, kWh.
    pub production: f64,
    /// Energy exported to the grid, kWh.
    pub feed_in: f64,
    pub gas: f64,
    pub water: f64,
    pub heat: f64,
    /// Produced energy used on site, kWh.
    pub self_consumed: f64,
    /// Percentage of consumption covered by production, `[0, 100]`.
    pub autarky: f64,
    /// Percentage of production used on site, `[0, 100]`.
    pub self_consumption: f64,
    /// kg CO2.
    pub co2_saved: f64,
    /// Avoided grid purchase in currency.
    pub savings: f64,
    pub meters: Vec<MeterTotal>,
}

impl EnergyStats {
    pub fn empty(period: Period, window: Window) -> Self {
        Self {
            period,
            window_start: window.start,
            window_end: window.end,
            consumption: 0.0,
            production: 0.0,
            feed_in: 0.0,
            gas: 0.0,
            water: 0.0,
            heat: 0.0,
            self_consumed: 0.0,
            autarky: 0.0,
            self_consumption: 0.0,
            co2_saved: 0.0,
            savings: 0.0,
            meters: Vec::new(),
        }
    }
}

/// Reduce every meter over the period window and derive the aggregate figures.
pub fn calculate_energy_stats(
    readings: &[MeterReading],
    period: Period,
    devices: &[Device],
    providers: &[EnergyProvider],
    now: DateTime<Utc>,
) -> EnergyStats {
    let window = period.window(now);
    let mut stats = EnergyStats::empty(period, window);
    stats.meters = reduce::meter_totals(readings, devices, &window);

    for meter in &stats.meters {
        let slot = match meter.reading_type {
            ReadingType::Electricity => &mut stats.consumption,
            ReadingType::Solar => &mut stats.production,
            ReadingType::GridFeedIn | ReadingType::SolarPvFeedIn => &mut stats.feed_in,
            ReadingType::Gas => &mut stats.gas,
            ReadingType::Water => &mut stats.water,
            ReadingType::Heat => &mut stats.heat,
        };
        *slot += meter.total;
    }

    stats.self_consumed = (stats.production - stats.feed_in).clamp(0.0, stats.production.max(0.0));
    stats.autarky = percentage(stats.production, stats.consumption);
    stats.self_consumption = percentage(stats.self_consumed, stats.production);
    stats.co2_saved = stats.production * GRID_EMISSION_FACTOR;
    stats.savings =
        stats.self_consumed * costs::time_weighted_rate(providers, Utility::Electricity, None, &window);

    stats
}

/// `part / whole` as a percentage clamped to `[0, 100]`; 0 when undefined.
fn percentage(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        return 0.0;
    }
    let pct = part / whole * 100.0;
    if pct.is_finite() {
        pct.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Everything the presentation layer shows, computed in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub current: CurrentEnergyData,
    pub daily: EnergyStats,
    pub weekly: EnergyStats,
    pub monthly: EnergyStats,
    pub yearly: EnergyStats,
    pub costs: DetailedCosts,
    /// Equivalents of the CO2 saved over the yearly window.
    pub sustainability: SustainabilityMetrics,
    pub goals: Vec<GoalProgress>,
}

pub fn build_dashboard(data: &EnergyData, now: DateTime<Utc>) -> Dashboard {
    let stats =
        |period| calculate_energy_stats(&data.readings, period, &data.devices, &data.providers, now);
    let monthly = stats(Period::Monthly);
    let yearly = stats(Period::Yearly);

    Dashboard {
        generated_at: now,
        current: calculate_current_energy_data(&data.readings, now),
        daily: stats(Period::Daily),
        weekly: stats(Period::Weekly),
        costs: calculate_detailed_costs(&data.readings, &data.providers, Period::Monthly, &data.devices, now),
        sustainability: SustainabilityMetrics::from_co2(yearly.co2_saved),
        goals: evaluate_goals(&data.goals, &monthly),
        monthly,
        yearly,
    }
}
