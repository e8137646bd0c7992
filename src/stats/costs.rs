use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    reduce::meter_totals,
    window::{Period, Window},
};
use crate::db::models::{Device, EnergyProvider, MeterReading, Utility};

const SECONDS_PER_DAY: f64 = 86_400.0;
/// Monthly basic fees are pro-rated per day over a 365-day year.
const FEE_MONTHS_PER_DAY: f64 = 12.0 / 365.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtilityCost {
    pub utility: Utility,
    /// Consumption in the utility's unit (kWh or m³).
    pub consumption: f64,
    pub energy_cost: f64,
    pub basic_fee: f64,
    pub total: f64,
}

impl UtilityCost {
    fn zero(utility: Utility) -> Self {
        Self {
            utility,
            consumption: 0.0,
            energy_cost: 0.0,
            basic_fee: 0.0,
            total: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedCosts {
    pub period: Period,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub electricity: UtilityCost,
    pub gas: UtilityCost,
    pub water: UtilityCost,
    pub heat: UtilityCost,
    pub total: f64,
}

impl DetailedCosts {
    pub fn utilities(&self) -> [&UtilityCost; 4] {
        [&self.electricity, &self.gas, &self.water, &self.heat]
    }
}

/// Cost of every utility over the period window.
///
/// A meter's consumption is spread evenly over the window, and the window is
/// split wherever a provider contract starts or ends, so each share is priced
/// with the contract valid at that time. Basic fees are pro-rated per day of
/// contract validity inside the window.
pub fn calculate_detailed_costs(
    readings: &[MeterReading],
    providers: &[EnergyProvider],
    period: Period,
    devices: &[Device],
    now: DateTime<Utc>,
) -> DetailedCosts {
    let window = period.window(now);
    let mut electricity = UtilityCost::zero(Utility::Electricity);
    let mut gas = UtilityCost::zero(Utility::Gas);
    let mut water = UtilityCost::zero(Utility::Water);
    let mut heat = UtilityCost::zero(Utility::Heat);

    for meter in meter_totals(readings, devices, &window) {
        let Some(utility) = meter.reading_type.utility() else {
            continue;
        };
        let cost = match utility {
            Utility::Electricity => &mut electricity,
            Utility::Gas => &mut gas,
            Utility::Water => &mut water,
            Utility::Heat => &mut heat,
        };
        cost.consumption += meter.total;
        cost.energy_cost += meter.total * time_weighted_rate(providers, utility, Some(&meter.meter_id), &window);
    }

    for cost in [&mut electricity, &mut gas, &mut water, &mut heat] {
        cost.basic_fee = basic_fees(providers, cost.utility, &window);
        cost.total = cost.energy_cost + cost.basic_fee;
    }

    let total = electricity.total + gas.total + water.total + heat.total;

    DetailedCosts {
        period,
        window_start: window.start,
        window_end: window.end,
        electricity,
        gas,
        water,
        heat,
        total,
    }
}

/// Average price per unit over the window, weighted by how long each
/// contract applies. Stretches with no applicable contract count as 0.
///
/// `meter_id = None` considers every contract of the utility.
pub fn time_weighted_rate(
    providers: &[EnergyProvider],
    utility: Utility,
    meter_id: Option<&str>,
    window: &Window,
) -> f64 {
    let length = window.seconds();
    if length <= 0.0 {
        return 0.0;
    }

    let candidates: Vec<&EnergyProvider> = providers
        .iter()
        .filter(|p| match meter_id {
            Some(meter_id) => p.applies_to(utility, meter_id),
            None => p.utility == utility,
        })
        .collect();
    if candidates.is_empty() {
        return 0.0;
    }

    let mut cuts = vec![window.start, window.end];
    for p in &candidates {
        for t in [Some(p.valid_from), p.valid_to].into_iter().flatten() {
            if t > window.start && t < window.end {
                cuts.push(t);
            }
        }
    }
    cuts.sort();
    cuts.dedup();

    cuts.windows(2)
        .map(|seg| {
            let share = (seg[1] - seg[0]).num_seconds() as f64 / length;
            select_provider(&candidates, seg[0]).map_or(0.0, |p| share * p.price_per_unit)
        })
        .sum()
}

/// Contract in force at `at`: meter-specific beats generic, then the most
/// recently started one wins.
fn select_provider<'a>(candidates: &[&'a EnergyProvider], at: DateTime<Utc>) -> Option<&'a EnergyProvider> {
    candidates
        .iter()
        .copied()
        .filter(|p| p.is_valid_at(at))
        .max_by_key(|p| (p.meter_id.is_some(), p.valid_from))
}

fn basic_fees(providers: &[EnergyProvider], utility: Utility, window: &Window) -> f64 {
    providers
        .iter()
        .filter(|p| p.utility == utility)
        .map(|p| {
            let days = window.overlap_seconds(p.valid_from, p.valid_to) / SECONDS_PER_DAY;
            p.basic_fee * FEE_MONTHS_PER_DAY * days
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::models::ReadingType;

    const EPS: f64 = 1e-9;

    fn now() -> DateTime<Utc> {
        "2024-06-30T00:00:00Z".parse().unwrap()
    }

    fn reading(meter_id: &str, reading_type: ReadingType, value: f64, days_ago: i64) -> MeterReading {
        MeterReading {
            id: format!("{meter_id}-{days_ago}"),
            device_id: "d".into(),
            meter_id: meter_id.to_owned(),
            meter_name: meter_id.to_owned(),
            reading: value,
            timestamp: now() - Duration::days(days_ago),
            reading_type,
            unit: "kWh".into(),
            notes: None,
        }
    }

    fn provider(id: &str, utility: Utility, price: f64, fee: f64, from_days_ago: i64, to_days_ago: Option<i64>) -> EnergyProvider {
        EnergyProvider {
            id: id.to_owned(),
            name: id.to_owned(),
            utility,
            price_per_unit: price,
            basic_fee: fee,
            valid_from: now() - Duration::days(from_days_ago),
            valid_to: to_days_ago.map(|d| now() - Duration::days(d)),
            meter_id: None,
        }
    }

    #[test]
    fn empty_input_costs_nothing() {
        let costs = calculate_detailed_costs(&[], &[], Period::Monthly, &[], now());
        assert_eq!(costs.total, 0.0);
        assert!(costs.utilities().iter().all(|c| c.total == 0.0));
    }

    #[test]
    fn single_provider_prices_whole_window() {
        let readings = vec![
            reading("e", ReadingType::Electricity, 1000.0, 40),
            reading("e", ReadingType::Electricity, 1300.0, 1),
        ];
        let providers = vec![provider("p", Utility::Electricity, 0.30, 0.0, 400, None)];
        let costs = calculate_detailed_costs(&readings, &providers, Period::Monthly, &[], now());

        assert!((costs.electricity.consumption - 300.0).abs() < EPS);
        assert!((costs.electricity.energy_cost - 90.0).abs() < EPS);
        assert!((costs.total - 90.0).abs() < EPS);
    }

    #[test]
    fn provider_change_mid_window_splits_proportionally() {
        let readings = vec![
            reading("e", ReadingType::Electricity, 0.0, 40),
            reading("e", ReadingType::Electricity, 300.0, 1),
        ];
        // Old tariff for the first 15 days of the 30-day window, new one after.
        let providers = vec![
            provider("old", Utility::Electricity, 0.20, 0.0, 400, Some(15)),
            provider("new", Utility::Electricity, 0.40, 0.0, 15, None),
        ];
        let costs = calculate_detailed_costs(&readings, &providers, Period::Monthly, &[], now());

        // 150 kWh at 0.20 + 150 kWh at 0.40
        assert!((costs.electricity.energy_cost - 90.0).abs() < EPS);
    }

    #[test]
    fn uncovered_stretch_is_not_priced() {
        let readings = vec![
            reading("g", ReadingType::Gas, 0.0, 40),
            reading("g", ReadingType::Gas, 60.0, 1),
        ];
        let providers = vec![provider("p", Utility::Gas, 1.0, 0.0, 10, None)];
        let costs = calculate_detailed_costs(&readings, &providers, Period::Monthly, &[], now());
        assert!((costs.gas.energy_cost - 20.0).abs() < EPS);
    }

    #[test]
    fn meter_specific_provider_wins() {
        let readings = vec![
            reading("w1", ReadingType::Water, 0.0, 40),
            reading("w1", ReadingType::Water, 10.0, 1),
            reading("w2", ReadingType::Water, 0.0, 40),
            reading("w2", ReadingType::Water, 10.0, 1),
        ];
        let mut specific = provider("specific", Utility::Water, 5.0, 0.0, 400, None);
        specific.meter_id = Some("w1".into());
        let providers = vec![provider("generic", Utility::Water, 2.0, 0.0, 400, None), specific];

        let costs = calculate_detailed_costs(&readings, &providers, Period::Monthly, &[], now());
        assert!((costs.water.energy_cost - (50.0 + 20.0)).abs() < EPS);
    }

    #[test]
    fn basic_fee_is_pro_rated() {
        let providers = vec![provider("p", Utility::Electricity, 0.3, 36.5, 400, None)];
        let costs = calculate_detailed_costs(&[], &providers, Period::Monthly, &[], now());
        // 36.5 per month * 12 / 365 = 1.2 per day, 30 days
        assert!((costs.electricity.basic_fee - 36.0).abs() < EPS);
        assert!((costs.total - 36.0).abs() < EPS);
    }

    #[test]
    fn production_readings_are_never_billed() {
        let readings = vec![
            reading("s", ReadingType::Solar, 0.0, 40),
            reading("s", ReadingType::Solar, 500.0, 1),
        ];
        let providers = vec![provider("p", Utility::Electricity, 0.3, 0.0, 400, None)];
        let costs = calculate_detailed_costs(&readings, &providers, Period::Monthly, &[], now());
        assert_eq!(costs.total, 0.0);
    }

    #[test]
    fn rate_without_meter_uses_any_contract() {
        let mut p = provider("p", Utility::Electricity, 0.25, 0.0, 400, None);
        p.meter_id = Some("main".into());
        let window = Period::Weekly.window(now());
        assert!((time_weighted_rate(&[p], Utility::Electricity, None, &window) - 0.25).abs() < EPS);
    }
}
