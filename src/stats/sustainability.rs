use serde::{Deserialize, Serialize};

use super::EnergyStats;
use crate::db::models::SustainabilityGoals;

/// kg CO2 a mature tree absorbs per year.
pub const TREE_CO2_KG_PER_YEAR: f64 = 22.0;
/// kg CO2 an average passenger car emits per km.
pub const CAR_CO2_KG_PER_KM: f64 = 0.12;

/// Everyday equivalents of an amount of avoided CO2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SustainabilityMetrics {
    pub avoided_emissions: f64,
    pub trees: f64,
    pub km_driven: f64,
}

impl SustainabilityMetrics {
    pub fn from_co2(kg: f64) -> Self {
        let kg = kg.max(0.0);
        Self {
            avoided_emissions: kg,
            trees: kg / TREE_CO2_KG_PER_YEAR,
            km_driven: kg / CAR_CO2_KG_PER_KM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalKind {
    MonthlyCo2,
    EnergySaver,
    SolarPioneer,
    SustainabilityChampion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgress {
    pub kind: GoalKind,
    pub target: f64,
    pub current: f64,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    pub achieved: bool,
}

/// Compare the monthly statistics against every goal.
///
/// Unset goals (`<= 0`) report no progress.
pub fn evaluate_goals(goals: &SustainabilityGoals, monthly: &EnergyStats) -> Vec<GoalProgress> {
    vec![
        reach(GoalKind::MonthlyCo2, goals.monthly_co2_goal, monthly.co2_saved),
        ceiling(GoalKind::EnergySaver, goals.energy_saver_goal, monthly.consumption),
        reach(GoalKind::SolarPioneer, goals.solar_pioneer_goal, monthly.production),
        reach(GoalKind::SustainabilityChampion, goals.sustainability_champion_goal, monthly.autarky),
    ]
}

/// Goal met by reaching at least `target`.
fn reach(kind: GoalKind, target: f64, current: f64) -> GoalProgress {
    let progress = if target > 0.0 { current / target * 100.0 } else { 0.0 };
    finish(kind, target, current, progress)
}

/// Goal met by staying at or below `target`.
fn ceiling(kind: GoalKind, target: f64, current: f64) -> GoalProgress {
    let progress = if target <= 0.0 {
        0.0
    } else if current <= 0.0 {
        100.0
    } else {
        target / current * 100.0
    };
    finish(kind, target, current, progress)
}

fn finish(kind: GoalKind, target: f64, current: f64, progress: f64) -> GoalProgress {
    let progress = if progress.is_finite() { progress.clamp(0.0, 100.0) } else { 0.0 };
    GoalProgress {
        kind,
        target,
        current,
        progress,
        achieved: target > 0.0 && progress >= 100.0,
    }
}
