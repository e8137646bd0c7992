use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of quantity a meter reports.
///
/// Serialised as snake_case so backups written by the mobile app load as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingType {
    Electricity,
    Gas,
    Water,
    Heat,
    Solar,
    GridFeedIn,
    SolarPvFeedIn,
}

impl ReadingType {
    pub const ALL: [ReadingType; 7] = [
        ReadingType::Electricity,
        ReadingType::Gas,
        ReadingType::Water,
        ReadingType::Heat,
        ReadingType::Solar,
        ReadingType::GridFeedIn,
        ReadingType::SolarPvFeedIn,
    ];

    /// Utility billed for this reading type, if any.
    ///
    /// Production and feed-in readings are never billed.
    pub fn utility(self) -> Option<Utility> {
        match self {
            ReadingType::Electricity => Some(Utility::Electricity),
            ReadingType::Gas => Some(Utility::Gas),
            ReadingType::Water => Some(Utility::Water),
            ReadingType::Heat => Some(Utility::Heat),
            ReadingType::Solar | ReadingType::GridFeedIn | ReadingType::SolarPvFeedIn => None,
        }
    }
}

impl fmt::Display for ReadingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadingType::Electricity => "electricity",
            ReadingType::Gas => "gas",
            ReadingType::Water => "water",
            ReadingType::Heat => "heat",
            ReadingType::Solar => "solar",
            ReadingType::GridFeedIn => "grid_feed_in",
            ReadingType::SolarPvFeedIn => "solar_pv_feed_in",
        };
        f.write_str(s)
    }
}

/// Billable utility a provider contract covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Utility {
    Electricity,
    Gas,
    Water,
    Heat,
}

impl fmt::Display for Utility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Utility::Electricity => "electricity",
            Utility::Gas => "gas",
            Utility::Water => "water",
            Utility::Heat => "heat",
        };
        f.write_str(s)
    }
}

/// A single timestamped meter value. Append-only; never edited once logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterReading {
    pub id: String,
    pub device_id: String,
    pub meter_id: String,
    pub meter_name: String,
    pub reading: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub reading_type: ReadingType,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// How repeated readings of one meter reduce to a period amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationType {
    /// Each reading is already a period amount.
    Sum,
    /// Readings are cumulative counter values.
    Difference,
}

impl fmt::Display for CalculationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CalculationType::Sum => "sum",
            CalculationType::Difference => "difference",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    SmartMeter,
    SolarPv,
    Battery,
    HeatPump,
    GasMeter,
    WaterMeter,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A physical or logical metering point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub status: DeviceStatus,
    pub last_update: Option<DateTime<Utc>>,
    /// Free-form vendor payload, carried through backups untouched.
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation_type: Option<CalculationType>,
}

impl Device {
    /// Effective reduction strategy: solar PV always sums, everything else
    /// honours the explicit override and falls back to `Difference`.
    pub fn calculation_type(&self) -> CalculationType {
        match self.device_type {
            DeviceType::SolarPv => CalculationType::Sum,
            _ => self.calculation_type.unwrap_or(CalculationType::Difference),
        }
    }
}

/// A tariff contract for one utility, optionally bound to a single meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyProvider {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub utility: Utility,
    /// Currency per unit (kWh or m³).
    pub price_per_unit: f64,
    /// Monthly fixed fee.
    #[serde(default)]
    pub basic_fee: f64,
    pub valid_from: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_id: Option<String>,
}

impl EnergyProvider {
    /// `true` when `at` falls inside `[valid_from, valid_to)`.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.valid_from && self.valid_to.map_or(true, |to| at < to)
    }

    /// Whether this contract prices readings from `meter_id` of `utility`.
    pub fn applies_to(&self, utility: Utility, meter_id: &str) -> bool {
        self.utility == utility && self.meter_id.as_deref().map_or(true, |m| m == meter_id)
    }
}

/// User-set targets; `0` leaves a goal unset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SustainabilityGoals {
    /// kg CO2 to save per month.
    pub monthly_co2_goal: f64,
    /// Maximum monthly grid electricity consumption in kWh.
    pub energy_saver_goal: f64,
    /// kWh to produce per month.
    pub solar_pioneer_goal: f64,
    /// Autarky percentage to reach.
    pub sustainability_champion_goal: f64,
}

pub const ENERGY_DATA_VERSION: u32 = 1;

/// Snapshot of the local application state, and the backup blob format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyData {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub readings: Vec<MeterReading>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub providers: Vec<EnergyProvider>,
    #[serde(default)]
    pub goals: SustainabilityGoals,
}

fn default_version() -> u32 {
    ENERGY_DATA_VERSION
}

impl Default for EnergyData {
    fn default() -> Self {
        Self {
            version: ENERGY_DATA_VERSION,
            exported_at: Utc::now(),
            readings: Vec::new(),
            devices: Vec::new(),
            providers: Vec::new(),
            goals: SustainabilityGoals::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(device_type: DeviceType, calculation_type: Option<CalculationType>) -> Device {
        Device {
            id: "dev1".into(),
            name: "Device".into(),
            device_type,
            status: DeviceStatus::Online,
            last_update: None,
            data: serde_json::Value::Null,
            calculation_type,
        }
    }

    #[test]
    fn solar_pv_always_sums() {
        let d = device(DeviceType::SolarPv, Some(CalculationType::Difference));
        assert_eq!(d.calculation_type(), CalculationType::Sum);
    }

    #[test]
    fn other_devices_default_to_difference() {
        assert_eq!(
            device(DeviceType::SmartMeter, None).calculation_type(),
            CalculationType::Difference
        );
        assert_eq!(
            device(DeviceType::GasMeter, Some(CalculationType::Sum)).calculation_type(),
            CalculationType::Sum
        );
    }

    #[test]
    fn reading_deserialises_from_app_json() {
        let json = r#"{
            "id": "r1",
            "deviceId": "dev1",
            "meterId": "m1",
            "meterName": "Main meter",
            "reading": 1234.5,
            "timestamp": "2024-03-01T08:00:00Z",
            "type": "solar_pv_feed_in",
            "unit": "kWh"
        }"#;
        let r: MeterReading = serde_json::from_str(json).unwrap();
        assert_eq!(r.reading_type, ReadingType::SolarPvFeedIn);
        assert_eq!(r.meter_id, "m1");
        assert!(r.notes.is_none());
    }

    #[test]
    fn unknown_device_type_maps_to_other() {
        let json = r#"{"id":"d","name":"n","type":"fridge","lastUpdate":null}"#;
        let d: Device = serde_json::from_str(json).unwrap();
        assert_eq!(d.device_type, DeviceType::Other);
        assert_eq!(d.status, DeviceStatus::Unknown);
    }

    #[test]
    fn provider_validity_is_half_open() {
        let from = "2024-01-01T00:00:00Z".parse().unwrap();
        let to = "2024-02-01T00:00:00Z".parse().unwrap();
        let p = EnergyProvider {
            id: "p".into(),
            name: String::new(),
            utility: Utility::Electricity,
            price_per_unit: 0.3,
            basic_fee: 10.0,
            valid_from: from,
            valid_to: Some(to),
            meter_id: None,
        };
        assert!(p.is_valid_at(from));
        assert!(!p.is_valid_at(to));
        assert!(p.applies_to(Utility::Electricity, "any"));
        assert!(!p.applies_to(Utility::Gas, "any"));
    }

    #[test]
    fn reading_type_display_matches_wire_tag() {
        for t in ReadingType::ALL {
            let wire = serde_json::to_string(&t).unwrap();
            assert_eq!(wire.trim_matches('"'), t.to_string());
        }
    }
}
