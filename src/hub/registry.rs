use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Identifies one vehicle subsystem on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleKey {
    pub system_id: u8,
    pub component_id: u8,
}

impl VehicleKey {
    pub fn new(system_id: u8, component_id: u8) -> Self {
        Self {
            system_id,
            component_id,
        }
    }
}

impl fmt::Display for VehicleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.system_id, self.component_id)
    }
}

/// The status colour a vehicle reports through its scripting parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusColour {
    Unknown,
    #[serde(rename = "green")]
    Green,
    #[serde(rename = "amber")]
    Amber,
    #[serde(rename = "red")]
    Red,
    #[serde(rename = "amber_flash")]
    AmberFlash,
    #[serde(rename = "red_flash")]
    RedFlash,
}

impl StatusColour {
    /// The wire value is only defined on 1..=5; anything else is a
    /// reportable mapping failure.
    pub fn from_wire(value: i32) -> Result<Self, HubError> {
        match value {
            1 => Ok(StatusColour::Green),
            2 => Ok(StatusColour::Amber),
            3 => Ok(StatusColour::Red),
            4 => Ok(StatusColour::AmberFlash),
            5 => Ok(StatusColour::RedFlash),
            value => Err(HubError::MalformedParameterValue { value }),
        }
    }
}

/// Accumulated telemetry for one vehicle.
///
/// `position` keeps the raw wire encoding (latitude ×1e7, longitude ×1e7,
/// altitude in millimeters); conversion to degrees or a local frame happens
/// at query time.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleState {
    /// Volts; -1.0 until the first SYS_STATUS.
    pub battery_voltage: f32,
    /// Opaque mode code from the latest heartbeat; "Unknown" until then.
    pub mode: String,
    /// Raw fixed-point geodetic coordinates; NaN until the first position.
    pub position: [f64; 3],
    /// North/east/down velocity in m/s; NaN until the first position.
    pub velocity: [f32; 3],
    pub status_colour: StatusColour,
    /// Milliseconds since the epoch of the last classified message.
    pub last_seen: Option<i64>,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            battery_voltage: -1.0,
            mode: "Unknown".into(),
            position: [f64::NAN; 3],
            velocity: [f32::NAN; 3],
            status_colour: StatusColour::Unknown,
            last_seen: None,
        }
    }
}

/// Table of every vehicle seen on the link since process start.
///
/// The dispatcher is the only writer; query contexts take read locks for
/// point lookups. Entries are never removed.
#[derive(Default)]
pub struct VehicleRegistry {
    vehicles: RwLock<HashMap<VehicleKey, VehicleState>>,
}

impl VehicleRegistry {
    /// Get-or-create. Returns true if this key was not seen before, in which
    /// case the caller owes the vehicle its stream-rate configuration.
    pub fn ensure(&self, key: VehicleKey) -> bool {
        let mut vehicles = self.vehicles.write().unwrap();
        if vehicles.contains_key(&key) {
            false
        } else {
            vehicles.insert(key, VehicleState::default());
            true
        }
    }

    /// Applies a field update to an existing entry and stamps `last_seen`.
    pub fn apply<F: FnOnce(&mut VehicleState)>(&self, key: VehicleKey, f: F) {
        let mut vehicles = self.vehicles.write().unwrap();
        if let Some(vehicle) = vehicles.get_mut(&key) {
            f(vehicle);
            vehicle.last_seen = Some(Utc::now().timestamp_millis());
        }
    }

    pub fn keys(&self) -> Vec<VehicleKey> {
        self.vehicles.read().unwrap().keys().copied().collect()
    }

    pub fn get(&self, key: VehicleKey) -> Option<VehicleState> {
        self.vehicles.read().unwrap().get(&key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_carries_sentinels() {
        let state = VehicleState::default();
        assert_eq!(state.battery_voltage, -1.0);
        assert_eq!(state.mode, "Unknown");
        assert!(state.position.iter().all(|c| c.is_nan()));
        assert!(state.velocity.iter().all(|c| c.is_nan()));
        assert_eq!(state.status_colour, StatusColour::Unknown);
        assert_eq!(state.last_seen, None);
    }

    #[test]
    fn ensure_is_idempotent() {
        let registry = VehicleRegistry::default();
        let key = VehicleKey::new(1, 1);

        assert!(registry.ensure(key));
        assert!(!registry.ensure(key));
        assert!(!registry.ensure(key));
        assert_eq!(registry.keys(), vec![key]);
    }

    #[test]
    fn apply_updates_in_place_and_stamps_last_seen() {
        let registry = VehicleRegistry::default();
        let key = VehicleKey::new(2, 1);
        registry.ensure(key);

        registry.apply(key, |v| v.battery_voltage = 12.6);

        let state = registry.get(key).unwrap();
        assert_eq!(state.battery_voltage, 12.6);
        assert!(state.last_seen.is_some());
    }

    #[test]
    fn colour_table_is_total_on_defined_range() {
        assert_eq!(StatusColour::from_wire(1).unwrap(), StatusColour::Green);
        assert_eq!(StatusColour::from_wire(2).unwrap(), StatusColour::Amber);
        assert_eq!(StatusColour::from_wire(3).unwrap(), StatusColour::Red);
        assert_eq!(StatusColour::from_wire(4).unwrap(), StatusColour::AmberFlash);
        assert_eq!(StatusColour::from_wire(5).unwrap(), StatusColour::RedFlash);
    }

    #[test]
    fn colour_table_rejects_everything_else() {
        for value in [0, 6, -1, 42] {
            let err = StatusColour::from_wire(value).unwrap_err();
            assert!(matches!(
                err,
                crate::HubError::MalformedParameterValue { value: v } if v == value
            ));
        }
    }

    #[test]
    fn colours_serialize_with_wire_names() {
        let json = serde_json::to_string(&StatusColour::AmberFlash).unwrap();
        assert_eq!(json, "\"amber_flash\"");
        let json = serde_json::to_string(&StatusColour::Unknown).unwrap();
        assert_eq!(json, "\"Unknown\"");
    }
}
