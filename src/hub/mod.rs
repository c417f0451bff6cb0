//! Telemetry aggregation core: the dispatcher task, the vehicle registry and
//! the query interface handed to the HTTP surface.

use std::sync::Arc;

use anyhow::{bail, Context};
use mavlink::MavlinkVersion;
use serde::Serialize;

use crate::config::LinkConfig;
use crate::error::HubError;
use crate::geo::{self, Geodetic};
use crate::link::{Link, UdpLink};

pub mod dispatcher;
pub mod mission;
pub mod registry;

pub use dispatcher::DispatcherTask;
pub use mission::{MissionClient, MissionItem};
pub use registry::{StatusColour, VehicleKey, VehicleRegistry, VehicleState};

/// A vehicle state with its position replaced by the local NED offset from a
/// caller-supplied origin.
#[derive(Debug, Clone, Serialize)]
pub struct RelativeVehicleState {
    pub battery_voltage: f32,
    pub mode: String,
    /// North/east/down offset from the origin in meters.
    pub position: [f64; 3],
    pub velocity: [f32; 3],
    pub status_colour: StatusColour,
    pub last_seen: Option<i64>,
}

/// Cheap cloneable handle for querying the hub.
#[derive(Clone)]
pub struct HubHandle {
    registry: Arc<VehicleRegistry>,
    mission: MissionClient,
}

impl HubHandle {
    pub fn vehicles(&self) -> Vec<VehicleKey> {
        self.registry.keys()
    }

    pub fn vehicle(&self, key: VehicleKey) -> Result<VehicleState, HubError> {
        self.registry.get(key).ok_or(HubError::UnknownVehicle)
    }

    pub fn vehicle_relative(
        &self,
        key: VehicleKey,
        origin: Geodetic,
    ) -> Result<RelativeVehicleState, HubError> {
        let state = self.vehicle(key)?;

        let position = if state.position.iter().any(|c| c.is_nan()) {
            // no position report yet, the sentinel propagates
            [f64::NAN; 3]
        } else {
            let (n, e, d) = geo::geodetic_to_ned(
                Geodetic::new(
                    state.position[0] * 1e-7,
                    state.position[1] * 1e-7,
                    state.position[2] * 1e-3,
                ),
                origin,
            );
            [n, e, d]
        };

        Ok(RelativeVehicleState {
            battery_voltage: state.battery_voltage,
            mode: state.mode,
            position,
            velocity: state.velocity,
            status_colour: state.status_colour,
            last_seen: state.last_seen,
        })
    }

    /// Retrieves and converts the target's mission plan. Blocks until the
    /// download completes or a protocol step exhausts its retry budget.
    pub async fn mission_plan(
        &self,
        key: VehicleKey,
        origin: Geodetic,
    ) -> Result<Vec<MissionItem>, HubError> {
        self.mission.retrieve(key, origin).await
    }
}

/// Connects the link and wires up the dispatcher. Transport failures here are
/// fatal to the telemetry subsystem and surface immediately.
pub async fn create_tasks(config: LinkConfig) -> anyhow::Result<(DispatcherTask<UdpLink>, HubHandle)> {
    let version = match config.mavlink.as_str() {
        "V1" => MavlinkVersion::V1,
        "V2" => MavlinkVersion::V2,
        other => bail!("invalid mavlink version {other}"),
    };

    let link = UdpLink::connect(config.address, version)
        .await
        .context("link transport unavailable")?;

    Ok(with_link(link))
}

/// Wires a dispatcher and handle around an already-connected link.
pub fn with_link<L: Link>(link: L) -> (DispatcherTask<L>, HubHandle) {
    let (waiter_tx, waiter_rx) = flume::bounded(16);
    let registry = Arc::new(VehicleRegistry::default());

    let task = DispatcherTask::new(link, registry.clone(), waiter_rx);
    let handle = HubHandle {
        registry,
        mission: MissionClient::new(waiter_tx),
    };

    (task, handle)
}
