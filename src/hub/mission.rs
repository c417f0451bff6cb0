use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::*;

use mavlink::common::{MavCmd, MavMessage, MISSION_REQUEST_INT_DATA, MISSION_REQUEST_LIST_DATA};
use mavlink::MavHeader;

use crate::error::HubError;
use crate::geo::{self, Geodetic};
use crate::hub::dispatcher::Waiter;
use crate::hub::registry::VehicleKey;

/// Retry budget for one request/response step of the mission protocol. The
/// request is re-sent on every attempt; exhausting the budget surfaces as
/// [`HubError::MissionRetrievalStalled`] instead of blocking forever.
const STEP_ATTEMPTS: usize = 5;
const STEP_TIMEOUT: Duration = Duration::from_secs(1);
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// One waypoint of a retrieved mission plan, as a local NED offset in meters
/// from the caller-supplied origin.
///
/// Non-waypoint items (loiter variants etc.) are skipped entirely; their
/// indices are not renumbered, so `index` always refers to the vehicle's own
/// mission sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionItem {
    pub index: u16,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Drives the item-by-item mission download through the dispatcher.
///
/// Each protocol step registers a filtered waiter with the dispatcher, which
/// sends the request and routes the matching response back. The dispatcher
/// keeps draining telemetry in the meantime.
#[derive(Clone)]
pub struct MissionClient {
    waiter_tx: flume::Sender<Waiter>,
}

impl MissionClient {
    pub(crate) fn new(waiter_tx: flume::Sender<Waiter>) -> Self {
        Self { waiter_tx }
    }

    /// Fetches the full mission plan of `target` and converts every
    /// navigate-to-waypoint item into a NED offset from `origin`.
    pub async fn retrieve(
        &self,
        target: VehicleKey,
        origin: Geodetic,
    ) -> Result<Vec<MissionItem>, HubError> {
        let system_id = target.system_id;

        let count = {
            let response = self
                .exchange(
                    MavMessage::MISSION_REQUEST_LIST(MISSION_REQUEST_LIST_DATA {
                        target_system: target.system_id,
                        target_component: target.component_id,
                    }),
                    move |header: &MavHeader, message: &MavMessage| {
                        header.system_id == system_id
                            && matches!(message, MavMessage::MISSION_COUNT(_))
                    },
                )
                .await?;

            match response {
                MavMessage::MISSION_COUNT(data) => data.count,
                _ => unreachable!(),
            }
        };

        debug!(vehicle = %target, count, "mission count received");

        let mut plan = Vec::new();

        for seq in 0..count {
            let response = self
                .exchange(
                    MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
                        target_system: target.system_id,
                        target_component: target.component_id,
                        seq,
                    }),
                    move |header: &MavHeader, message: &MavMessage| {
                        header.system_id == system_id
                            && matches!(message, MavMessage::MISSION_ITEM_INT(data) if data.seq == seq)
                    },
                )
                .await?;

            let item = match response {
                MavMessage::MISSION_ITEM_INT(data) => data,
                _ => unreachable!(),
            };

            // TODO: handle loiter commands and altitude frame variants
            if item.command != MavCmd::MAV_CMD_NAV_WAYPOINT {
                debug!(vehicle = %target, seq, command = ?item.command, "skipping non-waypoint item");
                continue;
            }

            // item x/y are fixed-point degrees at 1e7 scale, z is meters
            let (x, y, z) = geo::geodetic_to_ned(
                Geodetic::new(item.x as f64 * 1e-7, item.y as f64 * 1e-7, item.z as f64),
                origin,
            );

            plan.push(MissionItem { index: seq, x, y, z });
        }

        Ok(plan)
    }

    /// Sends one request through the dispatcher and waits for the matching
    /// response, retrying with exponential backoff up to the step budget.
    async fn exchange<F>(&self, request: MavMessage, filter: F) -> Result<MavMessage, HubError>
    where
        F: Fn(&MavHeader, &MavMessage) -> bool + Send + Sync + Clone + 'static,
    {
        let mut backoff = BACKOFF_BASE;

        for attempt in 0..STEP_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let (reply_tx, reply_rx) = oneshot::channel();
            let waiter = Waiter {
                request: request.clone(),
                filter: Box::new(filter.clone()),
                reply: reply_tx,
            };

            if self.waiter_tx.send_async(waiter).await.is_err() {
                // dispatcher is gone, so is the link
                return Err(HubError::TransportUnavailable);
            }

            match tokio::time::timeout(STEP_TIMEOUT, reply_rx).await {
                Ok(Ok(message)) => return Ok(message),
                Ok(Err(_)) => return Err(HubError::TransportUnavailable),
                Err(_) => {
                    warn!(attempt = attempt + 1, "mission request timed out, retrying");
                }
            }
        }

        Err(HubError::MissionRetrievalStalled)
    }
}
