use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::select;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::*;

use mavlink::common::{
    MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavState, MavType, COMMAND_LONG_DATA,
    HEARTBEAT_DATA,
};
use mavlink::MavHeader;

use crate::hub::registry::{StatusColour, VehicleKey, VehicleRegistry};
use crate::link::Link;
use crate::task::Task;

/// How often we owe the link a keepalive heartbeat.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on one receive attempt, so the keepalive obligation is checked
/// even when the link goes quiet.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// The parameter vehicles use to report their status colour.
const STATUS_COLOUR_PARAM: &str = "SCR_USER1";

const SYS_STATUS_MSG_ID: u32 = 1;
const GLOBAL_POSITION_INT_MSG_ID: u32 = 33;

/// A synchronous caller waiting for a filtered response on the shared link.
///
/// The dispatcher sends `request`, then routes the first inbound message the
/// filter accepts into `reply`. Everything else still flows to telemetry
/// classification, so a pending mission exchange never starves aggregation.
pub struct Waiter {
    pub(crate) request: MavMessage,
    pub(crate) filter: Box<dyn Fn(&MavHeader, &MavMessage) -> bool + Send>,
    pub(crate) reply: oneshot::Sender<MavMessage>,
}

/// The single long-lived control loop owning the link.
pub struct DispatcherTask<L> {
    link: L,
    registry: Arc<VehicleRegistry>,
    waiter_rx: flume::Receiver<Waiter>,
}

impl<L: Link> DispatcherTask<L> {
    pub(crate) fn new(
        link: L,
        registry: Arc<VehicleRegistry>,
        waiter_rx: flume::Receiver<Waiter>,
    ) -> Self {
        Self {
            link,
            registry,
            waiter_rx,
        }
    }
}

#[async_trait]
impl<L: Link + 'static> Task for DispatcherTask<L> {
    fn name(&self) -> &'static str {
        "hub/dispatcher"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let Self {
            mut link,
            registry,
            waiter_rx,
        } = *self;

        let loop_fut = async move {
            let mut waiters: Vec<Waiter> = Vec::new();
            let mut last_keepalive: Option<Instant> = None;

            loop {
                // the keepalive obligation comes first in every iteration so a
                // message flood cannot push it past its deadline
                let due = last_keepalive.map_or(true, |at| at.elapsed() >= KEEPALIVE_INTERVAL);
                if due {
                    link.send(&keepalive())
                        .await
                        .context("failed to send keepalive")?;
                    last_keepalive = Some(Instant::now());
                }

                while let Ok(waiter) = waiter_rx.try_recv() {
                    link.send(&waiter.request)
                        .await
                        .context("failed to send request for waiter")?;
                    waiters.push(waiter);
                }

                let (header, message) = match tokio::time::timeout(RECV_TIMEOUT, link.recv()).await
                {
                    Ok(result) => result?,
                    Err(_) => continue,
                };

                // drop waiters whose caller gave up (retry timeout elapsed)
                waiters.retain(|w| !w.reply.is_closed());

                if let Some(position) = waiters
                    .iter()
                    .position(|w| (w.filter)(&header, &message))
                {
                    let waiter = waiters.swap_remove(position);
                    let _ = waiter.reply.send(message);
                    continue;
                }

                classify(&mut link, &registry, header, message).await?;
            }

            #[allow(unreachable_code)]
            Ok::<_, anyhow::Error>(())
        };

        select! {
          _ = cancel.cancelled() => {}
          res = loop_fut => { res? }
        }

        Ok(())
    }
}

async fn classify<L: Link>(
    link: &mut L,
    registry: &VehicleRegistry,
    header: MavHeader,
    message: MavMessage,
) -> anyhow::Result<()> {
    let key = VehicleKey::new(header.system_id, header.component_id);

    match message {
        MavMessage::HEARTBEAT(data) => {
            // ground stations announce themselves on the same link; they are
            // peers, not vehicles, and must never enter the registry
            if data.mavtype == MavType::MAV_TYPE_GCS {
                return Ok(());
            }

            ensure_vehicle(link, registry, key).await?;
            registry.apply(key, |v| v.mode = data.base_mode.bits().to_string());
        }
        MavMessage::SYS_STATUS(data) => {
            ensure_vehicle(link, registry, key).await?;
            // wire unit is millivolts
            registry.apply(key, |v| v.battery_voltage = data.voltage_battery as f32 / 1000.0);
        }
        MavMessage::GLOBAL_POSITION_INT(data) => {
            ensure_vehicle(link, registry, key).await?;
            registry.apply(key, |v| {
                v.position = [data.lat as f64, data.lon as f64, data.alt as f64];
                // wire unit is cm/s
                v.velocity = [
                    data.vx as f32 / 100.0,
                    data.vy as f32 / 100.0,
                    data.vz as f32 / 100.0,
                ];
            });
        }
        MavMessage::PARAM_VALUE(data) => {
            ensure_vehicle(link, registry, key).await?;

            if param_name(&data.param_id) != STATUS_COLOUR_PARAM {
                return Ok(());
            }

            match StatusColour::from_wire(data.param_value as i32) {
                Ok(colour) => registry.apply(key, |v| v.status_colour = colour),
                // one bad report must not stop aggregation for everyone else
                Err(err) => error!(vehicle = %key, %err, "ignoring status colour report"),
            }
        }
        _ => {}
    }

    Ok(())
}

/// Resolves the vehicle entry for a classified message; on first sighting,
/// asks the vehicle to stream status at 1 Hz and position at 2 Hz. The
/// requests are fire-and-forget, no acknowledgment is awaited.
async fn ensure_vehicle<L: Link>(
    link: &mut L,
    registry: &VehicleRegistry,
    key: VehicleKey,
) -> anyhow::Result<()> {
    if !registry.ensure(key) {
        return Ok(());
    }

    info!(vehicle = %key, "new vehicle on the link, requesting telemetry streams");

    link.send(&message_interval_request(key, SYS_STATUS_MSG_ID, 1_000_000.0))
        .await
        .context("failed to request status stream")?;
    link.send(&message_interval_request(
        key,
        GLOBAL_POSITION_INT_MSG_ID,
        500_000.0,
    ))
    .await
    .context("failed to request position stream")?;

    Ok(())
}

fn keepalive() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_UNINIT,
        mavlink_version: 0,
    })
}

fn message_interval_request(key: VehicleKey, message_id: u32, interval_us: f32) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        param1: message_id as f32,
        param2: interval_us,
        param3: 0.0,
        param4: 0.0,
        param5: 0.0,
        param6: 0.0,
        param7: 0.0,
        command: MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
        target_system: key.system_id,
        target_component: key.component_id,
        confirmation: 0,
    })
}

fn param_name(param_id: &[u8; 16]) -> String {
    param_id
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_name_strips_nul_padding() {
        let mut id = [0u8; 16];
        id[..9].copy_from_slice(b"SCR_USER1");
        assert_eq!(param_name(&id), "SCR_USER1");
    }

    #[test]
    fn keepalive_identifies_as_onboard_controller() {
        match keepalive() {
            MavMessage::HEARTBEAT(data) => {
                assert_eq!(data.mavtype, MavType::MAV_TYPE_ONBOARD_CONTROLLER);
                assert_eq!(data.autopilot, MavAutopilot::MAV_AUTOPILOT_INVALID);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn interval_request_targets_the_vehicle() {
        let key = VehicleKey::new(7, 3);
        match message_interval_request(key, SYS_STATUS_MSG_ID, 1_000_000.0) {
            MavMessage::COMMAND_LONG(data) => {
                assert_eq!(data.command, MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL);
                assert_eq!(data.target_system, 7);
                assert_eq!(data.target_component, 3);
                assert_eq!(data.param1, 1.0);
                assert_eq!(data.param2, 1_000_000.0);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
