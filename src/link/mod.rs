//! The message link to the vehicles.
//!
//! The dispatcher is the sole owner of a [`Link`]; everything else reaches the
//! transport through the dispatcher's request/reply channel.

use async_trait::async_trait;
use mavlink::common::MavMessage;
use mavlink::MavHeader;

mod udp;

pub use udp::UdpLink;

/// A bidirectional channel carrying discrete typed messages to and from one
/// or more remote peers. `recv` yields the sender header so callers can key
/// state by (system-id, component-id).
#[async_trait]
pub trait Link: Send {
    async fn recv(&mut self) -> anyhow::Result<(MavHeader, MavMessage)>;

    async fn send(&mut self, message: &MavMessage) -> anyhow::Result<()>;
}
