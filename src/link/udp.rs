use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::net::ToSocketAddrs;
use tracing::*;

use mavlink::common::MavMessage;
use mavlink::{MavHeader, MavlinkVersion};

use super::Link;

/// MAVLink over a UDP socket.
///
/// Binds locally, then locks to the address of the first peer that sends us a
/// packet (the vehicle or a router in front of it). Inbound datagrams are
/// accumulated in a reassembly buffer and scanned for the version magic.
pub struct UdpLink {
    sock: tokio::net::UdpSocket,
    seq_num: Option<u8>,
    buf: BytesMut,
    sequence: u8,
    version: MavlinkVersion,
}

impl UdpLink {
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        version: MavlinkVersion,
    ) -> anyhow::Result<Self> {
        let sock = tokio::net::UdpSocket::bind(addr)
            .await
            .context("failed to bind mavlink socket")?;

        debug!("waiting for first packet on the link");

        let (_, remote_addr) =
            tokio::time::timeout(Duration::from_secs(60), sock.recv_from(&mut []))
                .await
                .context("timed out while waiting for a packet on the link")?
                .context("error retrieving packet from the link")?;

        info!(
            "received packet from {:?}, locking to this address",
            remote_addr
        );

        sock.connect(remote_addr)
            .await
            .context("failed to lock to address")?;

        match version {
            MavlinkVersion::V1 => debug!("using mavlink v1"),
            MavlinkVersion::V2 => debug!("using mavlink v2"),
        };

        Ok(UdpLink {
            sock,
            seq_num: None,
            buf: BytesMut::with_capacity(1024),
            sequence: 0,
            version,
        })
    }
}

#[async_trait]
impl Link for UdpLink {
    async fn send(&mut self, message: &MavMessage) -> anyhow::Result<()> {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        trace!("sending message: {:?}", message);

        let header = MavHeader {
            sequence,
            system_id: 1,
            component_id: 1,
        };

        let mut buf = Vec::with_capacity(1024);

        mavlink::write_versioned_msg(&mut buf, self.version, header, message)?;
        self.sock.send(buf.as_ref()).await?;

        Ok(())
    }

    async fn recv(&mut self) -> anyhow::Result<(MavHeader, MavMessage)> {
        loop {
            let mut chunk = vec![0; 1024];

            let magic = match self.version {
                MavlinkVersion::V1 => 0xFE,
                MavlinkVersion::V2 => 0xFD,
            };

            let magic_position = loop {
                let magic_position = self.buf.iter().position(|&b| b == magic);

                match magic_position {
                    // we need at least two bytes after the magic in the buffer
                    Some(magic_position) if magic_position + 2 < self.buf.len() => {
                        break magic_position
                    }
                    _ => {
                        let (n, addr) = self.sock.recv_from(&mut chunk[..]).await?;
                        self.buf.extend(&chunk[..n]);
                        trace!("read {:?} bytes from {:?}", n, addr);
                    }
                };
            };

            let payload_len = self.buf[magic_position + 1];

            let seq_num = self.buf[magic_position + 4];

            if let Some(prev_seq_num) = &mut self.seq_num {
                let expected_seq_num = prev_seq_num.wrapping_add(1);

                if expected_seq_num != seq_num {
                    debug!("unexpected sequence number {seq_num} (wanted {expected_seq_num}), assuming packet loss");
                    self.buf.advance(magic_position + 1);
                    continue;
                } else {
                    *prev_seq_num = seq_num;
                }
            } else {
                self.seq_num = Some(seq_num);
            }

            let msg_body_size = match self.version {
                // in v1: 1 byte magic + 1 byte payload len + 4 byte header + 2 byte checksum
                MavlinkVersion::V1 => payload_len as usize + 8,
                // in v2: 1 byte magic + 1 byte payload len + 8 byte header + 2 byte checksum
                MavlinkVersion::V2 => payload_len as usize + 12,
            };

            while magic_position + msg_body_size > self.buf.len() {
                let mut chunk = vec![0; 1024];
                let (n, addr) = self.sock.recv_from(&mut chunk[..]).await?;
                self.buf.extend(&chunk[..n]);
                trace!("read {:?} bytes from {:?}", n, addr);
            }

            let msg_content = &self.buf[magic_position..magic_position + msg_body_size];

            let (header, msg) = match mavlink::read_versioned_msg(
                &mut mavlink::peek_reader::PeekReader::new(&msg_content[..]),
                self.version,
            )
            {
                Ok((header, msg)) => {
                    self.buf.advance(magic_position + msg_body_size);
                    (header, msg)
                }
                Err(err) => {
                    warn!(
                        "message parsing failure ({:?}); buffer contents: {:02x?}",
                        err, msg_content
                    );
                    return Err(err).context("error while parsing message");
                }
            };

            trace!("received message: {:?}", msg);

            return Ok((header, msg));
        }
    }
}
