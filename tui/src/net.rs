//! A host network adapter that tunnels Ethernet frames over UDP.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

use anyhow::{Context, bail};
use log::{info, warn};

use pcxt_core::dev::pktdrv::NetAdapter;

/// One Ethernet frame per datagram, exchanged with a single peer.
pub struct UdpTunnel {
    socket: UdpSocket,
    peer: SocketAddr,
    mac: [u8; 6],
}
impl UdpTunnel {
    pub fn new(bind: SocketAddr, peer: SocketAddr, mac: [u8; 6]) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind)
            .context(format!("Couldn't bind tunnel socket to {bind}"))?;
        socket.set_nonblocking(true)?;
        info!(target: "NET", "UDP tunnel {} <-> {peer}", socket.local_addr()?);
        Ok(UdpTunnel { socket, peer, mac })
    }
}

impl NetAdapter for UdpTunnel {
    fn mac_address(&self) -> Option<[u8; 6]> {
        Some(self.mac)
    }

    // There is no physical link to lose.
    fn is_link_up(&mut self) -> bool {
        true
    }
    fn update_phy(&mut self) {}

    fn send_frame(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        let n = self.socket.send_to(frame, self.peer)?;
        if n != frame.len() {
            bail!("Short send to {} ({n} of {} bytes)", self.peer, frame.len());
        }
        Ok(())
    }

    fn receive_frame(&mut self, buf: &mut [u8]) -> Option<usize> {
        loop {
            match self.socket.recv_from(buf) {
                Ok((len, from)) if from == self.peer => return Some(len),
                Ok((_, from)) => warn!(target: "NET", "Dropped datagram from unknown host {from}"),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) => {
                    warn!(target: "NET", "recv_from() error {e:?}");
                    return None;
                },
            }
        }
    }
}

/// Parse a MAC address written as six colon-separated hex octets.
pub fn parse_mac(s: &str) -> anyhow::Result<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for octet in mac.iter_mut() {
        let part = parts.next().context(format!("MAC address '{s}' is too short"))?;
        *octet = u8::from_str_radix(part, 16)
            .context(format!("Bad octet '{part}' in MAC address '{s}'"))?;
    }
    if parts.next().is_some() {
        bail!("MAC address '{s}' is too long");
    }
    Ok(mac)
}
