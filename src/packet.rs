//! Wake-on-LAN magic packet encoding and validation

use crate::error::Result;
use crate::types::MacAddr;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

/// 6 bytes of 0xFF followed by the target MAC repeated 16 times
pub const MAGIC_PACKET_LEN: usize = 6 + 6 * 16;

const SYNC_STREAM: [u8; 6] = [0xFF; 6];

/// Build the magic packet that wakes `mac`.
pub fn magic_packet(mac: MacAddr) -> [u8; MAGIC_PACKET_LEN] {
    let mut pkt = [0u8; MAGIC_PACKET_LEN];
    pkt[..6].copy_from_slice(&SYNC_STREAM);
    let octets = mac.octets();
    for chunk in pkt[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&octets);
    }
    pkt
}

/// Decode the target MAC from a datagram, or `None` if it is not a magic packet.
///
/// Bytes past the 16th repetition (e.g. a SecureOn password) are ignored.
pub fn parse_magic_packet(buf: &[u8]) -> Option<MacAddr> {
    if buf.len() < MAGIC_PACKET_LEN || buf[..6] != SYNC_STREAM {
        return None;
    }

    let target: [u8; 6] = buf[6..12].try_into().ok()?;
    let repeated = buf[6..MAGIC_PACKET_LEN]
        .chunks_exact(6)
        .all(|chunk| chunk == target);

    repeated.then(|| MacAddr::new(target))
}

/// Broadcast a magic packet for `mac` to `target`.
pub fn send_magic_packet(mac: MacAddr, target: SocketAddrV4) -> Result<()> {
    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    sock.set_broadcast(true)?;
    sock.send_to(&magic_packet(mac), target)?;
    Ok(())
}
