//! UDP listener that turns magic packets into VM activations

use crate::activator::Activator;
use crate::control::VmControl;
use crate::error::Result;
use crate::packet::parse_magic_packet;
use crate::reload::TableSlot;
use crate::types::VmId;
use nix::sys::socket::{
    bind, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn,
};
use std::net::{SocketAddr, SocketAddrV4};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Conventional Wake-on-LAN port (discard)
pub const WOL_PORT: u16 = 9;

/// Large enough for any magic packet, with or without a password suffix
const RECV_BUF_LEN: usize = 1500;

/// Bind a broadcast-enabled UDP socket with `SO_REUSEADDR` set.
///
/// Must be called from within a tokio runtime.
pub fn bind_socket(addr: SocketAddrV4) -> Result<UdpSocket> {
    let fd = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(std::io::Error::from)?;

    setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(std::io::Error::from)?;
    setsockopt(&fd, sockopt::Broadcast, &true).map_err(std::io::Error::from)?;
    bind(fd.as_raw_fd(), &SockaddrIn::from(addr)).map_err(std::io::Error::from)?;

    let socket = UdpSocket::from_std(std::net::UdpSocket::from(fd))?;
    Ok(socket)
}

/// Receives magic packets and dispatches activations
pub struct Listener<C> {
    socket: UdpSocket,
    table: Arc<TableSlot>,
    activator: Arc<Activator<C>>,
}

impl<C: VmControl> Listener<C> {
    /// Create a listener on a bound socket
    pub fn new(socket: UdpSocket, table: Arc<TableSlot>, activator: Arc<Activator<C>>) -> Self {
        Self {
            socket,
            table,
            activator,
        }
    }

    /// Get the address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Validate one datagram and, if it targets a known VM, dispatch activation.
    ///
    /// Invalid packets and unknown MACs are dropped silently. The activation
    /// runs on its own task so the receive loop never waits on the control
    /// program. Returns the VM id dispatched, if any.
    pub fn handle_datagram(&self, buf: &[u8]) -> Option<VmId> {
        let mac = parse_magic_packet(buf)?;
        let id = self.table.load().lookup(&mac)?;

        debug!(mac = %mac, vm_id = %id, "Magic packet for local VM");
        tokio::spawn(Arc::clone(&self.activator).trigger(id));
        Some(id)
    }

    /// Receive datagrams for the life of the process.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "UDP socket listening");

        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, _from)) => {
                    self.handle_datagram(&buf[..len]);
                }
                Err(e) => warn!(error = %e, "UDP receive failed"),
            }
        }
    }
}
