//! UDP socket creation with platform socket options.
//!
//! [`SocketConfig`] collects the options applied before binding; the socket
//! is built with [`socket2`] and handed to tokio.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Socket options applied to every transport socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Enable `SO_REUSEADDR` on server sockets. Default: true on Linux/macOS, false on Windows.
    pub reuse_addr: bool,
    /// Kernel receive buffer size in bytes, if overriding the OS default.
    pub recv_buffer_size: Option<usize>,
    /// Kernel send buffer size in bytes, if overriding the OS default.
    pub send_buffer_size: Option<usize>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reuse_addr: !cfg!(target_os = "windows"),
            recv_buffer_size: Some(1 << 20),
            send_buffer_size: Some(1 << 20),
        }
    }
}

/// Create, configure and bind a non-blocking UDP socket.
///
/// IPv6 addresses get a dual-stack socket. Must be called inside a tokio
/// runtime.
pub fn bind_udp(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    // Buffer sizes are hints; the kernel may clamp them.
    if let Some(size) = config.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// Wildcard IPv4 address for `port`.
pub fn ipv4_bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), port)
}
