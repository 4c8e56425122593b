//! Listener socket utilities
//!
//! Low-level socket operations for the door's listener:
//! - `IP_TRANSPARENT` / `IPV6_TRANSPARENT`: accept TPROXY-intercepted
//!   connections addressed to any IP
//! - `SO_ORIGINAL_DST` / `IP6T_SO_ORIGINAL_DST`: recover the destination of a
//!   connection redirected by an iptables `REDIRECT` rule

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::config::ListenMode;
use crate::error::TproxyError;

/// Linux kernel constant: `IP_TRANSPARENT` socket option (`SOL_IP` level)
pub const IP_TRANSPARENT: libc::c_int = 19;

/// Linux kernel constant: `IPV6_TRANSPARENT` socket option (`SOL_IPV6` level)
pub const IPV6_TRANSPARENT: libc::c_int = 75;

/// Linux kernel constant: `SO_ORIGINAL_DST` (`SOL_IP` level)
pub const SO_ORIGINAL_DST: libc::c_int = 80;

/// Linux kernel constant: `IP6T_SO_ORIGINAL_DST` (`SOL_IPV6` level)
pub const IP6T_SO_ORIGINAL_DST: libc::c_int = 80;

/// Create a non-blocking TCP listener socket for `addr`, not yet bound.
///
/// In [`ListenMode::Tproxy`] the socket gets `IP_TRANSPARENT` (or
/// `IPV6_TRANSPARENT`), which needs `CAP_NET_ADMIN`.
///
/// # Errors
///
/// Returns `TproxyError::SocketCreation` if socket creation fails,
/// `TproxyError::PermissionDenied` if the transparent option is refused and
/// `TproxyError::SocketOption` for other option failures.
pub fn create_listener_socket(
    addr: SocketAddr,
    mode: ListenMode,
    reuse_port: bool,
) -> Result<Socket, TproxyError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| TproxyError::SocketCreation(e.to_string()))?;

    if mode == ListenMode::Tproxy {
        set_ip_transparent(&socket, addr.is_ipv6())?;
    }

    // Quick restart
    socket
        .set_reuse_address(true)
        .map_err(|e| TproxyError::socket_option("SO_REUSEADDR", e.to_string()))?;

    if reuse_port {
        socket
            .set_reuse_port(true)
            .map_err(|e| TproxyError::socket_option("SO_REUSEPORT", e.to_string()))?;
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| TproxyError::socket_option("O_NONBLOCK", e.to_string()))?;

    debug!("Created {} listener socket for {}", mode, addr);
    Ok(socket)
}

/// Set `IP_TRANSPARENT` (or `IPV6_TRANSPARENT` when `ipv6`).
///
/// # Errors
///
/// Returns `TproxyError::PermissionDenied` on `EPERM`, otherwise
/// `TproxyError::SocketOption`.
pub fn set_ip_transparent(socket: &Socket, ipv6: bool) -> Result<(), TproxyError> {
    let (level, option, name) = if ipv6 {
        (libc::SOL_IPV6, IPV6_TRANSPARENT, "IPV6_TRANSPARENT")
    } else {
        (libc::SOL_IP, IP_TRANSPARENT, "IP_TRANSPARENT")
    };
    let one: libc::c_int = 1;

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            option,
            std::ptr::addr_of!(one).cast::<libc::c_void>(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            return Err(TproxyError::PermissionDenied);
        }
        return Err(TproxyError::socket_option(name, err.to_string()));
    }

    Ok(())
}

/// Get the pre-NAT destination of a redirected IPv4 TCP connection.
///
/// # Errors
///
/// Returns `TproxyError::OriginalDstError` if the socket carries no
/// redirect record (`ENOPROTOOPT`/`ENOENT`) or getsockopt fails.
pub fn get_original_dst(fd: RawFd) -> Result<SocketAddr, TproxyError> {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            std::ptr::addr_of_mut!(addr).cast::<libc::c_void>(),
            &mut len,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        if matches!(err.raw_os_error(), Some(libc::ENOPROTOOPT | libc::ENOENT)) {
            return Err(TproxyError::OriginalDstError(
                "SO_ORIGINAL_DST not available - connection was not redirected?".into(),
            ));
        }
        return Err(TproxyError::OriginalDstError(format!(
            "getsockopt SO_ORIGINAL_DST failed: {err}"
        )));
    }

    let port = u16::from_be(addr.sin_port);
    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));

    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

/// Get the pre-NAT destination of a redirected IPv6 TCP connection.
///
/// # Errors
///
/// Returns `TproxyError::OriginalDstError` if retrieval fails.
pub fn get_original_dst_v6(fd: RawFd) -> Result<SocketAddr, TproxyError> {
    let mut addr: libc::sockaddr_in6 = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;

    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_IPV6,
            IP6T_SO_ORIGINAL_DST,
            std::ptr::addr_of_mut!(addr).cast::<libc::c_void>(),
            &mut len,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        return Err(TproxyError::OriginalDstError(format!(
            "getsockopt IP6T_SO_ORIGINAL_DST failed: {err}"
        )));
    }

    let port = u16::from_be(addr.sin6_port);
    let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);

    Ok(SocketAddr::V6(SocketAddrV6::new(
        ip,
        port,
        addr.sin6_flowinfo,
        addr.sin6_scope_id,
    )))
}

/// Check if the current process has `CAP_NET_ADMIN` capability.
#[must_use]
pub fn has_net_admin_capability() -> bool {
    // Probe by setting IP_TRANSPARENT on a throwaway socket
    let Ok(socket) = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)) else {
        return true;
    };
    !matches!(
        set_ip_transparent(&socket, false),
        Err(TproxyError::PermissionDenied)
    )
}

/// Check if running as root (effective UID = 0).
#[must_use]
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
