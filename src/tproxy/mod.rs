//! Listener for intercepted connections
//!
//! Accepts TCP connections and recovers where each client originally wanted
//! to go, so a door configured with `follow_redirect` can route there.
//!
//! # Modes
//!
//! | Mode | Socket | Original destination |
//! |------|--------|----------------------|
//! | `plain` | ordinary | none |
//! | `redirect` | ordinary | `SO_ORIGINAL_DST` / `IP6T_SO_ORIGINAL_DST` |
//! | `tproxy` | `IP_TRANSPARENT` | local address of the accepted socket |
//!
//! # Requirements
//!
//! TPROXY mode needs `CAP_NET_ADMIN` (or root) and a policy route that
//! delivers marked packets locally:
//!
//! ```bash
//! ip rule add fwmark 0x1 lookup 100
//! ip route add local 0.0.0.0/0 dev lo table 100
//!
//! iptables -t mangle -A PREROUTING -i wg-ingress -p tcp -j TPROXY \
//!     --on-ip 127.0.0.1 --on-port 7893 --tproxy-mark 0x1
//! ```
//!
//! Redirect mode only needs a NAT rule:
//!
//! ```bash
//! iptables -t nat -A PREROUTING -i wg-ingress -p tcp -j REDIRECT --to-ports 7893
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tproxy_door::config::ListenConfig;
//! use tproxy_door::tproxy::DoorListener;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = DoorListener::bind(&ListenConfig::default())?;
//!
//! loop {
//!     let conn = listener.accept().await?;
//!     println!("{} -> {:?}", conn.client_addr(), conn.original_dst());
//! }
//! # }
//! ```
//!
//! # Troubleshooting
//!
//! Setting `IP_TRANSPARENT` fails with `EPERM` without the capability:
//! ```bash
//! setcap cap_net_admin+ep ./tproxy-door
//! ```

mod connection;
mod listener;
mod socket;

pub use connection::AcceptedConnection;
pub use listener::DoorListener;
pub use socket::{
    create_listener_socket, get_original_dst, get_original_dst_v6, has_net_admin_capability,
    is_root, set_ip_transparent, IP6T_SO_ORIGINAL_DST, IPV6_TRANSPARENT, IP_TRANSPARENT,
    SO_ORIGINAL_DST,
};
