//! Guest network bring-up: link layer via ioctl, address via DHCPv4.
//!
//! Under TSI the host stack intercepts the guest's socket API and nothing
//! here is meaningful; under gvisor the guest owns its own configuration:
//! bring `lo` and `eth0` up, run DHCP against the host's user-mode stack,
//! then install the lease (address, default route, resolver) through the
//! staged helper.

mod dhcp;

pub use dhcp::{DEFAULT_DHCP_ATTEMPTS, Lease};

use std::fs;
use std::net::Ipv4Addr;

use tokio_util::sync::CancellationToken;
use vmlite_shared::config::{VirtualNetworkMode, VmConfig};
use vmlite_shared::{VmliteError, VmliteResult};

use crate::helper;

const IFACE: &str = "eth0";
const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Configure the guest network for the given mode.
pub async fn configure(config: &VmConfig, cancel: &CancellationToken) -> VmliteResult<()> {
    if config.virtual_network_mode == VirtualNetworkMode::Tsi {
        tracing::info!("TSI network mode: host intercepts guest sockets, skipping setup");
        return Ok(());
    }

    link_up("lo")?;
    link_up(IFACE)?;

    let mac = hardware_address(IFACE)?;
    let lease = dhcp::acquire(IFACE, &mac, DEFAULT_DHCP_ATTEMPTS, cancel).await?;
    apply_lease(IFACE, &lease).await?;
    write_resolv_conf(&lease.dns);

    tracing::info!(
        addr = %lease.addr,
        prefix = lease.prefix,
        router = ?lease.router,
        "network configured"
    );
    Ok(())
}

/// Set IFF_UP on an interface, SIOCGIFFLAGS/SIOCSIFFLAGS on a throwaway
/// AF_INET socket. The same path libkrun's init takes; netlink would be
/// overkill for a single flag.
fn link_up(name: &str) -> VmliteResult<()> {
    #[repr(C)]
    struct IfReq {
        ifr_name: [libc::c_char; libc::IFNAMSIZ],
        ifr_flags: libc::c_short,
        _pad: [u8; 22],
    }

    if name.len() >= libc::IFNAMSIZ {
        return Err(VmliteError::Network(format!(
            "interface name {name:?} too long"
        )));
    }

    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if fd < 0 {
            return Err(VmliteError::Network(format!(
                "socket for ioctl: {}",
                std::io::Error::last_os_error()
            )));
        }

        let mut ifr: IfReq = std::mem::zeroed();
        for (i, byte) in name.bytes().enumerate() {
            ifr.ifr_name[i] = byte as libc::c_char;
        }

        if libc::ioctl(fd, libc::SIOCGIFFLAGS, &mut ifr) != 0 {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(VmliteError::Network(format!("query flags of {name}: {err}")));
        }

        ifr.ifr_flags |= libc::IFF_UP as libc::c_short;
        if libc::ioctl(fd, libc::SIOCSIFFLAGS, &ifr) != 0 {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(VmliteError::Network(format!("bring {name} up: {err}")));
        }

        libc::close(fd);
    }

    tracing::debug!(link = name, "link up");
    Ok(())
}

fn hardware_address(name: &str) -> VmliteResult<Vec<u8>> {
    let path = format!("/sys/class/net/{name}/address");
    let text = fs::read_to_string(&path)
        .map_err(|err| VmliteError::Network(format!("read {path}: {err}")))?;
    parse_mac(text.trim())
        .ok_or_else(|| VmliteError::Network(format!("{name}: bad hardware address {text:?}")))
}

fn parse_mac(text: &str) -> Option<Vec<u8>> {
    let bytes: Vec<u8> = text
        .split(':')
        .map(|part| u8::from_str_radix(part, 16).ok())
        .collect::<Option<_>>()?;
    (bytes.len() == 6).then_some(bytes)
}

/// Install the lease through the staged helper.
async fn apply_lease(iface: &str, lease: &Lease) -> VmliteResult<()> {
    let cidr = format!("{}/{}", lease.addr, lease.prefix);
    let output = helper::busybox("ip", &["addr", "add", &cidr, "dev", iface]).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VmliteError::Network(format!(
            "ip addr add {cidr} dev {iface}: {}",
            stderr.trim()
        )));
    }

    if let Some(router) = lease.router {
        let gateway = router.to_string();
        let output = helper::busybox(
            "ip",
            &["route", "add", "default", "via", &gateway, "dev", iface],
        )
        .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VmliteError::Network(format!(
                "ip route add default via {gateway}: {}",
                stderr.trim()
            )));
        }
    }

    Ok(())
}

/// Install the lease's nameservers. Best-effort: a guest without working DNS
/// is degraded, not dead.
fn write_resolv_conf(dns: &[Ipv4Addr]) {
    if dns.is_empty() {
        return;
    }

    let mut contents = String::new();
    for server in dns {
        contents.push_str(&format!("nameserver {server}\n"));
    }

    if let Err(err) = fs::write(RESOLV_CONF, contents) {
        tracing::warn!(error = %err, "failed to write {RESOLV_CONF}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_sysfs_hardware_address() {
        assert_eq!(
            parse_mac("52:54:00:12:34:56"),
            Some(vec![0x52, 0x54, 0x00, 0x12, 0x34, 0x56])
        );
    }

    #[test]
    fn rejects_malformed_hardware_addresses() {
        assert_eq!(parse_mac(""), None);
        assert_eq!(parse_mac("52:54:00:12:34"), None);
        assert_eq!(parse_mac("not:a:mac:ad:dr:es"), None);
        assert_eq!(parse_mac("52:54:00:12:34:56:78"), None);
    }
}
