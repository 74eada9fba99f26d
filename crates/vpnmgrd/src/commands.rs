//! Shell command builders for tunnel interface, IPsec daemon, and
//! healthcheck operations.

use vpnmgr_common::shell;

use crate::types::TunnelIfaceType;

/// Each healthcheck ping sends this many ICMP echo requests.
pub const HEALTH_PING_COUNT: u32 = 1;

/// Time in seconds to wait for an ICMP echo reply.
pub const HEALTH_PING_WAIT: u32 = 1;

/// Build a VTI/VTI6 tunnel interface creation command.
///
/// A zero key means unset and is omitted.
pub fn build_add_vti_cmd(ifname: &str, ipv6: bool, local: &str, remote: &str, key: u32) -> String {
    let type_str = if ipv6 { "vti6" } else { "vti" };
    let mut cmd = format!(
        "{} link add {} type {} local {} remote {}",
        shell::IP_CMD,
        shell::shellquote(ifname),
        type_str,
        shell::shellquote(local),
        shell::shellquote(remote)
    );
    if key != 0 {
        cmd.push_str(&format!(" key {}", key));
    }
    cmd
}

/// Build a GRE-family tunnel interface creation command.
pub fn build_add_gre_cmd(
    ifname: &str,
    iftype: TunnelIfaceType,
    local: &str,
    remote: &str,
    key: u32,
    dev: Option<&str>,
) -> String {
    let mut cmd = format!(
        "{} link add {} type {} local {} remote {}",
        shell::IP_CMD,
        shell::shellquote(ifname),
        iftype.as_str(),
        shell::shellquote(local),
        shell::shellquote(remote)
    );
    if key != 0 {
        cmd.push_str(&format!(" key {}", key));
    }
    if let Some(dev) = dev {
        cmd.push_str(&format!(" dev {}", shell::shellquote(dev)));
    }
    cmd
}

/// Build a tunnel interface deletion command.
pub fn build_del_iface_cmd(ifname: &str) -> String {
    format!("{} link del {}", shell::IP_CMD, shell::shellquote(ifname))
}

/// Build the route-based sysctl tweaks for an IPv4 VTI interface.
pub fn build_route_tweaks_cmd(ifname: &str) -> String {
    format!(
        "{} -w net.ipv4.conf.{}.disable_policy=1; {} -w net.ipv4.conf.{}.rp_filter=2",
        shell::SYSCTL_CMD,
        ifname,
        shell::SYSCTL_CMD,
        ifname
    )
}

/// Build the route-based sysctl tweaks for an IPv6 tunnel interface.
pub fn build_route_tweaks_v6_cmd(ifname: &str) -> String {
    format!(
        "{} -w net.ipv6.conf.{}.disable_policy=1",
        shell::SYSCTL_CMD,
        ifname
    )
}

/// Build a healthcheck ping command.
///
/// Wrapped in an outer `timeout` slightly above the per-reply wait so
/// a wedged ping cannot outlive the healthcheck interval.
pub fn build_health_ping_cmd(target: &str, src: Option<&str>) -> String {
    let ping = if target.contains(':') {
        shell::PING6_CMD
    } else {
        shell::PING_CMD
    };
    let mut cmd = format!(
        "{} {} {} -c {} -W {} {}",
        shell::TIMEOUT_CMD,
        HEALTH_PING_WAIT + 3,
        ping,
        HEALTH_PING_COUNT,
        HEALTH_PING_WAIT,
        shell::shellquote(target)
    );
    if let Some(src) = src {
        cmd.push_str(&format!(" -I {}", shell::shellquote(src)));
    }
    cmd
}

/// Build the per-tunnel IPsec daemon status query command.
pub fn build_ipsec_status_cmd(tunnel_name: &str) -> String {
    format!(
        "{} status {} 2>/dev/null",
        shell::IPSEC_CMD,
        shell::shellquote(tunnel_name)
    )
}

/// Build the IPsec daemon reload command (re-reads config, does not
/// restart the process).
pub fn build_ipsec_reload_cmd() -> String {
    format!("{} reload", shell::IPSEC_CMD)
}
