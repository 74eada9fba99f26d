//! Kernel virtual tunnel interface management.
//!
//! One descriptor per Tunnel_Interface row. `apply` is idempotent via
//! delete-then-create: any existing interface of the name is removed
//! first (absence is not an error), then the interface is recreated if
//! enabled. Applied interfaces are torn down on row deletion with
//! log-only error handling.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{info, warn};
use vpnmgr_common::{shell, VpnError, VpnResult};
use vpnmgr_store::{FieldValues, FieldValuesExt, Store};

use crate::commands::{
    build_add_gre_cmd, build_add_vti_cmd, build_del_iface_cmd, build_route_tweaks_cmd,
    build_route_tweaks_v6_cmd,
};
use crate::tables::{iface_fields, TUNNEL_INTERFACE_TABLE};
use crate::types::{IfaceMode, TunnelIfaceType};

/// Reported interface status, written back to the config row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceStatus {
    Disabled,
    Enabled,
    Error,
}

impl IfaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IfaceStatus::Disabled => "disabled",
            IfaceStatus::Enabled => "enabled",
            IfaceStatus::Error => "error",
        }
    }
}

#[derive(Debug, Default)]
struct IfaceEntry {
    iftype: Option<TunnelIfaceType>,
    local: Option<IpAddr>,
    remote: Option<IpAddr>,
    /// Kernel mark/key; 0 means unset.
    key: u32,
    dev: Option<String>,
    enable: bool,
    /// Set after a successful create; teardown is only needed then.
    applied: bool,
}

/// Tunnel interface manager.
pub struct TunnelIfaceMgr {
    ifaces: HashMap<String, IfaceEntry>,
    store: Store,

    #[cfg(test)]
    mock_mode: bool,

    #[cfg(test)]
    captured_commands: Vec<String>,
}

impl TunnelIfaceMgr {
    pub fn new(store: Store) -> Self {
        Self {
            ifaces: HashMap::new(),
            store,
            #[cfg(test)]
            mock_mode: false,
            #[cfg(test)]
            captured_commands: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn new_mock() -> Self {
        let mut mgr = Self::new(Store::new());
        mgr.mock_mode = true;
        mgr
    }

    async fn exec(&mut self, cmd: &str) -> VpnResult<String> {
        #[cfg(test)]
        if self.mock_mode {
            self.captured_commands.push(cmd.to_string());
            return Ok(String::new());
        }

        shell::exec_or_throw(cmd).await
    }

    /// Updates the in-memory descriptor from a Tunnel_Interface row.
    /// No OS interaction happens until `apply`.
    pub fn set_from_fields(&mut self, ifname: &str, fvs: &FieldValues) -> VpnResult<()> {
        let iftype = match fvs.get_field(iface_fields::IF_TYPE) {
            Some(s) => Some(TunnelIfaceType::from_str_opt(s).ok_or_else(|| {
                VpnError::invalid_config(iface_fields::IF_TYPE, format!("unknown type '{}'", s))
            })?),
            None => None,
        };
        // Mode only selects the ip6tnl encapsulation; validated for
        // well-formedness since ip6tnl itself is rejected at apply.
        if let Some(s) = fvs.get_field(iface_fields::MODE) {
            IfaceMode::from_str_opt(s).ok_or_else(|| {
                VpnError::invalid_config(iface_fields::MODE, format!("unknown mode '{}'", s))
            })?;
        }
        let parse_addr = |field: &str| -> VpnResult<Option<IpAddr>> {
            match fvs.get_field(field).filter(|v| !v.is_empty()) {
                Some(v) => v
                    .parse()
                    .map(Some)
                    .map_err(|_| VpnError::invalid_config(field, format!("bad address '{}'", v))),
                None => Ok(None),
            }
        };
        let local = parse_addr(iface_fields::LOCAL_ENDPOINT_ADDR)?;
        let remote = parse_addr(iface_fields::REMOTE_ENDPOINT_ADDR)?;

        let entry = self.ifaces.entry(ifname.to_string()).or_default();
        entry.iftype = iftype;
        entry.local = local;
        entry.remote = remote;
        entry.key = fvs
            .get_field(iface_fields::KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        entry.dev = fvs
            .get_field(iface_fields::DEV_IF_NAME)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        entry.enable = fvs.get_field(iface_fields::ENABLE) == Some("true");
        Ok(())
    }

    /// Applies the descriptor to the OS and writes the resulting
    /// status back to the row.
    pub async fn apply(&mut self, ifname: &str) -> VpnResult<()> {
        let result = self.apply_inner(ifname).await;

        let status = match &result {
            Ok(()) => {
                let enabled = self.ifaces.get(ifname).map(|e| e.enable).unwrap_or(false);
                if enabled {
                    IfaceStatus::Enabled
                } else {
                    IfaceStatus::Disabled
                }
            }
            Err(_) => IfaceStatus::Error,
        };
        self.status_update(ifname, status);
        result
    }

    async fn apply_inner(&mut self, ifname: &str) -> VpnResult<()> {
        let entry = self
            .ifaces
            .get(ifname)
            .ok_or_else(|| VpnError::entry_not_found("interface", ifname))?;

        let Some(iftype) = entry.iftype else {
            return Err(VpnError::invalid_config(
                iface_fields::IF_TYPE,
                "cannot apply: if_type not set",
            ));
        };

        if iftype == TunnelIfaceType::Ip6Tnl {
            // ip6tnl interfaces are managed elsewhere on this platform.
            warn!(ifname = %ifname, "Ignoring request to create ip6tnl interface");
            return Err(VpnError::invalid_config(
                iface_fields::IF_TYPE,
                "ip6tnl interfaces not managed here",
            ));
        }

        let enable = entry.enable;
        let key = entry.key;
        let dev = entry.dev.clone();
        let (local, remote) = (entry.local, entry.remote);

        // Silently delete an old interface, if there is one.
        let del_cmd = build_del_iface_cmd(ifname);
        let _ = self.exec(&del_cmd).await;

        if !enable {
            info!(ifname = %ifname, "Tunnel interface not enabled");
            if let Some(entry) = self.ifaces.get_mut(ifname) {
                entry.applied = false;
            }
            return Ok(());
        }

        let (local, remote) = match (local, remote) {
            (Some(l), Some(r)) if l.is_ipv6() == iftype.requires_ipv6()
                && r.is_ipv6() == iftype.requires_ipv6() =>
            {
                (l, r)
            }
            _ => {
                return Err(VpnError::invalid_config(
                    iface_fields::LOCAL_ENDPOINT_ADDR,
                    format!(
                        "type={}: local or remote address not set or wrong family",
                        iftype.as_str()
                    ),
                ));
            }
        };

        let create_cmd = match iftype {
            TunnelIfaceType::Vti | TunnelIfaceType::Vti6 => build_add_vti_cmd(
                ifname,
                iftype.requires_ipv6(),
                &local.to_string(),
                &remote.to_string(),
                key,
            ),
            TunnelIfaceType::Gre
            | TunnelIfaceType::Gretap
            | TunnelIfaceType::Ip6Gre
            | TunnelIfaceType::Ip6Gretap => build_add_gre_cmd(
                ifname,
                iftype,
                &local.to_string(),
                &remote.to_string(),
                key,
                dev.as_deref(),
            ),
            TunnelIfaceType::Ip6Tnl => unreachable!("rejected above"),
        };
        self.exec(&create_cmd).await?;
        info!(ifname = %ifname, iftype = %iftype.as_str(), "Tunnel interface created");

        // Only route-based VTI tunnels need the policy/rp_filter tweaks.
        if matches!(iftype, TunnelIfaceType::Vti | TunnelIfaceType::Vti6) {
            let tweaks = if iftype.requires_ipv6() {
                build_route_tweaks_v6_cmd(ifname)
            } else {
                build_route_tweaks_cmd(ifname)
            };
            if self.exec(&tweaks).await.is_err() {
                warn!(ifname = %ifname, "Failed applying route-based sysctl tweaks");
            }
        }

        if let Some(entry) = self.ifaces.get_mut(ifname) {
            entry.applied = true;
        }
        Ok(())
    }

    /// Tears down an interface on row deletion. Deletion failures are
    /// logged, never retried.
    pub async fn delete(&mut self, ifname: &str) {
        let Some(entry) = self.ifaces.remove(ifname) else {
            return;
        };
        if !entry.applied {
            return;
        }
        let cmd = build_del_iface_cmd(ifname);
        if self.exec(&cmd).await.is_err() {
            warn!(ifname = %ifname, "Error deleting tunnel interface");
        }
    }

    fn status_update(&self, ifname: &str, status: IfaceStatus) {
        info!(ifname = %ifname, status = %status.as_str(), "Tunnel interface status");
        self.store.update_fields(
            TUNNEL_INTERFACE_TABLE,
            ifname,
            vec![(iface_fields::STATUS.to_string(), status.as_str().to_string())],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fvs(pairs: &[(&str, &str)]) -> FieldValues {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    fn vti_fields() -> FieldValues {
        fvs(&[
            ("if_type", "vti"),
            ("local_endpoint_addr", "10.0.0.1"),
            ("remote_endpoint_addr", "10.0.0.2"),
            ("key", "100"),
            ("enable", "true"),
        ])
    }

    #[tokio::test]
    async fn test_apply_delete_then_create() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        mgr.set_from_fields("Vpn_tun0", &vti_fields()).unwrap();
        mgr.apply("Vpn_tun0").await.unwrap();

        assert_eq!(mgr.captured_commands.len(), 3);
        assert!(mgr.captured_commands[0].contains("link del \"Vpn_tun0\""));
        assert!(mgr.captured_commands[1].contains("link add \"Vpn_tun0\" type vti"));
        assert!(mgr.captured_commands[1].contains("key 100"));
        assert!(mgr.captured_commands[2].contains("disable_policy=1"));
    }

    #[tokio::test]
    async fn test_apply_idempotent() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        mgr.set_from_fields("Vpn_tun0", &vti_fields()).unwrap();
        mgr.apply("Vpn_tun0").await.unwrap();
        let first: Vec<String> = mgr.captured_commands.drain(..).collect();

        mgr.apply("Vpn_tun0").await.unwrap();
        assert_eq!(first, mgr.captured_commands);
    }

    #[tokio::test]
    async fn test_apply_disabled_stops_after_delete() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        let mut fields = vti_fields();
        fields.retain(|(f, _)| f != "enable");
        mgr.set_from_fields("Vpn_tun0", &fields).unwrap();

        mgr.apply("Vpn_tun0").await.unwrap();
        assert_eq!(mgr.captured_commands.len(), 1);
        assert!(mgr.captured_commands[0].contains("link del"));
    }

    #[tokio::test]
    async fn test_apply_family_mismatch() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        mgr.set_from_fields(
            "Vpn_tun6",
            &fvs(&[
                ("if_type", "vti6"),
                ("local_endpoint_addr", "10.0.0.1"),
                ("remote_endpoint_addr", "10.0.0.2"),
                ("enable", "true"),
            ]),
        )
        .unwrap();

        assert!(mgr.apply("Vpn_tun6").await.is_err());
        // The delete step ran, the create step did not.
        assert_eq!(mgr.captured_commands.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_no_type_fails() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        mgr.set_from_fields(
            "Vpn_tun0",
            &fvs(&[("local_endpoint_addr", "10.0.0.1"), ("enable", "true")]),
        )
        .unwrap();
        assert!(mgr.apply("Vpn_tun0").await.is_err());
        assert!(mgr.captured_commands.is_empty());
    }

    #[tokio::test]
    async fn test_ip6tnl_rejected() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        mgr.set_from_fields(
            "tnl0",
            &fvs(&[
                ("if_type", "ip6tnl"),
                ("local_endpoint_addr", "2001:db8::1"),
                ("remote_endpoint_addr", "2001:db8::2"),
                ("enable", "true"),
            ]),
        )
        .unwrap();
        assert!(mgr.apply("tnl0").await.is_err());
        assert!(mgr.captured_commands.is_empty());
    }

    #[tokio::test]
    async fn test_vti6_create() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        mgr.set_from_fields(
            "Vpn_tun6",
            &fvs(&[
                ("if_type", "vti6"),
                ("local_endpoint_addr", "2001:db8::1"),
                ("remote_endpoint_addr", "2001:db8::2"),
                ("enable", "true"),
            ]),
        )
        .unwrap();
        mgr.apply("Vpn_tun6").await.unwrap();
        assert!(mgr.captured_commands[1].contains("type vti6"));
        assert!(!mgr.captured_commands[1].contains("key"));
        assert!(mgr.captured_commands[2].contains("net.ipv6.conf"));
    }

    #[tokio::test]
    async fn test_gre_with_dev() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        mgr.set_from_fields(
            "gre1",
            &fvs(&[
                ("if_type", "gre"),
                ("local_endpoint_addr", "10.0.0.1"),
                ("remote_endpoint_addr", "10.0.0.2"),
                ("dev_if_name", "eth0"),
                ("enable", "true"),
            ]),
        )
        .unwrap();
        mgr.apply("gre1").await.unwrap();
        assert!(mgr.captured_commands[1].contains("type gre"));
        assert!(mgr.captured_commands[1].contains("dev \"eth0\""));
    }

    #[tokio::test]
    async fn test_gre_skips_route_tweaks() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        mgr.set_from_fields(
            "gre1",
            &fvs(&[
                ("if_type", "gre"),
                ("local_endpoint_addr", "10.0.0.1"),
                ("remote_endpoint_addr", "10.0.0.2"),
                ("enable", "true"),
            ]),
        )
        .unwrap();
        mgr.apply("gre1").await.unwrap();

        // Delete then create, and no sysctl tweaks for non-VTI types.
        assert_eq!(mgr.captured_commands.len(), 2);
        assert!(!mgr
            .captured_commands
            .iter()
            .any(|c| c.contains("sysctl")));
    }

    #[tokio::test]
    async fn test_delete_only_when_applied() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        mgr.set_from_fields("Vpn_tun0", &vti_fields()).unwrap();

        // Never applied: no teardown command.
        mgr.delete("Vpn_tun0").await;
        assert!(mgr.captured_commands.is_empty());

        mgr.set_from_fields("Vpn_tun1", &vti_fields()).unwrap();
        mgr.apply("Vpn_tun1").await.unwrap();
        mgr.captured_commands.clear();

        mgr.delete("Vpn_tun1").await;
        assert_eq!(mgr.captured_commands.len(), 1);
        assert!(mgr.captured_commands[0].contains("link del \"Vpn_tun1\""));
    }

    #[tokio::test]
    async fn test_status_writeback() {
        let store = Store::new();
        let mut mgr = TunnelIfaceMgr::new(store.clone());
        mgr.mock_mode = true;
        mgr.set_from_fields("Vpn_tun0", &vti_fields()).unwrap();
        mgr.apply("Vpn_tun0").await.unwrap();

        let row = store.get(TUNNEL_INTERFACE_TABLE, "Vpn_tun0").unwrap();
        assert_eq!(row.get_field(iface_fields::STATUS), Some("enabled"));
    }

    #[test]
    fn test_set_from_fields_bad_values() {
        let mut mgr = TunnelIfaceMgr::new_mock();
        assert!(mgr
            .set_from_fields("x", &fvs(&[("if_type", "bogus")]))
            .is_err());
        assert!(mgr
            .set_from_fields("x", &fvs(&[("local_endpoint_addr", "not-an-ip")]))
            .is_err());
        assert!(mgr
            .set_from_fields("x", &fvs(&[("if_type", "gre"), ("mode", "bogus")]))
            .is_err());
    }
}
