//! IPsec tunnel reconciler.
//!
//! Bridges IPSec_Config rows to the daemon controller: parses config
//! rows, resolves the remote endpoint, filters cipher suites down to
//! the supported set, and pushes the result into the controller. Also
//! maintains the IPSec_State row for each tunnel, combining a config
//! echo with the observed selectors and virtual IPs.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};
use vpnmgr_common::VpnResult;
use vpnmgr_store::{FieldValues, RowUpdate, Store};

use crate::ciphers;
use crate::registry::{TunnelRegistry, VpnReconciler};
use crate::resolver::{self, AddrFamily};
use crate::strongswan::{StrongSwan, SwanPaths};
use crate::tables::{ipsec_fields, IPSEC_STATE_TABLE};
use crate::types::{IpNet, IpsecConfig, IpsecStatus};

/// VPN type name this reconciler registers under.
const VPN_TYPE_IPSEC: &str = "ipsec";

/// State-row sentinel for an unresolved remote endpoint.
const UNRESOLVED_ENDPOINT: &str = "0.0.0.0";

struct ResolvedEndpoint {
    /// The endpoint string the cached address was resolved from.
    endpoint: String,
    addr: Option<IpAddr>,
}

pub struct IpsecMgr {
    swan: StrongSwan,
    store: Store,
    /// DNS results cached per tunnel; re-resolved only when the
    /// configured endpoint string changes.
    resolved: HashMap<String, ResolvedEndpoint>,
}

impl IpsecMgr {
    pub fn new(store: Store, paths: SwanPaths) -> Self {
        Self {
            swan: StrongSwan::new(paths),
            store,
            resolved: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn new_mock(store: Store, paths: SwanPaths) -> Self {
        Self {
            swan: StrongSwan::new_mock(paths),
            store,
            resolved: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn swan_mut(&mut self) -> &mut StrongSwan {
        &mut self.swan
    }

    /// The next instant the daemon controller has timer work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.swan.next_deadline()
    }

    /// Drives the controller's timers and dispatches any resulting
    /// status changes.
    pub async fn handle_deadlines(&mut self, now: Instant, registry: &mut TunnelRegistry) {
        let changed = self.swan.handle_deadlines(now).await;
        for status in changed {
            self.on_daemon_status(&status, registry);
        }
    }

    /// Handles one IPSec_Config row update.
    pub async fn on_config_row(
        &mut self,
        update: &RowUpdate,
        registry: &mut TunnelRegistry,
        now: Instant,
    ) -> VpnResult<()> {
        if update.op.is_del() {
            return self.on_config_deleted(&update.key, registry, now);
        }
        let config = IpsecConfig::from_fields(&update.key, &update.new)?;
        self.apply_config(&config, registry, now).await
    }

    async fn apply_config(
        &mut self,
        config: &IpsecConfig,
        registry: &mut TunnelRegistry,
        now: Instant,
    ) -> VpnResult<()> {
        let name = &config.tunnel_name;
        debug!(tunnel = %name, "Applying IPsec tunnel config");

        // The config row may arrive before the VPN_Tunnel row; the
        // registry creates a placeholder entry in that case.
        registry.register_reconciler(name, VPN_TYPE_IPSEC);

        let remote_addr = self
            .resolve_remote(name, config.remote_endpoint.as_deref())
            .await;

        let enable = registry.is_enabled(name);
        let tunnel = self.swan.tunnel_entry(name);
        tunnel.enable = enable;
        tunnel.left = config.local_endpoint.clone();
        tunnel.right = remote_addr.map(|a| a.to_string());
        tunnel.leftid = config.local_endpoint_id.clone();
        tunnel.rightid = config.remote_endpoint_id.clone();
        tunnel.leftsubnet = config.local_subnets.clone();
        tunnel.rightsubnet = config.remote_subnets.clone();
        tunnel.leftsourceip = config.local_virt_ip.clone();
        tunnel.rightsourceip = config.remote_virt_ip.clone();
        tunnel.leftauth = config.local_auth_mode;
        tunnel.rightauth = config.remote_auth_mode;
        tunnel.leftauth2 = config.local_auth_mode2;
        tunnel.rightauth2 = config.remote_auth_mode2;
        tunnel.psk = config.psk.clone();
        tunnel.xauth_user = config.xauth_user.clone();
        tunnel.xauth_pass = config.xauth_pass.clone();
        tunnel.eap_identity = config.eap_identity.clone();
        tunnel.eap_id = config.eap_id.clone();
        tunnel.eap_secret = config.eap_secret.clone();
        tunnel.neg_mode = config.nego_mode;
        tunnel.key_exchange = config.key_exchange;
        tunnel.ike_lifetime = config.ike_lifetime;
        tunnel.lifetime = config.lifetime;
        tunnel.ike_enc = filtered(&config.ike_enc, ciphers::filter_enc);
        tunnel.ike_integ = filtered(&config.ike_integ, ciphers::filter_integ);
        tunnel.ike_dh = filtered(&config.ike_dh, ciphers::filter_dh);
        tunnel.esp_enc = filtered(&config.esp_enc, ciphers::filter_enc);
        tunnel.esp_integ = filtered(&config.esp_integ, ciphers::filter_integ);
        tunnel.esp_dh = filtered(&config.esp_dh, ciphers::filter_dh);
        tunnel.dpd_delay = config.dpd_delay;
        tunnel.dpd_timeout = config.dpd_timeout;
        tunnel.dpd_action = config.dpd_action;
        tunnel.mark = config.mark;

        self.store.upsert(
            IPSEC_STATE_TABLE,
            name,
            config_state_fields(config, remote_addr),
        );

        self.swan.apply_all(now)
    }

    fn on_config_deleted(
        &mut self,
        name: &str,
        registry: &mut TunnelRegistry,
        now: Instant,
    ) -> VpnResult<()> {
        debug!(tunnel = %name, "IPsec tunnel config deleted");
        self.store.delete(IPSEC_STATE_TABLE, name);
        self.resolved.remove(name);
        self.swan.remove_tunnel(name, now)?;
        registry.deregister_reconciler(name);
        Ok(())
    }

    /// Pushes an observed status change into the registry and the
    /// state row.
    pub fn on_daemon_status(&self, status: &IpsecStatus, registry: &TunnelRegistry) {
        registry.report_status(&status.tunnel_name, status.conn_state);
        self.store.update_fields(
            IPSEC_STATE_TABLE,
            &status.tunnel_name,
            vec![
                (
                    ipsec_fields::LOCAL_SUBNETS.to_string(),
                    format_subnets(&status.local_ts),
                ),
                (
                    ipsec_fields::REMOTE_SUBNETS.to_string(),
                    format_subnets(&status.remote_ts),
                ),
                (
                    ipsec_fields::LOCAL_VIRT_IP.to_string(),
                    format_subnets(&status.local_virt_ip),
                ),
            ],
        );
    }

    async fn resolve_remote(&mut self, name: &str, endpoint: Option<&str>) -> Option<IpAddr> {
        let Some(endpoint) = endpoint else {
            self.resolved.remove(name);
            return None;
        };

        if let Some(cached) = self.resolved.get(name) {
            if cached.endpoint == endpoint {
                return cached.addr;
            }
        }

        // IPsec peers are addressed over IPv4 only for now.
        let addr = match resolver::resolve(endpoint, AddrFamily::V4).await {
            Ok(addr) => {
                debug!(tunnel = %name, endpoint = %endpoint, addr = %addr, "Remote endpoint resolved");
                Some(addr)
            }
            Err(e) => {
                warn!(tunnel = %name, endpoint = %endpoint, error = %e, "Error resolving remote endpoint");
                None
            }
        };
        self.resolved.insert(
            name.to_string(),
            ResolvedEndpoint {
                endpoint: endpoint.to_string(),
                addr,
            },
        );
        addr
    }
}

#[async_trait]
impl VpnReconciler for IpsecMgr {
    async fn on_tunnel_config_changed(
        &mut self,
        name: &str,
        registry: &mut TunnelRegistry,
    ) -> VpnResult<()> {
        if !self.swan.has_tunnel(name) {
            debug!(tunnel = %name, "No IPsec config for tunnel yet");
            return Ok(());
        }
        let enable = registry.is_enabled(name);
        debug!(tunnel = %name, enable = enable, "Tunnel enable state changed");
        self.swan.tunnel_entry(name).enable = enable;
        self.swan.apply_all(Instant::now())
    }
}

/// Unconfigured cipher lists stay empty so no proposal line is
/// rendered and the daemon falls back to its own defaults.
fn filtered<T: Copy>(configured: &[T], filter: fn(&[T]) -> Vec<T>) -> Vec<T> {
    if configured.is_empty() {
        Vec::new()
    } else {
        filter(configured)
    }
}

fn format_subnets(subnets: &[IpNet]) -> String {
    subnets
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds the config-echo portion of the IPSec_State row. The resolved
/// remote endpoint is reported instead of the configured FQDN.
fn config_state_fields(config: &IpsecConfig, remote_addr: Option<IpAddr>) -> FieldValues {
    let mut fvs: FieldValues = Vec::new();
    let mut set = |field: &str, value: String| {
        fvs.push((field.to_string(), value));
    };

    set(
        ipsec_fields::REMOTE_ENDPOINT,
        remote_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| UNRESOLVED_ENDPOINT.to_string()),
    );
    if let Some(v) = &config.local_endpoint_id {
        set(ipsec_fields::LOCAL_ENDPOINT_ID, v.clone());
    }
    if let Some(v) = &config.remote_endpoint_id {
        set(ipsec_fields::REMOTE_ENDPOINT_ID, v.clone());
    }
    if let Some(v) = config.local_auth_mode {
        set(ipsec_fields::LOCAL_AUTH_MODE, v.as_str().to_string());
    }
    if let Some(v) = config.remote_auth_mode {
        set(ipsec_fields::REMOTE_AUTH_MODE, v.as_str().to_string());
    }
    if let Some(v) = config.local_auth_mode2 {
        set(ipsec_fields::LOCAL_AUTH_MODE2, v.as_str().to_string());
    }
    if let Some(v) = config.remote_auth_mode2 {
        set(ipsec_fields::REMOTE_AUTH_MODE2, v.as_str().to_string());
    }
    if let Some(v) = &config.psk {
        set(ipsec_fields::PSK, v.clone());
    }
    if let Some(v) = &config.xauth_user {
        set(ipsec_fields::XAUTH_USER, v.clone());
    }
    if let Some(v) = &config.xauth_pass {
        set(ipsec_fields::XAUTH_PASS, v.clone());
    }
    if let Some(v) = &config.eap_identity {
        set(ipsec_fields::EAP_IDENTITY, v.clone());
    }
    if let Some(v) = &config.eap_id {
        set(ipsec_fields::EAP_ID, v.clone());
    }
    if let Some(v) = &config.eap_secret {
        set(ipsec_fields::EAP_SECRET, v.clone());
    }
    set(
        ipsec_fields::NEGO_MODE,
        config.nego_mode.as_str().to_string(),
    );
    set(
        ipsec_fields::KEY_EXCHANGE,
        config.key_exchange.as_str().to_string(),
    );
    set(
        ipsec_fields::IKE_LIFETIME,
        config.ike_lifetime.to_string(),
    );
    set(ipsec_fields::LIFETIME, config.lifetime.to_string());
    if let Some(v) = &config.protocol {
        set(ipsec_fields::PROTOCOL, v.clone());
    }
    set(
        ipsec_fields::IKE_ENC_SUITE,
        join_tokens(config.ike_enc.iter().map(|a| a.as_str())),
    );
    set(
        ipsec_fields::IKE_AUTH_SUITE,
        join_tokens(config.ike_integ.iter().map(|a| a.as_str())),
    );
    set(
        ipsec_fields::IKE_DH_GROUPS,
        join_tokens(config.ike_dh.iter().map(|g| g.group_id())),
    );
    set(
        ipsec_fields::ESP_ENC_SUITE,
        join_tokens(config.esp_enc.iter().map(|a| a.as_str())),
    );
    set(
        ipsec_fields::ESP_AUTH_SUITE,
        join_tokens(config.esp_integ.iter().map(|a| a.as_str())),
    );
    set(
        ipsec_fields::ESP_DH_GROUPS,
        join_tokens(config.esp_dh.iter().map(|g| g.group_id())),
    );
    set(ipsec_fields::DPD_DELAY, config.dpd_delay.to_string());
    set(ipsec_fields::DPD_TIMEOUT, config.dpd_timeout.to_string());
    set(ipsec_fields::MARK, config.mark.to_string());

    fvs
}

fn join_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> String {
    tokens.collect::<Vec<_>>().join(" ")
}
