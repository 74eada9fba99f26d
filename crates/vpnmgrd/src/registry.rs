//! Generic tunnel registry.
//!
//! Tracks per-tunnel enable state and healthcheck policy independently
//! of the VPN type, holds the registration slot for the type-specific
//! reconciler, and writes connection/health status back to the
//! VPN_Tunnel row in the store.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info};
use vpnmgr_common::VpnResult;
use vpnmgr_store::Store;

use crate::tables::{tunnel_fields, VPN_TUNNEL_TABLE};
use crate::types::{ConnState, HealthConfig, HealthStatus};

/// Type-specific tunnel reconciler, notified by the composition root
/// when the generic tunnel config (the enable flag) changes.
///
/// One VPN type registers per tunnel; IPsec is the only implementation
/// today but the registry stays type-agnostic.
#[async_trait]
pub trait VpnReconciler {
    async fn on_tunnel_config_changed(
        &mut self,
        name: &str,
        registry: &mut TunnelRegistry,
    ) -> VpnResult<()>;
}

#[derive(Debug, Default)]
struct TunnelEntry {
    enabled: bool,
    health: HealthConfig,
    /// VPN type name of the registered reconciler, e.g. "ipsec".
    reconciler: Option<String>,
}

/// Outcome of a registry upsert, applied by the composition root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertActions {
    /// The enable flag changed (or the tunnel is new); the registered
    /// reconciler, if any, wants an `on_tunnel_config_changed` call.
    pub notify_reconciler: bool,
    /// Healthcheck policy changed; the health monitor needs a
    /// reconfigure for this tunnel.
    pub health_changed: bool,
}

/// Per-tunnel registry of generic (type-independent) tunnel state.
pub struct TunnelRegistry {
    tunnels: HashMap<String, TunnelEntry>,
    store: Store,
}

impl TunnelRegistry {
    pub fn new(store: Store) -> Self {
        Self {
            tunnels: HashMap::new(),
            store,
        }
    }

    /// Inserts or updates the generic config of a tunnel.
    ///
    /// Returns which downstream actions the change requires. A
    /// reconciler registered after the fact reads the current enable
    /// flag itself, so only flag flips request notification.
    pub fn upsert(&mut self, name: &str, enabled: bool, health: HealthConfig) -> UpsertActions {
        let entry = self.tunnels.entry(name.to_string()).or_insert_with(|| {
            info!(tunnel = %name, "Tunnel registered");
            TunnelEntry::default()
        });

        let enable_changed = entry.enabled != enabled;
        let health_changed = entry.health != health;
        entry.enabled = enabled;
        entry.health = health;

        if enable_changed {
            debug!(tunnel = %name, enabled = enabled, "Tunnel enable flag changed");
        }

        UpsertActions {
            notify_reconciler: enable_changed && entry.reconciler.is_some(),
            health_changed,
        }
    }

    /// Removes a tunnel. Deregisters any reconciler and pushes a final
    /// DOWN report so downstream consumers do not see stale UP status.
    /// Returns false if the tunnel was not known.
    pub fn delete(&mut self, name: &str) -> bool {
        if self.tunnels.remove(name).is_none() {
            return false;
        }
        info!(tunnel = %name, "Tunnel deleted");
        self.report_status(name, ConnState::Down);
        true
    }

    /// Registers the type-specific reconciler for a tunnel. The entry
    /// is created if the generic config has not arrived yet.
    pub fn register_reconciler(&mut self, name: &str, vpn_type: &str) {
        let entry = self.tunnels.entry(name.to_string()).or_default();
        entry.reconciler = Some(vpn_type.to_string());
        debug!(tunnel = %name, vpn_type = %vpn_type, "Reconciler registered");
    }

    /// Clears the reconciler registration slot for a tunnel.
    pub fn deregister_reconciler(&mut self, name: &str) {
        if let Some(entry) = self.tunnels.get_mut(name) {
            entry.reconciler = None;
            debug!(tunnel = %name, "Reconciler deregistered");
        }
    }

    /// Returns true if the tunnel exists and is enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.tunnels.get(name).map(|e| e.enabled).unwrap_or(false)
    }

    /// Returns true if a reconciler is registered for the tunnel.
    pub fn has_reconciler(&self, name: &str) -> bool {
        self.tunnels
            .get(name)
            .map(|e| e.reconciler.is_some())
            .unwrap_or(false)
    }

    /// Returns the current healthcheck policy of a tunnel.
    pub fn health_config(&self, name: &str) -> Option<&HealthConfig> {
        self.tunnels.get(name).map(|e| &e.health)
    }

    /// Writes the connection state into the tunnel's VPN_Tunnel row.
    pub fn report_status(&self, name: &str, state: ConnState) {
        info!(tunnel = %name, status = %state, "Tunnel connection status");
        self.store.update_fields(
            VPN_TUNNEL_TABLE,
            name,
            vec![(tunnel_fields::TUNNEL_STATUS.to_string(), state.to_string())],
        );
    }

    /// Writes the health status into the tunnel's VPN_Tunnel row.
    pub fn report_health(&self, name: &str, status: HealthStatus) {
        info!(tunnel = %name, status = %status, "Tunnel health status");
        self.store.update_fields(
            VPN_TUNNEL_TABLE,
            name,
            vec![(
                tunnel_fields::HEALTHCHECK_STATUS.to_string(),
                status.to_string(),
            )],
        );
    }
}
