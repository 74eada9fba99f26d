//! vpnmgrd composition root and event loop.
//!
//! One task owns all managers and serializes every event through it:
//! config-store row updates, controller timer deadlines, healthcheck
//! ticks, and ping completions. Pings run as spawned tasks so a slow
//! probe never stalls reconciliation; their results come back over a
//! channel.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vpnmgr_common::{shell, VpnResult};
use vpnmgr_store::{FieldValues, FieldValuesExt, Operation, RowUpdate, Store};

use crate::healthcheck::{HealthMonitor, PingRequest};
use crate::ipsec_mgr::IpsecMgr;
use crate::registry::{TunnelRegistry, VpnReconciler};
use crate::strongswan::SwanPaths;
use crate::tables::{
    iface_fields, tunnel_fields, IPSEC_CONFIG_TABLE, TUNNEL_INTERFACE_TABLE, VPN_TUNNEL_TABLE,
};
use crate::tunnel_iface::TunnelIfaceMgr;
use crate::types::{HealthConfig, HealthStatus};

/// Ping completion message: tunnel name and whether the probe got a
/// reply.
type PingDone = (String, bool);

pub struct VpnMgr {
    store: Store,
    registry: TunnelRegistry,
    ipsec: IpsecMgr,
    ifaces: TunnelIfaceMgr,
    health: HealthMonitor,
}

impl VpnMgr {
    pub fn new(store: Store, paths: SwanPaths) -> Self {
        Self {
            registry: TunnelRegistry::new(store.clone()),
            ipsec: IpsecMgr::new(store.clone(), paths),
            ifaces: TunnelIfaceMgr::new(store.clone()),
            health: HealthMonitor::new(),
            store,
        }
    }

    /// Runs the manager until the process is stopped.
    pub async fn run(&mut self) -> VpnResult<()> {
        let mut tunnel_rx = self.store.watch(VPN_TUNNEL_TABLE);
        let mut ipsec_rx = self.store.watch(IPSEC_CONFIG_TABLE);
        let mut iface_rx = self.store.watch(TUNNEL_INTERFACE_TABLE);
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel::<PingDone>();

        self.initial_sweep().await;
        info!("vpnmgrd event loop started");

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                Some(update) = tunnel_rx.recv() => {
                    self.on_tunnel_row(&update, Instant::now()).await;
                }
                Some(update) = ipsec_rx.recv() => {
                    self.on_ipsec_row(&update, Instant::now()).await;
                }
                Some(update) = iface_rx.recv() => {
                    self.on_iface_row(&update).await;
                }
                Some((name, ok)) = ping_rx.recv() => {
                    self.on_ping_done(&name, ok, Instant::now());
                }
                _ = sleep_until_opt(deadline) => {
                    let now = Instant::now();
                    self.ipsec.handle_deadlines(now, &mut self.registry).await;
                    for req in self.health.on_tick(now) {
                        spawn_ping(req, ping_tx.clone());
                    }
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.ipsec.next_deadline(), self.health.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Processes rows that existed before the watches were set up.
    async fn initial_sweep(&mut self) {
        let now = Instant::now();
        for table in [VPN_TUNNEL_TABLE, IPSEC_CONFIG_TABLE, TUNNEL_INTERFACE_TABLE] {
            for key in self.store.keys(table) {
                let Some(fvs) = self.store.get(table, &key) else {
                    continue;
                };
                let update = RowUpdate {
                    table: table.to_string(),
                    key,
                    op: Operation::New,
                    old: Vec::new(),
                    new: fvs,
                };
                match table {
                    VPN_TUNNEL_TABLE => self.on_tunnel_row(&update, now).await,
                    IPSEC_CONFIG_TABLE => self.on_ipsec_row(&update, now).await,
                    _ => self.on_iface_row(&update).await,
                }
            }
        }
    }

    /// Handles one VPN_Tunnel row update.
    pub async fn on_tunnel_row(&mut self, update: &RowUpdate, now: Instant) {
        let name = update.key.as_str();

        if update.op.is_del() {
            debug!(tunnel = %name, "VPN tunnel deleted");
            let had_reconciler = self.registry.has_reconciler(name);
            if let Some(status) = self.health.disable(name) {
                self.registry.report_health(name, status);
            }
            self.health.remove(name);
            self.registry.delete(name);
            if had_reconciler {
                // The IPsec config row may still exist; the registry
                // entry is gone so the tunnel reconciles as disabled.
                if let Err(e) = self
                    .ipsec
                    .on_tunnel_config_changed(name, &mut self.registry)
                    .await
                {
                    warn!(tunnel = %name, error = %e, "Error reconciling deleted tunnel");
                }
            }
            return;
        }

        // Our own tunnel_status/healthcheck_status writebacks echo as
        // MODIFYs on this table.
        if update.op.is_modify()
            && !update.changed_other_than(&[
                tunnel_fields::TUNNEL_STATUS,
                tunnel_fields::HEALTHCHECK_STATUS,
            ])
        {
            return;
        }

        let enable = bool_field(&update.new, tunnel_fields::ENABLE);
        let health = health_config_from_fields(&update.new);
        let actions = self.registry.upsert(name, enable, health.clone());

        if actions.notify_reconciler {
            if let Err(e) = self
                .ipsec
                .on_tunnel_config_changed(name, &mut self.registry)
                .await
            {
                warn!(tunnel = %name, error = %e, "Error reconciling tunnel");
            }
        }

        if actions.health_changed {
            if health.enable {
                match self.health.enable(name, health, now) {
                    Ok(Some(status)) => self.registry.report_health(name, status),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(tunnel = %name, error = %e, "Invalid healthcheck config");
                        self.registry.report_health(name, HealthStatus::Error);
                    }
                }
            } else if let Some(status) = self.health.disable(name) {
                self.registry.report_health(name, status);
            }
        }
    }

    /// Handles one IPSec_Config row update.
    pub async fn on_ipsec_row(&mut self, update: &RowUpdate, now: Instant) {
        if let Err(e) = self
            .ipsec
            .on_config_row(update, &mut self.registry, now)
            .await
        {
            warn!(tunnel = %update.key, error = %e, "Error applying IPsec config");
        }
    }

    /// Handles one Tunnel_Interface row update.
    pub async fn on_iface_row(&mut self, update: &RowUpdate) {
        let ifname = update.key.as_str();

        if update.op.is_del() {
            self.ifaces.delete(ifname).await;
            return;
        }

        // Status writebacks echo as MODIFYs on this table.
        if update.op.is_modify() && !update.changed_other_than(&[iface_fields::STATUS]) {
            return;
        }

        if let Err(e) = self.ifaces.set_from_fields(ifname, &update.new) {
            warn!(ifname = %ifname, error = %e, "Invalid tunnel interface config");
            return;
        }
        if let Err(e) = self.ifaces.apply(ifname).await {
            warn!(ifname = %ifname, error = %e, "Error applying tunnel interface");
        }
    }

    fn on_ping_done(&mut self, name: &str, ok: bool, now: Instant) {
        if let Some(status) = self.health.on_ping_done(name, ok, now) {
            self.registry.report_health(name, status);
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d.into()).await,
        None => std::future::pending().await,
    }
}

fn spawn_ping(req: PingRequest, tx: mpsc::UnboundedSender<PingDone>) {
    tokio::spawn(async move {
        let ok = match shell::exec(&req.command).await {
            Ok(result) => result.success(),
            Err(e) => {
                warn!(tunnel = %req.tunnel, error = %e, "Error running healthcheck ping");
                false
            }
        };
        // The receiver going away just means we are shutting down.
        let _ = tx.send((req.tunnel, ok));
    });
}

fn bool_field(fvs: &FieldValues, field: &str) -> bool {
    fvs.get_field(field) == Some("true")
}

fn health_config_from_fields(fvs: &FieldValues) -> HealthConfig {
    HealthConfig {
        enable: bool_field(fvs, tunnel_fields::HEALTHCHECK_ENABLE),
        ip: fvs
            .get_field(tunnel_fields::HEALTHCHECK_IP)
            .and_then(|v| v.parse().ok()),
        interval: fvs
            .get_field(tunnel_fields::HEALTHCHECK_INTERVAL)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        timeout: fvs
            .get_field(tunnel_fields::HEALTHCHECK_TIMEOUT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        src: fvs
            .get_field(tunnel_fields::HEALTHCHECK_SRC)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
    }
}
