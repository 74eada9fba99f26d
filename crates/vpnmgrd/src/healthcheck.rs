//! Per-tunnel liveness healthcheck.
//!
//! Each enabled tunnel gets a repeating ping at `interval` seconds.
//! The timer is re-armed when the ping completes, not when it was
//! launched, so slow or timing-out pings never overlap. Status stays
//! OK under failure until `timeout` seconds have elapsed since the
//! last successful ping, then turns NOK.
//!
//! The monitor itself runs no subprocesses; `on_tick` returns the ping
//! commands to launch and the event loop feeds completions back via
//! `on_ping_done`. All timing flows through explicit `Instant`s.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use vpnmgr_common::{VpnError, VpnResult};

use crate::commands::build_health_ping_cmd;
use crate::types::{HealthConfig, HealthStatus, HEALTH_MIN_INTERVAL, HEALTH_MIN_TIMEOUT};

#[derive(Debug)]
struct HealthEntry {
    config: HealthConfig,
    status: HealthStatus,
    last_ok: Instant,
    ping_running: bool,
    /// Next tick deadline; None while a ping is in flight or the
    /// check is disabled.
    next_tick: Option<Instant>,
}

/// A ping command the event loop should launch for a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingRequest {
    pub tunnel: String,
    pub command: String,
}

/// Healthcheck state for all tunnels.
#[derive(Default)]
pub struct HealthMonitor {
    tunnels: HashMap<String, HealthEntry>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the healthcheck for a tunnel with the given policy.
    ///
    /// Validates the limits up front; on failure the previous timer
    /// state is left untouched. On success the status becomes OK
    /// immediately and the first tick fires one interval from `now`.
    /// Returns the status transition, if any.
    pub fn enable(
        &mut self,
        name: &str,
        config: HealthConfig,
        now: Instant,
    ) -> VpnResult<Option<HealthStatus>> {
        if config.interval < HEALTH_MIN_INTERVAL {
            return Err(VpnError::invalid_config(
                "healthcheck_interval",
                format!(
                    "interval {} less than minimum {}",
                    config.interval, HEALTH_MIN_INTERVAL
                ),
            ));
        }
        if config.timeout < HEALTH_MIN_TIMEOUT {
            return Err(VpnError::invalid_config(
                "healthcheck_timeout",
                format!(
                    "timeout {} less than minimum {}",
                    config.timeout, HEALTH_MIN_TIMEOUT
                ),
            ));
        }
        if config.timeout < config.interval {
            return Err(VpnError::invalid_config(
                "healthcheck_timeout",
                format!(
                    "timeout {} less than interval {}",
                    config.timeout, config.interval
                ),
            ));
        }
        if config.ip.is_none() {
            return Err(VpnError::invalid_config(
                "healthcheck_ip",
                "IP address to ping not configured",
            ));
        }

        let interval = Duration::from_secs(u64::from(config.interval));
        let entry = self.tunnels.entry(name.to_string()).or_insert(HealthEntry {
            config: HealthConfig::default(),
            status: HealthStatus::Na,
            last_ok: now,
            ping_running: false,
            next_tick: None,
        });
        entry.config = config;
        entry.last_ok = now;
        entry.next_tick = Some(now + interval);

        info!(tunnel = %name, "Healthcheck enabled");

        let prev = entry.status;
        entry.status = HealthStatus::Ok;
        Ok((prev != HealthStatus::Ok).then_some(HealthStatus::Ok))
    }

    /// Disables the healthcheck for a tunnel. Future ticks are
    /// cancelled; an in-flight ping is left to finish and its
    /// completion is ignored. Status goes to NA.
    pub fn disable(&mut self, name: &str) -> Option<HealthStatus> {
        let entry = self.tunnels.get_mut(name)?;
        entry.config.enable = false;
        entry.next_tick = None;
        info!(tunnel = %name, "Healthcheck disabled");

        let prev = entry.status;
        entry.status = HealthStatus::Na;
        (prev != HealthStatus::Na).then_some(HealthStatus::Na)
    }

    /// Drops all healthcheck state for a tunnel (tunnel deletion).
    pub fn remove(&mut self, name: &str) {
        self.tunnels.remove(name);
    }

    /// Returns the current status of a tunnel's healthcheck.
    pub fn status(&self, name: &str) -> HealthStatus {
        self.tunnels
            .get(name)
            .map(|e| e.status)
            .unwrap_or(HealthStatus::Na)
    }

    /// The earliest pending tick deadline across all tunnels.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tunnels.values().filter_map(|e| e.next_tick).min()
    }

    /// Fires all ticks due at `now` and returns the ping commands the
    /// event loop should launch. A tunnel whose previous ping is still
    /// running skips this tick with a warning.
    pub fn on_tick(&mut self, now: Instant) -> Vec<PingRequest> {
        let mut requests = Vec::new();

        for (name, entry) in &mut self.tunnels {
            let Some(deadline) = entry.next_tick else {
                continue;
            };
            if deadline > now {
                continue;
            }

            if entry.ping_running {
                // Would happen if the interval is close to the ping wait.
                warn!(tunnel = %name, "Previous healthcheck ping still running");
                entry.next_tick =
                    Some(now + Duration::from_secs(u64::from(entry.config.interval)));
                continue;
            }

            let Some(ip) = entry.config.ip else {
                continue;
            };

            entry.ping_running = true;
            entry.next_tick = None;
            requests.push(PingRequest {
                tunnel: name.clone(),
                command: build_health_ping_cmd(&ip.to_string(), entry.config.src.as_deref()),
            });
        }

        requests
    }

    /// Records a ping completion and re-arms the tunnel's timer one
    /// interval from `now`. Returns the status transition, if any.
    pub fn on_ping_done(&mut self, name: &str, ping_ok: bool, now: Instant) -> Option<HealthStatus> {
        let entry = self.tunnels.get_mut(name)?;
        entry.ping_running = false;

        let new_status = if !entry.config.enable {
            // Disabled while the ping was in flight.
            debug!(tunnel = %name, "Healthcheck disabled, ignoring ping result");
            HealthStatus::Na
        } else if ping_ok {
            debug!(tunnel = %name, "Healthcheck ping OK");
            entry.last_ok = now;
            HealthStatus::Ok
        } else if now.duration_since(entry.last_ok)
            >= Duration::from_secs(u64::from(entry.config.timeout))
        {
            debug!(tunnel = %name, "Healthcheck ping NOK, timeout expired");
            HealthStatus::Nok
        } else {
            // Failing, but still within the timeout window.
            HealthStatus::Ok
        };

        if entry.config.enable {
            // Count to the next interval starts when the ping finishes,
            // so a ping stuck waiting for a reply does not pile up retries.
            entry.next_tick = Some(now + Duration::from_secs(u64::from(entry.config.interval)));
        }

        let prev = entry.status;
        entry.status = new_status;
        if prev != new_status {
            info!(tunnel = %name, from = %prev, to = %new_status, "Health status changed");
            Some(new_status)
        } else {
            None
        }
    }
}
