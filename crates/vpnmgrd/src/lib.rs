//! VPN Tunnel Manager Daemon - IPsec tunnel reconciliation
//!
//! vpnmgrd reconciles declarative tunnel intent from the config store
//! against a strongSwan IPsec daemon and kernel tunnel interfaces:
//! - Generic tunnel registry (enable/disable, healthcheck policy)
//! - IPsec config translation, daemon lifecycle, status parsing
//! - Kernel virtual tunnel interface (VTI/GRE) management
//! - Per-tunnel ping liveness checks
//! - Status writeback to the state tables

pub mod ciphers;
pub mod commands;
pub mod daemon;
pub mod healthcheck;
pub mod ipsec_mgr;
pub mod registry;
pub mod resolver;
pub mod strongswan;
pub mod tables;
pub mod tunnel_iface;
pub mod types;

pub use daemon::VpnMgr;
pub use registry::TunnelRegistry;
pub use types::{ConnState, HealthStatus, IpsecConfig, IpsecStatus};
