//! Common infrastructure for the VPN tunnel manager daemon.
//!
//! This crate provides functionality shared by the vpnmgrd components:
//!
//! - [`shell`]: Safe shell command execution with proper quoting
//! - [`error`]: Error types for tunnel manager operations
//!
//! # Architecture
//!
//! The tunnel manager follows the config-manager pattern:
//!
//! 1. Subscribe to config-store tables for configuration changes
//! 2. Execute shell commands to drive the IPsec daemon and the Linux
//!    network stack (tunnel interfaces, sysctl, ping)
//! 3. Write observed status back to the state side of the store
//!
//! # Example
//!
//! ```ignore
//! use vpnmgr_common::{
//!     shell::{self, IP_CMD, shellquote},
//!     error::VpnResult,
//! };
//!
//! async fn link_down(ifname: &str) -> VpnResult<()> {
//!     let cmd = format!("{} link set dev {} down", IP_CMD, shellquote(ifname));
//!     shell::exec_or_throw(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{VpnError, VpnResult};
