//! VPN Tunnel Manager Daemon Entry Point

use tracing::{error, info};
use vpnmgr_store::Store;
use vpnmgrd::strongswan::SwanPaths;
use vpnmgrd::VpnMgr;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting vpnmgrd");

    let store = Store::new();
    let mut mgr = VpnMgr::new(store, SwanPaths::default());

    if let Err(e) = mgr.run().await {
        error!("vpnmgrd exited with error: {}", e);
        std::process::exit(1);
    }
}
