//! Integration tests for vpnmgrd
//!
//! These tests drive the public surfaces end to end without touching
//! the real daemon or kernel: config rendering, status parsing, the
//! healthcheck timeline, and config-store change propagation.

use std::time::{Duration, Instant};

use vpnmgrd::healthcheck::HealthMonitor;
use vpnmgrd::strongswan::{parse_status_output, parse_updown_status, StrongSwan, SwanPaths};
use vpnmgrd::tables::{tunnel_fields, VPN_TUNNEL_TABLE};
use vpnmgrd::types::{
    AuthMode, DhGroup, EncAlg, HealthConfig, IntegAlg, KeyExchange, NegMode, Role,
};
use vpnmgrd::{ConnState, HealthStatus, TunnelRegistry};
use vpnmgr_store::{FieldValuesExt, Store};

fn temp_swan() -> (tempfile::TempDir, StrongSwan) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let paths = SwanPaths {
        conf_file: root.join("ipsec.conf"),
        secrets_file: root.join("ipsec.secrets"),
        charon_conf_file: root.join("charon.conf"),
        status_dir: root.join("status"),
        updown_script: "/usr/vpnmgr/scripts/ipsec_updown.sh".into(),
        pid_file: root.join("charon.pid"),
        starter_bin: "/usr/sbin/ipsec".into(),
    };
    let swan = StrongSwan::new(paths);
    (dir, swan)
}

#[test]
fn full_config_render_for_psk_initiator() {
    let (_dir, mut swan) = temp_swan();
    {
        let t = swan.tunnel_entry("vpn1");
        t.enable = true;
        t.role = Role::Initiator;
        t.right = Some("198.51.100.1".to_string());
        t.leftid = Some("@site-a".to_string());
        t.rightid = Some("@site-b".to_string());
        t.leftsubnet = vec!["10.2.0.0/24".parse().unwrap()];
        t.rightsubnet = vec!["10.1.0.0/24".parse().unwrap()];
        t.leftauth = Some(AuthMode::Psk);
        t.rightauth = Some(AuthMode::Psk);
        t.psk = Some("correcthorse".to_string());
        t.key_exchange = KeyExchange::Ikev2;
        t.ike_lifetime = 10800;
        t.lifetime = 3600;
        t.ike_enc = vec![EncAlg::Aes256];
        t.ike_integ = vec![IntegAlg::Sha256];
        t.ike_dh = vec![DhGroup::Group14];
        t.esp_enc = vec![EncAlg::Aes256];
        t.esp_integ = vec![IntegAlg::Sha256];
        t.dpd_delay = 30;
        t.dpd_timeout = 150;
        t.mark = 100;
    }

    let (config, wrote) = swan.render_config();
    assert!(wrote);

    // The stanza renders in the fixed key order the daemon expects.
    let expected = "\
conn \"vpn1\"
    auto=start
    left=%defaultroute
    leftid=@site-a
    right=198.51.100.1
    rightid=@site-b
    leftsubnet=10.2.0.0/24
    rightsubnet=10.1.0.0/24
    leftauth=psk
    rightauth=psk
    aggressive=no
    keyexchange=ikev2
    ikelifetime=10800
    lifetime=3600
    type=tunnel
    ike=aes256-sha256-modp2048!
    esp=aes256-sha256!
    dpddelay=30
    dpdtimeout=150
    dpdaction=restart
    mark=100
    leftupdown=\"/usr/vpnmgr/scripts/ipsec_updown.sh\"
";
    assert!(config.contains(expected), "config was:\n{}", config);

    let (secrets, wrote) = swan.render_secrets();
    assert!(wrote);
    assert!(secrets.starts_with("# strongSwan IPsec secrets file\n"));
    assert!(secrets.contains("@site-a @site-b : PSK \"correcthorse\"\n"));
}

#[test]
fn aggressive_ikev1_responder_render() {
    let (_dir, mut swan) = temp_swan();
    {
        let t = swan.tunnel_entry("vpn1");
        t.enable = true;
        t.role = Role::Responder;
        t.right = Some("198.51.100.1".to_string());
        t.neg_mode = NegMode::Aggressive;
        t.key_exchange = KeyExchange::Ikev1;
        t.psk = Some("s".to_string());
    }
    let (config, _) = swan.render_config();
    assert!(config.contains("    auto=add\n"));
    assert!(config.contains("    aggressive=yes\n"));
    assert!(config.contains("    keyexchange=ikev1\n"));
    // Zero mark and zero lifetimes produce no lines at all.
    assert!(!config.contains("mark="));
    assert!(!config.contains("ikelifetime="));
    assert!(!config.contains("lifetime="));
}

#[test]
fn status_parse_full_cycle() {
    let connecting = "        vpn1[1]: CONNECTING, 192.0.2.1[%any]...198.51.100.1[%any]\n";
    let status = parse_status_output("vpn1", connecting).unwrap();
    assert_eq!(status.conn_state, ConnState::Connecting);

    let up = "\
Security Associations (1 up, 0 connecting):\n\
        vpn1[3]: ESTABLISHED 14 minutes ago, 192.0.2.1[a]...198.51.100.1[b]\n\
        vpn1{5}:  INSTALLED, TUNNEL, reqid 2, ESP SPIs: c7c91c39_i c6091b29_o\n\
        vpn1{5}:   10.2.0.0/24 === 10.1.0.0/24 10.3.0.0/24\n";
    let status = parse_status_output("vpn1", up).unwrap();
    assert_eq!(status.conn_state, ConnState::Up);
    assert_eq!(status.local_ts.len(), 1);
    assert_eq!(status.remote_ts.len(), 2);

    let down = "Security Associations (0 up, 0 connecting):\n  none\n";
    let status = parse_status_output("vpn1", down).unwrap();
    assert_eq!(status.conn_state, ConnState::Down);

    let virt = parse_updown_status("VIRT_IP4 10.10.10.5\n");
    assert_eq!(virt, vec!["10.10.10.5".parse().unwrap()]);
}

#[test]
fn healthcheck_timeline_ok_nok_recovery() {
    let mut monitor = HealthMonitor::new();
    let t0 = Instant::now();
    let config = HealthConfig {
        enable: true,
        ip: Some("10.1.0.1".parse().unwrap()),
        interval: 10,
        timeout: 60,
        src: None,
    };

    // Enabling reports OK immediately without waiting for a probe.
    let transition = monitor.enable("vpn1", config, t0).unwrap();
    assert_eq!(transition, Some(HealthStatus::Ok));

    // Failures within the timeout keep the status OK.
    let mut now = t0;
    for _ in 0..5 {
        now += Duration::from_secs(10);
        let reqs = monitor.on_tick(now);
        assert_eq!(reqs.len(), 1);
        assert!(reqs[0].command.contains("ping"));
        assert_eq!(monitor.on_ping_done("vpn1", false, now), None);
    }
    assert_eq!(monitor.status("vpn1"), HealthStatus::Ok);

    // The failure that crosses the timeout reports NOK.
    now += Duration::from_secs(10);
    monitor.on_tick(now);
    assert_eq!(
        monitor.on_ping_done("vpn1", false, now),
        Some(HealthStatus::Nok)
    );

    // One successful probe recovers.
    now += Duration::from_secs(10);
    monitor.on_tick(now);
    assert_eq!(
        monitor.on_ping_done("vpn1", true, now),
        Some(HealthStatus::Ok)
    );

    // Disabling reports NA.
    assert_eq!(monitor.disable("vpn1"), Some(HealthStatus::Na));
}

#[test]
fn registry_status_writeback_roundtrip() {
    let store = Store::new();
    let mut registry = TunnelRegistry::new(store.clone());
    let mut rx = store.watch(VPN_TUNNEL_TABLE);

    registry.upsert("vpn1", true, HealthConfig::default());
    registry.report_status("vpn1", ConnState::Up);
    registry.report_health("vpn1", HealthStatus::Ok);

    assert_eq!(
        store.get_field(VPN_TUNNEL_TABLE, "vpn1", tunnel_fields::TUNNEL_STATUS),
        Some("up".to_string())
    );
    assert_eq!(
        store.get_field(
            VPN_TUNNEL_TABLE,
            "vpn1",
            tunnel_fields::HEALTHCHECK_STATUS
        ),
        Some("ok".to_string())
    );

    // The writebacks surface as watchable row updates.
    let update = rx.try_recv().unwrap();
    assert_eq!(update.key, "vpn1");
    assert_eq!(
        update.new.get_field(tunnel_fields::TUNNEL_STATUS),
        Some("up")
    );
}

#[test]
fn store_change_detection_suppresses_identical_writes() {
    let store = Store::new();
    let mut rx = store.watch(VPN_TUNNEL_TABLE);

    let row = vec![("enable".to_string(), "true".to_string())];
    store.upsert(VPN_TUNNEL_TABLE, "vpn1", row.clone());
    assert!(rx.try_recv().is_ok());

    // Re-writing the identical row produces no update.
    store.upsert(VPN_TUNNEL_TABLE, "vpn1", row);
    assert!(rx.try_recv().is_err());

    store.delete(VPN_TUNNEL_TABLE, "vpn1");
    let update = rx.try_recv().unwrap();
    assert!(update.op.is_del());
    assert_eq!(update.old.get_field("enable"), Some("true"));
}
