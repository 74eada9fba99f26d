//! Config and status type definitions for vpnmgrd

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use vpnmgr_common::{VpnError, VpnResult};
use vpnmgr_store::{FieldValues, FieldValuesExt};

use crate::tables::ipsec_fields;

/// Maximum number of subnets per selector list.
pub const MAX_SUBNETS: usize = 32;

/// Maximum number of algorithms per cipher list.
pub const MAX_CIPHERS: usize = 8;

/// Default IKE (phase 1) lifetime in seconds.
pub const IKE_LIFETIME_DEFAULT: u32 = 10800;

/// Default SA (phase 2) lifetime in seconds.
pub const LIFETIME_DEFAULT: u32 = 3600;

/// Default dead-peer-detection delay in seconds.
pub const DPD_DELAY_DEFAULT: u32 = 30;

/// Default dead-peer-detection timeout in seconds.
pub const DPD_TIMEOUT_DEFAULT: u32 = 150;

/// Minimum healthcheck interval in seconds.
pub const HEALTH_MIN_INTERVAL: u32 = 5;

/// Minimum healthcheck timeout in seconds.
pub const HEALTH_MIN_TIMEOUT: u32 = 10;

/// VPN tunnel connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Down,
    Connecting,
    Up,
    Error,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Down => "down",
            ConnState::Connecting => "connecting",
            ConnState::Up => "up",
            ConnState::Error => "error",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// VPN tunnel health status as reported by the healthcheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    /// Healthcheck disabled or not yet determined.
    #[default]
    Na,
    Ok,
    Nok,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Na => "na",
            HealthStatus::Ok => "ok",
            HealthStatus::Nok => "nok",
            HealthStatus::Error => "error",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IPsec peer authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Psk,
    Pubkey,
    Xauth,
    EapMschapv2,
}

impl AuthMode {
    /// The keyword used in the daemon's leftauth/rightauth options.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Psk => "psk",
            AuthMode::Pubkey => "pubkey",
            AuthMode::Xauth => "xauth",
            AuthMode::EapMschapv2 => "eap-mschapv2",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "psk" => Some(AuthMode::Psk),
            "pubkey" => Some(AuthMode::Pubkey),
            "xauth" => Some(AuthMode::Xauth),
            "eap-mschapv2" => Some(AuthMode::EapMschapv2),
            _ => None,
        }
    }
}

/// IKEv1 negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegMode {
    #[default]
    Main,
    Aggressive,
}

impl NegMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegMode::Main => "main",
            NegMode::Aggressive => "aggressive",
        }
    }
}

/// IKE key exchange version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyExchange {
    /// Either version (daemon default).
    #[default]
    Ike,
    Ikev1,
    Ikev2,
}

impl KeyExchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyExchange::Ike => "ike",
            KeyExchange::Ikev1 => "ikev1",
            KeyExchange::Ikev2 => "ikev2",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "ike" => Some(KeyExchange::Ike),
            "ikev1" => Some(KeyExchange::Ikev1),
            "ikev2" => Some(KeyExchange::Ikev2),
            _ => None,
        }
    }
}

/// Encryption algorithm for IKE/ESP proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncAlg {
    Des3,
    Aes128,
    Aes192,
    Aes256,
}

impl EncAlg {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncAlg::Des3 => "3des",
            EncAlg::Aes128 => "aes128",
            EncAlg::Aes192 => "aes192",
            EncAlg::Aes256 => "aes256",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "3des" => Some(EncAlg::Des3),
            "aes128" => Some(EncAlg::Aes128),
            "aes192" => Some(EncAlg::Aes192),
            "aes256" => Some(EncAlg::Aes256),
            _ => None,
        }
    }
}

/// Integrity algorithm for IKE/ESP proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegAlg {
    Sha1,
    Md5,
    Sha256,
}

impl IntegAlg {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegAlg::Sha1 => "sha1",
            IntegAlg::Md5 => "md5",
            IntegAlg::Sha256 => "sha256",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "sha1" => Some(IntegAlg::Sha1),
            "md5" => Some(IntegAlg::Md5),
            "sha256" => Some(IntegAlg::Sha256),
            _ => None,
        }
    }
}

/// Diffie-Hellman group for IKE/ESP proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhGroup {
    Group1,
    Group2,
    Group5,
    Group14,
}

impl DhGroup {
    /// The modp keyword used in daemon proposal strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            DhGroup::Group1 => "modp768",
            DhGroup::Group2 => "modp1024",
            DhGroup::Group5 => "modp1536",
            DhGroup::Group14 => "modp2048",
        }
    }

    /// The numeric group id used in config and state rows.
    pub fn group_id(&self) -> &'static str {
        match self {
            DhGroup::Group1 => "1",
            DhGroup::Group2 => "2",
            DhGroup::Group5 => "5",
            DhGroup::Group14 => "14",
        }
    }

    /// Parses the numeric group id used in config rows.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "1" => Some(DhGroup::Group1),
            "2" => Some(DhGroup::Group2),
            "5" => Some(DhGroup::Group5),
            "14" => Some(DhGroup::Group14),
            _ => None,
        }
    }
}

/// Dead-peer-detection action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DpdAction {
    None,
    Clear,
    Hold,
    #[default]
    Restart,
}

impl DpdAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DpdAction::None => "none",
            DpdAction::Clear => "clear",
            DpdAction::Hold => "hold",
            DpdAction::Restart => "restart",
        }
    }
}

/// IPsec encapsulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpsecMode {
    #[default]
    Tunnel,
    Transport,
}

impl IpsecMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpsecMode::Tunnel => "tunnel",
            IpsecMode::Transport => "transport",
        }
    }
}

/// Connection role: whether we initiate or wait for the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Initiator,
    Responder,
}

/// Kernel tunnel interface type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelIfaceType {
    Vti,
    Vti6,
    Ip6Tnl,
    Gre,
    Gretap,
    Ip6Gre,
    Ip6Gretap,
}

impl TunnelIfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelIfaceType::Vti => "vti",
            TunnelIfaceType::Vti6 => "vti6",
            TunnelIfaceType::Ip6Tnl => "ip6tnl",
            TunnelIfaceType::Gre => "gre",
            TunnelIfaceType::Gretap => "gretap",
            TunnelIfaceType::Ip6Gre => "ip6gre",
            TunnelIfaceType::Ip6Gretap => "ip6gretap",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "vti" => Some(TunnelIfaceType::Vti),
            "vti6" => Some(TunnelIfaceType::Vti6),
            "ip6tnl" => Some(TunnelIfaceType::Ip6Tnl),
            "gre" => Some(TunnelIfaceType::Gre),
            "gretap" => Some(TunnelIfaceType::Gretap),
            "ip6gre" => Some(TunnelIfaceType::Ip6Gre),
            "ip6gretap" => Some(TunnelIfaceType::Ip6Gretap),
            _ => None,
        }
    }

    /// Returns true when the type requires IPv6 endpoint addresses.
    pub fn requires_ipv6(&self) -> bool {
        matches!(
            self,
            TunnelIfaceType::Vti6
                | TunnelIfaceType::Ip6Tnl
                | TunnelIfaceType::Ip6Gre
                | TunnelIfaceType::Ip6Gretap
        )
    }
}

/// ip6tnl encapsulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IfaceMode {
    #[default]
    Any,
    Ipip6,
    Ip6Ip6,
}

impl IfaceMode {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "any" => Some(IfaceMode::Any),
            "ipip6" => Some(IfaceMode::Ipip6),
            "ip6ip6" => Some(IfaceMode::Ip6Ip6),
            _ => None,
        }
    }
}

/// An IP address with an optional prefix length, used for subnets,
/// traffic selectors, and virtual-IP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNet {
    pub addr: IpAddr,
    pub prefix: Option<u8>,
}

impl IpNet {
    pub fn host(addr: IpAddr) -> Self {
        Self { addr, prefix: None }
    }

    pub fn is_v4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// Returns true for the all-zero IPv4 address used as the
    /// "request a virtual IP" sentinel.
    pub fn is_unspecified_v4(&self) -> bool {
        matches!(self.addr, IpAddr::V4(a) if a.is_unspecified())
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix {
            Some(p) => write!(f, "{}/{}", self.addr, p),
            None => write!(f, "{}", self.addr),
        }
    }
}

impl FromStr for IpNet {
    type Err = VpnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, prefix) = match s.split_once('/') {
            Some((a, p)) => {
                let prefix: u8 = p
                    .parse()
                    .map_err(|_| VpnError::parse("IP prefix", format!("bad prefix in '{}'", s)))?;
                (a, Some(prefix))
            }
            None => (s, None),
        };
        let addr: IpAddr = addr_str
            .parse()
            .map_err(|_| VpnError::parse("IP address", format!("bad address '{}'", s)))?;
        if let Some(p) = prefix {
            let max = if addr.is_ipv4() { 32 } else { 128 };
            if p > max {
                return Err(VpnError::parse(
                    "IP prefix",
                    format!("prefix {} out of range for '{}'", p, s),
                ));
            }
        }
        Ok(Self { addr, prefix })
    }
}

/// Parses a whitespace-separated list of IPs/subnets, capped at `max`.
pub fn parse_subnet_list(s: &str, max: usize) -> VpnResult<Vec<IpNet>> {
    let mut out = Vec::new();
    for tok in s.split_whitespace().take(max) {
        out.push(tok.parse()?);
    }
    Ok(out)
}

/// Healthcheck policy parsed from a VPN_Tunnel row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthConfig {
    pub enable: bool,
    pub ip: Option<IpAddr>,
    pub interval: u32,
    pub timeout: u32,
    /// Source IP or source interface for the ping.
    pub src: Option<String>,
}

/// IPsec tunnel configuration parsed from an IPSec_Config row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpsecConfig {
    pub tunnel_name: String,
    pub local_endpoint: Option<String>,
    /// IP or FQDN; resolved lazily, see the reconciler.
    pub remote_endpoint: Option<String>,
    pub local_endpoint_id: Option<String>,
    pub remote_endpoint_id: Option<String>,
    pub local_subnets: Vec<IpNet>,
    pub remote_subnets: Vec<IpNet>,
    pub local_virt_ip: Vec<IpNet>,
    pub remote_virt_ip: Vec<IpNet>,
    pub local_auth_mode: Option<AuthMode>,
    pub remote_auth_mode: Option<AuthMode>,
    pub local_auth_mode2: Option<AuthMode>,
    pub remote_auth_mode2: Option<AuthMode>,
    pub psk: Option<String>,
    pub xauth_user: Option<String>,
    pub xauth_pass: Option<String>,
    pub eap_identity: Option<String>,
    pub eap_id: Option<String>,
    pub eap_secret: Option<String>,
    pub nego_mode: NegMode,
    pub key_exchange: KeyExchange,
    pub ike_lifetime: u32,
    pub lifetime: u32,
    /// Echoed to the state row only; encapsulation is always tunnel mode.
    pub protocol: Option<String>,
    pub ike_enc: Vec<EncAlg>,
    pub ike_integ: Vec<IntegAlg>,
    pub ike_dh: Vec<DhGroup>,
    pub esp_enc: Vec<EncAlg>,
    pub esp_integ: Vec<IntegAlg>,
    pub esp_dh: Vec<DhGroup>,
    pub dpd_delay: u32,
    pub dpd_timeout: u32,
    pub dpd_action: DpdAction,
    /// Traffic mark; 0 is reserved and means unset.
    pub mark: u32,
}

fn opt_string(fvs: &FieldValues, field: &str) -> Option<String> {
    fvs.get_field(field)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn opt_u32(fvs: &FieldValues, field: &str, default: u32) -> u32 {
    fvs.get_field(field)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn auth_mode(fvs: &FieldValues, field: &str) -> Option<AuthMode> {
    fvs.get_field(field).and_then(AuthMode::from_str_opt)
}

fn subnets(fvs: &FieldValues, field: &str) -> VpnResult<Vec<IpNet>> {
    match fvs.get_field(field) {
        Some(v) => parse_subnet_list(v, MAX_SUBNETS),
        None => Ok(Vec::new()),
    }
}

fn ciphers<T>(fvs: &FieldValues, field: &str, parse: fn(&str) -> Option<T>) -> Vec<T> {
    let Some(v) = fvs.get_field(field) else {
        return Vec::new();
    };
    v.split_whitespace()
        .take(MAX_CIPHERS)
        .filter_map(|tok| {
            let alg = parse(tok);
            if alg.is_none() {
                tracing::warn!(field = %field, value = %tok, "Unknown cipher value, skipping");
            }
            alg
        })
        .collect()
}

impl IpsecConfig {
    /// Parses an IPSec_Config row. Unknown cipher values are skipped
    /// with a warning; missing lifetimes and DPD fields get defaults.
    pub fn from_fields(key: &str, fvs: &FieldValues) -> VpnResult<Self> {
        let mark = opt_u32(fvs, ipsec_fields::MARK, 0);

        Ok(Self {
            tunnel_name: key.to_string(),
            local_endpoint: opt_string(fvs, ipsec_fields::LOCAL_ENDPOINT),
            remote_endpoint: opt_string(fvs, ipsec_fields::REMOTE_ENDPOINT),
            local_endpoint_id: opt_string(fvs, ipsec_fields::LOCAL_ENDPOINT_ID),
            remote_endpoint_id: opt_string(fvs, ipsec_fields::REMOTE_ENDPOINT_ID),
            local_subnets: subnets(fvs, ipsec_fields::LOCAL_SUBNETS)?,
            remote_subnets: subnets(fvs, ipsec_fields::REMOTE_SUBNETS)?,
            local_virt_ip: subnets(fvs, ipsec_fields::LOCAL_VIRT_IP)?,
            remote_virt_ip: subnets(fvs, ipsec_fields::REMOTE_VIRT_IP)?,
            local_auth_mode: auth_mode(fvs, ipsec_fields::LOCAL_AUTH_MODE),
            remote_auth_mode: auth_mode(fvs, ipsec_fields::REMOTE_AUTH_MODE),
            local_auth_mode2: auth_mode(fvs, ipsec_fields::LOCAL_AUTH_MODE2),
            remote_auth_mode2: auth_mode(fvs, ipsec_fields::REMOTE_AUTH_MODE2),
            psk: opt_string(fvs, ipsec_fields::PSK),
            xauth_user: opt_string(fvs, ipsec_fields::XAUTH_USER),
            xauth_pass: opt_string(fvs, ipsec_fields::XAUTH_PASS),
            eap_identity: opt_string(fvs, ipsec_fields::EAP_IDENTITY),
            eap_id: opt_string(fvs, ipsec_fields::EAP_ID),
            eap_secret: opt_string(fvs, ipsec_fields::EAP_SECRET),
            nego_mode: match fvs.get_field(ipsec_fields::NEGO_MODE) {
                Some("aggressive") => NegMode::Aggressive,
                _ => NegMode::Main,
            },
            key_exchange: fvs
                .get_field(ipsec_fields::KEY_EXCHANGE)
                .and_then(KeyExchange::from_str_opt)
                .unwrap_or_default(),
            ike_lifetime: opt_u32(fvs, ipsec_fields::IKE_LIFETIME, IKE_LIFETIME_DEFAULT),
            lifetime: opt_u32(fvs, ipsec_fields::LIFETIME, LIFETIME_DEFAULT),
            protocol: opt_string(fvs, ipsec_fields::PROTOCOL),
            ike_enc: ciphers(fvs, ipsec_fields::IKE_ENC_SUITE, EncAlg::from_str_opt),
            ike_integ: ciphers(fvs, ipsec_fields::IKE_AUTH_SUITE, IntegAlg::from_str_opt),
            ike_dh: ciphers(fvs, ipsec_fields::IKE_DH_GROUPS, DhGroup::from_str_opt),
            esp_enc: ciphers(fvs, ipsec_fields::ESP_ENC_SUITE, EncAlg::from_str_opt),
            esp_integ: ciphers(fvs, ipsec_fields::ESP_AUTH_SUITE, IntegAlg::from_str_opt),
            esp_dh: ciphers(fvs, ipsec_fields::ESP_DH_GROUPS, DhGroup::from_str_opt),
            dpd_delay: opt_u32(fvs, ipsec_fields::DPD_DELAY, DPD_DELAY_DEFAULT),
            dpd_timeout: opt_u32(fvs, ipsec_fields::DPD_TIMEOUT, DPD_TIMEOUT_DEFAULT),
            dpd_action: DpdAction::Restart,
            mark,
        })
    }
}

/// Observed IPsec tunnel status, merged from the daemon CLI output and
/// the updown-hook status file.
///
/// Equality covers all fields including the virtual IPs, so a change
/// in assigned virtual IPs alone is reported as a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpsecStatus {
    pub tunnel_name: String,
    pub conn_state: ConnState,
    pub local_ts: Vec<IpNet>,
    pub remote_ts: Vec<IpNet>,
    pub local_virt_ip: Vec<IpNet>,
}

impl IpsecStatus {
    pub fn down(tunnel_name: &str) -> Self {
        Self {
            tunnel_name: tunnel_name.to_string(),
            ..Default::default()
        }
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

    #[test]
    fn test_ipnet_roundtrip() {
        let net: IpNet = "10.0.0.0/24".parse().unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/24");
        assert!(net.is_v4());

        let host: IpNet = "192.168.1.1".parse().unwrap();
        assert_eq!(host.prefix, None);
        assert_eq!(host.to_string(), "192.168.1.1");

        let v6: IpNet = "2001:db8::/32".parse().unwrap();
        assert!(!v6.is_v4());
        assert_eq!(v6.to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_ipnet_invalid() {
        assert!("not-an-ip".parse::<IpNet>().is_err());
        assert!("10.0.0.0/33".parse::<IpNet>().is_err());
        assert!("10.0.0.0/x".parse::<IpNet>().is_err());
    }

    #[test]
    fn test_ipnet_virt_ip_sentinel() {
        let net: IpNet = "0.0.0.0".parse().unwrap();
        assert!(net.is_unspecified_v4());
        let net: IpNet = "10.1.1.1".parse().unwrap();
        assert!(!net.is_unspecified_v4());
    }

    #[test]
    fn test_parse_subnet_list() {
        let list = parse_subnet_list("10.0.0.0/24 10.0.1.0/24 192.168.1.1", MAX_SUBNETS).unwrap();
        assert_eq!(list.len(), 3);
        assert!(parse_subnet_list("10.0.0.0/24 garbage", MAX_SUBNETS).is_err());
        assert!(parse_subnet_list("", MAX_SUBNETS).unwrap().is_empty());
    }

    #[test]
    fn test_ipsec_config_defaults() {
        let config = IpsecConfig::from_fields("vpn1", &fvs(&[])).unwrap();
        assert_eq!(config.tunnel_name, "vpn1");
        assert_eq!(config.ike_lifetime, IKE_LIFETIME_DEFAULT);
        assert_eq!(config.lifetime, LIFETIME_DEFAULT);
        assert_eq!(config.dpd_delay, DPD_DELAY_DEFAULT);
        assert_eq!(config.dpd_timeout, DPD_TIMEOUT_DEFAULT);
        assert_eq!(config.dpd_action, DpdAction::Restart);
        assert_eq!(config.mark, 0);
        assert_eq!(config.nego_mode, NegMode::Main);
        assert_eq!(config.key_exchange, KeyExchange::Ike);
    }

    #[test]
    fn test_ipsec_config_parse_full() {
        let config = IpsecConfig::from_fields(
            "vpn1",
            &fvs(&[
                ("remote_endpoint", "vpn.example.com"),
                ("local_auth_mode", "psk"),
                ("remote_auth_mode", "psk"),
                ("psk", "secret123"),
                ("local_subnets", "10.0.0.0/24 10.0.1.0/24"),
                ("remote_subnets", "172.16.0.0/16"),
                ("nego_mode", "aggressive"),
                ("key_exchange", "ikev2"),
                ("ike_lifetime", "7200"),
                ("ike_enc_suite", "aes256 aes128"),
                ("ike_auth_suite", "sha256"),
                ("ike_dh_groups", "14 5"),
                ("mark", "100"),
            ]),
        )
        .unwrap();

        assert_eq!(config.remote_endpoint.as_deref(), Some("vpn.example.com"));
        assert_eq!(config.local_auth_mode, Some(AuthMode::Psk));
        assert_eq!(config.psk.as_deref(), Some("secret123"));
        assert_eq!(config.local_subnets.len(), 2);
        assert_eq!(config.remote_subnets.len(), 1);
        assert_eq!(config.nego_mode, NegMode::Aggressive);
        assert_eq!(config.key_exchange, KeyExchange::Ikev2);
        assert_eq!(config.ike_lifetime, 7200);
        assert_eq!(config.lifetime, LIFETIME_DEFAULT);
        assert_eq!(config.ike_enc, vec![EncAlg::Aes256, EncAlg::Aes128]);
        assert_eq!(config.ike_integ, vec![IntegAlg::Sha256]);
        assert_eq!(config.ike_dh, vec![DhGroup::Group14, DhGroup::Group5]);
        assert_eq!(config.mark, 100);
    }

    #[test]
    fn test_ipsec_config_unknown_cipher_skipped() {
        let config = IpsecConfig::from_fields(
            "vpn1",
            &fvs(&[("ike_enc_suite", "aes256 chacha20 aes128")]),
        )
        .unwrap();
        assert_eq!(config.ike_enc, vec![EncAlg::Aes256, EncAlg::Aes128]);
    }

    #[test]
    fn test_ipsec_status_equality_includes_virt_ips() {
        let a = IpsecStatus {
            tunnel_name: "vpn1".to_string(),
            conn_state: ConnState::Up,
            local_ts: vec!["10.0.0.0/24".parse().unwrap()],
            remote_ts: vec!["172.16.0.0/16".parse().unwrap()],
            local_virt_ip: vec![],
        };
        let mut b = a.clone();
        assert_eq!(a, b);

        b.local_virt_ip.push("10.10.10.1".parse().unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_conn_state_strings() {
        assert_eq!(ConnState::Down.as_str(), "down");
        assert_eq!(ConnState::Connecting.as_str(), "connecting");
        assert_eq!(ConnState::Up.as_str(), "up");
        assert_eq!(ConnState::Error.as_str(), "error");
    }

    #[test]
    fn test_health_status_strings() {
        assert_eq!(HealthStatus::Na.as_str(), "na");
        assert_eq!(HealthStatus::Ok.as_str(), "ok");
        assert_eq!(HealthStatus::Nok.as_str(), "nok");
        assert_eq!(HealthStatus::Error.as_str(), "error");
    }

    #[test]
    fn test_iface_type_family() {
        assert!(!TunnelIfaceType::Vti.requires_ipv6());
        assert!(TunnelIfaceType::Vti6.requires_ipv6());
        assert!(TunnelIfaceType::Ip6Gre.requires_ipv6());
        assert!(!TunnelIfaceType::Gre.requires_ipv6());
        assert_eq!(TunnelIfaceType::from_str_opt("vti"), Some(TunnelIfaceType::Vti));
        assert_eq!(TunnelIfaceType::from_str_opt("bogus"), None);
    }
}
