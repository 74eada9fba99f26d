//! Table and field name constants for vpnmgrd

// Config tables (watched)
pub const VPN_TUNNEL_TABLE: &str = "VPN_Tunnel";
pub const IPSEC_CONFIG_TABLE: &str = "IPSec_Config";
pub const TUNNEL_INTERFACE_TABLE: &str = "Tunnel_Interface";

// State tables (written)
pub const IPSEC_STATE_TABLE: &str = "IPSec_State";

/// VPN_Tunnel table fields
pub mod tunnel_fields {
    pub const NAME: &str = "name";
    pub const ENABLE: &str = "enable";
    pub const TUNNEL_STATUS: &str = "tunnel_status";
    pub const HEALTHCHECK_ENABLE: &str = "healthcheck_enable";
    pub const HEALTHCHECK_IP: &str = "healthcheck_ip";
    pub const HEALTHCHECK_INTERVAL: &str = "healthcheck_interval";
    pub const HEALTHCHECK_TIMEOUT: &str = "healthcheck_timeout";
    pub const HEALTHCHECK_SRC: &str = "healthcheck_src";
    pub const HEALTHCHECK_STATUS: &str = "healthcheck_status";
}

/// IPSec_Config / IPSec_State table fields
pub mod ipsec_fields {
    pub const TUNNEL_NAME: &str = "tunnel_name";
    pub const LOCAL_ENDPOINT: &str = "local_endpoint";
    pub const REMOTE_ENDPOINT: &str = "remote_endpoint";
    pub const LOCAL_ENDPOINT_ID: &str = "local_endpoint_id";
    pub const REMOTE_ENDPOINT_ID: &str = "remote_endpoint_id";
    pub const LOCAL_SUBNETS: &str = "local_subnets";
    pub const REMOTE_SUBNETS: &str = "remote_subnets";
    pub const LOCAL_VIRT_IP: &str = "local_virt_ip";
    pub const REMOTE_VIRT_IP: &str = "remote_virt_ip";
    pub const LOCAL_AUTH_MODE: &str = "local_auth_mode";
    pub const REMOTE_AUTH_MODE: &str = "remote_auth_mode";
    pub const LOCAL_AUTH_MODE2: &str = "local_auth_mode2";
    pub const REMOTE_AUTH_MODE2: &str = "remote_auth_mode2";
    pub const PSK: &str = "psk";
    pub const XAUTH_USER: &str = "xauth_user";
    pub const XAUTH_PASS: &str = "xauth_pass";
    pub const EAP_IDENTITY: &str = "eap_identity";
    pub const EAP_ID: &str = "eap_id";
    pub const EAP_SECRET: &str = "eap_secret";
    pub const NEGO_MODE: &str = "nego_mode";
    pub const KEY_EXCHANGE: &str = "key_exchange";
    pub const IKE_LIFETIME: &str = "ike_lifetime";
    pub const LIFETIME: &str = "lifetime";
    pub const PROTOCOL: &str = "protocol";
    pub const IKE_ENC_SUITE: &str = "ike_enc_suite";
    pub const IKE_AUTH_SUITE: &str = "ike_auth_suite";
    pub const IKE_DH_GROUPS: &str = "ike_dh_groups";
    pub const ESP_ENC_SUITE: &str = "esp_enc_suite";
    pub const ESP_AUTH_SUITE: &str = "esp_auth_suite";
    pub const ESP_DH_GROUPS: &str = "esp_dh_groups";
    pub const DPD_DELAY: &str = "dpd_delay";
    pub const DPD_TIMEOUT: &str = "dpd_timeout";
    pub const MARK: &str = "mark";
}

/// Tunnel_Interface table fields
pub mod iface_fields {
    pub const IF_NAME: &str = "if_name";
    pub const IF_TYPE: &str = "if_type";
    pub const MODE: &str = "mode";
    pub const LOCAL_ENDPOINT_ADDR: &str = "local_endpoint_addr";
    pub const REMOTE_ENDPOINT_ADDR: &str = "remote_endpoint_addr";
    pub const KEY: &str = "key";
    pub const DEV_IF_NAME: &str = "dev_if_name";
    pub const ENABLE: &str = "enable";
    pub const STATUS: &str = "status";
}
