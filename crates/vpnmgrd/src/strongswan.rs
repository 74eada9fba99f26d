//! strongSwan IPsec daemon controller.
//!
//! Exactly one instance exists per process, owned by the composition
//! root. It owns the on-disk config/secrets files, the charon daemon
//! process, and status acquisition. Reconfiguration is always a full
//! regenerate-and-restart, coalesced with a debounce timer: the
//! ipsec.conf interface has no reliable incremental reload for added
//! or changed conn sections.
//!
//! Status comes from two sources merged into one value per tunnel:
//! the `ipsec status <name>` CLI output (connection state, established
//! traffic selectors) and the per-tunnel status file the updown hook
//! maintains (assigned virtual IPs). The merged value is compared
//! field-wise against the last reported one and dispatched only on
//! change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use vpnmgr_common::{shell, VpnError, VpnResult};

use crate::commands::{build_ipsec_reload_cmd, build_ipsec_status_cmd};
use crate::types::{
    AuthMode, ConnState, DhGroup, DpdAction, EncAlg, IntegAlg, IpNet, IpsecMode, IpsecStatus,
    KeyExchange, NegMode, Role, MAX_SUBNETS,
};

/// Quiet period coalescing per-tunnel edits into one daemon restart.
pub const DAEMON_DEBOUNCE: Duration = Duration::from_millis(400);

/// Delay before the first status poll after a daemon start.
pub const POLL_AFTER: Duration = Duration::from_secs(5);

/// Status poll repeat interval.
pub const POLL_REPEAT: Duration = Duration::from_secs(5);

/// Enabled-but-down time after which a reload retry is issued.
pub const DOWN_RETRY_THRESHOLD: Duration = Duration::from_secs(30);

/// Status directory stat interval while the watch is active.
const STATUS_STAT_INTERVAL: Duration = Duration::from_millis(1010);

/// Quiet period of the status-watch debounce.
const MONITOR_DEBOUNCE_QUIET: Duration = Duration::from_millis(1040);

/// Upper bound on how long the status-watch debounce may defer a scan.
const MONITOR_DEBOUNCE_MAX: Duration = Duration::from_secs(5);

/// Separator between local and remote selectors in the status output.
const TS_SEPARATOR: &str = " === ";

/// Key of the virtual-IP line in the updown-hook status file.
const VIRT_IP4_KEYWORD: &str = "VIRT_IP4";

/// Filesystem and binary locations used by the controller.
#[derive(Debug, Clone)]
pub struct SwanPaths {
    /// Generated ipsec.conf location.
    pub conf_file: PathBuf,
    /// Generated ipsec.secrets location.
    pub secrets_file: PathBuf,
    /// Generated charon options file location.
    pub charon_conf_file: PathBuf,
    /// Directory where the updown hook writes per-tunnel status files.
    pub status_dir: PathBuf,
    /// The updown hook script path written into each conn section.
    pub updown_script: PathBuf,
    /// charon PID file.
    pub pid_file: PathBuf,
    /// The ipsec starter binary.
    pub starter_bin: PathBuf,
}

impl Default for SwanPaths {
    fn default() -> Self {
        Self {
            conf_file: PathBuf::from("/var/etc/ipsec.conf"),
            secrets_file: PathBuf::from("/var/etc/ipsec.secrets"),
            charon_conf_file: PathBuf::from("/var/etc/strongswan.d/charon.conf"),
            status_dir: PathBuf::from("/var/run/ipsec/status"),
            updown_script: PathBuf::from("/usr/vpnmgr/scripts/ipsec_updown.sh"),
            pid_file: PathBuf::from("/var/run/charon.pid"),
            starter_bin: PathBuf::from("/usr/sbin/ipsec"),
        }
    }
}

/// Per-tunnel daemon configuration record.
///
/// Field names follow the daemon's left/right convention: left is the
/// local side, right the remote side.
#[derive(Debug, Clone)]
pub struct SwanTunnel {
    pub name: String,
    pub enable: bool,
    pub left: Option<String>,
    pub right: Option<String>,
    pub leftid: Option<String>,
    pub rightid: Option<String>,
    pub leftsubnet: Vec<IpNet>,
    pub rightsubnet: Vec<IpNet>,
    pub leftsourceip: Vec<IpNet>,
    pub rightsourceip: Vec<IpNet>,
    pub leftauth: Option<AuthMode>,
    pub rightauth: Option<AuthMode>,
    pub leftauth2: Option<AuthMode>,
    pub rightauth2: Option<AuthMode>,
    pub psk: Option<String>,
    pub xauth_user: Option<String>,
    pub xauth_pass: Option<String>,
    pub eap_identity: Option<String>,
    pub eap_id: Option<String>,
    pub eap_secret: Option<String>,
    pub neg_mode: NegMode,
    pub key_exchange: KeyExchange,
    pub ike_lifetime: u32,
    pub lifetime: u32,
    pub role: Role,
    pub mode: IpsecMode,
    pub ike_enc: Vec<EncAlg>,
    pub ike_integ: Vec<IntegAlg>,
    pub ike_dh: Vec<DhGroup>,
    pub esp_enc: Vec<EncAlg>,
    pub esp_integ: Vec<IntegAlg>,
    pub esp_dh: Vec<DhGroup>,
    pub dpd_delay: u32,
    pub dpd_timeout: u32,
    pub dpd_action: DpdAction,
    /// 0 means unset; no mark option is emitted then.
    pub mark: u32,

    last_status: IpsecStatus,
    time_last_up: Instant,
}

impl SwanTunnel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enable: false,
            left: None,
            right: None,
            leftid: None,
            rightid: None,
            leftsubnet: Vec::new(),
            rightsubnet: Vec::new(),
            leftsourceip: Vec::new(),
            rightsourceip: Vec::new(),
            leftauth: None,
            rightauth: None,
            leftauth2: None,
            rightauth2: None,
            psk: None,
            xauth_user: None,
            xauth_pass: None,
            eap_identity: None,
            eap_id: None,
            eap_secret: None,
            neg_mode: NegMode::Main,
            key_exchange: KeyExchange::Ike,
            ike_lifetime: 0,
            lifetime: 0,
            role: Role::Initiator,
            mode: IpsecMode::Tunnel,
            ike_enc: Vec::new(),
            ike_integ: Vec::new(),
            ike_dh: Vec::new(),
            esp_enc: Vec::new(),
            esp_integ: Vec::new(),
            esp_dh: Vec::new(),
            dpd_delay: 0,
            dpd_timeout: 0,
            dpd_action: DpdAction::Restart,
            mark: 0,
            last_status: IpsecStatus::default(),
            time_last_up: Instant::now(),
        }
    }

    fn write_config_stanza(&self, out: &mut String, updown_script: &Path) {
        use std::fmt::Write;

        // Infallible for String; keeps the call sites readable.
        let w = out;

        let _ = writeln!(w, "conn \"{}\"", self.name);
        match self.role {
            Role::Initiator => {
                let _ = writeln!(w, "    auto=start");
            }
            Role::Responder => {
                let _ = writeln!(w, "    auto=add");
            }
        }
        match &self.left {
            Some(left) => {
                let _ = writeln!(w, "    left={}", left);
            }
            None => {
                let _ = writeln!(w, "    left=%defaultroute");
            }
        }
        if let Some(leftid) = &self.leftid {
            let _ = writeln!(w, "    leftid={}", leftid);
        }
        if let Some(right) = &self.right {
            let _ = writeln!(w, "    right={}", right);
        }
        if let Some(rightid) = &self.rightid {
            let _ = writeln!(w, "    rightid={}", rightid);
        }

        write_subnets(w, "leftsubnet", &self.leftsubnet, false);
        write_subnets(w, "rightsubnet", &self.rightsubnet, false);
        write_subnets(w, "leftsourceip", &self.leftsourceip, true);
        write_subnets(w, "rightsourceip", &self.rightsourceip, true);

        if let Some(auth) = self.leftauth {
            let _ = writeln!(w, "    leftauth={}", auth.as_str());
        }
        if let Some(auth) = self.rightauth {
            let _ = writeln!(w, "    rightauth={}", auth.as_str());
        }
        if let Some(auth) = self.leftauth2 {
            let _ = writeln!(w, "    leftauth2={}", auth.as_str());
        }
        if let Some(auth) = self.rightauth2 {
            let _ = writeln!(w, "    rightauth2={}", auth.as_str());
        }
        if let Some(eap_identity) = &self.eap_identity {
            let _ = writeln!(w, "    eap_identity={}", eap_identity);
        }

        let aggressive = if self.neg_mode == NegMode::Aggressive {
            "yes"
        } else {
            "no"
        };
        let _ = writeln!(w, "    aggressive={}", aggressive);

        match self.key_exchange {
            KeyExchange::Ikev1 => {
                let _ = writeln!(w, "    keyexchange=ikev1");
            }
            KeyExchange::Ikev2 => {
                let _ = writeln!(w, "    keyexchange=ikev2");
            }
            // Daemon default: either version.
            KeyExchange::Ike => {}
        }

        if self.ike_lifetime != 0 {
            let _ = writeln!(w, "    ikelifetime={}", self.ike_lifetime);
        }
        if self.lifetime != 0 {
            let _ = writeln!(w, "    lifetime={}", self.lifetime);
        }

        let _ = writeln!(w, "    type={}", self.mode.as_str());

        write_cipher_suite(
            w,
            "ike",
            &self.ike_enc,
            &self.ike_integ,
            &self.ike_dh,
        );
        write_cipher_suite(
            w,
            "esp",
            &self.esp_enc,
            &self.esp_integ,
            &self.esp_dh,
        );

        let _ = writeln!(w, "    dpddelay={}", self.dpd_delay);
        let _ = writeln!(w, "    dpdtimeout={}", self.dpd_timeout);
        let _ = writeln!(w, "    dpdaction={}", self.dpd_action.as_str());

        if self.mark != 0 {
            let _ = writeln!(w, "    mark={}", self.mark);
        }

        // The updown hook gives event-driven status monitoring and the
        // assigned virtual IPs (via PLUTO_ vars), which is more
        // reliable than parsing them out of the status output.
        let _ = writeln!(w, "    leftupdown=\"{}\"", updown_script.display());
        let _ = writeln!(w);
    }

    fn write_secrets_entry(&self, out: &mut String) {
        use std::fmt::Write;

        let _ = writeln!(out, "# {}", self.name);
        if let Some(psk) = &self.psk {
            let mut ids = String::new();
            if let Some(leftid) = &self.leftid {
                ids.push_str(leftid);
                ids.push(' ');
            }
            if let Some(rightid) = &self.rightid {
                ids.push_str(rightid);
                ids.push(' ');
            }
            let _ = writeln!(out, "{}: PSK \"{}\"", ids, psk);
        }
        if let (Some(user), Some(pass)) = (&self.xauth_user, &self.xauth_pass) {
            let _ = writeln!(out, "{} : XAUTH \"{}\"", user, pass);
        }
        if let (Some(id), Some(secret)) = (&self.eap_id, &self.eap_secret) {
            let _ = writeln!(out, "{} : EAP \"{}\"", id, secret);
        }
    }
}

fn write_subnets(out: &mut String, cfg_key: &str, subnets: &[IpNet], sourceip: bool) {
    use std::fmt::Write;

    for (i, net) in subnets.iter().enumerate() {
        if i == 0 {
            let _ = write!(out, "    {}=", cfg_key);
        } else {
            let _ = write!(out, ",");
        }
        if sourceip && net.is_unspecified_v4() {
            // All-zero means: request a virtual IP from the peer.
            let _ = write!(out, "%config");
        } else {
            let _ = write!(out, "{}", net);
        }
    }
    if !subnets.is_empty() {
        let _ = writeln!(out);
    }
}

fn write_cipher_suite(
    out: &mut String,
    cfg_key: &str,
    enc: &[EncAlg],
    integ: &[IntegAlg],
    dh: &[DhGroup],
) {
    use std::fmt::Write;

    if enc.is_empty() && integ.is_empty() && dh.is_empty() {
        return;
    }

    let parts: Vec<&str> = enc
        .iter()
        .map(|a| a.as_str())
        .chain(integ.iter().map(|a| a.as_str()))
        .chain(dh.iter().map(|a| a.as_str()))
        .collect();
    let _ = writeln!(out, "    {}={}!", cfg_key, parts.join("-"));
}

/// Parses one tunnel's section of `ipsec status <name>` output.
///
/// Up to three tunnel-prefixed lines matter: the phase-1 line
/// (ESTABLISHED/CONNECTING), the phase-2 line (INSTALLED), and the
/// established-traffic-selector line. A phase-2 line without its
/// selector line is an incomplete snapshot; that case, like unparsable
/// tunnel lines, returns None and the caller keeps the previous status
/// for that scan.
pub fn parse_status_output(tunnel_name: &str, output: &str) -> Option<IpsecStatus> {
    let mut status = IpsecStatus::down(tunnel_name);
    let mut phase1_up = false;
    let mut phase1_connecting = false;
    let mut phase2_up = false;
    let mut n = 0;

    // No tunnel line at all means the tunnel is simply down.
    let mut status_obtained = true;

    for line in output.lines() {
        let line = line.trim_start();
        if !line.starts_with(tunnel_name) {
            continue;
        }
        n += 1;
        status_obtained = false;

        match n {
            1 => {
                // e.g. "vpn1[3]: ESTABLISHED 14 minutes ago, ..."
                let rest = status_token(line)?;
                if rest == "ESTABLISHED" {
                    phase1_up = true;
                    status_obtained = true;
                } else if rest == "CONNECTING" {
                    phase1_connecting = true;
                    status_obtained = true;
                    break;
                }
            }
            2 => {
                // e.g. "vpn1{5}:  INSTALLED, TUNNEL, reqid 2, ..."
                let rest = status_token(line)?;
                if rest == "INSTALLED" {
                    phase2_up = true;
                }
            }
            3 => {
                // e.g. "vpn1{5}:   10.2.0.0/24 === 10.1.0.0/24"
                let rest = line.split_once(' ').map(|(_, r)| r.trim())?;
                let (left, right) = rest.split_once(TS_SEPARATOR)?;
                status.local_ts = parse_subnets_lossy(left);
                status.remote_ts = parse_subnets_lossy(right);
                status_obtained = true;
                break;
            }
            _ => break,
        }
    }

    if !status_obtained {
        return None;
    }

    status.conn_state = if phase1_connecting || (phase1_up && !phase2_up) {
        ConnState::Connecting
    } else if phase1_up && phase2_up {
        ConnState::Up
    } else {
        ConnState::Down
    };
    Some(status)
}

/// Second word of a status line, skipping runs of separators.
fn status_token(line: &str) -> Option<&str> {
    line.split(&[',', ' ']).filter(|s| !s.is_empty()).nth(1)
}

fn parse_subnets_lossy(s: &str) -> Vec<IpNet> {
    s.split_whitespace()
        .take(MAX_SUBNETS)
        .filter_map(|tok| match tok.parse() {
            Ok(net) => Some(net),
            Err(_) => {
                warn!(token = %tok, "Error parsing an IP/subnet from status output");
                None
            }
        })
        .collect()
}

/// Parses the updown-hook status file content into assigned virtual
/// IPs. Lines look like `VIRT_IP4 10.10.10.1 10.10.10.2`.
pub fn parse_updown_status(content: &str) -> Vec<IpNet> {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix(VIRT_IP4_KEYWORD) {
            return parse_subnets_lossy(rest);
        }
    }
    Vec::new()
}

/// Wrapper around the charon daemon process.
///
/// Started foreground (`--nofork`) under our supervision; the child
/// handle is killed on drop so a crashed manager never leaks a daemon.
struct DaemonProcess {
    starter_bin: PathBuf,
    pid_file: PathBuf,
    child: Option<Child>,
}

impl DaemonProcess {
    fn new(starter_bin: PathBuf, pid_file: PathBuf) -> Self {
        Self {
            starter_bin,
            pid_file,
            child: None,
        }
    }

    fn start(&mut self) -> VpnResult<()> {
        if self.child.is_some() {
            return Ok(());
        }
        let child = Command::new(&self.starter_bin)
            .arg("start")
            .arg("--daemon")
            .arg("charon")
            .arg("--nofork")
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VpnError::daemon("start", e.to_string()))?;
        if let Some(pid) = child.id() {
            if let Err(e) = std::fs::write(&self.pid_file, format!("{}\n", pid)) {
                warn!(path = %self.pid_file.display(), error = %e, "Error writing PID file");
            }
        }
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Error stopping IPsec daemon");
            }
        }
        if let Err(e) = std::fs::remove_file(&self.pid_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.pid_file.display(), error = %e, "Error removing PID file");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

/// The strongSwan daemon controller.
pub struct StrongSwan {
    tunnels: BTreeMap<String, SwanTunnel>,
    paths: SwanPaths,
    daemon: DaemonProcess,
    initialized: bool,

    /// Pending debounced restart deadline, if any.
    restart_deadline: Option<Instant>,
    /// Next periodic status poll, if polling is active.
    poll_deadline: Option<Instant>,
    /// Next status-directory stat, if the watch is active.
    stat_deadline: Option<Instant>,
    /// Pending watch debounce: (fire deadline, first trigger time).
    monitor_debounce: Option<(Instant, Instant)>,
    last_status_dir_mtime: Option<SystemTime>,

    #[cfg(test)]
    mock_mode: bool,

    #[cfg(test)]
    captured_commands: Vec<String>,

    #[cfg(test)]
    canned_status: std::collections::HashMap<String, String>,
}

impl StrongSwan {
    pub fn new(paths: SwanPaths) -> Self {
        let daemon = DaemonProcess::new(paths.starter_bin.clone(), paths.pid_file.clone());
        Self {
            tunnels: BTreeMap::new(),
            paths,
            daemon,
            initialized: false,
            restart_deadline: None,
            poll_deadline: None,
            stat_deadline: None,
            monitor_debounce: None,
            last_status_dir_mtime: None,
            #[cfg(test)]
            mock_mode: false,
            #[cfg(test)]
            captured_commands: Vec::new(),
            #[cfg(test)]
            canned_status: std::collections::HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn new_mock(paths: SwanPaths) -> Self {
        let mut swan = Self::new(paths);
        swan.mock_mode = true;
        swan
    }

    #[cfg(test)]
    pub fn set_canned_status(&mut self, tunnel: &str, output: &str) {
        self.canned_status
            .insert(tunnel.to_string(), output.to_string());
    }

    /// Returns the record for a tunnel, creating it when new.
    pub fn tunnel_entry(&mut self, name: &str) -> &mut SwanTunnel {
        self.tunnels
            .entry(name.to_string())
            .or_insert_with(|| SwanTunnel::new(name))
    }

    pub fn has_tunnel(&self, name: &str) -> bool {
        self.tunnels.contains_key(name)
    }

    /// Removes a tunnel record and schedules a reconfiguration so the
    /// daemon config no longer references it.
    pub fn remove_tunnel(&mut self, name: &str, now: Instant) -> VpnResult<()> {
        if self.tunnels.remove(name).is_some() {
            debug!(tunnel = %name, "Daemon tunnel record removed");
            self.apply_all(now)?;
        }
        Ok(())
    }

    /// Schedules a debounced full reconfiguration. Repeated calls
    /// within the quiet period coalesce into one restart.
    pub fn apply_all(&mut self, now: Instant) -> VpnResult<()> {
        self.init_once()?;
        self.restart_deadline = Some(now + DAEMON_DEBOUNCE);
        Ok(())
    }

    fn init_once(&mut self) -> VpnResult<()> {
        if self.initialized {
            return Ok(());
        }
        for path in [
            &self.paths.conf_file,
            &self.paths.secrets_file,
            &self.paths.charon_conf_file,
        ] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| VpnError::io(parent.display().to_string(), e))?;
            }
        }
        std::fs::create_dir_all(&self.paths.status_dir)
            .map_err(|e| VpnError::io(self.paths.status_dir.display().to_string(), e))?;

        // Keep charon from installing routes and virtual IPs itself;
        // routing stays under the manager's control.
        let charon_conf = "# Options for the charon IKE daemon.\n\
                           charon {\n\
                           \x20   install_routes = no\n\
                           \x20   install_virtual_ip = no\n\
                           }\n";
        std::fs::write(&self.paths.charon_conf_file, charon_conf)
            .map_err(|e| VpnError::io(self.paths.charon_conf_file.display().to_string(), e))?;

        self.initialized = true;
        debug!("IPsec daemon controller initialized");
        Ok(())
    }

    /// Renders the full config file over all enabled tunnels. The bool
    /// is true when at least one stanza was written.
    pub fn render_config(&self) -> (String, bool) {
        let mut out = String::new();
        out.push_str("config setup\n");
        out.push_str("    charondebug=\"cfg 2, dmn 2, ike 2, net 2\"\n\n");

        let mut wrote = false;
        for tunnel in self.tunnels.values() {
            if !tunnel.enable {
                debug!(tunnel = %tunnel.name, "Config: tunnel not enabled, skipping");
                continue;
            }
            tunnel.write_config_stanza(&mut out, &self.paths.updown_script);
            wrote = true;
        }
        (out, wrote)
    }

    /// Renders the full secrets file over all enabled tunnels.
    pub fn render_secrets(&self) -> (String, bool) {
        let mut out = String::from("# strongSwan IPsec secrets file\n\n");
        let mut wrote = false;
        for tunnel in self.tunnels.values() {
            if !tunnel.enable {
                continue;
            }
            tunnel.write_secrets_entry(&mut out);
            wrote = true;
        }
        (out, wrote)
    }

    /// The next instant at which `handle_deadlines` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.restart_deadline,
            self.poll_deadline,
            self.stat_deadline,
            self.monitor_debounce.map(|(fire, _)| fire),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Fires whichever deadlines are due at `now`. Returns the tunnel
    /// statuses that changed, for dispatch through the reconcilers.
    pub async fn handle_deadlines(&mut self, now: Instant) -> Vec<IpsecStatus> {
        if self.restart_deadline.is_some_and(|d| d <= now) {
            self.restart_deadline = None;
            self.apply_all_now(now).await;
        }

        if self.stat_deadline.is_some_and(|d| d <= now) {
            self.stat_deadline = Some(now + STATUS_STAT_INTERVAL);
            if self.status_dir_changed() {
                self.arm_monitor_debounce(now);
            }
        }

        let mut scan = false;
        if self.monitor_debounce.is_some_and(|(fire, _)| fire <= now) {
            self.monitor_debounce = None;
            scan = true;
        }
        if self.poll_deadline.is_some_and(|d| d <= now) {
            self.poll_deadline = Some(now + POLL_REPEAT);
            scan = true;
        }

        if scan {
            self.check_status(now).await
        } else {
            Vec::new()
        }
    }

    /// The debounced restart: stop, regenerate, start, arm status
    /// acquisition. With zero enabled tunnels the daemon stays stopped.
    async fn apply_all_now(&mut self, now: Instant) {
        info!("Stopping IPsec daemon for reconfiguration");
        self.daemon_stop().await;

        // Stale files must not linger while the daemon is stopped.
        for path in [&self.paths.conf_file, &self.paths.secrets_file] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Error removing ipsec file");
                }
            }
        }

        let (config, wrote_config) = self.render_config();
        if !wrote_config {
            debug!("No enabled tunnel produced config; daemon left stopped");
            return;
        }
        let (secrets, _) = self.render_secrets();

        if let Err(e) = std::fs::write(&self.paths.conf_file, config) {
            warn!(path = %self.paths.conf_file.display(), error = %e, "Error writing ipsec config");
            return;
        }
        if let Err(e) = std::fs::write(&self.paths.secrets_file, secrets) {
            warn!(path = %self.paths.secrets_file.display(), error = %e, "Error writing ipsec secrets");
            return;
        }

        // Baseline for the down-retry heuristic: everything counts as
        // freshly up at start time.
        for tunnel in self.tunnels.values_mut() {
            if tunnel.enable {
                tunnel.time_last_up = now;
            }
        }

        if let Err(e) = self.daemon_start() {
            warn!(error = %e, "Error starting IPsec daemon");
            return;
        }
        info!("IPsec daemon started");

        self.poll_deadline = Some(now + POLL_AFTER);
        self.stat_deadline = Some(now + STATUS_STAT_INTERVAL);
        self.last_status_dir_mtime = self.status_dir_mtime();
    }

    fn daemon_start(&mut self) -> VpnResult<()> {
        #[cfg(test)]
        if self.mock_mode {
            self.captured_commands.push("daemon start".to_string());
            return Ok(());
        }
        self.daemon.start()
    }

    async fn daemon_stop(&mut self) {
        #[cfg(test)]
        if self.mock_mode {
            self.captured_commands.push("daemon stop".to_string());
            return;
        }
        self.daemon.stop().await;
    }

    async fn exec(&mut self, cmd: &str) -> VpnResult<String> {
        #[cfg(test)]
        if self.mock_mode {
            self.captured_commands.push(cmd.to_string());
            return Ok(String::new());
        }
        shell::exec_or_throw(cmd).await
    }

    fn status_dir_mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.paths.status_dir)
            .and_then(|m| m.modified())
            .ok()
    }

    fn status_dir_changed(&mut self) -> bool {
        let mtime = self.status_dir_mtime();
        if mtime != self.last_status_dir_mtime {
            self.last_status_dir_mtime = mtime;
            return true;
        }
        false
    }

    /// Coalesces bursts of status-file events: fire after the quiet
    /// period, but never later than the cap past the first trigger.
    fn arm_monitor_debounce(&mut self, now: Instant) {
        let first = self.monitor_debounce.map(|(_, f)| f).unwrap_or(now);
        let fire = (now + MONITOR_DEBOUNCE_QUIET).min(first + MONITOR_DEBOUNCE_MAX);
        self.monitor_debounce = Some((fire, first));
    }

    async fn query_status(&mut self, tunnel_name: &str) -> VpnResult<String> {
        #[cfg(test)]
        if self.mock_mode {
            return Ok(self
                .canned_status
                .get(tunnel_name)
                .cloned()
                .unwrap_or_default());
        }
        let cmd = build_ipsec_status_cmd(tunnel_name);
        shell::exec_or_throw(&cmd).await
    }

    /// One status scan over all tunnels. Merges CLI and updown-file
    /// sources, dedupes against the last reported value, and handles
    /// the stuck-down retry.
    pub async fn check_status(&mut self, now: Instant) -> Vec<IpsecStatus> {
        if self.tunnels.is_empty() {
            // Nothing to watch anymore.
            self.poll_deadline = None;
            self.stat_deadline = None;
            self.monitor_debounce = None;
            return Vec::new();
        }

        let names: Vec<String> = self.tunnels.keys().cloned().collect();
        let mut changed = Vec::new();

        for name in names {
            let output = match self.query_status(&name).await {
                Ok(out) => out,
                Err(e) => {
                    warn!(tunnel = %name, error = %e, "Error querying ipsec status");
                    continue;
                }
            };
            let Some(mut status) = parse_status_output(&name, &output) else {
                warn!(tunnel = %name, "Error parsing ipsec status output");
                continue;
            };

            // The updown hook deletes the file when the tunnel drops;
            // absence just means no virtual IPs.
            let status_file = self.paths.status_dir.join(&name);
            match std::fs::read_to_string(&status_file) {
                Ok(content) => status.local_virt_ip = parse_updown_status(&content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(tunnel = %name, error = %e, "Error reading updown status file");
                }
            }

            let Some(tunnel) = self.tunnels.get_mut(&name) else {
                continue;
            };

            if tunnel.last_status != status {
                info!(
                    tunnel = %name,
                    status = %status.conn_state,
                    "Tunnel connection status changed"
                );
                tunnel.last_status = status.clone();
                changed.push(status);
            }

            let tunnel = &self.tunnels[&name];
            if tunnel.enable && tunnel.last_status.conn_state == ConnState::Down {
                let time_down = now.duration_since(tunnel.time_last_up);
                if time_down >= DOWN_RETRY_THRESHOLD {
                    info!(
                        tunnel = %name,
                        down_secs = time_down.as_secs(),
                        "Tunnel enabled but down, issuing reload retry"
                    );
                    // Down tunnels are not re-initiated by the daemon on
                    // its own; a reload kicks off a fresh attempt.
                    let cmd = build_ipsec_reload_cmd();
                    if let Err(e) = self.exec(&cmd).await {
                        warn!(error = %e, "Error reloading IPsec daemon");
                    }
                    if let Some(tunnel) = self.tunnels.get_mut(&name) {
                        // Optimistic reset avoids a tight retry loop.
                        tunnel.time_last_up = now;
                    }
                }
            } else if let Some(tunnel) = self.tunnels.get_mut(&name) {
                tunnel.time_last_up = now;
            }
        }

        changed
    }

    /// Whether the daemon process is currently running.
    pub fn daemon_running(&self) -> bool {
        self.daemon.is_running()
    }
}
