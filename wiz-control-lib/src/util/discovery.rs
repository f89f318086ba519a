use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use derivative::Derivative;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::ControlError;
use crate::store::DeviceStore;
use crate::util::broadcast::{resolve_candidates, NetworkCandidate, Provenance};
use crate::util::invoker::WizTool;
use crate::util::parse::{parse_discovery, DeviceState};

/// A bulb that answered a discovery broadcast.
///
/// Keyed by IP: hashing and equality ignore everything else, since the state
/// snapshot and timestamp change on every refresh while the device stays
/// the same.
#[derive(Derivative)]
#[derivative(Hash, PartialEq, Eq)]
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    pub ip: Ipv4Addr,

    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub mac: Option<String>,

    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub module_name: Option<String>,

    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub state: DeviceState,

    /// Response fields this layer does not interpret. Kept so fields added
    /// by newer firmware survive normalization.
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub extra: Map<String, Value>,

    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub last_seen: DateTime<Utc>,
}

impl DiscoveredDevice {
    pub fn new(ip: Ipv4Addr) -> Self {
        DiscoveredDevice {
            ip,
            mac: None,
            module_name: None,
            state: DeviceState::default(),
            extra: Map::new(),
            last_seen: Utc::now(),
        }
    }

    /// Display label for device lists: module name when known, else the IP.
    pub fn label(&self) -> String {
        match &self.module_name {
            Some(name) => format!("{} ({})", name, self.ip),
            None => self.ip.to_string(),
        }
    }
}

impl Display for DiscoveredDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// How discovery chooses which network(s) to broadcast on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// One explicit broadcast address, validated before any spawn.
    Single(String),
    /// Resolver candidates in priority order, stopping at the first
    /// candidate that yields at least one device.
    Auto,
    /// Every resolver candidate, results merged and deduplicated by IP.
    ScanAll,
}

/// Outcome of one discovery run. Per-candidate problems end up in
/// `diagnostics` rather than aborting the run.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub devices: Vec<DiscoveredDevice>,
    pub diagnostics: Vec<String>,
}

/// Coordinates discovery broadcasts across candidate networks and keeps
/// the shared device store in sync with what answered.
pub struct Discovery {
    tool: WizTool,
    store: Arc<DeviceStore>,

    // Serializes sweeps; a second discover() call queues behind the first.
    gate: Mutex<()>,
}

impl Discovery {
    pub fn new(tool: WizTool, store: Arc<DeviceStore>) -> Self {
        Discovery {
            tool,
            store,
            gate: Mutex::new(()),
        }
    }

    /// Runs one discovery sweep. `given_timeout` bounds each individual
    /// broadcast attempt, not the sweep as a whole.
    ///
    /// Fails with [`ControlError::InvalidBroadcastAddress`] before spawning
    /// anything in Single mode, with [`ControlError::ExecutableNotFound`] if
    /// the tool is gone, and with [`ControlError::NoDevicesFound`] only when
    /// every candidate attempt errored. An empty but clean sweep is `Ok`.
    pub async fn discover(
        &self,
        mode: DiscoveryMode,
        given_timeout: Duration,
    ) -> Result<DiscoveryReport, ControlError> {
        let _running = self.gate.lock().await;

        match mode {
            DiscoveryMode::Single(ref addr) => {
                let addr = validate_broadcast(addr)?;
                let candidates = vec![NetworkCandidate {
                    addr,
                    provenance: Provenance::AutoDetected,
                }];
                // A single-address sweep deliberately covers one network;
                // devices known from other networks stay in the store.
                self.sweep(&candidates, given_timeout, false, false).await
            }
            DiscoveryMode::Auto => {
                let candidates = resolve_candidates();
                self.sweep(&candidates, given_timeout, true, true).await
            }
            DiscoveryMode::ScanAll => {
                let candidates = resolve_candidates();
                self.sweep(&candidates, given_timeout, false, true).await
            }
        }
    }

    async fn sweep(
        &self,
        candidates: &[NetworkCandidate],
        given_timeout: Duration,
        stop_at_first_hit: bool,
        retire_missing: bool,
    ) -> Result<DiscoveryReport, ControlError> {
        let mut devices: Vec<DiscoveredDevice> = Vec::new();
        let mut diagnostics = Vec::new();
        let mut attempts = 0usize;
        let mut failures = 0usize;

        for candidate in candidates {
            attempts += 1;
            info!("Broadcasting discovery on {candidate}");
            match self.try_candidate(candidate.addr, given_timeout).await {
                Ok((found, note)) => {
                    if let Some(note) = note {
                        diagnostics.push(format!("{candidate}: {note}"));
                    } else if found.is_empty() {
                        debug!("No devices answered on {candidate}");
                        diagnostics.push(format!("{candidate}: no devices answered"));
                    }
                    let had_hit = !found.is_empty();
                    merge_devices(&mut devices, found);
                    if stop_at_first_hit && had_hit {
                        break;
                    }
                }
                // The binary disappearing is fatal for the whole sweep;
                // anything else only rules out this candidate network.
                Err(e @ ControlError::ExecutableNotFound { .. }) => return Err(e),
                Err(e) => {
                    failures += 1;
                    warn!("Discovery on {candidate} failed: {e}");
                    diagnostics.push(format!("{candidate}: {e}"));
                }
            }
        }

        if devices.is_empty() && failures == attempts {
            return Err(ControlError::NoDevicesFound { attempts });
        }

        for device in &devices {
            self.store.upsert(device.clone());
        }
        if retire_missing {
            let seen: HashSet<Ipv4Addr> = devices.iter().map(|d| d.ip).collect();
            self.store.retire_missing(&seen);
        }

        info!(
            "Discovery finished: {} device(s), {} diagnostic(s)",
            devices.len(),
            diagnostics.len()
        );
        Ok(DiscoveryReport {
            devices,
            diagnostics,
        })
    }

    /// Prints a fixed-width device table for terminal consumption.
    pub fn pretty_print_devices(devices: &[DiscoveredDevice]) {
        let ip_width = devices
            .iter()
            .map(|d| d.ip.to_string().len())
            .max()
            .unwrap_or(0)
            .max("IP Address".len());
        let mac_width = devices
            .iter()
            .map(|d| d.mac.as_deref().unwrap_or("-").len())
            .max()
            .unwrap_or(0)
            .max("MAC Address".len());
        let module_width = devices
            .iter()
            .map(|d| d.module_name.as_deref().unwrap_or("-").len())
            .max()
            .unwrap_or(0)
            .max("Module".len());

        println!(
            "{:<ip_width$}  {:<mac_width$}  {:<module_width$}  {:<5}  {:>10}",
            "IP Address", "MAC Address", "Module", "Power", "Brightness",
        );
        println!(
            "{:<ip_width$}  {:<mac_width$}  {:<module_width$}  {:<5}  {:>10}",
            "-".repeat(ip_width),
            "-".repeat(mac_width),
            "-".repeat(module_width),
            "-".repeat(5),
            "-".repeat(10),
        );
        for device in devices {
            let power = match device.state.power {
                Some(true) => "on",
                Some(false) => "off",
                None => "?",
            };
            let brightness = device
                .state
                .brightness
                .map(|b| format!("{b}%"))
                .unwrap_or_else(|| "?".to_string());
            println!(
                "{:<ip_width$}  {:<mac_width$}  {:<module_width$}  {:<5}  {:>10}",
                device.ip.to_string(),
                device.mac.as_deref().unwrap_or("-"),
                device.module_name.as_deref().unwrap_or("-"),
                power,
                brightness,
            );
        }
    }

    async fn try_candidate(
        &self,
        addr: Ipv4Addr,
        given_timeout: Duration,
    ) -> Result<(Vec<DiscoveredDevice>, Option<String>), ControlError> {
        let args = vec![
            "discover".to_string(),
            "--bcast".to_string(),
            addr.to_string(),
        ];
        let output = self.tool.invoke(&args, given_timeout).await?;

        // The tool exits non-zero when nothing answers the broadcast. That
        // is an empty result, not a failure; stderr becomes a diagnostic.
        let parsed = parse_discovery(&output.stdout);
        let mut note = parsed.note;
        if !output.success() && parsed.devices.is_empty() && !output.stderr.is_empty() {
            note = Some(format!(
                "tool exited {:?}: {}",
                output.status, output.stderr
            ));
        }
        Ok((parsed.devices, note))
    }
}

/// Checks that `addr` is a syntactically valid dotted-quad IPv4 address.
/// No network call is made; failures are immediate.
pub fn validate_broadcast(addr: &str) -> Result<Ipv4Addr, ControlError> {
    Ipv4Addr::from_str(addr.trim())
        .map_err(|_| ControlError::InvalidBroadcastAddress(addr.to_string()))
}

/// Merges newly found devices into the accumulated list. Presence is
/// first-come per IP; state fields the newer response carries overwrite.
fn merge_devices(accumulated: &mut Vec<DiscoveredDevice>, found: Vec<DiscoveredDevice>) {
    for device in found {
        match accumulated.iter_mut().find(|d| d.ip == device.ip) {
            Some(existing) => {
                if existing.mac.is_none() {
                    existing.mac = device.mac;
                }
                if existing.module_name.is_none() {
                    existing.module_name = device.module_name;
                }
                existing.state.merge_from(&device.state);
                existing.extra.extend(device.extra);
                existing.last_seen = device.last_seen;
            }
            None => accumulated.push(device),
        }
    }
}
