use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::ValueEnum;
use dashmap::DashMap;
use lazy_static::lazy_static;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::ControlError;
use crate::store::DeviceStore;
use crate::util::invoker::{WizTool, COMMAND_TIMEOUT};
use crate::util::parse::{normalize_status, parse_payload, DeviceState, Rgb};

/// One controllable operation.
///
/// Parameter domains are checked by [`CommandSpec::validate`] before an
/// argument list is ever built; the external tool never sees out-of-range
/// values it might accept ambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TurnOn,
    TurnOff,
    /// Brightness percentage, 0-100.
    SetBrightness { percent: u8 },
    SetRgb { rgb: Rgb },
    /// Color temperature in Kelvin, 1000-8000.
    SetTemperature { kelvin: u16 },
    /// Scene id, 1-32.
    SetScene { scene: u8 },
    /// Effect speed percentage, 0-100.
    SetSpeed { percent: u8 },
    /// Query the bulb's pilot state.
    Status,
    /// Query static device information.
    DeviceInfo,
    Reboot,
}

impl Command {
    fn subcommand(&self) -> &'static str {
        match self {
            Command::TurnOn => "on",
            Command::TurnOff => "off",
            Command::SetBrightness { .. } => "setbrightness",
            Command::SetRgb { .. } => "setrgbcolor",
            Command::SetTemperature { .. } => "setcolortemp",
            Command::SetScene { .. } => "setscene",
            Command::SetSpeed { .. } => "setspeed",
            Command::Status => "status",
            Command::DeviceInfo => "getdeviceinfo",
            Command::Reboot => "reboot",
        }
    }

    /// The state delta to fold into the cache once the tool reports
    /// success, so the front-end reflects the change before the next
    /// periodic refresh confirms it.
    fn optimistic_state(&self) -> Option<DeviceState> {
        let mut delta = DeviceState::default();
        match *self {
            Command::TurnOn => delta.power = Some(true),
            Command::TurnOff => delta.power = Some(false),
            Command::SetBrightness { percent } => delta.brightness = Some(percent),
            Command::SetRgb { rgb } => delta.rgb = Some(rgb),
            Command::SetTemperature { kelvin } => delta.temperature = Some(kelvin),
            Command::SetScene { scene } => delta.scene = Some(scene),
            Command::SetSpeed { percent } => delta.speed = Some(percent),
            Command::Status | Command::DeviceInfo | Command::Reboot => return None,
        }
        Some(delta)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subcommand())
    }
}

/// A pre-validated operation targeting exactly one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub ip: Ipv4Addr,
    pub command: Command,
}

impl CommandSpec {
    pub fn new(ip: Ipv4Addr, command: Command) -> Self {
        CommandSpec { ip, command }
    }

    /// Checks every parameter against its domain. RGB components are
    /// range-safe by type; the rest carry wider types than their domains.
    pub fn validate(&self) -> Result<(), ControlError> {
        match self.command {
            Command::SetBrightness { percent } if percent > 100 => {
                Err(ControlError::InvalidParameter {
                    name: "brightness",
                    value: percent as i64,
                    allowed: "0-100",
                })
            }
            Command::SetTemperature { kelvin } if !(1000..=8000).contains(&kelvin) => {
                Err(ControlError::InvalidParameter {
                    name: "temperature",
                    value: kelvin as i64,
                    allowed: "1000-8000",
                })
            }
            Command::SetScene { scene } if !(1..=32).contains(&scene) => {
                Err(ControlError::InvalidParameter {
                    name: "scene",
                    value: scene as i64,
                    allowed: "1-32",
                })
            }
            Command::SetSpeed { percent } if percent > 100 => {
                Err(ControlError::InvalidParameter {
                    name: "speed",
                    value: percent as i64,
                    allowed: "0-100",
                })
            }
            _ => Ok(()),
        }
    }

    /// Argument list for the external tool.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.command.subcommand().to_string(),
            "--ip".to_string(),
            self.ip.to_string(),
        ];
        match self.command {
            Command::SetBrightness { percent } => {
                args.extend(["--dim".to_string(), percent.to_string()]);
            }
            Command::SetRgb { rgb } => {
                args.extend([
                    "--r".to_string(),
                    rgb.red.to_string(),
                    "--g".to_string(),
                    rgb.green.to_string(),
                    "--b".to_string(),
                    rgb.blue.to_string(),
                ]);
            }
            Command::SetTemperature { kelvin } => {
                args.extend(["--temp".to_string(), kelvin.to_string()]);
            }
            Command::SetScene { scene } => {
                args.extend(["--scene".to_string(), scene.to_string()]);
            }
            Command::SetSpeed { percent } => {
                args.extend(["--speed".to_string(), percent.to_string()]);
            }
            _ => {}
        }
        args
    }
}

/// Outcome of one dispatched command.
///
/// Fatal conditions are returned as errors, never inside a result, so a
/// success payload and a fatal error cannot coexist. `success: false` with
/// a payload means the tool ran and answered with an error document.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub success: bool,
    /// Parsed JSON payload, when the tool produced one.
    pub payload: Option<Value>,
    /// Raw stdout, kept only when it could not be parsed.
    pub raw: Option<String>,
    /// Diagnostic detail: parse notes or stderr.
    pub detail: Option<String>,
}

lazy_static! {
    /// Scene names by id, as the bulbs themselves number them.
    static ref SCENE_NAMES: Vec<(u8, &'static str)> = vec![
        (1, "Ocean"),
        (2, "Romance"),
        (3, "Sunset"),
        (4, "Party"),
        (5, "Fireplace"),
        (6, "Cozy"),
        (7, "Forest"),
        (8, "Pastel Colors"),
        (9, "Wake up"),
        (10, "Bedtime"),
        (11, "Warm White"),
        (12, "Daylight"),
        (13, "Cool white"),
        (14, "Night light"),
        (15, "Focus"),
        (16, "Relax"),
        (17, "True colors"),
        (18, "TV time"),
        (19, "Plantgrowth"),
        (20, "Spring"),
        (21, "Summer"),
        (22, "Fall"),
        (23, "Deepdive"),
        (24, "Jungle"),
        (25, "Mojito"),
        (26, "Club"),
        (27, "Christmas"),
        (28, "Halloween"),
        (29, "Candlelight"),
        (30, "Golden white"),
        (31, "Pulse"),
        (32, "Steampunk"),
    ];
}

/// Name of a scene id, if the id is a known one.
pub fn scene_name(id: u8) -> Option<&'static str> {
    SCENE_NAMES
        .iter()
        .find(|(scene_id, _)| *scene_id == id)
        .map(|(_, name)| *name)
}

/// All known scenes as `(id, name)` pairs, in id order.
pub fn scene_list() -> &'static [(u8, &'static str)] {
    &SCENE_NAMES
}

/// Named colors accepted on the command line as a convenience over raw
/// RGB components.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliColor {
    Red,
    Green,
    Blue,
    White,
    Yellow,
    Orange,
    Purple,
    Cyan,
    Magenta,
    Pink,
}

impl From<CliColor> for Rgb {
    fn from(color: CliColor) -> Self {
        let (red, green, blue) = match color {
            CliColor::Red => (255, 0, 0),
            CliColor::Green => (0, 255, 0),
            CliColor::Blue => (0, 0, 255),
            CliColor::White => (255, 255, 255),
            CliColor::Yellow => (255, 255, 0),
            CliColor::Orange => (255, 165, 0),
            CliColor::Purple => (128, 0, 128),
            CliColor::Cyan => (0, 255, 255),
            CliColor::Magenta => (255, 0, 255),
            CliColor::Pink => (255, 192, 203),
        };
        Rgb { red, green, blue }
    }
}

/// Issues control commands to bulbs through the external tool and keeps
/// the shared store's state snapshots current.
pub struct ControlInterface {
    tool: WizTool,
    store: Arc<DeviceStore>,

    // One lock per target IP: commands to the same bulb run in issue
    // order, commands to different bulbs run concurrently.
    device_locks: DashMap<Ipv4Addr, Arc<Mutex<()>>>,
}

impl ControlInterface {
    pub fn new(tool: WizTool, store: Arc<DeviceStore>) -> Self {
        ControlInterface {
            tool,
            store,
            device_locks: DashMap::new(),
        }
    }

    /// Dispatches one command: validate, invoke, parse, update the cache.
    ///
    /// Validation failures and tool-level failures come back as errors;
    /// an error document from a tool that ran fine comes back as a
    /// [`CommandResult`] with `success: false`.
    pub async fn dispatch(&self, spec: CommandSpec) -> Result<CommandResult, ControlError> {
        spec.validate()?;

        let lock = self.device_lock(spec.ip);
        let _serialized = lock.lock().await;

        let args = spec.args();
        let output = self.tool.invoke(&args, COMMAND_TIMEOUT).await?;
        let parsed = parse_payload(&output.stdout);

        if !output.success() && parsed.json.is_none() {
            return Err(ControlError::CommandFailed {
                args,
                status: output.status,
                stderr: output.stderr,
            });
        }

        if !output.success() {
            warn!(
                "{} against {} exited {:?} with payload",
                spec.command, spec.ip, output.status
            );
            return Ok(CommandResult {
                success: false,
                payload: parsed.json,
                raw: None,
                detail: non_empty(output.stderr).or(parsed.note),
            });
        }

        self.update_cache(&spec, parsed.json.as_ref());

        let raw = if parsed.json.is_none() {
            non_empty(output.stdout)
        } else {
            None
        };
        Ok(CommandResult {
            success: true,
            payload: parsed.json,
            raw,
            detail: parsed.note,
        })
    }

    /// Folds a successful command into the cached device record: queries
    /// merge what the bulb reported, mutations merge what was just set.
    fn update_cache(&self, spec: &CommandSpec, payload: Option<&Value>) {
        match spec.command {
            Command::Status | Command::DeviceInfo => {
                if let Some((state, extra)) = payload.and_then(normalize_status) {
                    self.store.record_state(spec.ip, &state, extra);
                }
            }
            _ => {
                if let Some(delta) = spec.command.optimistic_state() {
                    debug!("Optimistically caching {} for {}", spec.command, spec.ip);
                    self.store.record_state(spec.ip, &delta, Default::default());
                }
            }
        }
    }

    fn device_lock(&self, ip: Ipv4Addr) -> Arc<Mutex<()>> {
        self.device_locks
            .entry(ip)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn turn_on(&self, ip: Ipv4Addr) -> Result<CommandResult, ControlError> {
        self.dispatch(CommandSpec::new(ip, Command::TurnOn)).await
    }

    pub async fn turn_off(&self, ip: Ipv4Addr) -> Result<CommandResult, ControlError> {
        self.dispatch(CommandSpec::new(ip, Command::TurnOff)).await
    }

    pub async fn set_brightness(
        &self,
        ip: Ipv4Addr,
        percent: u8,
    ) -> Result<CommandResult, ControlError> {
        self.dispatch(CommandSpec::new(ip, Command::SetBrightness { percent }))
            .await
    }

    pub async fn set_rgb(&self, ip: Ipv4Addr, rgb: Rgb) -> Result<CommandResult, ControlError> {
        self.dispatch(CommandSpec::new(ip, Command::SetRgb { rgb }))
            .await
    }

    pub async fn set_temperature(
        &self,
        ip: Ipv4Addr,
        kelvin: u16,
    ) -> Result<CommandResult, ControlError> {
        self.dispatch(CommandSpec::new(ip, Command::SetTemperature { kelvin }))
            .await
    }

    pub async fn set_scene(&self, ip: Ipv4Addr, scene: u8) -> Result<CommandResult, ControlError> {
        self.dispatch(CommandSpec::new(ip, Command::SetScene { scene }))
            .await
    }

    pub async fn set_speed(
        &self,
        ip: Ipv4Addr,
        percent: u8,
    ) -> Result<CommandResult, ControlError> {
        self.dispatch(CommandSpec::new(ip, Command::SetSpeed { percent }))
            .await
    }

    pub async fn status(&self, ip: Ipv4Addr) -> Result<CommandResult, ControlError> {
        self.dispatch(CommandSpec::new(ip, Command::Status)).await
    }

    pub async fn device_info(&self, ip: Ipv4Addr) -> Result<CommandResult, ControlError> {
        self.dispatch(CommandSpec::new(ip, Command::DeviceInfo))
            .await
    }

    pub async fn reboot(&self, ip: Ipv4Addr) -> Result<CommandResult, ControlError> {
        self.dispatch(CommandSpec::new(ip, Command::Reboot)).await
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: Command) -> CommandSpec {
        CommandSpec::new(Ipv4Addr::new(192, 168, 1, 30), command)
    }

    #[test]
    fn test_validate_rejects_out_of_range_brightness() {
        let err = spec(Command::SetBrightness { percent: 150 })
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::InvalidParameter {
                name: "brightness",
                value: 150,
                ..
            }
        ));
    }

    #[test]
    fn test_validate_temperature_bounds() {
        assert!(spec(Command::SetTemperature { kelvin: 999 })
            .validate()
            .is_err());
        assert!(spec(Command::SetTemperature { kelvin: 8001 })
            .validate()
            .is_err());
        assert!(spec(Command::SetTemperature { kelvin: 1000 })
            .validate()
            .is_ok());
        assert!(spec(Command::SetTemperature { kelvin: 8000 })
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_scene_bounds() {
        assert!(spec(Command::SetScene { scene: 0 }).validate().is_err());
        assert!(spec(Command::SetScene { scene: 33 }).validate().is_err());
        assert!(spec(Command::SetScene { scene: 1 }).validate().is_ok());
        assert!(spec(Command::SetScene { scene: 32 }).validate().is_ok());
    }

    #[test]
    fn test_args_for_brightness() {
        let args = spec(Command::SetBrightness { percent: 50 }).args();
        assert_eq!(
            args,
            vec!["setbrightness", "--ip", "192.168.1.30", "--dim", "50"]
        );
    }

    #[test]
    fn test_args_for_rgb() {
        let args = spec(Command::SetRgb {
            rgb: Rgb {
                red: 255,
                green: 128,
                blue: 0,
            },
        })
        .args();
        assert_eq!(
            args,
            vec![
                "setrgbcolor",
                "--ip",
                "192.168.1.30",
                "--r",
                "255",
                "--g",
                "128",
                "--b",
                "0"
            ]
        );
    }

    #[test]
    fn test_optimistic_state_for_mutations_only() {
        assert_eq!(
            Command::SetBrightness { percent: 50 }
                .optimistic_state()
                .unwrap()
                .brightness,
            Some(50)
        );
        assert_eq!(
            Command::TurnOff.optimistic_state().unwrap().power,
            Some(false)
        );
        assert!(Command::Status.optimistic_state().is_none());
        assert!(Command::Reboot.optimistic_state().is_none());
    }

    #[test]
    fn test_scene_name_lookup() {
        assert_eq!(scene_name(5), Some("Fireplace"));
        assert_eq!(scene_name(32), Some("Steampunk"));
        assert_eq!(scene_name(0), None);
        assert_eq!(scene_name(33), None);
        assert_eq!(scene_list().len(), 32);
    }
}
