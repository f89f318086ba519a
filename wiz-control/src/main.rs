use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use wiz_control_lib::control_interface::{
    scene_list, scene_name, CliColor, CommandResult, ControlInterface,
};
use wiz_control_lib::store::DeviceStore;
use wiz_control_lib::util::discovery::{Discovery, DiscoveryMode};
use wiz_control_lib::util::invoker::WizTool;
use wiz_control_lib::util::parse::Rgb;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "wiz_control",
    about = "Discovers and controls Wiz smart lights",
    version = "0.3.0"
)]
pub struct Cli {
    /// Path to the wizlightcpp executable; located automatically if omitted
    #[clap(long, global = true)]
    pub tool: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for the `discover` command.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Discover Wiz devices on the local network(s)
    #[clap(name = "discover")]
    Discover {
        /// Broadcast on this address only, e.g. 192.168.1.255
        #[clap(short, long, conflicts_with = "all")]
        bcast: Option<String>,

        /// Broadcast on every candidate network and merge the results
        #[clap(short, long)]
        all: bool,

        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Per-network discovery timeout in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 10000)]
        timeout: u64,
    },
    /// Subcommand for operations against one device
    #[clap(name = "device-call")]
    DeviceCall {
        /// IP address of the target bulb
        #[clap(long)]
        ip: Ipv4Addr,

        #[clap(subcommand)]
        action: DeviceAction,
    },
    /// List the scene ids and names the bulbs understand
    #[clap(name = "scenes")]
    Scenes,
}

/// Actions available under the `device-call` subcommand
#[derive(Subcommand)]
pub enum DeviceAction {
    /// Turns the bulb on.
    #[clap(name = "on")]
    On,
    /// Turns the bulb off.
    #[clap(name = "off")]
    Off,
    /// Sets brightness as a percentage.
    #[clap(name = "set-brightness")]
    SetBrightness {
        /// Brightness (0-100)
        value: u8,
    },
    /// Sets an RGB color, by name or by components.
    #[clap(name = "set-rgb")]
    SetRgb {
        /// The color to set by name
        #[clap(value_enum)]
        color: Option<CliColor>,

        /// Red component of the color (0-255)
        #[clap(short = 'r', long = "red", value_parser = clap::value_parser!(u8))]
        red: Option<u8>,

        /// Green component of the color (0-255)
        #[clap(short = 'g', long = "green", value_parser = clap::value_parser!(u8))]
        green: Option<u8>,

        /// Blue component of the color (0-255)
        #[clap(short = 'b', long = "blue", value_parser = clap::value_parser!(u8))]
        blue: Option<u8>,
    },
    /// Sets the white color temperature in Kelvin.
    #[clap(name = "set-temp")]
    SetTemp {
        /// Temperature in Kelvin (1000-8000)
        kelvin: u16,
    },
    /// Activates a scene by id.
    #[clap(name = "set-scene")]
    SetScene {
        /// Scene id (1-32)
        id: u8,
    },
    /// Sets the effect speed as a percentage.
    #[clap(name = "set-speed")]
    SetSpeed {
        /// Speed (0-100)
        value: u8,
    },
    /// Queries the bulb's current state.
    #[clap(name = "status")]
    Status,
    /// Queries static device information.
    #[clap(name = "info")]
    Info,
    /// Reboots the bulb.
    #[clap(name = "reboot")]
    Reboot,
}

fn locate_tool(tool_path: &Option<PathBuf>) -> Result<WizTool> {
    match tool_path {
        Some(path) => WizTool::at(path.clone()),
        None => WizTool::locate(),
    }
    .context("the wizlightcpp tool is required; pass --tool if it is not next to the binary")
}

async fn handle_cli(cli: Cli) -> Result<()> {
    let Cli { tool: tool_path, command } = cli;

    match command {
        Commands::Discover {
            bcast,
            all,
            output,
            timeout,
        } => {
            let tool = locate_tool(&tool_path)?;
            let mode = match (bcast, all) {
                (Some(addr), _) => DiscoveryMode::Single(addr),
                (None, true) => DiscoveryMode::ScanAll,
                (None, false) => DiscoveryMode::Auto,
            };
            let discovery = Discovery::new(tool, Arc::new(DeviceStore::new()));
            let report = discovery
                .discover(mode, Duration::from_millis(timeout))
                .await?;

            for diagnostic in &report.diagnostics {
                eprintln!("warning: {diagnostic}");
            }
            match output {
                OutputFormat::Plaintext => {
                    if report.devices.is_empty() {
                        println!("No devices found.");
                    } else {
                        Discovery::pretty_print_devices(&report.devices);
                    }
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&report.devices)?;
                    println!("{}", json);
                }
                OutputFormat::Yaml => {
                    let yaml = serde_yaml::to_string(&report.devices)?;
                    println!("{}", yaml);
                }
            }
        }
        Commands::DeviceCall { ip, action } => {
            let tool = locate_tool(&tool_path)?;
            let control = ControlInterface::new(tool, Arc::new(DeviceStore::new()));

            match action {
                DeviceAction::On => {
                    print_result(control.turn_on(ip).await?);
                    println!("Light at {ip} turned on");
                }
                DeviceAction::Off => {
                    print_result(control.turn_off(ip).await?);
                    println!("Light at {ip} turned off");
                }
                DeviceAction::SetBrightness { value } => {
                    print_result(control.set_brightness(ip, value).await?);
                    println!("Brightness set to {value}%");
                }
                DeviceAction::SetRgb {
                    color,
                    red,
                    green,
                    blue,
                } => {
                    let rgb: Rgb = match (color, red, green, blue) {
                        (Some(name), None, None, None) => name.into(),
                        (None, Some(r), Some(g), Some(b)) => Rgb {
                            red: r,
                            green: g,
                            blue: b,
                        },
                        _ => return Err(anyhow!("Specify either a color name or all of -r/-g/-b")),
                    };
                    print_result(control.set_rgb(ip, rgb).await?);
                    println!("Color set to {rgb}");
                }
                DeviceAction::SetTemp { kelvin } => {
                    print_result(control.set_temperature(ip, kelvin).await?);
                    println!("Color temperature set to {kelvin} K");
                }
                DeviceAction::SetScene { id } => {
                    print_result(control.set_scene(ip, id).await?);
                    match scene_name(id) {
                        Some(name) => println!("Scene set to {id} ({name})"),
                        None => println!("Scene set to {id}"),
                    }
                }
                DeviceAction::SetSpeed { value } => {
                    print_result(control.set_speed(ip, value).await?);
                    println!("Effect speed set to {value}%");
                }
                DeviceAction::Status => {
                    let result = control.status(ip).await?;
                    print_payload(&result)?;
                }
                DeviceAction::Info => {
                    let result = control.device_info(ip).await?;
                    print_payload(&result)?;
                }
                DeviceAction::Reboot => {
                    print_result(control.reboot(ip).await?);
                    println!("Reboot requested for {ip}");
                }
            }
        }
        Commands::Scenes => {
            for (id, name) in scene_list() {
                println!("{id:>2}  {name}");
            }
        }
    }

    Ok(())
}

/// Surfaces non-fatal detail from a mutating command.
fn print_result(result: CommandResult) {
    if let Some(detail) = &result.detail {
        eprintln!("note: {detail}");
    }
    if !result.success {
        eprintln!("warning: the tool reported failure for this command");
    }
}

/// Prints a query result: the parsed payload when there is one, the raw
/// text otherwise.
fn print_payload(result: &CommandResult) -> Result<()> {
    if let Some(detail) = &result.detail {
        eprintln!("note: {detail}");
    }
    match (&result.payload, &result.raw) {
        (Some(payload), _) => println!("{}", serde_json::to_string_pretty(payload)?),
        (None, Some(raw)) => println!("{}", raw),
        (None, None) => println!("(no output)"),
    }
    Ok(())
}
