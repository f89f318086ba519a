//! # Wiz Control Library
//!
//! `wiz-control-lib` is a Rust library for discovering and controlling Wiz
//! smart lights. It wraps the `wizlightcpp` command-line tool, which speaks
//! the actual UDP protocol to the bulbs, and exposes a typed, async API on
//! top: broadcast-address resolution, multi-network discovery, a shared
//! device registry, and validated control commands.
//!
//! This library is designed to be embedded in front-ends (a GUI, a CLI)
//! whose event loop must never block on process or network I/O: every
//! operation is an async task, and results come back as futures.
//!
//! ## Features
//!
//! - Broadcast candidate resolution from local interfaces, with fallbacks
//! - Device discovery across one or many networks, deduplicated by IP
//! - Tolerant response parsing that never fails a sweep on one bad device
//! - Validated power/brightness/color/temperature/scene/speed commands
//! - A reactive device store the front-end can subscribe to
//!
//! ## Example
//!
//! Discover devices on all candidate networks and turn the first one on:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use wiz_control_lib::control_interface::ControlInterface;
//! use wiz_control_lib::store::DeviceStore;
//! use wiz_control_lib::util::discovery::{Discovery, DiscoveryMode};
//! use wiz_control_lib::util::invoker::WizTool;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tool = WizTool::locate()?;
//!     let store = Arc::new(DeviceStore::new());
//!
//!     let discovery = Discovery::new(tool.clone(), store.clone());
//!     let report = discovery
//!         .discover(DiscoveryMode::ScanAll, Duration::from_secs(10))
//!         .await?;
//!
//!     if let Some(device) = report.devices.first() {
//!         let control = ControlInterface::new(tool, store);
//!         control.turn_on(device.ip).await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

// The `control_interface` module is the command dispatcher: it validates
// command parameters against their domains, builds the tool's argument
// lists, and keeps cached device state in sync with issued commands.
pub mod control_interface;

// The `error` module defines the failure taxonomy shared by discovery and
// dispatch. Validation errors never spawn a process; parse problems never
// become errors at all.
pub mod error;

// The `store` module owns the shared device registry that discovery and
// dispatch both update, and that front-ends read or subscribe to.
pub mod store;

// The `util` module holds the leaf pieces: broadcast-address resolution,
// the process invoker around the external tool, response parsing, and the
// discovery orchestrator.
pub mod util;
