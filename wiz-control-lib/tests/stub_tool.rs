//! End-to-end tests against a stub wizlightcpp script.
//!
//! The stub stands in for the real binary: it records every invocation in
//! a call log, answers discovery with canned JSON, and persists the last
//! scene written so set-then-query round-trips can be observed.

#![cfg(unix)]

use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use wiz_control_lib::control_interface::{Command, CommandSpec, ControlInterface};
use wiz_control_lib::error::ControlError;
use wiz_control_lib::store::DeviceStore;
use wiz_control_lib::util::discovery::{Discovery, DiscoveryMode};
use wiz_control_lib::util::invoker::WizTool;

const SWEEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Writes an executable stub script into `dir` and returns its path.
fn write_stub(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("wizlightcpp");
    let script = format!(
        "#!/bin/sh\ndir=\"$(cd \"$(dirname \"$0\")\" && pwd)\"\necho x >> \"$dir/calls\"\n{body}\n"
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn call_count(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join("calls"))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn discovery_roundtrip_populates_store() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(
        dir.path(),
        r#"echo '{"bulb_response": {"ip": "10.0.0.5", "mac": "a8:bb:cc:00:11:22", "moduleName": "ESP01_SHRGB1C_31"}}'"#,
    );

    let tool = WizTool::at(stub).unwrap();
    let store = Arc::new(DeviceStore::new());
    let discovery = Discovery::new(tool, store.clone());

    let report = discovery
        .discover(DiscoveryMode::Single("10.0.0.255".to_string()), SWEEP_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(report.devices.len(), 1);
    let ip = Ipv4Addr::new(10, 0, 0, 5);
    let cached = store.get(ip).expect("device should be in the store");
    assert_eq!(cached.mac.as_deref(), Some("a8:bb:cc:00:11:22"));
    assert_eq!(cached.module_name.as_deref(), Some("ESP01_SHRGB1C_31"));
}

#[tokio::test]
async fn invalid_broadcast_never_invokes_the_tool() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), "echo '{}'");

    let tool = WizTool::at(stub).unwrap();
    let discovery = Discovery::new(tool, Arc::new(DeviceStore::new()));

    let err = discovery
        .discover(
            DiscoveryMode::Single("not-an-address".to_string()),
            SWEEP_TIMEOUT,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ControlError::InvalidBroadcastAddress(_)));
    assert_eq!(call_count(dir.path()), 0);
}

#[tokio::test]
async fn empty_discovery_with_nonzero_exit_is_a_clean_empty_result() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), "echo 'no devices responded' >&2\nexit 1");

    let tool = WizTool::at(stub).unwrap();
    let discovery = Discovery::new(tool, Arc::new(DeviceStore::new()));

    let report = discovery
        .discover(DiscoveryMode::Single("10.0.0.255".to_string()), SWEEP_TIMEOUT)
        .await
        .unwrap();

    assert!(report.devices.is_empty());
    assert!(
        report
            .diagnostics
            .iter()
            .any(|d| d.contains("no devices responded")),
        "stderr should surface as a diagnostic: {:?}",
        report.diagnostics
    );
}

#[tokio::test]
async fn timeout_kills_the_child_process() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), "sleep 2\ntouch \"$dir/survived\"");

    let tool = WizTool::at(stub).unwrap();
    let err = tool
        .invoke(&["status".to_string()], Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::ProcessTimeout { .. }));

    // Give a leaked child ample time to reach its marker write; a killed
    // child never does.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(
        !dir.path().join("survived").exists(),
        "child process outlived its timeout"
    );
}

#[tokio::test]
async fn out_of_range_brightness_fails_before_any_invocation() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), "echo '{}'");

    let tool = WizTool::at(stub).unwrap();
    let control = ControlInterface::new(tool, Arc::new(DeviceStore::new()));

    let err = control
        .set_brightness(Ipv4Addr::new(192, 168, 1, 30), 150)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::InvalidParameter {
            name: "brightness",
            ..
        }
    ));
    assert_eq!(call_count(dir.path()), 0);
}

#[tokio::test]
async fn successful_brightness_command_updates_cached_state() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), r#"echo '{"result": {"success": true}}'"#);

    let tool = WizTool::at(stub).unwrap();
    let store = Arc::new(DeviceStore::new());
    let control = ControlInterface::new(tool, store.clone());

    let ip = Ipv4Addr::new(192, 168, 1, 30);
    let result = control.set_brightness(ip, 50).await.unwrap();
    assert!(result.success);

    let cached = store.get(ip).expect("command should create the record");
    assert_eq!(cached.state.brightness, Some(50));
    assert_eq!(call_count(dir.path()), 1);
}

#[tokio::test]
async fn scene_set_then_status_round_trips() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(
        dir.path(),
        r#"case "$1" in
setscene)
  shift
  while [ $# -gt 0 ]; do
    if [ "$1" = "--scene" ]; then echo "$2" > "$dir/scene"; fi
    shift
  done
  echo '{"result": {"success": true}}'
  ;;
status)
  scene=$(cat "$dir/scene" 2>/dev/null || echo 0)
  echo "{\"result\": {\"state\": true, \"sceneId\": $scene, \"dimming\": 80}}"
  ;;
*)
  echo '{}'
  ;;
esac"#,
    );

    let tool = WizTool::at(stub).unwrap();
    let store = Arc::new(DeviceStore::new());
    let control = ControlInterface::new(tool, store.clone());

    let ip = Ipv4Addr::new(192, 168, 1, 30);
    control.set_scene(ip, 5).await.unwrap();
    control.status(ip).await.unwrap();

    let cached = store.get(ip).unwrap();
    assert_eq!(cached.state.scene, Some(5));
    assert_eq!(cached.state.power, Some(true));
    assert_eq!(cached.state.brightness, Some(80));
}

#[tokio::test]
async fn discovery_with_vanished_binary_fails_without_invocation() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), "echo '{}'");

    let tool = WizTool::at(&stub).unwrap();
    let discovery = Discovery::new(tool, Arc::new(DeviceStore::new()));
    std::fs::remove_file(&stub).unwrap();

    let err = discovery
        .discover(DiscoveryMode::Single("10.0.0.255".to_string()), SWEEP_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::ExecutableNotFound { .. }));
    assert_eq!(call_count(dir.path()), 0);
}

#[tokio::test]
async fn commands_to_the_same_device_are_serialized() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), "sleep 0.4\necho '{\"result\": {\"success\": true}}'");

    let tool = WizTool::at(stub).unwrap();
    let control = Arc::new(ControlInterface::new(tool, Arc::new(DeviceStore::new())));

    let ip = Ipv4Addr::new(192, 168, 1, 30);
    let started = std::time::Instant::now();
    let (a, b) = tokio::join!(control.turn_on(ip), control.set_brightness(ip, 40));
    a.unwrap();
    b.unwrap();

    // Two 400ms invocations against one bulb must not overlap.
    assert!(
        started.elapsed() >= Duration::from_millis(800),
        "same-device commands overlapped: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn command_failure_with_no_payload_is_command_failed() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), "echo 'send failed' >&2\nexit 3");

    let tool = WizTool::at(stub).unwrap();
    let control = ControlInterface::new(tool, Arc::new(DeviceStore::new()));

    let err = control
        .dispatch(CommandSpec::new(
            Ipv4Addr::new(192, 168, 1, 30),
            Command::TurnOn,
        ))
        .await
        .unwrap_err();

    match err {
        ControlError::CommandFailed { status, stderr, .. } => {
            assert_eq!(status, Some(3));
            assert!(stderr.contains("send failed"));
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}
