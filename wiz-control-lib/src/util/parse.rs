use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;

use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::discovery::DiscoveredDevice;

/// An RGB triple as the device reports and accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Display for Rgb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.red, self.green, self.blue)
    }
}

impl From<(u8, u8, u8)> for Rgb {
    fn from(tuple: (u8, u8, u8)) -> Self {
        Rgb {
            red: tuple.0,
            green: tuple.1,
            blue: tuple.2,
        }
    }
}

/// Last-known state snapshot of a bulb.
///
/// Every field is optional: a status response carries whichever subset the
/// firmware felt like including, and a discovery response often carries none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// On/off.
    pub power: Option<bool>,
    /// Percentage, 0-100.
    pub brightness: Option<u8>,
    pub rgb: Option<Rgb>,
    /// Color temperature in Kelvin.
    pub temperature: Option<u16>,
    /// Scene id, 1-32. Absent when the bulb is not running a scene.
    pub scene: Option<u8>,
    /// Effect speed percentage, 0-100.
    pub speed: Option<u8>,
}

impl DeviceState {
    /// Folds the fields `newer` actually carries into `self`, leaving the
    /// rest untouched. Last write wins per field.
    pub fn merge_from(&mut self, newer: &DeviceState) {
        if newer.power.is_some() {
            self.power = newer.power;
        }
        if newer.brightness.is_some() {
            self.brightness = newer.brightness;
        }
        if newer.rgb.is_some() {
            self.rgb = newer.rgb;
        }
        if newer.temperature.is_some() {
            self.temperature = newer.temperature;
        }
        if newer.scene.is_some() {
            self.scene = newer.scene;
        }
        if newer.speed.is_some() {
            self.speed = newer.speed;
        }
    }
}

/// Output of one parse attempt. `json` is `None` when the text was not
/// valid JSON and the line heuristics found nothing either; `note` carries
/// the diagnostic in that case. Parsing never fails the operation.
#[derive(Debug, Clone)]
pub struct ParsedPayload {
    pub json: Option<Value>,
    pub note: Option<String>,
}

/// Normalized result of parsing one discovery response.
#[derive(Debug, Clone)]
pub struct DiscoveryParse {
    pub devices: Vec<DiscoveredDevice>,
    pub note: Option<String>,
}

/// Interprets raw tool output, JSON first, key/value lines second.
///
/// The external tool usually prints a JSON document, but version and error
/// paths produce plain informational text or nothing at all. Those degrade
/// to a diagnostic note instead of an error.
pub fn parse_payload(raw: &str) -> ParsedPayload {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParsedPayload {
            json: None,
            note: Some("empty output from tool".to_string()),
        };
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(json) => ParsedPayload {
            json: Some(json),
            note: None,
        },
        Err(e) => {
            trace!("Output is not JSON ({e}), trying line heuristics");
            let fields = parse_labeled_lines(trimmed);
            if fields.is_empty() {
                ParsedPayload {
                    json: None,
                    note: Some(format!("unparseable output: {trimmed:?}")),
                }
            } else {
                ParsedPayload {
                    json: Some(Value::Object(fields)),
                    note: Some("tool produced non-JSON output, parsed line fields".to_string()),
                }
            }
        }
    }
}

/// Line-oriented fallback: collects `key: value` and `key = value` pairs.
fn parse_labeled_lines(text: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':').or_else(|| line.split_once('=')) else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() || key.contains(char::is_whitespace) {
            continue;
        }
        let value = match value {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(value.to_string())),
        };
        fields.insert(key.to_string(), value);
    }
    fields
}

/// Parses a discovery response into zero or more devices.
///
/// Accepts the `{"bulb_response": {...}}` envelope the tool emits, bare
/// objects, arrays of either, and falls back to scanning text lines for
/// dotted-quads. One malformed entry never aborts the rest.
pub fn parse_discovery(raw: &str) -> DiscoveryParse {
    let payload = parse_payload(raw);
    let Some(json) = payload.json else {
        let devices = scan_lines_for_devices(raw);
        let note = if devices.is_empty() {
            payload.note
        } else {
            Some("discovery output was not JSON, recovered devices from text".to_string())
        };
        return DiscoveryParse { devices, note };
    };

    let mut devices = Vec::new();
    let mut notes = Vec::new();
    for entry in flatten_device_entries(json) {
        match device_from_object(&entry) {
            Some(device) => devices.push(device),
            None => notes.push(format!(
                "discovery entry without usable ip: {}",
                Value::Object(entry)
            )),
        }
    }
    DiscoveryParse {
        devices,
        note: if notes.is_empty() {
            payload.note
        } else {
            Some(notes.join("; "))
        },
    }
}

/// Unwraps envelopes and arrays down to the per-device objects.
fn flatten_device_entries(json: Value) -> Vec<Map<String, Value>> {
    match json {
        Value::Array(entries) => entries.into_iter().flat_map(flatten_device_entries).collect(),
        Value::Object(mut object) => {
            if let Some(inner) = object.remove("bulb_response") {
                flatten_device_entries(inner)
            } else if let Some(inner) = object.remove("result") {
                flatten_device_entries(inner)
            } else {
                vec![object]
            }
        }
        _ => Vec::new(),
    }
}

fn device_from_object(object: &Map<String, Value>) -> Option<DiscoveredDevice> {
    let ip = object
        .get("ip")
        .and_then(Value::as_str)
        .and_then(|s| Ipv4Addr::from_str(s).ok())?;

    let mut device = DiscoveredDevice::new(ip);
    device.mac = object
        .get("mac")
        .or_else(|| object.get("devMac"))
        .and_then(Value::as_str)
        .map(str::to_string);
    device.module_name = object
        .get("moduleName")
        .and_then(Value::as_str)
        .map(str::to_string);

    let (state, extra) = parse_state(object);
    device.state = state;
    device.extra = extra;
    Some(device)
}

/// Text fallback for old tool builds that print one device per line.
fn scan_lines_for_devices(raw: &str) -> Vec<DiscoveredDevice> {
    let mut devices = Vec::new();
    for line in raw.lines() {
        if !line.to_lowercase().contains("ip") {
            continue;
        }
        let found = line
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .find_map(|token| Ipv4Addr::from_str(token).ok());
        if let Some(ip) = found {
            devices.push(DiscoveredDevice::new(ip));
        }
    }
    devices
}

/// Field names whose meaning this layer understands. Everything else a
/// response carries survives in the device's `extra` bucket so newer
/// firmware fields are not silently dropped.
const IDENTITY_KEYS: [&str; 4] = ["ip", "mac", "devMac", "moduleName"];

/// Normalizes a response object into a [`DeviceState`] plus leftovers.
///
/// Alias handling covers the names seen across tool versions: `state` or
/// `power` for on/off, `dimming`/`brightness`/`dim` for brightness,
/// `temp`/`cct`/`temperature` for Kelvin, split `r`/`g`/`b` or an `rgb`
/// array, `sceneId`/`scene` (0 meaning "no scene"), and `speed`.
pub fn parse_state(object: &Map<String, Value>) -> (DeviceState, Map<String, Value>) {
    let mut state = DeviceState::default();
    let mut extra = Map::new();

    let mut rgb_parts: [Option<u8>; 3] = [None, None, None];

    for (key, value) in object {
        match key.as_str() {
            "state" | "power" => state.power = value_as_bool(value),
            "dimming" | "brightness" | "dim" => {
                state.brightness = value_as_u64(value).map(|v| v.min(100) as u8)
            }
            "temp" | "cct" | "temperature" => {
                state.temperature = value_as_u64(value).map(|v| v.min(u16::MAX as u64) as u16)
            }
            "r" => rgb_parts[0] = value_as_u64(value).map(|v| v.min(255) as u8),
            "g" => rgb_parts[1] = value_as_u64(value).map(|v| v.min(255) as u8),
            "b" => rgb_parts[2] = value_as_u64(value).map(|v| v.min(255) as u8),
            "rgb" => {
                if let Some(components) = value.as_array() {
                    let mut it = components.iter().filter_map(value_as_u64);
                    if let (Some(r), Some(g), Some(b)) = (it.next(), it.next(), it.next()) {
                        state.rgb = Some(Rgb {
                            red: r.min(255) as u8,
                            green: g.min(255) as u8,
                            blue: b.min(255) as u8,
                        });
                    }
                }
            }
            "sceneId" | "scene" => {
                state.scene = value_as_u64(value)
                    .filter(|&id| (1..=32).contains(&id))
                    .map(|id| id as u8)
            }
            "speed" => state.speed = value_as_u64(value).map(|v| v.min(100) as u8),
            _ if IDENTITY_KEYS.contains(&key.as_str()) => {}
            _ => {
                extra.insert(key.clone(), value.clone());
            }
        }
    }

    if let [Some(red), Some(green), Some(blue)] = rgb_parts {
        state.rgb = Some(Rgb { red, green, blue });
    }

    (state, extra)
}

/// Normalizes a full status/info payload, unwrapping the `result` or
/// `bulb_response` envelope if the tool used one.
pub fn normalize_status(json: &Value) -> Option<(DeviceState, Map<String, Value>)> {
    let object = json.as_object()?;
    let object = match object.get("result").or_else(|| object.get("bulb_response")) {
        Some(inner) => inner.as_object()?,
        None => object,
    };
    Some(parse_state(object))
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().map(|n| n != 0),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "on" | "1" => Some(true),
            "false" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_discovery_json_object() {
        let parsed = parse_discovery(r#"{ "ip": "10.0.0.5", "state": true, "brightness": 50 }"#);
        assert_eq!(parsed.devices.len(), 1);
        let device = &parsed.devices[0];
        assert_eq!(device.ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(device.state.power, Some(true));
        assert_eq!(device.state.brightness, Some(50));
    }

    #[test]
    fn test_parse_discovery_bulb_response_envelope() {
        let parsed = parse_discovery(
            r#"{"bulb_response": {"ip": "192.168.1.40", "mac": "a8:bb:cc:dd:ee:ff", "moduleName": "ESP01_SHRGB1C_31"}}"#,
        );
        assert_eq!(parsed.devices.len(), 1);
        let device = &parsed.devices[0];
        assert_eq!(device.mac.as_deref(), Some("a8:bb:cc:dd:ee:ff"));
        assert_eq!(device.module_name.as_deref(), Some("ESP01_SHRGB1C_31"));
    }

    #[test]
    fn test_parse_discovery_empty_output_is_not_an_error() {
        let parsed = parse_discovery("");
        assert!(parsed.devices.is_empty());
        assert!(parsed.note.is_some());
    }

    #[test]
    fn test_parse_discovery_text_fallback() {
        let parsed = parse_discovery("found bulb ip 192.168.1.77 mac aa:bb:cc:dd:ee:ff\n");
        assert_eq!(parsed.devices.len(), 1);
        assert_eq!(parsed.devices[0].ip, Ipv4Addr::new(192, 168, 1, 77));
    }

    #[test]
    fn test_parse_discovery_array_skips_bad_entries() {
        let parsed = parse_discovery(
            r#"[{"ip": "10.0.0.5"}, {"moduleName": "no-ip-here"}, {"ip": "10.0.0.6"}]"#,
        );
        assert_eq!(parsed.devices.len(), 2);
        assert!(parsed.note.is_some());
    }

    #[test]
    fn test_parse_state_aliases_and_extras() {
        let json: Value = serde_json::from_str(
            r#"{"state": 1, "dimming": 80, "temp": 4200, "sceneId": 5, "speed": 60,
                "rssi": -48, "fwVersion": "1.22.0"}"#,
        )
        .unwrap();
        let (state, extra) = parse_state(json.as_object().unwrap());
        assert_eq!(state.power, Some(true));
        assert_eq!(state.brightness, Some(80));
        assert_eq!(state.temperature, Some(4200));
        assert_eq!(state.scene, Some(5));
        assert_eq!(state.speed, Some(60));
        assert_eq!(extra.get("rssi"), Some(&Value::from(-48)));
        assert!(extra.contains_key("fwVersion"));
    }

    #[test]
    fn test_parse_state_split_rgb_components() {
        let json: Value = serde_json::from_str(r#"{"r": 255, "g": 128, "b": 0}"#).unwrap();
        let (state, _) = parse_state(json.as_object().unwrap());
        assert_eq!(
            state.rgb,
            Some(Rgb {
                red: 255,
                green: 128,
                blue: 0
            })
        );
    }

    #[test]
    fn test_parse_state_scene_zero_means_none() {
        let json: Value = serde_json::from_str(r#"{"sceneId": 0}"#).unwrap();
        let (state, _) = parse_state(json.as_object().unwrap());
        assert_eq!(state.scene, None);
    }

    #[test]
    fn test_parse_state_brightness_clamped() {
        let json: Value = serde_json::from_str(r#"{"dimming": 150}"#).unwrap();
        let (state, _) = parse_state(json.as_object().unwrap());
        assert_eq!(state.brightness, Some(100));
    }

    #[test]
    fn test_parse_payload_labeled_lines() {
        let payload = parse_payload("status: ok\nbrightness = 40\n");
        let json = payload.json.unwrap();
        assert_eq!(json["status"], Value::String("ok".to_string()));
        assert_eq!(json["brightness"], Value::from(40));
        assert!(payload.note.is_some());
    }

    #[test]
    fn test_merge_from_is_per_field() {
        let mut base = DeviceState {
            power: Some(true),
            brightness: Some(30),
            ..Default::default()
        };
        base.merge_from(&DeviceState {
            brightness: Some(70),
            scene: Some(3),
            ..Default::default()
        });
        assert_eq!(base.power, Some(true));
        assert_eq!(base.brightness, Some(70));
        assert_eq!(base.scene, Some(3));
    }
}
