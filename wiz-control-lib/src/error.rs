use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the discovery and command layers.
///
/// Validation failures (`InvalidBroadcastAddress`, `InvalidParameter`) and
/// `ExecutableNotFound` are raised before any process is spawned. Everything
/// else describes what the external tool did once it ran. Malformed output is
/// never an error here; the parser degrades to diagnostics instead.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The wizlightcpp binary is missing or not executable. Fatal, not retried.
    #[error("wizlightcpp executable not found at {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    /// The tool did not finish within the allotted time. The child process
    /// has already been killed when this is returned.
    #[error("wizlightcpp timed out after {timeout:?} (args: {args:?})")]
    ProcessTimeout { args: Vec<String>, timeout: Duration },

    /// Spawning or waiting on the child process failed.
    #[error("failed to run wizlightcpp {args:?}: {source}")]
    Spawn {
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    /// The supplied broadcast address is not a dotted-quad IPv4 address.
    #[error("invalid broadcast address: {0:?}")]
    InvalidBroadcastAddress(String),

    /// A command parameter fell outside its domain. Checked locally, the
    /// external tool is never invoked with out-of-range values.
    #[error("invalid parameter {name}={value}, allowed range is {allowed}")]
    InvalidParameter {
        name: &'static str,
        value: i64,
        allowed: &'static str,
    },

    /// Every candidate network failed to produce a device. An empty but
    /// otherwise successful sweep is reported as an empty result, not this.
    #[error("no devices found after {attempts} discovery attempt(s)")]
    NoDevicesFound { attempts: usize },

    /// The tool exited with a failure status and no recognizable payload.
    #[error("wizlightcpp {args:?} failed with status {status:?}: {stderr}")]
    CommandFailed {
        args: Vec<String>,
        status: Option<i32>,
        stderr: String,
    },
}

impl ControlError {
    /// Whether retrying the same operation could plausibly succeed.
    /// Discovery treats timeouts as "no response on this network" and moves
    /// on to the next candidate; direct commands surface them to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ControlError::ProcessTimeout { .. })
    }
}
