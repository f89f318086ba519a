use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, trace};
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::ControlError;

/// Name of the external binary that speaks the actual Wiz UDP protocol.
const TOOL_NAME: &str = "wizlightcpp";

/// Default time limit for a direct device command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Time limit for one discovery broadcast. Longer than a unicast command
/// needs, so late responders inside the broadcast window still make it in.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured result of one tool invocation.
///
/// A non-zero exit is not an error at this level. The tool exits non-zero
/// for conditions like "nothing answered the broadcast", which callers may
/// treat as a valid empty result.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when the process was ended by a signal.
    pub status: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Handle to the wizlightcpp executable.
///
/// Construction verifies the binary is present, so every later failure mode
/// is about what the tool did, not whether it exists. The presence check is
/// repeated before each spawn; a binary deleted mid-session surfaces as
/// [`ControlError::ExecutableNotFound`] rather than an opaque io error.
#[derive(Debug, Clone)]
pub struct WizTool {
    path: PathBuf,
}

impl WizTool {
    /// Uses the executable at an explicit path.
    pub fn at<P: Into<PathBuf>>(path: P) -> Result<Self, ControlError> {
        let tool = WizTool { path: path.into() };
        tool.check_present()?;
        Ok(tool)
    }

    /// Locates the executable at its fixed relative locations: the working
    /// directory first, then next to the running binary.
    pub fn locate() -> Result<Self, ControlError> {
        let mut candidates = vec![PathBuf::from(TOOL_NAME)];
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                candidates.push(dir.join(TOOL_NAME));
            }
        }

        for candidate in &candidates {
            if is_executable(candidate) {
                debug!("Using {TOOL_NAME} at {}", candidate.display());
                return Ok(WizTool {
                    path: candidate.clone(),
                });
            }
        }
        Err(ControlError::ExecutableNotFound {
            path: candidates.into_iter().next().unwrap_or_default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_present(&self) -> Result<(), ControlError> {
        if is_executable(&self.path) {
            Ok(())
        } else {
            Err(ControlError::ExecutableNotFound {
                path: self.path.clone(),
            })
        }
    }

    /// Runs the tool with `args`, enforcing `limit` as a hard deadline.
    ///
    /// On expiry the child process is killed, never left behind, and
    /// [`ControlError::ProcessTimeout`] is returned so callers can tell a
    /// hung tool apart from one that ran and failed.
    pub async fn invoke(
        &self,
        args: &[String],
        limit: Duration,
    ) -> Result<ToolOutput, ControlError> {
        self.check_present()?;

        trace!("Invoking {} {:?}", self.path.display(), args);
        let child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ControlError::Spawn {
                args: args.to_vec(),
                source,
            })?;

        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = ToolOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    status: output.status.code(),
                };
                debug!(
                    "{TOOL_NAME} {:?} exited with {:?} ({} bytes of stdout)",
                    args,
                    result.status,
                    result.stdout.len()
                );
                Ok(result)
            }
            Ok(Err(source)) => Err(ControlError::Spawn {
                args: args.to_vec(),
                source,
            }),
            // Dropping the cancelled wait future kills the child (kill_on_drop).
            Err(_) => Err(ControlError::ProcessTimeout {
                args: args.to_vec(),
                timeout: limit,
            }),
        }
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_missing_path_fails() {
        let err = WizTool::at("/nonexistent/wizlightcpp").unwrap_err();
        assert!(matches!(err, ControlError::ExecutableNotFound { .. }));
    }

    #[tokio::test]
    async fn test_invoke_after_binary_vanishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wizlightcpp");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let tool = WizTool::at(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let err = tool
            .invoke(&["status".to_string()], COMMAND_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::ExecutableNotFound { .. }));
    }
}
