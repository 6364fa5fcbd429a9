use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Failure of the external scan capability.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("failed to launch scanner `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("scanner output is not valid UTF-8")]
    Encoding,
}

/// External port-scanning mechanism: takes a target, returns a raw XML report.
#[async_trait]
pub trait ScanCapability: Send + Sync {
    async fn scan(&self, target: &str) -> Result<String, CapabilityError>;
}

/// Runs `nmap` as a child process with XML written to stdout.
///
/// The target is always passed as the last, single argument after `-oX -`.
/// The child is killed if the returned future is dropped, so a timeout around
/// [`ScanCapability::scan`] also stops the process.
#[derive(Debug, Clone)]
pub struct NmapScanner {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl NmapScanner {
    pub fn new(program: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    fn command(&self, target: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_args)
            .args(["-oX", "-"])
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for NmapScanner {
    fn default() -> Self {
        Self::new("nmap", Vec::new())
    }
}

#[async_trait]
impl ScanCapability for NmapScanner {
    async fn scan(&self, target: &str) -> Result<String, CapabilityError> {
        debug!(program = %self.program.display(), scan_target = target, "launching scanner");
        let output = self
            .command(target)
            .output()
            .await
            .map_err(|source| CapabilityError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(scan_target = target, code = ?output.status.code(), "scanner exited with failure");
            return Err(CapabilityError::Exit {
                code: output.status.code(),
                stderr: if stderr.is_empty() {
                    "nmap execution failed".to_string()
                } else {
                    stderr
                },
            });
        }

        String::from_utf8(output.stdout).map_err(|_| CapabilityError::Encoding)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    // `sh -c <script> -oX - <target>` binds `$0=-oX $1=- $2=<target>`.
    fn shell(script: &str) -> NmapScanner {
        NmapScanner::new("/bin/sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn stdout_is_returned_on_success() {
        let out = shell(r#"printf '<nmaprun target="%s"/>' "$2""#)
            .scan("10.0.0.5")
            .await
            .unwrap();
        assert_eq!(out, r#"<nmaprun target="10.0.0.5"/>"#);
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_stderr_verbatim() {
        let err = shell("echo 'Failed to resolve \"nohost\".' >&2; exit 1")
            .scan("nohost")
            .await
            .unwrap_err();
        match err {
            CapabilityError::Exit { code, stderr } => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "Failed to resolve \"nohost\".");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn silent_failure_gets_a_generic_message() {
        let err = shell("exit 2").scan("x").await.unwrap_err();
        assert_eq!(err.to_string(), "nmap execution failed");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = NmapScanner::new("/nonexistent/nmap", Vec::new())
            .scan("10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Spawn { .. }));
    }
}
