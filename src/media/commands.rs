use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{RelayError, Result, with_timeout};

/// External tool invocation: binary, arguments and a description used in errors.
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

/// Captured output of a successful command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl MediaCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Copy audio stream
    pub fn copy_audio(self) -> Self {
        self.arg("-c:a").arg("copy")
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Run to completion under `limit`. Spawn failures and non-zero exits are
    /// mapped through `fail` so each collaborator reports its own error kind.
    pub async fn execute<F>(&self, limit: Duration, fail: F) -> Result<CommandOutput>
    where
        F: Fn(String) -> RelayError,
    {
        debug!("Executing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(&self.args).kill_on_drop(true);

        let output = with_timeout(&self.description, limit, async {
            cmd.output().await.map_err(|e| {
                fail(format!("Failed to execute {}: {}", self.binary_path, e))
            })
        })
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(fail(format!(
                "{} failed ({}): {}",
                self.description,
                output.status,
                stderr.trim()
            )));
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_order() {
        let cmd = MediaCommand::new("ffmpeg", "Embed")
            .input("in.mp4")
            .video_filter("ass=a.ass")
            .copy_audio()
            .args(["-preset", "fast"])
            .overwrite()
            .output("out.mp4");

        assert_eq!(
            cmd.args,
            vec!["-i", "in.mp4", "-vf", "ass=a.ass", "-c:a", "copy", "-preset", "fast", "-y", "out.mp4"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_uses_error_mapper() {
        let cmd = MediaCommand::new("/nonexistent/binary-for-tests", "Probe");
        let result = cmd.execute(Duration::from_secs(5), RelayError::Encoding).await;
        assert!(matches!(result, Err(RelayError::Encoding(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout() {
        let cmd = MediaCommand::new("sh", "Echo").arg("-c").arg("echo hello");
        let output = cmd.execute(Duration::from_secs(5), RelayError::Publish).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let cmd = MediaCommand::new("sh", "Fail").arg("-c").arg("echo oops >&2; exit 3");
        let result = cmd.execute(Duration::from_secs(5), RelayError::Acquisition).await;
        match result {
            Err(RelayError::Acquisition(message)) => assert!(message.contains("oops")),
            other => panic!("expected acquisition error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let cmd = MediaCommand::new("sh", "Sleep").arg("-c").arg("sleep 5");
        let result = cmd.execute(Duration::from_millis(100), RelayError::Encoding).await;
        assert!(matches!(result, Err(RelayError::Timeout { .. })));
    }
}
