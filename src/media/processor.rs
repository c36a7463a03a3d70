use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{Encoder, MediaCommand};
use crate::config::MediaConfig;
use crate::error::{RelayError, Result};

/// Escape a path for use inside a quoted ffmpeg filter argument.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// ffmpeg-backed [`Encoder`].
pub struct FfmpegEncoder {
    config: MediaConfig,
}

impl FfmpegEncoder {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Build subtitle burn-in command
    pub fn embed_command(&self, media_path: &Path, subtitle_path: &Path, output_path: &Path) -> MediaCommand {
        MediaCommand::new(&self.config.binary_path, "Subtitle embedding")
            .input(media_path)
            .video_filter(format!("ass='{}'", escape_filter_path(subtitle_path)))
            .copy_audio()
            .args(self.config.subtitle_options.iter().cloned())
            .overwrite()
            .output(output_path)
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn embed(&self, media_path: &Path, subtitle_path: &Path, output_path: &Path) -> Result<PathBuf> {
        info!(
            "Embedding subtitles from {} into {} -> {}",
            subtitle_path.display(),
            media_path.display(),
            output_path.display()
        );

        if !media_path.exists() {
            return Err(RelayError::FileNotFound(media_path.display().to_string()));
        }
        if !subtitle_path.exists() {
            return Err(RelayError::FileNotFound(subtitle_path.display().to_string()));
        }

        self.embed_command(media_path, subtitle_path, output_path)
            .execute(Duration::from_secs(self.config.timeout_secs), RelayError::Encoding)
            .await?;

        if !output_path.exists() {
            return Err(RelayError::Encoding(format!(
                "encoder reported success but {} was not written",
                output_path.display()
            )));
        }

        info!("Subtitle embedding completed successfully");
        Ok(output_path.to_path_buf())
    }

    async fn check_availability(&self) -> Result<()> {
        let output = MediaCommand::new(&self.config.binary_path, "Version check")
            .arg("-version")
            .execute(Duration::from_secs(30), RelayError::Encoding)
            .await?;

        let version = output.stdout.lines().next().unwrap_or("Unknown version").to_string();
        debug!("Encoder available: {}", version);
        Ok(())
    }
}
