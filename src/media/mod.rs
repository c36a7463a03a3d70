// Media processing
//
// - commands: external command builder and runner shared by every process-backed collaborator
// - processor: ffmpeg-backed subtitle burn-in

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;

/// Burns a styled subtitle artifact into a video.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode `media_path` with `subtitle_path` rendered onto the picture and
    /// return the path of the produced file.
    async fn embed(&self, media_path: &Path, subtitle_path: &Path, output_path: &Path) -> Result<PathBuf>;

    /// Check if the encoder binary is available
    async fn check_availability(&self) -> Result<()>;
}

/// Factory for creating encoder instances
pub struct EncoderFactory;

impl EncoderFactory {
    /// Create the default encoder implementation (FFmpeg-based)
    pub fn create_encoder(config: MediaConfig) -> Box<dyn Encoder> {
        Box::new(processor::FfmpegEncoder::new(config))
    }
}
