use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub subtitle: SubtitleConfig,
    pub translate: TranslateConfig,
    pub render: RenderConfig,
    pub acquire: AcquireConfig,
    pub media: MediaConfig,
    pub publish: PublishConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    /// Frame rate used to derive the minimum gap between consecutive entries
    pub fps: f64,
    /// Unit the merge budget is counted in
    pub merge_unit: MergeUnit,
    /// Maximum tokens per merged pair (words or ideographs, per `merge_unit`)
    pub merge_budget: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeUnit {
    /// Whitespace-separated words; each CJK ideograph counts on its own
    Words,
    /// CJK ideographs only
    Characters,
}

impl MergeUnit {
    pub fn default_budget(self) -> usize {
        match self {
            Self::Words => 15,
            Self::Characters => 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// Base URL of an OpenAI-compatible chat completions API
    pub base_url: String,
    /// API key; falls back to the OPENAI_API_KEY environment variable when empty
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    /// Subtitle entries per request
    pub chunk_size: usize,
    /// Attempts per chunk before degrading to source text
    pub max_attempts: u32,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Display name of the source language used in the prompt
    pub source_language: String,
    /// Display name of the target language used in the prompt
    pub target_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub play_res_x: u32,
    pub play_res_y: u32,
    /// Style of the target-language (upper) layer
    pub target_style: RenderStyle,
    /// Style of the source-language (lower) layer
    pub source_style: RenderStyle,
}

/// Visual parameters of one language layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderStyle {
    pub name: String,
    pub font_family: String,
    pub font_size: u32,
    /// ASS colour literal, e.g. `&H00FFFFFF`
    pub primary_color: String,
    pub outline_color: String,
    pub outline_width: f32,
    /// Vertical margin from the bottom edge in script pixels
    pub margin_v: u32,
    /// Numpad-style alignment (2 = bottom centre)
    pub alignment: u8,
    pub layer: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireConfig {
    /// Path to the yt-dlp binary
    pub binary_path: String,
    /// Preferred quality: 480p, 720p or 1080p
    pub quality: String,
    /// Subtitle language requested from the source
    pub subtitle_language: String,
    /// Directory that receives one folder per item
    pub download_dir: PathBuf,
    /// Optional cookies file passed through to yt-dlp
    pub cookies_file: Option<PathBuf>,
    pub timeout_secs: u64,
    pub discovery_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Additional encoding options for subtitle embedding
    /// Common options: ["-preset", "medium", "-crf", "23"]
    pub subtitle_options: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Uploader binary, e.g. biliup
    pub binary_path: String,
    /// Argument template; `{video}`, `{title}`, `{description}`, `{tags}`,
    /// `{cover}`, `{category}` and `{source}` are substituted per item
    pub args: Vec<String>,
    /// Pattern matched against uploader stdout to recover the published id
    pub id_pattern: String,
    pub category: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Channel list, one channel per line
    pub channels_file: PathBuf,
    /// Persistent record of processed item identifiers
    pub history_file: PathBuf,
    /// Singleton lock file
    pub lock_file: PathBuf,
    /// Most recent items fetched per channel per cycle
    pub items_per_channel: usize,
    /// Seconds between poll cycles in continuous mode
    pub poll_interval_secs: u64,
    /// Seconds to wait before the single retry of a failed item
    pub retry_delay_secs: u64,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            fps: 60.0,
            merge_unit: MergeUnit::Words,
            merge_budget: MergeUnit::Words.default_budget(),
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            chunk_size: 10,
            max_attempts: 5,
            timeout_secs: 120,
            source_language: "English".to_string(),
            target_language: "Simplified Chinese".to_string(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            play_res_x: 1280,
            play_res_y: 720,
            target_style: RenderStyle {
                name: "Target".to_string(),
                font_family: "VYuan_Round".to_string(),
                font_size: 24,
                primary_color: "&H00FFFFFF".to_string(),
                outline_color: "&H00B36200".to_string(),
                outline_width: 3.0,
                margin_v: 40,
                alignment: 2,
                layer: 1,
            },
            source_style: RenderStyle {
                name: "Source".to_string(),
                font_family: "Arial".to_string(),
                font_size: 18,
                primary_color: "&H00FFFFFF".to_string(),
                outline_color: "&H00000000".to_string(),
                outline_width: 2.0,
                margin_v: 12,
                alignment: 2,
                layer: 0,
            },
        }
    }
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            quality: "720p".to_string(),
            subtitle_language: "en".to_string(),
            download_dir: PathBuf::from("downloads"),
            cookies_file: None,
            timeout_secs: 3600,
            discovery_timeout_secs: 120,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            subtitle_options: vec![
                // "-preset".to_string(), "medium".to_string(),
                // "-crf".to_string(), "23".to_string(),
            ],
            timeout_secs: 7200,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            binary_path: "biliup".to_string(),
            args: [
                "upload", "{video}", "--title", "{title}", "--desc", "{description}",
                "--tag", "{tags}", "--tid", "{category}", "--source", "{source}",
                "--cover", "{cover}", "--copyright", "2",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            id_pattern: r"BV[0-9A-Za-z]{10}".to_string(),
            category: 122,
            timeout_secs: 3600,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            channels_file: PathBuf::from("youtuber.txt"),
            history_file: PathBuf::from("subscription_history.json"),
            lock_file: PathBuf::from(".updating"),
            items_per_channel: 3,
            poll_interval_secs: 3600,
            retry_delay_secs: 5,
        }
    }
}

impl TranslateConfig {
    /// Configured key, or the OPENAI_API_KEY environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.trim().to_string());
        }
        std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RelayError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RelayError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if !(self.subtitle.fps.is_finite() && self.subtitle.fps > 0.0) {
            return Err(RelayError::Config(format!("fps must be positive, got {}", self.subtitle.fps)));
        }
        if self.subtitle.merge_budget == 0 {
            return Err(RelayError::Config("merge_budget must be at least 1".to_string()));
        }
        if self.translate.chunk_size == 0 {
            return Err(RelayError::Config("chunk_size must be at least 1".to_string()));
        }
        if self.translate.max_attempts == 0 {
            return Err(RelayError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.monitor.items_per_channel == 0 {
            return Err(RelayError::Config("items_per_channel must be at least 1".to_string()));
        }
        Ok(())
    }
}
