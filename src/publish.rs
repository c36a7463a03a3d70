//! Publishing: content preparation plus a command-backed uploader.

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::acquire::ItemMetadata;
use crate::config::PublishConfig;
use crate::error::{RelayError, Result};
use crate::media::MediaCommand;

const MAX_TITLE_CHARS: usize = 80;
const MAX_TAGS: usize = 12;
const MAX_TAG_CHARS: usize = 20;
const DESCRIPTION_EXCERPT_CHARS: usize = 500;

/// Id reported by [`DryRunPublisher`].
pub const DRY_RUN_ID: &str = "dry-run";

/// Everything the uploader needs for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub media_path: PathBuf,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub cover_path: Option<PathBuf>,
    pub source_url: String,
}

impl PublishRequest {
    /// Build the upload content for `media_path` from the source metadata.
    pub fn prepare(media_path: &Path, metadata: &ItemMetadata, cover_path: Option<PathBuf>) -> Self {
        let uploader = metadata.uploader_name();
        Self {
            media_path: media_path.to_path_buf(),
            title: build_title(&metadata.title, uploader),
            description: build_description(metadata),
            tags: build_tags(uploader, &metadata.tags),
            cover_path,
            source_url: metadata.source_url.clone(),
        }
    }
}

/// Uploads a finished video and returns the id the destination assigned.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> Result<String>;
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Collapse whitespace, replace `||` runs with a full-width bar.
pub fn clean_title(title: &str) -> String {
    let collapsed = title.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let mut bars = 0;
    for c in collapsed.chars().chain(std::iter::once('\0')) {
        if c == '|' {
            bars += 1;
            continue;
        }
        match bars {
            0 => {}
            1 => out.push('|'),
            _ => out.push('｜'),
        }
        bars = 0;
        if c != '\0' {
            out.push(c);
        }
    }
    out
}

/// `"<title> | <uploader>"`, kept within the destination's title limit.
/// The uploader suffix survives truncation when there is room for it.
pub fn build_title(title: &str, uploader: &str) -> String {
    let title = clean_title(title);
    let suffix = if uploader.is_empty() {
        String::new()
    } else {
        format!(" | {}", uploader)
    };

    let full = format!("{}{}", title, suffix);
    if full.chars().count() <= MAX_TITLE_CHARS {
        return full;
    }

    let available = MAX_TITLE_CHARS.saturating_sub(suffix.chars().count());
    if !suffix.is_empty() && available > 10 {
        format!("{}...{}", truncate_chars(&title, available - 3), suffix)
    } else {
        format!("{}...", truncate_chars(&full, MAX_TITLE_CHARS - 3))
    }
}

pub fn build_description(metadata: &ItemMetadata) -> String {
    let uploader = metadata.uploader_name();
    let mut description = format!(
        "本视频转载自YouTube频道「{}」\n仅供学习交流使用，版权归原作者所有。",
        if uploader.is_empty() { "未知" } else { uploader }
    );
    if !metadata.source_url.is_empty() {
        description.push_str(&format!("\n原视频：{}", metadata.source_url));
    }

    let original = metadata.description.trim();
    if !original.is_empty() {
        let excerpt = truncate_chars(original, DESCRIPTION_EXCERPT_CHARS);
        let ellipsis = if original.chars().count() > DESCRIPTION_EXCERPT_CHARS { "..." } else { "" };
        description.push_str(&format!("\n\n原描述摘要：\n{}{}", excerpt, ellipsis));
    }

    description
}

/// Uploader first, then short source tags; de-duplicated and capped.
pub fn build_tags(uploader: &str, tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let candidates = std::iter::once(uploader).chain(tags.iter().map(String::as_str));

    for tag in candidates {
        let tag = tag.trim();
        if tag.is_empty() || tag.chars().count() >= MAX_TAG_CHARS {
            continue;
        }
        if out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            continue;
        }
        out.push(tag.to_string());
        if out.len() == MAX_TAGS {
            break;
        }
    }

    out
}

/// Runs a configured uploader binary with an argument template.
pub struct CommandPublisher {
    config: PublishConfig,
    id_pattern: Regex,
}

impl CommandPublisher {
    pub fn new(config: PublishConfig) -> Result<Self> {
        let id_pattern = Regex::new(&config.id_pattern)
            .map_err(|e| RelayError::Config(format!("Invalid publish id_pattern: {}", e)))?;
        Ok(Self { config, id_pattern })
    }

    /// Expand the argument template. A token whose placeholder has no value is
    /// dropped together with the flag right before it.
    pub fn expand_args(&self, request: &PublishRequest) -> Vec<String> {
        let cover = request.cover_path.as_ref().map(|p| p.to_string_lossy().to_string());
        let values: [(&str, Option<String>); 7] = [
            ("{video}", Some(request.media_path.to_string_lossy().to_string())),
            ("{title}", Some(request.title.clone())),
            ("{description}", Some(request.description.clone())),
            ("{tags}", Some(request.tags.join(","))),
            ("{cover}", cover),
            ("{category}", Some(self.config.category.to_string())),
            ("{source}", Some(request.source_url.clone()).filter(|s| !s.is_empty())),
        ];

        let mut args: Vec<String> = Vec::with_capacity(self.config.args.len());
        for template in &self.config.args {
            let mut arg = template.clone();
            let mut missing = false;
            for (placeholder, value) in &values {
                if arg.contains(placeholder) {
                    match value {
                        Some(v) => arg = arg.replace(placeholder, v),
                        None => missing = true,
                    }
                }
            }

            if missing {
                if args.last().is_some_and(|prev| prev.starts_with('-')) {
                    args.pop();
                }
                continue;
            }
            args.push(arg);
        }
        args
    }
}

#[async_trait]
impl Publisher for CommandPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        info!("Publishing {} as \"{}\"", request.media_path.display(), request.title);

        if !request.media_path.exists() {
            return Err(RelayError::FileNotFound(request.media_path.display().to_string()));
        }

        let output = MediaCommand::new(&self.config.binary_path, "Upload")
            .args(self.expand_args(request))
            .execute(Duration::from_secs(self.config.timeout_secs), RelayError::Publish)
            .await?;

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        match self.id_pattern.find(&combined) {
            Some(m) => {
                info!("Published as {}", m.as_str());
                Ok(m.as_str().to_string())
            }
            None => {
                warn!("Uploader succeeded but printed no id matching {}", self.config.id_pattern);
                Ok("unknown".to_string())
            }
        }
    }
}

/// Logs the prepared request instead of uploading it.
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        info!("Dry run, not uploading {}", request.media_path.display());
        info!("  title: {}", request.title);
        info!("  tags: {}", request.tags.join(", "));
        if let Some(cover) = &request.cover_path {
            info!("  cover: {}", cover.display());
        }
        debug!("  description:\n{}", request.description);
        Ok(DRY_RUN_ID.to_string())
    }
}
