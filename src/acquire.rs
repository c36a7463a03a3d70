//! Work discovery and media acquisition.
//!
//! The traits are what the workflow and monitor consume; the yt-dlp backed
//! implementation shells out through [`MediaCommand`].

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::AcquireConfig;
use crate::error::{RelayError, Result};
use crate::media::MediaCommand;

/// A candidate item found on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub channel: String,
}

impl WorkItem {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            channel: String::new(),
        }
    }
}

/// Descriptive data recovered alongside the media.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uploader: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "webpage_url")]
    pub source_url: String,
}

impl ItemMetadata {
    /// Uploader name, falling back to the channel name.
    pub fn uploader_name(&self) -> &str {
        if self.uploader.trim().is_empty() {
            self.channel.trim()
        } else {
            self.uploader.trim()
        }
    }
}

/// Files produced by a successful acquisition.
#[derive(Debug, Clone)]
pub struct AcquiredMedia {
    pub media_path: PathBuf,
    /// Source-language subtitles, if the item had any
    pub subtitle_path: Option<PathBuf>,
    pub thumbnail_path: Option<PathBuf>,
    pub metadata: ItemMetadata,
}

/// Lists the newest items of a channel.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn recent_items(&self, channel: &str, limit: usize) -> Result<Vec<WorkItem>>;
}

/// Downloads one item into a folder.
#[async_trait]
pub trait Acquirer: Send + Sync {
    async fn acquire(&self, item_id: &str, quality: &str, folder: &Path) -> Result<AcquiredMedia>;
}

fn channel_url_regexes() -> &'static [(Regex, bool)] {
    static PATTERNS: OnceLock<Vec<(Regex, bool)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"/@([\w.-]+)", true),
            (r"/channel/(UC[\w-]+)", false),
            (r"/c/([\w.-]+)", true),
            (r"/user/([\w.-]+)", true),
        ]
        .iter()
        .map(|(pattern, handle)| (Regex::new(pattern).expect("channel pattern is valid"), *handle))
        .collect()
    })
}

/// Normalize one channel list line to `@handle` or a `UC…` channel id.
/// Blank lines and `#` comments yield `None`.
pub fn parse_channel_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if line.contains("://") || line.contains("youtube.com") {
        for (regex, is_handle) in channel_url_regexes() {
            if let Some(caps) = regex.captures(line) {
                return Some(if *is_handle {
                    format!("@{}", &caps[1])
                } else {
                    caps[1].to_string()
                });
            }
        }
        warn!("Unrecognized channel URL: {}", line);
        return None;
    }

    if line.starts_with('@') || (line.starts_with("UC") && line.len() == 24) {
        Some(line.to_string())
    } else {
        Some(format!("@{}", line))
    }
}

/// Read a channel list file, one channel per line.
pub fn load_channels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RelayError::FileNotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    let mut channels: Vec<String> = Vec::new();
    for channel in content.lines().filter_map(parse_channel_line) {
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }

    info!("Loaded {} channels from {}", channels.len(), path.display());
    Ok(channels)
}

/// Listing URL of a channel's uploads.
pub fn channel_videos_url(channel: &str) -> String {
    if channel.starts_with('@') {
        format!("https://www.youtube.com/{}/videos", channel)
    } else if channel.starts_with("UC") {
        format!("https://www.youtube.com/channel/{}/videos", channel)
    } else {
        format!("https://www.youtube.com/c/{}/videos", channel)
    }
}

pub fn item_url(item_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", item_id)
}

/// yt-dlp format selector for a quality preference.
pub fn format_selector(quality: &str) -> &'static str {
    match quality.trim().to_lowercase().as_str() {
        "480p" => "best[height<=480]/best",
        "1080p" => "bestvideo[height<=1080]+bestaudio/best[height<=1080]/best",
        _ => "best[height<=720]/best",
    }
}

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    #[serde(default)]
    entries: Vec<FlatEntry>,
    #[serde(default)]
    channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Parse `yt-dlp --flat-playlist -J` output.
pub fn parse_flat_playlist(json: &str, channel: &str, limit: usize) -> Result<Vec<WorkItem>> {
    let playlist: FlatPlaylist = serde_json::from_str(json)?;
    let channel_name = playlist.channel.unwrap_or_else(|| channel.to_string());

    Ok(playlist
        .entries
        .into_iter()
        .filter_map(|entry| {
            let id = entry.id?;
            Some(WorkItem {
                id,
                title: entry.title.unwrap_or_default(),
                channel: channel_name.clone(),
            })
        })
        .take(limit)
        .collect())
}

/// Files a download left in `folder`.
#[derive(Debug, Default)]
pub struct FolderContents {
    pub media: Option<PathBuf>,
    pub subtitles: Option<PathBuf>,
    pub thumbnail: Option<PathBuf>,
    pub info_json: Option<PathBuf>,
}

/// Walk `folder` and classify what an acquisition produced. Subtitles in
/// `language` win over other languages.
pub fn scan_folder(folder: &Path, language: &str) -> FolderContents {
    let mut contents = FolderContents::default();
    let language_tag = format!(".{}", language);
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();

    for path in files {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".info.json") {
            contents.info_json.get_or_insert(path);
        } else if ext == "srt" {
            // Our own outputs live next to the download
            if ["_fix.srt", "_bilingual.srt", "_merged.srt"].iter().any(|s| name.ends_with(s)) {
                continue;
            }
            let preferred = name.contains(&language_tag);
            let keep_existing = contents.subtitles.as_ref().is_some_and(|existing| {
                !preferred || existing.to_string_lossy().contains(&language_tag)
            });
            if !keep_existing {
                contents.subtitles = Some(path);
            }
        } else if ["mp4", "mkv", "webm", "mov"].contains(&ext.as_str()) {
            let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
            if stem.ends_with("_bilingual") || name.contains(".part") {
                continue;
            }
            contents.media.get_or_insert(path);
        } else if ["jpg", "jpeg", "png", "webp"].contains(&ext.as_str()) {
            if name.starts_with("cover.") {
                contents.thumbnail = Some(path);
            } else {
                contents.thumbnail.get_or_insert(path);
            }
        }
    }

    contents
}

/// yt-dlp backed [`Discovery`] and [`Acquirer`].
pub struct YtDlp {
    config: AcquireConfig,
}

impl YtDlp {
    pub fn new(config: AcquireConfig) -> Self {
        Self { config }
    }

    fn base_command(&self, description: &str) -> MediaCommand {
        let mut cmd = MediaCommand::new(&self.config.binary_path, description).arg("--no-warnings");
        if let Some(cookies) = &self.config.cookies_file {
            cmd = cmd.arg("--cookies").arg(cookies.to_string_lossy().to_string());
        }
        cmd
    }

    pub fn download_command(&self, item_id: &str, quality: &str, folder: &Path) -> MediaCommand {
        let template = folder.join("%(id)s.%(ext)s");
        self.base_command("Media download")
            .arg("-f")
            .arg(format_selector(quality))
            .args(["--merge-output-format", "mp4"])
            .args(["--write-subs", "--write-auto-subs"])
            .arg("--sub-langs")
            .arg(self.config.subtitle_language.clone())
            .args(["--convert-subs", "srt"])
            .args(["--write-thumbnail", "--convert-thumbnails", "jpg"])
            .arg("--write-info-json")
            .arg("-o")
            .arg(template.to_string_lossy().to_string())
            .arg(item_url(item_id))
    }
}

#[async_trait]
impl Discovery for YtDlp {
    async fn recent_items(&self, channel: &str, limit: usize) -> Result<Vec<WorkItem>> {
        let url = channel_videos_url(channel);
        debug!("Listing {} newest items of {}", limit, url);

        let output = self
            .base_command("Channel listing")
            .arg("--flat-playlist")
            .arg("--playlist-end")
            .arg(limit.to_string())
            .arg("-J")
            .arg(url)
            .execute(Duration::from_secs(self.config.discovery_timeout_secs), RelayError::Acquisition)
            .await?;

        parse_flat_playlist(&output.stdout, channel, limit)
            .map_err(|e| RelayError::Acquisition(format!("Unreadable listing for {}: {}", channel, e)))
    }
}

#[async_trait]
impl Acquirer for YtDlp {
    async fn acquire(&self, item_id: &str, quality: &str, folder: &Path) -> Result<AcquiredMedia> {
        info!("Downloading {} ({}) into {}", item_id, quality, folder.display());
        tokio::fs::create_dir_all(folder).await?;

        self.download_command(item_id, quality, folder)
            .execute(Duration::from_secs(self.config.timeout_secs), RelayError::Acquisition)
            .await?;

        let contents = scan_folder(folder, &self.config.subtitle_language);
        let media_path = contents.media.ok_or_else(|| {
            RelayError::Acquisition(format!("No media file for {} in {}", item_id, folder.display()))
        })?;

        let metadata = match &contents.info_json {
            Some(path) => {
                let raw = tokio::fs::read_to_string(path).await?;
                serde_json::from_str(&raw).unwrap_or_else(|e| {
                    warn!("Unreadable metadata {}: {}", path.display(), e);
                    ItemMetadata::default()
                })
            }
            None => ItemMetadata::default(),
        };

        Ok(AcquiredMedia {
            media_path,
            subtitle_path: contents.subtitles,
            thumbnail_path: contents.thumbnail,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel_line() {
        assert_eq!(parse_channel_line("  "), None);
        assert_eq!(parse_channel_line("# comment"), None);
        assert_eq!(parse_channel_line("@veritasium"), Some("@veritasium".to_string()));
        assert_eq!(parse_channel_line("veritasium"), Some("@veritasium".to_string()));
        assert_eq!(
            parse_channel_line("UCHnyfMqiRRG1u-2MsSQLbXA"),
            Some("UCHnyfMqiRRG1u-2MsSQLbXA".to_string())
        );
        assert_eq!(
            parse_channel_line("https://www.youtube.com/@3blue1brown/videos"),
            Some("@3blue1brown".to_string())
        );
        assert_eq!(
            parse_channel_line("https://www.youtube.com/channel/UCYO_jab_esuFRV4b17AJtAw"),
            Some("UCYO_jab_esuFRV4b17AJtAw".to_string())
        );
        assert_eq!(
            parse_channel_line("https://youtube.com/user/someone"),
            Some("@someone".to_string())
        );
    }

    #[test]
    fn test_load_channels_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("youtuber.txt");
        std::fs::write(&path, "# list\n@a\n\nhttps://www.youtube.com/@a\nb\n").unwrap();

        assert_eq!(load_channels(&path).unwrap(), vec!["@a".to_string(), "@b".to_string()]);
    }

    #[test]
    fn test_channel_videos_url() {
        assert_eq!(channel_videos_url("@a"), "https://www.youtube.com/@a/videos");
        assert_eq!(channel_videos_url("UCx"), "https://www.youtube.com/channel/UCx/videos");
    }

    #[test]
    fn test_format_selector() {
        assert_eq!(format_selector("480p"), "best[height<=480]/best");
        assert_eq!(format_selector("unknown"), "best[height<=720]/best");
    }

    #[test]
    fn test_parse_flat_playlist() {
        let json = r#"{"channel":"Veritasium","entries":[{"id":"aaa","title":"One"},{"title":"no id"},{"id":"bbb"},{"id":"ccc"}]}"#;
        let items = parse_flat_playlist(json, "@veritasium", 2).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "aaa");
        assert_eq!(items[0].channel, "Veritasium");
        assert_eq!(items[1].id, "bbb");
    }

    #[test]
    fn test_scan_folder() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "abc.mp4",
            "abc.de.srt",
            "abc.en.srt",
            "abc_fix.srt",
            "abc.jpg",
            "abc.info.json",
            "abc_bilingual.mp4",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let contents = scan_folder(dir.path(), "en");
        assert_eq!(contents.media.unwrap().file_name().unwrap(), "abc.mp4");
        assert_eq!(contents.subtitles.unwrap().file_name().unwrap(), "abc.en.srt");
        assert_eq!(contents.thumbnail.unwrap().file_name().unwrap(), "abc.jpg");
        assert!(contents.info_json.is_some());
    }

    #[test]
    fn test_scan_folder_keeps_ids_containing_suffix_words() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a_fixQ_bilingualZ.mp4", "a_fixQ_bilingualZ.en.srt", "a_fixQ_bilingualZ_fix.srt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let contents = scan_folder(dir.path(), "en");
        assert_eq!(contents.media.unwrap().file_name().unwrap(), "a_fixQ_bilingualZ.mp4");
        assert_eq!(contents.subtitles.unwrap().file_name().unwrap(), "a_fixQ_bilingualZ.en.srt");
    }

    #[test]
    fn test_metadata_from_info_json() {
        let json = r#"{"title":"T","channel":"Chan","tags":["a"],"webpage_url":"https://x","extra":1}"#;
        let metadata: ItemMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.uploader_name(), "Chan");
        assert_eq!(metadata.source_url, "https://x");
        assert!(metadata.description.is_empty());
    }

    #[test]
    fn test_download_command() {
        let ytdlp = YtDlp::new(AcquireConfig::default());
        let cmd = ytdlp.download_command("abc", "480p", Path::new("/tmp/job"));
        assert!(cmd.args.contains(&"best[height<=480]/best".to_string()));
        assert_eq!(cmd.args.last().unwrap(), "https://www.youtube.com/watch?v=abc");
    }
}
