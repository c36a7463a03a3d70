//! Dual-layer Advanced SubStation Alpha output.
//!
//! Every bilingual line becomes two dialogue events with identical timing: the
//! translation on the target style's layer and the original on the source
//! style's layer. Output is a pure function of its inputs.

use std::path::Path;

use tokio::fs;
use tracing::info;

use crate::config::{RenderConfig, RenderStyle};
use crate::error::{RelayError, Result};
use crate::subtitle::{BilingualLine, SubtitleEntry, SubtitleTrack};

const STYLE_FORMAT: &str = "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding";
const EVENT_FORMAT: &str = "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text";

/// Format milliseconds as an ASS timestamp (H:MM:SS.cc), truncating to centiseconds.
pub fn format_ass_time(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let secs = (ms % 60_000) / 1_000;
    let centis = (ms % 1_000) / 10;

    format!("{}:{:02}:{:02}.{:02}", hours, minutes, secs, centis)
}

pub fn parse_ass_time(value: &str) -> Option<u64> {
    let (hms, centis) = value.trim().split_once('.')?;
    let mut parts = hms.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let secs: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let centis: u64 = format!("{:0<2}", centis).get(..2)?.parse().ok()?;
    Some(hours * 3_600_000 + minutes * 60_000 + secs * 1_000 + centis * 10)
}

/// A word joiner after each literal backslash keeps `\n`, `\N` and `\h` in
/// the text from being read as override codes.
fn escape_text(text: &str) -> String {
    text.trim()
        .replace('\\', "\\\u{2060}")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace("\r\n", "\\N")
        .replace('\n', "\\N")
}

fn style_line(style: &RenderStyle) -> String {
    format!(
        "Style: {},{},{},{},&H000000FF,{},&H00000000,0,0,0,0,100,100,0,0,1,{},0,{},10,10,{},1",
        style.name,
        style.font_family,
        style.font_size,
        style.primary_color,
        style.outline_color,
        style.outline_width,
        style.alignment,
        style.margin_v
    )
}

fn dialogue_line(style: &RenderStyle, entry: &SubtitleEntry, text: &str) -> String {
    format!(
        "Dialogue: {},{},{},{},,0,0,0,,{}\n",
        style.layer,
        format_ass_time(entry.start_ms),
        format_ass_time(entry.end_ms),
        style.name,
        escape_text(text)
    )
}

/// A dialogue line read back from an ASS document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssEvent {
    pub layer: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub style: String,
    pub text: String,
}

/// Read the dialogue events of an ASS document in file order.
pub fn parse_ass_events(content: &str) -> Result<Vec<AssEvent>> {
    let mut events = Vec::new();

    for line in content.trim_start_matches('\u{feff}').lines() {
        let Some(rest) = line.strip_prefix("Dialogue:") else {
            continue;
        };
        let fields: Vec<&str> = rest.trim_start().splitn(10, ',').collect();
        if fields.len() != 10 {
            return Err(RelayError::Validation(format!("malformed dialogue line: {}", line)));
        }

        let malformed = || RelayError::Validation(format!("malformed dialogue timing: {}", line));
        events.push(AssEvent {
            layer: fields[0].trim().parse().map_err(|_| malformed())?,
            start_ms: parse_ass_time(fields[1]).ok_or_else(malformed)?,
            end_ms: parse_ass_time(fields[2]).ok_or_else(malformed)?,
            style: fields[3].trim().to_string(),
            text: fields[9].to_string(),
        });
    }

    Ok(events)
}

pub struct BilingualRenderer {
    config: RenderConfig,
}

impl BilingualRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Render `lines` against the timing of `track`. Both must carry the same
    /// indices in the same order.
    pub fn render(&self, track: &SubtitleTrack, lines: &[BilingualLine]) -> Result<String> {
        if track.len() != lines.len() {
            return Err(RelayError::Validation(format!(
                "{} bilingual lines for {} subtitle entries",
                lines.len(),
                track.len()
            )));
        }
        if let Some((entry, line)) = track
            .entries()
            .iter()
            .zip(lines)
            .find(|(entry, line)| entry.index != line.index)
        {
            return Err(RelayError::Validation(format!(
                "bilingual line {} does not match subtitle {}",
                line.index, entry.index
            )));
        }

        let target = &self.config.target_style;
        let source = &self.config.source_style;

        let mut out = String::new();
        out.push_str("[Script Info]\n");
        out.push_str("ScriptType: v4.00+\n");
        out.push_str(&format!("PlayResX: {}\n", self.config.play_res_x));
        out.push_str(&format!("PlayResY: {}\n", self.config.play_res_y));
        out.push_str("WrapStyle: 0\n");
        out.push_str("ScaledBorderAndShadow: yes\n\n");

        out.push_str("[V4+ Styles]\n");
        out.push_str(STYLE_FORMAT);
        out.push('\n');
        out.push_str(&style_line(target));
        out.push('\n');
        out.push_str(&style_line(source));
        out.push_str("\n\n");

        out.push_str("[Events]\n");
        out.push_str(EVENT_FORMAT);
        out.push('\n');

        for (entry, line) in track.entries().iter().zip(lines) {
            out.push_str(&dialogue_line(target, entry, &line.target));
        }
        for (entry, line) in track.entries().iter().zip(lines) {
            out.push_str(&dialogue_line(source, entry, &line.source));
        }

        Ok(out)
    }

    /// Render and write with a UTF-8 byte order mark.
    pub async fn write<P: AsRef<Path>>(
        &self,
        track: &SubtitleTrack,
        lines: &[BilingualLine],
        output_path: P,
    ) -> Result<()> {
        let output_path = output_path.as_ref();
        let document = self.render(track, lines)?;

        fs::write(output_path, format!("\u{feff}{}", document)).await?;
        info!("Wrote bilingual subtitles: {} ({} lines)", output_path.display(), lines.len());
        Ok(())
    }
}
