use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tokio::fs;
use tracing::{debug, info};

use super::{BilingualLine, SubtitleEntry, SubtitleTrack, format_srt_time};
use crate::error::{RelayError, Result};

fn timing_regex() -> &'static Regex {
    static TIMING: OnceLock<Regex> = OnceLock::new();
    TIMING.get_or_init(|| {
        Regex::new(
            r"^\s*(\d+):(\d{1,2}):(\d{1,2})[,.](\d{1,3})\s*-->\s*(\d+):(\d{1,2}):(\d{1,2})[,.](\d{1,3})",
        )
        .expect("timing pattern is valid")
    })
}

fn to_ms(hours: &str, minutes: &str, seconds: &str, fraction: &str) -> Option<u64> {
    let h: u64 = hours.parse().ok()?;
    let m: u64 = minutes.parse().ok()?;
    let s: u64 = seconds.parse().ok()?;
    // ".5" is half a second, not five milliseconds
    let padded = format!("{:0<3}", fraction);
    let f: u64 = padded.parse().ok()?;
    h.checked_mul(3_600_000)?
        .checked_add(m * 60_000)?
        .checked_add(s * 1_000)?
        .checked_add(f)
}

struct SrtRecord {
    start_ms: u64,
    end_ms: u64,
    lines: Vec<String>,
}

/// Timed blocks with their non-empty text lines, in file order.
fn parse_records(content: &str) -> Result<Vec<SrtRecord>> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut records = Vec::new();

    for block in content.split("\n\n") {
        let lines: Vec<&str> = block.lines().collect();
        let Some(timing_pos) = lines.iter().position(|l| l.contains("-->")) else {
            continue;
        };

        let caps = timing_regex().captures(lines[timing_pos]).ok_or_else(|| {
            RelayError::Validation(format!("malformed SRT timing line: {}", lines[timing_pos].trim()))
        })?;
        let start = to_ms(&caps[1], &caps[2], &caps[3], &caps[4]);
        let end = to_ms(&caps[5], &caps[6], &caps[7], &caps[8]);
        let (Some(start_ms), Some(end_ms)) = (start, end) else {
            return Err(RelayError::Validation(format!(
                "SRT timestamp out of range: {}",
                lines[timing_pos].trim()
            )));
        };

        let text: Vec<String> = lines[timing_pos + 1..]
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if text.is_empty() {
            debug!("Skipping SRT block without text at {}", format_srt_time(start_ms));
            continue;
        }

        records.push(SrtRecord {
            start_ms,
            end_ms,
            lines: text,
        });
    }

    Ok(records)
}

/// Parse SRT content into a track numbered 1..=n in file order.
///
/// Blocks without a timing line or without any text are skipped; multi-line
/// text is joined with a single space. Timing is not validated here.
pub fn parse_srt(content: &str) -> Result<SubtitleTrack> {
    Ok(parse_records(content)?
        .into_iter()
        .enumerate()
        .map(|(i, record)| SubtitleEntry::new(i + 1, record.start_ms, record.end_ms, record.lines.join(" ")))
        .collect())
}

/// Parse a bilingual SRT: the first text line of each block is the source,
/// the remaining lines the translation. A block with a single line is treated
/// as untranslated.
pub fn parse_bilingual_srt(content: &str) -> Result<(SubtitleTrack, Vec<BilingualLine>)> {
    let mut entries = Vec::new();
    let mut lines = Vec::new();

    for (i, record) in parse_records(content)?.into_iter().enumerate() {
        let index = i + 1;
        let source = record.lines[0].clone();
        let line = if record.lines.len() > 1 {
            BilingualLine {
                index,
                source: source.clone(),
                target: record.lines[1..].join(" "),
            }
        } else {
            BilingualLine::untranslated(index, &source)
        };
        entries.push(SubtitleEntry::new(index, record.start_ms, record.end_ms, source));
        lines.push(line);
    }

    Ok((SubtitleTrack::new(entries), lines))
}

/// Pair a source track with a separately translated track by subtitle index.
/// Timing comes from the source. A source entry with no matching translation
/// is left untranslated.
pub fn pair_tracks(source: &SubtitleTrack, target: &SubtitleTrack) -> Vec<BilingualLine> {
    let translations: HashMap<usize, &str> = target
        .entries()
        .iter()
        .map(|e| (e.index, e.text.trim()))
        .filter(|(_, text)| !text.is_empty())
        .collect();

    source
        .entries()
        .iter()
        .map(|entry| match translations.get(&entry.index) {
            Some(text) => BilingualLine {
                index: entry.index,
                source: entry.text.trim().to_string(),
                target: text.replace('\n', " "),
            },
            None => BilingualLine::untranslated(entry.index, entry.text.trim()),
        })
        .collect()
}

/// Render a track as SRT.
pub fn to_srt(track: &SubtitleTrack) -> String {
    let mut srt_content = String::new();

    for entry in track.entries() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            entry.index,
            format_srt_time(entry.start_ms),
            format_srt_time(entry.end_ms),
            entry.text.trim()
        ));
    }

    srt_content
}

/// Render a track with each entry's source line followed by its translation.
pub fn to_bilingual_srt(track: &SubtitleTrack, lines: &[BilingualLine]) -> Result<String> {
    if track.len() != lines.len() {
        return Err(RelayError::Validation(format!(
            "{} bilingual lines for {} subtitle entries",
            lines.len(),
            track.len()
        )));
    }

    let mut srt_content = String::new();
    for (entry, line) in track.entries().iter().zip(lines) {
        if entry.index != line.index {
            return Err(RelayError::Validation(format!(
                "bilingual line {} does not match subtitle {}",
                line.index, entry.index
            )));
        }
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n{}\n\n",
            entry.index,
            format_srt_time(entry.start_ms),
            format_srt_time(entry.end_ms),
            line.source.trim(),
            line.target.trim()
        ));
    }

    Ok(srt_content)
}

pub async fn read_srt<P: AsRef<Path>>(path: P) -> Result<SubtitleTrack> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RelayError::FileNotFound(path.display().to_string()));
    }

    let content = fs::read_to_string(path).await?;
    let track = parse_srt(&content)?;
    debug!("Read {} subtitle entries from {}", track.len(), path.display());
    Ok(track)
}

/// Write SRT subtitle file from a track
pub async fn write_srt<P: AsRef<Path>>(track: &SubtitleTrack, output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating SRT file: {}", output_path.display());

    fs::write(output_path, to_srt(track)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n00:00:01,000 --> 00:00:02,500\nHello there\n\n2\n00:00:02,400 --> 00:00:04,000\nGeneral\nKenobi\n\n";

    #[test]
    fn test_parse_basic() {
        let track = parse_srt(SAMPLE).unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track.entries()[0], SubtitleEntry::new(1, 1000, 2500, "Hello there"));
        assert_eq!(track.entries()[1].text, "General Kenobi");
        assert_eq!(track.entries()[1].start_ms, 2400);
    }

    #[test]
    fn test_parse_crlf_bom_and_dot_separator() {
        let content = "\u{feff}1\r\n00:00:01.5 --> 00:00:02.250\r\nHi\r\n\r\n";
        let track = parse_srt(content).unwrap();
        assert_eq!(track.len(), 1);
        assert_eq!(track.entries()[0].start_ms, 1500);
        assert_eq!(track.entries()[0].end_ms, 2250);
    }

    #[test]
    fn test_parse_skips_empty_blocks_and_renumbers() {
        let content = "5\n00:00:01,000 --> 00:00:02,000\n\n\n9\n00:00:03,000 --> 00:00:04,000\nkept\n";
        let track = parse_srt(content).unwrap();
        assert_eq!(track.len(), 1);
        assert_eq!(track.entries()[0].index, 1);
        assert_eq!(track.entries()[0].text, "kept");
    }

    #[test]
    fn test_parse_malformed_timing() {
        let content = "1\n00:00:xx,000 --> 00:00:02,000\nbad\n";
        assert!(matches!(parse_srt(content), Err(RelayError::Validation(_))));
    }

    #[test]
    fn test_parse_overflowing_hours() {
        let content = "1\n18446744073709551:00:00,000 --> 18446744073709551:00:01,000\nhuge\n";
        assert!(matches!(parse_srt(content), Err(RelayError::Validation(_))));
    }

    #[test]
    fn test_to_srt_reparses() {
        let track = parse_srt(SAMPLE).unwrap();
        assert_eq!(parse_srt(&to_srt(&track)).unwrap(), track);
    }

    #[test]
    fn test_bilingual_srt() {
        let track = SubtitleTrack::new(vec![SubtitleEntry::new(1, 0, 1000, "Hello")]);
        let lines = vec![BilingualLine {
            index: 1,
            source: "Hello".to_string(),
            target: "你好".to_string(),
        }];
        let out = to_bilingual_srt(&track, &lines).unwrap();
        assert_eq!(out, "1\n00:00:00,000 --> 00:00:01,000\nHello\n你好\n\n");
    }

    #[test]
    fn test_parse_bilingual_srt() {
        let content = "1\n00:00:00,000 --> 00:00:01,000\nHello\n你好\n\n2\n00:00:01,000 --> 00:00:02,000\nAlone\n\n";
        let (track, lines) = parse_bilingual_srt(content).unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track.entries()[0].text, "Hello");
        assert_eq!(lines[0].target, "你好");
        assert_eq!(lines[1], BilingualLine::untranslated(2, "Alone"));
    }

    #[test]
    fn test_pair_tracks_by_index() {
        let source = SubtitleTrack::new(vec![
            SubtitleEntry::new(1, 0, 1000, "Hello"),
            SubtitleEntry::new(2, 1000, 2000, "World"),
            SubtitleEntry::new(3, 2000, 3000, "Again"),
        ]);
        let target = SubtitleTrack::new(vec![
            SubtitleEntry::new(1, 0, 900, "你好"),
            SubtitleEntry::new(3, 2000, 3000, "再一次\n吧"),
        ]);

        let lines = pair_tracks(&source, &target);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].target, "你好");
        assert_eq!(lines[1], BilingualLine::untranslated(2, "World"));
        assert_eq!(lines[2].target, "再一次 吧");

        let srt = to_bilingual_srt(&source, &lines).unwrap();
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,000\nHello\n你好\n"));
    }

    #[test]
    fn test_bilingual_srt_count_mismatch() {
        let track = SubtitleTrack::new(vec![SubtitleEntry::new(1, 0, 1000, "Hello")]);
        assert!(to_bilingual_srt(&track, &[]).is_err());
    }

    #[tokio::test]
    async fn test_read_write_roundtrip_on_disk() {
        let temp = assert_fs::TempDir::new().unwrap();
        let path = temp.path().join("out.srt");
        let track = parse_srt(SAMPLE).unwrap();

        write_srt(&track, &path).await.unwrap();
        let loaded = read_srt(&path).await.unwrap();
        assert_eq!(loaded, track);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let result = read_srt("/nonexistent/file.srt").await;
        assert!(matches!(result, Err(RelayError::FileNotFound(_))));
    }
}
