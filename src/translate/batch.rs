use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use super::TranslationService;
use crate::config::TranslateConfig;
use crate::error::{Result, with_timeout};
use crate::subtitle::{BilingualLine, SubtitleEntry, SubtitleTrack};

fn numbered_line_regex() -> &'static Regex {
    static NUMBERED: OnceLock<Regex> = OnceLock::new();
    NUMBERED.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*[.:：．]\s*(.*)$").expect("numbered line pattern is valid")
    })
}

/// Contiguous run of entries sent to the service as one request.
#[derive(Debug, Clone)]
pub struct TranslationChunk {
    pub number: usize,
    pub entries: Vec<SubtitleEntry>,
}

impl TranslationChunk {
    /// Split a track into chunks of at most `size` entries, preserving order.
    pub fn partition(track: &SubtitleTrack, size: usize) -> Vec<Self> {
        track
            .entries()
            .chunks(size.max(1))
            .enumerate()
            .map(|(i, entries)| Self {
                number: i + 1,
                entries: entries.to_vec(),
            })
            .collect()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.index).collect()
    }

    /// One `"{index}: {text}"` line per entry, using track-wide indices.
    pub fn prompt_body(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}: {}", e.index, e.text.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of translating one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// Every line passed format validation.
    Validated(Vec<BilingualLine>),
    /// Attempts ran out; `unresolved` lines carry their source text in both slots.
    Degraded {
        lines: Vec<BilingualLine>,
        unresolved: Vec<usize>,
    },
}

impl ChunkOutcome {
    pub fn lines(&self) -> &[BilingualLine] {
        match self {
            Self::Validated(lines) | Self::Degraded { lines, .. } => lines,
        }
    }

    pub fn into_lines(self) -> Vec<BilingualLine> {
        match self {
            Self::Validated(lines) | Self::Degraded { lines, .. } => lines,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Lowercased alphanumerics only, for comparing a source echo with its entry.
fn echo_key(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Extract target-language text for the `expected` entries from a model
/// response.
///
/// Each entry should appear as a numbered source echo followed by the
/// translation, which may repeat the number or not. `.`, `:` and their
/// full-width forms are accepted as separators. While an echo waits for its
/// translation, the next line is that translation unless it repeats the
/// source text of another expected entry, so a translation starting with
/// "2:30" or "10." is not mistaken for a new echo. Only entries with non-empty
/// text on both lines are returned.
pub fn parse_bilingual_response(response: &str, expected: &[SubtitleEntry]) -> BTreeMap<usize, String> {
    let sources: BTreeMap<usize, String> = expected.iter().map(|e| (e.index, echo_key(&e.text))).collect();
    let mut pairs: BTreeMap<usize, (String, Option<String>)> = BTreeMap::new();
    let mut pending: Option<usize> = None;

    for raw in response.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("```") || line.starts_with('#') {
            continue;
        }

        let numbered = numbered_line_regex()
            .captures(line)
            .and_then(|caps| Some((caps[1].parse::<usize>().ok()?, caps[2].trim().to_string())))
            .filter(|(index, _)| sources.contains_key(index));

        match (numbered, pending) {
            (Some((index, text)), Some(open)) if index == open => {
                if let Some(pair) = pairs.get_mut(&open) {
                    pair.1 = Some(text);
                }
                pending = None;
            }
            (Some((index, text)), Some(_)) if sources.get(&index).is_some_and(|key| *key == echo_key(&text)) => {
                pairs.insert(index, (text, None));
                pending = Some(index);
            }
            (_, Some(open)) => {
                if let Some(pair) = pairs.get_mut(&open) {
                    pair.1 = Some(line.to_string());
                }
                pending = None;
            }
            (Some((index, text)), None) => {
                pairs.insert(index, (text, None));
                pending = Some(index);
            }
            (None, None) => {}
        }
    }

    pairs
        .into_iter()
        .filter_map(|(index, (source, target))| {
            let target = target?;
            if source.is_empty() || target.is_empty() {
                None
            } else {
                Some((index, target))
            }
        })
        .collect()
}

fn system_prompt(source_language: &str, target_language: &str) -> String {
    format!(
        "You are a professional subtitle translator.\n\
         Translate each numbered {source} subtitle line into {target}.\n\
         \n\
         For every input line output exactly two lines:\n\
         <number>: <the original {source} line, unchanged>\n\
         <number>: <the {target} translation>\n\
         \n\
         Keep the numbers of the input. Do not merge, split, skip or reorder lines.\n\
         Output nothing else: no explanations, headings or code fences.",
        source = source_language,
        target = target_language
    )
}

/// Drives chunked translation with bounded format retries.
pub struct BatchTranslator {
    service: Box<dyn TranslationService>,
    system_prompt: String,
    chunk_size: usize,
    max_attempts: u32,
    request_timeout: Duration,
}

impl BatchTranslator {
    pub fn new(service: Box<dyn TranslationService>, config: &TranslateConfig) -> Self {
        Self {
            service,
            system_prompt: system_prompt(&config.source_language, &config.target_language),
            chunk_size: config.chunk_size.max(1),
            max_attempts: config.max_attempts.max(1),
            request_timeout: config.timeout(),
        }
    }

    /// Translate every entry of `track`, one line per entry in track order.
    ///
    /// Format failures degrade the affected lines; transport failures and
    /// timeouts are returned as errors.
    pub async fn translate(&self, track: &SubtitleTrack) -> Result<Vec<BilingualLine>> {
        let chunks = TranslationChunk::partition(track, self.chunk_size);
        info!("Translating {} subtitle entries in {} chunks", track.len(), chunks.len());

        let mut lines = Vec::with_capacity(track.len());
        let mut degraded = 0;

        for chunk in &chunks {
            let outcome = self.translate_chunk(chunk).await?;
            if outcome.is_degraded() {
                degraded += 1;
            }
            lines.extend(outcome.into_lines());
        }

        if degraded > 0 {
            warn!("{} of {} chunks fell back to source text for some lines", degraded, chunks.len());
        }
        info!("Translation completed: {} bilingual lines", lines.len());
        Ok(lines)
    }

    pub async fn translate_chunk(&self, chunk: &TranslationChunk) -> Result<ChunkOutcome> {
        let body = chunk.prompt_body();
        let indices = chunk.indices();
        let mut resolved: BTreeMap<usize, String> = BTreeMap::new();

        for attempt in 1..=self.max_attempts {
            debug!("Chunk {} attempt {}/{}", chunk.number, attempt, self.max_attempts);

            let response = with_timeout(
                "translation request",
                self.request_timeout,
                self.service.complete(&self.system_prompt, &body),
            )
            .await?;

            if response.trim().is_empty() {
                warn!("Chunk {} attempt {}: empty response", chunk.number, attempt);
                continue;
            }

            resolved.extend(parse_bilingual_response(&response, &chunk.entries));
            let missing = indices.iter().filter(|i| !resolved.contains_key(i)).count();
            if missing == 0 {
                return Ok(ChunkOutcome::Validated(self.assemble(chunk, &resolved)));
            }

            warn!(
                "Chunk {} attempt {}/{}: {} of {} lines failed format validation",
                chunk.number,
                attempt,
                self.max_attempts,
                missing,
                indices.len()
            );
        }

        let unresolved: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|i| !resolved.contains_key(i))
            .collect();
        warn!(
            "Chunk {} exhausted {} attempts; keeping source text for lines {:?}",
            chunk.number, self.max_attempts, unresolved
        );

        Ok(ChunkOutcome::Degraded {
            lines: self.assemble(chunk, &resolved),
            unresolved,
        })
    }

    fn assemble(&self, chunk: &TranslationChunk, resolved: &BTreeMap<usize, String>) -> Vec<BilingualLine> {
        chunk
            .entries
            .iter()
            .map(|entry| match resolved.get(&entry.index) {
                Some(target) => BilingualLine {
                    index: entry.index,
                    source: entry.text.clone(),
                    target: target.clone(),
                },
                None => BilingualLine::untranslated(entry.index, &entry.text),
            })
            .collect()
    }
}
