use tracing::debug;

use super::{SubtitleEntry, SubtitleTrack};
use crate::config::MergeUnit;

fn is_cjk_ideograph(c: char) -> bool {
    matches!(c,
        '\u{4e00}'..='\u{9fff}'
        | '\u{3400}'..='\u{4dbf}'
        | '\u{f900}'..='\u{faff}'
        | '\u{20000}'..='\u{2a6df}')
}

/// Count the tokens in `text` under `unit`.
///
/// Words: whitespace-separated runs that contain at least one alphanumeric
/// character, so "well-known", "don't" and "3.14" are one token each and a
/// lone "-" is none. Every CJK ideograph is its own token.
///
/// Characters: CJK ideographs only; Latin text, digits and punctuation count
/// as zero.
pub fn count_tokens(text: &str, unit: MergeUnit) -> usize {
    match unit {
        MergeUnit::Characters => text.chars().filter(|c| is_cjk_ideograph(*c)).count(),
        MergeUnit::Words => text.split_whitespace().map(count_word_tokens).sum(),
    }
}

fn count_word_tokens(word: &str) -> usize {
    let mut count = 0;
    let mut run_has_alnum = false;

    for c in word.chars() {
        if is_cjk_ideograph(c) {
            if run_has_alnum {
                count += 1;
            }
            run_has_alnum = false;
            count += 1;
        } else if c.is_alphanumeric() {
            run_has_alnum = true;
        }
    }
    if run_has_alnum {
        count += 1;
    }

    count
}

/// Combines adjacent entry pairs into display units within a token budget.
///
/// Single forward pass: an entry is joined with its successor when the pair
/// fits the budget and both are consumed; otherwise it is emitted alone and
/// the successor is considered with the entry after it.
#[derive(Debug, Clone, Copy)]
pub struct MergeEngine {
    unit: MergeUnit,
    budget: usize,
}

impl MergeEngine {
    pub fn new(unit: MergeUnit, budget: usize) -> Self {
        Self { unit, budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn tokens(&self, text: &str) -> usize {
        count_tokens(text, self.unit)
    }

    pub fn merge(&self, track: &SubtitleTrack) -> SubtitleTrack {
        let entries = track.entries();
        let mut units: Vec<SubtitleEntry> = Vec::with_capacity(entries.len());
        let mut i = 0;

        while i < entries.len() {
            let first = &entries[i];
            let mut unit = first.clone();
            unit.text = first.text.trim().to_string();

            if let Some(second) = entries.get(i + 1) {
                let text = second.text.trim();
                if self.tokens(&unit.text) + self.tokens(text) <= self.budget {
                    unit.text = format!("{} {}", unit.text, text);
                    unit.end_ms = second.end_ms;
                    i += 1;
                }
            }

            units.push(unit);
            i += 1;
        }

        debug!("Merged {} entries into {} display units", entries.len(), units.len());

        let mut merged = SubtitleTrack::new(units);
        merged.renumber();
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(texts: &[&str]) -> SubtitleTrack {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let start = i as u64 * 1000;
                SubtitleEntry::new(i + 1, start, start + 900, *t)
            })
            .collect()
    }

    #[test]
    fn test_word_tokens() {
        assert_eq!(count_tokens("well-known don't 3.14", MergeUnit::Words), 3);
        assert_eq!(count_tokens("wait - what ?", MergeUnit::Words), 2);
        assert_eq!(count_tokens("你好世界", MergeUnit::Words), 4);
        assert_eq!(count_tokens("AI模型", MergeUnit::Words), 3);
        assert_eq!(count_tokens("", MergeUnit::Words), 0);
    }

    #[test]
    fn test_character_tokens() {
        let chinese = "这是一段很长的中文文本用于测试计数功能是否正常工作";
        assert_eq!(count_tokens(chinese, MergeUnit::Characters), chinese.chars().count());
        assert_eq!(count_tokens("Hello 世界！This is a test 测试", MergeUnit::Characters), 4);
        assert_eq!(count_tokens("This is English only text", MergeUnit::Characters), 0);
        assert_eq!(count_tokens("你好，世界", MergeUnit::Characters), 4);
    }

    #[test]
    fn test_two_short_entries_merge() {
        let engine = MergeEngine::new(MergeUnit::Words, 15);
        let input = SubtitleTrack::new(vec![
            SubtitleEntry::new(1, 1000, 2000, "So today we're going"),
            SubtitleEntry::new(2, 2100, 3500, "to talk about rust."),
        ]);

        let out = engine.merge(&input);
        assert_eq!(out.len(), 1);
        let merged = &out.entries()[0];
        assert_eq!(merged.index, 1);
        assert_eq!(merged.start_ms, 1000);
        assert_eq!(merged.end_ms, 3500);
        assert_eq!(merged.text, "So today we're going to talk about rust.");
    }

    #[test]
    fn test_merges_pairs_only() {
        let engine = MergeEngine::new(MergeUnit::Words, 15);
        let out = engine.merge(&track(&["a b c", "d e f", "g h i"]));
        let texts: Vec<&str> = out.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c d e f", "g h i"]);
        assert_eq!(out.entries()[0].start_ms, 0);
        assert_eq!(out.entries()[0].end_ms, 1900);
        assert_eq!(out.entries()[1].index, 2);
        assert_eq!(out.entries()[1].start_ms, 2000);
    }

    #[test]
    fn test_budget_splits_pairs() {
        let engine = MergeEngine::new(MergeUnit::Words, 4);
        let out = engine.merge(&track(&["one two three", "four five", "six", "seven"]));
        let texts: Vec<&str> = out.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["one two three", "four five six", "seven"]);
        assert_eq!(out.entries()[1].start_ms, 1000);
        assert_eq!(out.entries()[1].end_ms, 2900);
    }

    #[test]
    fn test_long_chinese_line_stays_alone() {
        let engine = MergeEngine::new(MergeUnit::Characters, 20);
        let long = "这是一段非常长的中文文本超过了二十个字符应该独立显示";
        let out = engine.merge(&track(&[long, "Short text", "Another short text", "第三行短文本", "第四行短文本"]));
        let texts: Vec<&str> = out.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![long, "Short text Another short text", "第三行短文本 第四行短文本"]
        );
    }

    #[test]
    fn test_short_chinese_lines_merge_pairwise() {
        let engine = MergeEngine::new(MergeUnit::Characters, 20);
        let out = engine.merge(&track(&["第一行文本", "第二行文本", "Third line", "第四行"]));
        let texts: Vec<&str> = out.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["第一行文本 第二行文本", "Third line 第四行"]);
    }

    #[test]
    fn test_budget_property() {
        let engine = MergeEngine::new(MergeUnit::Words, 6);
        let input = track(&["a b", "c d e", "f", "g h i j k l m n", "o", "p q", "r"]);
        let out = engine.merge(&input);
        for entry in out.entries() {
            let within = engine.tokens(&entry.text) <= engine.budget();
            let single = input.entries().iter().any(|e| e.text == entry.text);
            assert!(within || single, "unit '{}' violates the budget", entry.text);
        }
    }

    #[test]
    fn test_no_fitting_pair_is_a_fixed_point() {
        let engine = MergeEngine::new(MergeUnit::Words, 5);
        let once = engine.merge(&track(&["a b c", "d e f", "g h i", "j k l m"]));
        assert_eq!(once.len(), 4);
        assert_eq!(engine.merge(&once), once);
    }

    #[test]
    fn test_empty_track() {
        let engine = MergeEngine::new(MergeUnit::Words, 15);
        assert!(engine.merge(&SubtitleTrack::default()).is_empty());
    }
}
