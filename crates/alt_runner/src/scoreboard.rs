//! Sidebar scoreboard interpretation.
//!
//! The game exposes no direct "which world am I in" query, so the current world
//! is inferred from the sidebar objective the server renders. Server sidebars
//! mix the world name with balance, power, season banners and links, often in
//! stylized small-capital fonts, so every line is normalized before it is
//! matched against the deny-list while the original text is what gets reported.
//!
//! Everything in this module is pure: the same snapshot always yields the
//! same answer.

use crate::config::default_deny_patterns;
use crate::error::ConfigError;
use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Number of lines after the season banner searched first
const WINDOW: usize = 6;

/// Where an objective is displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplaySlot {
    List,
    Sidebar,
    BelowName,
}

impl DisplaySlot {
    pub fn from_position(position: u8) -> Option<Self> {
        match position {
            0 => Some(DisplaySlot::List),
            1 => Some(DisplaySlot::Sidebar),
            2 => Some(DisplaySlot::BelowName),
            _ => None,
        }
    }
}

/// One scored line of an objective
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLine {
    /// Rendered display text, possibly carrying `§x` formatting codes
    pub name: String,
    pub score: i32,
}

impl ScoreLine {
    pub fn new(name: impl Into<String>, score: i32) -> Self {
        Self { name: name.into(), score }
    }
}

/// Point-in-time copy of a scoreboard objective
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScoreboardSnapshot {
    /// Objective identifier
    pub name: String,
    pub title: String,
    pub slot: Option<DisplaySlot>,
    pub items: Vec<ScoreLine>,
}

impl ScoreboardSnapshot {
    /// Builds a sidebar snapshot whose lines render top to bottom in the given order
    pub fn sidebar<S: AsRef<str>>(name: impl Into<String>, lines: &[S]) -> Self {
        let count = lines.len() as i32;
        Self {
            name: name.into(),
            title: String::new(),
            slot: Some(DisplaySlot::Sidebar),
            items: lines
                .iter()
                .enumerate()
                .map(|(i, l)| ScoreLine::new(l.as_ref(), count - i as i32))
                .collect(),
        }
    }
}

/// Ordered display lines of a snapshot.
///
/// Sorted by score descending (ties alphabetically), formatting codes removed,
/// empty and `-` placeholder lines dropped.
pub fn lines_from_snapshot(snapshot: &ScoreboardSnapshot) -> Vec<String> {
    let mut items: Vec<&ScoreLine> = snapshot.items.iter().collect();
    items.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));

    items
        .into_iter()
        .map(|item| strip_format_codes(item.name.trim()).trim().to_string())
        .filter(|line| !line.is_empty() && line != "-")
        .collect()
}

/// Removes legacy `§x` colour and style codes
pub fn strip_format_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '§' {
            if let Some(&next) = chars.peek() {
                if is_format_code(next) {
                    chars.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    out
}

fn is_format_code(ch: char) -> bool {
    matches!(ch.to_ascii_lowercase(), '0'..='9' | 'a'..='f' | 'k'..='o' | 'r')
}

/// Folds a line into plain lowercase ASCII-ish text for matching
pub fn normalize_for_match(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .map(fold_small_capital)
        .collect::<String>()
        .to_lowercase()
}

fn fold_small_capital(ch: char) -> char {
    match ch {
        'ᴀ' => 'a',
        'ʙ' => 'b',
        'ᴄ' => 'c',
        'ᴅ' => 'd',
        'ᴇ' => 'e',
        'ғ' => 'f',
        'ɢ' => 'g',
        'ʜ' => 'h',
        'ɪ' => 'i',
        'ᴊ' => 'j',
        'ᴋ' => 'k',
        'ʟ' => 'l',
        'ᴍ' => 'm',
        'ɴ' => 'n',
        'ᴏ' => 'o',
        'ᴘ' => 'p',
        'ǫ' => 'q',
        'ʀ' => 'r',
        'ꜱ' => 's',
        'ᴛ' => 't',
        'ᴜ' => 'u',
        'ᴠ' => 'v',
        'ᴡ' => 'w',
        'ʏ' => 'y',
        'ᴢ' => 'z',
        other => other,
    }
}

/// True when `word` appears in `text` delimited by non-word characters
fn contains_word(text: &str, word: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    text.match_indices(word).any(|(idx, _)| {
        let before = text[..idx].chars().next_back();
        let after = text[idx + word.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Decides which sidebar line, if any, names the current world
#[derive(Debug, Clone)]
pub struct WorldFilter {
    deny: RegexSet,
}

impl WorldFilter {
    /// Compiles a keyword deny-list; patterns match case-insensitively
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        for pattern in patterns {
            if let Err(source) = regex::Regex::new(pattern.as_ref()) {
                return Err(ConfigError::InvalidPattern {
                    pattern: pattern.as_ref().to_string(),
                    source,
                });
            }
        }

        let deny = RegexSetBuilder::new(patterns.iter().map(|p| p.as_ref()))
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: "<deny-list>".to_string(),
                source,
            })?;

        Ok(Self { deny })
    }

    /// Whether a line may name a world
    pub fn is_candidate(&self, raw: &str, normalized: &str) -> bool {
        let trimmed = raw.trim_start();
        let Some(first) = trimmed.chars().next() else {
            return false;
        };

        // Brackets, bullets and decorative glyphs mark labels, not world names
        if !first.is_alphanumeric() {
            return false;
        }
        if self.deny.is_match(normalized) {
            return false;
        }
        if has_bracketed_tag(raw) || raw.contains(':') {
            return false;
        }
        true
    }

    /// Picks the world line out of ordered sidebar lines.
    ///
    /// Scanning starts right after a "season" banner when one exists (clamped to
    /// the last line) and only looks a few lines deep; when nothing in that
    /// window qualifies every line is considered.
    pub fn guess_world<S: AsRef<str>>(&self, lines: &[S]) -> Option<String> {
        if lines.is_empty() {
            return None;
        }

        let pairs: Vec<(&str, String)> = lines
            .iter()
            .map(|l| (l.as_ref(), normalize_for_match(l.as_ref())))
            .collect();

        let start = pairs
            .iter()
            .position(|(_, norm)| contains_word(norm, "season"))
            .map(|idx| (idx + 1).min(pairs.len() - 1))
            .unwrap_or(0);
        let end = pairs.len().min(start + WINDOW);

        pairs[start..end]
            .iter()
            .find(|(raw, norm)| self.is_candidate(raw, norm))
            .or_else(|| pairs.iter().find(|(raw, norm)| self.is_candidate(raw, norm)))
            .map(|(raw, _)| raw.to_string())
    }

    /// Convenience: order, clean and interpret a snapshot in one step
    pub fn world_from_snapshot(&self, snapshot: &ScoreboardSnapshot) -> Option<String> {
        self.guess_world(&lines_from_snapshot(snapshot))
    }
}

impl Default for WorldFilter {
    /// Filter built from the stock deny-list
    fn default() -> Self {
        let patterns: Vec<String> = default_deny_patterns()
            .into_iter()
            .filter(|p| regex::Regex::new(p).is_ok())
            .collect();
        let deny = RegexSetBuilder::new(&patterns)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|_| RegexSet::empty());
        Self { deny }
    }
}

fn has_bracketed_tag(raw: &str) -> bool {
    let mut rest = raw;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        match after.find(']') {
            Some(close) if close > 0 => return true,
            Some(close) => rest = &after[close + 1..],
            None => return false,
        }
    }
    false
}
