//! Watch-list name handling.
//!
//! Operators curate player names per guild; the presence tracker alerts only on
//! names found here. Matching is case-insensitive everywhere, while the first
//! spelling an operator entered is the one kept for display.

use std::collections::HashSet;

/// Trims, drops blanks, de-duplicates case-insensitively and sorts
pub fn normalize_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out: Vec<String> = names
        .into_iter()
        .filter_map(|name| {
            let trimmed = name.as_ref().trim();
            if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect();
    out.sort_by_key(|name| name.to_lowercase());
    out
}

/// Adds `name`, returning whether the list changed
pub fn add_name(list: &mut Vec<String>, name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() || contains(list, trimmed) {
        return false;
    }
    list.push(trimmed.to_string());
    *list = normalize_names(list.iter());
    true
}

/// Removes `name` in any casing, returning whether the list changed
pub fn remove_name(list: &mut Vec<String>, name: &str) -> bool {
    let needle = name.trim().to_lowercase();
    let before = list.len();
    list.retain(|n| n.to_lowercase() != needle);
    list.len() != before
}

pub fn contains(list: &[String], name: &str) -> bool {
    let needle = name.trim().to_lowercase();
    list.iter().any(|n| n.to_lowercase() == needle)
}

/// Lowercased lookup set
pub fn key_set(list: &[String]) -> HashSet<String> {
    list.iter().map(|n| n.trim().to_lowercase()).collect()
}
