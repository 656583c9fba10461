//! Overlap-aware merging of finalized recognition fragments.
//!
//! Continuous recognizers often start a new final result with the last few
//! words of the previous one. Appending fragments naively duplicates those
//! words, so each fragment is checked against the end of the transcript in
//! this order:
//!
//! 1. An empty transcript takes the fragment as-is.
//! 2. If the fragment starts with the last 50 characters of the transcript,
//!    that overlap is dropped.
//! 3. If the fragment starts with the transcript's last word (any case,
//!    whole word only), that word is dropped.
//! 4. Otherwise the fragment is appended after a single space.
//!
//! Only final fragments may be merged. Interim results never reach this
//! module.

/// Number of trailing characters compared in the overlap check.
const TAIL_WINDOW: usize = 50;

/// Merge a finalized fragment into the existing transcript.
pub fn merge(existing: &str, fragment: &str) -> String {
    let trimmed = existing.trim();
    if trimmed.is_empty() {
        return fragment.to_string();
    }

    let incoming = fragment.trim_start();
    if incoming.is_empty() {
        return trimmed.to_string();
    }

    let tail = last_chars(trimmed, TAIL_WINDOW);
    if let Some(rest) = incoming.strip_prefix(tail) {
        if starts_at_word_boundary(rest) {
            return append_remainder(trimmed, rest);
        }
    }

    if let Some(last_word) = trimmed.split_whitespace().next_back() {
        if let Some(rest) = strip_leading_word(incoming, last_word) {
            return append_remainder(trimmed, rest);
        }
    }

    format!("{} {}", trimmed, incoming)
}

/// The last `n` characters of `s`, or all of `s` if it is shorter.
fn last_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((idx, _)) if n > 0 => &s[idx..],
        _ if n == 0 => "",
        _ => s,
    }
}

/// True when stripping an overlap left a whole-word remainder.
///
/// The remainder must be empty, start with whitespace, or start with
/// clause punctuation that itself ends the word. Apostrophes, hyphens and
/// the like continue the word, so `can` never matches the start of `can't`.
fn starts_at_word_boundary(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        None => true,
        Some(c) if c.is_whitespace() => true,
        Some(c) if is_clause_punctuation(c) => chars.next().map_or(true, char::is_whitespace),
        Some(_) => false,
    }
}

fn is_clause_punctuation(c: char) -> bool {
    matches!(c, ',' | '.' | ';' | ':' | '!' | '?')
}

/// Strip `word` from the front of `fragment`, ignoring case.
///
/// Matches only when the word is followed by whitespace or ends the fragment,
/// so `cat` never matches the start of `category`.
fn strip_leading_word<'a>(fragment: &'a str, word: &str) -> Option<&'a str> {
    let mut chars = fragment.char_indices();
    for expected in word.chars() {
        let (_, actual) = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    match chars.next() {
        None => Some(""),
        Some((idx, c)) if c.is_whitespace() => Some(&fragment[idx + c.len_utf8()..]),
        Some(_) => None,
    }
}

/// Append what is left of a fragment after its overlap was removed.
///
/// An empty remainder leaves the transcript untouched. Leading punctuation
/// attaches to the previous word.
fn append_remainder(existing: &str, rest: &str) -> String {
    let rest = rest.trim_start();
    match rest.chars().next() {
        None => existing.to_string(),
        Some(c) if is_clause_punctuation(c) => {
            format!("{}{}", existing, rest)
        }
        Some(_) => format!("{} {}", existing, rest),
    }
}
