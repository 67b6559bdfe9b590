//! Text utilities: identifier tokenization, token-set similarity, masking.
//!
//! Fragment analysis and binding discovery both work on short
//! natural-language-ish strings (parameter names, error messages). The
//! helpers here keep that logic in one place.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;

/// Split an identifier into lowercase word tokens.
///
/// Splits on punctuation and camelCase boundaries: `hook_id` -> `[hook, id]`,
/// `userId` -> `[user, id]`.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.trim().chars() {
        if ch.is_ascii_punctuation() || ch.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else if ch.is_uppercase() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            current.extend(ch.to_lowercase());
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Lowercased token set of an identifier or phrase.
pub fn token_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Trim characters that are not `[0-9a-zA-Z_]` from both ends.
pub fn clean_fragment(s: &str) -> String {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    s.trim()
        .trim_start_matches(|c| !is_word(c))
        .trim_end_matches(|c| !is_word(c))
        .to_string()
}

/// Replace every digit with the literal pattern `\d`.
pub fn mask_digits(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_digit() {
            out.push_str("\\d");
        } else {
            out.push(c);
        }
    }
    out
}

/// Strip one layer of surrounding single or double quotes.
pub fn strip_quotes(s: &str) -> String {
    let mut t = s;
    t = t.strip_prefix('\'').unwrap_or(t);
    t = t.strip_suffix('\'').unwrap_or(t);
    t = t.strip_prefix('"').unwrap_or(t);
    t = t.strip_suffix('"').unwrap_or(t);
    t.trim().to_string()
}

/// Drop all ASCII punctuation.
pub fn remove_punctuation(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_punctuation()).collect()
}

/// Whole-word, case-insensitive containment of `phrase` in `text`.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(phrase))) {
        Ok(re) => re.is_match(text),
        Err(_) => text.to_lowercase().contains(&phrase.to_lowercase()),
    }
}

/// Replace known input values inside `texts` with `name (__VALUE__)` markers
/// so that response patterns do not depend on the concrete values sent.
///
/// `assignment` maps parameter global names to the stringified value used in
/// the request. Longer values are masked first so that overlapping values do
/// not shadow each other.
pub fn mask_values(texts: &[String], assignment: &BTreeMap<String, String>) -> Vec<String> {
    let mut pairs: Vec<(&String, &String)> = assignment
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| (k, v))
        .collect();
    pairs.sort_by_key(|(_, v)| std::cmp::Reverse(v.len()));

    let mut masked = Vec::with_capacity(texts.len());
    for text in texts {
        let mut t = text.clone();
        for (name, value) in &pairs {
            if let Ok(re) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(value))) {
                t = re
                    .replace_all(&t, format!("{name} (__VALUE__)").as_str())
                    .into_owned();
            }
        }
        masked.push(t);
    }
    masked
}

/// For each fragment, the set of parameter global names whose token text
/// occurs as a whole-word phrase inside the fragment.
///
/// `token_to_name` maps a parameter's token text (e.g. "user id") to its
/// global name (e.g. "body.user_id").
pub fn associate_parameters(
    fragments: &BTreeSet<String>,
    token_to_name: &BTreeMap<String, String>,
) -> Vec<(String, BTreeSet<String>)> {
    fragments
        .iter()
        .map(|f| {
            let involved = token_to_name
                .iter()
                .filter(|(token, _)| contains_phrase(f, token))
                .map(|(_, name)| name.clone())
                .collect();
            (f.clone(), involved)
        })
        .collect()
}

/// Token-set similarity of two strings in `0.0..=1.0`.
///
/// The standard token-set construction: the sorted token intersection is
/// compared against intersection+remainder for each side, and the best
/// sequence ratio wins. A string whose tokens are a subset of the other's
/// scores 1.0.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = token_set(a);
    let tb = token_set(b);
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }

    let inter: Vec<&String> = ta.intersection(&tb).collect();
    let only_a: Vec<&String> = ta.difference(&tb).collect();
    let only_b: Vec<&String> = tb.difference(&ta).collect();

    let join = |base: &[&String], extra: &[&String]| -> String {
        let mut parts: Vec<&str> = base.iter().map(|s| s.as_str()).collect();
        parts.extend(extra.iter().map(|s| s.as_str()));
        parts.join(" ")
    };

    let s_inter = join(&inter, &[]);
    let s_a = join(&inter, &only_a);
    let s_b = join(&inter, &only_b);

    sequence_ratio(&s_inter, &s_a)
        .max(sequence_ratio(&s_inter, &s_b))
        .max(sequence_ratio(&s_a, &s_b))
}

/// Similarity of two character sequences as `2*LCS / (|a| + |b|)`.
fn sequence_ratio(a: &str, b: &str) -> f64 {
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    if ac.is_empty() && bc.is_empty() {
        return 1.0;
    }
    if ac.is_empty() || bc.is_empty() {
        return 0.0;
    }
    let mut prev = vec![0usize; bc.len() + 1];
    let mut row = vec![0usize; bc.len() + 1];
    for &ca in &ac {
        for (j, &cb) in bc.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(row[j])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    let lcs = prev[bc.len()];
    (2.0 * lcs as f64) / ((ac.len() + bc.len()) as f64)
}
