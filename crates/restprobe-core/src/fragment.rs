//! Failure-response fragmentization.
//!
//! Error bodies are flattened into short strings, normalized (input values
//! and digit runs masked), then split against each other at whole-word
//! boundaries until a fixed point. The surviving fragments are the
//! failure vocabulary the probability models condition on.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde_json::Value;

use crate::text;

/// Maximum response length considered; longer bodies are truncated and
/// treated as one opaque string.
const MAX_RESPONSE_LEN: usize = 4096;

/// Carried-over fragment state per failure class (4xx or 5xx) per
/// operation: fragment text -> associated parameter global names.
pub type FragmentParams = BTreeMap<String, BTreeSet<String>>;

/// Per-case fragment observations for one executed batch.
#[derive(Debug, Clone, Default)]
pub struct BatchFragments {
    /// For each case: fragments present in its 4xx response (empty set for
    /// non-4xx cases).
    pub per_case_error: Vec<BTreeSet<String>>,
    /// For each case: fragments present in its 5xx response.
    pub per_case_bug: Vec<BTreeSet<String>>,
}

/// Flatten a response body into leaf strings.
///
/// Volatile fields are skipped: timestamp/time keys, path/uri/url keys
/// whose value starts with `/`, status keys, and empty values. A leaf
/// without a recognizable sentence shape, or whose key mentions a known
/// parameter token, is prefixed with its key: `key (value)`.
pub fn flatten_response(
    response: &Value,
    token_to_name: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut out = Vec::new();
    flatten(response, token_to_name, "", &mut out);
    out
}

fn flatten(
    value: &Value,
    tokens: &BTreeMap<String, String>,
    key: &str,
    out: &mut Vec<String>,
) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if is_volatile(k, v) {
                    continue;
                }
                flatten(v, tokens, k, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten(item, tokens, key, out);
            }
        }
        leaf => {
            let s = leaf_to_string(leaf);
            let key_mentions_param = tokens.keys().any(|t| key.contains(t.as_str()));
            if lacks_sentence_shape(&s) || key_mentions_param {
                if key.is_empty() {
                    out.push(s);
                } else {
                    out.push(format!("{key} ({s})"));
                }
            } else {
                out.push(s);
            }
        }
    }
}

fn is_volatile(key: &str, value: &Value) -> bool {
    let k = key.to_lowercase();
    if k == "timestamp" || k == "time" {
        return true;
    }
    if (k == "path" || k == "uri" || k == "url")
        && value.as_str().is_some_and(|s| s.starts_with('/'))
    {
        return true;
    }
    if k == "status" || k == "status code" || k == "status_code" {
        return true;
    }
    matches!(value, Value::Null)
        || value.as_str().is_some_and(str::is_empty)
        || value.as_array().is_some_and(|a| {
            a.is_empty() || (a.len() == 1 && a[0].as_object().is_some_and(|o| o.is_empty()))
        })
        || value.as_object().is_some_and(|o| o.is_empty())
}

fn leaf_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stand-in for grammatical subject detection: a string with fewer than
/// two alphabetic words is a bare value, not a message.
fn lacks_sentence_shape(s: &str) -> bool {
    s.split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .count()
        < 2
}

/// Normalize one response into a set of masked pattern strings.
pub fn reformat_response(
    token_to_name: &BTreeMap<String, String>,
    assignment: &BTreeMap<String, String>,
    response: &Value,
) -> BTreeSet<String> {
    if matches!(response, Value::Null)
        || response.as_str().is_some_and(str::is_empty)
        || response.as_array().is_some_and(Vec::is_empty)
        || response.as_object().is_some_and(|o| o.is_empty())
    {
        return BTreeSet::new();
    }

    let serialized = leaf_to_string(response);
    let parsed = if serialized.len() > MAX_RESPONSE_LEN {
        let cut = truncate_at_boundary(&serialized, MAX_RESPONSE_LEN);
        flatten_response(&Value::String(cut.to_string()), token_to_name)
    } else {
        flatten_response(response, token_to_name)
    };

    let masked = text::mask_values(&parsed, assignment);
    masked.into_iter().map(|t| text::mask_digits(&t)).collect()
}

fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Split strings against each other at whole-word boundaries until a
/// fixed point: whenever one string contains another as a whole-word
/// phrase, the longer one is replaced by the cleaned remainder pieces.
pub fn fragmentize(strings: &BTreeSet<String>, existing: &BTreeSet<String>) -> BTreeSet<String> {
    if strings.is_empty() {
        return existing.clone();
    }
    let mut pool: BTreeSet<String> = strings.union(existing).cloned().collect();
    loop {
        let mut items: Vec<String> = pool.iter().cloned().collect();
        items.sort_by_key(|s| std::cmp::Reverse(s.len()));

        let mut added: BTreeSet<String> = BTreeSet::new();
        let mut removed: BTreeSet<String> = BTreeSet::new();
        for i in 0..items.len().saturating_sub(1) {
            for separator in items.iter().skip(i + 1) {
                let Ok(re) =
                    Regex::new(&format!(r"\b{}\b", regex::escape(separator)))
                else {
                    continue;
                };
                if re.is_match(&items[i]) {
                    for part in re.split(&items[i]) {
                        let cleaned = text::clean_fragment(part);
                        if !cleaned.is_empty() {
                            added.insert(cleaned);
                        }
                    }
                    removed.insert(items[i].clone());
                    break;
                }
            }
        }

        if added.is_empty() && removed.is_empty() {
            return pool;
        }
        for r in &removed {
            pool.remove(r);
        }
        pool.extend(added);
    }
}

/// Digest one executed batch into per-case fragment sets, updating the
/// carried-over fragment -> parameters maps for both failure classes.
pub fn analyze_batch(
    token_to_name: &BTreeMap<String, String>,
    assignments: &[BTreeMap<String, String>],
    status_codes: &[u16],
    responses: &[Value],
    error_fragment_params: &mut FragmentParams,
    bug_fragment_params: &mut FragmentParams,
) -> BatchFragments {
    let mut per_case_patterns: Vec<BTreeSet<String>> = Vec::with_capacity(status_codes.len());
    let mut error_strings: BTreeSet<String> = BTreeSet::new();
    let mut bug_strings: BTreeSet<String> = BTreeSet::new();

    for ((assignment, &code), response) in
        assignments.iter().zip(status_codes).zip(responses)
    {
        match code / 100 {
            4 => {
                let rr = reformat_response(token_to_name, assignment, response);
                error_strings.extend(rr.iter().cloned());
                per_case_patterns.push(rr);
            }
            5 => {
                let rr = reformat_response(token_to_name, assignment, response);
                bug_strings.extend(rr.iter().cloned());
                per_case_patterns.push(rr);
            }
            _ => per_case_patterns.push(BTreeSet::new()),
        }
    }

    refresh_fragments(&error_strings, error_fragment_params, token_to_name);
    refresh_fragments(&bug_strings, bug_fragment_params, token_to_name);

    let mut batch = BatchFragments::default();
    for (&code, patterns) in status_codes.iter().zip(&per_case_patterns) {
        if patterns.is_empty() {
            batch.per_case_error.push(BTreeSet::new());
            batch.per_case_bug.push(BTreeSet::new());
            continue;
        }
        if code / 100 == 4 {
            batch
                .per_case_error
                .push(fragments_present(error_fragment_params, patterns));
            batch.per_case_bug.push(BTreeSet::new());
        } else {
            batch.per_case_error.push(BTreeSet::new());
            batch
                .per_case_bug
                .push(fragments_present(bug_fragment_params, patterns));
        }
    }
    batch
}

/// Re-fragmentize with the carried-over vocabulary, prune entries whose
/// fragment no longer exists, and associate parameters to new fragments.
fn refresh_fragments(
    strings: &BTreeSet<String>,
    fragment_params: &mut FragmentParams,
    token_to_name: &BTreeMap<String, String>,
) {
    let existing: BTreeSet<String> = fragment_params.keys().cloned().collect();
    let fragments = fragmentize(strings, &existing);
    fragment_params.retain(|f, _| fragments.contains(f));
    let fresh: BTreeSet<String> = fragments
        .iter()
        .filter(|f| !fragment_params.contains_key(*f))
        .cloned()
        .collect();
    for (fragment, params) in text::associate_parameters(&fresh, token_to_name) {
        fragment_params.insert(fragment, params);
    }
}

fn fragments_present(
    fragment_params: &FragmentParams,
    patterns: &BTreeSet<String>,
) -> BTreeSet<String> {
    fragment_params
        .keys()
        .filter(|f| patterns.iter().any(|p| p.contains(f.as_str())))
        .cloned()
        .collect()
}
