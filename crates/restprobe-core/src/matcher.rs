//! Producer/consumer schema matching.
//!
//! Matches input factor names against a producer operation's response
//! schema tree in three escalating passes; only names the previous pass
//! left unmatched proceed to the next. Matches become binding candidates
//! on the producer's resource node.

use std::collections::BTreeMap;

use crate::factor::{FactorId, FactorKind, FactorTree};
use crate::text;

/// Default search depth into the response tree.
pub const DEFAULT_DEPTH: usize = 2;

/// Fuzzy-pass similarity gate.
const FUZZY_THRESHOLD: f64 = 0.80;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Dotted path of the matched response field.
    pub global_name: String,
    pub probability: f64,
    pub at_depth: usize,
}

/// Match each `global_name -> bare name` mapping against the response
/// tree. `depth` holds the per-factor search budget (missing entries use
/// [`DEFAULT_DEPTH`]).
pub fn match_names(
    tree: &FactorTree,
    name_mappings: &BTreeMap<String, String>,
    depth: &BTreeMap<String, usize>,
) -> BTreeMap<String, Vec<MatchResult>> {
    let mut results: BTreeMap<String, Vec<MatchResult>> = name_mappings
        .keys()
        .map(|k| (k.clone(), Vec::new()))
        .collect();

    let budget =
        |g: &str| -> usize { depth.get(g).copied().unwrap_or(DEFAULT_DEPTH) };

    let cleaned: BTreeMap<&String, String> = name_mappings
        .iter()
        .map(|(g, n)| (g, text::remove_punctuation(n).to_lowercase()))
        .collect();

    for (global, name) in &cleaned {
        for root in tree.roots() {
            match_exact(tree, *root, name, budget(global), &mut results, global);
        }
    }

    for (global, name) in &cleaned {
        if !results[global.as_str()].is_empty() {
            continue;
        }
        for root in tree.roots() {
            match_path_like(tree, *root, name, budget(global), &mut results, global);
        }
    }

    for (global, name) in &cleaned {
        if !results[global.as_str()].is_empty() {
            continue;
        }
        for root in tree.roots() {
            match_similar(tree, *root, name, budget(global), &mut results, global);
        }
    }

    results
}

fn children(tree: &FactorTree, id: FactorId) -> Vec<FactorId> {
    match &tree.get(id).kind {
        FactorKind::Object { properties } => properties.clone(),
        FactorKind::Array { item } => vec![*item],
        _ => Vec::new(),
    }
}

fn cleaned_name(tree: &FactorTree, id: FactorId) -> String {
    text::remove_punctuation(&tree.get(id).name).to_lowercase()
}

fn match_exact(
    tree: &FactorTree,
    id: FactorId,
    name: &str,
    depth: usize,
    results: &mut BTreeMap<String, Vec<MatchResult>>,
    global: &str,
) {
    if depth == 0 {
        return;
    }
    if tree.get(id).kind.is_container() {
        for child in children(tree, id) {
            match_exact(tree, child, name, depth - 1, results, global);
        }
    } else if cleaned_name(tree, id) == name {
        results.entry(global.to_string()).or_default().push(MatchResult {
            global_name: tree.global_name(id),
            probability: 1.0,
            at_depth: depth,
        });
    }
}

/// `user_id` can match `id` inside `{"user": {"id": 1}}`: container names
/// along the way strip a matching prefix off the searched name.
fn match_path_like(
    tree: &FactorTree,
    id: FactorId,
    name: &str,
    depth: usize,
    results: &mut BTreeMap<String, Vec<MatchResult>>,
    global: &str,
) {
    if depth == 0 {
        return;
    }
    let own = cleaned_name(tree, id);
    if tree.get(id).kind.is_container() {
        let remaining = name
            .strip_prefix(own.as_str())
            .map(|rest| rest.trim_start_matches(|c: char| !c.is_ascii_alphanumeric()))
            .unwrap_or(name);
        for child in children(tree, id) {
            match_path_like(tree, child, remaining, depth - 1, results, global);
        }
    } else if own == name {
        results.entry(global.to_string()).or_default().push(MatchResult {
            global_name: tree.global_name(id),
            probability: 1.0,
            at_depth: depth,
        });
    }
}

fn match_similar(
    tree: &FactorTree,
    id: FactorId,
    name: &str,
    depth: usize,
    results: &mut BTreeMap<String, Vec<MatchResult>>,
    global: &str,
) {
    if depth == 0 {
        return;
    }
    if tree.get(id).kind.is_container() {
        for child in children(tree, id) {
            match_similar(tree, child, name, depth - 1, results, global);
        }
    } else {
        let p = text::token_set_ratio(name, &cleaned_name(tree, id));
        if p >= FUZZY_THRESHOLD {
            results.entry(global.to_string()).or_default().push(MatchResult {
                global_name: tree.global_name(id),
                probability: p,
                at_depth: depth,
            });
        }
    }
}
