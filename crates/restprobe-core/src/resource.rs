//! Bounded store of observed response values, keyed by resource node.
//!
//! Successful response bodies are captured here and later mined for
//! binding sources (which stored field could feed which input factor) and
//! for concrete values at request time.

use std::collections::{BTreeMap, VecDeque};

use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::Value;

use crate::factor::FactorKind;
use crate::text;

/// Entries kept per resource node; the oldest entry is evicted beyond this.
pub const MAX_ENTRIES: usize = 100;

/// Minimum token-set similarity for cross-resource binding discovery.
pub const SIMILARITY_THRESHOLD: f64 = 0.60;

/// A factor looking for a binding source: its token variants and its
/// typed domain (values failing the type check are not candidates).
#[derive(Debug, Clone)]
pub struct MatchTarget {
    pub names: Vec<String>,
    pub kind: FactorKind,
}

/// One discovered source: a field path inside entries of `node`, with the
/// similarity that justified the match (used as sampling weight).
#[derive(Debug, Clone, PartialEq)]
pub struct BindingSource {
    pub node: String,
    pub field: Vec<String>,
    pub similarity: f64,
}

#[derive(Debug, Clone)]
pub struct ResourcePool {
    node: String,
    entries: VecDeque<Value>,
}

impl ResourcePool {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            entries: VecDeque::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last path segment, used to wrap bare scalar responses.
    fn resource_name(&self) -> &str {
        self.node.rsplit('/').next().unwrap_or(&self.node)
    }

    fn is_duplicate(&self, entry: &Value) -> bool {
        let Some(id) = entry.get("id") else {
            return false;
        };
        let id = value_key(id);
        self.entries
            .iter()
            .any(|e| e.get("id").is_some_and(|other| value_key(other) == id))
    }

    fn push(&mut self, entry: Value) {
        if self.is_duplicate(&entry) {
            return;
        }
        self.entries.push_back(entry);
        if self.entries.len() > MAX_ENTRIES {
            self.entries.pop_front();
        }
    }

    /// Absorb a response body. Lists contribute each non-empty element;
    /// bare scalars are wrapped under the resource name.
    pub fn add(&mut self, response: &Value) {
        match response {
            Value::Array(items) => {
                for item in items {
                    if is_empty_value(item) {
                        continue;
                    }
                    if item.is_object() {
                        self.push(item.clone());
                    } else {
                        let name = self.resource_name().to_string();
                        self.push(serde_json::json!({ name: item }));
                    }
                }
            }
            Value::Object(_) => self.push(response.clone()),
            other => {
                let name = self.resource_name().to_string();
                self.push(serde_json::json!({ name: other }));
            }
        }
    }

    /// Scan one random entry for fields whose key is similar to one of the
    /// target's names and whose value passes the target's type check.
    pub fn match_value_source<R: Rng>(
        &self,
        targets: &BTreeMap<String, MatchTarget>,
        threshold: f64,
        rng: &mut R,
    ) -> BTreeMap<String, Vec<BindingSource>> {
        let mut results: BTreeMap<String, Vec<BindingSource>> = BTreeMap::new();
        if !self.is_active() {
            return results;
        }
        let idx = rng.gen_range(0..self.entries.len());
        let entry = &self.entries[idx];
        self.walk(entry, &mut Vec::new(), None, targets, threshold, rng, &mut results);
        results
    }

    #[allow(clippy::too_many_arguments)]
    fn walk<R: Rng>(
        &self,
        value: &Value,
        path: &mut Vec<String>,
        parent: Option<&str>,
        targets: &BTreeMap<String, MatchTarget>,
        threshold: f64,
        rng: &mut R,
        results: &mut BTreeMap<String, Vec<BindingSource>>,
    ) {
        match value {
            Value::Object(map) => {
                for (key, v) in map {
                    path.push(key.clone());
                    if v.is_object() || v.is_array() {
                        self.walk(v, path, Some(key), targets, threshold, rng, results);
                    } else {
                        for (global, target) in targets {
                            if !target.kind.accepts(v) {
                                continue;
                            }
                            for name in &target.names {
                                let direct = text::token_set_ratio(name, key);
                                let hit = if direct >= threshold {
                                    Some(direct)
                                } else {
                                    parent.and_then(|p| {
                                        let qualified =
                                            text::token_set_ratio(name, &format!("{p}.{key}"));
                                        (qualified >= threshold).then_some(qualified)
                                    })
                                };
                                if let Some(similarity) = hit {
                                    results.entry(global.clone()).or_default().push(
                                        BindingSource {
                                            node: self.node.clone(),
                                            field: path.clone(),
                                            similarity,
                                        },
                                    );
                                    break;
                                }
                            }
                        }
                    }
                    path.pop();
                }
            }
            Value::Array(items) => {
                if items.is_empty() {
                    return;
                }
                let idx = rng.gen_range(0..items.len());
                let item = &items[idx];
                if item.is_object() || item.is_array() {
                    path.push("_item".to_string());
                    self.walk(item, path, parent, targets, threshold, rng, results);
                    path.pop();
                } else if let Some(parent) = parent {
                    for (global, target) in targets {
                        if !target.kind.accepts(item) {
                            continue;
                        }
                        for name in &target.names {
                            let similarity = text::token_set_ratio(name, parent);
                            if similarity >= threshold {
                                results.entry(global.clone()).or_default().push(
                                    BindingSource {
                                        node: self.node.clone(),
                                        field: path.clone(),
                                        similarity,
                                    },
                                );
                                break;
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Pick one random entry and read the given field paths out of it.
    /// `_item` descends into the first list element; a terminal non-empty
    /// list yields a random element; a missing segment yields `None`.
    pub fn retrieve_values<R: Rng>(
        &self,
        fields: &[Vec<String>],
        rng: &mut R,
    ) -> BTreeMap<Vec<String>, Option<Value>> {
        let mut values = BTreeMap::new();
        if !self.is_active() {
            for f in fields {
                values.insert(f.clone(), None);
            }
            return values;
        }
        let idx = rng.gen_range(0..self.entries.len());
        let entry = &self.entries[idx];
        for field in fields {
            values.insert(field.clone(), find_value_by_path(entry, field, rng));
        }
        values
    }
}

fn find_value_by_path<R: Rng>(entry: &Value, path: &[String], rng: &mut R) -> Option<Value> {
    let mut current = entry;
    for key in path {
        if current.is_null() {
            return None;
        }
        if key == "_item" {
            match current {
                Value::Array(items) if !items.is_empty() => current = &items[0],
                _ => return Some(current.clone()),
            }
        } else {
            match current {
                Value::Object(map) => match map.get(key) {
                    Some(v) => current = v,
                    None => return None,
                },
                _ => return Some(current.clone()),
            }
        }
    }
    if let Value::Array(items) = current {
        if !items.is_empty() {
            return items.choose(rng).cloned();
        }
    }
    if current.is_null() {
        return None;
    }
    Some(current.clone())
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn value_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// All pools, keyed by resource node.
#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    pools: BTreeMap<String, ResourcePool>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resources(&mut self, node: &str, response: &Value) {
        self.pools
            .entry(node.to_string())
            .or_insert_with(|| ResourcePool::new(node))
            .add(response);
    }

    pub fn pool(&self, node: &str) -> Option<&ResourcePool> {
        self.pools.get(node)
    }

    /// Binding sources for a consumer at `consumer_node`, scanning every
    /// active pool. The similarity gate drops to zero against the
    /// consumer's own resource node: same-resource fields are always
    /// plausible sources.
    pub fn binding_sources<R: Rng>(
        &self,
        consumer_node: &str,
        targets: &BTreeMap<String, MatchTarget>,
        rng: &mut R,
    ) -> BTreeMap<String, Vec<BindingSource>> {
        let mut merged: BTreeMap<String, Vec<BindingSource>> = BTreeMap::new();
        for (node, pool) in &self.pools {
            if !pool.is_active() {
                continue;
            }
            let threshold = if node == consumer_node {
                0.0
            } else {
                SIMILARITY_THRESHOLD
            };
            for (global, sources) in pool.match_value_source(targets, threshold, rng) {
                merged.entry(global).or_default().extend(sources);
            }
        }
        merged
    }

    /// Resolve field paths against one pool.
    pub fn retrieve<R: Rng>(
        &self,
        node: &str,
        fields: &[Vec<String>],
        rng: &mut R,
    ) -> BTreeMap<Vec<String>, Option<Value>> {
        match self.pools.get(node) {
            Some(pool) => pool.retrieve_values(fields, rng),
            None => fields.iter().map(|f| (f.clone(), None)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use serde_json::json;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    #[test]
    fn add_wraps_scalars_under_resource_name() {
        let mut pool = ResourcePool::new("/users");
        pool.add(&json!("alice"));
        let mut r = rng();
        let got = pool.retrieve_values(&[vec!["users".to_string()]], &mut r);
        assert_eq!(
            got.get(&vec!["users".to_string()]),
            Some(&Some(json!("alice")))
        );
    }

    #[test]
    fn add_deduplicates_by_id() {
        let mut pool = ResourcePool::new("/users");
        pool.add(&json!({"id": 1, "name": "a"}));
        pool.add(&json!({"id": 1, "name": "changed"}));
        pool.add(&json!({"id": "1", "name": "string id"}));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn add_caps_entries() {
        let mut pool = ResourcePool::new("/users");
        for i in 0..(MAX_ENTRIES + 20) {
            pool.add(&json!({"id": i}));
        }
        assert_eq!(pool.len(), MAX_ENTRIES);
        // Oldest entries were evicted.
        let mut r = rng();
        let got = pool.retrieve_values(&[vec!["id".to_string()]], &mut r);
        let id = got[&vec!["id".to_string()]].as_ref().unwrap().as_u64().unwrap();
        assert!(id >= 20);
    }

    #[test]
    fn add_list_skips_empty_elements() {
        let mut pool = ResourcePool::new("/tags");
        pool.add(&json!([null, [], {}, {"id": 7}, "blue"]));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn match_finds_exact_key() {
        let mut pool = ResourcePool::new("/users");
        pool.add(&json!({"id": 3, "name": "bob"}));
        let mut targets = BTreeMap::new();
        targets.insert(
            "userId".to_string(),
            MatchTarget {
                names: vec!["id".to_string(), "user id".to_string()],
                kind: FactorKind::int(),
            },
        );
        let mut r = rng();
        let results = pool.match_value_source(&targets, 0.6, &mut r);
        let sources = &results["userId"];
        assert!(sources.iter().any(|s| s.field == vec!["id".to_string()]));
    }

    #[test]
    fn match_respects_type_check() {
        let mut pool = ResourcePool::new("/users");
        pool.add(&json!({"id": "not-a-number"}));
        let mut targets = BTreeMap::new();
        targets.insert(
            "userId".to_string(),
            MatchTarget {
                names: vec!["id".to_string()],
                kind: FactorKind::int(),
            },
        );
        let mut r = rng();
        let results = pool.match_value_source(&targets, 0.0, &mut r);
        assert!(results.get("userId").is_none_or(|v| v.is_empty()));
    }

    #[test]
    fn match_descends_into_nested_objects() {
        let mut pool = ResourcePool::new("/orders");
        pool.add(&json!({"customer": {"email": "a@b.c"}}));
        let mut targets = BTreeMap::new();
        targets.insert(
            "query.email".to_string(),
            MatchTarget {
                names: vec!["email".to_string()],
                kind: FactorKind::string(),
            },
        );
        let mut r = rng();
        let results = pool.match_value_source(&targets, 0.6, &mut r);
        let sources = &results["query.email"];
        assert_eq!(
            sources[0].field,
            vec!["customer".to_string(), "email".to_string()]
        );
    }

    #[test]
    fn retrieve_descends_item_and_missing_is_none() {
        let mut pool = ResourcePool::new("/orders");
        pool.add(&json!({"lines": [{"sku": "x1"}], "total": 10}));
        let mut r = rng();
        let fields = vec![
            vec!["lines".to_string(), "_item".to_string(), "sku".to_string()],
            vec!["missing".to_string()],
        ];
        let got = pool.retrieve_values(&fields, &mut r);
        assert_eq!(got[&fields[0]], Some(json!("x1")));
        assert_eq!(got[&fields[1]], None);
    }

    #[test]
    fn store_same_node_threshold_is_zero() {
        let mut store = ResourceStore::new();
        store.add_resources("/users", &json!({"zzz": 9}));
        let mut targets = BTreeMap::new();
        targets.insert(
            "id".to_string(),
            MatchTarget {
                names: vec!["id".to_string()],
                kind: FactorKind::int(),
            },
        );
        let mut r = rng();
        // "zzz" has no similarity to "id", but the consumer's own node
        // accepts any type-compatible field.
        let same = store.binding_sources("/users", &targets, &mut r);
        assert!(!same["id"].is_empty());
        let cross = store.binding_sources("/pets", &targets, &mut r);
        assert!(cross.get("id").is_none_or(|v| v.is_empty()));
    }
}
