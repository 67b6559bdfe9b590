//! Parameter factor trees.
//!
//! Every operation input (path/query/header parameter, request body) is
//! modeled as a tree of factors. The tree is stored as an arena of nodes
//! with integer parent links, so factors stay `Clone` and serializable and
//! the dotted global name is computed on demand instead of being cached on
//! live back-pointers.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::text;

pub type FactorId = usize;

/// Typed domain of a single factor.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorKind {
    String { min_len: u32, max_len: u32 },
    /// Bit-string payloads (`format: binary`).
    Binary { min_len: u32, max_len: u32 },
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Bool,
    Enum { values: Vec<Value> },
    Date,
    Time,
    DateTime,
    Array { item: FactorId },
    Object { properties: Vec<FactorId> },
}

impl FactorKind {
    pub fn string() -> Self {
        FactorKind::String {
            min_len: 0,
            max_len: 100,
        }
    }

    pub fn int() -> Self {
        FactorKind::Int {
            min: -1000,
            max: 1000,
        }
    }

    pub fn float() -> Self {
        FactorKind::Float {
            min: -1000.0,
            max: 1000.0,
        }
    }

    /// Whether a concrete JSON value could inhabit this domain. Used when
    /// scanning stored resources for binding sources: a value that cannot
    /// be coerced into the factor's type is not a candidate.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FactorKind::String { .. } | FactorKind::Binary { .. } => true,
            FactorKind::Int { .. } | FactorKind::Float { .. } => match value {
                Value::Number(_) | Value::Bool(_) => true,
                Value::String(s) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            },
            FactorKind::Bool => true,
            FactorKind::Enum { values } => values.contains(value),
            FactorKind::Date => value
                .as_str()
                .is_some_and(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
            FactorKind::Time => value.as_str().is_some_and(|s| {
                chrono::NaiveTime::parse_from_str(s, "%H:%M:%S%.fZ").is_ok()
                    || chrono::NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok()
            }),
            FactorKind::DateTime => value.as_str().is_some_and(|s| {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
                    || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ").is_ok()
            }),
            FactorKind::Array { .. } => value.is_array(),
            FactorKind::Object { .. } => value.is_object(),
        }
    }

    /// Container kinds are skipped when collecting leaves.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            FactorKind::Array { .. } | FactorKind::Object { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Factor {
    pub name: String,
    pub parent: Option<FactorId>,
    pub kind: FactorKind,
    pub required: bool,
    pub description: Option<String>,
    pub examples: Vec<Value>,
    pub default: Option<Value>,
    /// Name variants used for similarity matching and fragment association.
    pub tokens: BTreeSet<String>,
}

impl Factor {
    pub fn new(name: impl Into<String>, kind: FactorKind) -> Self {
        Self {
            name: name.into(),
            parent: None,
            kind,
            required: false,
            description: None,
            examples: Vec::new(),
            default: None,
            tokens: BTreeSet::new(),
        }
    }

    pub fn set_description(&mut self, text: &str) {
        let cleaned = text::strip_quotes(text);
        if !cleaned.is_empty() {
            self.description = Some(cleaned);
        }
    }

    /// Record an example value; lists contribute each element, objects are
    /// skipped (their properties carry their own examples).
    pub fn set_example(&mut self, example: &Value) {
        let items: Vec<&Value> = match example {
            Value::Null | Value::Object(_) => return,
            Value::Array(a) => a.iter().collect(),
            other => vec![other],
        };
        for item in items {
            if !self.examples.contains(item) {
                self.examples.push(item.clone());
            }
        }
    }
}

/// Arena of factors forming one or more trees (one root per top-level
/// parameter, plus an optional `body` root).
#[derive(Debug, Clone, Default)]
pub struct FactorTree {
    nodes: Vec<Factor>,
    roots: Vec<FactorId>,
}

impl FactorTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, factor: Factor) -> FactorId {
        let id = self.nodes.len();
        self.nodes.push(factor);
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: FactorId, mut factor: Factor) -> FactorId {
        let id = self.nodes.len();
        factor.parent = Some(parent);
        self.nodes.push(factor);
        match &mut self.nodes[parent].kind {
            FactorKind::Object { properties } => properties.push(id),
            FactorKind::Array { item } => *item = id,
            _ => {}
        }
        id
    }

    pub fn get(&self, id: FactorId) -> &Factor {
        &self.nodes[id]
    }

    pub fn get_mut(&mut self, id: FactorId) -> &mut Factor {
        &mut self.nodes[id]
    }

    pub fn roots(&self) -> &[FactorId] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Dotted path from the root, e.g. `body.items._item.id`.
    pub fn global_name(&self, id: FactorId) -> String {
        let mut parts = vec![self.nodes[id].name.as_str()];
        let mut cur = self.nodes[id].parent;
        while let Some(p) = cur {
            parts.push(self.nodes[p].name.as_str());
            cur = self.nodes[p].parent;
        }
        parts.reverse();
        parts.join(".")
    }

    /// All node ids, depth-independent order.
    pub fn all_ids(&self) -> impl Iterator<Item = FactorId> + '_ {
        0..self.nodes.len()
    }

    /// Leaf factors of every tree: containers themselves are excluded,
    /// their scalar descendants are included.
    pub fn leaf_ids(&self) -> Vec<FactorId> {
        self.all_ids()
            .filter(|&id| !self.nodes[id].kind.is_container())
            .collect()
    }

    /// Compute the token variants for every factor. `uri_elements` are the
    /// path segments of the owning operation; a factor backing the path
    /// placeholder `{name}` also picks up the preceding segment (and a
    /// naive singular form of it).
    pub fn compute_tokens(&mut self, uri_elements: &[String]) {
        for id in 0..self.nodes.len() {
            let global = self.global_name(id);
            let mut tokens = BTreeSet::new();
            tokens.insert(global.to_lowercase());

            let mut trimmed = global.as_str();
            trimmed = trimmed.strip_prefix("body.").unwrap_or(trimmed);
            trimmed = trimmed.strip_suffix("._item").unwrap_or(trimmed);
            tokens.insert(trimmed.to_lowercase());

            // Spaced variant so `user_id` can match the phrase "user id".
            let spaced = text::tokenize(trimmed).join(" ");
            if !spaced.is_empty() {
                tokens.insert(spaced);
            }

            let placeholder = format!("{{{global}}}");
            if let Some(pos) = uri_elements.iter().position(|e| *e == placeholder) {
                if pos > 0 {
                    let pre = uri_elements[pos - 1].to_lowercase();
                    tokens.insert(singularize(&pre));
                    tokens.insert(pre);
                }
            }

            self.nodes[id].tokens = tokens;
        }
    }
}

/// Crude lemma: `users` -> `user`, `categories` -> `category`.
fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{stem}y")
    } else if word.ends_with("ss") {
        word.to_string()
    } else if let Some(stem) = word.strip_suffix('s') {
        stem.to_string()
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body_tree() -> (FactorTree, FactorId, FactorId) {
        let mut tree = FactorTree::new();
        let body = tree.add_root(Factor::new(
            "body",
            FactorKind::Object {
                properties: Vec::new(),
            },
        ));
        let items = tree.add_child(
            body,
            Factor::new("items", FactorKind::Array { item: 0 }),
        );
        let item = tree.add_child(
            items,
            Factor::new(
                "_item",
                FactorKind::Object {
                    properties: Vec::new(),
                },
            ),
        );
        let id = tree.add_child(item, Factor::new("id", FactorKind::int()));
        (tree, body, id)
    }

    #[test]
    fn global_name_walks_parents() {
        let (tree, _, id) = body_tree();
        assert_eq!(tree.global_name(id), "body.items._item.id");
    }

    #[test]
    fn leaf_ids_skip_containers() {
        let (tree, _, id) = body_tree();
        assert_eq!(tree.leaf_ids(), vec![id]);
    }

    #[test]
    fn accepts_numeric_strings_for_int() {
        let kind = FactorKind::int();
        assert!(kind.accepts(&json!(5)));
        assert!(kind.accepts(&json!("42")));
        assert!(kind.accepts(&json!(true)));
        assert!(!kind.accepts(&json!("abc")));
        assert!(!kind.accepts(&json!([1])));
    }

    #[test]
    fn accepts_date_formats() {
        assert!(FactorKind::Date.accepts(&json!("2024-01-31")));
        assert!(!FactorKind::Date.accepts(&json!("31/01/2024")));
        assert!(FactorKind::DateTime.accepts(&json!("2024-01-31T10:00:00.000Z")));
        assert!(FactorKind::Time.accepts(&json!("10:00:00")));
    }

    #[test]
    fn enum_accepts_only_members() {
        let kind = FactorKind::Enum {
            values: vec![json!("a"), json!("b")],
        };
        assert!(kind.accepts(&json!("a")));
        assert!(!kind.accepts(&json!("c")));
    }

    #[test]
    fn tokens_include_path_predecessor() {
        let mut tree = FactorTree::new();
        tree.add_root(Factor::new("userId", FactorKind::int()));
        let elements = vec!["users".to_string(), "{userId}".to_string()];
        tree.compute_tokens(&elements);
        let tokens = &tree.get(0).tokens;
        assert!(tokens.contains("userid"));
        assert!(tokens.contains("user id"));
        assert!(tokens.contains("users"));
        assert!(tokens.contains("user"));
    }

    #[test]
    fn examples_deduplicate() {
        let mut f = Factor::new("x", FactorKind::string());
        f.set_example(&json!("a"));
        f.set_example(&json!(["a", "b"]));
        assert_eq!(f.examples, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn description_strips_quotes() {
        let mut f = Factor::new("x", FactorKind::string());
        f.set_description("'sort order'");
        assert_eq!(f.description.as_deref(), Some("sort order"));
        f.set_description("  ");
        assert_eq!(f.description.as_deref(), Some("sort order"));
    }
}
