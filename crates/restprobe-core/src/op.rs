//! REST operation model: verbs, content types, templated paths, and the
//! per-operation factor trees.

use std::collections::BTreeMap;
use std::fmt;

use crate::factor::{FactorId, FactorTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Some(Method::Get),
            "post" => Some(Method::Post),
            "put" => Some(Method::Put),
            "delete" => Some(Method::Delete),
            "patch" => Some(Method::Patch),
            "head" => Some(Method::Head),
            "options" => Some(Method::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// Whether requests with this verb carry a body.
    pub fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body encodings. JSON is the default; the others exist for
/// content-type confusion during mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Xml,
    Form,
    Multipart,
    Text,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Json,
        ContentType::Xml,
        ContentType::Form,
        ContentType::Multipart,
        ContentType::Text,
    ];

    pub fn header_value(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Xml => "application/xml",
            ContentType::Form => "application/x-www-form-urlencoded",
            ContentType::Multipart => "multipart/form-data",
            ContentType::Text => "text/plain",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_ascii_lowercase();
        if s.contains("json") {
            Some(ContentType::Json)
        } else if s.contains("xml") {
            Some(ContentType::Xml)
        } else if s.contains("x-www-form-urlencoded") {
            Some(ContentType::Form)
        } else if s.contains("multipart") {
            Some(ContentType::Multipart)
        } else if s.contains("text/plain") {
            Some(ContentType::Text)
        } else {
            None
        }
    }
}

/// A templated URL path, e.g. `/users/{userId}/orders`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestPath {
    raw: String,
    pub elements: Vec<String>,
}

impl RestPath {
    pub fn parse(path: &str) -> Self {
        let elements = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            raw: path.to_string(),
            elements,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Number of path segments; deeper operations are scheduled later in
    /// generation order only after their ancestors, so depth drives the
    /// scheduler's sort.
    pub fn depth(&self) -> usize {
        self.elements.len()
    }

    /// Placeholder names appearing in the path, in order.
    pub fn placeholders(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter_map(|e| e.strip_prefix('{').and_then(|e| e.strip_suffix('}')))
            .collect()
    }

    /// The path with trailing placeholder segments removed; entries created
    /// under `/users/{id}` belong to the `/users` resource.
    pub fn resource_node(&self) -> String {
        let mut end = self.elements.len();
        while end > 0 && self.elements[end - 1].starts_with('{') {
            end -= 1;
        }
        if end == 0 {
            return "/".to_string();
        }
        format!("/{}", self.elements[..end].join("/"))
    }

    /// Substitute placeholders with resolved values. A missing or blank
    /// path parameter falls back to `"1"` so the URL stays well-formed.
    pub fn resolve(&self, values: &BTreeMap<String, String>) -> String {
        let resolved: Vec<String> = self
            .elements
            .iter()
            .map(|e| {
                if let Some(name) = e.strip_prefix('{').and_then(|e| e.strip_suffix('}')) {
                    match values.get(name) {
                        Some(v) if !v.trim().is_empty() => v.clone(),
                        _ => "1".to_string(),
                    }
                } else {
                    e.clone()
                }
            })
            .collect();
        format!("/{}", resolved.join("/"))
    }
}

impl fmt::Display for RestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Where a root factor is carried in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Body,
}

/// A top-level parameter: one root of the operation's factor tree.
#[derive(Debug, Clone)]
pub struct RootParam {
    pub factor: FactorId,
    pub location: ParamLocation,
}

/// Response definition kept for value mining and producer/consumer
/// matching, not for validation.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub status: u16,
    pub tree: FactorTree,
}

/// One operation of the API under test.
#[derive(Debug, Clone)]
pub struct RestOp {
    pub verb: Method,
    pub path: RestPath,
    /// All parameter trees of the operation (roots: path/query/header
    /// params plus at most one `body` root).
    pub tree: FactorTree,
    pub params: Vec<RootParam>,
    /// Request content types declared by the description.
    pub content_types: Vec<ContentType>,
    pub responses: Vec<ResponseSchema>,
}

impl RestOp {
    /// Stable operation label, e.g. `POST:/users/{id}/orders`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}:{}", self.verb, self.path)
    }

    /// Global names of all leaf factors.
    pub fn leaf_globals(&self) -> Vec<String> {
        self.tree
            .leaf_ids()
            .into_iter()
            .map(|id| self.tree.global_name(id))
            .collect()
    }

    /// Token text -> global name map for fragment association.
    pub fn token_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for id in self.tree.leaf_ids() {
            let global = self.tree.global_name(id);
            for token in &self.tree.get(id).tokens {
                map.insert(token.clone(), global.clone());
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_parse_and_depth() {
        let p = RestPath::parse("/users/{userId}/orders");
        assert_eq!(p.depth(), 3);
        assert_eq!(p.placeholders(), vec!["userId"]);
        assert_eq!(p.to_string(), "/users/{userId}/orders");
    }

    #[test]
    fn resource_node_strips_trailing_placeholders() {
        assert_eq!(
            RestPath::parse("/users/{id}").resource_node(),
            "/users"
        );
        assert_eq!(
            RestPath::parse("/users/{uid}/orders/{oid}").resource_node(),
            "/users/{uid}/orders"
        );
        assert_eq!(RestPath::parse("/users").resource_node(), "/users");
    }

    #[test]
    fn resolve_substitutes_and_defaults_blank_to_one() {
        let p = RestPath::parse("/users/{id}/orders");
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), "42".to_string());
        assert_eq!(p.resolve(&values), "/users/42/orders");

        values.insert("id".to_string(), "  ".to_string());
        assert_eq!(p.resolve(&values), "/users/1/orders");

        assert_eq!(p.resolve(&BTreeMap::new()), "/users/1/orders");
    }

    #[test]
    fn method_parse_roundtrip() {
        assert_eq!(Method::parse("post"), Some(Method::Post));
        assert_eq!(Method::parse("GET"), Some(Method::Get));
        assert_eq!(Method::parse("trace"), None);
        assert!(Method::Put.has_body());
        assert!(!Method::Get.has_body());
    }

    #[test]
    fn content_type_parse() {
        assert_eq!(
            ContentType::parse("application/json; charset=utf-8"),
            Some(ContentType::Json)
        );
        assert_eq!(
            ContentType::parse("application/x-www-form-urlencoded"),
            Some(ContentType::Form)
        );
        assert_eq!(ContentType::parse("image/png"), None);
    }
}
