//! OpenAPI document parsing — extract operations and their factor trees

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use restprobe_core::{
    ContentType, Factor, FactorId, FactorKind, FactorTree, Method, ParamLocation, RestOp,
    RestPath, RootParam,
};
use restprobe_core::op::ResponseSchema;

/// `$ref` resolution depth limit; circular refs bottom out as strings.
const MAX_REF_DEPTH: u32 = 20;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("cannot read {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("cannot parse {0}: {1}")]
    Parse(String, String),
    #[error("document declares no paths")]
    NoPaths,
}

/// Load an OpenAPI document (JSON or YAML) as a JSON value.
pub fn load_document(path: &Path) -> Result<Value, SpecError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SpecError::Io(path.display().to_string(), e))?;
    let is_yaml = path
        .extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml");
    if is_yaml {
        serde_yml::from_str(&text)
            .map_err(|e| SpecError::Parse(path.display().to_string(), e.to_string()))
    } else {
        serde_json::from_str(&text)
            .map_err(|e| SpecError::Parse(path.display().to_string(), e.to_string()))
    }
}

/// Extract every operation from a parsed document.
pub fn extract_operations(doc: &Value) -> Result<Vec<RestOp>, SpecError> {
    let components = doc.get("components").cloned().unwrap_or(Value::Null);
    let paths = doc
        .get("paths")
        .and_then(|p| p.as_object())
        .ok_or(SpecError::NoPaths)?;

    let mut ops = Vec::new();
    for (path, path_item) in paths {
        for method in ["get", "post", "put", "delete", "patch", "head"] {
            let Some(operation) = path_item.get(method) else {
                continue;
            };
            let Some(verb) = Method::parse(method) else {
                continue;
            };
            let rest_path = RestPath::parse(path);
            let mut tree = FactorTree::new();
            let mut params = Vec::new();

            // Path-level parameters apply to every verb; operation-level
            // ones follow.
            for source in [path_item.get("parameters"), operation.get("parameters")]
                .into_iter()
                .flatten()
            {
                let Some(list) = source.as_array() else {
                    continue;
                };
                for param in list {
                    if let Some(root) = parse_parameter(param, &mut tree, &components) {
                        params.push(root);
                    }
                }
            }

            let mut content_types = Vec::new();
            if let Some(request_body) = operation.get("requestBody") {
                if let Some(content) = request_body.get("content").and_then(|c| c.as_object()) {
                    for key in content.keys() {
                        if let Some(ct) = ContentType::parse(key) {
                            if !content_types.contains(&ct) {
                                content_types.push(ct);
                            }
                        }
                    }
                    if let Some(schema) = first_schema(content) {
                        let resolved = resolve_refs(&schema, &components);
                        let required = request_body
                            .get("required")
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                        let root =
                            build_factor(&mut tree, None, "body", &resolved, required);
                        params.push(RootParam {
                            factor: root,
                            location: ParamLocation::Body,
                        });
                    }
                }
            }
            if content_types.is_empty() {
                content_types.push(ContentType::Json);
            }

            tree.compute_tokens(&rest_path.elements);

            let responses = parse_responses(operation, &components, &rest_path);

            ops.push(RestOp {
                verb,
                path: rest_path,
                tree,
                params,
                content_types,
                responses,
            });
        }
    }
    Ok(ops)
}

fn parse_parameter(
    param: &Value,
    tree: &mut FactorTree,
    components: &Value,
) -> Option<RootParam> {
    let name = param.get("name")?.as_str()?.to_string();
    let location = match param.get("in")?.as_str()? {
        "path" => ParamLocation::Path,
        "query" => ParamLocation::Query,
        "header" => ParamLocation::Header,
        _ => return None,
    };
    let schema = param
        .get("schema")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({"type": "string"}));
    let resolved = resolve_refs(&schema, components);
    // Path parameters are always required.
    let required = location == ParamLocation::Path
        || param.get("required").and_then(Value::as_bool).unwrap_or(false);

    let root = build_factor(tree, None, &name, &resolved, required);
    if let Some(text) = param.get("description").and_then(Value::as_str) {
        tree.get_mut(root).set_description(text);
    }
    if let Some(example) = param.get("example") {
        tree.get_mut(root).set_example(example);
    }
    Some(RootParam {
        factor: root,
        location,
    })
}

/// Recursively build a factor subtree from a resolved JSON schema.
fn build_factor(
    tree: &mut FactorTree,
    parent: Option<FactorId>,
    name: &str,
    schema: &Value,
    required: bool,
) -> FactorId {
    let kind = kind_of(schema);
    let mut factor = Factor::new(name, kind.clone());
    factor.required = required;
    if let Some(text) = schema.get("description").and_then(Value::as_str) {
        factor.set_description(text);
    }
    if let Some(example) = schema.get("example") {
        factor.set_example(example);
    }
    if let Some(default) = schema.get("default") {
        if !default.is_null() {
            factor.default = Some(default.clone());
        }
    }

    let id = match parent {
        Some(p) => tree.add_child(p, factor),
        None => tree.add_root(factor),
    };

    match kind {
        FactorKind::Object { .. } => {
            let required_props: Vec<&str> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (prop, prop_schema) in props {
                    build_factor(
                        tree,
                        Some(id),
                        prop,
                        prop_schema,
                        required_props.contains(&prop.as_str()),
                    );
                }
            }
        }
        FactorKind::Array { .. } => {
            let item_schema = schema
                .get("items")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({"type": "string"}));
            build_factor(tree, Some(id), "_item", &item_schema, required);
        }
        _ => {}
    }
    id
}

fn kind_of(schema: &Value) -> FactorKind {
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        return FactorKind::Enum {
            values: values.clone(),
        };
    }
    let ty = schema.get("type").and_then(Value::as_str).unwrap_or("string");
    match ty {
        "integer" => FactorKind::Int {
            min: schema.get("minimum").and_then(Value::as_i64).unwrap_or(-1000),
            max: schema.get("maximum").and_then(Value::as_i64).unwrap_or(1000),
        },
        "number" => FactorKind::Float {
            min: schema
                .get("minimum")
                .and_then(Value::as_f64)
                .unwrap_or(-1000.0),
            max: schema
                .get("maximum")
                .and_then(Value::as_f64)
                .unwrap_or(1000.0),
        },
        "boolean" => FactorKind::Bool,
        "array" => FactorKind::Array { item: 0 },
        "object" => FactorKind::Object {
            properties: Vec::new(),
        },
        _ => match schema.get("format").and_then(Value::as_str) {
            Some("date") => FactorKind::Date,
            Some("time") => FactorKind::Time,
            Some("date-time") => FactorKind::DateTime,
            Some("binary") => FactorKind::Binary {
                min_len: length_bound(schema, "minLength", 1),
                max_len: length_bound(schema, "maxLength", 10),
            },
            _ => FactorKind::String {
                min_len: length_bound(schema, "minLength", 0),
                max_len: length_bound(schema, "maxLength", 100),
            },
        },
    }
}

fn length_bound(schema: &Value, key: &str, default: u32) -> u32 {
    schema
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

/// Response schemas, kept for value mining and producer matching. The
/// tree's roots are the response's top-level fields; list responses
/// contribute their element's fields (pool entries are list elements).
fn parse_responses(
    operation: &Value,
    components: &Value,
    path: &RestPath,
) -> Vec<ResponseSchema> {
    let mut out = Vec::new();
    let Some(responses) = operation.get("responses").and_then(Value::as_object) else {
        return out;
    };
    for (status_str, resp) in responses {
        let Ok(status) = status_str.parse::<u16>() else {
            continue;
        };
        let Some(content) = resp.get("content").and_then(Value::as_object) else {
            continue;
        };
        let Some(schema) = first_schema(content) else {
            continue;
        };
        let resolved = resolve_refs(&schema, components);
        let mut tree = FactorTree::new();
        build_response_roots(&mut tree, &resolved, path);
        if !tree.is_empty() {
            out.push(ResponseSchema { status, tree });
        }
    }
    out
}

fn build_response_roots(tree: &mut FactorTree, schema: &Value, path: &RestPath) {
    let ty = schema.get("type").and_then(Value::as_str).unwrap_or("object");
    match ty {
        "object" => {
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (prop, prop_schema) in props {
                    build_factor(tree, None, prop, prop_schema, false);
                }
            }
        }
        "array" => {
            if let Some(items) = schema.get("items") {
                build_response_roots(tree, items, path);
            }
        }
        _ => {
            let name = path
                .elements
                .iter()
                .rev()
                .find(|e| !e.starts_with('{'))
                .map_or("value", |e| e.as_str())
                .to_string();
            build_factor(tree, None, &name, schema, false);
        }
    }
}

fn first_schema(content: &serde_json::Map<String, Value>) -> Option<Value> {
    content
        .get("application/json")
        .or_else(|| content.values().next())
        .and_then(|ct| ct.get("schema"))
        .cloned()
}

/// Recursively resolve `$ref` against OpenAPI components, depth-limited
/// so circular refs terminate.
fn resolve_refs(schema: &Value, components: &Value) -> Value {
    resolve_refs_inner(schema, components, 0)
}

fn resolve_refs_inner(schema: &Value, components: &Value, depth: u32) -> Value {
    if depth > MAX_REF_DEPTH {
        return serde_json::json!({"type": "string"});
    }
    match schema {
        Value::Object(obj) => {
            if let Some(ref_str) = obj.get("$ref").and_then(Value::as_str) {
                if let Some(resolved) = lookup_ref(ref_str, components) {
                    return resolve_refs_inner(&resolved, components, depth + 1);
                }
                return serde_json::json!({"type": "string"});
            }
            let new_obj: serde_json::Map<String, Value> = obj
                .iter()
                .map(|(k, v)| (k.clone(), resolve_refs_inner(v, components, depth + 1)))
                .collect();
            Value::Object(new_obj)
        }
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|v| resolve_refs_inner(v, components, depth + 1))
                .collect(),
        ),
        _ => schema.clone(),
    }
}

/// Resolve `#/components/...` pointers.
fn lookup_ref(ref_str: &str, components: &Value) -> Option<Value> {
    let rest = ref_str.strip_prefix("#/components/")?;
    let mut current = components;
    for segment in rest.split('/') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn petstore() -> Value {
        json!({
            "openapi": "3.0.0",
            "paths": {
                "/pets": {
                    "get": {
                        "parameters": [
                            {
                                "name": "limit",
                                "in": "query",
                                "schema": {"type": "integer", "minimum": 1, "maximum": 50}
                            }
                        ],
                        "responses": {
                            "200": {
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "type": "array",
                                            "items": {"$ref": "#/components/schemas/Pet"}
                                        }
                                    }
                                }
                            }
                        }
                    },
                    "post": {
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/Pet"}
                                }
                            }
                        },
                        "responses": {"201": {"description": "created"}}
                    }
                },
                "/pets/{petId}": {
                    "parameters": [
                        {"name": "petId", "in": "path", "required": true,
                         "schema": {"type": "integer"}}
                    ],
                    "delete": {
                        "responses": {"204": {"description": "gone"}}
                    }
                }
            },
            "components": {
                "schemas": {
                    "Pet": {
                        "type": "object",
                        "required": ["name"],
                        "properties": {
                            "name": {"type": "string", "maxLength": 30},
                            "tag": {"type": "string"},
                            "status": {"enum": ["available", "sold"]}
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn extracts_all_operations() {
        let ops = extract_operations(&petstore()).unwrap();
        let ids: Vec<String> = ops.iter().map(RestOp::id).collect();
        assert!(ids.contains(&"GET:/pets".to_string()));
        assert!(ids.contains(&"POST:/pets".to_string()));
        assert!(ids.contains(&"DELETE:/pets/{petId}".to_string()));
    }

    #[test]
    fn query_parameter_bounds_carry_over() {
        let ops = extract_operations(&petstore()).unwrap();
        let get = ops.iter().find(|o| o.id() == "GET:/pets").unwrap();
        assert_eq!(get.params.len(), 1);
        let root = get.params[0].factor;
        assert_eq!(get.tree.get(root).name, "limit");
        assert_eq!(
            get.tree.get(root).kind,
            FactorKind::Int { min: 1, max: 50 }
        );
        assert_eq!(get.params[0].location, ParamLocation::Query);
    }

    #[test]
    fn body_schema_resolves_refs_and_required() {
        let ops = extract_operations(&petstore()).unwrap();
        let post = ops.iter().find(|o| o.id() == "POST:/pets").unwrap();
        let body = post
            .params
            .iter()
            .find(|p| p.location == ParamLocation::Body)
            .unwrap();
        assert_eq!(post.tree.get(body.factor).name, "body");
        let globals = post.leaf_globals();
        assert!(globals.contains(&"body.name".to_string()));
        assert!(globals.contains(&"body.status".to_string()));
        let name_id = post
            .tree
            .all_ids()
            .find(|&id| post.tree.global_name(id) == "body.name")
            .unwrap();
        assert!(post.tree.get(name_id).required);
        assert_eq!(
            post.tree.get(name_id).kind,
            FactorKind::String {
                min_len: 0,
                max_len: 30
            }
        );
    }

    #[test]
    fn path_parameters_are_required() {
        let ops = extract_operations(&petstore()).unwrap();
        let del = ops
            .iter()
            .find(|o| o.id() == "DELETE:/pets/{petId}")
            .unwrap();
        let root = del.params[0].factor;
        assert!(del.tree.get(root).required);
        assert_eq!(del.params[0].location, ParamLocation::Path);
        // The path predecessor becomes a name token.
        assert!(del.tree.get(root).tokens.contains("pet"));
    }

    #[test]
    fn list_response_exposes_element_fields() {
        let ops = extract_operations(&petstore()).unwrap();
        let get = ops.iter().find(|o| o.id() == "GET:/pets").unwrap();
        assert_eq!(get.responses.len(), 1);
        let schema = &get.responses[0];
        assert_eq!(schema.status, 200);
        let roots: Vec<&str> = schema
            .tree
            .roots()
            .iter()
            .map(|&id| schema.tree.get(id).name.as_str())
            .collect();
        assert!(roots.contains(&"name"));
        assert!(roots.contains(&"tag"));
    }

    #[test]
    fn circular_refs_terminate() {
        let doc = json!({
            "paths": {
                "/nodes": {
                    "post": {
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/Node"}
                                }
                            }
                        },
                        "responses": {}
                    }
                }
            },
            "components": {
                "schemas": {
                    "Node": {
                        "type": "object",
                        "properties": {
                            "child": {"$ref": "#/components/schemas/Node"},
                            "label": {"type": "string"}
                        }
                    }
                }
            }
        });
        let ops = extract_operations(&doc).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(ops[0].tree.len() < 200);
    }

    #[test]
    fn missing_paths_is_an_error() {
        let err = extract_operations(&json!({"openapi": "3.0.0"})).unwrap_err();
        assert!(matches!(err, SpecError::NoPaths));
    }
}
