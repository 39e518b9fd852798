// src/parser/swagger.rs

use serde::{Deserialize, Serialize};
use serde_json::{Error as JsonError, Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum number of `$ref` hops followed when inlining a request schema.
const MAX_REF_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] JsonError),

    #[error("Schema parse error: {0}")]
    SchemaParse(String),

    #[error("Unknown HTTP method: {0}")]
    UnknownMethod(String),

    #[error("Failed to fetch API description: {0}")]
    FetchError(String),
}

pub type Result<T> = std::result::Result<T, ParserError>;

/// HTTP methods an OpenAPI path item can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Whether requests with this method conventionally carry a JSON body
    pub fn has_request_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ParserError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            "patch" => Ok(HttpMethod::Patch),
            "delete" => Ok(HttpMethod::Delete),
            "head" => Ok(HttpMethod::Head),
            "options" => Ok(HttpMethod::Options),
            "trace" => Ok(HttpMethod::Trace),
            _ => Err(ParserError::UnknownMethod(s.to_string())),
        }
    }
}

/// One `(path, method)` operation of the API under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// The path template (e.g., "/users/{id}")
    pub path: String,

    pub method: HttpMethod,

    /// JSON schema of the request body, with local `$ref`s inlined
    pub request_schema: Option<Value>,

    /// Status codes declared under `responses`
    #[serde(rename = "responses")]
    pub accepted_response_codes: BTreeSet<u16>,
}

impl EndpointDescriptor {
    /// Property names listed in the request schema's `required` array
    pub fn required_fields(&self) -> Vec<&str> {
        self.request_schema
            .as_ref()
            .and_then(|schema| schema.get("required"))
            .and_then(Value::as_array)
            .map(|required| required.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn matches(&self, method: HttpMethod, path: &str) -> bool {
        self.method == method && self.path == path
    }
}

/// Read an API description (JSON) from a file
pub fn parse_description_file<P: AsRef<Path>>(path: P) -> Result<Value> {
    let mut file = File::open(path)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;

    parse_description_str(&content)
}

/// Parse an API description (JSON) from a string
pub fn parse_description_str(content: &str) -> Result<Value> {
    Ok(serde_json::from_str(content)?)
}

/// Read a description file and extract its endpoints in one go
pub fn load_endpoints<P: AsRef<Path>>(path: P) -> Result<Vec<EndpointDescriptor>> {
    let description = parse_description_file(path)?;
    extract_endpoints(&description)
}

/// Flatten the `paths` mapping of an OpenAPI 3 / Swagger 2 description into
/// one descriptor per `(path, method)` pair, in document order.
///
/// Fails only when the root has no `paths` mapping; every other missing piece
/// falls back to `None` or an empty set.
pub fn extract_endpoints(description: &Value) -> Result<Vec<EndpointDescriptor>> {
    let paths_map = description
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| ParserError::SchemaParse("description has no `paths` mapping".into()))?;

    let mut endpoints = Vec::new();
    let mut seen: HashSet<(String, HttpMethod)> = HashSet::new();

    for (path, path_item) in paths_map {
        let Some(path_obj) = path_item.as_object() else {
            debug!(path = %path, "skipping path item that is not an object");
            continue;
        };

        for (key, operation) in path_obj {
            // Skip non-HTTP method keys (parameters, summary, servers, ...)
            let Ok(method) = key.parse::<HttpMethod>() else {
                continue;
            };

            if !seen.insert((path.clone(), method)) {
                warn!(path = %path, method = %method, "duplicate operation in description, keeping the first");
                continue;
            }

            let (request_schema, accepted_response_codes) = match operation.as_object() {
                Some(op_obj) => (
                    request_schema_for(op_obj, description),
                    response_codes(op_obj),
                ),
                None => (None, BTreeSet::new()),
            };

            endpoints.push(EndpointDescriptor {
                path: path.clone(),
                method,
                request_schema,
                accepted_response_codes,
            });
        }
    }

    debug!(count = endpoints.len(), "extracted endpoints");
    Ok(endpoints)
}

/// Request body schema: OpenAPI 3 JSON `requestBody`, else a Swagger 2 `in: body` parameter
fn request_schema_for(op_obj: &Map<String, Value>, root: &Value) -> Option<Value> {
    if let Some(body) = op_obj.get("requestBody") {
        let body = follow_ref(body, root);
        let content = body.get("content").and_then(Value::as_object)?;
        let json_content = content.get("application/json").or_else(|| {
            content
                .iter()
                .find(|(media_type, _)| media_type.contains("json"))
                .map(|(_, media)| media)
        })?;
        let schema = json_content.get("schema")?;
        return Some(resolve_refs(schema, root, 0));
    }

    op_obj
        .get("parameters")
        .and_then(Value::as_array)?
        .iter()
        .map(|param| follow_ref(param, root))
        .find(|param| param.get("in").and_then(Value::as_str) == Some("body"))
        .and_then(|param| param.get("schema"))
        .map(|schema| resolve_refs(schema, root, 0))
}

/// Integer response keys; `default` and range keys such as `2XX` are not codes
fn response_codes(op_obj: &Map<String, Value>) -> BTreeSet<u16> {
    op_obj
        .get("responses")
        .and_then(Value::as_object)
        .map(|responses| {
            responses
                .keys()
                .filter_map(|code| code.trim().parse::<u16>().ok())
                .filter(|code| (100..=599).contains(code))
                .collect()
        })
        .unwrap_or_default()
}

fn follow_ref<'a>(value: &'a Value, root: &'a Value) -> &'a Value {
    value
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|reference| lookup_local_ref(root, reference))
        .unwrap_or(value)
}

fn lookup_local_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    root.pointer(pointer)
}

/// Inline local `$ref`s so the prompt shows concrete properties
fn resolve_refs(value: &Value, root: &Value, depth: usize) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                if depth >= MAX_REF_DEPTH {
                    return value.clone();
                }
                return match lookup_local_ref(root, reference) {
                    Some(target) => resolve_refs(target, root, depth + 1),
                    None => value.clone(),
                };
            }

            Value::Object(
                map.iter()
                    .map(|(key, inner)| (key.clone(), resolve_refs(inner, root, depth)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|inner| resolve_refs(inner, root, depth))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn self_referencing_schema_stops_at_depth_limit() {
        let root = json!({
            "components": {"schemas": {"Node": {
                "type": "object",
                "properties": {"next": {"$ref": "#/components/schemas/Node"}}
            }}}
        });

        let resolved = resolve_refs(&json!({"$ref": "#/components/schemas/Node"}), &root, 0);

        let mut cursor = &resolved;
        let mut hops = 0;
        while let Some(next) = cursor.pointer("/properties/next") {
            cursor = next;
            hops += 1;
        }
        assert_eq!(hops, MAX_REF_DEPTH);
        assert!(cursor.get("$ref").is_some());
    }

    #[test]
    fn unknown_reference_is_left_in_place() {
        let root = json!({});
        let schema = json!({"$ref": "#/components/schemas/Missing"});
        assert_eq!(resolve_refs(&schema, &root, 0), schema);
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!(" Delete ".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        assert!("parameters".parse::<HttpMethod>().is_err());
    }
}
