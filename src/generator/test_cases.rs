// Recovering test-case records from free-form model output.
//
// The model is asked for a bare JSON array but routinely wraps it in prose or
// markdown fences. Candidate arrays come from one bracket-matching pass that skips
// string literals, so nested arrays and brackets inside strings never cut a
// region short. Each element is then validated on its own; bad elements are
// dropped with a reason instead of failing the batch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::parser::{EndpointDescriptor, HttpMethod};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("No JSON array found in model output: {0}")]
    NoStructuredOutputFound(String),

    #[error("No valid test cases survived validation ({} rejected)", .rejected.len())]
    EmptyTestCaseSet { rejected: Vec<RejectedCase> },

    #[error("No source code found in model output")]
    NoCodeFound,
}

pub type Result<T> = std::result::Result<T, ExtractionError>;

/// One HTTP check the generated suite must perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(rename = "test_name")]
    pub name: String,
    pub method: HttpMethod,
    pub path: String,
    pub payload: Value,
    pub expected_status: u16,
}

/// An array element that did not make it into the test set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCase {
    /// Position in the source array
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractedCases {
    pub cases: Vec<TestCase>,
    pub rejected: Vec<RejectedCase>,
}

/// Pull the test-case array out of `raw` and validate every element.
///
/// `endpoints` enables the schema-aware check: a case that expects success
/// must send every property its endpoint marks as required. Pass an empty
/// slice to validate shape only.
pub fn extract_test_cases(raw: &str, endpoints: &[EndpointDescriptor]) -> Result<ExtractedCases> {
    let items = find_json_array(raw).ok_or_else(|| {
        ExtractionError::NoStructuredOutputFound(preview(raw))
    })?;

    let mut extracted = ExtractedCases::default();

    for (index, item) in items.iter().enumerate() {
        match validate_case(item, endpoints) {
            Ok(case) => extracted.cases.push(case),
            Err(reason) => {
                warn!(index, reason = %reason, "dropping invalid test case");
                extracted.rejected.push(RejectedCase { index, reason });
            }
        }
    }

    if extracted.cases.is_empty() {
        return Err(ExtractionError::EmptyTestCaseSet {
            rejected: extracted.rejected,
        });
    }

    debug!(
        accepted = extracted.cases.len(),
        rejected = extracted.rejected.len(),
        "extracted test cases"
    );
    Ok(extracted)
}

/// Locate the JSON array in `raw`.
///
/// Balanced `[...]` regions are tried outermost first, in order of appearance.
/// The first one that parses as an array and holds at least one object wins;
/// failing that, the first parsable array. A region that fails to parse is
/// searched for arrays nested inside it.
pub fn find_json_array(raw: &str) -> Option<Vec<Value>> {
    let mut regions = bracket_regions(raw);
    regions.sort_unstable();

    let mut fallback = None;
    let mut resume = 0;

    for (start, end) in regions {
        if start < resume {
            continue;
        }
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&raw[start..=end]) {
            if items.iter().any(Value::is_object) {
                return Some(items);
            }
            fallback.get_or_insert(items);
            resume = end + 1;
        }
    }

    fallback
}

/// Every balanced `[...]` region of `text` as `(open, close)` byte offsets,
/// in closing order. `{}` nesting and JSON strings are tracked only inside an
/// open bracket, and a mismatched closer abandons the regions still open.
///
/// A string that never closes on its line was a stray quote in prose. The
/// scan then resumes just past the outermost open bracket with quotes treated
/// as plain text up to the failure point, so no byte is read more than twice.
fn bracket_regions(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut regions = Vec::new();
    let mut stack: Vec<(u8, usize)> = Vec::new();
    let mut string_start: Option<usize> = None;
    let mut escaped = false;
    let mut plain_until = 0;
    let mut index = 0;

    loop {
        let byte = bytes.get(index).copied();

        if let Some(quote) = string_start {
            match byte {
                None | Some(b'\n') => {
                    let outermost = stack.first().map_or(quote, |&(_, open)| open);
                    let failed_at = index;
                    index = (outermost + 1).max(plain_until);
                    plain_until = failed_at;
                    string_start = None;
                    escaped = false;
                    stack.clear();
                    continue;
                }
                Some(_) if escaped => escaped = false,
                Some(b'\\') => escaped = true,
                Some(b'"') => string_start = None,
                Some(_) => {}
            }
            index += 1;
            continue;
        }

        let Some(byte) = byte else {
            break;
        };

        match byte {
            b'[' => stack.push((byte, index)),
            b'{' if !stack.is_empty() => stack.push((byte, index)),
            b'"' if !stack.is_empty() && index >= plain_until => string_start = Some(index),
            b']' | b'}' if !stack.is_empty() => {
                let opener = if byte == b']' { b'[' } else { b'{' };
                match stack.pop() {
                    Some((open, start)) if open == opener => {
                        if byte == b']' {
                            regions.push((start, index));
                        }
                    }
                    _ => stack.clear(),
                }
            }
            _ => {}
        }
        index += 1;
    }

    regions
}

fn validate_case(
    item: &Value,
    endpoints: &[EndpointDescriptor],
) -> std::result::Result<TestCase, String> {
    let obj = item
        .as_object()
        .ok_or_else(|| format!("expected an object, found {}", json_kind(item)))?;

    let name = string_field(obj, &["test_name", "name"]).ok_or("missing `test_name`")?;
    if name.trim().is_empty() {
        return Err("empty `test_name`".into());
    }

    let method_raw = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or("missing `method`")?;
    let method = method_raw
        .parse::<HttpMethod>()
        .map_err(|_| format!("unknown method `{}`", method_raw))?;

    let path = string_field(obj, &["path", "endpoint"]).ok_or("missing `path`")?;
    if !path.starts_with('/') {
        return Err(format!("path `{}` does not start with `/`", path));
    }

    let status = ["expected_status", "expectedStatus", "status"]
        .iter()
        .find_map(|key| obj.get(*key))
        .ok_or("missing `expected_status`")?;
    let expected_status = status
        .as_u64()
        .ok_or_else(|| format!("`expected_status` is not an integer: {}", status))?;
    if !(100..=599).contains(&expected_status) {
        return Err(format!("`expected_status` {} is not an HTTP status", expected_status));
    }
    let expected_status = expected_status as u16;

    let payload = match obj.get("payload") {
        Some(payload) => payload.clone(),
        None if method.has_request_body() => {
            return Err(format!("missing `payload` for {} request", method));
        }
        None => Value::Null,
    };

    check_required_fields(method, path, &payload, expected_status, endpoints)?;

    Ok(TestCase {
        name: name.to_string(),
        method,
        path: path.to_string(),
        payload,
        expected_status,
    })
}

/// A success expectation is only credible if the payload carries every
/// required property; negative cases (4xx) may omit them on purpose.
fn check_required_fields(
    method: HttpMethod,
    path: &str,
    payload: &Value,
    expected_status: u16,
    endpoints: &[EndpointDescriptor],
) -> std::result::Result<(), String> {
    if !(200..300).contains(&expected_status) {
        return Ok(());
    }

    let Some(endpoint) = endpoints
        .iter()
        .find(|endpoint| endpoint.method == method && path_matches_template(path, &endpoint.path))
    else {
        return Ok(());
    };

    let required = endpoint.required_fields();
    if required.is_empty() {
        return Ok(());
    }

    let Some(fields) = payload.as_object() else {
        return Err(format!(
            "expects {} but payload is {} while {} {} requires fields",
            expected_status,
            json_kind(payload),
            method,
            endpoint.path
        ));
    };

    let missing: Vec<&str> = required
        .into_iter()
        .filter(|field| !fields.contains_key(*field))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "expects {} but payload is missing required field(s): {}",
            expected_status,
            missing.join(", ")
        ))
    }
}

/// `/users/7` matches `/users/{id}`; query strings are ignored
fn path_matches_template(path: &str, template: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path);
    let actual: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    let expected: Vec<&str> = template.trim_end_matches('/').split('/').collect();

    actual.len() == expected.len()
        && actual.iter().zip(&expected).all(|(segment, pattern)| {
            (pattern.starts_with('{') && pattern.ends_with('}')) || segment == pattern
        })
}

fn string_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| obj.get(*key)).and_then(Value::as_str)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 200;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "empty response".to_string();
    }
    crate::utils::truncate_chars(trimmed, LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_skip_brackets_inside_strings() {
        let text = r#"[{"name": "a ] tricky [ name"}] tail"#;
        assert_eq!(bracket_regions(text), vec![(0, text.find(" tail").unwrap() - 1)]);
    }

    #[test]
    fn regions_handle_escaped_quotes() {
        let text = r#"["say \"]\" loud"]"#;
        assert_eq!(bracket_regions(text), vec![(0, text.len() - 1)]);
    }

    #[test]
    fn regions_drop_mismatched_closers() {
        assert!(bracket_regions("[1, 2}").is_empty());
        assert_eq!(bracket_regions("[1, [2]"), vec![(4, 6)]);
        assert_eq!(bracket_regions("[see [1]]"), vec![(5, 7), (0, 8)]);
    }

    #[test]
    fn unterminated_quote_is_prose() {
        assert_eq!(bracket_regions("[\"open\n[1]"), vec![(7, 9)]);

        let text = r#"Here ["quoted] and then [{"a": 1}]"#;
        let items = find_json_array(text).unwrap();
        assert_eq!(items, vec![serde_json::json!({"a": 1})]);
    }

    #[test]
    fn template_matching() {
        assert!(path_matches_template("/users/7", "/users/{id}"));
        assert!(path_matches_template("/users?limit=1", "/users"));
        assert!(!path_matches_template("/users/7/posts", "/users/{id}"));
        assert!(!path_matches_template("/items", "/users"));
    }
}
