// Prompt rendering. Everything here is pure: same input, same prompt.

use serde_json::{json, Map, Value};

use crate::cli::TestFramework;
use crate::parser::EndpointDescriptor;
use crate::utils::{tail_chars, truncate_chars};
use super::test_cases::TestCase;

/// Longest diagnostic quoted back to the model
const FEEDBACK_CHARS: usize = 1500;

/// Share of a clipped diagnostic kept from its first line
const HEADLINE_CHARS: usize = 200;

/// Nesting limit when deriving example payloads
const EXAMPLE_DEPTH: usize = 8;

/// Prompt asking for test cases covering `endpoints`, as a bare JSON array.
///
/// `feedback` holds diagnostics from earlier failed attempts, most recent first.
pub fn build_test_case_prompt(endpoints: &[EndpointDescriptor], feedback: &[String]) -> String {
    let schema = Value::Array(endpoints.iter().map(endpoint_context).collect());

    let mut prompt = format!(
        r#"You are a senior QA automation engineer.

Here is the API under test, one entry per endpoint:
{schema:#}

Write API test cases for these endpoints. For every endpoint cover:
1. a valid request (use example_payload as a starting point where given)
2. a request missing each required field
3. a request with a field of the wrong type
4. an empty payload where the endpoint takes a body

Every test case is a JSON object with exactly these keys:
- "test_name": short snake_case name starting with "test_"
- "method": HTTP method, e.g. "POST"
- "path": endpoint path starting with "/"
- "payload": the JSON body to send (real values, never schema references), or null
- "expected_status": integer HTTP status code the API should answer with

Only send properties defined in the schema, at the top level of the payload.
A case expecting a 2xx status must include every required property.
"#
    );

    push_feedback(&mut prompt, feedback);

    prompt.push_str(
        r#"
OUTPUT FORMAT: output ONLY a JSON array of test case objects.
No markdown, no code fences, no explanations, no comments.

Example:
[
  {"test_name": "test_create_user_valid", "method": "POST", "path": "/users", "payload": {"name": "John Doe", "age": 30}, "expected_status": 200}
]
"#,
    );

    prompt
}

/// Prompt asking for a complete test file that runs `cases` against `base_url`
pub fn build_code_prompt(
    cases: &[TestCase],
    base_url: &str,
    framework: TestFramework,
    feedback: &[String],
) -> String {
    let cases_json = Value::Array(
        cases
            .iter()
            .map(|case| {
                json!({
                    "test_name": case.name,
                    "method": case.method.as_str(),
                    "path": case.path,
                    "payload": case.payload,
                    "expected_status": case.expected_status,
                })
            })
            .collect(),
    );
    let base_url = base_url.trim_end_matches('/');

    let idiom = match framework {
        TestFramework::Pytest => format!(
            r#"- Start with `import requests` and define BASE_URL = "{base_url}" at module level.
- Write one `def <test_name>():` function per test case, using the test_name as given.
- Send the request with requests.request(method, BASE_URL + path, json=payload).
- Assert `response.status_code == expected_status`."#
        ),
        TestFramework::Jest => format!(
            r#"- Start with `const axios = require('axios');` and `const BASE_URL = "{base_url}";`.
- Write one `test('<test_name>', async () => {{ ... }});` per test case.
- Call axios({{ method, url: BASE_URL + path, data: payload, validateStatus: () => true }}) so error statuses do not throw.
- Assert `expect(response.status).toBe(expected_status);`."#
        ),
    };

    let mut prompt = format!(
        r#"You are a senior QA automation engineer.

Turn these test cases into a complete {language} test file:
{cases_json:#}

Rules:
{idiom}
- Use the EXACT method, path, payload and expected_status of every test case.
- Produce exactly one test per test case, nothing more.
"#,
        language = framework.display_name(),
    );

    push_feedback(&mut prompt, feedback);

    prompt.push_str(
        r#"
OUTPUT FORMAT: output ONLY source code, ready to save to a file.
No prose, no markdown, no code fences.
"#,
    );

    prompt
}

fn push_feedback(prompt: &mut String, feedback: &[String]) {
    if feedback.is_empty() {
        return;
    }

    prompt.push_str("\nPrevious attempts failed. Do not repeat these problems:\n");
    for diagnostic in feedback {
        prompt.push_str("- ");
        prompt.push_str(&clip_diagnostic(diagnostic.trim()).replace('\n', "\n  "));
        prompt.push('\n');
    }
}

/// Fit a diagnostic into `FEEDBACK_CHARS`, keeping its first line and its tail.
/// Runner output ends with the failure summary, so the middle is what goes.
fn clip_diagnostic(diagnostic: &str) -> String {
    if diagnostic.chars().count() <= FEEDBACK_CHARS {
        return diagnostic.to_string();
    }

    match diagnostic.split_once('\n') {
        Some((headline, rest)) => {
            let headline = truncate_chars(headline, HEADLINE_CHARS);
            let budget = FEEDBACK_CHARS.saturating_sub(headline.chars().count());
            format!("{}\n{}", headline, tail_chars(rest, budget))
        }
        None => tail_chars(diagnostic, FEEDBACK_CHARS),
    }
}

/// Prompt asking for a fix to one issue found while probing the live API
pub fn build_fix_prompt(issue: &Value) -> String {
    format!("Fix this API issue: {}", issue)
}

fn endpoint_context(endpoint: &EndpointDescriptor) -> Value {
    let mut context = Map::new();
    context.insert("path".into(), json!(endpoint.path));
    context.insert("method".into(), json!(endpoint.method.as_str()));
    context.insert(
        "request_schema".into(),
        endpoint.request_schema.clone().unwrap_or(Value::Null),
    );
    context.insert("responses".into(), json!(endpoint.accepted_response_codes));
    if let Some(schema) = &endpoint.request_schema {
        context.insert("example_payload".into(), example_payload(schema));
    }
    Value::Object(context)
}

/// Build a plausible value for `schema`, preferring declared examples
pub fn example_payload(schema: &Value) -> Value {
    example_at_depth(schema, 0)
}

fn example_at_depth(schema: &Value, depth: usize) -> Value {
    if depth > EXAMPLE_DEPTH {
        return Value::Null;
    }
    if let Some(example) = schema.get("example") {
        return example.clone();
    }
    if let Some(first) = schema.get("enum").and_then(Value::as_array).and_then(|v| v.first()) {
        return first.clone();
    }
    if let Some(default) = schema.get("default") {
        return default.clone();
    }
    for key in ["oneOf", "anyOf"] {
        if let Some(first) = schema.get(key).and_then(Value::as_array).and_then(|v| v.first()) {
            return example_at_depth(first, depth + 1);
        }
    }
    if let Some(parts) = schema.get("allOf").and_then(Value::as_array) {
        let mut merged = Map::new();
        for part in parts {
            if let Value::Object(fields) = example_at_depth(part, depth + 1) {
                merged.extend(fields);
            }
        }
        return Value::Object(merged);
    }

    let declared_type = schema.get("type").and_then(Value::as_str);
    let properties = schema.get("properties").and_then(Value::as_object);

    match (declared_type, properties) {
        (_, Some(properties)) => Value::Object(
            properties
                .iter()
                .map(|(name, property)| (name.clone(), example_at_depth(property, depth + 1)))
                .collect(),
        ),
        (Some("object"), None) => json!({}),
        (Some("array"), None) => match schema.get("items") {
            Some(items) => json!([example_at_depth(items, depth + 1)]),
            None => json!([]),
        },
        (Some("string"), None) => match schema.get("format").and_then(Value::as_str) {
            Some("email") => json!("user@example.com"),
            Some("date-time") => json!("2024-01-01T00:00:00Z"),
            Some("date") => json!("2024-01-01"),
            Some("uuid") => json!("00000000-0000-4000-8000-000000000000"),
            Some("uri") => json!("https://example.com"),
            _ => json!("string"),
        },
        (Some("integer"), None) => json!(1),
        (Some("number"), None) => json!(1.5),
        (Some("boolean"), None) => json!(true),
        _ => Value::Null,
    }
}
