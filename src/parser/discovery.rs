// Locating and sanity-checking the API under test over HTTP.

use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::swagger::{parse_description_str, EndpointDescriptor, ParserError, Result};

/// An endpoint that did not answer an empty request the way its description suggests
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointIssue {
    /// "METHOD /path"
    pub endpoint: String,

    /// Status returned by the API, `None` when the request never completed
    pub status: Option<u16>,

    pub detail: String,
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ParserError::FetchError(format!("HTTP client: {}", e)))
}

/// Fetch `{base_url}/openapi.json` from a running API
pub async fn fetch_description(base_url: &str, timeout: Duration) -> Result<Value> {
    let url = format!("{}/openapi.json", base_url.trim_end_matches('/'));
    info!(url = %url, "fetching API description");

    let response = http_client(timeout)?
        .get(&url)
        .send()
        .await
        .map_err(|e| ParserError::FetchError(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ParserError::FetchError(format!("{} returned {}", url, status)));
    }

    let text = response
        .text()
        .await
        .map_err(|e| ParserError::FetchError(format!("{}: {}", url, e)))?;

    parse_description_str(&text)
}

/// Send every concrete endpoint an empty JSON body and report the ones that fail.
///
/// Templated paths (`/users/{id}`) are skipped since there is no value to
/// substitute. The probe never mutates the endpoint list and never fails on
/// a single endpoint; transport errors become issues.
pub async fn probe_endpoints(
    base_url: &str,
    endpoints: &[EndpointDescriptor],
    timeout: Duration,
) -> Result<Vec<EndpointIssue>> {
    let client = http_client(timeout)?;
    let base_url = base_url.trim_end_matches('/');
    let mut issues = Vec::new();

    for endpoint in endpoints {
        if endpoint.path.contains('{') {
            debug!(path = %endpoint.path, "skipping templated path in probe");
            continue;
        }

        let label = format!("{} {}", endpoint.method, endpoint.path);
        let method = reqwest::Method::from_bytes(endpoint.method.as_str().as_bytes())
            .map_err(|e| ParserError::FetchError(format!("{}: {}", label, e)))?;

        let mut request = client.request(method, format!("{}{}", base_url, endpoint.path));
        if endpoint.method.has_request_body() {
            request = request.json(&json!({}));
        }

        match request.send().await {
            Ok(response) if response.status().as_u16() < 400 => {
                debug!(endpoint = %label, status = response.status().as_u16(), "probe ok");
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                issues.push(EndpointIssue {
                    endpoint: label,
                    status: Some(status),
                    detail: format!("rejected an empty request: {}", body.trim()),
                });
            }
            Err(e) => issues.push(EndpointIssue {
                endpoint: label,
                status: None,
                detail: e.to_string(),
            }),
        }
    }

    Ok(issues)
}
