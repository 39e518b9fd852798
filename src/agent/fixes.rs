// Fix suggestions for endpoint issues found by the empty-request check of the live API.

use serde::Serialize;
use tracing::{info, warn};

use crate::generator::{build_fix_prompt, TextGenerator};
use crate::parser::EndpointIssue;
use crate::utils::truncate_chars;

/// Characters of a suggestion shown in the issue report
const PREVIEW_CHARS: usize = 200;

/// The model's answer for one endpoint issue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixSuggestion {
    pub issue: EndpointIssue,
    /// `None` when the generation call failed
    pub suggestion: Option<String>,
    pub error: Option<String>,
}

impl FixSuggestion {
    /// Report entry: the issue, then the start of the suggested fix
    pub fn summary(&self) -> String {
        let answer = match (&self.suggestion, &self.error) {
            (Some(text), _) => truncate_chars(text.trim(), PREVIEW_CHARS),
            (None, Some(error)) => format!("unavailable ({})", error),
            (None, None) => "unavailable".to_string(),
        };
        format!(
            "Issue: {} - {}\nSuggested fix: {}",
            self.issue.endpoint, self.issue.detail, answer
        )
    }
}

/// Ask the model for a fix to each issue, one call per issue, in order.
///
/// A failed call is recorded on its suggestion and does not stop the others.
pub async fn suggest_fixes(
    generator: &dyn TextGenerator,
    model: &str,
    issues: &[EndpointIssue],
) -> Vec<FixSuggestion> {
    let mut suggestions = Vec::with_capacity(issues.len());

    for issue in issues {
        let prompt = build_fix_prompt(&serde_json::json!(issue));

        let suggestion = match generator.generate(&prompt, model).await {
            Ok(text) => {
                info!(endpoint = %issue.endpoint, chars = text.len(), "received fix suggestion");
                FixSuggestion {
                    issue: issue.clone(),
                    suggestion: Some(text),
                    error: None,
                }
            }
            Err(e) => {
                warn!(endpoint = %issue.endpoint, error = %e, "fix suggestion unavailable");
                FixSuggestion {
                    issue: issue.clone(),
                    suggestion: None,
                    error: Some(e.to_string()),
                }
            }
        };
        suggestions.push(suggestion);
    }

    suggestions
}
