// Recovering test source from a model response.
// Fenced blocks in the target language win; otherwise lines are classified one by one
// and prose around the code is dropped. Kept lines are emitted byte for byte, in order.

use tracing::debug;

use crate::cli::TestFramework;
use super::test_cases::{ExtractionError, Result};

/// Source text recovered from a response, ready to be written to disk
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedSource {
    pub text: String,
    /// Non-blank lines discarded as prose or fencing
    pub dropped_lines: usize,
}

pub fn synthesize_source(raw: &str, framework: TestFramework) -> Result<SynthesizedSource> {
    let lines: Vec<&str> = raw.lines().collect();

    let (kept, dropped_lines) = match fenced_lines(&lines, framework) {
        Some(fenced) if non_blank(&fenced) > 0 => {
            let dropped = non_blank(&lines).saturating_sub(non_blank(&fenced));
            (fenced, dropped)
        }
        _ => classify_lines(&lines, framework),
    };

    let text = join_trimmed(&kept);
    if text.is_empty() {
        return Err(ExtractionError::NoCodeFound);
    }

    debug!(lines = kept.len(), dropped_lines, "synthesized test source");
    Ok(SynthesizedSource { text, dropped_lines })
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Language tag of an opening fence, lowercased; empty when untagged
fn fence_tag(line: &str) -> String {
    line.trim()
        .trim_start_matches(|c| c == '`' || c == '~')
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Untagged blocks and blocks in the framework's language are source;
/// `bash`, `text`, `json` and friends are instructions or sample output.
fn is_source_tag(tag: &str, framework: TestFramework) -> bool {
    if tag.is_empty() {
        return true;
    }
    let accepted: &[&str] = match framework {
        TestFramework::Pytest => &["python", "python3", "py", "pytest"],
        TestFramework::Jest => &["javascript", "js", "jsx", "node", "typescript", "ts", "tsx"],
    };
    accepted.contains(&tag)
}

/// Bodies of the source fences, in order, separated by one blank line.
/// An unterminated fence runs to the end of the response.
fn fenced_lines<'a>(lines: &[&'a str], framework: TestFramework) -> Option<Vec<&'a str>> {
    if !lines.iter().any(|line| is_fence(line)) {
        return None;
    }

    let mut kept = Vec::new();
    let mut inside = false;
    let mut keep_block = false;

    for line in lines {
        if is_fence(line) {
            if !inside {
                keep_block = is_source_tag(&fence_tag(line), framework);
                if keep_block && !kept.is_empty() {
                    kept.push("");
                }
            }
            inside = !inside;
            continue;
        }
        if inside && keep_block {
            kept.push(*line);
        }
    }

    Some(kept)
}

fn classify_lines<'a>(lines: &[&'a str], framework: TestFramework) -> (Vec<&'a str>, usize) {
    let mut kept = Vec::new();
    let mut dropped = 0;
    let mut in_block = false;

    for line in lines {
        if is_fence(line) {
            dropped += 1;
            continue;
        }

        if line.trim().is_empty() {
            if in_block {
                kept.push(*line);
            }
            continue;
        }

        // An indented line only ever continues a block; on its own it is an orphaned body
        let indented = line.starts_with(' ') || line.starts_with('\t');
        let code = if indented {
            in_block
        } else {
            is_code_line(line, framework)
        };

        if code {
            kept.push(*line);
            in_block = true;
        } else {
            dropped += 1;
            in_block = false;
        }
    }

    (kept, dropped)
}

fn is_code_line(line: &str, framework: TestFramework) -> bool {
    const PYTHON: &[&str] = &[
        "import ", "from ", "def ", "async def ", "class ", "@", "#",
        "with ", "async with ", "for ", "async for ", "while ", "if ", "elif ", "else:",
        "try:", "except", "finally:", "assert ", ")", "]", "}",
    ];
    const JAVASCRIPT: &[&str] = &[
        "import ", "const ", "let ", "var ", "require(", "describe(", "test(", "it(",
        "beforeAll(", "afterAll(", "beforeEach(", "afterEach(", "expect(", "module.exports",
        "function ", "async function ", "//", "/*", "}", ")", "]",
    ];

    let prefixes = match framework {
        TestFramework::Pytest => PYTHON,
        TestFramework::Jest => JAVASCRIPT,
    };

    prefixes.iter().any(|prefix| line.starts_with(prefix)) || is_assignment(line)
}

/// `NAME = ...` or `obj.attr = ...`, but not `==` comparisons or prose with `=`
fn is_assignment(line: &str) -> bool {
    let Some((target, rest)) = line.split_once('=') else {
        return false;
    };
    if rest.starts_with('=') {
        return false;
    }

    let target = target.trim_end();
    !target.is_empty()
        && !target.starts_with('.')
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && target
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
}

fn non_blank(lines: &[&str]) -> usize {
    lines.iter().filter(|line| !line.trim().is_empty()).count()
}

fn join_trimmed(lines: &[&str]) -> String {
    let start = lines.iter().position(|line| !line.trim().is_empty());
    let end = lines.iter().rposition(|line| !line.trim().is_empty());

    match (start, end) {
        (Some(start), Some(end)) => {
            let mut text = lines[start..=end].join("\n");
            text.push('\n');
            text
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_detection() {
        assert!(is_assignment("BASE_URL = \"http://localhost:8000\""));
        assert!(is_assignment("client.timeout = 5"));
        assert!(!is_assignment("x == y"));
        assert!(!is_assignment("Note that a = b in prose"));
        assert!(!is_assignment("= 3"));
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        let lines = ["```python", "import requests", "", "def test_a():", "    pass"];
        let fenced = fenced_lines(&lines, TestFramework::Pytest).unwrap();
        assert_eq!(fenced, vec!["import requests", "", "def test_a():", "    pass"]);
    }

    #[test]
    fn fence_tags() {
        assert_eq!(fence_tag("```Python"), "python");
        assert_eq!(fence_tag("~~~ js title=api.test.js"), "js");
        assert_eq!(fence_tag("```"), "");
        assert!(is_source_tag("py", TestFramework::Pytest));
        assert!(!is_source_tag("bash", TestFramework::Pytest));
        assert!(!is_source_tag("python", TestFramework::Jest));
    }
}
