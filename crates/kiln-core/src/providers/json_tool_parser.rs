//! Parser for tool calls embedded as JSON in content text.
//!
//! Some models output tool calls as JSON in the content field instead of
//! using the native tool-call channel. This parser recovers them. The
//! format varies, so several shapes are handled:
//!
//! 1. `{"name": "tool_name", "arguments": {...}}` anywhere in the text
//! 2. `tool_name {...}` (tool name followed by JSON arguments)
//! 3. `tool_name({...})` (function call style, known tool names only)
//!
//! Scanning uses balanced brace/string tracking rather than regex alone
//! because arguments may contain nested braces and escaped quotes. A match
//! is only accepted once its JSON balances; unterminated JSON stays in the
//! residual text, which is the signal for the truncation-retry path in the
//! agent loop.

use serde_json::{Map, Value};

use crate::providers::ToolInvocation;

/// Finds a balanced JSON object starting at `start` (which must index a
/// `{` byte). Returns the object slice and the index one past its end.
///
/// Tracks string state and backslash escapes so braces inside string
/// values never terminate the scan early. Returns `None` if the object
/// never closes before the text ends.
pub fn find_balanced_json(text: &str, start: usize) -> Option<(&str, usize)> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut brace_count = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut j = start;

    while j < bytes.len() {
        let b = bytes[j];

        if escape_next {
            escape_next = false;
            j += 1;
            continue;
        }

        if b == b'\\' && in_string {
            escape_next = true;
            j += 1;
            continue;
        }

        if b == b'"' {
            in_string = !in_string;
        } else if !in_string {
            if b == b'{' {
                brace_count += 1;
            } else if b == b'}' {
                brace_count -= 1;
                if brace_count == 0 {
                    return Some((&text[start..=j], j + 1));
                }
            }
        }

        j += 1;
    }

    None
}

/// Extracts tool calls embedded in `content`.
///
/// Returns the residual text (minus matched spans, `None` if nothing
/// remains after trimming) and the recovered invocations in first-seen
/// order, deduplicated. Text with no recoverable call comes back
/// unchanged with an empty list. Pure function, no I/O.
pub fn extract_tool_calls(
    content: &str,
    known_tools: &[String],
) -> (Option<String>, Vec<ToolInvocation>) {
    let mut calls: Vec<ToolInvocation> = Vec::new();
    let mut matches: Vec<(usize, usize)> = Vec::new();

    scan_object_shape(content, &mut calls, &mut matches);
    if calls.is_empty() {
        scan_call_shape(content, known_tools, &mut calls, &mut matches);
    }

    if calls.is_empty() {
        return (Some(content.to_string()), Vec::new());
    }

    matches.sort_unstable();
    let mut remaining = content.to_string();
    for &(start, end) in matches.iter().rev() {
        remaining.replace_range(start..end, "");
    }
    let remaining = remaining.trim().to_string();
    let residual = (!remaining.is_empty()).then_some(remaining);

    (residual, dedup_invocations(calls))
}

/// Drops invocations with identical name and identical argument set,
/// keeping the first occurrence order.
pub fn dedup_invocations(calls: Vec<ToolInvocation>) -> Vec<ToolInvocation> {
    let mut seen: Vec<ToolInvocation> = Vec::with_capacity(calls.len());
    for call in calls {
        if !seen.contains(&call) {
            seen.push(call);
        }
    }
    seen
}

/// Scans for `{"name": ..., "arguments": ...}` objects anywhere in the text.
fn scan_object_shape(
    content: &str,
    calls: &mut Vec<ToolInvocation>,
    matches: &mut Vec<(usize, usize)>,
) {
    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{'
            && let Some((json_str, end)) = find_balanced_json(content, i)
            && let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(json_str)
            && let Some(Value::String(name)) = obj.get("name")
            && obj.contains_key("arguments")
        {
            let arguments = match obj.get("arguments") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            calls.push(ToolInvocation::new(name.clone(), arguments));
            matches.push((i, end));
            i = end;
            continue;
        }
        i += 1;
    }
}

/// Scans for `name {...}` and `name({...})` call styles for known tools.
fn scan_call_shape(
    content: &str,
    known_tools: &[String],
    calls: &mut Vec<ToolInvocation>,
    matches: &mut Vec<(usize, usize)>,
) {
    let bytes = content.as_bytes();

    for tool in known_tools {
        let mut search = 0;
        while let Some(rel) = content[search..].find(tool.as_str()) {
            let start = search + rel;
            search = start + tool.len();

            // Reject matches inside a longer identifier.
            if start > 0 {
                let prev = bytes[start - 1];
                if prev.is_ascii_alphanumeric() || prev == b'_' {
                    continue;
                }
            }

            let mut j = start + tool.len();
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            let had_paren = bytes.get(j) == Some(&b'(');
            if had_paren {
                j += 1;
                while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
            }
            if bytes.get(j) != Some(&b'{') {
                continue;
            }

            if let Some((json_str, end)) = find_balanced_json(content, j)
                && let Ok(Value::Object(args)) = serde_json::from_str::<Value>(json_str)
            {
                let mut end = end;
                if had_paren && bytes.get(end) == Some(&b')') {
                    end += 1;
                }
                calls.push(ToolInvocation::new(tool.clone(), args));
                matches.push((start, end));
                search = end;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn known() -> Vec<String> {
        ["read_file", "write_file", "bash", "grep", "git_status"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    }

    #[test]
    fn test_plain_prose_passes_through() {
        let (residual, calls) = extract_tool_calls("Just a normal sentence.", &known());
        assert_eq!(residual.as_deref(), Some("Just a normal sentence."));
        assert!(calls.is_empty());
    }

    #[test]
    fn test_object_shape_extraction() {
        let content = r#"Let me check. {"name": "read_file", "arguments": {"path": "a.rs"}} Done."#;
        let (residual, calls) = extract_tool_calls(content, &known());

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments["path"], json!("a.rs"));
        assert_eq!(residual.as_deref(), Some("Let me check.  Done."));
    }

    #[test]
    fn test_nested_braces_and_escaped_quotes() {
        let content = r#"{"name": "bash", "arguments": {"command": "echo \"}\" {"}}"#;
        let (residual, calls) = extract_tool_calls(content, &known());

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["command"], json!("echo \"}\" {"));
        assert!(residual.is_none());
    }

    #[test]
    fn test_brace_inside_string_value() {
        // A closing brace inside a string must not end the scan early.
        let (json_str, end) = find_balanced_json(r#"{"a":"}"}"#, 0).unwrap();
        assert_eq!(json_str, r#"{"a":"}"}"#);
        assert_eq!(end, 9);
    }

    #[test]
    fn test_unterminated_json_left_in_residual() {
        let content = r#"{"name": "read_file", "arguments": {"path": "a.rs""#;
        let (residual, calls) = extract_tool_calls(content, &known());

        assert!(calls.is_empty());
        assert_eq!(residual.as_deref(), Some(content));
    }

    #[test]
    fn test_call_style_with_brace() {
        let content = r#"read_file {"path": "src/lib.rs"}"#;
        let (residual, calls) = extract_tool_calls(content, &known());

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments["path"], json!("src/lib.rs"));
        assert!(residual.is_none());
    }

    #[test]
    fn test_call_style_with_parens() {
        let content = r#"I'll run bash({"command": "ls -la"}) now."#;
        let (residual, calls) = extract_tool_calls(content, &known());

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bash");
        assert_eq!(calls[0].arguments["command"], json!("ls -la"));
        // The closing paren is removed along with the call.
        assert_eq!(residual.as_deref(), Some("I'll run  now."));
    }

    #[test]
    fn test_call_style_unknown_tool_ignored() {
        let content = r#"launch_missiles {"target": "moon"}"#;
        let (residual, calls) = extract_tool_calls(content, &known());

        assert!(calls.is_empty());
        assert_eq!(residual.as_deref(), Some(content));
    }

    #[test]
    fn test_call_style_requires_word_boundary() {
        let content = r#"xgrep {"pattern": "foo"}"#;
        let (_, calls) = extract_tool_calls(content, &known());
        assert!(calls.is_empty());
    }

    #[test]
    fn test_multiple_object_calls_in_order() {
        let content = concat!(
            r#"{"name": "git_status", "arguments": {}}"#,
            "\n",
            r#"{"name": "read_file", "arguments": {"path": "b.rs"}}"#,
        );
        let (residual, calls) = extract_tool_calls(content, &known());

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "git_status");
        assert_eq!(calls[1].name, "read_file");
        assert!(residual.is_none());
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let content = concat!(
            r#"{"name": "read_file", "arguments": {"path": "a.rs"}}"#,
            r#"{"name": "grep", "arguments": {"pattern": "x"}}"#,
            r#"{"name": "read_file", "arguments": {"path": "a.rs"}}"#,
        );
        let (_, calls) = extract_tool_calls(content, &known());

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[1].name, "grep");
    }

    #[test]
    fn test_non_object_arguments_become_empty() {
        let content = r#"{"name": "git_status", "arguments": "none"}"#;
        let (_, calls) = extract_tool_calls(content, &known());
        assert_eq!(calls.len(), 1);
        assert!(calls[0].arguments.is_empty());
    }

    #[test]
    fn test_plain_json_without_call_keys_is_prose() {
        let content = r#"Here is data: {"count": 3, "items": []}"#;
        let (residual, calls) = extract_tool_calls(content, &known());
        assert!(calls.is_empty());
        assert_eq!(residual.as_deref(), Some(content));
    }
}
