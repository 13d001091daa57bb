//! Code-block extraction from collaborator replies.

use regex::Regex;
use std::sync::LazyLock;

static JSON_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)```").expect("valid regex"));

/// Body of the first fenced ```` ```json ```` block, trimmed.
///
/// Only the first match counts; later blocks in the same reply are ignored.
pub fn extract_policy_source(reply: &str) -> Option<&str> {
    JSON_BLOCK_RE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_first_block() {
        let reply = "Reasoning first.\n\n```json\n{\"a\": 1}\n```\n\nAnd another:\n```json\n{\"b\": 2}\n```";
        assert_eq!(extract_policy_source(reply), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_no_block() {
        assert_eq!(extract_policy_source("I am happy with the current policy."), None);
        // Other languages are not policies
        assert_eq!(extract_policy_source("```python\ndef f(): pass\n```"), None);
    }

    #[test]
    fn test_non_greedy_and_multiline() {
        let reply = "```json\n{\n  \"x\": [1,\n 2]\n}\n```trailing ``` fence";
        assert_eq!(extract_policy_source(reply), Some("{\n  \"x\": [1,\n 2]\n}"));
    }

    #[test]
    fn test_tolerates_crlf_and_trailing_spaces() {
        let reply = "```json  \r\n{}\r\n```";
        assert_eq!(extract_policy_source(reply), Some("{}"));
    }
}
