//! Extraction of code blocks and final answers from assistant text.

use once_cell::sync::Lazy;
use regex::Regex;

/// End-of-code sentinel used by the structured code worker.
pub const END_CODE: &str = "<end_code>";

static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:python|py)\s*\n?(.*?)\n?```").expect("fenced regex"));
static FENCED_SENTINEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:python|py)\s*\n?(.*?)\n?```\s*<end_code>").expect("sentinel regex")
});
static LOOSE_SENTINEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:python|py)\s*\n?(.*?)\s*<end_code>").expect("loose regex")
});

/// Extracts the first complete Python code block. Recognized formats, in
/// priority order:
///
/// 1. fenced: ```` ```python … ``` ````
/// 2. fenced with sentinel: ```` ```python … ```<end_code> ````
/// 3. loose sentinel: ```` ```python … <end_code> ```` (no closing fence)
///
/// Trailing whitespace is tolerated. Returns `None` when no block matches.
pub fn extract_code(text: &str) -> Option<String> {
    for re in [&*FENCED, &*FENCED_SENTINEL, &*LOOSE_SENTINEL] {
        if let Some(captures) = re.captures(text) {
            let code = captures.get(1)?.as_str().trim_end();
            if !code.trim().is_empty() {
                return Some(code.to_string());
            }
        }
    }
    None
}

static FINAL_ANSWER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*(?:final answer|answer)\s*[:\-]\s*(.+)$").expect("fa regex"));

/// Extracts the final answer from chain-of-thought text: the last explicit
/// `Final Answer:` line, falling back to the last non-empty paragraph.
pub fn extract_final_answer(text: &str) -> String {
    if let Some(m) = FINAL_ANSWER
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
    {
        return m.as_str().trim().to_string();
    }
    text.split("\n\n")
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fenced_block() {
        let text = "Thought: compute.\n```python\nx = 1\nprint(x)\n```\nDone.";
        assert_eq!(extract_code(text).unwrap(), "x = 1\nprint(x)");
    }

    #[test]
    fn fenced_block_with_sentinel() {
        let text = "```python\ny = 2\n```<end_code>";
        assert_eq!(extract_code(text).unwrap(), "y = 2");
    }

    #[test]
    fn loose_sentinel_without_closing_fence() {
        let text = "```python\nz = 3\n<end_code>";
        assert_eq!(extract_code(text).unwrap(), "z = 3");
    }

    #[test]
    fn first_complete_block_wins() {
        let text = "```python\nfirst = 1\n```\nand then\n```python\nsecond = 2\n```";
        assert_eq!(extract_code(text).unwrap(), "first = 1");
    }

    #[test]
    fn no_block_returns_none() {
        assert!(extract_code("no code here").is_none());
        assert!(extract_code("```python\n```").is_none());
    }

    #[test]
    fn trailing_whitespace_tolerated() {
        let text = "```python\na = 1\n```   \n";
        assert_eq!(extract_code(text).unwrap(), "a = 1");
    }

    #[test]
    fn final_answer_line_is_extracted() {
        let text = "Let me think.\nStep 1: ...\nFinal Answer: 42\n";
        assert_eq!(extract_final_answer(text), "42");
    }

    #[test]
    fn last_final_answer_wins() {
        let text = "Final answer: wrong\nreconsidering...\nfinal answer: right";
        assert_eq!(extract_final_answer(text), "right");
    }

    #[test]
    fn falls_back_to_last_paragraph() {
        let text = "Some reasoning.\n\nThe result is 7.\n\n";
        assert_eq!(extract_final_answer(text), "The result is 7.");
    }
}
