//! Base64 content filter for tool results.
//!
//! Tool results are fed back to the LLM as text; a tool that inlines a
//! whole file as base64 would blow the conversation budget while the file
//! layer already preserves the artifact. Any string field over the
//! threshold that looks like base64 is replaced with a size placeholder.
//! JSON results are filtered field-wise so structure survives; anything
//! else gets a regex sweep.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

/// Strings longer than this are candidates for removal.
pub const FILTER_THRESHOLD: usize = 10_000;

lazy_static! {
    // Contiguous base64-looking runs; shorter bound than the JSON field
    // threshold because prose never produces runs this long.
    static ref LONG_BASE64: Regex =
        Regex::new(r"[A-Za-z0-9+/]{1000,}={0,2}").expect("static regex");
}

/// Whether a string is plausibly base64 content (charset check over a
/// bounded prefix; padding allowed at the end).
fn looks_like_base64(text: &str) -> bool {
    if text.len() < 4 {
        return false;
    }
    let body = text.trim_end_matches('=');
    body.bytes()
        .take(4096)
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'\n' || b == b'\r')
}

fn placeholder(len: usize) -> String {
    format!("<content_removed_size_{len}_bytes>")
}

fn filter_value(value: &mut Value) -> bool {
    match value {
        Value::String(text) => {
            if text.len() > FILTER_THRESHOLD && looks_like_base64(text) {
                let replaced = placeholder(text.len());
                *text = replaced;
                true
            } else {
                false
            }
        }
        Value::Array(items) => {
            let mut changed = false;
            for item in items {
                changed |= filter_value(item);
            }
            changed
        }
        Value::Object(map) => {
            let mut changed = false;
            for item in map.values_mut() {
                changed |= filter_value(item);
            }
            changed
        }
        _ => false,
    }
}

/// Filter large base64 content out of a tool result before it re-enters
/// the LLM context.
pub fn filter_large_content(text: &str) -> String {
    if text.trim_start().starts_with('{') {
        if let Ok(mut value) = serde_json::from_str::<Value>(text) {
            if filter_value(&mut value) {
                if let Ok(filtered) = serde_json::to_string(&value) {
                    return filtered;
                }
            }
            return text.to_string();
        }
    }
    LONG_BASE64
        .replace_all(text, |caps: &regex::Captures<'_>| placeholder(caps[0].len()))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big_base64() -> String {
        "QUJDRA".repeat(2500) // ~15 KB of base64-looking text
    }

    #[test]
    fn large_base64_fields_are_replaced_in_json() {
        let payload = serde_json::json!({
            "results": {"ok": true},
            "content_base64": big_base64(),
            "note": "small"
        })
        .to_string();

        let filtered = filter_large_content(&payload);
        let parsed: Value = serde_json::from_str(&filtered).unwrap();
        let replaced = parsed["content_base64"].as_str().unwrap();
        assert!(replaced.starts_with("<content_removed_size_"));
        assert_eq!(parsed["note"], "small");
        assert_eq!(parsed["results"]["ok"], true);
    }

    #[test]
    fn nested_arrays_are_filtered() {
        let payload = serde_json::json!({
            "returned_files": [{"name": "a", "b64": big_base64()}]
        })
        .to_string();
        let filtered = filter_large_content(&payload);
        assert!(filtered.contains("<content_removed_size_"));
        assert!(!filtered.contains(&big_base64()));
    }

    #[test]
    fn small_and_non_base64_strings_survive() {
        let prose = "a".repeat(20_000); // long but it is prose-with-one-char, still base64 charset
        let mixed = format!("{} {}", prose, "hello world! not base64 **");
        let filtered = filter_large_content(&mixed);
        // The spaced prose fails the contiguous-base64 regex, so it survives.
        assert!(filtered.contains("hello world"));

        let payload = serde_json::json!({"text": "short"}).to_string();
        assert_eq!(filter_large_content(&payload), payload);
    }

    #[test]
    fn non_json_text_gets_regex_sweep() {
        let raw = format!("prefix {} suffix", "A".repeat(12_000));
        let filtered = filter_large_content(&raw);
        assert!(filtered.starts_with("prefix <content_removed_size_12000_bytes>"));
        assert!(filtered.ends_with("suffix"));
    }
}
