//! Extraction of the structured payload from raw generator text.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Payload extraction errors.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Empty response")]
    Empty,

    #[error("No JSON object found in response")]
    NoObject,

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Strip code fences and surrounding prose, returning the JSON object.
///
/// Handles ```json fences, bare fences, and finally the outermost `{...}`
/// span of the text.
pub fn extract_json(text: &str) -> Option<&str> {
    let text = text.trim();

    let fenced = if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        text[content_start..]
            .find("```")
            .map(|end| text[content_start..content_start + end].trim())
    } else if let Some(start) = text.find("```") {
        let content_start = start + 3;
        text[content_start..]
            .find("```")
            .map(|end| text[content_start..content_start + end].trim())
    } else {
        None
    };
    let candidate = fenced.unwrap_or(text);

    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&candidate[start..=end])
}

/// Read an explicit `null` as the field's default.
///
/// Missing fields are covered by `#[serde(default)]` on the container.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a payload, retrying once on the extracted object.
pub fn parse_payload<T: DeserializeOwned>(text: &str) -> Result<T, PayloadError> {
    if text.trim().is_empty() {
        return Err(PayloadError::Empty);
    }
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Ok(value);
    }

    let extracted = extract_json(text).ok_or(PayloadError::NoObject)?;
    tracing::debug!(
        raw_len = text.len(),
        extracted_len = extracted.len(),
        "re-parsing extracted payload"
    );
    serde_json::from_str(extracted).map_err(|e| PayloadError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Fragment {
        title: String,
    }

    #[test]
    fn test_extract_json_plain() {
        let text = r#"{"title": "A"}"#;
        assert_eq!(extract_json(text), Some(text));
    }

    #[test]
    fn test_extract_json_markdown() {
        let text = "Here you go:\n```json\n{\"title\": \"A\"}\n```\nEnjoy!";
        assert_eq!(extract_json(text), Some("{\"title\": \"A\"}"));

        let bare = "```\n{\"title\": \"B\"}\n```";
        assert_eq!(extract_json(bare), Some("{\"title\": \"B\"}"));
    }

    #[test]
    fn test_extract_json_surrounding_prose() {
        let text = "Sure! {\"title\": \"A\", \"nested\": {\"x\": 1}} Hope that helps.";
        assert_eq!(
            extract_json(text),
            Some("{\"title\": \"A\", \"nested\": {\"x\": 1}}")
        );
        assert_eq!(extract_json("no braces here"), None);
    }

    #[test]
    fn test_parse_payload_retries_on_extraction() {
        let fragment: Fragment = parse_payload("The chapter:\n{\"title\": \"Dawn\"}").unwrap();
        assert_eq!(fragment.title, "Dawn");
    }

    #[test]
    fn test_parse_payload_errors() {
        assert!(matches!(parse_payload::<Fragment>("  "), Err(PayloadError::Empty)));
        assert!(matches!(
            parse_payload::<Fragment>("nothing structured"),
            Err(PayloadError::NoObject)
        ));
        assert!(matches!(
            parse_payload::<Fragment>("{\"title\": }"),
            Err(PayloadError::Malformed(_))
        ));
    }
}
