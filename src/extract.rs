use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no JSON object found in model reply")]
    NoObject,
    #[error("extracted span is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Isolates and parses the single JSON object embedded in a model reply.
///
/// The model is asked to respond with JSON only, but replies routinely arrive
/// wrapped in markdown code fences or a sentence of prose. Fences are stripped
/// first, then the span from the first `{` to its balanced closing `}` is
/// parsed (falling back to the last `}` in the text when the braces never
/// balance, e.g. on a truncated reply).
pub fn extract_json_object(raw: &str) -> Result<Value, ExtractError> {
    let cleaned = strip_code_fences(raw);
    let span = object_span(&cleaned).ok_or(ExtractError::NoObject)?;
    Ok(serde_json::from_str(span)?)
}

/// Extracts the embedded JSON object and deserializes it into `T`.
pub fn extract_json<T: DeserializeOwned>(raw: &str) -> Result<T, ExtractError> {
    let value = extract_json_object(raw)?;
    Ok(serde_json::from_value(value)?)
}

fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    // Unbalanced input: take everything through the last closing brace.
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_object() {
        let value = extract_json_object(r#"{"itemName": "Lamp", "category": "Home Decor"}"#)
            .expect("extract");
        assert_eq!(value["itemName"], json!("Lamp"));
    }

    #[test]
    fn strips_json_code_fences() {
        let raw = "```json\n{\"averagePrice\": 120.5}\n```";
        let value = extract_json_object(raw).expect("extract");
        assert_eq!(value["averagePrice"], json!(120.5));
    }

    #[test]
    fn tolerates_surrounding_prose() {
        let raw = "Sure! Here is the analysis you asked for:\n{\"confidence\": \"high\"}\nLet me know if you need anything else.";
        let value = extract_json_object(raw).expect("extract");
        assert_eq!(value["confidence"], json!("high"));
    }

    #[test]
    fn matches_direct_parse_semantics() {
        let object = r#"{"priceHistory": [{"price": 10, "date": "2025-01-02"}], "historicalTrend": "stable"}"#;
        let wrapped = format!("Analysis below.\n```json\n{object}\n```\nDone.");
        let direct: Value = serde_json::from_str(object).expect("direct parse");
        let extracted = extract_json_object(&wrapped).expect("extract");
        assert_eq!(direct, extracted);
    }

    #[test]
    fn handles_braces_inside_strings() {
        let raw = r#"note: {"reasoning": "supply {constrained} this quarter", "direction": "up"} trailing } brace"#;
        let value = extract_json_object(raw).expect("extract");
        assert_eq!(value["direction"], json!("up"));
    }

    #[test]
    fn nested_objects_stay_intact() {
        let raw = r#"{"priceRange": {"lowest": 5, "highest": 9}, "currency": "USD"}"#;
        let value = extract_json_object(raw).expect("extract");
        assert_eq!(value["priceRange"]["highest"], json!(9));
    }

    #[test]
    fn rejects_text_without_object() {
        let err = extract_json_object("I could not identify the item.").unwrap_err();
        assert!(matches!(err, ExtractError::NoObject));
    }

    #[test]
    fn rejects_unparseable_span() {
        let err = extract_json_object("{this is not json}").unwrap_err();
        assert!(matches!(err, ExtractError::Parse(_)));
    }

    #[test]
    fn typed_extraction() {
        #[derive(serde::Deserialize)]
        struct Reply {
            confidence: String,
        }
        let reply: Reply = extract_json("```json\n{\"confidence\": \"medium\"}\n```").expect("typed");
        assert_eq!(reply.confidence, "medium");
    }
}
