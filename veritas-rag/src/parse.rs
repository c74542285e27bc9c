//! Lenient extraction of typed values from free-form model fields.
//!
//! Nothing here fails. Each helper returns a documented default when the
//! model's text does not contain what was asked for.

use regex::Regex;
use std::sync::LazyLock;

static NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+(\.\d+)?)").ok());

/// First non-negative decimal number in `text`.
pub fn first_number(text: &str) -> Option<f64> {
    let re = NUMBER.as_ref()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Critic score: the first number in the field, `0.0` when there is none.
///
/// `"7/10"` gives 7.0 and `"Score: 7.5 out of 10"` gives 7.5.
pub fn extract_score(text: &str) -> f64 {
    first_number(text).unwrap_or(0.0)
}

/// Normalize a self-reported confidence into `[0, 1]`.
///
/// Values already in range are kept, values in `(1, 100]` are read as
/// percentages, and anything else leaves confidence unset.
pub fn normalize_confidence(text: &str) -> Option<f64> {
    let value = first_number(text)?;
    if (0.0..=1.0).contains(&value) {
        Some(value)
    } else if value > 1.0 && value <= 100.0 {
        Some(value / 100.0)
    } else {
        None
    }
}

/// Interpret the critic's pass/fail field.
pub fn parse_passed(text: &str) -> bool {
    let normalized = text
        .trim()
        .to_lowercase()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string();
    matches!(normalized.as_str(), "true" | "yes" | "pass" | "passed")
}

/// Parse a list of names given either as a JSON array of strings or as a
/// comma/newline separated list (bullets and quotes are stripped).
pub fn parse_list(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if trimmed.starts_with('[')
        && let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed)
    {
        return items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    trimmed
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split([',', '\n'])
        .map(|item| {
            item.trim()
                .trim_start_matches(['-', '*'])
                .trim()
                .trim_matches(['"', '\''])
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_score_variants() {
        assert_eq!(extract_score("7/10"), 7.0);
        assert_eq!(extract_score("Score: 7.5 out of 10"), 7.5);
        assert_eq!(extract_score("unknown"), 0.0);
        assert_eq!(extract_score(""), 0.0);
        assert_eq!(extract_score("9"), 9.0);
    }

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence("0.95"), Some(0.95));
        assert_eq!(normalize_confidence("Confidence: 1"), Some(1.0));
        assert_eq!(normalize_confidence("85%"), Some(0.85));
        assert_eq!(normalize_confidence("100"), Some(1.0));
        assert_eq!(normalize_confidence("250"), None);
        assert_eq!(normalize_confidence("high"), None);
        assert_eq!(normalize_confidence("0"), Some(0.0));
    }

    #[test]
    fn test_parse_passed() {
        assert!(parse_passed("True"));
        assert!(parse_passed("  yes. "));
        assert!(parse_passed("\"passed\""));
        assert!(parse_passed("PASS!"));
        assert!(!parse_passed("false"));
        assert!(!parse_passed("no"));
        assert!(!parse_passed("true-ish"));
        assert!(!parse_passed(""));
    }

    #[test]
    fn test_parse_list_json_array() {
        assert_eq!(
            parse_list(r#"["DSPy", " Milvus ", ""]"#),
            vec!["DSPy".to_string(), "Milvus".to_string()]
        );
    }

    #[test]
    fn test_parse_list_delimited() {
        assert_eq!(
            parse_list("DSPy, Milvus\n- vector search\n'BAML'"),
            vec![
                "DSPy".to_string(),
                "Milvus".to_string(),
                "vector search".to_string(),
                "BAML".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_list_python_style_brackets() {
        assert_eq!(
            parse_list("['DSPy', 'Milvus']"),
            vec!["DSPy".to_string(), "Milvus".to_string()]
        );
        assert!(parse_list("  ").is_empty());
        assert!(parse_list("[]").is_empty());
    }
}
