//! Token count extraction from provider responses.
//!
//! Each provider has an ordered list of rules. A rule names the object that
//! carries usage (`usage`, `usageMetadata`) and the candidate field names for
//! input and output counts. The first rule whose object is present wins;
//! inside it the first numeric candidate is used, anything missing is zero.

use serde_json::Value;

/// One way of finding token counts in a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionRule {
    /// Top-level key holding the usage object
    pub container: &'static str,
    /// Candidate keys for the input count, in priority order
    pub input: &'static [&'static str],
    /// Candidate keys for the output count, in priority order
    pub output: &'static [&'static str],
}

/// OpenAI-style `usage` object (also Anthropic, Groq, NVIDIA and compatible APIs).
pub const USAGE_OBJECT: ExtractionRule = ExtractionRule {
    container: "usage",
    input: &["prompt_tokens", "input_tokens"],
    output: &["completion_tokens", "output_tokens"],
};

/// Gemini `usageMetadata` object.
pub const USAGE_METADATA: ExtractionRule = ExtractionRule {
    container: "usageMetadata",
    input: &["promptTokenCount"],
    output: &["candidatesTokenCount"],
};

const OPENAI_COMPATIBLE: &[ExtractionRule] = &[USAGE_OBJECT];
const GOOGLE: &[ExtractionRule] = &[USAGE_METADATA, USAGE_OBJECT];
const GENERIC: &[ExtractionRule] = &[USAGE_OBJECT, USAGE_METADATA];

/// Rule table keyed by provider.
static RULES: &[(&str, &[ExtractionRule])] = &[
    ("openai", OPENAI_COMPATIBLE),
    ("anthropic", OPENAI_COMPATIBLE),
    ("groq", OPENAI_COMPATIBLE),
    ("nvidia", OPENAI_COMPATIBLE),
    ("deepseek", OPENAI_COMPATIBLE),
    ("kimi", OPENAI_COMPATIBLE),
    ("qwen", OPENAI_COMPATIBLE),
    ("google", GOOGLE),
];

/// Input and output token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub input: i64,
    pub output: i64,
}

/// Rules applied for a provider; unknown providers get the generic list.
pub fn rules_for(provider: &str) -> &'static [ExtractionRule] {
    RULES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(provider))
        .map(|(_, rules)| *rules)
        .unwrap_or(GENERIC)
}

/// Extract token counts from a serialized response.
pub fn extract(provider: &str, response: &Value) -> TokenCounts {
    rules_for(provider)
        .iter()
        .find_map(|rule| {
            let usage = response.get(rule.container).filter(|v| v.is_object())?;
            Some(TokenCounts {
                input: first_count(usage, rule.input),
                output: first_count(usage, rule.output),
            })
        })
        .unwrap_or_default()
}

fn first_count(usage: &Value, keys: &[&str]) -> i64 {
    keys.iter()
        .find_map(|key| {
            let value = usage.get(*key)?;
            value
                .as_i64()
                .or_else(|| value.as_u64().map(|n| i64::try_from(n).unwrap_or(i64::MAX)))
                .or_else(|| value.as_f64().map(|f| f as i64))
        })
        .unwrap_or(0)
        .max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_usage() {
        let body = json!({"usage": {"prompt_tokens": 120, "completion_tokens": 30}});
        assert_eq!(
            extract("openai", &body),
            TokenCounts {
                input: 120,
                output: 30
            }
        );
    }

    #[test]
    fn test_anthropic_usage() {
        let body = json!({"usage": {"input_tokens": 7, "output_tokens": 9}});
        assert_eq!(
            extract("anthropic", &body),
            TokenCounts {
                input: 7,
                output: 9
            }
        );
    }

    #[test]
    fn test_gemini_usage_metadata() {
        let body = json!({"usageMetadata": {"promptTokenCount": 11, "candidatesTokenCount": 4}});
        assert_eq!(
            extract("google", &body),
            TokenCounts {
                input: 11,
                output: 4
            }
        );
    }

    #[test]
    fn test_unknown_provider_uses_generic_rules() {
        let body = json!({"usageMetadata": {"promptTokenCount": 5}});
        assert_eq!(
            extract("mistral", &body),
            TokenCounts {
                input: 5,
                output: 0
            }
        );
    }

    #[test]
    fn test_missing_usage_is_zero() {
        assert_eq!(extract("openai", &json!({"id": "x"})), TokenCounts::default());
        assert_eq!(extract("openai", &json!("plain string")), TokenCounts::default());
        assert_eq!(
            extract("openai", &json!({"usage": {"prompt_tokens": null}})),
            TokenCounts::default()
        );
    }

    #[test]
    fn test_first_candidate_wins() {
        let body = json!({"usage": {"prompt_tokens": 1, "input_tokens": 99}});
        assert_eq!(extract("openai", &body).input, 1);
    }

    #[test]
    fn test_negative_counts_clamp() {
        let body = json!({"usage": {"prompt_tokens": -5}});
        assert_eq!(extract("openai", &body).input, 0);
    }
}
