//! Cost model: token counts to money.
//!
//! Rates are static, versioned data keyed by model identifier. Changing a
//! price means editing [`RATE_TABLE`] and bumping [`RATE_TABLE_VERSION`];
//! nothing else in the workspace depends on the numbers.
//!
//! Cost is computed as `input / 1000 * input_rate + output / 1000 * output_rate`
//! so that exactly one thousand input tokens cost exactly the listed rate.

use serde::Serialize;

/// Version of the rate table below.
pub const RATE_TABLE_VERSION: &str = "2025-06-01";

/// Price per thousand tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rate {
    /// Price per 1K input tokens
    pub input_per_thousand: f64,
    /// Price per 1K output tokens
    pub output_per_thousand: f64,
}

impl Rate {
    /// Create a rate pair.
    pub const fn new(input_per_thousand: f64, output_per_thousand: f64) -> Self {
        Self {
            input_per_thousand,
            output_per_thousand,
        }
    }

    /// Price a call at this rate.
    pub fn price(&self, input_tokens: i64, output_tokens: i64) -> f64 {
        let input = input_tokens.max(0) as f64 / 1000.0;
        let output = output_tokens.max(0) as f64 / 1000.0;
        input * self.input_per_thousand + output * self.output_per_thousand
    }
}

/// One row of the rate table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateEntry {
    /// Provider the model is usually called through
    pub provider: &'static str,
    /// Model identifier
    pub model: &'static str,
    /// Listed rate
    pub rate: Rate,
}

const fn entry(provider: &'static str, model: &'static str, input: f64, output: f64) -> RateEntry {
    RateEntry {
        provider,
        model,
        rate: Rate::new(input, output),
    }
}

/// Conservative rate for models missing from the table.
pub const DEFAULT_RATE: Rate = Rate::new(0.001, 0.001);

/// Listed prices per thousand tokens.
pub static RATE_TABLE: &[RateEntry] = &[
    // OpenAI
    entry("openai", "gpt-4", 0.03, 0.06),
    entry("openai", "gpt-4-turbo", 0.01, 0.03),
    entry("openai", "gpt-4o", 0.005, 0.015),
    entry("openai", "gpt-4o-mini", 0.00015, 0.0006),
    entry("openai", "gpt-3.5-turbo", 0.0005, 0.0015),
    // Anthropic
    entry("anthropic", "claude-3-opus", 0.015, 0.075),
    entry("anthropic", "claude-3-sonnet", 0.003, 0.015),
    entry("anthropic", "claude-3-haiku", 0.00025, 0.00125),
    entry("anthropic", "claude-sonnet-4-5", 0.003, 0.015),
    entry("anthropic", "claude-opus-4", 0.015, 0.075),
    // Google
    entry("google", "gemini-pro", 0.000125, 0.000375),
    entry("google", "gemini-1.5-pro", 0.00125, 0.005),
    entry("google", "gemini-1.5-flash", 0.000075, 0.0003),
    entry("google", "gemini-2.0-flash", 0.0001, 0.0004),
    // Groq
    entry("groq", "llama-3.3-70b", 0.00059, 0.00079),
    entry("groq", "llama-3.1-8b-instant", 0.00005, 0.00008),
    entry("groq", "mixtral-8x7b", 0.00024, 0.00024),
    entry("groq", "gemma2-9b-it", 0.0002, 0.0002),
    // NVIDIA
    entry("nvidia", "meta/llama-3.3-70b-instruct", 0.00077, 0.00077),
    entry("nvidia", "mistralai/mistral-large-2-instruct", 0.002, 0.006),
];

/// Premium models and the cheaper model suggested in their place.
pub static DOWNGRADE_TABLE: &[(&str, &str)] = &[
    ("gpt-4", "gpt-4o-mini"),
    ("gpt-4-turbo", "gpt-4o-mini"),
    ("gpt-4o", "gpt-4o-mini"),
    ("claude-3-opus", "claude-3-haiku"),
    ("claude-opus-4", "claude-sonnet-4-5"),
    ("gemini-1.5-pro", "gemini-1.5-flash"),
    ("mistralai/mistral-large-2-instruct", "meta/llama-3.3-70b-instruct"),
];

/// Compute the cost of a call.
///
/// Unknown models are priced at [`DEFAULT_RATE`]; this never fails.
pub fn cost(provider: &str, model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
    rate_for(provider, model).price(input_tokens, output_tokens)
}

/// Rate used for a provider/model pair, falling back to [`DEFAULT_RATE`].
pub fn rate_for(provider: &str, model: &str) -> Rate {
    lookup(provider, model)
        .or_else(|| lookup(provider, strip_date_suffix(model)))
        .unwrap_or(DEFAULT_RATE)
}

/// True when the model (or its undated base name) has a listed rate.
pub fn is_listed(model: &str) -> bool {
    RATE_TABLE
        .iter()
        .any(|e| e.model == model || e.model == strip_date_suffix(model))
}

/// Cheaper substitute for a premium model, if it is one.
pub fn cheaper_substitute(model: &str) -> Option<&'static str> {
    let base = strip_date_suffix(model);
    DOWNGRADE_TABLE
        .iter()
        .find(|(premium, _)| *premium == model || *premium == base)
        .map(|(_, substitute)| *substitute)
}

/// Exact model match, preferring the entry listed under the same provider.
fn lookup(provider: &str, model: &str) -> Option<Rate> {
    let mut fallback = None;
    for entry in RATE_TABLE.iter().filter(|e| e.model == model) {
        if entry.provider == provider {
            return Some(entry.rate);
        }
        fallback.get_or_insert(entry.rate);
    }
    fallback
}

/// Strip a release-date suffix such as `-20240229` or `-2024-08-06`.
fn strip_date_suffix(model: &str) -> &str {
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if let Some((base, tail)) = model.rsplit_once('-')
        && tail.len() == 8
        && is_digits(tail)
    {
        return base;
    }

    // -YYYY-MM-DD
    if model.len() > 11 && model.is_char_boundary(model.len() - 11) {
        let (base, tail) = model.split_at(model.len() - 11);
        let parts: Vec<&str> = tail.split('-').collect();
        if parts.len() == 4
            && parts[0].is_empty()
            && parts[1].len() == 4
            && parts[2].len() == 2
            && parts[3].len() == 2
            && parts[1..].iter().all(|p| is_digits(p))
        {
            return base;
        }
    }

    model
}
