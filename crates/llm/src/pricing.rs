//! Per-model pricing and cost computation.
//!
//! Prices are USD per million tokens.  The table is matched by model-id
//! prefix so dated snapshots (`claude-sonnet-4-5-20250929`) resolve to their
//! family row; unknown models fall back to the default row.

use crate::types::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_write_5m: f64,
    pub cache_write_1h: f64,
    pub cache_read: f64,
}

const PRICING: &[(&str, ModelPricing)] = &[
    (
        "claude-opus-4",
        ModelPricing {
            input: 15.0,
            output: 75.0,
            cache_write_5m: 18.75,
            cache_write_1h: 30.0,
            cache_read: 1.5,
        },
    ),
    (
        "claude-sonnet-4",
        ModelPricing {
            input: 3.0,
            output: 15.0,
            cache_write_5m: 3.75,
            cache_write_1h: 6.0,
            cache_read: 0.3,
        },
    ),
    (
        "claude-haiku-4",
        ModelPricing {
            input: 1.0,
            output: 5.0,
            cache_write_5m: 1.25,
            cache_write_1h: 2.0,
            cache_read: 0.1,
        },
    ),
];

/// Applied when no table row matches the model id.
const DEFAULT_PRICING: ModelPricing = ModelPricing {
    input: 3.0,
    output: 15.0,
    cache_write_5m: 3.75,
    cache_write_1h: 6.0,
    cache_read: 0.3,
};

pub fn pricing_for(model: &str) -> &'static ModelPricing {
    PRICING
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, pricing)| pricing)
        .unwrap_or(&DEFAULT_PRICING)
}

const PER_MTOK: f64 = 1_000_000.0;
/// Batch-submitted requests cost half of interactive submission.
const BATCH_MULTIPLIER: f64 = 0.5;

/// Dollar cost of one exchange given the vendor-reported usage.
pub fn compute_cost(model: &str, usage: &TokenUsage, batch: bool) -> f64 {
    let pricing = pricing_for(model);
    let (write_5m, write_1h) = usage.cache_write_split();
    let raw = usage.input_tokens as f64 * pricing.input
        + usage.output_tokens as f64 * pricing.output
        + write_5m as f64 * pricing.cache_write_5m
        + write_1h as f64 * pricing.cache_write_1h
        + usage.cache_read_input_tokens as f64 * pricing.cache_read;
    let cost = raw / PER_MTOK;
    if batch { cost * BATCH_MULTIPLIER } else { cost }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CacheCreation;

    fn usage() -> TokenUsage {
        TokenUsage {
            input_tokens: 1_000,
            output_tokens: 500,
            cache_read_input_tokens: 2_000,
            cache_creation_input_tokens: 300,
            cache_creation: Some(CacheCreation {
                ephemeral_5m_input_tokens: 200,
                ephemeral_1h_input_tokens: 100,
            }),
        }
    }

    #[test]
    fn prefix_match_resolves_dated_snapshot() {
        let pricing = pricing_for("claude-haiku-4-5-20251001");
        assert_eq!(pricing.input, 1.0);
    }

    #[test]
    fn unknown_model_uses_default_row() {
        assert_eq!(*pricing_for("totally-new-model"), DEFAULT_PRICING);
    }

    #[test]
    fn cost_sums_all_buckets() {
        let cost = compute_cost("claude-sonnet-4-5", &usage(), false);
        let expected = (1_000.0 * 3.0 + 500.0 * 15.0 + 200.0 * 3.75 + 100.0 * 6.0 + 2_000.0 * 0.3)
            / 1_000_000.0;
        assert!((cost - expected).abs() < 1e-12);
    }

    #[test]
    fn batch_halves_the_cost() {
        let interactive = compute_cost("claude-sonnet-4-5", &usage(), false);
        let batch = compute_cost("claude-sonnet-4-5", &usage(), true);
        assert!((batch - interactive * 0.5).abs() < 1e-12);
    }

    #[test]
    fn missing_breakdown_bills_creation_as_5m() {
        let flat = TokenUsage {
            input_tokens: 0,
            output_tokens: 0,
            cache_read_input_tokens: 0,
            cache_creation_input_tokens: 400,
            cache_creation: None,
        };
        let cost = compute_cost("claude-sonnet-4-5", &flat, false);
        assert!((cost - 400.0 * 3.75 / 1_000_000.0).abs() < 1e-12);
    }
}
