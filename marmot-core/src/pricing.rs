//! Static model pricing and context-window table.
//!
//! Consulted by the context manager for context-window defaults and by the
//! usage summary for cost estimates.

use crate::types::UsageInfo;

/// Per-model pricing in USD per million tokens, plus context window size.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub model: &'static str,
    pub input_usd_per_mtok: f64,
    pub output_usd_per_mtok: f64,
    pub cache_write_usd_per_mtok: f64,
    pub cache_read_usd_per_mtok: f64,
    pub context_window: u64,
}

pub const MODEL_PRICING: &[ModelPricing] = &[
    ModelPricing {
        model: "claude-sonnet-4-20250514",
        input_usd_per_mtok: 3.0,
        output_usd_per_mtok: 15.0,
        cache_write_usd_per_mtok: 3.75,
        cache_read_usd_per_mtok: 0.30,
        context_window: 200_000,
    },
    ModelPricing {
        model: "claude-haiku-4-20250514",
        input_usd_per_mtok: 0.80,
        output_usd_per_mtok: 4.0,
        cache_write_usd_per_mtok: 1.0,
        cache_read_usd_per_mtok: 0.08,
        context_window: 200_000,
    },
    ModelPricing {
        model: "claude-opus-4-20250514",
        input_usd_per_mtok: 15.0,
        output_usd_per_mtok: 75.0,
        cache_write_usd_per_mtok: 18.75,
        cache_read_usd_per_mtok: 1.50,
        context_window: 200_000,
    },
];

/// Pricing applied when the model is not in the table.
const DEFAULT_PRICING: ModelPricing = ModelPricing {
    model: "default",
    input_usd_per_mtok: 3.0,
    output_usd_per_mtok: 15.0,
    cache_write_usd_per_mtok: 3.75,
    cache_read_usd_per_mtok: 0.30,
    context_window: 200_000,
};

/// Look up pricing for a model, falling back to defaults.
pub fn pricing_for(model: &str) -> &'static ModelPricing {
    MODEL_PRICING
        .iter()
        .find(|p| p.model == model)
        .unwrap_or(&DEFAULT_PRICING)
}

/// Context window size for a model.
pub fn context_window_for(model: &str) -> u64 {
    pricing_for(model).context_window
}

/// Cost estimate for cumulative usage.
#[derive(Debug, Clone, PartialEq)]
pub struct CostSummary {
    pub input_usd: f64,
    pub output_usd: f64,
    pub cache_write_usd: f64,
    pub cache_read_usd: f64,
    pub total_usd: f64,
    /// Fraction of input tokens served from cache (0..1).
    pub cache_hit_rate: f64,
}

/// Estimate the cost of `usage` under `model`'s pricing.
pub fn estimate_cost(model: &str, usage: &UsageInfo) -> CostSummary {
    const MTOK: f64 = 1_000_000.0;
    let pricing = pricing_for(model);

    let input_usd = usage.input_tokens as f64 * pricing.input_usd_per_mtok / MTOK;
    let output_usd = usage.output_tokens as f64 * pricing.output_usd_per_mtok / MTOK;
    let cache_write_usd =
        usage.cache_creation_input_tokens as f64 * pricing.cache_write_usd_per_mtok / MTOK;
    let cache_read_usd =
        usage.cache_read_input_tokens as f64 * pricing.cache_read_usd_per_mtok / MTOK;

    let total_input = usage.input_tokens
        + usage.cache_creation_input_tokens
        + usage.cache_read_input_tokens;
    let cache_hit_rate = if total_input == 0 {
        0.0
    } else {
        usage.cache_read_input_tokens as f64 / total_input as f64
    };

    CostSummary {
        input_usd,
        output_usd,
        cache_write_usd,
        cache_read_usd,
        total_usd: input_usd + output_usd + cache_write_usd + cache_read_usd,
        cache_hit_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_lookup() {
        let pricing = pricing_for("claude-haiku-4-20250514");
        assert_eq!(pricing.input_usd_per_mtok, 0.80);
        assert_eq!(pricing.context_window, 200_000);
    }

    #[test]
    fn test_unknown_model_uses_default() {
        assert_eq!(context_window_for("mystery-model"), 200_000);
        assert_eq!(pricing_for("mystery-model").input_usd_per_mtok, 3.0);
    }

    #[test]
    fn test_cost_estimate() {
        let usage = UsageInfo {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 1_000_000,
        };
        let cost = estimate_cost("claude-sonnet-4-20250514", &usage);
        assert_eq!(cost.input_usd, 3.0);
        assert_eq!(cost.output_usd, 15.0);
        assert_eq!(cost.cache_read_usd, 0.30);
        assert_eq!(cost.total_usd, 18.30);
        assert_eq!(cost.cache_hit_rate, 0.5);
    }

    #[test]
    fn test_cache_hit_rate_zero_when_no_input() {
        let cost = estimate_cost("claude-sonnet-4-20250514", &UsageInfo::default());
        assert_eq!(cost.cache_hit_rate, 0.0);
    }
}
