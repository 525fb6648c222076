//! Per-model token pricing
//!
//! Rates are USD per million tokens. The table is a snapshot; when a model is
//! missing, cost reporting degrades to token counts with a warning rather
//! than inventing a number.

use std::collections::BTreeMap;

use crate::llm::TokenUsage;
use crate::segment::TokenRecord;

/// Rates for one model, USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Longest-prefix pricing table. Model names carry suffixes
/// (`gemini-2.5-flash-preview-...`), so entries match by prefix.
const RATES: &[(&str, ModelRates)] = &[
    ("gemini-2.5-pro", ModelRates { input_per_million: 1.25, output_per_million: 10.0 }),
    ("gemini-2.5-flash", ModelRates { input_per_million: 0.30, output_per_million: 2.50 }),
    ("gemini-2.0-flash", ModelRates { input_per_million: 0.10, output_per_million: 0.40 }),
    ("gpt-4o-mini", ModelRates { input_per_million: 0.15, output_per_million: 0.60 }),
    ("gpt-4o", ModelRates { input_per_million: 2.50, output_per_million: 10.0 }),
];

/// Look up rates for a model; `None` when the model is unknown.
pub fn rates_for(model: &str) -> Option<ModelRates> {
    let model = model.to_lowercase();
    let model = model.strip_prefix("models/").unwrap_or(&model);
    RATES
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, rates)| *rates)
}

/// Cost of one call in USD.
pub fn cost(rates: ModelRates, usage: TokenUsage) -> f64 {
    usage.input_tokens as f64 / 1e6 * rates.input_per_million
        + usage.output_tokens as f64 / 1e6 * rates.output_per_million
}

/// Token and cost totals for one model across the whole run
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCost {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// `None` when the model has no known rates
    pub cost_usd: Option<f64>,
}

/// Aggregate per-attempt token records into per-model totals.
pub fn aggregate(records: &[TokenRecord]) -> Vec<ModelCost> {
    let mut by_model: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for record in records {
        let entry = by_model.entry(record.model.clone()).or_default();
        entry.0 += record.input_tokens;
        entry.1 += record.output_tokens;
    }
    by_model
        .into_iter()
        .map(|(model, (input_tokens, output_tokens))| {
            let cost_usd = rates_for(&model).map(|rates| {
                cost(
                    rates,
                    TokenUsage {
                        input_tokens,
                        output_tokens,
                    },
                )
            });
            ModelCost {
                model,
                input_tokens,
                output_tokens,
                cost_usd,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_prefix_match() {
        assert!(rates_for("gemini-2.5-flash").is_some());
        assert!(rates_for("gemini-2.5-flash-preview-0514").is_some());
        assert!(rates_for("models/gemini-2.5-pro").is_some());
        assert!(rates_for("some-local-model").is_none());
    }

    #[test]
    fn test_longest_prefix_wins() {
        // gpt-4o-mini must not pick up gpt-4o's rates.
        let mini = rates_for("gpt-4o-mini").unwrap();
        assert_eq!(mini.input_per_million, 0.15);
        let full = rates_for("gpt-4o").unwrap();
        assert_eq!(full.input_per_million, 2.50);
    }

    #[test]
    fn test_cost() {
        let rates = ModelRates {
            input_per_million: 1.0,
            output_per_million: 10.0,
        };
        let usage = TokenUsage {
            input_tokens: 2_000_000,
            output_tokens: 500_000,
        };
        assert!((cost(rates, usage) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_groups_by_model() {
        let records = vec![
            TokenRecord { model: "gemini-2.5-flash".into(), input_tokens: 100, output_tokens: 10 },
            TokenRecord { model: "gemini-2.5-flash".into(), input_tokens: 200, output_tokens: 20 },
            TokenRecord { model: "unknown-model".into(), input_tokens: 50, output_tokens: 5 },
        ];
        let costs = aggregate(&records);
        assert_eq!(costs.len(), 2);
        let flash = costs.iter().find(|c| c.model.contains("flash")).unwrap();
        assert_eq!(flash.input_tokens, 300);
        assert_eq!(flash.output_tokens, 30);
        assert!(flash.cost_usd.is_some());
        let unknown = costs.iter().find(|c| c.model == "unknown-model").unwrap();
        assert!(unknown.cost_usd.is_none());
        assert_eq!(unknown.input_tokens, 50);
    }
}
