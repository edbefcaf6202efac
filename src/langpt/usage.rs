use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::Usage;

/// USD per 1K tokens as `(model, input, output)`.
const PRICING: [(&str, f64, f64); 6] = [
    ("gpt-4", 0.03, 0.06),
    ("gpt-4-turbo", 0.01, 0.03),
    ("gpt-3.5-turbo", 0.0015, 0.002),
    ("gpt-4o", 0.005, 0.015),
    ("gpt-4o-mini", 0.00015, 0.0006),
    // estimated pricing
    ("gpt-4.1-nano", 0.0001, 0.0002),
];

const FALLBACK_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelPrice {
    pub name: &'static str,
    pub input_price: f64,
    pub output_price: f64,
}

pub fn available_models() -> Vec<ModelPrice> {
    PRICING
        .iter()
        .map(|(name, input, output)| ModelPrice {
            name,
            input_price: *input,
            output_price: *output,
        })
        .collect()
}

pub fn is_known_model(model: &str) -> bool {
    PRICING.iter().any(|(name, _, _)| *name == model)
}

fn price_for(model: &str) -> (f64, f64) {
    let found = PRICING.iter().find(|(name, _, _)| *name == model);
    match found {
        Some((_, input, output)) => (*input, *output),
        None => {
            tracing::warn!("Unknown model: {}, using {} pricing", model, FALLBACK_MODEL);
            PRICING
                .iter()
                .find(|(name, _, _)| *name == FALLBACK_MODEL)
                .map(|(_, i, o)| (*i, *o))
                .unwrap_or((0.0, 0.0))
        }
    }
}

pub fn calculate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> Cost {
    let (input_price, output_price) = price_for(model);
    let input = (input_tokens as f64 / 1000.0) * input_price;
    let output = (output_tokens as f64 / 1000.0) * output_price;
    Cost {
        input,
        output,
        total: input + output,
    }
}

pub fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    calculate_cost(model, input_tokens, output_tokens).total
}

/// Rough pre-send estimate: 1 word ≈ 1.3 tokens, reply ≈ twice the input.
pub fn estimate_message_cost(model: &str, text: &str) -> f64 {
    if text.trim().is_empty() {
        return 0.0;
    }
    let words = text.split(' ').count() as f64;
    let input_tokens = (words * 1.3).ceil() as u32;
    let output_tokens = input_tokens * 2;
    estimate_cost(model, input_tokens, output_tokens)
}

pub fn format_usd(amount: f64) -> String {
    format!("${:.6}", amount)
}

/// One row of the `usage_stats` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub input_cost_usd: f64,
    #[serde(default)]
    pub output_cost_usd: f64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl UsageRecord {
    pub fn new(user_id: &str, model: &str, usage: Usage) -> Self {
        let cost = calculate_cost(model, usage.input_tokens, usage.output_tokens);
        Self {
            id: None,
            user_id: user_id.to_string(),
            input_tokens: usage.input_tokens as u64,
            output_tokens: usage.output_tokens as u64,
            total_tokens: usage.total() as u64,
            input_cost_usd: cost.input,
            output_cost_usd: cost.output,
            total_cost_usd: cost.total,
            model: model.to_string(),
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub usage_by_model: BTreeMap<String, ModelUsage>,
}

pub fn aggregate_stats(rows: &[UsageRecord]) -> UserStats {
    rows.iter().fold(UserStats::default(), |mut stats, row| {
        stats.total_input_tokens += row.input_tokens;
        stats.total_output_tokens += row.output_tokens;
        stats.total_cost_usd += row.total_cost_usd;

        let entry = stats.usage_by_model.entry(row.model.clone()).or_default();
        entry.input_tokens += row.input_tokens;
        entry.output_tokens += row.output_tokens;
        entry.cost_usd += row.total_cost_usd;
        stats
    })
}
