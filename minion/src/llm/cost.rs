//! Token usage and cumulative cost accounting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Token usage for one provider call (prompt + completion).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Cumulative cost record for one provider instance.
///
/// Updated exactly once per provider call (single writer: the provider).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub last_call_cost: f64,
}

impl CostRecord {
    /// Records one call's usage and its cost (`None` for unknown models
    /// accrues zero cost; token counts still accumulate).
    pub fn record_call(&mut self, usage: &Usage, cost: Option<f64>) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
        let cost = cost.unwrap_or(0.0);
        self.total_cost += cost;
        self.last_call_cost = cost;
    }

    pub fn merge(&mut self, other: &CostRecord) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.total_cost += other.total_cost;
        self.last_call_cost = other.last_call_cost;
    }
}

/// Static per-model price table: model name → (input, output) USD per 1K tokens.
///
/// Unknown aliases return `None`; the caller treats that as zero cost.
#[derive(Clone, Debug, Default)]
pub struct PriceTable {
    per_1k: HashMap<String, (f64, f64)>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with a few common model families; extend with
    /// [`set`](PriceTable::set) for project-specific aliases.
    pub fn with_defaults() -> Self {
        let mut t = Self::new();
        t.set("gpt-4o", 0.0025, 0.01);
        t.set("gpt-4o-mini", 0.00015, 0.0006);
        t.set("gpt-4.1", 0.002, 0.008);
        t.set("o3-mini", 0.0011, 0.0044);
        t.set("claude-3-5-sonnet", 0.003, 0.015);
        t.set("claude-3-5-haiku", 0.0008, 0.004);
        t.set("deepseek-chat", 0.00027, 0.0011);
        t
    }

    pub fn set(&mut self, model: &str, input_per_1k: f64, output_per_1k: f64) {
        self.per_1k
            .insert(model.to_string(), (input_per_1k, output_per_1k));
    }

    /// Cost of one call in USD; `None` when the model is not in the table.
    pub fn cost_of(&self, model: &str, usage: &Usage) -> Option<f64> {
        let (input, output) = self.per_1k.get(model)?;
        Some(
            usage.prompt_tokens as f64 / 1000.0 * input
                + usage.completion_tokens as f64 / 1000.0 * output,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_new_computes_total() {
        let u = Usage::new(100, 20);
        assert_eq!(u.total_tokens, 120);
    }

    #[test]
    fn record_call_accumulates_and_tracks_last_cost() {
        let mut rec = CostRecord::default();
        rec.record_call(&Usage::new(1000, 500), Some(0.03));
        rec.record_call(&Usage::new(200, 100), Some(0.01));
        assert_eq!(rec.prompt_tokens, 1200);
        assert_eq!(rec.completion_tokens, 600);
        assert_eq!(rec.total_tokens, 1800);
        assert!((rec.total_cost - 0.04).abs() < 1e-9);
        assert!((rec.last_call_cost - 0.01).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_accrues_zero_cost_but_counts_tokens() {
        let table = PriceTable::with_defaults();
        let usage = Usage::new(1000, 1000);
        assert!(table.cost_of("totally-unknown-model", &usage).is_none());

        let mut rec = CostRecord::default();
        rec.record_call(&usage, table.cost_of("totally-unknown-model", &usage));
        assert_eq!(rec.total_tokens, 2000);
        assert_eq!(rec.total_cost, 0.0);
    }

    #[test]
    fn known_model_cost_uses_both_rates() {
        let table = PriceTable::with_defaults();
        let usage = Usage::new(1000, 1000);
        let cost = table.cost_of("gpt-4o", &usage).unwrap();
        assert!((cost - 0.0125).abs() < 1e-9);
    }
}
