//! Per-model token pricing.
//!
//! Prices are USD per 1000 tokens, held as exact decimals so a cost can be
//! reproduced digit for digit from the table.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Prompt and completion price of one model, per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub prompt_per_1k: Decimal,
    pub completion_per_1k: Decimal,
}

impl ModelPrice {
    pub const fn new(prompt_per_1k: Decimal, completion_per_1k: Decimal) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }
}

/// Derived cost of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub prompt_cost: Decimal,
    pub completion_cost: Decimal,
    pub total_cost: Decimal,
}

/// Model used when a name is not in the table.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const BUILTIN_PRICES: &[(&str, ModelPrice)] = &[
    (
        "gpt-4o",
        ModelPrice::new(Decimal::from_parts(25, 0, 0, false, 4), Decimal::from_parts(1, 0, 0, false, 2)),
    ),
    (
        "gpt-4o-mini",
        ModelPrice::new(Decimal::from_parts(15, 0, 0, false, 5), Decimal::from_parts(6, 0, 0, false, 4)),
    ),
    (
        "gpt-4-turbo",
        ModelPrice::new(Decimal::from_parts(1, 0, 0, false, 2), Decimal::from_parts(3, 0, 0, false, 2)),
    ),
    (
        "gpt-3.5-turbo",
        ModelPrice::new(Decimal::from_parts(5, 0, 0, false, 4), Decimal::from_parts(15, 0, 0, false, 4)),
    ),
    (
        "o1-preview",
        ModelPrice::new(Decimal::from_parts(15, 0, 0, false, 3), Decimal::from_parts(6, 0, 0, false, 2)),
    ),
    (
        "o1-mini",
        ModelPrice::new(Decimal::from_parts(3, 0, 0, false, 3), Decimal::from_parts(12, 0, 0, false, 3)),
    ),
];

/// Static price lookup with a default rate for unknown models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTable {
    prices: BTreeMap<String, ModelPrice>,
    default_model: String,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            prices: BUILTIN_PRICES
                .iter()
                .map(|(name, price)| ((*name).to_string(), *price))
                .collect(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl PriceTable {
    /// A table with no entries except the given default.
    pub fn with_default_price(model: impl Into<String>, price: ModelPrice) -> Self {
        let model = model.into();
        let mut prices = BTreeMap::new();
        prices.insert(model.clone(), price);
        Self {
            prices,
            default_model: model,
        }
    }

    /// Adds or replaces a model's price.
    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    /// Selects which listed model prices unknown names. Ignored if the model
    /// is not in the table.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if self.prices.contains_key(&model) {
            self.default_model = model;
        }
        self
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn contains(&self, model: &str) -> bool {
        self.prices.contains_key(model)
    }

    /// Price of `model`, or of the default model when unknown.
    pub fn price(&self, model: &str) -> ModelPrice {
        self.prices
            .get(model)
            .or_else(|| self.prices.get(&self.default_model))
            .copied()
            .unwrap_or(ModelPrice::new(Decimal::ZERO, Decimal::ZERO))
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelPrice)> {
        self.prices.iter().map(|(name, price)| (name.as_str(), price))
    }

    /// Cost of a request: `tokens × rate / 1000` per side.
    pub fn cost(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> CostBreakdown {
        self.cost_with_reasoning(model, prompt_tokens, completion_tokens, 0)
    }

    /// Like [`cost`](Self::cost), with reasoning tokens billed at the
    /// completion rate.
    pub fn cost_with_reasoning(
        &self,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
        reasoning_tokens: u32,
    ) -> CostBreakdown {
        let price = self.price(model);
        let thousand = Decimal::from(1000);

        let prompt_cost = Decimal::from(prompt_tokens) * price.prompt_per_1k / thousand;
        let billed_completion = u64::from(completion_tokens) + u64::from(reasoning_tokens);
        let completion_cost = Decimal::from(billed_completion) * price.completion_per_1k / thousand;

        CostBreakdown {
            prompt_cost,
            completion_cost,
            total_cost: prompt_cost + completion_cost,
        }
    }
}
