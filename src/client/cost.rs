// Token cost estimation
// Author: kelexine (https://github.com/kelexine)

use crate::config::ApiConfig;
use crate::models::Usage;

/// Per-token prices in dollars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_token: f64,
    pub output_per_token: f64,
}

/// Token counts and estimated cost for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostBreakdown {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

impl Pricing {
    pub fn new(input_per_token: f64, output_per_token: f64) -> Self {
        Self {
            input_per_token,
            output_per_token,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(config.input_price_per_token, config.output_price_per_token)
    }

    /// Estimate the cost of a turn. Absent usage costs nothing.
    pub fn cost(&self, usage: Option<&Usage>) -> CostBreakdown {
        let Some(usage) = usage else {
            return CostBreakdown::default();
        };

        CostBreakdown {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost: usage.prompt_tokens as f64 * self.input_per_token
                + usage.completion_tokens as f64 * self.output_per_token,
        }
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}
