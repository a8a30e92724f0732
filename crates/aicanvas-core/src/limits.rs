//! Static rate-limit catalog for hosted models.
//!
//! The engine never enforces these; callers read them to pace requests.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

/// Daily token quota; some models have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyTokens {
    Limit(u64),
    Unlimited,
}

impl Serialize for DailyTokens {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Limit(n) => serializer.serialize_u64(*n),
            Self::Unlimited => serializer.serialize_str("No limit"),
        }
    }
}

/// Request and token quotas for one model.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ModelLimits {
    pub req_per_min: u32,
    pub req_per_day: u32,
    pub tokens_per_min: u32,
    pub tokens_per_day: DailyTokens,
}

const fn limits(req_per_min: u32, req_per_day: u32, tokens_per_min: u32, tokens_per_day: DailyTokens) -> ModelLimits {
    ModelLimits {
        req_per_min,
        req_per_day,
        tokens_per_min,
        tokens_per_day,
    }
}

use DailyTokens::{Limit, Unlimited};

const GROQ_LIMITS: &[(&str, ModelLimits)] = &[
    ("deepseek-r1-distill-llama-70b", limits(30, 1_000, 6_000, Unlimited)),
    ("deepseek-r1-distill-qwen-32b", limits(30, 1_000, 6_000, Unlimited)),
    ("gemma2-9b-it", limits(30, 14_400, 15_000, Limit(500_000))),
    ("llama-3.1-8b-instant", limits(30, 14_400, 6_000, Limit(500_000))),
    ("llama-3.2-11b-vision-preview", limits(30, 7_000, 7_000, Limit(500_000))),
    ("llama-3.2-1b-preview", limits(30, 7_000, 7_000, Limit(500_000))),
    ("llama-3.2-3b-preview", limits(30, 7_000, 7_000, Limit(500_000))),
    ("llama-3.2-90b-vision-preview", limits(15, 3_500, 7_000, Limit(250_000))),
    ("llama-3.3-70b-specdec", limits(30, 1_000, 6_000, Limit(100_000))),
    ("llama-3.3-70b-versatile", limits(30, 1_000, 6_000, Limit(100_000))),
    ("llama-guard-3-8b", limits(30, 14_400, 15_000, Limit(500_000))),
    ("llama3-70b-8192", limits(30, 14_400, 6_000, Limit(500_000))),
    ("llama3-8b-8192", limits(30, 14_400, 6_000, Limit(500_000))),
    ("mistral-saba-24b", limits(30, 1_000, 6_000, Limit(500_000))),
    ("mixtral-8x7b-32768", limits(30, 14_400, 5_000, Limit(500_000))),
    ("qwen-2.5-32b", limits(30, 1_000, 6_000, Unlimited)),
    ("qwen-2.5-coder-32b", limits(30, 1_000, 6_000, Unlimited)),
];

/// Models offered when a local Ollama daemon cannot be queried.
pub const OLLAMA_FALLBACK_MODELS: &[&str] = &["llama3", "llama2", "mistral", "qwen2.5", "llama3.2"];

/// Rate limits for every Groq model, keyed by model name.
pub fn groq_model_limits() -> BTreeMap<&'static str, ModelLimits> {
    GROQ_LIMITS.iter().copied().collect()
}

/// Groq model names in catalog order.
pub fn groq_models() -> Vec<&'static str> {
    GROQ_LIMITS.iter().map(|(name, _)| *name).collect()
}

/// Limits for a single Groq model.
pub fn groq_limits_for(model: &str) -> Option<ModelLimits> {
    GROQ_LIMITS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, l)| *l)
}
