use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Engine limits and switches. Missing keys in serialised form take their
/// default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // max number of pending goals in one query
    pub max_goals: usize,
    // max number of open choice points in one query
    pub max_choices: usize,
    // record trace events for every query
    pub tracing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_goals: 100_000,
            max_choices: 100_000,
            tracing: false,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `POLAR_MAX_GOALS`, `POLAR_MAX_CHOICES` and
    /// `POLAR_TRACE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads a JSON object such as `{"max_goals": 500, "tracing": true}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, "POLAR_MAX_GOALS") {
            config.max_goals = v;
        }
        if let Some(v) = parse_var(&lookup, "POLAR_MAX_CHOICES") {
            config.max_choices = v;
        }
        if let Some(v) = lookup("POLAR_TRACE") {
            config.tracing = matches!(v.trim(), "1" | "true" | "yes");
        }
        config
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {}={:?}: not a number", key, raw);
            None
        }
    }
}
