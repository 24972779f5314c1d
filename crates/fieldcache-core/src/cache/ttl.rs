//! Per-category time-to-live rules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlRule {
    /// Substring looked for in the cache key.
    pub pattern: String,
    pub ttl_secs: u64,
}

impl TtlRule {
    pub fn new(pattern: &str, ttl: Duration) -> Self {
        Self {
            pattern: pattern.to_string(),
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Ordered list of URL-pattern rules with a fallback TTL.
#[derive(Debug, Clone)]
pub struct TtlRules {
    rules: Vec<TtlRule>,
    default: Duration,
}

impl TtlRules {
    pub fn new(rules: Vec<TtlRule>, default: Duration) -> Self {
        Self { rules, default }
    }

    pub fn rules(&self) -> &[TtlRule] {
        &self.rules
    }

    pub fn default_ttl(&self) -> Duration {
        self.default
    }

    /// TTL of the first rule whose pattern occurs in `key`, else the default.
    pub fn ttl_for(&self, key: &str) -> Duration {
        self.rules
            .iter()
            .find(|rule| key.contains(&rule.pattern))
            .map(TtlRule::ttl)
            .unwrap_or(self.default)
    }
}

impl Default for TtlRules {
    fn default() -> Self {
        const MINUTE: u64 = 60;
        let rules = [
            // Standings move constantly during match days
            ("/api/leaderboard", MINUTE),
            ("/api/community", 2 * MINUTE),
            ("/api/tournaments", 5 * MINUTE),
            ("/api/achievements", 10 * MINUTE),
            ("/api/teams", 10 * MINUTE),
            ("/api/users", 15 * MINUTE),
        ]
        .iter()
        .map(|(pattern, secs)| TtlRule::new(pattern, Duration::from_secs(*secs)))
        .collect();

        Self::new(rules, Duration::from_secs(5 * MINUTE))
    }
}
