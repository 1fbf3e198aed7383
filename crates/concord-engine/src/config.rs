//! Engine configuration.
//!
//! Thresholds, payoffs and timings are an explicit value handed to
//! [`Engine::new`](crate::Engine::new), never globals, so tests and separate
//! decision instances can each run with their own.

use crate::error::{Error, Result};
use concord_outcome::{OutcomeRules, Payoffs};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for a settlement engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Prefix of every store key. Distinct namespaces are fully independent
    /// decision instances sharing one store.
    pub namespace: String,

    /// Threshold and payoffs.
    pub rules: OutcomeRules,

    /// TTL of finalization and award locks. The only recovery path for a
    /// crashed holder, so keep it short.
    pub lock_ttl: Duration,

    /// Optimistic retries for the award commit and history appends.
    pub max_award_attempts: u32,

    /// How many past cycles a visit re-examines for unawarded votes. At
    /// least 1, so yesterday is always covered.
    pub catch_up_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "daily".to_string(),
            rules: OutcomeRules::default(),
            lock_ttl: Duration::from_secs(30),
            max_award_attempts: 8,
            catch_up_days: 7,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid {name}: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// - `CONCORD_NAMESPACE`
    /// - `CONCORD_THRESHOLD_PERCENT`
    /// - `CONCORD_LOCK_TTL_SECS`
    /// - `CONCORD_MAX_AWARD_ATTEMPTS`
    /// - `CONCORD_CATCH_UP_DAYS`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(namespace) = env_parse::<String>("CONCORD_NAMESPACE")? {
            config.namespace = namespace;
        }
        if let Some(threshold) = env_parse::<u32>("CONCORD_THRESHOLD_PERCENT")? {
            config.rules.threshold_percent = threshold;
        }
        if let Some(secs) = env_parse::<u64>("CONCORD_LOCK_TTL_SECS")? {
            config.lock_ttl = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse::<u32>("CONCORD_MAX_AWARD_ATTEMPTS")? {
            config.max_award_attempts = attempts;
        }
        if let Some(days) = env_parse::<u32>("CONCORD_CATCH_UP_DAYS")? {
            config.catch_up_days = days;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine can not run safely with.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() || self.namespace.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(Error::Config(format!(
                "namespace must be non-empty without whitespace or ':', got {:?}",
                self.namespace
            )));
        }
        self.rules.validate()?;
        if self.lock_ttl.is_zero() {
            return Err(Error::Config("lock_ttl must be positive".into()));
        }
        if self.max_award_attempts == 0 {
            return Err(Error::Config("max_award_attempts must be at least 1".into()));
        }
        // A visit always re-examines at least yesterday.
        if self.catch_up_days == 0 {
            return Err(Error::Config("catch_up_days must be at least 1".into()));
        }
        Ok(())
    }

    /// Set the key namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the threshold percentage.
    #[must_use]
    pub fn with_threshold_percent(mut self, threshold_percent: u32) -> Self {
        self.rules.threshold_percent = threshold_percent;
        self
    }

    /// Set the payoffs.
    #[must_use]
    pub fn with_payoffs(mut self, payoffs: Payoffs) -> Self {
        self.rules.payoffs = payoffs;
        self
    }

    /// Set the lock TTL.
    #[must_use]
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the optimistic retry budget.
    #[must_use]
    pub fn with_max_award_attempts(mut self, attempts: u32) -> Self {
        self.max_award_attempts = attempts;
        self
    }

    /// Set the catch-up window.
    #[must_use]
    pub fn with_catch_up_days(mut self, days: u32) -> Self {
        self.catch_up_days = days;
        self
    }
}
