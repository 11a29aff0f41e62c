//! Backend error classification

use crate::config::StrategyConfig;
use crate::error::{Error, Result};
use regex::{RegexSet, RegexSetBuilder};

/// How the orchestrator should react to a strategy error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The backend is structurally broken for this input (extraction
    /// failure, missing credentials). Trips the circuit breaker at once.
    Critical,
    /// Anti-bot protection or rate limiting. Retrying the same backend is
    /// pointless right now.
    Protection,
    /// Anything else (network blips, timeouts, integrity failures)
    Transient,
}

impl ErrorClass {
    /// Whether the orchestrator fails over without consuming a strategy attempt
    pub fn is_fast_failover(&self) -> bool {
        !matches!(self, ErrorClass::Transient)
    }
}

/// Case-insensitive substring matcher over configured error fragments
#[derive(Clone, Debug)]
pub struct ErrorClassifier {
    critical: RegexSet,
    protection: RegexSet,
}

impl ErrorClassifier {
    /// Build a classifier from literal fragments
    pub fn new(critical: &[String], protection: &[String]) -> Result<Self> {
        Ok(Self {
            critical: literal_set(critical, "strategy.critical_error_patterns")?,
            protection: literal_set(protection, "strategy.protection_error_patterns")?,
        })
    }

    /// Build a classifier from the strategy section of the config
    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        Self::new(
            &config.critical_error_patterns,
            &config.protection_error_patterns,
        )
    }

    /// Classify an error message; critical wins over protection
    pub fn classify(&self, error: &str) -> ErrorClass {
        if self.critical.is_match(error) {
            ErrorClass::Critical
        } else if self.protection.is_match(error) {
            ErrorClass::Protection
        } else {
            ErrorClass::Transient
        }
    }
}

fn literal_set(patterns: &[String], key: &str) -> Result<RegexSet> {
    RegexSetBuilder::new(patterns.iter().map(|p| regex::escape(p)))
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::Config {
            message: format!("invalid error pattern list: {e}"),
            key: Some(key.to_string()),
        })
}
