//! Ordered strategy list with per-strategy circuit breakers

use super::{ErrorClass, ErrorClassifier, Platform, Strategy};
use crate::config::StrategyConfig;
use crate::error::Result;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Number of recent error messages kept per strategy
pub const RECENT_ERROR_CAPACITY: usize = 5;

/// Circuit-breaker state for one strategy
#[derive(Clone, Debug)]
pub struct StrategyHealth {
    /// Failures since the last success or reset
    pub failure_count: u32,
    /// When the last failure was recorded
    pub last_failure: Option<Instant>,
    /// Whether the strategy may be selected
    pub healthy: bool,
    /// Most recent error messages, oldest first
    pub recent_errors: VecDeque<String>,
}

impl Default for StrategyHealth {
    fn default() -> Self {
        Self {
            failure_count: 0,
            last_failure: None,
            healthy: true,
            recent_errors: VecDeque::with_capacity(RECENT_ERROR_CAPACITY),
        }
    }
}

impl StrategyHealth {
    /// Record a failure; returns true if this call flipped the strategy to unhealthy
    pub fn record_failure(
        &mut self,
        error: &str,
        critical: bool,
        threshold: u32,
        now: Instant,
    ) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(now);
        if self.recent_errors.len() == RECENT_ERROR_CAPACITY {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(error.to_string());

        let was_healthy = self.healthy;
        if critical || self.failure_count >= threshold {
            self.healthy = false;
        }
        was_healthy && !self.healthy
    }

    /// Lazy health check: an unhealthy strategy resets once the window has elapsed
    pub fn check(&mut self, reset_window: Duration, now: Instant) -> bool {
        if self.healthy {
            return true;
        }
        let elapsed_past_window = self
            .last_failure
            .is_none_or(|at| now.duration_since(at) > reset_window);
        if elapsed_past_window {
            self.failure_count = 0;
            self.healthy = true;
        }
        elapsed_past_window
    }
}

/// A strategy picked by [`StrategyRegistry::select`] or [`StrategyRegistry::next`]
#[derive(Clone)]
pub struct SelectedStrategy {
    /// The strategy
    pub strategy: Arc<dyn Strategy>,
    /// Its position in the registry's priority order
    pub index: usize,
}

impl std::fmt::Debug for SelectedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedStrategy")
            .field("name", &self.strategy.name())
            .field("index", &self.index)
            .finish()
    }
}

/// Point-in-time view of a strategy's health, for APIs and logs
#[derive(Clone, Debug, Serialize)]
pub struct StrategyHealthReport {
    /// Position in priority order
    pub index: usize,
    /// Strategy name
    pub name: String,
    /// Whether the strategy is currently selectable (before lazy reset)
    pub healthy: bool,
    /// Failures since the last success or reset
    pub failure_count: u32,
    /// Most recent error messages, oldest first
    pub recent_errors: Vec<String>,
}

struct Entry {
    strategy: Arc<dyn Strategy>,
    health: Mutex<StrategyHealth>,
}

/// Holds strategies in priority order and selects the best candidate for a URL
///
/// The list only grows; indices handed out by `select`/`next` stay valid for
/// the registry's lifetime.
pub struct StrategyRegistry {
    entries: RwLock<Vec<Arc<Entry>>>,
    classifier: ErrorClassifier,
    max_failures: u32,
    reset_window: Duration,
}

impl StrategyRegistry {
    /// Create an empty registry
    pub fn new(config: &StrategyConfig) -> Result<Self> {
        Ok(Self {
            entries: RwLock::new(Vec::new()),
            classifier: ErrorClassifier::from_config(config)?,
            max_failures: config.max_failures,
            reset_window: config.failure_reset_window,
        })
    }

    /// Create a registry pre-populated in the given priority order
    pub fn with_strategies(
        config: &StrategyConfig,
        strategies: impl IntoIterator<Item = Arc<dyn Strategy>>,
    ) -> Result<Self> {
        let mut registry = Self::new(config)?;
        *registry.entries.get_mut() = strategies.into_iter().map(Self::entry).collect();
        Ok(registry)
    }

    fn entry(strategy: Arc<dyn Strategy>) -> Arc<Entry> {
        Arc::new(Entry {
            strategy,
            health: Mutex::new(StrategyHealth::default()),
        })
    }

    /// Append a strategy with fresh health state; returns its index
    pub async fn register(&self, strategy: Arc<dyn Strategy>) -> usize {
        let name = strategy.name().to_string();
        let mut entries = self.entries.write().await;
        entries.push(Self::entry(strategy));
        let index = entries.len() - 1;
        tracing::info!(strategy = %name, index, "Registered download strategy");
        index
    }

    /// Number of registered strategies
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no strategies are registered
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Strategy at `index`, if any
    pub async fn strategy(&self, index: usize) -> Option<Arc<dyn Strategy>> {
        self.entries
            .read()
            .await
            .get(index)
            .map(|e| Arc::clone(&e.strategy))
    }

    /// Classify error text with this registry's patterns
    pub fn classify(&self, error: &str) -> ErrorClass {
        self.classifier.classify(error)
    }

    async fn snapshot(&self) -> Vec<Arc<Entry>> {
        self.entries.read().await.clone()
    }

    /// Pick the first healthy strategy that accepts `url`
    ///
    /// URLs that obviously belong to a platform first try the strategies
    /// declaring that platform, then fall through to the ordered scan.
    pub async fn select(&self, url: &str) -> Option<SelectedStrategy> {
        let entries = self.snapshot().await;

        if let Some(platform) = Platform::detect(url) {
            for (index, entry) in entries.iter().enumerate() {
                if entry.strategy.platform() == Some(platform)
                    && self.accepts(entry, url).await
                {
                    tracing::debug!(
                        strategy = entry.strategy.name(),
                        index,
                        ?platform,
                        "Platform-specific strategy selected"
                    );
                    return Some(Self::selected(entry, index));
                }
            }
        }

        self.scan(&entries, url, 0).await
    }

    /// Pick the first healthy strategy after `after_index` that accepts `url`
    pub async fn next(&self, url: &str, after_index: usize) -> Option<SelectedStrategy> {
        let entries = self.snapshot().await;
        self.scan(&entries, url, after_index.saturating_add(1)).await
    }

    async fn scan(&self, entries: &[Arc<Entry>], url: &str, start: usize) -> Option<SelectedStrategy> {
        for (index, entry) in entries.iter().enumerate().skip(start) {
            if self.accepts(entry, url).await {
                return Some(Self::selected(entry, index));
            }
        }
        None
    }

    fn selected(entry: &Arc<Entry>, index: usize) -> SelectedStrategy {
        SelectedStrategy {
            strategy: Arc::clone(&entry.strategy),
            index,
        }
    }

    async fn accepts(&self, entry: &Entry, url: &str) -> bool {
        if !self.entry_healthy(entry).await {
            tracing::debug!(strategy = entry.strategy.name(), "Skipping unhealthy strategy");
            return false;
        }
        entry.strategy.validate_url(url).await
    }

    async fn entry_healthy(&self, entry: &Entry) -> bool {
        let mut health = entry.health.lock().await;
        let was_healthy = health.healthy;
        let healthy = health.check(self.reset_window, Instant::now());
        if healthy && !was_healthy {
            tracing::info!(
                strategy = entry.strategy.name(),
                "Reset window elapsed, strategy marked healthy again"
            );
        }
        healthy
    }

    /// Health check with lazy reset; unknown indices are unhealthy
    pub async fn check_health(&self, index: usize) -> bool {
        let entry = self.entries.read().await.get(index).cloned();
        match entry {
            Some(entry) => self.entry_healthy(&entry).await,
            None => false,
        }
    }

    /// Record a failure for the strategy at `index` and return the error's class
    ///
    /// A critical error disables the strategy immediately; other errors
    /// disable it once the failure count reaches the configured threshold.
    pub async fn mark_failure(&self, index: usize, error: &str) -> ErrorClass {
        let class = self.classifier.classify(error);
        let Some(entry) = self.entries.read().await.get(index).cloned() else {
            tracing::warn!(index, "mark_failure called for unknown strategy index");
            return class;
        };

        let mut health = entry.health.lock().await;
        let tripped = health.record_failure(
            error,
            class == ErrorClass::Critical,
            self.max_failures,
            Instant::now(),
        );

        if tripped {
            tracing::warn!(
                strategy = entry.strategy.name(),
                index,
                failures = health.failure_count,
                critical = class == ErrorClass::Critical,
                error = %error,
                "Strategy marked unhealthy"
            );
        } else {
            tracing::debug!(
                strategy = entry.strategy.name(),
                index,
                failures = health.failure_count,
                "Strategy failure recorded"
            );
        }
        class
    }

    /// Clear the consecutive failure count after a verified success
    pub async fn mark_success(&self, index: usize) {
        if let Some(entry) = self.entries.read().await.get(index).cloned() {
            let mut health = entry.health.lock().await;
            if health.healthy {
                health.failure_count = 0;
            }
        }
    }

    /// Current health of every strategy, in priority order
    pub async fn health_report(&self) -> Vec<StrategyHealthReport> {
        let entries = self.snapshot().await;
        let mut report = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let health = entry.health.lock().await;
            report.push(StrategyHealthReport {
                index,
                name: entry.strategy.name().to_string(),
                healthy: health.healthy,
                failure_count: health.failure_count,
                recent_errors: health.recent_errors.iter().cloned().collect(),
            });
        }
        report
    }

    /// Run `cleanup` on every strategy
    pub async fn cleanup_all(&self) {
        for entry in self.snapshot().await {
            entry.strategy.cleanup().await;
        }
    }
}
