//! Crawl Budget
//!
//! The balance check is optimistic: [`BudgetSnapshot`] is read once when the
//! crawl starts and [`BudgetTracker`] compares a running in-process total
//! against it. Spend by other requests from the same caller during the crawl
//! is not visible here; the ledger outside this crate stays authoritative.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::result::StopReason;
use crate::types::{CallerId, Result};

/// Source of a caller's prepaid balance
#[async_trait]
pub trait Billing: Send + Sync {
    /// Available balance in USD
    async fn available_balance(&self, caller: &CallerId) -> Result<f64>;
}

/// Balance as read at crawl start
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetSnapshot {
    pub available_usd: f64,
    pub taken_at: DateTime<Utc>,
}

impl BudgetSnapshot {
    pub fn new(available_usd: f64) -> Self {
        Self {
            available_usd,
            taken_at: Utc::now(),
        }
    }

    /// Never stops a crawl; for BYOK callers and local runs
    pub fn unlimited() -> Self {
        Self::new(f64::INFINITY)
    }

    pub async fn capture(billing: &dyn Billing, caller: &CallerId) -> Result<Self> {
        let available = billing.available_balance(caller).await?;
        debug!(caller = %caller, available_usd = available, "Captured balance snapshot");
        Ok(Self::new(available))
    }
}

/// Spend and stop state for one crawl
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlBudgetState {
    pub cumulative_cost_usd: f64,
    pub stopped_early: bool,
    pub stop_reason: Option<StopReason>,
}

/// [`CrawlBudgetState`] behind its single lock
#[derive(Debug)]
pub struct BudgetTracker {
    snapshot: BudgetSnapshot,
    enforce: bool,
    state: Mutex<CrawlBudgetState>,
}

impl BudgetTracker {
    /// `enforce` is false for BYOK chains: their spend is not ours to cap
    pub fn new(snapshot: BudgetSnapshot, enforce: bool) -> Self {
        Self {
            snapshot,
            enforce,
            state: Mutex::new(CrawlBudgetState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CrawlBudgetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a priced page; returns true if the next page is no longer affordable
    ///
    /// The page's own cost stands in as the estimate for the next one.
    pub fn record(&self, page_cost_usd: f64) -> bool {
        let mut state = self.lock();
        state.cumulative_cost_usd += page_cost_usd;

        if !self.enforce || state.stopped_early {
            return false;
        }

        let remaining = self.snapshot.available_usd - state.cumulative_cost_usd;
        if remaining < page_cost_usd {
            state.stopped_early = true;
            state.stop_reason = Some(StopReason::InsufficientBalance);
            debug!(
                remaining_usd = remaining,
                next_estimate_usd = page_cost_usd,
                "Balance exhausted"
            );
            return true;
        }
        false
    }

    /// Record a stop; the first reason wins. Returns true if this call stopped the crawl.
    pub fn stop(&self, reason: StopReason) -> bool {
        let mut state = self.lock();
        if state.stopped_early {
            return false;
        }
        state.stopped_early = true;
        state.stop_reason = Some(reason);
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped_early
    }

    pub fn state(&self) -> CrawlBudgetState {
        self.lock().clone()
    }
}
