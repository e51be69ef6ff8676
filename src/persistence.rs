// =============================================================================
// Persistence abstraction
// =============================================================================
//
// SQLite storage is an external interface (spec.md §6, out of scope to
// implement concretely) — but the seven-table schema it names is part of
// the contract every component relies on. `Store` is the abstract surface;
// `InMemoryStore` is the test double used throughout the suite. A real
// SQLite-backed implementation (the teacher reaches for `sqlx` for durable
// storage in adjacent code) would implement the same trait; that adapter
// itself is out of scope per spec.md §6.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::PersistenceError;
use crate::signal::Signal;

#[derive(Debug, Clone)]
pub struct TradeResultRow {
    pub ticket: u64,
    pub closed_at: DateTime<Utc>,
    pub outcome: String,
    pub pnl_usd: f64,
}

#[derive(Debug, Clone)]
pub struct ScoringHistoryRow {
    pub created_at: DateTime<Utc>,
    pub direction: String,
    pub regime: String,
    pub total_score: f64,
    pub decision: String,
}

#[derive(Debug, Clone)]
pub struct SystemEventRow {
    pub created_at: DateTime<Utc>,
    pub event: String,
    pub detail: String,
    pub level: String,
}

/// Abstract persistence surface covering the seven tables from spec.md §6:
/// `signals`, `ai_decisions`, `executions`, `trade_results`,
/// `wait_history`, `scoring_history`, `system_events`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn record_signal(&self, signal: &Signal) -> Result<(), PersistenceError>;
    async fn recent_signals_by_event(&self, event: &str, within: Duration) -> Vec<Signal>;
    async fn record_scoring(&self, row: ScoringHistoryRow) -> Result<(), PersistenceError>;
    async fn record_system_event(&self, row: SystemEventRow) -> Result<(), PersistenceError>;
    async fn recent_trade_outcomes(&self, limit: usize) -> Result<Vec<String>, PersistenceError>;
    /// Closed trades for the current UTC calendar day, newest first.
    async fn todays_closed_trades(&self) -> Result<Vec<TradeResultRow>, PersistenceError>;
    /// Closed trades ordered newest-first, for the consecutive-loss scan
    /// (RiskGate reads back further than "today").
    async fn recent_closed_trades(&self, since: DateTime<Utc>) -> Result<Vec<TradeResultRow>, PersistenceError>;
    async fn open_position_count(&self, symbol: &str) -> Result<usize, PersistenceError>;
    async fn record_wait_item_resolution(&self, wait_id: Uuid, final_status: &str) -> Result<(), PersistenceError>;
}

#[derive(Default)]
pub struct InMemoryStore {
    signals: parking_lot::Mutex<Vec<Signal>>,
    scoring: parking_lot::Mutex<Vec<ScoringHistoryRow>>,
    events: parking_lot::Mutex<Vec<SystemEventRow>>,
    trades: parking_lot::Mutex<Vec<TradeResultRow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/seed helper: insert a closed-trade row directly.
    pub fn seed_trade(&self, row: TradeResultRow) {
        self.trades.lock().push(row);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn record_signal(&self, signal: &Signal) -> Result<(), PersistenceError> {
        self.signals.lock().push(signal.clone());
        Ok(())
    }

    async fn recent_signals_by_event(&self, event: &str, within: Duration) -> Vec<Signal> {
        let cutoff = Utc::now() - within;
        self.signals
            .lock()
            .iter()
            .filter(|s| s.event.as_str() == event && s.received_at >= cutoff)
            .cloned()
            .collect()
    }

    async fn record_scoring(&self, row: ScoringHistoryRow) -> Result<(), PersistenceError> {
        self.scoring.lock().push(row);
        Ok(())
    }

    async fn record_system_event(&self, row: SystemEventRow) -> Result<(), PersistenceError> {
        self.events.lock().push(row);
        Ok(())
    }

    async fn recent_trade_outcomes(&self, limit: usize) -> Result<Vec<String>, PersistenceError> {
        let trades = self.trades.lock();
        let mut sorted: Vec<_> = trades.clone();
        sorted.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        Ok(sorted.into_iter().take(limit).map(|t| t.outcome).collect())
    }

    async fn todays_closed_trades(&self) -> Result<Vec<TradeResultRow>, PersistenceError> {
        let today = Utc::now().date_naive();
        Ok(self.trades.lock().iter().filter(|t| t.closed_at.date_naive() == today).cloned().collect())
    }

    async fn recent_closed_trades(&self, since: DateTime<Utc>) -> Result<Vec<TradeResultRow>, PersistenceError> {
        let mut rows: Vec<_> = self.trades.lock().iter().filter(|t| t.closed_at >= since).cloned().collect();
        rows.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        Ok(rows)
    }

    async fn open_position_count(&self, _symbol: &str) -> Result<usize, PersistenceError> {
        Ok(0)
    }

    async fn record_wait_item_resolution(&self, _wait_id: Uuid, _final_status: &str) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recent_closed_trades_sorted_newest_first() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.seed_trade(TradeResultRow { ticket: 1, closed_at: now - Duration::minutes(10), outcome: "sl_hit".into(), pnl_usd: -10.0 });
        store.seed_trade(TradeResultRow { ticket: 2, closed_at: now, outcome: "tp_hit".into(), pnl_usd: 20.0 });
        let rows = store.recent_closed_trades(now - Duration::hours(1)).await.unwrap();
        assert_eq!(rows[0].ticket, 2);
    }
}
