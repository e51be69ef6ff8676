// =============================================================================
// RiskGate (C5)
// =============================================================================
//
// Three capital-protection checks plus the standard pre-trade guards, first
// failure short-circuits (spec.md §4.5). Kept in the teacher's
// `RiskEngine`-as-explicit-struct shape (config fields at construction,
// async checks reading live state rather than a background-updated
// `RwLock<Inner>`, since the source of truth here is trade history in the
// Store, not an in-process counter) and its tracing-on-trip convention.
//
// PersistenceError during any check does NOT block (spec.md §7) — a DB
// failure degrades the check to "pass", logged as a warning.
// =============================================================================

use std::sync::Arc;

use chrono::{Datelike, Duration, Timelike, Utc, Weekday};
use tracing::warn;

use crate::broker::Broker;
use crate::persistence::Store;

#[derive(Debug, Clone, PartialEq)]
pub enum RiskVerdict {
    Allowed,
    Blocked { reason: String },
}

pub struct RiskGateConfig {
    pub max_daily_loss_pct: f64,
    pub max_consecutive_losses: u32,
    pub consecutive_loss_group_window: Duration,
    pub reset_hours: i64,
    pub gap_block_threshold_usd: f64,
    pub max_open_positions: usize,
    pub margin_floor_usd: f64,
    pub max_account_open_risk_pct: f64,
    pub contract_multiplier: f64,
    pub news_filter_enabled: bool,
    pub news_block_before: Duration,
    pub news_block_after: Duration,
    /// Only events at or above this impact level gate trading
    /// (`config.py`'s `news_min_importance`, collapsed to the broker's
    /// string-impact field since this trait has no numeric importance).
    pub news_min_impact: String,
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: -10.0,
            max_consecutive_losses: 3,
            consecutive_loss_group_window: Duration::seconds(10),
            reset_hours: 24,
            gap_block_threshold_usd: 15.0,
            max_open_positions: 1,
            margin_floor_usd: 500.0,
            max_account_open_risk_pct: 6.0,
            contract_multiplier: 100.0,
            news_filter_enabled: true,
            news_block_before: Duration::minutes(30),
            news_block_after: Duration::minutes(30),
            news_min_impact: "high".to_string(),
        }
    }
}

pub struct RiskGate {
    broker: Arc<dyn Broker>,
    store: Arc<dyn Store>,
    config: RiskGateConfig,
}

impl RiskGate {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn Store>, config: RiskGateConfig) -> Self {
        Self { broker, store, config }
    }

    /// Run every check in spec.md §4.5's order; the first block short-
    /// circuits the rest.
    pub async fn evaluate(&self, symbol: &str, proposed_sl_distance: f64, proposed_lots: f64) -> RiskVerdict {
        if let RiskVerdict::Blocked { reason } = self.check_daily_loss_cap().await {
            return RiskVerdict::Blocked { reason };
        }
        if let RiskVerdict::Blocked { reason } = self.check_consecutive_losses().await {
            return RiskVerdict::Blocked { reason };
        }
        if let RiskVerdict::Blocked { reason } = self.check_weekend_gap(symbol).await {
            return RiskVerdict::Blocked { reason };
        }
        if let RiskVerdict::Blocked { reason } = self.check_news_window(symbol).await {
            return RiskVerdict::Blocked { reason };
        }
        if let RiskVerdict::Blocked { reason } = self.check_market_open(symbol).await {
            return RiskVerdict::Blocked { reason };
        }
        if let RiskVerdict::Blocked { reason } = self.check_margin_floor().await {
            return RiskVerdict::Blocked { reason };
        }
        if let RiskVerdict::Blocked { reason } = self.check_position_count(symbol).await {
            return RiskVerdict::Blocked { reason };
        }
        if let RiskVerdict::Blocked { reason } = self.check_account_open_risk(symbol, proposed_sl_distance, proposed_lots).await {
            return RiskVerdict::Blocked { reason };
        }
        RiskVerdict::Allowed
    }

    /// Pending-news window: block if any broker calendar event at or above
    /// `news_min_impact` falls within `[now - block_after, now + block_before]`
    /// (spec.md §4.5 "pending news window", `config.py`'s
    /// `news_block_before_min`/`news_block_after_min`).
    async fn check_news_window(&self, symbol: &str) -> RiskVerdict {
        if !self.config.news_filter_enabled {
            return RiskVerdict::Allowed;
        }
        let lookahead = self.config.news_block_before.max(self.config.news_block_after);
        let events = match self.broker.calendar_events(symbol, lookahead).await {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "news calendar lookup failed, treating as pass");
                return RiskVerdict::Allowed;
            }
        };
        let now = Utc::now();
        let blocking = events.iter().find(|e| {
            e.impact.eq_ignore_ascii_case(&self.config.news_min_impact)
                && e.time >= now - self.config.news_block_after
                && e.time <= now + self.config.news_block_before
        });
        if let Some(event) = blocking {
            let reason = format!("pending news window: {} at {}", event.name, event.time);
            warn!("{reason}");
            return RiskVerdict::Blocked { reason };
        }
        RiskVerdict::Allowed
    }

    async fn check_market_open(&self, symbol: &str) -> RiskVerdict {
        match self.broker.is_market_open(symbol).await {
            Ok(true) => RiskVerdict::Allowed,
            Ok(false) => RiskVerdict::Blocked { reason: "market closed".to_string() },
            Err(e) => {
                warn!(error = %e, "market-open check failed, treating as pass");
                RiskVerdict::Allowed
            }
        }
    }

    /// Daily loss cap: sum today's UTC closed-trade P&L; block if below
    /// `balance * max_daily_loss_pct / 100` (spec.md §4.5 check 1).
    async fn check_daily_loss_cap(&self) -> RiskVerdict {
        let trades = match self.store.todays_closed_trades().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "daily loss lookup failed, treating as pass");
                return RiskVerdict::Allowed;
            }
        };
        let balance = match self.broker.account_info().await {
            Ok(a) => a.balance,
            Err(_) => return RiskVerdict::Allowed,
        };
        let daily_pnl: f64 = trades.iter().map(|t| t.pnl_usd).sum();
        let floor = balance * self.config.max_daily_loss_pct / 100.0;
        if daily_pnl < floor {
            let reason = format!("daily loss cap breached: pnl={daily_pnl:.2} floor={floor:.2}");
            warn!("{reason}");
            return RiskVerdict::Blocked { reason };
        }
        RiskVerdict::Allowed
    }

    /// Consecutive-loss circuit breaker: group closed trades within
    /// `consecutive_loss_group_window` of the previous trade sharing the
    /// `sl_hit` outcome into a single event (spec.md §4.5 check 2, §8 S5).
    async fn check_consecutive_losses(&self) -> RiskVerdict {
        let since = Utc::now() - Duration::hours(self.config.reset_hours);
        let trades = match self.store.recent_closed_trades(since).await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "consecutive-loss lookup failed, treating as pass");
                return RiskVerdict::Allowed;
            }
        };

        let events = group_consecutive_loss_events(&trades, self.config.consecutive_loss_group_window);
        let tripped = events.len() >= self.config.max_consecutive_losses as usize
            && events.iter().take(self.config.max_consecutive_losses as usize).all(|e| *e);
        if tripped {
            let reason = format!("consecutive-loss breaker tripped: {} loss events", events.len());
            warn!("{reason}");
            return RiskVerdict::Blocked { reason };
        }
        RiskVerdict::Allowed
    }

    /// Weekend gap check: only evaluated Monday 01:00-03:00 UTC, comparing
    /// the latest daily-bar open against the previous daily-bar close
    /// (spec.md §4.5 check 3).
    async fn check_weekend_gap(&self, symbol: &str) -> RiskVerdict {
        let now = Utc::now();
        if now.weekday() != Weekday::Mon || !(1..3).contains(&now.hour()) {
            return RiskVerdict::Allowed;
        }
        let daily = match self.broker.ohlc(symbol, crate::market_data::Timeframe::D1, 2).await {
            Ok(c) if c.len() >= 2 => c,
            _ => return RiskVerdict::Allowed,
        };
        let prev_close = daily[daily.len() - 2].close;
        let latest_open = daily[daily.len() - 1].open;
        let gap = (latest_open - prev_close).abs();
        if gap >= self.config.gap_block_threshold_usd {
            let reason = format!("weekend gap {gap:.2} exceeds threshold {:.2}", self.config.gap_block_threshold_usd);
            warn!("{reason}");
            return RiskVerdict::Blocked { reason };
        }
        RiskVerdict::Allowed
    }

    async fn check_position_count(&self, symbol: &str) -> RiskVerdict {
        match self.broker.open_positions(symbol).await {
            Ok(positions) if positions.len() >= self.config.max_open_positions => {
                RiskVerdict::Blocked { reason: "max open position count reached".to_string() }
            }
            _ => RiskVerdict::Allowed,
        }
    }

    async fn check_margin_floor(&self) -> RiskVerdict {
        match self.broker.account_info().await {
            Ok(a) if a.free_margin < self.config.margin_floor_usd => {
                RiskVerdict::Blocked { reason: format!("free margin {:.2} below floor", a.free_margin) }
            }
            _ => RiskVerdict::Allowed,
        }
    }

    /// Account-wide open-risk cap: sum `|entry - sl| * lots * contract_mult`
    /// across open positions plus the proposed trade; block if it exceeds
    /// `max_account_open_risk_pct` of balance.
    async fn check_account_open_risk(&self, symbol: &str, proposed_sl_distance: f64, proposed_lots: f64) -> RiskVerdict {
        let (positions, account) = match (self.broker.open_positions(symbol).await, self.broker.account_info().await) {
            (Ok(p), Ok(a)) => (p, a),
            _ => return RiskVerdict::Allowed,
        };
        let existing_risk: f64 = positions
            .iter()
            .map(|p| (p.open_price - p.sl).abs() * p.lot_size * self.config.contract_multiplier)
            .sum();
        let proposed_risk = proposed_sl_distance * proposed_lots * self.config.contract_multiplier;
        let total_risk_pct = if account.balance > 0.0 {
            (existing_risk + proposed_risk) / account.balance * 100.0
        } else {
            0.0
        };
        if total_risk_pct > self.config.max_account_open_risk_pct {
            let reason = format!("account open-risk cap exceeded: {total_risk_pct:.2}%");
            warn!("{reason}");
            return RiskVerdict::Blocked { reason };
        }
        RiskVerdict::Allowed
    }
}

/// Collapse newest-first closed trades into consecutive-loss "events":
/// adjacent `sl_hit` rows within `window` of each other count as a single
/// event (spec.md §8 S5). Returns, per event oldest-scan-order from the
/// most recent trade backward, whether that event was an `sl_hit` group.
/// Stops counting non-`sl_hit` rows once encountered, since only a
/// contiguous run of losses from "now" backward trips the breaker.
fn group_consecutive_loss_events(trades_newest_first: &[crate::persistence::TradeResultRow], window: Duration) -> Vec<bool> {
    let mut events = Vec::new();
    let mut i = 0;
    while i < trades_newest_first.len() {
        let row = &trades_newest_first[i];
        if row.outcome != "sl_hit" {
            break;
        }
        let mut j = i + 1;
        while j < trades_newest_first.len()
            && trades_newest_first[j].outcome == "sl_hit"
            && (trades_newest_first[j - 1].closed_at - trades_newest_first[j].closed_at) <= window
        {
            j += 1;
        }
        events.push(true);
        i = j;
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::TradeResultRow;
    use chrono::TimeZone;

    fn trade(ticket: u64, secs: i64) -> TradeResultRow {
        TradeResultRow {
            ticket,
            closed_at: Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap() + Duration::seconds(secs),
            outcome: "sl_hit".to_string(),
            pnl_usd: -5.0,
        }
    }

    #[tokio::test]
    async fn news_window_blocks_when_high_impact_event_is_imminent() {
        use crate::broker::{CalendarEvent, MockBroker};
        use crate::persistence::InMemoryStore;

        let broker = MockBroker::default();
        broker.calendar.lock().push(CalendarEvent {
            name: "NFP".to_string(),
            time: Utc::now() + Duration::minutes(10),
            impact: "high".to_string(),
        });
        let broker: std::sync::Arc<dyn Broker> = std::sync::Arc::new(broker);
        let store: std::sync::Arc<dyn crate::persistence::Store> = std::sync::Arc::new(InMemoryStore::new());
        let gate = RiskGate::new(broker, store, RiskGateConfig::default());

        let verdict = gate.check_news_window("GOLD").await;
        assert!(matches!(verdict, RiskVerdict::Blocked { .. }));
    }

    #[tokio::test]
    async fn news_window_allows_when_no_events_pending() {
        use crate::broker::MockBroker;
        use crate::persistence::InMemoryStore;

        let broker: std::sync::Arc<dyn Broker> = std::sync::Arc::new(MockBroker::default());
        let store: std::sync::Arc<dyn crate::persistence::Store> = std::sync::Arc::new(InMemoryStore::new());
        let gate = RiskGate::new(broker, store, RiskGateConfig::default());

        assert_eq!(gate.check_news_window("GOLD").await, RiskVerdict::Allowed);
    }

    /// S5: three sl_hit rows 3s apart collapse into one event.
    #[test]
    fn s5_three_close_losses_collapse_to_one_event() {
        let trades = vec![trade(3, 6), trade(2, 3), trade(1, 0)];
        let events = group_consecutive_loss_events(&trades, Duration::seconds(10));
        assert_eq!(events.len(), 1);
    }

    /// S5: adding a fourth loss 10 minutes later starts a second event.
    #[test]
    fn s5_fourth_distant_loss_starts_second_event() {
        let trades = vec![trade(4, 600), trade(3, 6), trade(2, 3), trade(1, 0)];
        let events = group_consecutive_loss_events(&trades, Duration::seconds(10));
        assert_eq!(events.len(), 2);
    }

    /// S5: a fifth loss another 10 minutes later makes three events, tripping
    /// a breaker configured for max_consecutive_losses=3.
    #[test]
    fn s5_fifth_distant_loss_trips_breaker_at_three() {
        let trades = vec![trade(5, 1200), trade(4, 600), trade(3, 6), trade(2, 3), trade(1, 0)];
        let events = group_consecutive_loss_events(&trades, Duration::seconds(10));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn non_loss_outcome_breaks_the_scan() {
        let mut trades = vec![trade(2, 3), trade(1, 0)];
        trades[0].outcome = "tp_hit".to_string();
        let events = group_consecutive_loss_events(&trades, Duration::seconds(10));
        assert!(events.is_empty());
    }
}
