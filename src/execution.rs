// =============================================================================
// Executor (C10)
// =============================================================================
//
// Ties the Broker, RiskGate, and PositionManager together to turn an
// approved decision into a live order, following the teacher's
// `ExecutionEngine` shape (struct of collaborator handles, one `execute`
// entry point returning a result enum). The sizing/SL/TP algorithm itself
// is ported from `original_source/executor.py::build_order_params`: ATR-
// based SL distance clamped to [min_sl, max_sl], setup-type multipliers,
// and lot sizing so potential loss equals `balance * risk_pct / 100`.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::broker::{Broker, OrderRequest, OrderType};
use crate::errors::ExternalPolicyBlock;
use crate::market_data::Timeframe;
use crate::position_engine::PositionManager;
use crate::risk::RiskGate;
use crate::scoring::DecisionResult;
use crate::signal::{Direction, Signal};

#[derive(Debug, Clone, Serialize)]
pub enum ExecutionResult {
    Placed { ticket: u64, fill_price: f64, sl: f64, tp: f64, lot_size: f64 },
    Blocked(String),
    Error(String),
}

pub struct ExecutorConfig {
    pub risk_percent: f64,
    pub atr_sl_multiplier: f64,
    pub atr_tp_multiplier: f64,
    pub min_sl: f64,
    pub max_sl: f64,
    pub atr_volatility_min: f64,
    pub atr_volatility_max: f64,
    pub contract_multiplier: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            risk_percent: 2.0,
            atr_sl_multiplier: 2.0,
            atr_tp_multiplier: 3.0,
            min_sl: 8.0,
            max_sl: 80.0,
            atr_volatility_min: 3.0,
            atr_volatility_max: 30.0,
            contract_multiplier: 100.0,
        }
    }
}

/// One of the three setup classifications `build_order_params` branches on
/// (SPEC_FULL.md §4.6 supplement, grounded on `executor.py::_get_setup_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupType {
    SweepReversal,
    TrendContinuation,
    Standard,
}

impl SetupType {
    /// Classifies from the score breakdown the ScoringEngine produced:
    /// sweep_reversal iff `liquidity_sweep` fired; trend_continuation iff
    /// the regime is trend/breakout and `zone_touch_aligned_with_trend`
    /// fired; else standard.
    pub fn classify(breakdown: &std::collections::HashMap<String, f64>, regime_trending: bool) -> SetupType {
        if breakdown.contains_key("liquidity_sweep") {
            SetupType::SweepReversal
        } else if regime_trending && breakdown.contains_key("zone_touch_aligned_with_trend") {
            SetupType::TrendContinuation
        } else {
            SetupType::Standard
        }
    }

    fn sl_multiplier(self, base: f64) -> f64 {
        match self {
            SetupType::SweepReversal => base * 0.75,
            SetupType::TrendContinuation => base,
            SetupType::Standard => base,
        }
    }

    fn tp_multiplier(self, base: f64) -> f64 {
        match self {
            SetupType::SweepReversal => base * 1.25,
            SetupType::TrendContinuation => base * 1.3,
            SetupType::Standard => base,
        }
    }
}

pub struct Executor {
    broker: Arc<dyn Broker>,
    risk_gate: Arc<RiskGate>,
    position_manager: Arc<PositionManager>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(broker: Arc<dyn Broker>, risk_gate: Arc<RiskGate>, position_manager: Arc<PositionManager>, config: ExecutorConfig) -> Self {
        Self { broker, risk_gate, position_manager, config }
    }

    /// Execute an approved decision. `canonical_signal` is the entry trigger
    /// used for direction/price (spec.md §4.9: the first real trigger in a
    /// sub-batch, or the synthetic reversal trigger).
    pub async fn execute(&self, canonical_signal: &Signal, result: &DecisionResult) -> ExecutionResult {
        let direction = match canonical_signal.direction {
            Some(d) => d,
            None => return ExecutionResult::Error("canonical signal has no direction".to_string()),
        };

        let atr15m = match self.atr_15m(&canonical_signal.symbol).await {
            Some(a) => a,
            None => return ExecutionResult::Error("could not compute ATR(15m)".to_string()),
        };

        let regime_trending = result
            .breakdown
            .keys()
            .any(|k| k == "regime_trend_base" || k == "regime_breakout_base");
        let setup_type = SetupType::classify(&result.breakdown, regime_trending);

        let sl_distance = self.sl_distance(atr15m, setup_type);
        let tp_distance = sl_distance * self.config.atr_tp_multiplier / self.config.atr_sl_multiplier * setup_type.tp_multiplier(1.0);

        let account = match self.broker.account_info().await {
            Ok(a) => a,
            Err(e) => return ExecutionResult::Error(format!("account_info failed: {e}")),
        };
        let lot_size = self.lot_size_for_risk(account.balance, sl_distance);

        if let crate::risk::RiskVerdict::Blocked { reason } = self.risk_gate.evaluate(&canonical_signal.symbol, sl_distance, lot_size).await {
            let block = ExternalPolicyBlock { reason: reason.clone() };
            warn!(reason = %block.reason, "execution blocked by risk gate");
            return ExecutionResult::Blocked(reason);
        }

        // Volatility filter: abort post-approval if current ATR falls
        // outside the configured band (spec.md §4.6).
        if !(self.config.atr_volatility_min..=self.config.atr_volatility_max).contains(&atr15m) {
            return ExecutionResult::Blocked("volatility out of band".to_string());
        }

        let tick = match self.broker.tick(&canonical_signal.symbol).await {
            Ok(t) => t,
            Err(e) => return ExecutionResult::Error(format!("tick refresh failed: {e}")),
        };
        let entry_price = match direction {
            Direction::Buy => tick.ask,
            Direction::Sell => tick.bid,
        };
        let (sl, tp) = match direction {
            Direction::Buy => (entry_price - sl_distance, entry_price + tp_distance),
            Direction::Sell => (entry_price + sl_distance, entry_price - tp_distance),
        };

        let order = OrderRequest {
            symbol: canonical_signal.symbol.clone(),
            direction,
            order_type: OrderType::Market,
            lot_size,
            price: None,
            sl,
            tp,
        };

        match self.broker.send_order(order).await {
            Ok(res) => {
                info!(ticket = res.ticket, lot_size, sl, tp, ?setup_type, "order submitted");
                self.position_manager.register(crate::position_engine::ManagedPosition::new(
                    res.ticket,
                    direction,
                    res.fill_price,
                    lot_size,
                    sl,
                    tp,
                    atr15m,
                ));
                ExecutionResult::Placed { ticket: res.ticket, fill_price: res.fill_price, sl, tp, lot_size }
            }
            Err(e) => ExecutionResult::Error(format!("order send failed: {e}")),
        }
    }

    async fn atr_15m(&self, symbol: &str) -> Option<f64> {
        let candles = self.broker.ohlc(symbol, Timeframe::M15, 60).await.ok()?;
        crate::indicators::atr::calculate_atr(&candles, 14)
    }

    fn sl_distance(&self, atr15m: f64, setup_type: SetupType) -> f64 {
        let raw = atr15m * setup_type.sl_multiplier(self.config.atr_sl_multiplier);
        raw.clamp(self.config.min_sl, self.config.max_sl)
    }

    /// Lot sizing so that `sl_distance * lot_size * contract_multiplier`
    /// equals `balance * risk_percent / 100` (executor.py's
    /// `build_order_params`).
    fn lot_size_for_risk(&self, balance: f64, sl_distance: f64) -> f64 {
        if sl_distance <= 0.0 {
            return 0.0;
        }
        let risk_usd = balance * self.config.risk_percent / 100.0;
        let raw_lots = risk_usd / (sl_distance * self.config.contract_multiplier);
        (raw_lots * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lot_size_scales_with_risk_budget() {
        let config = ExecutorConfig::default();
        // 2% of 10_000 = 200 USD risk budget; sl_distance=10, contract=100
        // => lots = 200 / (10*100) = 0.2
        let lots = {
            let sl_distance = 10.0;
            let risk_usd = 10_000.0 * config.risk_percent / 100.0;
            let raw_lots = risk_usd / (sl_distance * config.contract_multiplier);
            (raw_lots * 100.0).round() / 100.0
        };
        assert!((lots - 0.2).abs() < 1e-9);
    }

    #[test]
    fn setup_type_classifies_sweep_reversal() {
        let mut breakdown = std::collections::HashMap::new();
        breakdown.insert("liquidity_sweep".to_string(), 0.2);
        assert_eq!(SetupType::classify(&breakdown, false), SetupType::SweepReversal);
    }

    #[test]
    fn setup_type_classifies_trend_continuation() {
        let mut breakdown = std::collections::HashMap::new();
        breakdown.insert("zone_touch_aligned_with_trend".to_string(), 0.3);
        assert_eq!(SetupType::classify(&breakdown, true), SetupType::TrendContinuation);
    }

    #[test]
    fn setup_type_defaults_to_standard() {
        let breakdown = std::collections::HashMap::new();
        assert_eq!(SetupType::classify(&breakdown, false), SetupType::Standard);
    }
}
