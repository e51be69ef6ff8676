// =============================================================================
// Market Data — Candle Series
// =============================================================================
//
// A minimal OHLC ring buffer, adapted from the teacher's
// `market_data/candle_buffer.rs`. The teacher's version is a live websocket
// consumer (Binance kline stream via `tokio-tungstenite`); that transport is
// out of scope here — the broker/MT SDK binding is an external interface
// (spec.md §6), so this module only keeps the storage shape (a trimmed ring
// buffer per timeframe) and drops the streaming machinery. ContextBuilder
// (C6) is the caller that decides when to pull fresh OHLC via the Broker
// trait and push it in here.
// =============================================================================

use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Canonical timeframe labels used throughout the pipeline (spec.md §3:
/// `live_indicators{5m,15m,1h}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M5,
    M15,
    H1,
    D1,
}

impl Timeframe {
    pub fn label(self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        }
    }
}

/// Ring buffer of closed candles for a single `(symbol, timeframe)` series.
pub struct CandleSeries {
    candles: RwLock<VecDeque<Candle>>,
    max_len: usize,
}

impl CandleSeries {
    pub fn new(max_len: usize) -> Self {
        Self {
            candles: RwLock::new(VecDeque::with_capacity(max_len)),
            max_len,
        }
    }

    pub fn push(&self, candle: Candle) {
        let mut buf = self.candles.write();
        buf.push_back(candle);
        while buf.len() > self.max_len {
            buf.pop_front();
        }
    }

    pub fn replace_all(&self, candles: Vec<Candle>) {
        let mut buf = self.candles.write();
        *buf = candles.into_iter().collect();
        while buf.len() > self.max_len {
            buf.pop_front();
        }
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.read().iter().map(|c| c.close).collect()
    }

    pub fn as_vec(&self) -> Vec<Candle> {
        self.candles.read().iter().copied().collect()
    }

    pub fn last(&self) -> Option<Candle> {
        self.candles.read().back().copied()
    }

    pub fn len(&self) -> usize {
        self.candles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
