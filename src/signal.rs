// =============================================================================
// Signal Data Model
// =============================================================================
//
// The canonical, validated record produced by the Validator (C1). This is
// the single conversion boundary for dynamically-typed inbound payloads:
// everywhere downstream of `Validator::validate` operates on this tagged
// sum, never on a free-form map.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }

    pub fn parse(raw: &str) -> Option<Direction> {
        match raw.trim().to_lowercase().as_str() {
            "buy" => Some(Direction::Buy),
            "sell" => Some(Direction::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    EntryTrigger,
    Structure,
}

/// Closed set of structure/trigger event names (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalEvent {
    PredictionSignal,
    ZoneRetraceTouch,
    NewZoneConfirmed,
    FvgTouch,
    LiquiditySweep,
}

impl SignalEvent {
    pub fn parse(raw: &str) -> Option<SignalEvent> {
        match raw.trim().to_lowercase().as_str() {
            "prediction_signal" => Some(SignalEvent::PredictionSignal),
            "zone_retrace_touch" => Some(SignalEvent::ZoneRetraceTouch),
            "new_zone_confirmed" => Some(SignalEvent::NewZoneConfirmed),
            "fvg_touch" => Some(SignalEvent::FvgTouch),
            "liquidity_sweep" => Some(SignalEvent::LiquiditySweep),
            _ => None,
        }
    }

    /// True for the set of events a `kind=structure` signal may carry.
    pub fn is_structure_event(self) -> bool {
        !matches!(self, SignalEvent::PredictionSignal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalEvent::PredictionSignal => "prediction_signal",
            SignalEvent::ZoneRetraceTouch => "zone_retrace_touch",
            SignalEvent::NewZoneConfirmed => "new_zone_confirmed",
            SignalEvent::FvgTouch => "fvg_touch",
            SignalEvent::LiquiditySweep => "liquidity_sweep",
        }
    }
}

/// How the signal was confirmed — on a closed bar or intrabar. Open-ended in
/// the wire format (spec.md lists `bar_close, intrabar, ...`) so unknown
/// values are preserved as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    BarClose,
    Intrabar,
    Other(String),
}

impl Confirmation {
    pub fn parse(raw: &str) -> Confirmation {
        match raw.trim().to_lowercase().as_str() {
            "bar_close" => Confirmation::BarClose,
            "intrabar" => Confirmation::Intrabar,
            other => Confirmation::Other(other.to_string()),
        }
    }

    pub fn is_bar_close(&self) -> bool {
        matches!(self, Confirmation::BarClose)
    }
}

/// A validated, canonical signal. Immutable once accepted (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub price: f64,
    pub timeframe: Option<i64>,
    pub direction: Option<Direction>,
    pub kind: SignalKind,
    pub event: SignalEvent,
    pub source: String,
    pub strength: String,
    pub confirmed: Option<Confirmation>,
    pub tv_confidence: Option<f64>,
    pub pattern_similarity: Option<f64>,
    pub received_at: DateTime<Utc>,
}

impl Signal {
    /// True if this entry_trigger signal was synthesized by the
    /// BatchDispatcher's reversal detector rather than received directly
    /// from the chart service (spec.md §4.9).
    pub fn is_synthetic_reversal(&self) -> bool {
        self.kind == SignalKind::EntryTrigger && self.source == "reversal_detector"
    }
}

/// An ordered sequence of signals collected within one debounce window,
/// closed by timer expiry (spec.md §3).
pub type Batch = Vec<Signal>;
