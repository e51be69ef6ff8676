// =============================================================================
// Structurer (C3)
// =============================================================================
//
// Deterministic mapping from a Context bundle to the fixed Normalized
// schema (spec.md §4.3). Every rule below is reproduced verbatim from
// spec.md — this component must not make probabilistic inferences; any
// field whose inputs are absent is `None` and recorded in
// `data_completeness.fields_missing`.
// =============================================================================

use serde::Serialize;

use crate::context::ContextBundle;
use crate::signal::{Direction, Signal, SignalEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegimeClass {
    Range,
    Trend,
    Breakout,
}

#[derive(Debug, Clone, Serialize)]
pub struct Regime {
    pub classification: RegimeClass,
    pub adx: Option<f64>,
    pub adx_rising: Option<bool>,
    pub atr_expanding: Option<bool>,
    pub squeeze: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ZoneDirection {
    Demand,
    Supply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FvgDirection {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SweepDirection {
    /// Stops below price were swept — implies a subsequent buy setup.
    SellSide,
    /// Stops above price were swept — implies a subsequent sell setup.
    BuySide,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ZoneInteraction {
    pub zone_touch: bool,
    pub zone_direction: Option<ZoneDirection>,
    pub fvg_touch: bool,
    pub fvg_direction: Option<FvgDirection>,
    pub liquidity_sweep: bool,
    pub sweep_direction: Option<SweepDirection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RsiZone {
    Oversold,
    Neutral,
    Overbought,
}

impl RsiZone {
    pub fn classify(rsi: f64) -> RsiZone {
        if rsi < 30.0 {
            RsiZone::Oversold
        } else if rsi > 70.0 {
            RsiZone::Overbought
        } else {
            RsiZone::Neutral
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Momentum {
    pub rsi: Option<f64>,
    pub rsi_zone: Option<RsiZone>,
    pub trend_aligned: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Session {
    Tokyo,
    London,
    LondonNy,
    Ny,
    OffHours,
}

impl Session {
    /// Canonical trading-session label derived from UTC hour (glossary:
    /// "Session — canonical trading-session label derived from UTC hour").
    pub fn from_utc_hour(hour: u32) -> Session {
        match hour {
            0..=6 => Session::Tokyo,
            7..=11 => Session::London,
            12..=15 => Session::LondonNy,
            16..=20 => Session::Ny,
            _ => Session::OffHours,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalQuality {
    pub source: String,
    pub bar_close_confirmed: bool,
    pub session: Session,
    pub tv_confidence: Option<f64>,
    pub pattern_similarity: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DataCompleteness {
    pub connected: bool,
    pub fields_missing: Vec<String>,
}

/// Extra fields ScoringEngine's instant-reject Phase A needs that are not
/// naturally homed under one of the other sub-records (spec.md §4.4 Phase
/// A rule 2 references `sma20_distance_pct` directly).
#[derive(Debug, Clone, Default, Serialize)]
pub struct PriceStructure {
    pub sma20_distance_pct: Option<f64>,
}

/// The fixed normalized schema — output of the Structurer, input to the
/// ScoringEngine (spec.md §3).
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedSchema {
    pub regime: Regime,
    pub price_structure: PriceStructure,
    pub zone_interaction: ZoneInteraction,
    pub momentum: Momentum,
    pub signal_quality: SignalQuality,
    pub data_completeness: DataCompleteness,
}

pub struct Structurer;

impl Structurer {
    /// Deterministic mapping from a Context bundle to the normalized
    /// schema. `entry_signal` is the canonical trigger the batch is being
    /// structured for (used to translate structure-signal directions into
    /// zone/fvg/sweep terms relative to it).
    pub fn structure(ctx: &ContextBundle, entry_signal: &Signal) -> NormalizedSchema {
        let mut fields_missing = Vec::new();

        let adx = ctx.live_indicators.m5.adx;
        let adx_rising = ctx.live_indicators.m5.adx_rising;
        let atr_expanding = ctx.live_indicators.m5.atr_expanding;
        let squeeze = ctx.live_indicators.m5.squeeze;
        if adx.is_none() {
            fields_missing.push("adx".to_string());
        }
        if atr_expanding.is_none() {
            fields_missing.push("atr_expanding".to_string());
        }

        let classification = classify_regime(adx, adx_rising, atr_expanding);
        let regime = Regime { classification, adx, adx_rising, atr_expanding, squeeze };

        let price_structure = PriceStructure {
            sma20_distance_pct: ctx.live_indicators.m5.sma20_distance_pct,
        };

        let zone_interaction = structure_zone_interaction(ctx, entry_signal.direction, &mut fields_missing);

        let rsi = ctx.live_indicators.m5.rsi;
        if rsi.is_none() {
            fields_missing.push("rsi".to_string());
        }
        let rsi_zone = rsi.map(RsiZone::classify);
        let trend_aligned = ctx
            .q_trend_direction
            .map(|qt| Some(qt) == entry_signal.direction);

        let momentum = Momentum { rsi, rsi_zone, trend_aligned };

        let session = Session::from_utc_hour(ctx.as_of_hour_utc);
        let signal_quality = SignalQuality {
            source: entry_signal.source.clone(),
            bar_close_confirmed: entry_signal.confirmed.as_ref().map(|c| c.is_bar_close()).unwrap_or(false),
            session,
            tv_confidence: entry_signal.tv_confidence,
            pattern_similarity: entry_signal.pattern_similarity,
        };

        let data_completeness = DataCompleteness { connected: ctx.connected, fields_missing };

        NormalizedSchema { regime, price_structure, zone_interaction, momentum, signal_quality, data_completeness }
    }
}

/// `breakout` iff `adx>25 ∧ adx_rising ∧ atr_expanding`; else `trend` iff
/// `adx>20`; else `range` (spec.md §4.3, authoritative).
fn classify_regime(adx: Option<f64>, adx_rising: Option<bool>, atr_expanding: Option<bool>) -> RegimeClass {
    let adx_v = adx.unwrap_or(0.0);
    let rising = adx_rising.unwrap_or(false);
    let expanding = atr_expanding.unwrap_or(false);
    if adx_v > 25.0 && rising && expanding {
        RegimeClass::Breakout
    } else if adx_v > 20.0 {
        RegimeClass::Trend
    } else {
        RegimeClass::Range
    }
}

fn structure_zone_interaction(
    ctx: &ContextBundle,
    entry_direction: Option<Direction>,
    fields_missing: &mut Vec<String>,
) -> ZoneInteraction {
    let mut zi = ZoneInteraction::default();

    // "populated from the most-recent matching structure signal in the
    // context window; direction translation: structure-signal
    // direction=buy at a demand zone => zone_direction=demand; sell =>
    // supply; fvg analogue uses bullish/bearish."
    if let Some(sig) = most_recent(&ctx.recent_structure.zone_retrace, ctx.zone_window) {
        zi.zone_touch = true;
        zi.zone_direction = sig.direction.map(|d| match d {
            Direction::Buy => ZoneDirection::Demand,
            Direction::Sell => ZoneDirection::Supply,
        });
    } else {
        fields_missing.push("zone_touch".to_string());
    }

    if let Some(sig) = most_recent(&ctx.recent_structure.fvg_touch, ctx.fvg_window) {
        zi.fvg_touch = true;
        zi.fvg_direction = sig.direction.map(|d| match d {
            Direction::Buy => FvgDirection::Bullish,
            Direction::Sell => FvgDirection::Bearish,
        });
    }

    if let Some(sig) = most_recent(&ctx.recent_structure.liquidity_sweep, ctx.sweep_window) {
        zi.liquidity_sweep = true;
        // sweep_direction=sell_side means sell-side liquidity (stops below)
        // was swept, implying a subsequent buy setup: a sweep signal
        // carrying direction=sell denotes "sell-side stops were taken".
        zi.sweep_direction = sig.direction.map(|d| match d {
            Direction::Sell => SweepDirection::SellSide,
            Direction::Buy => SweepDirection::BuySide,
        });
    }

    let _ = entry_direction;
    zi
}

fn most_recent<'a>(signals: &'a [Signal], window: chrono::Duration) -> Option<&'a Signal> {
    let cutoff = chrono::Utc::now() - window;
    signals.iter().filter(|s| s.received_at >= cutoff).max_by_key(|s| s.received_at)
}

/// True iff `event` is a valid member of the structure window this field
/// draws from — used by BatchDispatcher's reversal detector rather than the
/// Structurer itself, kept here since it shares the "matching structure
/// signal" predicate.
pub fn matches_event(signal: &Signal, event: SignalEvent) -> bool {
    signal.event == event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regime_classifies_breakout() {
        assert_eq!(classify_regime(Some(30.0), Some(true), Some(true)), RegimeClass::Breakout);
    }

    #[test]
    fn regime_classifies_trend_when_not_all_breakout_conditions_hold() {
        assert_eq!(classify_regime(Some(30.0), Some(false), Some(true)), RegimeClass::Trend);
        assert_eq!(classify_regime(Some(22.0), None, None), RegimeClass::Trend);
    }

    #[test]
    fn regime_classifies_range_below_threshold() {
        assert_eq!(classify_regime(Some(15.0), Some(true), Some(true)), RegimeClass::Range);
        assert_eq!(classify_regime(None, None, None), RegimeClass::Range);
    }

    #[test]
    fn rsi_zone_thresholds() {
        assert_eq!(RsiZone::classify(29.9), RsiZone::Oversold);
        assert_eq!(RsiZone::classify(30.0), RsiZone::Neutral);
        assert_eq!(RsiZone::classify(70.1), RsiZone::Overbought);
        assert_eq!(RsiZone::classify(50.0), RsiZone::Neutral);
    }

    #[test]
    fn session_from_hour() {
        assert_eq!(Session::from_utc_hour(2), Session::Tokyo);
        assert_eq!(Session::from_utc_hour(9), Session::London);
        assert_eq!(Session::from_utc_hour(13), Session::LondonNy);
        assert_eq!(Session::from_utc_hour(18), Session::Ny);
        assert_eq!(Session::from_utc_hour(23), Session::OffHours);
    }
}
