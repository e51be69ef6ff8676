// =============================================================================
// ScoringEngine (C4)
// =============================================================================
//
// Pure, deterministic, referentially transparent: given a NormalizedSchema
// and a direction, always produces the same DecisionResult for the same
// ScoreConfig snapshot. No I/O, no clock reads, no hidden state (spec.md
// §4.4, "the heart").
//
// Phase A (instant-reject), Phase B (additive scoring), Phase C (decision)
// are implemented in that literal order, matching spec.md's own
// presentation of the rule set. Weight defaults are grounded on
// `original_source/meta_optimizer.py::TUNABLE_PARAMS` bounds (DESIGN.md
// Open Question #5) since no source gives exact numbers.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::signal::Direction;
use crate::structurer::{FvgDirection, NormalizedSchema, RegimeClass, RsiZone, SweepDirection, ZoneDirection};

/// A sentinel score for instant-reject decisions — low enough that no
/// combination of Phase B weights could ever reach it, so `score` alone is
/// enough to recognize a Phase A reject in stored history.
pub const INSTANT_REJECT_SCORE: f64 = f64::NEG_INFINITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    Approve,
    Wait,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitScope {
    NextBar,
    StructureNeeded,
    Cooldown,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionResult {
    pub decision: Decision,
    pub score: f64,
    pub breakdown: HashMap<String, f64>,
    pub reject_reasons: Vec<String>,
    pub wait_condition: Option<WaitScope>,
}

/// Factor → signed weight map plus the two decision thresholds. Loaded once
/// at startup and optionally hot-swapped whole by an external tuner
/// (spec.md §3, §5 — "in-memory hot-swap coarse: whole-map, not
/// field-level").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    pub weights: HashMap<String, f64>,
    pub approve_threshold: f64,
    pub wait_threshold: f64,
}

impl ScoreConfig {
    fn weight(&self, factor: &str) -> f64 {
        *self.weights.get(factor).unwrap_or(&0.0)
    }
}

/// Default weights, chosen within `meta_optimizer.py::TUNABLE_PARAMS`'s
/// documented bounds (DESIGN.md Open Question #5).
pub fn default_score_config() -> ScoreConfig {
    let mut weights = HashMap::new();
    weights.insert("regime_trend_base".to_string(), 0.15);
    weights.insert("regime_breakout_base".to_string(), 0.25);
    weights.insert("regime_range_base".to_string(), -0.10);
    weights.insert("zone_touch_aligned_with_trend".to_string(), 0.30);
    weights.insert("zone_touch_counter_trend".to_string(), -0.20);
    weights.insert("fvg_touch_aligned_with_trend".to_string(), 0.20);
    weights.insert("fvg_touch_counter_trend".to_string(), -0.15);
    weights.insert("liquidity_sweep".to_string(), 0.20);
    weights.insert("sweep_plus_zone".to_string(), 0.15);
    weights.insert("trend_aligned".to_string(), 0.20);
    weights.insert("rsi_confirmation".to_string(), 0.15);
    weights.insert("rsi_divergence".to_string(), -0.20);
    weights.insert("counter_trend_no_sweep".to_string(), -0.25);
    weights.insert("bar_close_confirmed".to_string(), 0.10);
    weights.insert("session_tokyo".to_string(), -0.05);
    weights.insert("session_london_ny".to_string(), 0.10);
    weights.insert("session_off_hours".to_string(), -0.15);
    weights.insert("tv_confidence_high".to_string(), 0.15);
    weights.insert("tv_confidence_low".to_string(), -0.10);
    weights.insert("pattern_similarity_high".to_string(), 0.15);
    weights.insert("pattern_similarity_low".to_string(), -0.10);
    ScoreConfig { weights, approve_threshold: 0.55, wait_threshold: 0.25 }
}

/// Atomic whole-map hot-swap point (spec.md §5). Readers take a read lock
/// per decision; the tuner replaces the entire inner value.
pub struct ScoreConfigHandle(RwLock<ScoreConfig>);

impl ScoreConfigHandle {
    pub fn new(config: ScoreConfig) -> Self {
        Self(RwLock::new(config))
    }

    pub fn snapshot(&self) -> ScoreConfig {
        self.0.read().clone()
    }

    pub fn replace(&self, config: ScoreConfig) {
        *self.0.write() = config;
    }

    /// Load the score-config file at `path`, falling back to
    /// `default_score_config()` if the file does not exist yet.
    pub fn load_or_default(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new(default_score_config()));
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read score config from {}", path.display()))?;
        let config: ScoreConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse score config from {}", path.display()))?;
        Ok(Self::new(config))
    }

    /// Persist the current weight map through the same tmp+rename atomic
    /// write the runtime config uses (spec.md §5 hot-swap, saved so a
    /// tuner's replacement survives a restart).
    pub fn persist(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let snapshot = self.snapshot();
        let content = serde_json::to_string_pretty(&snapshot).context("failed to serialize score config to JSON")?;
        crate::runtime_config::atomic_write_json(path, &content)
    }
}

pub struct ScoringEngine;

impl ScoringEngine {
    /// Score a single entry signal's normalized context. `direction` is the
    /// entry trigger's direction (spec.md requires a direction to evaluate
    /// alignment predicates against).
    pub fn score(schema: &NormalizedSchema, direction: Direction, config: &ScoreConfig) -> DecisionResult {
        if let Some(reason) = phase_a_instant_reject(schema, direction) {
            return DecisionResult {
                decision: Decision::Reject,
                score: INSTANT_REJECT_SCORE,
                breakdown: HashMap::new(),
                reject_reasons: vec![reason],
                wait_condition: None,
            };
        }

        let breakdown = phase_b_score(schema, direction, config);
        let total: f64 = breakdown.values().sum();

        phase_c_decide(schema, total, breakdown, config)
    }
}

/// Phase A: three instant-reject rules, checked in spec.md's stated order.
/// Returns the human-readable reason on the first rule that fires.
fn phase_a_instant_reject(schema: &NormalizedSchema, direction: Direction) -> Option<String> {
    let missing = schema.data_completeness.fields_missing.len();
    let core_missing = schema.momentum.rsi.is_none()
        || schema.regime.adx.is_none()
        || schema.regime.atr_expanding.is_none();
    if missing >= 3 || core_missing {
        return Some(format!(
            "insufficient data: {} fields missing or core indicator absent",
            missing
        ));
    }

    // Rule 2: range-midpoint chase — regime=range, |sma20_distance_pct|<=0.3,
    // no zone or fvg touch.
    if schema.regime.classification == RegimeClass::Range {
        let near_midpoint = schema
            .price_structure
            .sma20_distance_pct
            .map(|d| d.abs() <= 0.3)
            .unwrap_or(false);
        if near_midpoint && !schema.zone_interaction.zone_touch && !schema.zone_interaction.fvg_touch {
            return Some("range-midpoint chase: no structural edge in a ranging market".to_string());
        }
    }

    // Gate 2: Q-trend present, entry is counter to it, and not bar-close
    // confirmed — always reject regardless of any other positive factor
    // (spec.md §8 property 4).
    if let Some(trend_aligned) = schema.momentum.trend_aligned {
        if !trend_aligned && !schema.signal_quality.bar_close_confirmed {
            return Some("counter-trend entry without bar-close confirmation (gate 2)".to_string());
        }
    }

    let _ = direction;
    None
}

fn zone_aligned(dir: Direction, zone_direction: Option<ZoneDirection>) -> bool {
    matches!(
        (dir, zone_direction),
        (Direction::Buy, Some(ZoneDirection::Demand)) | (Direction::Sell, Some(ZoneDirection::Supply))
    )
}

fn fvg_aligned(dir: Direction, fvg_direction: Option<FvgDirection>) -> bool {
    matches!(
        (dir, fvg_direction),
        (Direction::Buy, Some(FvgDirection::Bullish)) | (Direction::Sell, Some(FvgDirection::Bearish))
    )
}

fn sweep_aligned(dir: Direction, sweep_direction: Option<SweepDirection>) -> bool {
    matches!(
        (dir, sweep_direction),
        (Direction::Buy, Some(SweepDirection::SellSide)) | (Direction::Sell, Some(SweepDirection::BuySide))
    )
}

/// Phase B: additive scoring table, every triggered factor contributing its
/// configured signed weight (spec.md §4.4).
fn phase_b_score(schema: &NormalizedSchema, direction: Direction, config: &ScoreConfig) -> HashMap<String, f64> {
    let mut breakdown = HashMap::new();
    let mut add = |factor: &str| {
        breakdown.insert(factor.to_string(), config.weight(factor));
    };

    match schema.regime.classification {
        RegimeClass::Trend => add("regime_trend_base"),
        RegimeClass::Breakout => add("regime_breakout_base"),
        RegimeClass::Range => add("regime_range_base"),
    }

    // `trend_aligned` stays `Option<bool>` throughout Phase B: `None` means
    // no Q-trend data is available at all, which is distinct from
    // `Some(false)` (Q-trend present but opposing) — `counter_trend_no_sweep`
    // below must not fire on the former (original_source/scoring_engine.py's
    // `is not None` guard; see Gate 2 above and structurer.rs's own
    // preservation of the same distinction).
    let trend_aligned = schema.momentum.trend_aligned;

    if schema.zone_interaction.zone_touch {
        let aligned = zone_aligned(direction, schema.zone_interaction.zone_direction);
        if aligned && trend_aligned == Some(true) {
            add("zone_touch_aligned_with_trend");
        } else if aligned {
            add("zone_touch_counter_trend");
        }
    }

    if schema.zone_interaction.fvg_touch {
        let aligned = fvg_aligned(direction, schema.zone_interaction.fvg_direction);
        if aligned && trend_aligned == Some(true) {
            add("fvg_touch_aligned_with_trend");
        } else if aligned {
            add("fvg_touch_counter_trend");
        }
    }

    let sweep_is_aligned = schema.zone_interaction.liquidity_sweep
        && sweep_aligned(direction, schema.zone_interaction.sweep_direction);
    if sweep_is_aligned {
        add("liquidity_sweep");
        if schema.zone_interaction.zone_touch && zone_aligned(direction, schema.zone_interaction.zone_direction) {
            add("sweep_plus_zone");
        }
    }

    if trend_aligned == Some(true) {
        add("trend_aligned");
    }

    if let Some(rsi_zone) = schema.momentum.rsi_zone {
        let confirming = matches!(
            (direction, rsi_zone),
            (Direction::Buy, RsiZone::Oversold) | (Direction::Sell, RsiZone::Overbought)
        );
        let diverging = matches!(
            (direction, rsi_zone),
            (Direction::Buy, RsiZone::Overbought) | (Direction::Sell, RsiZone::Oversold)
        );
        if confirming {
            add("rsi_confirmation");
        } else if diverging {
            add("rsi_divergence");
        }
    }

    if trend_aligned == Some(false) && !schema.zone_interaction.liquidity_sweep {
        add("counter_trend_no_sweep");
    }

    if schema.signal_quality.bar_close_confirmed {
        add("bar_close_confirmed");
    }

    use crate::structurer::Session;
    match schema.signal_quality.session {
        Session::Tokyo => add("session_tokyo"),
        Session::LondonNy => add("session_london_ny"),
        Session::OffHours => add("session_off_hours"),
        Session::London | Session::Ny => {}
    }

    if let Some(tv) = schema.signal_quality.tv_confidence {
        if tv > 0.7 {
            add("tv_confidence_high");
        } else if tv < 0.3 {
            add("tv_confidence_low");
        }
    }

    if let Some(ps) = schema.signal_quality.pattern_similarity {
        if ps > 0.7 {
            add("pattern_similarity_high");
        } else if ps < 0.3 {
            add("pattern_similarity_low");
        }
    }

    breakdown
}

/// Phase C: map the total score onto a decision, deriving a wait_condition
/// when the outcome is `wait` (spec.md §4.4).
fn phase_c_decide(
    schema: &NormalizedSchema,
    score: f64,
    breakdown: HashMap<String, f64>,
    config: &ScoreConfig,
) -> DecisionResult {
    if score >= config.approve_threshold {
        return DecisionResult {
            decision: Decision::Approve,
            score,
            breakdown,
            reject_reasons: Vec::new(),
            wait_condition: None,
        };
    }

    if score >= config.wait_threshold {
        let wait_condition = if !schema.zone_interaction.zone_touch && !schema.zone_interaction.fvg_touch {
            WaitScope::StructureNeeded
        } else if !schema.signal_quality.bar_close_confirmed {
            WaitScope::NextBar
        } else {
            WaitScope::Cooldown
        };
        return DecisionResult {
            decision: Decision::Wait,
            score,
            breakdown,
            reject_reasons: Vec::new(),
            wait_condition: Some(wait_condition),
        };
    }

    DecisionResult {
        decision: Decision::Reject,
        score,
        breakdown,
        reject_reasons: vec!["score below wait threshold".to_string()],
        wait_condition: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structurer::{
        DataCompleteness, Momentum, PriceStructure, Regime, RsiZone as Rz, Session, SignalQuality, ZoneInteraction,
    };

    fn base_schema() -> NormalizedSchema {
        NormalizedSchema {
            regime: Regime { classification: RegimeClass::Trend, adx: Some(22.0), adx_rising: Some(true), atr_expanding: Some(true), squeeze: Some(false) },
            price_structure: PriceStructure { sma20_distance_pct: Some(1.5) },
            zone_interaction: ZoneInteraction::default(),
            momentum: Momentum { rsi: Some(50.0), rsi_zone: Some(Rz::Neutral), trend_aligned: Some(true) },
            signal_quality: SignalQuality {
                source: "tv".into(),
                bar_close_confirmed: true,
                session: Session::London,
                tv_confidence: None,
                pattern_similarity: None,
            },
            data_completeness: DataCompleteness { connected: true, fields_missing: Vec::new() },
        }
    }

    /// S1 — sweep-reversal approve scenario (spec.md §8).
    #[test]
    fn s1_sweep_reversal_approves() {
        let mut schema = base_schema();
        schema.momentum.rsi = Some(28.0);
        schema.momentum.rsi_zone = Some(Rz::Oversold);
        schema.zone_interaction.zone_touch = true;
        schema.zone_interaction.zone_direction = Some(ZoneDirection::Demand);
        schema.zone_interaction.liquidity_sweep = true;
        schema.zone_interaction.sweep_direction = Some(SweepDirection::SellSide);

        let config = default_score_config();
        let result = ScoringEngine::score(&schema, Direction::Buy, &config);

        assert_eq!(result.decision, Decision::Approve);
        assert!(result.breakdown.contains_key("regime_trend_base"));
        assert!(result.breakdown.contains_key("zone_touch_aligned_with_trend"));
        assert!(result.breakdown.contains_key("liquidity_sweep"));
        assert!(result.breakdown.contains_key("sweep_plus_zone"));
        assert!(result.breakdown.contains_key("trend_aligned"));
        assert!(result.breakdown.contains_key("rsi_confirmation"));
        assert!(result.breakdown.contains_key("bar_close_confirmed"));
        assert!(!result.breakdown.contains_key("session_tokyo"));
    }

    /// Absent Q-trend data (`trend_aligned = None`) must not be treated as
    /// "counter-trend" — only an explicit `Some(false)` triggers the
    /// `counter_trend_no_sweep` penalty.
    #[test]
    fn missing_q_trend_data_does_not_trigger_counter_trend_penalty() {
        let mut schema = base_schema();
        schema.momentum.trend_aligned = None;
        schema.zone_interaction.liquidity_sweep = false;

        let config = default_score_config();
        let result = ScoringEngine::score(&schema, Direction::Buy, &config);

        assert!(!result.breakdown.contains_key("counter_trend_no_sweep"));
        assert!(!result.breakdown.contains_key("trend_aligned"));
    }

    /// An explicit `Some(false)` (Q-trend present but opposing, no sweep)
    /// still triggers the penalty.
    #[test]
    fn q_trend_present_and_opposing_without_sweep_triggers_counter_trend_penalty() {
        let mut schema = base_schema();
        schema.momentum.trend_aligned = Some(false);
        schema.signal_quality.bar_close_confirmed = true;
        schema.zone_interaction.liquidity_sweep = false;

        let config = default_score_config();
        let result = ScoringEngine::score(&schema, Direction::Buy, &config);

        assert!(result.breakdown.contains_key("counter_trend_no_sweep"));
    }

    /// S2 — range-midpoint chase reject.
    #[test]
    fn s2_range_midpoint_chase_rejects() {
        let mut schema = base_schema();
        schema.regime.classification = RegimeClass::Range;
        schema.price_structure.sma20_distance_pct = Some(0.1);
        schema.zone_interaction = ZoneInteraction::default();

        let config = default_score_config();
        let result = ScoringEngine::score(&schema, Direction::Buy, &config);

        assert_eq!(result.decision, Decision::Reject);
        assert_eq!(result.score, INSTANT_REJECT_SCORE);
        assert!(result.reject_reasons[0].contains("range-midpoint"));
    }

    /// S3 — Gate 2 reject: Q-trend opposes, not bar-close confirmed.
    #[test]
    fn s3_gate2_rejects_counter_trend_without_bar_close() {
        let mut schema = base_schema();
        schema.momentum.trend_aligned = Some(false);
        schema.signal_quality.bar_close_confirmed = false;
        schema.zone_interaction.zone_touch = true;
        schema.zone_interaction.zone_direction = Some(ZoneDirection::Demand);
        schema.zone_interaction.liquidity_sweep = true;
        schema.zone_interaction.sweep_direction = Some(SweepDirection::SellSide);

        let config = default_score_config();
        let result = ScoringEngine::score(&schema, Direction::Buy, &config);

        assert_eq!(result.decision, Decision::Reject);
    }

    #[test]
    fn purity_same_input_same_output() {
        let schema = base_schema();
        let config = default_score_config();
        let a = ScoringEngine::score(&schema, Direction::Buy, &config);
        let b = ScoringEngine::score(&schema, Direction::Buy, &config);
        assert_eq!(a.score, b.score);
        assert_eq!(a.decision, b.decision);
    }

    #[test]
    fn three_missing_fields_instant_rejects() {
        let mut schema = base_schema();
        schema.data_completeness.fields_missing = vec!["a".into(), "b".into(), "c".into()];
        let config = default_score_config();
        let result = ScoringEngine::score(&schema, Direction::Buy, &config);
        assert_eq!(result.score, INSTANT_REJECT_SCORE);
    }

    #[test]
    fn config_hot_swap_is_whole_map() {
        let handle = ScoreConfigHandle::new(default_score_config());
        let mut replacement = handle.snapshot();
        replacement.approve_threshold = 0.9;
        handle.replace(replacement);
        assert_eq!(handle.snapshot().approve_threshold, 0.9);
    }

    #[test]
    fn load_or_default_falls_back_when_file_missing() {
        let handle = ScoreConfigHandle::load_or_default("/nonexistent/aurum-score-config.json").unwrap();
        assert_eq!(handle.snapshot().approve_threshold, default_score_config().approve_threshold);
    }

    #[test]
    fn persist_then_load_roundtrips_through_disk() {
        let dir = std::env::temp_dir().join(format!("aurum-engine-score-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("score_config.json");

        let handle = ScoreConfigHandle::new(default_score_config());
        let mut replacement = handle.snapshot();
        replacement.approve_threshold = 0.77;
        handle.replace(replacement);
        handle.persist(&path).unwrap();

        let reloaded = ScoreConfigHandle::load_or_default(&path).unwrap();
        assert_eq!(reloaded.snapshot().approve_threshold, 0.77);

        std::fs::remove_dir_all(&dir).ok();
    }
}
