// =============================================================================
// Shared scoring pipeline step
// =============================================================================
//
// Both BatchDispatcher (C7, first pass over a fresh sub-batch) and
// Revaluator (C9, re-scoring a waiting item) run the identical
// context-build -> structure -> score -> classify sequence. Factored out
// here so neither reimplements it (`batch_processor.py` and `revaluator.py`
// both call `build_context_for_ai` + `ask_ai` — the same two-step sequence
// under different callers).
// =============================================================================

use crate::context::ContextBuilder;
use crate::execution::SetupType;
use crate::scoring::{DecisionResult, ScoreConfigHandle, ScoringEngine};
use crate::signal::{Direction, Signal};
use crate::structurer::{NormalizedSchema, RegimeClass, Structurer};

pub async fn score_entry_signals(
    context_builder: &ContextBuilder,
    score_config: &ScoreConfigHandle,
    entry_signals: &[Signal],
    q_trend_direction: Option<Direction>,
) -> (NormalizedSchema, DecisionResult, SetupType) {
    let canonical = &entry_signals[0];
    let ctx = context_builder.build(&canonical.symbol, entry_signals.to_vec(), q_trend_direction).await;
    let schema = Structurer::structure(&ctx, canonical);

    let config = score_config.snapshot();
    let direction = canonical.direction.unwrap_or(Direction::Buy);
    let result = ScoringEngine::score(&schema, direction, &config);

    let regime_trending = matches!(schema.regime.classification, RegimeClass::Trend | RegimeClass::Breakout);
    let setup_type = SetupType::classify(&result.breakdown, regime_trending);

    (schema, result, setup_type)
}
