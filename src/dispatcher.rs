// =============================================================================
// BatchDispatcher (C7)
// =============================================================================
//
// Entry point for a closed debounce batch (spec.md §3, §4.9), grounded on
// `original_source/batch_processor.py::BatchProcessor.process`. Structure
// signals are persisted first so the Revaluator's `structure_needed` items
// see them before anything else runs; the mixed-direction behavior diverges
// from the Python original (which skips the whole batch) in favor of
// spec.md's per-direction split, which is the more detailed and authoritative
// source for this repo.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::context::ContextBuilder;
use crate::decision::AiDecisionRecord;
use crate::execution::{Executor, ExecutionResult};
use crate::persistence::{ScoringHistoryRow, Store};
use crate::pipeline::score_entry_signals;
use crate::revaluator::Revaluator;
use crate::scoring::{Decision, ScoreConfigHandle, WaitScope};
use crate::signal::{Batch, Direction, Signal, SignalEvent, SignalKind};
use crate::wait_buffer::WaitBuffer;

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Minimum gap between two synthetic reversal triggers in the same
    /// resulting direction (config.py's unnamed `cooldown_sec`, spec.md
    /// §4.9: "≈5 min").
    pub reversal_cooldown: Duration,
    /// How far back to look for a `liquidity_sweep` not present in the
    /// current batch.
    pub sweep_lookback: Duration,
    /// How far back to look for a `zone_retrace_touch`/`fvg_touch` not
    /// present in the current batch.
    pub zone_lookback: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            reversal_cooldown: Duration::minutes(5),
            sweep_lookback: Duration::minutes(30),
            zone_lookback: Duration::minutes(15),
        }
    }
}

pub struct BatchDispatcher {
    store: Arc<dyn Store>,
    context_builder: Arc<ContextBuilder>,
    score_config: Arc<ScoreConfigHandle>,
    executor: Arc<Executor>,
    wait_buffer: Arc<WaitBuffer>,
    revaluator: Arc<Revaluator>,
    config: DispatcherConfig,
    /// Last synthesized-reversal time per resulting direction, guarding the
    /// cooldown (spec.md §4.9).
    last_reversal: Mutex<HashMap<Direction, DateTime<Utc>>>,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        context_builder: Arc<ContextBuilder>,
        score_config: Arc<ScoreConfigHandle>,
        executor: Arc<Executor>,
        wait_buffer: Arc<WaitBuffer>,
        revaluator: Arc<Revaluator>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            context_builder,
            score_config,
            executor,
            wait_buffer,
            revaluator,
            config,
            last_reversal: Mutex::new(HashMap::new()),
        })
    }

    /// Process one closed batch (spec.md §4.9).
    pub async fn process(&self, batch: Batch) {
        let (structures, mut triggers): (Vec<Signal>, Vec<Signal>) =
            batch.into_iter().partition(|s| s.kind == SignalKind::Structure);

        for s in &structures {
            let _ = self.store.record_signal(s).await;
        }
        if !structures.is_empty() {
            self.revaluator.on_new_structure().await;
        }

        if triggers.is_empty() {
            if structures.is_empty() {
                return;
            }
            match self.detect_reversal(&structures).await {
                Some(synthetic) => triggers.push(synthetic),
                None => return,
            }
        }

        for t in &triggers {
            let _ = self.store.record_signal(t).await;
        }

        let directions: HashSet<Direction> = triggers.iter().filter_map(|t| t.direction).collect();
        if directions.len() > 1 {
            info!(count = directions.len(), "batch has mixed directions, splitting into sub-batches");
            for direction in directions {
                let sub_batch: Vec<Signal> = triggers.iter().filter(|t| t.direction == Some(direction)).cloned().collect();
                self.run_sub_batch(sub_batch).await;
            }
        } else {
            self.run_sub_batch(triggers).await;
        }
    }

    /// S = liquidity_sweep present (batch or recent DB); Z = a retrace/fvg
    /// touch present (batch or recent DB). If both hold and the resulting
    /// direction isn't in cooldown, synthesize an opposite-direction entry
    /// trigger (spec.md §4.9, §8 reversal scenario).
    async fn detect_reversal(&self, structures: &[Signal]) -> Option<Signal> {
        let now = Utc::now();

        let sweep = match structures.iter().find(|s| s.event == SignalEvent::LiquiditySweep) {
            Some(s) => s.clone(),
            None => self.store.recent_signals_by_event(SignalEvent::LiquiditySweep.as_str(), self.config.sweep_lookback).await.into_iter().next()?,
        };

        let zone_in_batch = structures.iter().find(|s| matches!(s.event, SignalEvent::ZoneRetraceTouch | SignalEvent::FvgTouch)).cloned();
        let zone = match zone_in_batch {
            Some(z) => Some(z),
            None => {
                let retrace = self.store.recent_signals_by_event(SignalEvent::ZoneRetraceTouch.as_str(), self.config.zone_lookback).await;
                let fvg = self.store.recent_signals_by_event(SignalEvent::FvgTouch.as_str(), self.config.zone_lookback).await;
                retrace.into_iter().next().or_else(|| fvg.into_iter().next())
            }
        };
        let zone = zone?;

        let resulting_direction = sweep.direction?.opposite();

        {
            let mut last = self.last_reversal.lock();
            if let Some(&last_time) = last.get(&resulting_direction) {
                if now - last_time < self.config.reversal_cooldown {
                    return None;
                }
            }
            last.insert(resulting_direction, now);
        }

        info!(direction = %resulting_direction, "reversal detector synthesized entry trigger");
        Some(Signal {
            symbol: sweep.symbol.clone(),
            // spec.md §9: the reversal trigger's entry price is the
            // zone/FVG touch price, not the sweep price.
            price: zone.price,
            timeframe: sweep.timeframe,
            direction: Some(resulting_direction),
            kind: SignalKind::EntryTrigger,
            event: SignalEvent::PredictionSignal,
            source: "reversal_detector".to_string(),
            strength: "synthetic".to_string(),
            confirmed: None,
            tv_confidence: None,
            pattern_similarity: None,
            received_at: now,
        })
    }

    async fn run_sub_batch(&self, entry_signals: Vec<Signal>) {
        if entry_signals.is_empty() {
            return;
        }
        let direction = entry_signals[0].direction;

        let (schema, result, setup_type) =
            score_entry_signals(&self.context_builder, &self.score_config, &entry_signals, direction).await;

        let setup_label = format!("{setup_type:?}").to_lowercase();
        let record = AiDecisionRecord::new(&entry_signals, schema, result.clone(), &setup_label);

        let _ = self
            .store
            .record_scoring(ScoringHistoryRow {
                created_at: record.created_at,
                direction: direction.map(|d| d.as_str().to_string()).unwrap_or_default(),
                regime: format!("{:?}", record.structured_data.regime.classification),
                total_score: record.score,
                decision: record.decision.clone(),
            })
            .await;

        match result.decision {
            Decision::Approve => match self.executor.execute(&entry_signals[0], &result).await {
                ExecutionResult::Placed { ticket, .. } => info!(ticket, "entry executed"),
                ExecutionResult::Blocked(reason) => info!(reason = %reason, "entry blocked by risk gate"),
                ExecutionResult::Error(err) => warn!(error = %err, "entry execution error"),
            },
            Decision::Wait => {
                let scope = result.wait_condition.unwrap_or(WaitScope::NextBar);
                self.wait_buffer.add(entry_signals, record, scope, format!("{scope:?}"));
            }
            Decision::Reject => {
                info!(reasons = ?result.reject_reasons, "entry rejected");
            }
        }
    }
}
