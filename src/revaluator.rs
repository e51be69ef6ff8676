// =============================================================================
// Revaluator (C9)
// =============================================================================
//
// Re-scores WaitBuffer items, grounded on `original_source/revaluator.py`:
// a 15s poll loop handling `next_bar`/`cooldown` timer-based re-evaluation
// and expiry, plus an event hook (`on_new_structure`) fired by the
// BatchDispatcher whenever a structure signal lands, which immediately
// re-evaluates every `structure_needed` item rather than waiting on the
// timer.
//
// `_reeval_item`'s exact ordering — check the reeval-limit first, *then*
// increment, *then* rebuild context and rescore — is preserved verbatim
// since it determines whether the limit-exceeding call itself counts
// (spec.md §8 property 7: it must not).
// =============================================================================

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::context::ContextBuilder;
use crate::execution::{Executor, ExecutionResult};
use crate::persistence::Store;
use crate::pipeline::score_entry_signals;
use crate::scoring::{Decision, ScoreConfigHandle, WaitScope};
use crate::signal::Direction;
use crate::wait_buffer::{WaitBuffer, WaitItem, WaitStatus};

const POLL_INTERVAL_SECS: u64 = 15;

pub struct Revaluator {
    wait_buffer: Arc<WaitBuffer>,
    context_builder: Arc<ContextBuilder>,
    score_config: Arc<ScoreConfigHandle>,
    executor: Arc<Executor>,
    store: Arc<dyn Store>,
}

impl Revaluator {
    pub fn new(
        wait_buffer: Arc<WaitBuffer>,
        context_builder: Arc<ContextBuilder>,
        score_config: Arc<ScoreConfigHandle>,
        executor: Arc<Executor>,
        store: Arc<dyn Store>,
    ) -> Arc<Self> {
        Arc::new(Self { wait_buffer, context_builder, score_config, executor, store })
    }

    /// Background poll loop. Runs until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("revaluator started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(POLL_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("revaluator shutting down");
                    break;
                }
            }
        }
    }

    /// Invoked by BatchDispatcher right after persisting a fresh structure
    /// signal (`batch_processor.py`: "structureがあったらwaitバッファを即再評価").
    pub async fn on_new_structure(&self) {
        let items = self.wait_buffer.get_by_scope(WaitScope::StructureNeeded);
        if items.is_empty() {
            return;
        }
        info!(count = items.len(), "new structure signal triggering immediate reevaluation");
        for item in items {
            self.reeval_item(item).await;
        }
    }

    async fn tick(&self) {
        for item in self.wait_buffer.get_waiting() {
            if self.wait_buffer.is_expired(&item) {
                info!(id = %item.id, ?item.wait_scope, "wait item expired");
                self.wait_buffer.expire_item(item.id);
                let _ = self.store.record_wait_item_resolution(item.id, "timeout").await;
                continue;
            }
            if matches!(item.wait_scope, WaitScope::NextBar | WaitScope::Cooldown) {
                self.reeval_item(item).await;
            }
        }
        self.wait_buffer.cleanup_done();
    }

    async fn reeval_item(&self, item: WaitItem) {
        if self.wait_buffer.should_reject_by_reeval(&item) {
            info!(id = %item.id, "reeval limit exceeded, rejecting");
            self.wait_buffer.resolve_item(item.id, WaitStatus::Rejected);
            let _ = self.store.record_wait_item_resolution(item.id, "rejected").await;
            return;
        }

        let reeval_count = self.wait_buffer.increment_reeval(item.id);

        if item.entry_signals.is_empty() {
            self.wait_buffer.resolve_item(item.id, WaitStatus::Rejected);
            return;
        }
        let direction = item.entry_signals[0].direction.unwrap_or(Direction::Buy);

        let (_, result, _setup_type) =
            score_entry_signals(&self.context_builder, &self.score_config, &item.entry_signals, Some(direction)).await;

        info!(id = %item.id, reeval_count, ?result.decision, "reevaluation result");

        match result.decision {
            Decision::Approve => {
                let execution = self.executor.execute(&item.entry_signals[0], &result).await;
                let status = match execution {
                    ExecutionResult::Placed { .. } => WaitStatus::Approved,
                    ExecutionResult::Blocked(_) | ExecutionResult::Error(_) => WaitStatus::Rejected,
                };
                self.wait_buffer.resolve_item(item.id, status);
                let label = if status == WaitStatus::Approved { "approved" } else { "rejected" };
                let _ = self.store.record_wait_item_resolution(item.id, label).await;
            }
            Decision::Reject => {
                self.wait_buffer.resolve_item(item.id, WaitStatus::Rejected);
                let _ = self.store.record_wait_item_resolution(item.id, "rejected").await;
            }
            Decision::Wait => {
                let scope = result.wait_condition.unwrap_or(item.wait_scope);
                self.wait_buffer.update_scope(item.id, scope, format!("{scope:?}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::decision::AiDecisionRecord;
    use crate::execution::ExecutorConfig;
    use crate::market_data::Candle;
    use crate::persistence::InMemoryStore;
    use crate::position_engine::{PositionManager, PositionManagerConfig};
    use crate::risk::{RiskGate, RiskGateConfig};
    use crate::scoring::{default_score_config, DecisionResult};
    use crate::signal::{Confirmation, Signal, SignalEvent, SignalKind};
    use crate::structurer::{DataCompleteness, Momentum, PriceStructure, Regime, RegimeClass as Rc, Session, SignalQuality, ZoneInteraction};
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn flat_candles(n: usize, price: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle { open_time: i as i64, close_time: i as i64 + 1, open: price, high: price + 1.0, low: price - 1.0, close: price, volume: 10.0 })
            .collect()
    }

    fn entry_signal(direction: Direction) -> Signal {
        Signal {
            symbol: "GOLD".into(),
            price: 5200.0,
            timeframe: None,
            direction: Some(direction),
            kind: SignalKind::EntryTrigger,
            event: SignalEvent::PredictionSignal,
            source: "tv".into(),
            strength: "strong".into(),
            confirmed: Some(Confirmation::BarClose),
            tv_confidence: None,
            pattern_similarity: None,
            received_at: Utc::now(),
        }
    }

    fn dummy_decision(direction: Direction) -> AiDecisionRecord {
        AiDecisionRecord {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            signal_ids: vec![],
            decision: "wait".into(),
            score: 0.3,
            reason: None,
            wait_scope: Some("structure_needed".into()),
            wait_condition: Some("structure_needed".into()),
            structured_data: crate::structurer::NormalizedSchema {
                regime: Regime { classification: Rc::Trend, adx: Some(22.0), adx_rising: Some(true), atr_expanding: Some(true), squeeze: Some(false) },
                price_structure: PriceStructure::default(),
                zone_interaction: ZoneInteraction::default(),
                momentum: Momentum { rsi: Some(28.0), rsi_zone: Some(crate::structurer::RsiZone::Oversold), trend_aligned: Some(direction == Direction::Buy) },
                signal_quality: SignalQuality { source: "tv".into(), bar_close_confirmed: true, session: Session::London, tv_confidence: None, pattern_similarity: None },
                data_completeness: DataCompleteness { connected: true, fields_missing: vec![] },
            },
            score_breakdown: HashMap::new(),
            setup_type: "standard".into(),
            session: "london".into(),
        }
    }

    /// S4: a wait item in structure_needed is promoted when a new
    /// zone_retrace_touch arrives, bringing the score up to approve.
    #[tokio::test]
    async fn s4_new_structure_promotes_waiting_item() {
        let broker = Arc::new(MockBroker::default());
        *broker.candles.lock() = flat_candles(60, 5200.0);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

        let context_builder = Arc::new(ContextBuilder::new(broker.clone(), store.clone()));
        let score_config = Arc::new(ScoreConfigHandle::new(default_score_config()));
        let risk_gate = Arc::new(RiskGate::new(broker.clone(), store.clone(), RiskGateConfig::default()));
        let position_manager = PositionManager::new(PositionManagerConfig::default());
        let executor = Arc::new(Executor::new(broker.clone(), risk_gate, position_manager, ExecutorConfig::default()));
        let wait_buffer = Arc::new(WaitBuffer::new(3, crate::wait_buffer::ExpiryConfig::default()));

        let revaluator = Revaluator::new(wait_buffer.clone(), context_builder, score_config, executor, store.clone());

        let signal = entry_signal(Direction::Buy);
        let id = wait_buffer.add(vec![signal], dummy_decision(Direction::Buy), WaitScope::StructureNeeded, "structure_needed".into());

        // No structure context yet: a zone_retrace_touch arrives matching the
        // entry direction, landing in the store the next context build reads.
        let zone_signal = Signal {
            symbol: "GOLD".into(),
            price: 5199.0,
            timeframe: None,
            direction: Some(Direction::Buy),
            kind: SignalKind::Structure,
            event: SignalEvent::ZoneRetraceTouch,
            source: "chart".into(),
            strength: "".into(),
            confirmed: None,
            tv_confidence: None,
            pattern_similarity: None,
            received_at: Utc::now(),
        };
        store.record_signal(&zone_signal).await.unwrap();

        revaluator.on_new_structure().await;

        let item = wait_buffer.get_all().into_iter().find(|i| i.id == id);
        // Either resolved (approved/rejected) or, if still wait, re-scoped.
        match item {
            Some(i) => assert_eq!(i.reeval_count, 1),
            None => panic!("item unexpectedly removed"),
        }
    }

    #[test]
    fn decision_result_is_plain_data() {
        let result = DecisionResult { decision: Decision::Wait, score: 0.3, breakdown: HashMap::new(), reject_reasons: vec![], wait_condition: Some(WaitScope::Cooldown) };
        assert_eq!(result.score, 0.3);
    }
}
